use crate::completion::{completed, failed, Completion, CompletionFuture};
use crate::context::{BoxedValue, Items, RequestContext};
use crate::emit::module::{FieldDef, MethodSignature, TypeKind};
use crate::emit::opcode::{CtorHandle, Intrinsic, SlotType};
use crate::EmitError;
use once_cell::sync::OnceCell;
use std::marker::PhantomData;
use std::sync::Arc;

/// Name of the completion capability method every `TypeKind::Completion` type implements.
pub const EXECUTE_ASYNC: &str = "ExecuteAsync";

/// Verified instruction with operands resolved against the declaring type.
pub(crate) enum Instr {
    LdArg(usize),
    LdStr(Arc<str>),
    LdSFld(usize),
    StSFld(usize),
    NewObj(Arc<RuntimeType>),
    Call(Intrinsic),
    Ret,
}

pub(crate) struct RuntimeMethod {
    pub(crate) name: String,
    pub(crate) signature: MethodSignature,
    pub(crate) param_names: Vec<Option<Arc<str>>>,
    pub(crate) code: Vec<Instr>,
}

#[derive(Clone)]
pub(crate) enum StaticValue {
    Value(BoxedValue),
    Str(Arc<str>),
    Completion(Arc<dyn Completion>),
}

impl StaticValue {
    fn to_slot<'a>(&self) -> Slot<'a> {
        match self {
            StaticValue::Value(v)      => Slot::Value(v.clone()),
            StaticValue::Str(s)        => Slot::Str(s.clone()),
            StaticValue::Completion(c) => Slot::Completion(c.clone()),
        }
    }
}

pub(crate) enum Slot<'a> {
    Value(BoxedValue),
    Context(&'a RequestContext),
    Items(&'a Items),
    Str(Arc<str>),
    Completion(Arc<dyn Completion>),
    Task(CompletionFuture),
    This,
    Void,
}

impl<'a> Slot<'a> {
    fn duplicate(&self) -> Option<Slot<'a>> {
        match self {
            Slot::Value(v)      => Some(Slot::Value(v.clone())),
            Slot::Context(c)    => Some(Slot::Context(*c)),
            Slot::Items(i)      => Some(Slot::Items(*i)),
            Slot::Str(s)        => Some(Slot::Str(s.clone())),
            Slot::Completion(c) => Some(Slot::Completion(c.clone())),
            Slot::This          => Some(Slot::This),
            Slot::Task(_) | Slot::Void => None,
        }
    }

    fn into_boxed(self) -> Option<BoxedValue> {
        match self {
            Slot::Value(v)      => Some(v),
            Slot::Str(s)        => Some(Arc::new(s) as BoxedValue),
            Slot::Completion(c) => Some(Arc::new(c) as BoxedValue),
            _                   => None,
        }
    }

    fn into_static(self) -> Option<StaticValue> {
        match self {
            Slot::Value(v)      => Some(StaticValue::Value(v)),
            Slot::Str(s)        => Some(StaticValue::Str(s)),
            Slot::Completion(c) => Some(StaticValue::Completion(c)),
            _                   => None,
        }
    }
}

pub(crate) enum Statics<'s> {
    Initializing(&'s mut [Option<StaticValue>]),
    Ready(&'s [Option<StaticValue>]),
}

/// A finished, immutable synthesized type.
pub struct RuntimeType {
    module_id: u64,
    index: usize,
    module: String,
    name: String,
    kind: TypeKind,
    fields: Vec<FieldDef>,
    initializer: Option<RuntimeMethod>,
    methods: Vec<RuntimeMethod>,
    capability: Option<usize>,
    statics: OnceCell<Vec<Option<StaticValue>>>,
}

impl RuntimeType {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        module_id: u64,
        index: usize,
        module: String,
        name: String,
        kind: TypeKind,
        fields: Vec<FieldDef>,
        initializer: Option<RuntimeMethod>,
        methods: Vec<RuntimeMethod>,
    ) -> Result<Self, EmitError> {
        let capability = match kind {
            TypeKind::Completion => {
                let expected = MethodSignature::instance(&[SlotType::Context], SlotType::Task);
                let idx = methods
                    .iter()
                    .position(|m| m.name == EXECUTE_ASYNC && m.signature == expected)
                    .ok_or_else(|| EmitError::MissingCapability(name.clone()))?;
                Some(idx)
            }
            TypeKind::Class => None,
        };
        Ok(Self { module_id, index, module, name, kind, fields, initializer, methods, capability, statics: OnceCell::new() })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module_name(&self) -> &str {
        &self.module
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Parameterless constructor, only completion types are instantiable.
    pub fn constructor(&self) -> Option<CtorHandle> {
        (self.kind == TypeKind::Completion).then_some(CtorHandle { module: self.module_id, type_index: self.index })
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(|m| m.name.as_str())
    }

    pub fn is_initialized(&self) -> bool {
        self.statics.get().is_some()
    }

    /// Runs the type initializer at most once.
    pub(crate) fn ensure_initialized(&self) -> Result<&[Option<StaticValue>], EmitError> {
        self.statics
            .get_or_try_init(|| {
                let mut scratch = vec![None; self.fields.len()];
                if let Some(init) = &self.initializer {
                    self.execute(init, Vec::new(), Statics::Initializing(&mut scratch))
                        .map_err(|e| EmitError::TypeInitializer(self.name.clone(), e.to_string()))?;
                }
                Ok(scratch)
            })
            .map(Vec::as_slice)
    }

    /// Binds a static `(Value, Context) -> Completion` method as a callable handler.
    /// The type initializer has run once this returns.
    pub fn create_handler<T: Send + Sync + 'static>(this: &Arc<Self>, method: &str) -> Result<CompiledHandler<T>, EmitError> {
        let idx = this.methods.iter().position(|m| m.name == method).ok_or_else(|| EmitError::MethodNotFound {
            ty: this.name.clone(),
            method: method.to_string(),
        })?;
        let expected = MethodSignature::static_fn(&[SlotType::Value, SlotType::Context], SlotType::Completion);
        if this.methods[idx].signature != expected {
            return Err(EmitError::SignatureMismatch(format!("{}::{}", this.name, method)));
        }
        this.ensure_initialized()?;
        Ok(CompiledHandler { ty: this.clone(), method: idx, _marker: PhantomData })
    }

    fn execute<'a>(&self, method: &RuntimeMethod, args: Vec<Slot<'a>>, mut statics: Statics<'_>) -> Result<Slot<'a>, EmitError> {
        let qualified = || format!("{}::{}", self.name, method.name);
        let mut stack: Vec<Slot<'a>> = Vec::with_capacity(4);

        for (offset, instr) in method.code.iter().enumerate() {
            let invalid = || EmitError::InvalidOperand { method: qualified(), offset };
            match instr {
                Instr::LdArg(i) => stack.push(args.get(*i).and_then(Slot::duplicate).ok_or_else(invalid)?),
                Instr::LdStr(s) => stack.push(Slot::Str(s.clone())),
                Instr::LdSFld(idx) => {
                    let value = match &statics {
                        Statics::Initializing(s) => s.get(*idx).cloned().flatten(),
                        Statics::Ready(s) => s.get(*idx).cloned().flatten(),
                    };
                    stack.push(value.ok_or_else(invalid)?.to_slot());
                }
                Instr::StSFld(idx) => {
                    let value = stack.pop().and_then(Slot::into_static).ok_or_else(invalid)?;
                    match &mut statics {
                        Statics::Initializing(s) => *s.get_mut(*idx).ok_or_else(invalid)? = Some(value),
                        Statics::Ready(_) => return Err(invalid()),
                    }
                }
                Instr::NewObj(ty) => {
                    let instance = SynthesizedCompletion::new(ty.clone())?;
                    stack.push(Slot::Completion(Arc::new(instance)));
                }
                Instr::Call(Intrinsic::ContextItems) => match stack.pop() {
                    Some(Slot::Context(ctx)) => stack.push(Slot::Items(ctx.items())),
                    _ => return Err(invalid()),
                },
                Instr::Call(Intrinsic::ItemsSet) => {
                    let value = stack.pop().and_then(Slot::into_boxed).ok_or_else(invalid)?;
                    let key = match stack.pop() {
                        Some(Slot::Str(key)) => key,
                        _ => return Err(invalid()),
                    };
                    match stack.pop() {
                        Some(Slot::Items(items)) => items.insert(key, value),
                        _ => return Err(invalid()),
                    }
                }
                Instr::Call(Intrinsic::CompletedTask) => stack.push(Slot::Task(completed())),
                Instr::Ret => return Ok(stack.pop().unwrap_or(Slot::Void)),
            }
        }
        Err(EmitError::MissingReturn(qualified()))
    }
}

/// Instance of a synthesized completion type.
struct SynthesizedCompletion {
    ty: Arc<RuntimeType>,
}

impl SynthesizedCompletion {
    fn new(ty: Arc<RuntimeType>) -> Result<Self, EmitError> {
        ty.ensure_initialized()?;
        Ok(Self { ty })
    }

    fn run<'a>(&self, ctx: &'a RequestContext) -> Result<Slot<'a>, EmitError> {
        let method = self
            .ty
            .capability
            .and_then(|i| self.ty.methods.get(i))
            .ok_or_else(|| EmitError::MissingCapability(self.ty.name.clone()))?;
        let statics = self.ty.ensure_initialized()?;
        self.ty.execute(method, vec![Slot::This, Slot::Context(ctx)], Statics::Ready(statics))
    }
}

impl Completion for SynthesizedCompletion {
    fn execute(&self, ctx: &RequestContext) -> CompletionFuture {
        match self.run(ctx) {
            Ok(Slot::Task(task)) => task,
            Ok(_) => failed(EmitError::InvalidOperand {
                method: format!("{}::{}", self.ty.name, EXECUTE_ASYNC),
                offset: 0,
            }),
            Err(e) => failed(e),
        }
    }
}

/// Callable bound to a synthesized `(T, Context) -> Completion` entry point.
pub struct CompiledHandler<T> {
    ty: Arc<RuntimeType>,
    method: usize,
    _marker: PhantomData<fn(T)>,
}

impl<T> Clone for CompiledHandler<T> {
    fn clone(&self) -> Self {
        Self { ty: self.ty.clone(), method: self.method, _marker: PhantomData }
    }
}

impl<T: Send + Sync + 'static> CompiledHandler<T> {
    pub fn invoke(&self, value: T, ctx: &RequestContext) -> Result<Arc<dyn Completion>, EmitError> {
        let method = self.entry_point();
        let statics = self.ty.ensure_initialized()?;
        let args = vec![Slot::Value(Arc::new(value)), Slot::Context(ctx)];
        match self.ty.execute(method, args, Statics::Ready(statics))? {
            Slot::Completion(completion) => Ok(completion),
            _ => Err(EmitError::InvalidOperand { method: format!("{}::{}", self.ty.name, method.name), offset: method.code.len() }),
        }
    }
}

impl<T> CompiledHandler<T> {
    fn entry_point(&self) -> &RuntimeMethod {
        &self.ty.methods[self.method]
    }

    pub fn declaring_type(&self) -> &RuntimeType {
        &self.ty
    }

    pub fn method_name(&self) -> &str {
        &self.entry_point().name
    }

    /// Formal parameter names in declaration order.
    pub fn parameter_names(&self) -> Vec<Option<&str>> {
        self.entry_point().param_names.iter().map(|n| n.as_deref()).collect()
    }

    pub fn parameter_name(&self, index: usize) -> Option<&str> {
        self.entry_point().param_names.get(index).and_then(|n| n.as_deref())
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.ty, &other.ty) && self.method == other.method
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::module::ModuleBuilder;
    use crate::emit::opcode::OpCode;
    use futures::FutureExt;

    fn completion_type(module: &mut ModuleBuilder) -> Arc<RuntimeType> {
        let mut tb = module.define_type("Done", TypeKind::Completion).unwrap();
        tb.define_method(EXECUTE_ASYNC, MethodSignature::instance(&[SlotType::Context], SlotType::Task)).unwrap().il()
            .emit(OpCode::Call(Intrinsic::CompletedTask))
            .emit(OpCode::Ret);
        module.create_type(tb).unwrap()
    }

    #[test]
    fn completion_types_must_implement_the_capability() {
        let mut module = ModuleBuilder::new("m");
        let tb = module.define_type("Empty", TypeKind::Completion).unwrap();
        assert_eq!(module.create_type(tb).err().unwrap(), EmitError::MissingCapability("Empty".into()));
        assert!(completion_type(&mut module).constructor().is_some());
    }

    #[test]
    fn initializer_runs_before_the_handler_is_usable() {
        let mut module = ModuleBuilder::new("m");
        let done = completion_type(&mut module);
        let mut tb = module.define_type("Handler", TypeKind::Class).unwrap();
        let result = tb.define_field("_result", SlotType::Completion).unwrap();
        let key = tb.define_field("_key", SlotType::Str).unwrap();
        tb.define_type_initializer().unwrap().il()
            .emit(OpCode::NewObj(done.constructor().unwrap()))
            .emit(OpCode::StSFld(result))
            .emit(OpCode::LdStr("slot".into()))
            .emit(OpCode::StSFld(key))
            .emit(OpCode::Ret);
        tb.define_method("Execute", MethodSignature::static_fn(&[SlotType::Value, SlotType::Context], SlotType::Completion))
            .unwrap()
            .il()
            .emit(OpCode::LdArg(1))
            .emit(OpCode::Call(Intrinsic::ContextItems))
            .emit(OpCode::LdSFld(key))
            .emit(OpCode::LdArg(0))
            .emit(OpCode::Call(Intrinsic::ItemsSet))
            .emit(OpCode::LdSFld(result))
            .emit(OpCode::Ret);
        let ty = module.create_type(tb).unwrap();
        assert!(!ty.is_initialized());

        let handler = RuntimeType::create_handler::<u64>(&ty, "Execute").unwrap();
        assert!(ty.is_initialized());

        let ctx = RequestContext::default();
        let first = handler.invoke(7, &ctx).unwrap();
        let second = handler.invoke(8, &ctx).unwrap();
        assert!(Arc::ptr_eq(&first, &second), "the completion singleton is created once");
        assert_eq!(ctx.items().get::<u64>("slot"), Some(8));
        assert_eq!(first.execute(&ctx).now_or_never(), Some(Ok(())));
    }

    #[test]
    fn runtime_failures_resolve_the_completion_with_the_error() {
        let mut module = ModuleBuilder::new("m");
        let mut tb = module.define_type("Unset", TypeKind::Completion).unwrap();
        let key = tb.define_field("_key", SlotType::Str).unwrap();
        tb.define_method(EXECUTE_ASYNC, MethodSignature::instance(&[SlotType::Context], SlotType::Task)).unwrap().il()
            .emit(OpCode::LdArg(1))
            .emit(OpCode::Call(Intrinsic::ContextItems))
            .emit(OpCode::LdSFld(key))
            .emit(OpCode::LdStr("x".into()))
            .emit(OpCode::Call(Intrinsic::ItemsSet))
            .emit(OpCode::Call(Intrinsic::CompletedTask))
            .emit(OpCode::Ret);
        let ty = module.create_type(tb).unwrap();

        let completion = SynthesizedCompletion::new(ty).unwrap();
        let ctx = RequestContext::default();
        let outcome = completion.execute(&ctx).now_or_never();
        assert_eq!(outcome, Some(Err(EmitError::InvalidOperand { method: "Unset::ExecuteAsync".into(), offset: 2 })));
        assert!(ctx.items().is_empty());
    }

    #[test]
    fn handler_binding_checks_the_calling_convention() {
        let mut module = ModuleBuilder::new("m");
        let mut tb = module.define_type("Handler", TypeKind::Class).unwrap();
        tb.define_method("Noop", MethodSignature::static_fn(&[], SlotType::Void)).unwrap().il().emit(OpCode::Ret);
        let ty = module.create_type(tb).unwrap();
        assert!(matches!(RuntimeType::create_handler::<u8>(&ty, "Noop"), Err(EmitError::SignatureMismatch(_))));
        assert!(matches!(RuntimeType::create_handler::<u8>(&ty, "Execute"), Err(EmitError::MethodNotFound { .. })));
        assert_eq!(ty.method_names().collect::<Vec<_>>(), vec!["Noop"]);
    }
}
