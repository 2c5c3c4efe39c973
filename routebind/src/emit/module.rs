use crate::emit::opcode::{CtorHandle, FieldHandle, IlGenerator, OpCode, SlotType};
use crate::emit::runtime::{Instr, RuntimeMethod, RuntimeType};
use crate::EmitError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_MODULE_ID: AtomicU64 = AtomicU64::new(1);

const TYPE_INITIALIZER: &str = ".cctor";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeKind {
    /// Implements the completion capability through an `ExecuteAsync` instance method.
    Completion,
    /// Sealed class holding only static members.
    Class,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodSignature {
    pub is_static: bool,
    pub params: Vec<SlotType>,
    pub returns: SlotType,
}

impl MethodSignature {
    pub fn static_fn(params: &[SlotType], returns: SlotType) -> Self {
        Self { is_static: true, params: params.to_vec(), returns }
    }

    pub fn instance(params: &[SlotType], returns: SlotType) -> Self {
        Self { is_static: false, params: params.to_vec(), returns }
    }

    /// Argument slots as seen by `ldarg`, the receiver first for instance methods.
    pub fn arg_types(&self) -> Vec<SlotType> {
        let mut args = Vec::with_capacity(self.params.len() + 1);
        if !self.is_static {
            args.push(SlotType::This);
        }
        args.extend_from_slice(&self.params);
        args
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub ty: SlotType,
}

pub struct MethodBuilder {
    name: String,
    signature: MethodSignature,
    param_names: Vec<Option<Arc<str>>>,
    il: IlGenerator,
}

impl MethodBuilder {
    fn new(name: &str, signature: MethodSignature) -> Self {
        let param_names = vec![None; signature.params.len()];
        Self { name: name.to_string(), signature, param_names, il: IlGenerator::default() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    /// Names a formal parameter. Positions start at 1, 0 being the return value.
    pub fn define_parameter(&mut self, position: u16, name: &str) -> Result<(), EmitError> {
        let slot = (position as usize)
            .checked_sub(1)
            .and_then(|i| self.param_names.get_mut(i))
            .ok_or_else(|| EmitError::InvalidParameterPosition { method: self.name.clone(), position })?;
        *slot = Some(Arc::from(name));
        Ok(())
    }

    pub fn il(&mut self) -> &mut IlGenerator {
        &mut self.il
    }
}

pub struct TypeBuilder {
    module_id: u64,
    index: usize,
    name: String,
    kind: TypeKind,
    fields: Vec<FieldDef>,
    initializer: Option<MethodBuilder>,
    methods: Vec<MethodBuilder>,
}

impl TypeBuilder {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn define_field(&mut self, name: &str, ty: SlotType) -> Result<FieldHandle, EmitError> {
        if self.fields.iter().any(|f| f.name == name) {
            return Err(EmitError::DuplicateField { ty: self.name.clone(), field: name.to_string() });
        }
        if !ty.is_field_type() {
            return Err(EmitError::InvalidFieldType { ty: self.name.clone(), field: name.to_string(), slot: ty });
        }
        self.fields.push(FieldDef { name: name.to_string(), ty });
        Ok(FieldHandle { module: self.module_id, type_index: self.index, field_index: self.fields.len() - 1 })
    }

    pub fn define_type_initializer(&mut self) -> Result<&mut MethodBuilder, EmitError> {
        if self.initializer.is_some() {
            return Err(EmitError::DuplicateTypeInitializer(self.name.clone()));
        }
        Ok(self.initializer.insert(MethodBuilder::new(TYPE_INITIALIZER, MethodSignature::static_fn(&[], SlotType::Void))))
    }

    pub fn define_method(&mut self, name: &str, signature: MethodSignature) -> Result<&mut MethodBuilder, EmitError> {
        if self.methods.iter().any(|m| m.name == name) {
            return Err(EmitError::DuplicateMethod { ty: self.name.clone(), method: name.to_string() });
        }
        self.methods.push(MethodBuilder::new(name, signature));
        let last = self.methods.len() - 1;
        Ok(&mut self.methods[last])
    }
}

/// Emission unit types are defined into. Each synthesis attempt owns one.
pub struct ModuleBuilder {
    id: u64,
    name: String,
    type_names: Vec<String>,
    finished: Vec<Option<Arc<RuntimeType>>>,
}

impl ModuleBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: NEXT_MODULE_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            type_names: Vec::new(),
            finished: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn define_type(&mut self, name: &str, kind: TypeKind) -> Result<TypeBuilder, EmitError> {
        if self.type_names.iter().any(|n| n == name) {
            return Err(EmitError::DuplicateType(name.to_string(), self.name.clone()));
        }
        self.type_names.push(name.to_string());
        self.finished.push(None);
        Ok(TypeBuilder {
            module_id: self.id,
            index: self.type_names.len() - 1,
            name: name.to_string(),
            kind,
            fields: Vec::new(),
            initializer: None,
            methods: Vec::new(),
        })
    }

    /// Verifies and links every method of the type. Nothing is exposed on failure.
    pub fn create_type(&mut self, tb: TypeBuilder) -> Result<Arc<RuntimeType>, EmitError> {
        if tb.module_id != self.id {
            return Err(EmitError::ForeignType(tb.name));
        }
        let initializer = match &tb.initializer {
            Some(m) => Some(self.link(&tb, m, true)?),
            None => None,
        };
        let methods = tb.methods.iter().map(|m| self.link(&tb, m, false)).collect::<Result<Vec<_>, _>>()?;
        let ty = Arc::new(RuntimeType::new(self.id, tb.index, self.name.clone(), tb.name, tb.kind, tb.fields, initializer, methods)?);
        self.finished[tb.index] = Some(ty.clone());
        Ok(ty)
    }

    fn link(&self, tb: &TypeBuilder, method: &MethodBuilder, is_initializer: bool) -> Result<RuntimeMethod, EmitError> {
        let qualified = format!("{}::{}", tb.name, method.name);
        let args = method.signature.arg_types();
        let mut stack: Vec<SlotType> = Vec::new();
        let mut code = Vec::with_capacity(method.il.len());
        let mut returned = false;

        for (offset, op) in method.il.ops().iter().enumerate() {
            if returned {
                return Err(EmitError::UnreachableCode { method: qualified, offset });
            }
            let instr = match op {
                OpCode::LdArg(index) => {
                    let ty = args.get(*index as usize).copied().ok_or_else(|| EmitError::InvalidArgument {
                        method: qualified.clone(),
                        offset,
                        index: *index,
                    })?;
                    stack.push(ty);
                    Instr::LdArg(*index as usize)
                }
                OpCode::LdStr(s) => {
                    stack.push(SlotType::Str);
                    Instr::LdStr(s.clone())
                }
                OpCode::LdSFld(field) => {
                    let idx = own_field(tb, field).ok_or_else(|| EmitError::UnknownField { method: qualified.clone(), offset })?;
                    stack.push(tb.fields[idx].ty);
                    Instr::LdSFld(idx)
                }
                OpCode::StSFld(field) => {
                    let idx = own_field(tb, field).ok_or_else(|| EmitError::UnknownField { method: qualified.clone(), offset })?;
                    if !is_initializer {
                        return Err(EmitError::ReadOnlyField { method: qualified, offset });
                    }
                    pop(&mut stack, tb.fields[idx].ty, &qualified, offset)?;
                    Instr::StSFld(idx)
                }
                OpCode::NewObj(ctor) => {
                    let ty = self.completion_ctor(ctor).ok_or_else(|| EmitError::UnknownConstructor { method: qualified.clone(), offset })?;
                    stack.push(SlotType::Completion);
                    Instr::NewObj(ty)
                }
                OpCode::Call(intrinsic) => {
                    let (params, result) = intrinsic.signature();
                    for expected in params.iter().rev() {
                        pop(&mut stack, *expected, &qualified, offset)?;
                    }
                    if result != SlotType::Void {
                        stack.push(result);
                    }
                    Instr::Call(*intrinsic)
                }
                OpCode::Ret => {
                    if method.signature.returns != SlotType::Void {
                        pop(&mut stack, method.signature.returns, &qualified, offset)?;
                    }
                    if !stack.is_empty() {
                        return Err(EmitError::UnbalancedStack { method: qualified, offset, remaining: stack.len() });
                    }
                    returned = true;
                    Instr::Ret
                }
            };
            code.push(instr);
        }

        if !returned {
            return Err(EmitError::MissingReturn(qualified));
        }
        Ok(RuntimeMethod {
            name: method.name.clone(),
            signature: method.signature.clone(),
            param_names: method.param_names.clone(),
            code,
        })
    }

    fn completion_ctor(&self, ctor: &CtorHandle) -> Option<Arc<RuntimeType>> {
        if ctor.module != self.id {
            return None;
        }
        self.finished
            .get(ctor.type_index)
            .and_then(|t| t.clone())
            .filter(|t| t.kind() == TypeKind::Completion)
    }
}

fn own_field(tb: &TypeBuilder, field: &FieldHandle) -> Option<usize> {
    let owned = field.module == tb.module_id && field.type_index == tb.index && field.field_index < tb.fields.len();
    owned.then_some(field.field_index)
}

fn assignable(expected: SlotType, found: SlotType) -> bool {
    expected == found || (expected == SlotType::Value && found.is_storable())
}

fn pop(stack: &mut Vec<SlotType>, expected: SlotType, method: &str, offset: usize) -> Result<SlotType, EmitError> {
    let found = stack.pop().ok_or_else(|| EmitError::StackUnderflow { method: method.to_string(), offset })?;
    if !assignable(expected, found) {
        return Err(EmitError::TypeMismatch { method: method.to_string(), offset, expected, found });
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::opcode::Intrinsic;

    fn handler_sig() -> MethodSignature {
        MethodSignature::static_fn(&[SlotType::Value, SlotType::Context], SlotType::Completion)
    }

    #[test]
    fn duplicate_type_names_are_rejected() {
        let mut module = ModuleBuilder::new("m");
        module.define_type("RouteHandler", TypeKind::Class).unwrap();
        let err = module.define_type("RouteHandler", TypeKind::Class).err().unwrap();
        assert_eq!(err, EmitError::DuplicateType("RouteHandler".into(), "m".into()));
    }

    #[test]
    fn duplicate_members_are_rejected() {
        let mut module = ModuleBuilder::new("m");
        let mut tb = module.define_type("T", TypeKind::Class).unwrap();
        tb.define_field("_result", SlotType::Completion).unwrap();
        assert!(matches!(tb.define_field("_result", SlotType::Completion), Err(EmitError::DuplicateField { .. })));
        assert!(matches!(tb.define_field("_task", SlotType::Task), Err(EmitError::InvalidFieldType { .. })));
        tb.define_type_initializer().unwrap();
        assert!(matches!(tb.define_type_initializer(), Err(EmitError::DuplicateTypeInitializer(_))));
        tb.define_method("Execute", handler_sig()).unwrap();
        assert!(matches!(tb.define_method("Execute", handler_sig()), Err(EmitError::DuplicateMethod { .. })));
    }

    #[test]
    fn parameter_positions_are_one_based() {
        let mut module = ModuleBuilder::new("m");
        let mut tb = module.define_type("T", TypeKind::Class).unwrap();
        let method = tb.define_method("Execute", handler_sig()).unwrap();
        assert!(method.define_parameter(0, "ret").is_err());
        assert!(method.define_parameter(3, "extra").is_err());
        method.define_parameter(1, "age").unwrap();
        method.define_parameter(2, "httpContext").unwrap();
        assert_eq!(method.param_names[0].as_deref(), Some("age"));
    }

    #[test]
    fn verifier_reports_underflow() {
        let mut module = ModuleBuilder::new("m");
        let mut tb = module.define_type("T", TypeKind::Class).unwrap();
        tb.define_method("Execute", handler_sig()).unwrap().il().emit(OpCode::Call(Intrinsic::ContextItems));
        let err = module.create_type(tb).err().unwrap();
        assert_eq!(err, EmitError::StackUnderflow { method: "T::Execute".into(), offset: 0 });
    }

    #[test]
    fn verifier_reports_type_mismatch() {
        let mut module = ModuleBuilder::new("m");
        let mut tb = module.define_type("T", TypeKind::Class).unwrap();
        tb.define_method("Execute", handler_sig()).unwrap().il()
            .emit(OpCode::LdArg(0))
            .emit(OpCode::Call(Intrinsic::ContextItems));
        let err = module.create_type(tb).err().unwrap();
        assert_eq!(err, EmitError::TypeMismatch {
            method: "T::Execute".into(),
            offset: 1,
            expected: SlotType::Context,
            found: SlotType::Value,
        });
    }

    #[test]
    fn verifier_requires_balanced_ret() {
        let mut module = ModuleBuilder::new("m");
        let mut tb = module.define_type("T", TypeKind::Class).unwrap();
        tb.define_method("Execute", handler_sig()).unwrap().il().emit(OpCode::LdArg(1));
        assert_eq!(module.create_type(tb).err().unwrap(), EmitError::MissingReturn("T::Execute".into()));

        let mut tb = module.define_type("U", TypeKind::Class).unwrap();
        let f = tb.define_field("_result", SlotType::Completion).unwrap();
        tb.define_method("Execute", handler_sig()).unwrap().il()
            .emit(OpCode::LdArg(1))
            .emit(OpCode::LdSFld(f))
            .emit(OpCode::Ret);
        assert!(matches!(module.create_type(tb), Err(EmitError::UnbalancedStack { remaining: 1, .. })));
    }

    #[test]
    fn verifier_rejects_code_after_ret_and_bad_arguments() {
        let mut module = ModuleBuilder::new("m");
        let mut tb = module.define_type("T", TypeKind::Class).unwrap();
        tb.define_method("Execute", MethodSignature::static_fn(&[], SlotType::Void)).unwrap().il()
            .emit(OpCode::Ret)
            .emit(OpCode::Ret);
        assert!(matches!(module.create_type(tb), Err(EmitError::UnreachableCode { offset: 1, .. })));

        let mut tb = module.define_type("U", TypeKind::Class).unwrap();
        tb.define_method("Execute", handler_sig()).unwrap().il().emit(OpCode::LdArg(2));
        assert!(matches!(module.create_type(tb), Err(EmitError::InvalidArgument { index: 2, .. })));
    }

    #[test]
    fn static_fields_are_written_only_by_the_initializer() {
        let mut module = ModuleBuilder::new("m");
        let mut tb = module.define_type("T", TypeKind::Class).unwrap();
        let f = tb.define_field("_name", SlotType::Str).unwrap();
        tb.define_method("Set", MethodSignature::static_fn(&[], SlotType::Void)).unwrap().il()
            .emit(OpCode::LdStr("x".into()))
            .emit(OpCode::StSFld(f))
            .emit(OpCode::Ret);
        assert!(matches!(module.create_type(tb), Err(EmitError::ReadOnlyField { offset: 1, .. })));
    }

    #[test]
    fn handles_from_other_modules_are_unknown() {
        let mut other = ModuleBuilder::new("other");
        let mut foreign = other.define_type("T", TypeKind::Class).unwrap();
        let foreign_field = foreign.define_field("_result", SlotType::Completion).unwrap();

        let mut module = ModuleBuilder::new("m");
        let mut tb = module.define_type("T", TypeKind::Class).unwrap();
        tb.define_method("Execute", handler_sig()).unwrap().il()
            .emit(OpCode::LdSFld(foreign_field))
            .emit(OpCode::Ret);
        assert!(matches!(module.create_type(tb), Err(EmitError::UnknownField { offset: 0, .. })));
        assert!(matches!(module.create_type(foreign), Err(EmitError::ForeignType(_))));
    }

    #[test]
    fn constructors_must_belong_to_finished_completion_types() {
        let mut module = ModuleBuilder::new("m");
        let pending = module.define_type("Pending", TypeKind::Completion).unwrap();
        let ctor = CtorHandle { module: module.id, type_index: pending.index };
        let mut tb = module.define_type("T", TypeKind::Class).unwrap();
        let f = tb.define_field("_result", SlotType::Completion).unwrap();
        tb.define_type_initializer().unwrap().il()
            .emit(OpCode::NewObj(ctor))
            .emit(OpCode::StSFld(f))
            .emit(OpCode::Ret);
        assert!(matches!(module.create_type(tb), Err(EmitError::UnknownConstructor { offset: 0, .. })));
    }
}
