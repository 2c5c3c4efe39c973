use crate::codegen::{generate_completion_type, CONTEXT_PARAMETER_NAME};
use crate::emit::{CompiledHandler, FieldHandle, MethodBuilder, MethodSignature, ModuleBuilder, OpCode, RuntimeType, SlotType, TypeKind};
use crate::EmitError;

pub const ROUTE_HANDLER_TYPE: &str = "RouteHandler";
pub const EXECUTE: &str = "Execute";
pub const RESULT_FIELD: &str = "_result";

/// Synthesizes `RouteHandler.Execute(T <parameter_name>, RequestContext httpContext)` and
/// binds it. `emit_body` fills the entry point and gets the completion singleton field.
pub fn create_route_handler<T, F>(module: &mut ModuleBuilder, parameter_name: &str, emit_body: F) -> Result<CompiledHandler<T>, EmitError>
where
    T: Send + Sync + 'static,
    F: FnOnce(&mut MethodBuilder, FieldHandle) -> Result<(), EmitError>,
{
    let completion_ctor = generate_completion_type(module)?;

    let mut tb = module.define_type(ROUTE_HANDLER_TYPE, TypeKind::Class)?;
    let result_field = tb.define_field(RESULT_FIELD, SlotType::Completion)?;
    tb.define_type_initializer()?.il()
        .emit(OpCode::NewObj(completion_ctor))
        .emit(OpCode::StSFld(result_field))
        .emit(OpCode::Ret);

    let execute = tb.define_method(EXECUTE, MethodSignature::static_fn(&[SlotType::Value, SlotType::Context], SlotType::Completion))?;
    execute.define_parameter(1, parameter_name)?;
    execute.define_parameter(2, CONTEXT_PARAMETER_NAME)?;
    emit_body(execute, result_field)?;

    let ty = module.create_type(tb)?;
    RuntimeType::create_handler(&ty, EXECUTE)
}
