use crate::binding::{ParameterInfo, ValueType};
use crate::codegen::{create_route_handler, BIND_ONLY_ITEMS_KEY, DEFAULT_PARAMETER_NAME};
use crate::emit::{CompiledHandler, FieldHandle, Intrinsic, MethodBuilder, ModuleBuilder, OpCode};
use crate::EmitError;

/// `httpContext.Items[BIND_ONLY_ITEMS_KEY] = value; return _result;`
pub fn emit_bind_only_body(execute: &mut MethodBuilder, result_field: FieldHandle) -> Result<(), EmitError> {
    execute.il()
        .emit(OpCode::LdArg(1))
        .emit(OpCode::Call(Intrinsic::ContextItems))
        .emit(OpCode::LdStr(BIND_ONLY_ITEMS_KEY.into()))
        .emit(OpCode::LdArg(0))
        .emit(OpCode::Call(Intrinsic::ItemsSet))
        .emit(OpCode::LdSFld(result_field))
        .emit(OpCode::Ret);
    Ok(())
}

pub fn module_name(value_type: &ValueType, parameter_name: &str) -> String {
    format!("get_bind_only_request_delegate.{}.{}", value_type.short_name(), parameter_name)
}

/// Synthesizes a handler that stores its argument in the context item store.
pub fn create_bind_only_handler<T: Send + Sync + 'static>(parameter: Option<&ParameterInfo>) -> Result<CompiledHandler<T>, EmitError> {
    let parameter_name = parameter.and_then(ParameterInfo::name).unwrap_or(DEFAULT_PARAMETER_NAME);
    let mut module = ModuleBuilder::new(module_name(&ValueType::of::<T>(), parameter_name));
    create_route_handler::<T, _>(&mut module, parameter_name, emit_bind_only_body)
}
