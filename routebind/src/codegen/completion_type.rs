use crate::codegen::CONTEXT_PARAMETER_NAME;
use crate::emit::{CtorHandle, Intrinsic, MethodSignature, ModuleBuilder, OpCode, SlotType, TypeKind, EXECUTE_ASYNC};
use crate::EmitError;

pub const COMPLETED_RESULT_TYPE: &str = "CompletedResult";

/// Defines a completion type whose `ExecuteAsync` returns an already finished task.
pub fn generate_completion_type(module: &mut ModuleBuilder) -> Result<CtorHandle, EmitError> {
    let mut tb = module.define_type(COMPLETED_RESULT_TYPE, TypeKind::Completion)?;
    let execute = tb.define_method(EXECUTE_ASYNC, MethodSignature::instance(&[SlotType::Context], SlotType::Task))?;
    execute.define_parameter(1, CONTEXT_PARAMETER_NAME)?;
    execute.il()
        .emit(OpCode::Call(Intrinsic::CompletedTask))
        .emit(OpCode::Ret);

    let ty = module.create_type(tb)?;
    ty.constructor().ok_or_else(|| EmitError::MissingCapability(ty.name().to_string()))
}
