//! Process-private code emission: types are defined into a [`ModuleBuilder`], verified
//! when finished and executed as linked instruction streams.

pub mod module;
pub mod opcode;
pub mod runtime;

pub use module::{FieldDef, MethodBuilder, MethodSignature, ModuleBuilder, TypeBuilder, TypeKind};
pub use opcode::{CtorHandle, FieldHandle, IlGenerator, Intrinsic, OpCode, SlotType};
pub use runtime::{CompiledHandler, RuntimeType, EXECUTE_ASYNC};
