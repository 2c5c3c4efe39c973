use std::fmt;
use std::sync::Arc;

/// Static type of an evaluation stack slot, argument, field or return value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotType {
    /// The type-erased value a handler binds.
    Value,
    /// The per-call `RequestContext`.
    Context,
    /// The context's item store.
    Items,
    Str,
    /// An instance of a completion type.
    Completion,
    /// An outcome future.
    Task,
    /// The receiver of an instance method.
    This,
    Void,
}

impl SlotType {
    /// Whether a value of this type may be written into the item store.
    pub fn is_storable(self) -> bool {
        matches!(self, SlotType::Value | SlotType::Str | SlotType::Completion)
    }

    /// Whether a static field may hold this type.
    pub fn is_field_type(self) -> bool {
        self.is_storable()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FieldHandle {
    pub(crate) module: u64,
    pub(crate) type_index: usize,
    pub(crate) field_index: usize,
}

/// Parameterless constructor of a finished completion type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CtorHandle {
    pub(crate) module: u64,
    pub(crate) type_index: usize,
}

/// Runtime services callable from emitted code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intrinsic {
    /// `Context -> Items`
    ContextItems,
    /// `Items, Str, <storable> -> ()`
    ItemsSet,
    /// `-> Task`, already finished.
    CompletedTask,
}

impl Intrinsic {
    /// Popped operand types, bottom of the stack first, and the pushed result.
    pub fn signature(self) -> (&'static [SlotType], SlotType) {
        match self {
            Intrinsic::ContextItems  => (&[SlotType::Context], SlotType::Items),
            Intrinsic::ItemsSet      => (&[SlotType::Items, SlotType::Str, SlotType::Value], SlotType::Void),
            Intrinsic::CompletedTask => (&[], SlotType::Task),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum OpCode {
    LdArg(u16),
    LdStr(Arc<str>),
    LdSFld(FieldHandle),
    StSFld(FieldHandle),
    NewObj(CtorHandle),
    Call(Intrinsic),
    Ret,
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpCode::LdArg(i)    => write!(f, "ldarg.{}", i),
            OpCode::LdStr(s)    => write!(f, "ldstr {:?}", s),
            OpCode::LdSFld(h)   => write!(f, "ldsfld {}:{}", h.type_index, h.field_index),
            OpCode::StSFld(h)   => write!(f, "stsfld {}:{}", h.type_index, h.field_index),
            OpCode::NewObj(c)   => write!(f, "newobj {}", c.type_index),
            OpCode::Call(i)     => write!(f, "call {:?}", i),
            OpCode::Ret         => write!(f, "ret"),
        }
    }
}

/// Instruction stream of one method body.
#[derive(Clone, Debug, Default)]
pub struct IlGenerator {
    ops: Vec<OpCode>,
}

impl IlGenerator {
    pub fn emit(&mut self, op: OpCode) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn ops(&self) -> &[OpCode] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
