//! Bytecode instruction set.
//!
//! Every opcode names either a local slot, a constant-pool index, an
//! upvalue index, or an absolute jump target; the VM's value stack carries
//! operands between instructions. Jump targets are stored as the absolute
//! index of the destination instruction in `Chunk::code` rather than a
//! relative byte offset -- `Chunk` stores decoded instructions, not raw
//! bytes, so there's no byte-offset math to replicate. The compiler still
//! enforces a "jump distance fits in 16 bits" limit when patching.
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, PartialEq)]
pub enum OpCode {
    Constant(u8),
    Nil,
    True,
    False,
    Pop,

    GetLocal(u8),
    SetLocal(u8),
    GetGlobal(u8),
    SetGlobal(u8),
    DefineGlobal(u8),
    GetUpvalue(u8),
    SetUpvalue(u8),
    GetProperty(u8),
    SetProperty(u8),
    GetSuper(u8),

    Equal,
    Greater,
    Less,

    Add,
    Subtract,
    Multiply,
    Divide,

    Not,
    Negate,

    Print,

    /// Unconditional jump to an absolute instruction index.
    Jump(u16),
    /// Pop-less conditional jump: peeks the top of stack; if falsey, jumps
    /// to the absolute instruction index.
    JumpIfFalse(u16),
    /// Unconditional jump backward to an absolute instruction index (a loop
    /// header). Kept as a distinct opcode from `Jump` only to document
    /// intent; dispatch is identical.
    Loop(u16),

    Call(u8),
    Invoke(u8, u8),
    SuperInvoke(u8, u8),

    /// Function constant index, followed by one `(is_local, index)` pair
    /// per upvalue the nested function captures, in capture order.
    Closure(u8, Vec<(bool, u8)>),
    CloseUpvalue,
    Return,

    Class(u8),
    Inherit,
    Method(u8),
}

impl fmt::Debug for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpCode::Constant(i) => write!(f, "OP_CONSTANT {i}"),
            OpCode::Nil => write!(f, "OP_NIL"),
            OpCode::True => write!(f, "OP_TRUE"),
            OpCode::False => write!(f, "OP_FALSE"),
            OpCode::Pop => write!(f, "OP_POP"),
            OpCode::GetLocal(i) => write!(f, "OP_GET_LOCAL {i}"),
            OpCode::SetLocal(i) => write!(f, "OP_SET_LOCAL {i}"),
            OpCode::GetGlobal(i) => write!(f, "OP_GET_GLOBAL {i}"),
            OpCode::SetGlobal(i) => write!(f, "OP_SET_GLOBAL {i}"),
            OpCode::DefineGlobal(i) => write!(f, "OP_DEFINE_GLOBAL {i}"),
            OpCode::GetUpvalue(i) => write!(f, "OP_GET_UPVALUE {i}"),
            OpCode::SetUpvalue(i) => write!(f, "OP_SET_UPVALUE {i}"),
            OpCode::GetProperty(i) => write!(f, "OP_GET_PROPERTY {i}"),
            OpCode::SetProperty(i) => write!(f, "OP_SET_PROPERTY {i}"),
            OpCode::GetSuper(i) => write!(f, "OP_GET_SUPER {i}"),
            OpCode::Equal => write!(f, "OP_EQUAL"),
            OpCode::Greater => write!(f, "OP_GREATER"),
            OpCode::Less => write!(f, "OP_LESS"),
            OpCode::Add => write!(f, "OP_ADD"),
            OpCode::Subtract => write!(f, "OP_SUBTRACT"),
            OpCode::Multiply => write!(f, "OP_MULTIPLY"),
            OpCode::Divide => write!(f, "OP_DIVIDE"),
            OpCode::Not => write!(f, "OP_NOT"),
            OpCode::Negate => write!(f, "OP_NEGATE"),
            OpCode::Print => write!(f, "OP_PRINT"),
            OpCode::Jump(t) => write!(f, "OP_JUMP -> {t}"),
            OpCode::JumpIfFalse(t) => write!(f, "OP_JUMP_IF_FALSE -> {t}"),
            OpCode::Loop(t) => write!(f, "OP_LOOP -> {t}"),
            OpCode::Call(argc) => write!(f, "OP_CALL ({argc})"),
            OpCode::Invoke(i, argc) => write!(f, "OP_INVOKE {i} ({argc})"),
            OpCode::SuperInvoke(i, argc) => write!(f, "OP_SUPER_INVOKE {i} ({argc})"),
            OpCode::Closure(i, ups) => write!(f, "OP_CLOSURE {i} ({} upvalues)", ups.len()),
            OpCode::CloseUpvalue => write!(f, "OP_CLOSE_UPVALUE"),
            OpCode::Return => write!(f, "OP_RETURN"),
            OpCode::Class(i) => write!(f, "OP_CLASS {i}"),
            OpCode::Inherit => write!(f, "OP_INHERIT"),
            OpCode::Method(i) => write!(f, "OP_METHOD {i}"),
        }
    }
}
