//! Per-opcode handlers, split by concern across `arithmetic.rs`,
//! `compare.rs`, `control.rs`, `classes.rs`, `closures.rs`, and
//! `globals.rs`. `VirtualMachine::run` (in `vm::mod`) holds the single big
//! `match` and delegates each arm to one of these.

pub mod arithmetic;
pub mod classes;
pub mod closures;
pub mod compare;
pub mod control;
pub mod globals;
