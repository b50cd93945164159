//! A tree-walking-free, single-pass-compiled bytecode interpreter for a
//! small dynamically typed scripting language in the Lox family.
//!
//! The crate is organized around shared data types under [`common`], the
//! single-pass scanner/compiler under [`compiler`], the VM proper (heap,
//! GC, dispatch loop) under [`vm`], and per-instance tunables under
//! [`config`].

pub mod common;
pub mod compiler;
pub mod config;
pub mod vm;

pub use config::Config;
pub use vm::error::{InterpretError, InterpretResult};
pub use vm::VirtualMachine;
