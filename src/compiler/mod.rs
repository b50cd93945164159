//! Front end: scanner, token kinds, Pratt precedence table, and the
//! single-pass compiler that drives them.

pub mod compiler;
pub mod precedence;
pub mod scanner;
pub mod token;

pub use compiler::compile;
