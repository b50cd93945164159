//! Diagnostics: compile-time and runtime error types, plus the shared
//! rendering path both the CLI and the test harness use.
//!
//! Two sibling hierarchies -- `CompileError` for the scanner/compiler and
//! `RuntimeError` for the VM -- implemented with `thiserror` rather than a
//! hand-written `Display`. Both render through one `Diagnostic` trait so
//! every caller shares a single formatting path instead of duplicating
//! `eprintln!` call sites.

use std::fmt;

use thiserror::Error;

/// Errors the compiler can raise while scanning/parsing a single token.
/// Rendered as `[line N] Error at '<lexeme>': <msg>` (or `at end`).
#[derive(Debug, Clone)]
pub struct CompileError {
    pub line: u32,
    /// `None` means the error was reported at EOF ("at end").
    pub lexeme: Option<String>,
    pub message: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.lexeme {
            Some(lexeme) if lexeme.is_empty() => {
                write!(f, "[line {}] Error: {}", self.line, self.message)
            }
            Some(lexeme) => write!(
                f,
                "[line {}] Error at '{}': {}",
                self.line, lexeme, self.message
            ),
            None => write!(f, "[line {}] Error at end: {}", self.line, self.message),
        }
    }
}

impl std::error::Error for CompileError {}

/// Runtime fault conditions. The message text is the conventional wording
/// this language family uses (e.g. "Operands must be two numbers or
/// strings.", "Can only call functions and classes.").
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("Operand must be a number.")]
    OperandMustBeNumber,
    #[error("Operands must be numbers.")]
    OperandsMustBeNumbers,
    #[error("Operands must be two numbers or strings.")]
    OperandsMustBeNumbersOrStrings,
    #[error("Undefined variable '{0}'.")]
    UndefinedVariable(String),
    #[error("Can only call functions and classes.")]
    NotCallable,
    #[error("Expected {expected} arguments but got {got}.")]
    ArityMismatch { expected: u8, got: u8 },
    #[error("Stack overflow.")]
    StackOverflow,
    #[error("Only instances have properties.")]
    OnlyInstancesHaveProperties,
    #[error("Only instances have methods.")]
    OnlyInstancesHaveMethods,
    #[error("Only instances have fields.")]
    OnlyInstancesHaveFields,
    #[error("Undefined property '{0}'.")]
    UndefinedProperty(String),
    #[error("Superclass must be a class.")]
    SuperclassMustBeClass,
    #[error("Can't return a value from an initializer.")]
    InitializerReturnedValue,
    #[error("Heap exhausted.")]
    OutOfMemory,
    #[error("{0}")]
    Internal(String),
}

/// A `RuntimeError` plus the call-frame traceback captured at the moment
/// it was raised -- the VM's stack has already been partially unwound by
/// the time the caller gets to print it, so the trace is snapshotted
/// eagerly rather than re-derived from a (by-then-gone) stack.
#[derive(Debug, Clone)]
pub struct RuntimeException {
    pub error: RuntimeError,
    /// One entry per live frame, youngest (innermost call) first.
    pub trace: Vec<TraceFrame>,
}

#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub name: String,
    pub line: u32,
}

impl fmt::Display for RuntimeException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.error)?;
        for (i, frame) in self.trace.iter().enumerate() {
            let is_last = i + 1 == self.trace.len();
            if is_last {
                write!(f, "[line {}] in {}", frame.line, frame.name)?;
            } else {
                writeln!(f, "[line {}] in {}", frame.line, frame.name)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeException {}

/// Outcome of `VirtualMachine::interpret`: either a list of compile-time
/// diagnostics or a single runtime exception with its call trace.
#[derive(Debug)]
pub enum InterpretError {
    Compile(Vec<CompileError>),
    Runtime(RuntimeException),
}

impl fmt::Display for InterpretError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpretError::Compile(errors) => {
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{err}")?;
                }
                Ok(())
            }
            InterpretError::Runtime(ex) => write!(f, "{ex}"),
        }
    }
}

impl std::error::Error for InterpretError {}

pub type InterpretResult = Result<(), InterpretError>;

/// Shared rendering entry point so the CLI driver and the test harness
/// write errors to `stderr` identically.
pub trait Diagnostic {
    fn report(&self, out: &mut dyn std::io::Write);
}

impl Diagnostic for InterpretError {
    fn report(&self, out: &mut dyn std::io::Write) {
        let _ = writeln!(out, "{self}");
    }
}
