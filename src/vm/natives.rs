//! Built-in native functions, exposed to scripts as ordinary globals backed
//! by a `fn(&mut VirtualMachine, argc) -> Result<_, RuntimeError>` shape.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::common::value::Value;
use crate::vm::error::RuntimeError;
use crate::vm::VirtualMachine;

/// Seconds since the Unix epoch, for benchmarking loops from script code.
/// `SystemTime` rather than `Instant` so the value is meaningful across
/// runs, at the cost of being vulnerable to wall-clock adjustment --
/// acceptable for a benchmarking native, not used for anything
/// correctness-sensitive.
pub fn clock_native(_vm: &mut VirtualMachine, _args: &[Value]) -> Result<Value, RuntimeError> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| RuntimeError::Internal(e.to_string()))?;
    Ok(Value::Number(elapsed.as_secs_f64()))
}

impl VirtualMachine {
    /// Registers every native the interpreter ships with. Called once
    /// from `VirtualMachine::new`.
    pub(crate) fn define_natives(&mut self) -> Result<(), RuntimeError> {
        self.define_native("clock", 0, clock_native)?;
        Ok(())
    }
}
