//! Comparison and logical-negation opcodes: `Equal`, `Greater`, `Less`,
//! `Not`.

use crate::common::value::Value;
use crate::vm::error::RuntimeError;
use crate::vm::VirtualMachine;

impl VirtualMachine {
    pub(crate) fn op_equal(&mut self) {
        let b = self.pop();
        let a = self.pop();
        self.push(Value::Bool(a == b));
    }

    pub(crate) fn op_greater(&mut self) -> Result<(), RuntimeError> {
        self.binary_compare(|a, b| a > b)
    }

    pub(crate) fn op_less(&mut self) -> Result<(), RuntimeError> {
        self.binary_compare(|a, b| a < b)
    }

    pub(crate) fn op_not(&mut self) {
        let v = self.pop();
        self.push(Value::Bool(v.is_falsey()));
    }

    fn binary_compare(&mut self, op: impl Fn(f64, f64) -> bool) -> Result<(), RuntimeError> {
        let (Value::Number(b), Value::Number(a)) = (self.peek(0), self.peek(1)) else {
            return Err(RuntimeError::OperandsMustBeNumbers);
        };
        self.pop();
        self.pop();
        self.push(Value::Bool(op(a, b)));
        Ok(())
    }
}
