//! Numeric and string-concatenation opcodes: `Add`..`Divide`, `Negate`.

use crate::common::value::Value;
use crate::vm::error::RuntimeError;
use crate::vm::VirtualMachine;

impl VirtualMachine {
    pub(crate) fn op_add(&mut self) -> Result<(), RuntimeError> {
        match (self.peek(0), self.peek(1)) {
            (Value::Number(_), Value::Number(_)) => {
                let b = self.pop_number()?;
                let a = self.pop_number()?;
                self.push(Value::Number(a + b));
                Ok(())
            }
            (Value::String(_), Value::String(_)) => {
                let b = self.pop();
                let a = self.pop();
                let (Value::String(b_ptr), Value::String(a_ptr)) = (b, a) else {
                    unreachable!("peeked both operands as strings")
                };
                let mut concatenated = String::new();
                unsafe {
                    concatenated.push_str(&(*a_ptr).data.chars);
                    concatenated.push_str(&(*b_ptr).data.chars);
                }
                let interned = self.heap.intern_string(&concatenated)?;
                self.push(Value::String(interned));
                Ok(())
            }
            _ => Err(RuntimeError::OperandsMustBeNumbersOrStrings),
        }
    }

    pub(crate) fn op_subtract(&mut self) -> Result<(), RuntimeError> {
        self.binary_numeric(|a, b| a - b)
    }

    pub(crate) fn op_multiply(&mut self) -> Result<(), RuntimeError> {
        self.binary_numeric(|a, b| a * b)
    }

    pub(crate) fn op_divide(&mut self) -> Result<(), RuntimeError> {
        self.binary_numeric(|a, b| a / b)
    }

    pub(crate) fn op_negate(&mut self) -> Result<(), RuntimeError> {
        match self.peek(0) {
            Value::Number(n) => {
                self.pop();
                self.push(Value::Number(-n));
                Ok(())
            }
            _ => Err(RuntimeError::OperandMustBeNumber),
        }
    }

    fn binary_numeric(&mut self, op: impl Fn(f64, f64) -> f64) -> Result<(), RuntimeError> {
        if !matches!(self.peek(0), Value::Number(_)) || !matches!(self.peek(1), Value::Number(_)) {
            return Err(RuntimeError::OperandsMustBeNumbers);
        }
        let b = self.pop_number()?;
        let a = self.pop_number()?;
        self.push(Value::Number(op(a, b)));
        Ok(())
    }

    fn pop_number(&mut self) -> Result<f64, RuntimeError> {
        match self.pop() {
            Value::Number(n) => Ok(n),
            _ => Err(RuntimeError::OperandMustBeNumber),
        }
    }
}
