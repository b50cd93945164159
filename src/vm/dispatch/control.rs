//! Call and return mechanics: callee and arguments already sit on the
//! value stack by the time `Call`/`Invoke`/`SuperInvoke` dispatch here.

use crate::common::object::{ClosureObj, FunctionObj};
use crate::common::value::Value;
use crate::vm::error::RuntimeError;
use crate::vm::frame::CallFrame;
use crate::vm::VirtualMachine;

impl VirtualMachine {
    pub(crate) fn call_value(&mut self, callee: Value, arg_count: u8) -> Result<(), RuntimeError> {
        match callee {
            Value::Closure(closure) => self.call_closure(closure, arg_count),
            Value::Native(native) => self.call_native(native, arg_count),
            Value::Class(class) => self.call_class(class, arg_count),
            Value::BoundMethod(bound) => self.call_bound_method(bound, arg_count),
            _ => Err(RuntimeError::NotCallable),
        }
    }

    pub(crate) fn call_closure(
        &mut self,
        closure: *mut ClosureObj,
        arg_count: u8,
    ) -> Result<(), RuntimeError> {
        let function: *mut FunctionObj = unsafe { (*closure).data.function };
        let arity = unsafe { (*function).data.arity };
        if arg_count != arity {
            return Err(RuntimeError::ArityMismatch {
                expected: arity,
                got: arg_count,
            });
        }
        if self.frames.len() >= self.config.frames_max {
            return Err(RuntimeError::StackOverflow);
        }
        if self.stack.len() >= self.config.stack_max {
            return Err(RuntimeError::StackOverflow);
        }
        let slots_base = self.stack.len() - arg_count as usize - 1;
        self.frames.push(CallFrame::new(closure, slots_base));
        Ok(())
    }

    fn call_native(&mut self, native: *mut crate::common::object::NativeObj, arg_count: u8) -> Result<(), RuntimeError> {
        let (function, arity) = unsafe { ((*native).data.function, (*native).data.arity) };
        if arg_count != arity {
            return Err(RuntimeError::ArityMismatch {
                expected: arity,
                got: arg_count,
            });
        }
        let arg_start = self.stack.len() - arg_count as usize;
        let args: Vec<Value> = self.stack[arg_start..].to_vec();
        let result = function(self, &args)?;
        self.stack.truncate(arg_start - 1);
        self.push(result);
        Ok(())
    }

    fn call_class(
        &mut self,
        class: *mut crate::common::object::ClassObj,
        arg_count: u8,
    ) -> Result<(), RuntimeError> {
        let instance = self.heap.alloc_instance(class)?;
        let receiver_slot = self.stack.len() - arg_count as usize - 1;
        self.stack[receiver_slot] = Value::Instance(instance);

        let init = self.init_string;
        let initializer = unsafe { (*class).data.methods.get(init) };
        match initializer {
            Some(Value::Closure(initializer)) => self.call_closure(initializer, arg_count),
            Some(_) => unreachable!("methods table only ever holds closures"),
            None => {
                if arg_count != 0 {
                    return Err(RuntimeError::ArityMismatch {
                        expected: 0,
                        got: arg_count,
                    });
                }
                Ok(())
            }
        }
    }

    fn call_bound_method(
        &mut self,
        bound: *mut crate::common::object::BoundMethodObj,
        arg_count: u8,
    ) -> Result<(), RuntimeError> {
        let (receiver, method) = unsafe { ((*bound).data.receiver, (*bound).data.method) };
        let receiver_slot = self.stack.len() - arg_count as usize - 1;
        self.stack[receiver_slot] = receiver;
        self.call_closure(method, arg_count)
    }
}
