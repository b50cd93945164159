//! Class, instance, and method opcodes: `Class`, `Inherit`, `Method`,
//! `GetProperty`, `SetProperty`, `GetSuper`, `Invoke`, `SuperInvoke`.
//! Method lookup and binding are fused with plain field access here, so a
//! property read falls back to the class's method table before failing.

use crate::common::object::{BoundMethodObj, ClassObj, StringObj};
use crate::common::value::Value;
use crate::vm::error::RuntimeError;
use crate::vm::VirtualMachine;

impl VirtualMachine {
    pub(crate) fn op_class(&mut self, name: *mut StringObj) -> Result<(), RuntimeError> {
        let class = self.heap.alloc_class(name)?;
        self.push(Value::Class(class));
        Ok(())
    }

    pub(crate) fn op_inherit(&mut self) -> Result<(), RuntimeError> {
        let superclass = match self.peek(1) {
            Value::Class(c) => c,
            _ => return Err(RuntimeError::SuperclassMustBeClass),
        };
        let subclass = match self.peek(0) {
            Value::Class(c) => c,
            _ => unreachable!("compiler only emits OP_INHERIT after OP_CLASS"),
        };
        unsafe {
            (*subclass).data.methods.add_all(&(*superclass).data.methods);
        }
        self.pop();
        Ok(())
    }

    pub(crate) fn op_method(&mut self, name: *mut StringObj) {
        let method = self.peek(0);
        let class = match self.peek(1) {
            Value::Class(c) => c,
            _ => unreachable!("compiler only emits OP_METHOD inside a class body"),
        };
        unsafe {
            (*class).data.methods.set(name, method);
        }
        self.pop();
    }

    pub(crate) fn op_get_property(&mut self, name: *mut StringObj) -> Result<(), RuntimeError> {
        let instance = match self.peek(0) {
            Value::Instance(i) => i,
            _ => return Err(RuntimeError::OnlyInstancesHaveProperties),
        };
        let field = unsafe { (*instance).data.fields.get(name) };
        if let Some(value) = field {
            self.pop();
            self.push(value);
            return Ok(());
        }
        let class = unsafe { (*instance).data.class };
        self.bind_method(class, name)
    }

    pub(crate) fn op_set_property(&mut self, name: *mut StringObj) -> Result<(), RuntimeError> {
        let instance = match self.peek(1) {
            Value::Instance(i) => i,
            _ => return Err(RuntimeError::OnlyInstancesHaveFields),
        };
        let value = self.pop();
        unsafe {
            (*instance).data.fields.set(name, value);
        }
        self.pop();
        self.push(value);
        Ok(())
    }

    pub(crate) fn op_get_super(&mut self, name: *mut StringObj) -> Result<(), RuntimeError> {
        let superclass = match self.pop() {
            Value::Class(c) => c,
            _ => unreachable!("compiler only emits OP_GET_SUPER with a class on top"),
        };
        self.bind_method(superclass, name)
    }

    pub(crate) fn bind_method(
        &mut self,
        class: *mut ClassObj,
        name: *mut StringObj,
    ) -> Result<(), RuntimeError> {
        let method = unsafe { (*class).data.methods.get(name) };
        let closure = match method {
            Some(Value::Closure(c)) => c,
            Some(_) => unreachable!("methods table only ever holds closures"),
            None => {
                return Err(RuntimeError::UndefinedProperty(unsafe {
                    (*name).data.chars.clone()
                }))
            }
        };
        let receiver = self.pop();
        let bound: *mut BoundMethodObj = self.heap.alloc_bound_method(receiver, closure)?;
        self.push(Value::BoundMethod(bound));
        Ok(())
    }

    pub(crate) fn invoke(&mut self, name: *mut StringObj, arg_count: u8) -> Result<(), RuntimeError> {
        let receiver = self.peek(arg_count as usize);
        let instance = match receiver {
            Value::Instance(i) => i,
            _ => return Err(RuntimeError::OnlyInstancesHaveMethods),
        };
        if let Some(field) = unsafe { (*instance).data.fields.get(name) } {
            let slot = self.stack.len() - arg_count as usize - 1;
            self.stack[slot] = field;
            return self.call_value(field, arg_count);
        }
        let class = unsafe { (*instance).data.class };
        self.invoke_from_class(class, name, arg_count)
    }

    pub(crate) fn invoke_from_class(
        &mut self,
        class: *mut ClassObj,
        name: *mut StringObj,
        arg_count: u8,
    ) -> Result<(), RuntimeError> {
        let method = unsafe { (*class).data.methods.get(name) };
        match method {
            Some(Value::Closure(closure)) => self.call_closure(closure, arg_count),
            Some(_) => unreachable!("methods table only ever holds closures"),
            None => Err(RuntimeError::UndefinedProperty(unsafe {
                (*name).data.chars.clone()
            })),
        }
    }
}
