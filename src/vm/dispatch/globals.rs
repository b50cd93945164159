//! Global-variable opcodes: `DefineGlobal`, `GetGlobal`, `SetGlobal`. The
//! VM's `globals` table is the same `Table` type used for interning and
//! for class/instance members, keyed here by the interned name constant
//! the compiler emitted.

use crate::common::object::StringObj;
use crate::vm::error::RuntimeError;
use crate::vm::VirtualMachine;

impl VirtualMachine {
    pub(crate) fn op_define_global(&mut self, name: *mut StringObj) {
        let value = self.peek(0);
        self.globals.set(name, value);
        self.pop();
    }

    pub(crate) fn op_get_global(&mut self, name: *mut StringObj) -> Result<(), RuntimeError> {
        match self.globals.get(name) {
            Some(value) => {
                self.push(value);
                Ok(())
            }
            None => Err(RuntimeError::UndefinedVariable(unsafe {
                (*name).data.chars.clone()
            })),
        }
    }

    pub(crate) fn op_set_global(&mut self, name: *mut StringObj) -> Result<(), RuntimeError> {
        let value = self.peek(0);
        // `set` reports whether this created a brand-new key; an
        // assignment to an undeclared global must not silently declare
        // one.
        if self.globals.set(name, value) {
            self.globals.delete(name);
            return Err(RuntimeError::UndefinedVariable(unsafe {
                (*name).data.chars.clone()
            }));
        }
        Ok(())
    }
}
