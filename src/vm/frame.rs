//! A single call's activation record: the closure it's executing, an
//! instruction pointer into that closure's chunk, and the value-stack slot
//! its locals start at.

use crate::common::object::ClosureObj;

pub struct CallFrame {
    pub closure: *mut ClosureObj,
    /// Index of the next instruction to execute in the closure's chunk.
    pub ip: usize,
    /// Index into the VM's value stack where this frame's local slot 0
    /// lives (slot 0 is the receiver for methods, the closure itself for
    /// plain calls).
    pub slots_base: usize,
}

impl CallFrame {
    pub fn new(closure: *mut ClosureObj, slots_base: usize) -> Self {
        Self {
            closure,
            ip: 0,
            slots_base,
        }
    }

    pub fn function(&self) -> *mut crate::common::object::FunctionObj {
        unsafe { (*self.closure).data.function }
    }

    pub fn chunk(&self) -> &crate::common::chunk::Chunk {
        unsafe { &(*self.function()).data.chunk }
    }

    pub fn current_line(&self) -> u32 {
        self.chunk().line_at(self.ip)
    }

    pub fn name(&self) -> String {
        let function = self.function();
        unsafe {
            match (*function).data.name {
                Some(name) => (*name).data.chars.clone(),
                None => "script".to_string(),
            }
        }
    }
}
