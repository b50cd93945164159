//! Upvalue capture and closing.
//!
//! Open upvalues are threaded through a singly linked list rooted at
//! `VirtualMachine::open_upvalues`, kept sorted by descending stack slot so
//! that capturing a slot can stop at the first node whose slot is `<=` the
//! target instead of scanning the whole list.

use crate::common::object::{FunctionObj, UpvalueLocation, UpvalueObj};
use crate::vm::error::RuntimeError;
use crate::vm::VirtualMachine;

impl VirtualMachine {
    pub(crate) fn op_closure(
        &mut self,
        function: *mut FunctionObj,
        upvalue_spec: &[(bool, u8)],
        frame_idx: usize,
    ) -> Result<(), RuntimeError> {
        let mut upvalues = Vec::with_capacity(upvalue_spec.len());
        for &(is_local, index) in upvalue_spec {
            if is_local {
                let slot = self.frames[frame_idx].slots_base + index as usize;
                upvalues.push(self.capture_upvalue(slot)?);
            } else {
                let enclosing = self.frames[frame_idx].closure;
                upvalues.push(unsafe { (*enclosing).data.upvalues[index as usize] });
            }
        }
        let closure = self.heap.alloc_closure(function, upvalues)?;
        self.push(crate::common::value::Value::Closure(closure));
        Ok(())
    }

    fn capture_upvalue(&mut self, slot: usize) -> Result<*mut UpvalueObj, RuntimeError> {
        let mut cursor = self.open_upvalues;
        let mut prev: Option<*mut UpvalueObj> = None;
        while let Some(node) = cursor {
            let node_slot = match unsafe { &(*node).data.location } {
                UpvalueLocation::Open(s) => *s,
                UpvalueLocation::Closed(_) => unreachable!("open list holds only open upvalues"),
            };
            if node_slot == slot {
                return Ok(node);
            }
            if node_slot < slot {
                break;
            }
            prev = cursor;
            cursor = unsafe { (*node).data.next_open };
        }

        let created = self.heap.alloc_upvalue(UpvalueLocation::Open(slot))?;
        unsafe {
            (*created).data.next_open = cursor;
        }
        match prev {
            Some(prev_node) => unsafe { (*prev_node).data.next_open = Some(created) },
            None => self.open_upvalues = Some(created),
        }
        Ok(created)
    }

    /// Closes every open upvalue at or above `from_slot`, copying the
    /// stack value into the upvalue itself so it outlives the frame.
    /// Called both by `OP_CLOSE_UPVALUE` and by `OP_RETURN`/block exit.
    pub(crate) fn close_upvalues(&mut self, from_slot: usize) {
        while let Some(node) = self.open_upvalues {
            let slot = match unsafe { &(*node).data.location } {
                UpvalueLocation::Open(s) => *s,
                UpvalueLocation::Closed(_) => break,
            };
            if slot < from_slot {
                break;
            }
            let value = self.stack[slot];
            unsafe {
                (*node).data.location = UpvalueLocation::Closed(value);
                self.open_upvalues = (*node).data.next_open;
                (*node).data.next_open = None;
            }
        }
    }
}

pub(crate) fn read_upvalue(upvalue: *mut UpvalueObj, stack: &[crate::common::value::Value]) -> crate::common::value::Value {
    match unsafe { &(*upvalue).data.location } {
        UpvalueLocation::Open(slot) => stack[*slot],
        UpvalueLocation::Closed(value) => *value,
    }
}

pub(crate) fn write_upvalue(
    upvalue: *mut UpvalueObj,
    stack: &mut [crate::common::value::Value],
    value: crate::common::value::Value,
) {
    match unsafe { &mut (*upvalue).data.location } {
        UpvalueLocation::Open(slot) => stack[*slot] = value,
        UpvalueLocation::Closed(closed) => *closed = value,
    }
}
