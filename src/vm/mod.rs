//! The bytecode interpreter loop: a `VirtualMachine` owning the value
//! stack, call frames, globals, and heap, whose `run` loop dispatches one
//! instruction at a time and checks the GC threshold once per instruction.

pub mod dispatch;
pub mod error;
pub mod frame;
pub mod heap;
pub mod natives;

use std::mem::size_of;

use crate::common::object::{
    BoundMethodObj, ClassObj, ClosureObj, FunctionObj, GCObject, HeaderOnly, InstanceObj,
    NativeObj, ObjKind, StringObj, UpvalueLocation, UpvalueObj,
};
use crate::common::opcode::OpCode;
use crate::common::table::Table;
use crate::common::value::Value;
use crate::config::Config;
use crate::vm::error::{InterpretError, InterpretResult, RuntimeError, RuntimeException, TraceFrame};
use crate::vm::frame::CallFrame;
use crate::vm::heap::Heap;

pub struct VirtualMachine {
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<CallFrame>,
    pub(crate) globals: Table,
    pub(crate) heap: Heap,
    pub(crate) config: Config,
    /// Head of the VM-wide open-upvalue list, sorted by descending stack
    /// slot.
    pub(crate) open_upvalues: Option<*mut UpvalueObj>,
    /// `"init"`, interned once at startup so method-call dispatch never
    /// has to intern it on the hot path.
    pub(crate) init_string: *mut StringObj,
    /// When set, each instruction is printed before it executes.
    pub trace_execution: bool,
}

impl VirtualMachine {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let mut heap = Heap::new(&config);
        // Interning a short literal right after `Heap::new` cannot
        // realistically exhaust `bytes_allocated`; treated as an
        // infallible part of VM setup rather than plumbed through
        // `with_config`'s (non-`Result`) signature.
        let init_string = heap
            .intern_string("init")
            .unwrap_or_else(|_| panic!("failed to intern \"init\" during VM startup"));
        let mut vm = Self {
            stack: Vec::new(),
            frames: Vec::new(),
            globals: Table::new(),
            heap,
            config,
            open_upvalues: None,
            init_string,
            trace_execution: false,
        };
        vm.define_natives()
            .unwrap_or_else(|_| panic!("failed to register natives during VM startup"));
        vm
    }

    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let function = crate::compiler::compile(source, &mut self.heap)
            .map_err(InterpretError::Compile)?;
        let closure = self
            .heap
            .alloc_closure(function, Vec::new())
            .map_err(|e| InterpretError::Runtime(self.runtime_exception(e)))?;
        self.push(Value::Closure(closure));
        self.call_closure(closure, 0)
            .map_err(|e| InterpretError::Runtime(self.runtime_exception(e)))?;

        let result = self.run();
        if result.is_err() {
            // Leaves the heap and globals intact so a REPL session can
            // keep going after a runtime error; only the transient call
            // state is discarded, mirroring `resetStack`.
            self.stack.clear();
            self.frames.clear();
            self.open_upvalues = None;
        }
        result.map_err(InterpretError::Runtime)
    }

    pub fn define_native(
        &mut self,
        name: &str,
        arity: u8,
        function: crate::common::object::NativeFn,
    ) -> Result<(), RuntimeError> {
        let name_ptr = self.heap.intern_string(name)?;
        let native_ptr = self.heap.alloc_native(name_ptr, arity, function)?;
        self.globals.set(name_ptr, Value::Native(native_ptr));
        Ok(())
    }

    fn run(&mut self) -> Result<(), RuntimeException> {
        loop {
            if self.heap.should_collect(self.config.stress_gc) {
                self.collect_garbage();
            }

            let frame_idx = self.frames.len() - 1;
            let ip = self.frames[frame_idx].ip;
            let instruction = self.frames[frame_idx].chunk().code[ip].clone();

            if self.trace_execution {
                eprintln!("{:04} {:?}", ip, instruction);
            }

            match instruction {
                OpCode::Constant(idx) => {
                    self.frames[frame_idx].ip = ip + 1;
                    let value = self.frames[frame_idx].chunk().constants[idx as usize];
                    self.push(value);
                }
                OpCode::Nil => {
                    self.frames[frame_idx].ip = ip + 1;
                    self.push(Value::Nil);
                }
                OpCode::True => {
                    self.frames[frame_idx].ip = ip + 1;
                    self.push(Value::Bool(true));
                }
                OpCode::False => {
                    self.frames[frame_idx].ip = ip + 1;
                    self.push(Value::Bool(false));
                }
                OpCode::Pop => {
                    self.frames[frame_idx].ip = ip + 1;
                    self.pop();
                }
                OpCode::GetLocal(slot) => {
                    self.frames[frame_idx].ip = ip + 1;
                    let base = self.frames[frame_idx].slots_base;
                    let value = self.stack[base + slot as usize];
                    self.push(value);
                }
                OpCode::SetLocal(slot) => {
                    self.frames[frame_idx].ip = ip + 1;
                    let base = self.frames[frame_idx].slots_base;
                    let value = self.peek(0);
                    self.stack[base + slot as usize] = value;
                }
                OpCode::GetUpvalue(idx) => {
                    self.frames[frame_idx].ip = ip + 1;
                    let closure = self.frames[frame_idx].closure;
                    let upvalue = unsafe { (*closure).data.upvalues[idx as usize] };
                    let value = dispatch::closures::read_upvalue(upvalue, &self.stack);
                    self.push(value);
                }
                OpCode::SetUpvalue(idx) => {
                    self.frames[frame_idx].ip = ip + 1;
                    let closure = self.frames[frame_idx].closure;
                    let upvalue = unsafe { (*closure).data.upvalues[idx as usize] };
                    let value = self.peek(0);
                    dispatch::closures::write_upvalue(upvalue, &mut self.stack, value);
                }
                OpCode::GetGlobal(idx) => {
                    self.frames[frame_idx].ip = ip + 1;
                    let name = self.read_string_constant(frame_idx, idx);
                    self.op_get_global(name)
                        .map_err(|e| self.runtime_exception(e))?;
                }
                OpCode::SetGlobal(idx) => {
                    self.frames[frame_idx].ip = ip + 1;
                    let name = self.read_string_constant(frame_idx, idx);
                    self.op_set_global(name)
                        .map_err(|e| self.runtime_exception(e))?;
                }
                OpCode::DefineGlobal(idx) => {
                    self.frames[frame_idx].ip = ip + 1;
                    let name = self.read_string_constant(frame_idx, idx);
                    self.op_define_global(name);
                }
                OpCode::GetProperty(idx) => {
                    self.frames[frame_idx].ip = ip + 1;
                    let name = self.read_string_constant(frame_idx, idx);
                    self.op_get_property(name)
                        .map_err(|e| self.runtime_exception(e))?;
                }
                OpCode::SetProperty(idx) => {
                    self.frames[frame_idx].ip = ip + 1;
                    let name = self.read_string_constant(frame_idx, idx);
                    self.op_set_property(name)
                        .map_err(|e| self.runtime_exception(e))?;
                }
                OpCode::GetSuper(idx) => {
                    self.frames[frame_idx].ip = ip + 1;
                    let name = self.read_string_constant(frame_idx, idx);
                    self.op_get_super(name)
                        .map_err(|e| self.runtime_exception(e))?;
                }
                OpCode::Equal => {
                    self.frames[frame_idx].ip = ip + 1;
                    self.op_equal();
                }
                OpCode::Greater => {
                    self.frames[frame_idx].ip = ip + 1;
                    self.op_greater().map_err(|e| self.runtime_exception(e))?;
                }
                OpCode::Less => {
                    self.frames[frame_idx].ip = ip + 1;
                    self.op_less().map_err(|e| self.runtime_exception(e))?;
                }
                OpCode::Add => {
                    self.frames[frame_idx].ip = ip + 1;
                    self.op_add().map_err(|e| self.runtime_exception(e))?;
                }
                OpCode::Subtract => {
                    self.frames[frame_idx].ip = ip + 1;
                    self.op_subtract().map_err(|e| self.runtime_exception(e))?;
                }
                OpCode::Multiply => {
                    self.frames[frame_idx].ip = ip + 1;
                    self.op_multiply().map_err(|e| self.runtime_exception(e))?;
                }
                OpCode::Divide => {
                    self.frames[frame_idx].ip = ip + 1;
                    self.op_divide().map_err(|e| self.runtime_exception(e))?;
                }
                OpCode::Not => {
                    self.frames[frame_idx].ip = ip + 1;
                    self.op_not();
                }
                OpCode::Negate => {
                    self.frames[frame_idx].ip = ip + 1;
                    self.op_negate().map_err(|e| self.runtime_exception(e))?;
                }
                OpCode::Print => {
                    self.frames[frame_idx].ip = ip + 1;
                    let value = self.pop();
                    println!("{value}");
                }
                OpCode::Jump(target) => {
                    self.frames[frame_idx].ip = target as usize;
                }
                OpCode::JumpIfFalse(target) => {
                    if self.peek(0).is_falsey() {
                        self.frames[frame_idx].ip = target as usize;
                    } else {
                        self.frames[frame_idx].ip = ip + 1;
                    }
                }
                OpCode::Loop(target) => {
                    self.frames[frame_idx].ip = target as usize;
                }
                OpCode::Call(argc) => {
                    self.frames[frame_idx].ip = ip + 1;
                    let callee = self.peek(argc as usize);
                    self.call_value(callee, argc)
                        .map_err(|e| self.runtime_exception(e))?;
                }
                OpCode::Invoke(name_idx, argc) => {
                    self.frames[frame_idx].ip = ip + 1;
                    let name = self.read_string_constant(frame_idx, name_idx);
                    self.invoke(name, argc)
                        .map_err(|e| self.runtime_exception(e))?;
                }
                OpCode::SuperInvoke(name_idx, argc) => {
                    self.frames[frame_idx].ip = ip + 1;
                    let name = self.read_string_constant(frame_idx, name_idx);
                    let superclass = match self.pop() {
                        Value::Class(c) => c,
                        _ => unreachable!("compiler only emits OP_SUPER_INVOKE with a class on top"),
                    };
                    self.invoke_from_class(superclass, name, argc)
                        .map_err(|e| self.runtime_exception(e))?;
                }
                OpCode::Closure(const_idx, upvalue_spec) => {
                    self.frames[frame_idx].ip = ip + 1;
                    let function_value = self.frames[frame_idx].chunk().constants[const_idx as usize];
                    let function = match function_value {
                        Value::Function(f) => f,
                        _ => unreachable!("OP_CLOSURE constant must be a function"),
                    };
                    self.op_closure(function, &upvalue_spec, frame_idx)
                        .map_err(|e| self.runtime_exception(e))?;
                }
                OpCode::CloseUpvalue => {
                    self.frames[frame_idx].ip = ip + 1;
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }
                OpCode::Return => {
                    let result = self.pop();
                    let base = self.frames[frame_idx].slots_base;
                    self.close_upvalues(base);
                    self.frames.pop();
                    if self.frames.is_empty() {
                        self.pop();
                        return Ok(());
                    }
                    self.stack.truncate(base);
                    self.push(result);
                }
                OpCode::Class(const_idx) => {
                    self.frames[frame_idx].ip = ip + 1;
                    let name = self.read_string_constant(frame_idx, const_idx);
                    self.op_class(name).map_err(|e| self.runtime_exception(e))?;
                }
                OpCode::Inherit => {
                    self.frames[frame_idx].ip = ip + 1;
                    self.op_inherit().map_err(|e| self.runtime_exception(e))?;
                }
                OpCode::Method(const_idx) => {
                    self.frames[frame_idx].ip = ip + 1;
                    let name = self.read_string_constant(frame_idx, const_idx);
                    self.op_method(name);
                }
            }
        }
    }

    /// Current depth of the value stack, for `--mode trace`'s state dump.
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Number of live call frames, for `--mode trace`'s state dump.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Bytes currently tracked as live on the heap, for `--mode trace`'s
    /// state dump.
    pub fn heap_bytes_allocated(&self) -> usize {
        self.heap.bytes_allocated
    }

    fn read_string_constant(&self, frame_idx: usize, idx: u8) -> *mut StringObj {
        match self.frames[frame_idx].chunk().constants[idx as usize] {
            Value::String(s) => s,
            _ => unreachable!("compiler only ever loads a string constant for a name operand"),
        }
    }

    pub(crate) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub(crate) fn pop(&mut self) -> Value {
        self.stack
            .pop()
            .unwrap_or_else(|| unreachable!("compiled bytecode never underflows the value stack"))
    }

    pub(crate) fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn runtime_exception(&self, error: RuntimeError) -> RuntimeException {
        let trace = self
            .frames
            .iter()
            .rev()
            .map(|f| TraceFrame {
                name: f.name(),
                line: f.current_line(),
            })
            .collect();
        RuntimeException { error, trace }
    }

    // -- Garbage collection ---------------------------------------------
    //
    // Tricolor mark-sweep over the heap's intrusive object list. Lives on
    // `VirtualMachine` rather than `Heap` since the roots (the value
    // stack, call frames, open upvalues) live on the VM, not the heap.

    fn collect_garbage(&mut self) {
        let mut gray: Vec<*mut GCObject<HeaderOnly>> = Vec::new();
        self.mark_roots(&mut gray);
        self.trace_references(&mut gray);
        self.heap.strings.remove_white();
        self.sweep();
        let grow_factor = self.config.gc_heap_grow_factor;
        self.heap.expand_threshold(grow_factor);
    }

    fn mark_roots(&self, gray: &mut Vec<*mut GCObject<HeaderOnly>>) {
        for value in &self.stack {
            Self::mark_value(gray, *value);
        }
        for frame in &self.frames {
            Self::mark_object(gray, frame.closure as *mut GCObject<HeaderOnly>);
        }
        let mut cursor = self.open_upvalues;
        while let Some(node) = cursor {
            Self::mark_object(gray, node as *mut GCObject<HeaderOnly>);
            cursor = unsafe { (*node).data.next_open };
        }
        for (key, value) in self.globals.iter() {
            Self::mark_object(gray, key as *mut GCObject<HeaderOnly>);
            Self::mark_value(gray, value);
        }
        Self::mark_object(gray, self.init_string as *mut GCObject<HeaderOnly>);
    }

    fn mark_value(gray: &mut Vec<*mut GCObject<HeaderOnly>>, value: Value) {
        match value {
            Value::String(p) => Self::mark_object(gray, p as *mut GCObject<HeaderOnly>),
            Value::Function(p) => Self::mark_object(gray, p as *mut GCObject<HeaderOnly>),
            Value::Native(p) => Self::mark_object(gray, p as *mut GCObject<HeaderOnly>),
            Value::Closure(p) => Self::mark_object(gray, p as *mut GCObject<HeaderOnly>),
            Value::Class(p) => Self::mark_object(gray, p as *mut GCObject<HeaderOnly>),
            Value::Instance(p) => Self::mark_object(gray, p as *mut GCObject<HeaderOnly>),
            Value::BoundMethod(p) => Self::mark_object(gray, p as *mut GCObject<HeaderOnly>),
            Value::Nil | Value::Bool(_) | Value::Number(_) => {}
        }
    }

    fn mark_object(gray: &mut Vec<*mut GCObject<HeaderOnly>>, ptr: *mut GCObject<HeaderOnly>) {
        if ptr.is_null() {
            return;
        }
        unsafe {
            if (*ptr).mark {
                return;
            }
            (*ptr).mark = true;
        }
        gray.push(ptr);
    }

    fn trace_references(&self, gray: &mut Vec<*mut GCObject<HeaderOnly>>) {
        while let Some(ptr) = gray.pop() {
            self.blacken_object(ptr, gray);
        }
    }

    fn blacken_object(&self, ptr: *mut GCObject<HeaderOnly>, gray: &mut Vec<*mut GCObject<HeaderOnly>>) {
        let kind = unsafe { (*ptr).kind };
        unsafe {
            match kind {
                ObjKind::String => {}
                ObjKind::Function => {
                    let f = ptr as *mut FunctionObj;
                    if let Some(name) = (*f).data.name {
                        Self::mark_object(gray, name as *mut GCObject<HeaderOnly>);
                    }
                    for constant in &(*f).data.chunk.constants {
                        Self::mark_value(gray, *constant);
                    }
                }
                ObjKind::Native => {
                    let n = ptr as *mut NativeObj;
                    Self::mark_object(gray, (*n).data.name as *mut GCObject<HeaderOnly>);
                }
                ObjKind::Closure => {
                    let c = ptr as *mut ClosureObj;
                    Self::mark_object(gray, (*c).data.function as *mut GCObject<HeaderOnly>);
                    for &upvalue in &(*c).data.upvalues {
                        Self::mark_object(gray, upvalue as *mut GCObject<HeaderOnly>);
                    }
                }
                ObjKind::Upvalue => {
                    let u = ptr as *mut UpvalueObj;
                    if let UpvalueLocation::Closed(value) = &(*u).data.location {
                        Self::mark_value(gray, *value);
                    }
                }
                ObjKind::Class => {
                    let c = ptr as *mut ClassObj;
                    Self::mark_object(gray, (*c).data.name as *mut GCObject<HeaderOnly>);
                    for (key, value) in (*c).data.methods.iter() {
                        Self::mark_object(gray, key as *mut GCObject<HeaderOnly>);
                        Self::mark_value(gray, value);
                    }
                }
                ObjKind::Instance => {
                    let i = ptr as *mut InstanceObj;
                    Self::mark_object(gray, (*i).data.class as *mut GCObject<HeaderOnly>);
                    for (key, value) in (*i).data.fields.iter() {
                        Self::mark_object(gray, key as *mut GCObject<HeaderOnly>);
                        Self::mark_value(gray, value);
                    }
                }
                ObjKind::BoundMethod => {
                    let b = ptr as *mut BoundMethodObj;
                    Self::mark_value(gray, (*b).data.receiver);
                    Self::mark_object(gray, (*b).data.method as *mut GCObject<HeaderOnly>);
                }
            }
        }
    }

    fn sweep(&mut self) {
        let mut survivors: *mut GCObject<HeaderOnly> = std::ptr::null_mut();
        let mut cursor = self.heap.objects_head();
        while !cursor.is_null() {
            let next = unsafe { (*cursor).next };
            let marked = unsafe { (*cursor).mark };
            if marked {
                unsafe {
                    (*cursor).mark = false;
                    (*cursor).next = survivors;
                }
                survivors = cursor;
            } else {
                self.free_object(cursor);
            }
            cursor = next;
        }
        self.heap.set_objects_head(survivors);
    }

    fn free_object(&mut self, ptr: *mut GCObject<HeaderOnly>) {
        let kind = unsafe { (*ptr).kind };
        let size = match kind {
            ObjKind::String => size_of::<StringObj>(),
            ObjKind::Function => size_of::<FunctionObj>(),
            ObjKind::Native => size_of::<NativeObj>(),
            ObjKind::Closure => size_of::<ClosureObj>(),
            ObjKind::Upvalue => size_of::<UpvalueObj>(),
            ObjKind::Class => size_of::<ClassObj>(),
            ObjKind::Instance => size_of::<InstanceObj>(),
            ObjKind::BoundMethod => size_of::<BoundMethodObj>(),
        };
        // SAFETY: `ptr` was produced by `Box::into_raw` in `Heap::alloc`
        // with the payload type `kind` names, and this is the only place
        // that ever reconstitutes and drops that box.
        unsafe {
            match kind {
                ObjKind::String => drop(Box::from_raw(ptr as *mut StringObj)),
                ObjKind::Function => drop(Box::from_raw(ptr as *mut FunctionObj)),
                ObjKind::Native => drop(Box::from_raw(ptr as *mut NativeObj)),
                ObjKind::Closure => drop(Box::from_raw(ptr as *mut ClosureObj)),
                ObjKind::Upvalue => drop(Box::from_raw(ptr as *mut UpvalueObj)),
                ObjKind::Class => drop(Box::from_raw(ptr as *mut ClassObj)),
                ObjKind::Instance => drop(Box::from_raw(ptr as *mut InstanceObj)),
                ObjKind::BoundMethod => drop(Box::from_raw(ptr as *mut BoundMethodObj)),
            }
        }
        self.heap.track_freed(size);
    }
}

impl Default for VirtualMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for VirtualMachine {
    fn drop(&mut self) {
        let mut cursor = self.heap.objects_head();
        while !cursor.is_null() {
            let next = unsafe { (*cursor).next };
            self.free_object(cursor);
            cursor = next;
        }
        self.heap.set_objects_head(std::ptr::null_mut());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_run_leaves_no_call_frames_or_stack_residue() {
        let mut vm = VirtualMachine::new();
        vm.interpret("var a = 1; print a + 1;").unwrap();
        assert_eq!(vm.frame_count(), 0);
        assert_eq!(vm.stack_depth(), 0);
    }

    #[test]
    fn runtime_error_resets_call_state_for_repl_continuation() {
        let mut vm = VirtualMachine::new();
        let err = vm.interpret("1 + \"x\";").unwrap_err();
        assert!(matches!(err, InterpretError::Runtime(_)));
        assert_eq!(vm.frame_count(), 0);
        assert_eq!(vm.stack_depth(), 0);
        // A REPL-style VM must still be usable after a runtime error.
        vm.interpret("print 1;").unwrap();
    }

    #[test]
    fn runtime_error_trace_lists_frames_youngest_first() {
        let mut vm = VirtualMachine::new();
        let err = vm.interpret("fun f() { return 1 + \"x\"; } f();").unwrap_err();
        let InterpretError::Runtime(exception) = err else {
            panic!("expected a runtime error");
        };
        assert_eq!(exception.trace.len(), 2);
        assert_eq!(exception.trace[0].name, "f");
        assert_eq!(exception.trace[1].name, "script");
    }

    #[test]
    fn calling_class_init_with_wrong_arity_is_a_runtime_error() {
        let mut vm = VirtualMachine::new();
        let source = "class Point { init(x, y) { this.x = x; this.y = y; } } Point(1);";
        let err = vm.interpret(source).unwrap_err();
        let InterpretError::Runtime(exception) = err else {
            panic!("expected a runtime error");
        };
        assert!(matches!(
            exception.error,
            RuntimeError::ArityMismatch { expected: 2, got: 1 }
        ));
    }

    #[test]
    fn globals_accumulate_across_separate_interpret_calls() {
        let mut vm = VirtualMachine::new();
        vm.interpret("var a = 1;").unwrap();
        vm.interpret("var b = a + 1;").unwrap();
        vm.interpret("print b;").unwrap();
    }
}
