//! The object heap: allocation, string interning, and the bookkeeping the
//! garbage collector needs between collections.
//!
//! A single intrusive linked list threads every live object (`objects`), a
//! content-addressed intern table dedups strings, and `bytes_allocated` /
//! `next_gc` are consulted once per dispatched instruction to decide
//! whether to collect. Collection thresholds come from `Config` rather
//! than hardcoded constants.

use std::mem::size_of;

use crate::common::object::{
    hash_string, BoundMethodObj, ClassObj, ClosureObj, FunctionObj, GCObject, HeaderOnly,
    InstanceObj, LoxBoundMethod, LoxClass, LoxClosure, LoxFunction, LoxInstance, LoxNative,
    LoxString, LoxUpvalue, NativeFn, NativeObj, ObjKind, StringObj, UpvalueLocation, UpvalueObj,
};
use crate::common::table::Table;
use crate::common::value::Value;
use crate::config::Config;
use crate::vm::error::RuntimeError;

pub struct Heap {
    /// Head of the intrusive list of every object this heap owns, linked
    /// through `GCObject::next`. Null means empty.
    objects: *mut GCObject<HeaderOnly>,
    /// Interned strings, keyed by the `LoxString` they wrap so that two
    /// source-text occurrences of the same characters share one
    /// allocation and compare equal by pointer.
    pub strings: Table,
    pub bytes_allocated: usize,
    pub next_gc: usize,
}

impl Heap {
    pub fn new(config: &Config) -> Self {
        Self {
            objects: std::ptr::null_mut(),
            strings: Table::new(),
            bytes_allocated: 0,
            next_gc: config.initial_gc_threshold,
        }
    }

    /// True once `bytes_allocated` has crossed `next_gc`, or always true
    /// under `--stress-gc`. The VM checks this after every dispatched
    /// instruction, never inside an `alloc_*` call.
    pub fn should_collect(&self, stress_gc: bool) -> bool {
        stress_gc || self.bytes_allocated > self.next_gc
    }

    pub fn expand_threshold(&mut self, grow_factor: usize) {
        self.next_gc = self.bytes_allocated.max(1) * grow_factor;
    }

    /// Every object allocation funnels through here so `bytes_allocated`
    /// and the intrusive list stay authoritative. Returns `OutOfMemory`
    /// only in the degenerate case of `bytes_allocated` overflowing --
    /// there is no fixed memory cap, since collection frequency is tied
    /// to `Config` instead.
    fn alloc<T>(&mut self, kind: ObjKind, data: T) -> Result<*mut GCObject<T>, RuntimeError> {
        let boxed = Box::new(GCObject {
            kind,
            mark: false,
            next: self.objects,
            data,
        });
        let size = size_of::<GCObject<T>>();
        self.bytes_allocated = self
            .bytes_allocated
            .checked_add(size)
            .ok_or(RuntimeError::OutOfMemory)?;
        let raw = Box::into_raw(boxed);
        // SAFETY: `GCObject<T>` is `#[repr(C)]` with `kind`/`mark`/`next`
        // as its first fields, so a `GCObject<T>` pointer and a
        // `GCObject<HeaderOnly>` pointer agree on the layout of that
        // prefix. The list is only ever walked through the header view;
        // any access to `data` goes back through a pointer recovered by
        // matching on `kind`, never through this header-typed alias.
        self.objects = raw as *mut GCObject<HeaderOnly>;
        Ok(raw)
    }

    /// Interns `chars`, returning the existing object if these exact
    /// characters have already been seen on this heap.
    pub fn intern_string(&mut self, chars: &str) -> Result<*mut StringObj, RuntimeError> {
        let hash = hash_string(chars);
        if let Some(existing) = self.strings.find_string(chars, hash) {
            return Ok(existing);
        }
        let obj = self.alloc(
            ObjKind::String,
            LoxString {
                chars: chars.to_owned(),
                hash,
            },
        )?;
        self.strings.set(obj, Value::Nil);
        Ok(obj)
    }

    pub fn alloc_function(&mut self, function: LoxFunction) -> Result<*mut FunctionObj, RuntimeError> {
        self.alloc(ObjKind::Function, function)
    }

    pub fn alloc_native(
        &mut self,
        name: *mut StringObj,
        arity: u8,
        function: NativeFn,
    ) -> Result<*mut NativeObj, RuntimeError> {
        self.alloc(
            ObjKind::Native,
            LoxNative {
                function,
                arity,
                name,
            },
        )
    }

    pub fn alloc_closure(
        &mut self,
        function: *mut FunctionObj,
        upvalues: Vec<*mut UpvalueObj>,
    ) -> Result<*mut ClosureObj, RuntimeError> {
        self.alloc(ObjKind::Closure, LoxClosure { function, upvalues })
    }

    pub fn alloc_upvalue(&mut self, location: UpvalueLocation) -> Result<*mut UpvalueObj, RuntimeError> {
        self.alloc(
            ObjKind::Upvalue,
            LoxUpvalue {
                location,
                next_open: None,
            },
        )
    }

    pub fn alloc_class(&mut self, name: *mut StringObj) -> Result<*mut ClassObj, RuntimeError> {
        self.alloc(
            ObjKind::Class,
            LoxClass {
                name,
                methods: Table::new(),
            },
        )
    }

    pub fn alloc_instance(&mut self, class: *mut ClassObj) -> Result<*mut InstanceObj, RuntimeError> {
        self.alloc(
            ObjKind::Instance,
            LoxInstance {
                class,
                fields: Table::new(),
            },
        )
    }

    pub fn alloc_bound_method(
        &mut self,
        receiver: Value,
        method: *mut ClosureObj,
    ) -> Result<*mut BoundMethodObj, RuntimeError> {
        self.alloc(ObjKind::BoundMethod, LoxBoundMethod { receiver, method })
    }

    /// Head of the intrusive object list, for the collector to walk.
    pub fn objects_head(&self) -> *mut GCObject<HeaderOnly> {
        self.objects
    }

    pub fn set_objects_head(&mut self, head: *mut GCObject<HeaderOnly>) {
        self.objects = head;
    }

    pub fn track_freed(&mut self, bytes: usize) {
        self.bytes_allocated = self.bytes_allocated.saturating_sub(bytes);
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        // The VM's own `Drop` impl walks and frees every object kind-by-
        // kind before this runs; by the time `Heap` itself drops, the
        // list is empty. This guard only matters if a `Heap` is ever
        // constructed and dropped without going through `VirtualMachine`
        // (e.g. in a unit test), where leaking is preferable to a crash
        // from downcasting a half-initialized object.
        self.objects = std::ptr::null_mut();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_same_content_twice_returns_the_same_object() {
        let config = Config::default();
        let mut heap = Heap::new(&config);
        let a = heap.intern_string("hello").unwrap();
        let b = heap.intern_string("hello").unwrap();
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn interning_different_content_returns_different_objects() {
        let config = Config::default();
        let mut heap = Heap::new(&config);
        let a = heap.intern_string("hello").unwrap();
        let b = heap.intern_string("world").unwrap();
        assert!(!std::ptr::eq(a, b));
    }

    #[test]
    fn should_collect_reports_stress_mode_regardless_of_bytes_allocated() {
        let config = Config::default();
        let heap = Heap::new(&config);
        assert!(!heap.should_collect(false));
        assert!(heap.should_collect(true));
    }
}
