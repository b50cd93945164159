//! Tunables for a `VirtualMachine` instance, threaded explicitly through
//! `VirtualMachine::with_config` rather than module-level constants, so
//! multiple VM instances can coexist with independent limits.

#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum live call frames before `RuntimeError::StackOverflow`.
    pub frames_max: usize,
    /// Capacity of the value stack, `frames_max * 256` by default.
    /// Enforced in `call_closure`: a call that would push the stack past
    /// this many slots fails with `RuntimeError::StackOverflow` instead of
    /// growing the backing `Vec` without bound.
    pub stack_max: usize,
    /// Multiplier applied to `bytesAllocated` to pick the next GC
    /// threshold after a collection.
    pub gc_heap_grow_factor: usize,
    /// Bytes allocated before the first collection is considered.
    pub initial_gc_threshold: usize,
    /// Forces a collection before continuing after every dispatched
    /// instruction, the granularity available without plumbing a
    /// full VM context through every `Heap::alloc_*` call.
    pub stress_gc: bool,
}

impl Config {
    pub const DEFAULT_FRAMES_MAX: usize = 64;
    pub const DEFAULT_GC_GROW_FACTOR: usize = 2;
    pub const DEFAULT_INITIAL_GC_THRESHOLD: usize = 1024 * 1024;

    pub fn stress_gc() -> Self {
        Self {
            stress_gc: true,
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frames_max: Self::DEFAULT_FRAMES_MAX,
            stack_max: Self::DEFAULT_FRAMES_MAX * 256,
            gc_heap_grow_factor: Self::DEFAULT_GC_GROW_FACTOR,
            initial_gc_threshold: Self::DEFAULT_INITIAL_GC_THRESHOLD,
            stress_gc: false,
        }
    }
}
