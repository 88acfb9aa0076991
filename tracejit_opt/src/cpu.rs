//! Target oracle.
//!
//! The optimizer asks the backend a handful of questions: how wide its SIMD
//! registers are, which scalar opcodes have a vector form, and what it
//! knows about constant heap objects. [`SimulatedCpu`] answers them from
//! tables, which is what tests and benchmarks use.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ir::Opcode;

/// Backend queries used during optimization.
pub trait Cpu {
    /// SIMD register width in bytes; `0` disables vectorization.
    fn vector_register_size(&self) -> usize;

    /// Vector form of `opcode` on this target.
    fn vector_equivalent(&self, opcode: Opcode) -> Option<Opcode> {
        opcode.vector_equivalent()
    }

    /// Class pointer of the constant object at `ptr`.
    fn class_of(&self, ptr: u64) -> Option<u64>;

    /// Whether the constant at `ptr` is an instance (has a class).
    fn is_object(&self, ptr: u64) -> bool;

    /// GC type id of the constant object at `ptr`.
    fn type_id_of(&self, ptr: u64) -> Option<u32>;

    /// Subclass id range `[min, max]` of a class.
    fn subclass_range(&self, vtable: u64) -> Option<(i64, i64)>;
}

/// A constant heap object known to the simulated target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapObject {
    pub class: Option<u64>,
    pub type_id: u32,
}

/// Table-driven [`Cpu`].
#[derive(Debug, Clone, Default)]
pub struct SimulatedCpu {
    vector_register_size: usize,
    disabled_vector_ops: FxHashSet<Opcode>,
    objects: FxHashMap<u64, HeapObject>,
    classes: FxHashMap<u64, (i64, i64)>,
}

impl SimulatedCpu {
    pub fn new(vector_register_size: usize) -> Self {
        Self {
            vector_register_size,
            ..Self::default()
        }
    }

    /// 128-bit registers.
    pub fn sse() -> Self {
        Self::new(16)
    }

    /// 256-bit registers.
    pub fn avx2() -> Self {
        Self::new(32)
    }

    /// No SIMD support.
    pub fn scalar() -> Self {
        Self::new(0)
    }

    /// Register an instance of `class`.
    pub fn with_object(mut self, ptr: u64, class: u64, type_id: u32) -> Self {
        self.objects.insert(
            ptr,
            HeapObject {
                class: Some(class),
                type_id,
            },
        );
        self
    }

    /// Register a non-instance GC object.
    pub fn with_raw_object(mut self, ptr: u64, type_id: u32) -> Self {
        self.objects.insert(ptr, HeapObject { class: None, type_id });
        self
    }

    pub fn with_class(mut self, vtable: u64, min: i64, max: i64) -> Self {
        self.classes.insert(vtable, (min, max));
        self
    }

    /// Pretend the target lacks the vector form of `opcode`.
    pub fn without_vector_op(mut self, opcode: Opcode) -> Self {
        self.disabled_vector_ops.insert(opcode);
        self
    }
}

impl Cpu for SimulatedCpu {
    fn vector_register_size(&self) -> usize {
        self.vector_register_size
    }

    fn vector_equivalent(&self, opcode: Opcode) -> Option<Opcode> {
        if self.disabled_vector_ops.contains(&opcode) {
            return None;
        }
        opcode.vector_equivalent()
    }

    fn class_of(&self, ptr: u64) -> Option<u64> {
        self.objects.get(&ptr).and_then(|o| o.class)
    }

    fn is_object(&self, ptr: u64) -> bool {
        self.objects.get(&ptr).is_some_and(|o| o.class.is_some())
    }

    fn type_id_of(&self, ptr: u64) -> Option<u32> {
        self.objects.get(&ptr).map(|o| o.type_id)
    }

    fn subclass_range(&self, vtable: u64) -> Option<(i64, i64)> {
        self.classes.get(&vtable).copied()
    }
}
