//! Descriptors attached to operations.
//!
//! Descriptors carry the static facts an operation cannot express through
//! its operands: item layout for array accesses, allocation shape, call
//! effects, and how a guard resumes when it fails.

use std::sync::Arc;

use super::value::ValueType;

/// Item category of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Int,
    Float,
    Ref,
}

/// Layout of an array's items.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArrayDescr {
    /// Identity of the array type.
    pub id: u32,
    /// Item size in bytes.
    pub item_size: usize,
    pub kind: ItemKind,
    pub signed: bool,
    /// Items are inline structs.
    pub is_struct: bool,
}

impl ArrayDescr {
    pub fn new(id: u32, kind: ItemKind, item_size: usize, signed: bool) -> Self {
        Self {
            id,
            item_size,
            kind,
            signed,
            is_struct: false,
        }
    }

    /// Signed integer items.
    pub fn ints(id: u32, item_size: usize) -> Arc<Self> {
        Arc::new(Self::new(id, ItemKind::Int, item_size, true))
    }

    /// Unsigned integer items.
    pub fn uints(id: u32, item_size: usize) -> Arc<Self> {
        Arc::new(Self::new(id, ItemKind::Int, item_size, false))
    }

    pub fn floats(id: u32, item_size: usize) -> Arc<Self> {
        Arc::new(Self::new(id, ItemKind::Float, item_size, true))
    }

    pub fn refs(id: u32) -> Arc<Self> {
        Arc::new(Self::new(id, ItemKind::Ref, 8, false))
    }

    pub fn structs(id: u32, item_size: usize) -> Arc<Self> {
        Arc::new(Self {
            is_struct: true,
            ..Self::new(id, ItemKind::Int, item_size, false)
        })
    }

    #[inline]
    pub fn is_array_of_pointers(&self) -> bool {
        self.kind == ItemKind::Ref
    }

    #[inline]
    pub fn is_array_of_floats(&self) -> bool {
        self.kind == ItemKind::Float
    }

    #[inline]
    pub fn is_array_of_structs(&self) -> bool {
        self.is_struct
    }

    /// Type of a box loaded from this array.
    pub fn item_type(&self) -> ValueType {
        match self.kind {
            ItemKind::Int => ValueType::Int,
            ItemKind::Float => ValueType::Float,
            ItemKind::Ref => ValueType::Ref,
        }
    }
}

/// Shape of a fixed-size allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SizeDescr {
    /// GC type id of the allocated object.
    pub type_id: u32,
    /// Class pointer, for instances.
    pub vtable: Option<u64>,
}

/// Special semantics a call target may have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OopSpec {
    #[default]
    None,
    /// `arraycopy(source, dest, source_start, dest_start, length)`.
    ArrayCopy,
}

/// Side effects of a call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct EffectInfo {
    pub oopspec: OopSpec,
    /// Array types the call may write.
    pub write_descrs_arrays: Vec<Arc<ArrayDescr>>,
    pub can_raise: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CallDescr {
    pub effect: EffectInfo,
}

impl CallDescr {
    pub fn plain() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Descriptor for an arraycopy helper writing `array`.
    pub fn arraycopy(array: Arc<ArrayDescr>) -> Arc<Self> {
        Arc::new(Self {
            effect: EffectInfo {
                oopspec: OopSpec::ArrayCopy,
                write_descrs_arrays: vec![array],
                can_raise: false,
            },
        })
    }
}

/// Where execution resumes when a guard fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResumeKind {
    /// Ordinary resume data for this guard's position.
    #[default]
    Guard,
    /// Resume exactly at this position; may not be merged away.
    AtPosition,
    /// Resume at the start of the current loop iteration.
    AtLoopHeader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GuardDescr {
    pub resume: ResumeKind,
}

impl GuardDescr {
    pub const fn new(resume: ResumeKind) -> Self {
        Self { resume }
    }
}

/// Loop header identity shared by a LABEL and the JUMPs to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetToken(pub u32);

/// Descriptor of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Descr {
    Array(Arc<ArrayDescr>),
    Size(Arc<SizeDescr>),
    Call(Arc<CallDescr>),
    Guard(GuardDescr),
    Target(TargetToken),
}

impl Descr {
    pub fn as_array(&self) -> Option<&Arc<ArrayDescr>> {
        match self {
            Descr::Array(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_size(&self) -> Option<&Arc<SizeDescr>> {
        match self {
            Descr::Size(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_call(&self) -> Option<&Arc<CallDescr>> {
        match self {
            Descr::Call(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_guard(&self) -> Option<GuardDescr> {
        match self {
            Descr::Guard(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_target(&self) -> Option<TargetToken> {
        match self {
            Descr::Target(t) => Some(*t),
            _ => None,
        }
    }
}

impl From<Arc<ArrayDescr>> for Descr {
    fn from(d: Arc<ArrayDescr>) -> Self {
        Descr::Array(d)
    }
}

impl From<Arc<SizeDescr>> for Descr {
    fn from(d: Arc<SizeDescr>) -> Self {
        Descr::Size(d)
    }
}

impl From<Arc<CallDescr>> for Descr {
    fn from(d: Arc<CallDescr>) -> Self {
        Descr::Call(d)
    }
}

impl From<GuardDescr> for Descr {
    fn from(d: GuardDescr) -> Self {
        Descr::Guard(d)
    }
}
