//! Trace intermediate representation.
//!
//! A trace is a flat list of [`Operation`]s in SSA form. Loops start with a
//! `LABEL` that defines the loop-carried boxes and end with a `JUMP` back to
//! it. Guards carry resume [`Snapshot`]s.

pub mod descr;
pub mod opcode;
pub mod operation;
pub mod snapshot;
pub mod trace;
pub mod value;

pub use descr::{
    ArrayDescr, CallDescr, Descr, EffectInfo, GuardDescr, ItemKind, OopSpec, ResumeKind, SizeDescr,
    TargetToken,
};
pub use opcode::{OpFlags, Opcode, ResultClass};
pub use operation::Operation;
pub use snapshot::Snapshot;
pub use trace::{CallPureResults, Trace, TraceBuilder};
pub use value::{Const, ConstKey, ElemKind, Value, ValueType, Var, VarAllocator, VectorSpec};
