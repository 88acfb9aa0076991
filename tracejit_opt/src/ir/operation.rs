//! A single trace operation.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use super::descr::{ArrayDescr, CallDescr, Descr, GuardDescr, ResumeKind};
use super::opcode::Opcode;
use super::snapshot::Snapshot;
use super::value::{Value, Var};

/// One instruction of a linear trace.
///
/// Guards carry a [`Snapshot`]; its boxes are the guard's fail arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub opcode: Opcode,
    pub args: SmallVec<[Value; 4]>,
    /// Box defined by this operation.
    pub result: Option<Var>,
    pub descr: Option<Descr>,
    pub snapshot: Option<Arc<Snapshot>>,
}

impl Operation {
    pub fn new(opcode: Opcode, args: impl IntoIterator<Item = Value>, result: Option<Var>) -> Self {
        Self {
            opcode,
            args: args.into_iter().collect(),
            result,
            descr: None,
            snapshot: None,
        }
    }

    pub fn with_descr(mut self, descr: impl Into<Descr>) -> Self {
        self.descr = Some(descr.into());
        self
    }

    pub fn with_snapshot(mut self, snapshot: Arc<Snapshot>) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Argument `i`. Panics when the operation has fewer arguments.
    #[inline]
    pub fn arg(&self, i: usize) -> Value {
        self.args[i]
    }

    #[inline]
    pub fn num_args(&self) -> usize {
        self.args.len()
    }

    #[inline]
    pub fn set_arg(&mut self, i: usize, value: Value) {
        self.args[i] = value;
    }

    #[inline]
    pub fn is_guard(&self) -> bool {
        self.opcode.is_guard()
    }

    pub fn array_descr(&self) -> Option<&Arc<ArrayDescr>> {
        self.descr.as_ref().and_then(Descr::as_array)
    }

    pub fn call_descr(&self) -> Option<&Arc<CallDescr>> {
        self.descr.as_ref().and_then(Descr::as_call)
    }

    pub fn guard_descr(&self) -> Option<GuardDescr> {
        self.descr.as_ref().and_then(Descr::as_guard)
    }

    /// Resume behaviour of a guard; plain guards default to
    /// [`ResumeKind::Guard`].
    pub fn resume_kind(&self) -> ResumeKind {
        self.guard_descr().map_or(ResumeKind::Guard, |d| d.resume)
    }

    /// Guard that resumes at the loop header instead of its own position.
    pub fn exits_early(&self) -> bool {
        self.is_guard() && self.resume_kind() == ResumeKind::AtLoopHeader
    }

    /// Same result box, descriptor and snapshot under a new opcode and
    /// arguments.
    pub fn copy_and_change(&self, opcode: Opcode, args: impl IntoIterator<Item = Value>) -> Self {
        Self {
            opcode,
            args: args.into_iter().collect(),
            result: self.result,
            descr: self.descr.clone(),
            snapshot: self.snapshot.clone(),
        }
    }

    /// Fail arguments of a guard.
    pub fn fail_args(&self) -> impl Iterator<Item = Value> + '_ {
        self.snapshot.iter().flat_map(|s| s.values())
    }

    /// Every value this operation reads, snapshot included.
    pub fn uses(&self) -> impl Iterator<Item = Value> + '_ {
        self.args.iter().copied().chain(self.fail_args())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(res) = self.result {
            write!(f, "{} = ", res)?;
        }
        write!(f, "{}(", self.opcode)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", arg)?;
        }
        match &self.descr {
            Some(Descr::Array(d)) => write!(f, ", descr=array{}[{}]", d.id, d.item_size)?,
            Some(Descr::Guard(d)) if d.resume != ResumeKind::Guard => {
                write!(f, ", descr={:?}", d.resume)?
            }
            _ => {}
        }
        f.write_str(")")?;
        if let Some(snap) = &self.snapshot {
            f.write_str(" [")?;
            for (i, v) in snap.values().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}", v)?;
            }
            f.write_str("]")?;
        }
        Ok(())
    }
}
