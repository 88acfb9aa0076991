//! Lowering packs to vector operations.
//!
//! While the scheduler walks the packed graph, [`VecScheduleData`] turns
//! each pack into one vector operation per register-sized chunk and keeps
//! track of which vector box (and lane) now holds every scalar result.
//! Operands are brought into the right shape on the way:
//!
//! | operand lanes                      | emitted                           |
//! |------------------------------------|-----------------------------------|
//! | one vector, lanes `0..n`           | nothing                           |
//! | one vector, lanes `k..k+n`         | `vec_*_unpack(v, k, n)`           |
//! | scalars, all the same              | `vec_*_expand(x, n)`              |
//! | scalars, different                 | `vec_box(n)` + `vec_*_pack` each  |
//! | mixed                              | `vec_box(n)` + `vec_*_pack` runs  |
//!
//! Integer lanes of the wrong width go through `vec_int_signext`. Scalar
//! consumers of a packed result (including snapshots and the closing jump)
//! read it back with `vec_*_unpack(v, lane, 1)`.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::cpu::Cpu;
use crate::ir::{ElemKind, Opcode, Operation, Snapshot, Value, ValueType, Var, VarAllocator, VectorSpec};

use super::dependency::{DependencyGraph, NodeId};
use super::packset::{Pack, PackKind, PackType};

// =============================================================================
// Operand Shapes
// =============================================================================

/// Operand and result lane types of a vector opcode. `None` operands stay
/// scalar.
#[derive(Debug, Clone, Copy)]
pub struct VecShape {
    pub args: &'static [Option<PackType>],
    pub result: Option<PackType>,
    /// Operand and result lanes use the array descriptor's type.
    pub from_descr: bool,
    /// The lane offset into the input vector is passed as an operand.
    pub pass_offset: bool,
    /// Result lane size is the constant at this operand.
    pub result_size_arg: Option<usize>,
}

const INT: Option<PackType> = Some(PackType::INT_GENERIC);
const FLOAT: Option<PackType> = Some(PackType::FLOAT_GENERIC);
const ANY: Option<PackType> = Some(PackType::UNKNOWN);

impl VecShape {
    const fn new(args: &'static [Option<PackType>], result: Option<PackType>) -> Self {
        Self {
            args,
            result,
            from_descr: false,
            pass_offset: false,
            result_size_arg: None,
        }
    }

    const fn memory(args: &'static [Option<PackType>], result: Option<PackType>) -> Self {
        Self {
            from_descr: true,
            ..Self::new(args, result)
        }
    }
}

/// Shape table of every vector opcode the scheduler can emit.
pub fn vector_shape(opcode: Opcode) -> Option<VecShape> {
    use Opcode::*;
    Some(match opcode {
        VecIntAdd | VecIntSub | VecIntMul => VecShape::new(&[INT, INT], INT),
        VecIntSignext => VecShape {
            result_size_arg: Some(1),
            ..VecShape::new(&[INT, None], INT)
        },
        VecFloatAdd | VecFloatSub | VecFloatMul => VecShape::new(&[FLOAT, FLOAT], FLOAT),
        VecFloatEq => VecShape::new(&[FLOAT, FLOAT], INT),
        VecGetarrayitemRaw | VecRawLoad => VecShape::memory(&[None, None], ANY),
        VecSetarrayitemRaw | VecRawStore => VecShape::memory(&[None, None, ANY], None),
        VecCastFloatToSinglefloat => {
            VecShape::new(&[Some(PackType::DOUBLE)], Some(PackType::SINGLE_FLOAT))
        }
        VecCastSinglefloatToFloat => VecShape {
            pass_offset: true,
            ..VecShape::new(&[Some(PackType::SINGLE_FLOAT)], Some(PackType::DOUBLE))
        },
        VecCastFloatToInt => VecShape::new(&[Some(PackType::DOUBLE)], Some(PackType::INT64)),
        VecCastIntToFloat => VecShape::new(&[Some(PackType::INT64)], Some(PackType::DOUBLE)),
        _ => return None,
    })
}

fn spec_of(var: Var) -> VectorSpec {
    match var.vector() {
        Some(spec) => spec,
        None => panic!("{} is not a vector box", var),
    }
}

fn pack_opcode(kind: ElemKind) -> Opcode {
    match kind {
        ElemKind::Int => Opcode::VecIntPack,
        ElemKind::Float => Opcode::VecFloatPack,
    }
}

fn unpack_opcode(kind: ElemKind) -> Opcode {
    match kind {
        ElemKind::Int => Opcode::VecIntUnpack,
        ElemKind::Float => Opcode::VecFloatUnpack,
    }
}

fn expand_opcode(kind: ElemKind) -> Opcode {
    match kind {
        ElemKind::Int => Opcode::VecIntExpand,
        ElemKind::Float => Opcode::VecFloatExpand,
    }
}

/// `(start, vbox)` when every lane reads `vbox` at `start + lane`.
fn consecutive(sources: &[Option<(usize, Var)>]) -> Option<(usize, Var)> {
    let (start, vbox) = (*sources.first()?)?;
    let all = sources
        .iter()
        .enumerate()
        .all(|(j, s)| *s == Some((start + j, vbox)));
    all.then_some((start, vbox))
}

// =============================================================================
// Schedule Data
// =============================================================================

/// Vector boxes produced so far and the scalar boxes they hold.
pub struct VecScheduleData<'a> {
    cpu: &'a dyn Cpu,
    vec_reg_size: usize,
    /// Lane size used when neither opcode nor operands fix one.
    smallest_type_bytes: usize,
    /// Scalar box -> (lane, vector box).
    box_to_vbox: FxHashMap<Var, (usize, Var)>,
    /// Scalar box -> box it was unpacked into.
    unpack_rename: FxHashMap<Var, Var>,
    vector_ops: usize,
    unpacks: usize,
}

impl<'a> VecScheduleData<'a> {
    pub fn new(cpu: &'a dyn Cpu, vec_reg_size: usize, smallest_type_bytes: usize) -> Self {
        Self {
            cpu,
            vec_reg_size,
            smallest_type_bytes,
            box_to_vbox: FxHashMap::default(),
            unpack_rename: FxHashMap::default(),
            vector_ops: 0,
            unpacks: 0,
        }
    }

    /// Vector operations emitted for packs.
    #[inline]
    pub fn vector_ops(&self) -> usize {
        self.vector_ops
    }

    /// Scalar reads of packed results.
    #[inline]
    pub fn unpacks(&self) -> usize {
        self.unpacks
    }

    /// Vector box and lane now holding `var`.
    pub fn vbox_of(&self, var: Var) -> Option<(usize, Var)> {
        self.box_to_vbox.get(&var).copied()
    }

    /// Lane type of a pack whose type is not fixed by a descriptor: the
    /// opcode's result type, widened by its vector inputs.
    pub fn propagate_ptype(&self, pack: &Pack, graph: &DependencyGraph, shape: &VecShape) -> PackType {
        if let Some(t) = pack.ptype().filter(PackType::is_valid) {
            return t;
        }
        let op0 = graph.node(pack.left()).op();
        let mut t = shape.result.unwrap_or(PackType::UNKNOWN);
        for (i, arg_shape) in shape.args.iter().enumerate() {
            if arg_shape.is_none() || i >= op0.num_args() {
                continue;
            }
            if let Some((_, vbox)) = op0.arg(i).var().and_then(|v| self.vbox_of(v)) {
                t.record_vector(spec_of(vbox));
            }
        }
        if t.kind == PackKind::Unknown {
            let float = op0.result.is_some_and(|r| r.ty().is_float());
            t.kind = if float { PackKind::Float } else { PackKind::Int };
        }
        if t.size == 0 {
            t.size = self.smallest_type_bytes.max(1);
        }
        t
    }

    /// Emit the vector form of `pack`, split into register-sized chunks.
    pub fn as_vector_operation(
        &mut self,
        pack: &mut Pack,
        graph: &DependencyGraph,
        vars: &mut VarAllocator,
        out: &mut Vec<Operation>,
    ) {
        let op0 = graph.node(pack.left()).op();
        let Some(vopcode) = self.cpu.vector_equivalent(op0.opcode) else {
            panic!("{} has no vector form", op0.opcode);
        };
        let Some(shape) = vector_shape(vopcode) else {
            panic!("no operand shape for {}", vopcode);
        };
        let ptype = self.propagate_ptype(pack, graph, &shape);
        pack.set_ptype(ptype);

        let lanes = if pack.is_overloaded(self.vec_reg_size) {
            (self.vec_reg_size / ptype.size).max(1)
        } else {
            pack.len()
        };
        for chunk in pack.nodes().chunks(lanes) {
            self.emit_chunk(chunk, vopcode, &shape, ptype, graph, vars, out);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_chunk(
        &mut self,
        chunk: &[NodeId],
        vopcode: Opcode,
        shape: &VecShape,
        ptype: PackType,
        graph: &DependencyGraph,
        vars: &mut VarAllocator,
        out: &mut Vec<Operation>,
    ) {
        let op0 = graph.node(chunk[0]).op();
        let count = chunk.len();
        let mut args: SmallVec<[Value; 4]> = SmallVec::with_capacity(op0.num_args() + 2);
        let mut offset = 0;
        for i in 0..op0.num_args() {
            let arg_shape = shape.args.get(i).copied().flatten();
            match arg_shape {
                Some(t) => {
                    let t = if shape.from_descr { ptype } else { t.resolve(ptype) };
                    let (vbox, start) =
                        self.vector_arg(graph, chunk, i, t, shape.pass_offset, vars, out);
                    offset = start;
                    args.push(Value::Var(vbox));
                }
                None => args.push(self.scalar_value(op0.arg(i), vars, out)),
            }
        }
        if shape.pass_offset {
            args.push(Value::int(offset as i64));
        }
        args.push(Value::int(count as i64));

        let result = shape.result.map(|r| {
            let t = if shape.from_descr { ptype } else { r.resolve(ptype) };
            let mut spec = t.vector_spec(count);
            if let Some(k) = shape.result_size_arg {
                if let Some(size) = args[k].constant().and_then(|c| c.as_int()) {
                    spec = spec.with_item_size(size as u8);
                }
            }
            let vbox = vars.fresh(ValueType::Vector(spec));
            for (lane, &n) in chunk.iter().enumerate() {
                if let Some(res) = graph.node(n).op().result {
                    self.box_to_vbox.insert(res, (lane, vbox));
                }
            }
            vbox
        });

        let mut vop = Operation::new(vopcode, args, result);
        vop.descr = op0.descr.clone();
        out.push(vop);
        self.vector_ops += 1;
    }

    /// Vector box holding operand `i` of every lane of `chunk`. With
    /// `allow_offset`, a run starting inside a vector is returned as that
    /// vector plus the start lane.
    #[allow(clippy::too_many_arguments)]
    fn vector_arg(
        &mut self,
        graph: &DependencyGraph,
        chunk: &[NodeId],
        i: usize,
        t: PackType,
        allow_offset: bool,
        vars: &mut VarAllocator,
        out: &mut Vec<Operation>,
    ) -> (Var, usize) {
        let count = chunk.len();
        let args: SmallVec<[Value; 8]> = chunk.iter().map(|&n| graph.node(n).op().arg(i)).collect();
        let sources: SmallVec<[Option<(usize, Var)>; 8]> = args
            .iter()
            .map(|a| a.var().and_then(|v| self.vbox_of(v)))
            .collect();

        let (vbox, start) = if let Some((start, vbox)) = consecutive(&sources) {
            if start == 0 && spec_of(vbox).count as usize == count {
                (vbox, 0)
            } else if allow_offset {
                (vbox, start)
            } else {
                (self.unpack_vector(vbox, start, count, vars, out), 0)
            }
        } else if sources.iter().all(Option::is_none) {
            (self.expand(&args, t, vars, out), 0)
        } else {
            (self.gather(&args, &sources, t, vars, out), 0)
        };
        (self.adjust_width(vbox, t, vars, out), start)
    }

    /// Sign-extend or truncate integer lanes to `t.size`.
    fn adjust_width(&mut self, vbox: Var, t: PackType, vars: &mut VarAllocator, out: &mut Vec<Operation>) -> Var {
        let spec = spec_of(vbox);
        if t.kind != PackKind::Int || spec.kind != ElemKind::Int || t.size == 0 {
            return vbox;
        }
        if spec.item_size as usize == t.size {
            return vbox;
        }
        let result = vars.fresh(ValueType::Vector(spec.with_item_size(t.size as u8)));
        out.push(Operation::new(
            Opcode::VecIntSignext,
            [
                Value::Var(vbox),
                Value::int(t.size as i64),
                Value::int(spec.count as i64),
            ],
            Some(result),
        ));
        result
    }

    /// Broadcast or assemble scalar operands.
    fn expand(&mut self, args: &[Value], t: PackType, vars: &mut VarAllocator, out: &mut Vec<Operation>) -> Var {
        let first = args[0];
        let kind = if first.ty().is_float() {
            ElemKind::Float
        } else {
            ElemKind::Int
        };
        let size = if t.size > 0 { t.size } else { 8 };
        let spec = VectorSpec::new(kind, args.len() as u16, size as u8, t.signed);

        if args.iter().all(|&a| a == first) {
            let first = self.scalar_value(first, vars, out);
            let result = vars.fresh(ValueType::Vector(spec));
            out.push(Operation::new(
                expand_opcode(kind),
                [first, Value::int(args.len() as i64)],
                Some(result),
            ));
            return result;
        }
        let mut target = self.new_vbox(spec, vars, out);
        for (j, &a) in args.iter().enumerate() {
            let a = self.scalar_value(a, vars, out);
            target = self.pack_into(target, a, j, 1, vars, out);
        }
        target
    }

    /// Assemble a vector from runs of other vectors and scalars.
    fn gather(
        &mut self,
        args: &[Value],
        sources: &[Option<(usize, Var)>],
        t: PackType,
        vars: &mut VarAllocator,
        out: &mut Vec<Operation>,
    ) -> Var {
        let count = args.len();
        let kind = match t.kind {
            PackKind::Float => ElemKind::Float,
            _ => ElemKind::Int,
        };
        let size = if t.size > 0 { t.size } else { 8 };
        let spec = VectorSpec::new(kind, count as u16, size as u8, t.signed);
        let mut target = self.new_vbox(spec, vars, out);
        let mut j = 0;
        while j < count {
            match sources[j] {
                Some((lane, src)) => {
                    let mut run = 1;
                    while j + run < count && sources[j + run] == Some((lane + run, src)) {
                        run += 1;
                    }
                    let part = if lane == 0 && spec_of(src).count as usize == run {
                        src
                    } else {
                        self.unpack_vector(src, lane, run, vars, out)
                    };
                    target = self.pack_into(target, Value::Var(part), j, run, vars, out);
                    j += run;
                }
                None => {
                    let a = self.scalar_value(args[j], vars, out);
                    target = self.pack_into(target, a, j, 1, vars, out);
                    j += 1;
                }
            }
        }
        target
    }

    fn new_vbox(&mut self, spec: VectorSpec, vars: &mut VarAllocator, out: &mut Vec<Operation>) -> Var {
        let result = vars.fresh(ValueType::Vector(spec));
        out.push(Operation::new(
            Opcode::VecBox,
            [Value::int(spec.count as i64)],
            Some(result),
        ));
        result
    }

    /// `target[index..index + count] = source`.
    fn pack_into(
        &mut self,
        target: Var,
        source: Value,
        index: usize,
        count: usize,
        vars: &mut VarAllocator,
        out: &mut Vec<Operation>,
    ) -> Var {
        let spec = spec_of(target);
        let result = vars.fresh(ValueType::Vector(spec));
        out.push(Operation::new(
            pack_opcode(spec.kind),
            [
                Value::Var(target),
                source,
                Value::int(index as i64),
                Value::int(count as i64),
            ],
            Some(result),
        ));
        result
    }

    /// Lanes `start..start + count` of `vbox` as a new vector.
    fn unpack_vector(
        &mut self,
        vbox: Var,
        start: usize,
        count: usize,
        vars: &mut VarAllocator,
        out: &mut Vec<Operation>,
    ) -> Var {
        let spec = spec_of(vbox);
        let result = vars.fresh(ValueType::Vector(spec.with_count(count as u16)));
        out.push(Operation::new(
            unpack_opcode(spec.kind),
            [
                Value::Var(vbox),
                Value::int(start as i64),
                Value::int(count as i64),
            ],
            Some(result),
        ));
        result
    }

    /// Scalar form of `value`, unpacking it from its vector on first use.
    pub fn scalar_value(&mut self, value: Value, vars: &mut VarAllocator, out: &mut Vec<Operation>) -> Value {
        let Value::Var(var) = value else {
            return value;
        };
        if let Some(&renamed) = self.unpack_rename.get(&var) {
            return Value::Var(renamed);
        }
        let Some((lane, vbox)) = self.vbox_of(var) else {
            return value;
        };
        let fresh = vars.fresh(var.ty());
        out.push(Operation::new(
            unpack_opcode(spec_of(vbox).kind),
            [Value::Var(vbox), Value::int(lane as i64), Value::int(1)],
            Some(fresh),
        ));
        self.unpack_rename.insert(var, fresh);
        self.unpacks += 1;
        Value::Var(fresh)
    }

    /// Rewrite the operands and snapshot of a scalar operation so they no
    /// longer name packed boxes.
    pub fn unpack_operation(&mut self, op: &mut Operation, vars: &mut VarAllocator, out: &mut Vec<Operation>) {
        for i in 0..op.num_args() {
            let arg = self.scalar_value(op.arg(i), vars, out);
            op.set_arg(i, arg);
        }
        if let Some(snapshot) = op.snapshot.take() {
            let renamed = Snapshot::rename(&snapshot, &mut |v| self.scalar_value(v, vars, out));
            op.snapshot = Some(renamed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::SimulatedCpu;
    use crate::ir::{ArrayDescr, TraceBuilder};

    fn ivec(count: u16, size: u8) -> ValueType {
        ValueType::Vector(VectorSpec::new(ElemKind::Int, count, size, true))
    }

    #[test]
    fn test_shape_table() {
        let add = vector_shape(Opcode::VecIntAdd).unwrap();
        assert_eq!(add.args.len(), 2);
        assert!(!add.from_descr);
        let store = vector_shape(Opcode::VecSetarrayitemRaw).unwrap();
        assert!(store.from_descr);
        assert!(store.result.is_none());
        assert!(vector_shape(Opcode::VecCastSinglefloatToFloat).unwrap().pass_offset);
        assert!(vector_shape(Opcode::VecIntPack).is_none());
    }

    #[test]
    fn test_consecutive() {
        let v = Var::new(9, ivec(4, 4));
        assert_eq!(consecutive(&[Some((0, v)), Some((1, v))]), Some((0, v)));
        assert_eq!(consecutive(&[Some((2, v)), Some((3, v))]), Some((2, v)));
        assert_eq!(consecutive(&[Some((1, v)), Some((0, v))]), None);
        assert_eq!(consecutive(&[Some((0, v)), None]), None);
    }

    #[test]
    fn test_scalar_value_unpacks_once() {
        let cpu = SimulatedCpu::sse();
        let mut data = VecScheduleData::new(&cpu, 16, 4);
        let mut vars = VarAllocator::starting_at(100);
        let mut out = Vec::new();
        let scalar = Var::new(1, ValueType::Int);
        let vbox = Var::new(2, ivec(2, 8));
        data.box_to_vbox.insert(scalar, (1, vbox));

        let a = data.scalar_value(Value::Var(scalar), &mut vars, &mut out);
        let b = data.scalar_value(Value::Var(scalar), &mut vars, &mut out);
        assert_eq!(a, b);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].opcode, Opcode::VecIntUnpack);
        assert_eq!(out[0].arg(1), Value::int(1));
        assert_eq!(data.unpacks(), 1);
    }

    #[test]
    fn test_unpack_operation_renames_snapshot() {
        let cpu = SimulatedCpu::sse();
        let mut data = VecScheduleData::new(&cpu, 16, 4);
        let mut vars = VarAllocator::starting_at(100);
        let mut out = Vec::new();
        let scalar = Var::new(1, ValueType::Int);
        let vbox = Var::new(2, ivec(2, 8));
        data.box_to_vbox.insert(scalar, (0, vbox));

        let mut guard = Operation::new(Opcode::GuardTrue, [Value::int(1)], None)
            .with_snapshot(Snapshot::root([Value::Var(scalar)]));
        data.unpack_operation(&mut guard, &mut vars, &mut out);
        let fail: Vec<Value> = guard.fail_args().collect();
        assert_eq!(out.len(), 1);
        assert_eq!(fail, vec![Value::Var(out[0].result.unwrap())]);
    }

    /// Two int32 loads of one array packed, then added to a constant.
    fn load_add_pack() -> (DependencyGraph, Pack, Pack) {
        let mut b = TraceBuilder::new();
        let i0 = b.int();
        let pa = b.ptr();
        let d = ArrayDescr::ints(1, 4);
        b.label(&[i0, pa], 1);
        let x0 = b.load(Opcode::GetarrayitemRaw, &[pa.into(), i0.into()], &d);
        let i1 = b.pure(Opcode::IntAdd, &[i0.into(), Value::int(1)]);
        let x1 = b.load(Opcode::GetarrayitemRaw, &[pa.into(), i1.into()], &d);
        let y0 = b.pure(Opcode::IntAdd, &[x0.into(), Value::int(7)]);
        let y1 = b.pure(Opcode::IntAdd, &[x1.into(), Value::int(7)]);
        b.jump(&[i1.into(), pa.into(), y0.into(), y1.into()], 1);
        let graph = DependencyGraph::new(b.build().ops);
        let mut loads = Pack::pair(NodeId(1), NodeId(3));
        loads.set_ptype(PackType::by_descr(&d));
        (graph, loads, Pack::pair(NodeId(4), NodeId(5)))
    }

    #[test]
    fn test_vector_chain() {
        let (graph, mut loads, mut adds) = load_add_pack();
        let cpu = SimulatedCpu::sse();
        let mut data = VecScheduleData::new(&cpu, 16, 4);
        let mut vars = VarAllocator::starting_at(100);
        let mut out = Vec::new();

        data.as_vector_operation(&mut loads, &graph, &mut vars, &mut out);
        data.as_vector_operation(&mut adds, &graph, &mut vars, &mut out);

        let opcodes: Vec<Opcode> = out.iter().map(|op| op.opcode).collect();
        assert_eq!(
            opcodes,
            vec![Opcode::VecGetarrayitemRaw, Opcode::VecIntExpand, Opcode::VecIntAdd]
        );
        let vload = out[0].result.unwrap();
        assert_eq!(vload.vector(), Some(VectorSpec::new(ElemKind::Int, 2, 4, true)));
        assert_eq!(out[2].arg(0), Value::Var(vload));
        assert_eq!(out[2].args.last(), Some(&Value::int(2)));
        assert_eq!(adds.ptype(), Some(PackType::new(PackKind::Int, 4, true)));
        assert_eq!(data.vector_ops(), 2);
    }

    #[test]
    fn test_overloaded_pack_is_split() {
        let (graph, mut loads, _) = load_add_pack();
        let cpu = SimulatedCpu::new(4);
        let mut data = VecScheduleData::new(&cpu, 4, 4);
        let mut vars = VarAllocator::starting_at(100);
        let mut out = Vec::new();

        data.as_vector_operation(&mut loads, &graph, &mut vars, &mut out);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|op| op.args.last() == Some(&Value::int(1))));
        // Second chunk indexes with the second lane's index box.
        assert_eq!(out[1].arg(1), graph.node(NodeId(3)).op().arg(1));
    }
}
