//! Operation codes and their static properties.
//!
//! The optimizer never switches on raw opcode ranges; every question it asks
//! ("is this a guard?", "may this be removed?", "what is the SIMD form?") is
//! answered by a `const fn` on [`Opcode`], backed by the [`OpFlags`] table.

use std::fmt;

bitflags::bitflags! {
    /// Static properties of an opcode.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct OpFlags: u16 {
        /// Checks a condition and exits the trace when it fails.
        const GUARD = 0b0000_0000_0001;
        /// No observable effect; may be dropped when unused.
        const NO_SIDE_EFFECT = 0b0000_0000_0010;
        /// Result depends on the arguments only; foldable and CSE-able.
        const PURE = 0b0000_0000_0100 | Self::NO_SIDE_EFFECT.bits();
        /// Memory access described by an array descriptor.
        const ARRAY = 0b0000_0000_1000;
        /// Reads memory.
        const LOAD = 0b0000_0001_0000;
        /// Writes memory.
        const STORE = 0b0000_0010_0000;
        /// Index operand is a byte offset instead of an item index.
        const BYTE_INDEXED = 0b0000_0100_0000;
        /// Ends the trace.
        const FINAL = 0b0000_1000_0000;
        /// Calls out of the trace.
        const CALL = 0b0001_0000_0000;
        /// Produces a 0/1 truth value from two operands.
        const COMPARISON = 0b0010_0000_0000;
        /// Operates on SIMD registers.
        const VECTOR = 0b0100_0000_0000;
    }
}

/// What kind of box an opcode defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    Void,
    Int,
    Float,
    Ref,
    /// Item type of the operation's array descriptor.
    FromDescr,
    /// Depends on the call target or on the vector shape.
    Explicit,
}

/// Trace operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Opcode {
    // Control
    Label,
    Jump,
    Finish,
    DebugMergePoint,

    // Integer arithmetic
    IntAdd,
    IntSub,
    IntMul,
    IntAnd,
    IntOr,
    IntXor,
    IntLshift,
    IntRshift,
    UintRshift,
    IntFloordiv,
    UintFloordiv,
    IntMod,
    IntNeg,
    IntInvert,
    IntSignext,
    IntIsTrue,
    IntIsZero,

    // Integer comparisons
    IntLt,
    IntLe,
    IntEq,
    IntNe,
    IntGt,
    IntGe,
    UintLt,
    UintLe,
    UintGt,
    UintGe,

    // Float arithmetic
    FloatAdd,
    FloatSub,
    FloatMul,
    FloatTruediv,
    FloatNeg,
    FloatAbs,

    // Float comparisons
    FloatLt,
    FloatLe,
    FloatEq,
    FloatNe,
    FloatGt,
    FloatGe,

    // Casts
    CastFloatToInt,
    CastIntToFloat,
    CastFloatToSinglefloat,
    CastSinglefloatToFloat,
    CastPtrToInt,
    CastIntToPtr,

    // Pointers
    PtrEq,
    PtrNe,
    InstancePtrEq,
    InstancePtrNe,
    SameAs,

    // Memory
    GetarrayitemGc,
    GetarrayitemRaw,
    SetarrayitemGc,
    SetarrayitemRaw,
    RawLoad,
    RawStore,
    Arraylen,
    New,
    NewWithVtable,

    // Calls
    Call,
    CallPure,
    CallLoopinvariant,
    CondCall,

    // Guards
    GuardTrue,
    GuardFalse,
    GuardValue,
    GuardClass,
    GuardNonnull,
    GuardIsnull,
    GuardNonnullClass,
    GuardIsObject,
    GuardGcType,
    GuardSubclass,
    GuardNoException,
    GuardNotInvalidated,
    GuardFutureCondition,
    GuardEarlyExit,

    // Pseudo
    RecordExactClass,

    // Vector
    VecIntAdd,
    VecIntSub,
    VecIntMul,
    VecIntSignext,
    VecFloatAdd,
    VecFloatSub,
    VecFloatMul,
    VecFloatEq,
    VecGetarrayitemRaw,
    VecRawLoad,
    VecSetarrayitemRaw,
    VecRawStore,
    VecCastFloatToSinglefloat,
    VecCastSinglefloatToFloat,
    VecCastFloatToInt,
    VecCastIntToFloat,
    VecIntPack,
    VecIntUnpack,
    VecIntExpand,
    VecFloatPack,
    VecFloatUnpack,
    VecFloatExpand,
    VecBox,
}

impl Opcode {
    /// Static property table.
    pub const fn flags(self) -> OpFlags {
        use Opcode::*;
        match self {
            Label | DebugMergePoint => OpFlags::NO_SIDE_EFFECT,
            Jump | Finish => OpFlags::FINAL,

            IntAdd | IntSub | IntMul | IntAnd | IntOr | IntXor | IntLshift | IntRshift
            | UintRshift | IntFloordiv | UintFloordiv | IntMod | IntNeg | IntInvert
            | IntSignext | IntIsTrue | IntIsZero => OpFlags::PURE,

            IntLt | IntLe | IntEq | IntNe | IntGt | IntGe | UintLt | UintLe | UintGt | UintGe => {
                OpFlags::PURE.union(OpFlags::COMPARISON)
            }

            FloatAdd | FloatSub | FloatMul | FloatTruediv | FloatNeg | FloatAbs => OpFlags::PURE,

            FloatLt | FloatLe | FloatEq | FloatNe | FloatGt | FloatGe => {
                OpFlags::PURE.union(OpFlags::COMPARISON)
            }

            CastFloatToInt | CastIntToFloat | CastFloatToSinglefloat | CastSinglefloatToFloat
            | CastPtrToInt | CastIntToPtr | SameAs => OpFlags::PURE,

            PtrEq | PtrNe | InstancePtrEq | InstancePtrNe => OpFlags::PURE.union(OpFlags::COMPARISON),

            GetarrayitemGc | GetarrayitemRaw => OpFlags::NO_SIDE_EFFECT
                .union(OpFlags::ARRAY)
                .union(OpFlags::LOAD),
            RawLoad => OpFlags::NO_SIDE_EFFECT
                .union(OpFlags::ARRAY)
                .union(OpFlags::LOAD)
                .union(OpFlags::BYTE_INDEXED),
            SetarrayitemGc | SetarrayitemRaw => OpFlags::ARRAY.union(OpFlags::STORE),
            RawStore => OpFlags::ARRAY
                .union(OpFlags::STORE)
                .union(OpFlags::BYTE_INDEXED),
            Arraylen | New | NewWithVtable => OpFlags::NO_SIDE_EFFECT,

            Call | CallLoopinvariant | CondCall => OpFlags::CALL,
            CallPure => OpFlags::CALL.union(OpFlags::NO_SIDE_EFFECT),

            GuardTrue | GuardFalse | GuardValue | GuardClass | GuardNonnull | GuardIsnull
            | GuardNonnullClass | GuardIsObject | GuardGcType | GuardSubclass
            | GuardNoException | GuardNotInvalidated | GuardFutureCondition
            | GuardEarlyExit => OpFlags::GUARD,

            RecordExactClass => OpFlags::NO_SIDE_EFFECT,

            VecIntAdd | VecIntSub | VecIntMul | VecIntSignext | VecFloatAdd | VecFloatSub
            | VecFloatMul | VecFloatEq | VecCastFloatToSinglefloat | VecCastSinglefloatToFloat
            | VecCastFloatToInt | VecCastIntToFloat | VecIntPack | VecIntUnpack
            | VecIntExpand | VecFloatPack | VecFloatUnpack | VecFloatExpand | VecBox => {
                OpFlags::PURE.union(OpFlags::VECTOR)
            }

            VecGetarrayitemRaw => OpFlags::NO_SIDE_EFFECT
                .union(OpFlags::ARRAY)
                .union(OpFlags::LOAD)
                .union(OpFlags::VECTOR),
            VecRawLoad => OpFlags::NO_SIDE_EFFECT
                .union(OpFlags::ARRAY)
                .union(OpFlags::LOAD)
                .union(OpFlags::BYTE_INDEXED)
                .union(OpFlags::VECTOR),
            VecSetarrayitemRaw => OpFlags::ARRAY
                .union(OpFlags::STORE)
                .union(OpFlags::VECTOR),
            VecRawStore => OpFlags::ARRAY
                .union(OpFlags::STORE)
                .union(OpFlags::BYTE_INDEXED)
                .union(OpFlags::VECTOR),
        }
    }

    #[inline]
    pub const fn is_guard(self) -> bool {
        self.flags().contains(OpFlags::GUARD)
    }

    #[inline]
    pub const fn is_always_pure(self) -> bool {
        self.flags().contains(OpFlags::PURE)
    }

    #[inline]
    pub const fn has_no_side_effect(self) -> bool {
        self.flags().contains(OpFlags::NO_SIDE_EFFECT)
    }

    #[inline]
    pub const fn is_array_op(self) -> bool {
        self.flags().contains(OpFlags::ARRAY)
    }

    #[inline]
    pub const fn is_load(self) -> bool {
        self.flags().contains(OpFlags::LOAD)
    }

    #[inline]
    pub const fn is_store(self) -> bool {
        self.flags().contains(OpFlags::STORE)
    }

    /// Raw memory access indexed in bytes.
    #[inline]
    pub const fn is_byte_indexed(self) -> bool {
        self.flags().contains(OpFlags::BYTE_INDEXED)
    }

    /// Array access through a raw (non-GC) pointer.
    pub const fn is_raw_array_access(self) -> bool {
        matches!(
            self,
            Opcode::GetarrayitemRaw
                | Opcode::SetarrayitemRaw
                | Opcode::RawLoad
                | Opcode::RawStore
                | Opcode::VecGetarrayitemRaw
                | Opcode::VecSetarrayitemRaw
                | Opcode::VecRawLoad
                | Opcode::VecRawStore
        )
    }

    #[inline]
    pub const fn is_final(self) -> bool {
        self.flags().contains(OpFlags::FINAL)
    }

    #[inline]
    pub const fn is_call(self) -> bool {
        self.flags().contains(OpFlags::CALL)
    }

    #[inline]
    pub const fn is_comparison(self) -> bool {
        self.flags().contains(OpFlags::COMPARISON)
    }

    #[inline]
    pub const fn is_vector(self) -> bool {
        self.flags().contains(OpFlags::VECTOR)
    }

    /// Pseudo-ops that lower to nothing.
    pub const fn is_debug(self) -> bool {
        matches!(self, Opcode::DebugMergePoint)
    }

    /// Kind of box this opcode defines.
    pub const fn result_class(self) -> ResultClass {
        use Opcode::*;
        match self {
            Label | Jump | Finish | DebugMergePoint | SetarrayitemGc | SetarrayitemRaw
            | RawStore | CondCall | RecordExactClass | VecSetarrayitemRaw | VecRawStore => {
                ResultClass::Void
            }
            GuardTrue | GuardFalse | GuardValue | GuardClass | GuardNonnull | GuardIsnull
            | GuardNonnullClass | GuardIsObject | GuardGcType | GuardSubclass
            | GuardNoException | GuardNotInvalidated | GuardFutureCondition
            | GuardEarlyExit => ResultClass::Void,

            IntAdd | IntSub | IntMul | IntAnd | IntOr | IntXor | IntLshift | IntRshift
            | UintRshift | IntFloordiv | UintFloordiv | IntMod | IntNeg | IntInvert
            | IntSignext | IntIsTrue | IntIsZero | IntLt | IntLe | IntEq | IntNe | IntGt
            | IntGe | UintLt | UintLe | UintGt | UintGe | FloatLt | FloatLe | FloatEq
            | FloatNe | FloatGt | FloatGe | CastFloatToInt | CastFloatToSinglefloat
            | CastPtrToInt | PtrEq | PtrNe | InstancePtrEq | InstancePtrNe | Arraylen => {
                ResultClass::Int
            }

            FloatAdd | FloatSub | FloatMul | FloatTruediv | FloatNeg | FloatAbs
            | CastIntToFloat | CastSinglefloatToFloat => ResultClass::Float,

            CastIntToPtr | New | NewWithVtable => ResultClass::Ref,

            GetarrayitemGc | GetarrayitemRaw | RawLoad => ResultClass::FromDescr,

            SameAs | Call | CallPure | CallLoopinvariant => ResultClass::Explicit,

            VecIntAdd | VecIntSub | VecIntMul | VecIntSignext | VecFloatAdd | VecFloatSub
            | VecFloatMul | VecFloatEq | VecGetarrayitemRaw | VecRawLoad
            | VecCastFloatToSinglefloat | VecCastSinglefloatToFloat | VecCastFloatToInt
            | VecCastIntToFloat | VecIntPack | VecIntUnpack | VecIntExpand | VecFloatPack
            | VecFloatUnpack | VecFloatExpand | VecBox => ResultClass::Explicit,
        }
    }

    /// SIMD counterpart of a scalar opcode.
    pub const fn vector_equivalent(self) -> Option<Opcode> {
        use Opcode::*;
        Some(match self {
            IntAdd => VecIntAdd,
            IntSub => VecIntSub,
            IntMul => VecIntMul,
            IntSignext => VecIntSignext,
            FloatAdd => VecFloatAdd,
            FloatSub => VecFloatSub,
            FloatMul => VecFloatMul,
            FloatEq => VecFloatEq,
            GetarrayitemRaw => VecGetarrayitemRaw,
            RawLoad => VecRawLoad,
            SetarrayitemRaw => VecSetarrayitemRaw,
            RawStore => VecRawStore,
            CastFloatToSinglefloat => VecCastFloatToSinglefloat,
            CastSinglefloatToFloat => VecCastSinglefloatToFloat,
            CastFloatToInt => VecCastFloatToInt,
            CastIntToFloat => VecCastIntToFloat,
            _ => return None,
        })
    }

    /// Opcode computing the negation of this comparison on the same
    /// operands. Ordered float comparisons have none (NaN).
    pub const fn bool_inverse(self) -> Option<Opcode> {
        use Opcode::*;
        Some(match self {
            IntEq => IntNe,
            IntNe => IntEq,
            IntLt => IntGe,
            IntGe => IntLt,
            IntGt => IntLe,
            IntLe => IntGt,
            UintLt => UintGe,
            UintGe => UintLt,
            UintGt => UintLe,
            UintLe => UintGt,
            FloatEq => FloatNe,
            FloatNe => FloatEq,
            PtrEq => PtrNe,
            PtrNe => PtrEq,
            InstancePtrEq => InstancePtrNe,
            InstancePtrNe => InstancePtrEq,
            _ => return None,
        })
    }

    /// Opcode computing the same truth value with swapped operands.
    pub const fn bool_reflex(self) -> Option<Opcode> {
        use Opcode::*;
        Some(match self {
            IntEq => IntEq,
            IntNe => IntNe,
            IntLt => IntGt,
            IntGt => IntLt,
            IntLe => IntGe,
            IntGe => IntLe,
            UintLt => UintGt,
            UintGt => UintLt,
            UintLe => UintGe,
            UintGe => UintLe,
            FloatEq => FloatEq,
            FloatNe => FloatNe,
            FloatLt => FloatGt,
            FloatGt => FloatLt,
            FloatLe => FloatGe,
            FloatGe => FloatLe,
            PtrEq => PtrEq,
            PtrNe => PtrNe,
            InstancePtrEq => InstancePtrEq,
            InstancePtrNe => InstancePtrNe,
            _ => return None,
        })
    }

    /// Lowercase name as printed in trace logs.
    pub const fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            Label => "label",
            Jump => "jump",
            Finish => "finish",
            DebugMergePoint => "debug_merge_point",
            IntAdd => "int_add",
            IntSub => "int_sub",
            IntMul => "int_mul",
            IntAnd => "int_and",
            IntOr => "int_or",
            IntXor => "int_xor",
            IntLshift => "int_lshift",
            IntRshift => "int_rshift",
            UintRshift => "uint_rshift",
            IntFloordiv => "int_floordiv",
            UintFloordiv => "uint_floordiv",
            IntMod => "int_mod",
            IntNeg => "int_neg",
            IntInvert => "int_invert",
            IntSignext => "int_signext",
            IntIsTrue => "int_is_true",
            IntIsZero => "int_is_zero",
            IntLt => "int_lt",
            IntLe => "int_le",
            IntEq => "int_eq",
            IntNe => "int_ne",
            IntGt => "int_gt",
            IntGe => "int_ge",
            UintLt => "uint_lt",
            UintLe => "uint_le",
            UintGt => "uint_gt",
            UintGe => "uint_ge",
            FloatAdd => "float_add",
            FloatSub => "float_sub",
            FloatMul => "float_mul",
            FloatTruediv => "float_truediv",
            FloatNeg => "float_neg",
            FloatAbs => "float_abs",
            FloatLt => "float_lt",
            FloatLe => "float_le",
            FloatEq => "float_eq",
            FloatNe => "float_ne",
            FloatGt => "float_gt",
            FloatGe => "float_ge",
            CastFloatToInt => "cast_float_to_int",
            CastIntToFloat => "cast_int_to_float",
            CastFloatToSinglefloat => "cast_float_to_singlefloat",
            CastSinglefloatToFloat => "cast_singlefloat_to_float",
            CastPtrToInt => "cast_ptr_to_int",
            CastIntToPtr => "cast_int_to_ptr",
            PtrEq => "ptr_eq",
            PtrNe => "ptr_ne",
            InstancePtrEq => "instance_ptr_eq",
            InstancePtrNe => "instance_ptr_ne",
            SameAs => "same_as",
            GetarrayitemGc => "getarrayitem_gc",
            GetarrayitemRaw => "getarrayitem_raw",
            SetarrayitemGc => "setarrayitem_gc",
            SetarrayitemRaw => "setarrayitem_raw",
            RawLoad => "raw_load",
            RawStore => "raw_store",
            Arraylen => "arraylen_gc",
            New => "new",
            NewWithVtable => "new_with_vtable",
            Call => "call",
            CallPure => "call_pure",
            CallLoopinvariant => "call_loopinvariant",
            CondCall => "cond_call",
            GuardTrue => "guard_true",
            GuardFalse => "guard_false",
            GuardValue => "guard_value",
            GuardClass => "guard_class",
            GuardNonnull => "guard_nonnull",
            GuardIsnull => "guard_isnull",
            GuardNonnullClass => "guard_nonnull_class",
            GuardIsObject => "guard_is_object",
            GuardGcType => "guard_gc_type",
            GuardSubclass => "guard_subclass",
            GuardNoException => "guard_no_exception",
            GuardNotInvalidated => "guard_not_invalidated",
            GuardFutureCondition => "guard_future_condition",
            GuardEarlyExit => "guard_early_exit",
            RecordExactClass => "record_exact_class",
            VecIntAdd => "vec_int_add",
            VecIntSub => "vec_int_sub",
            VecIntMul => "vec_int_mul",
            VecIntSignext => "vec_int_signext",
            VecFloatAdd => "vec_float_add",
            VecFloatSub => "vec_float_sub",
            VecFloatMul => "vec_float_mul",
            VecFloatEq => "vec_float_eq",
            VecGetarrayitemRaw => "vec_getarrayitem_raw",
            VecRawLoad => "vec_raw_load",
            VecSetarrayitemRaw => "vec_setarrayitem_raw",
            VecRawStore => "vec_raw_store",
            VecCastFloatToSinglefloat => "vec_cast_float_to_singlefloat",
            VecCastSinglefloatToFloat => "vec_cast_singlefloat_to_float",
            VecCastFloatToInt => "vec_cast_float_to_int",
            VecCastIntToFloat => "vec_cast_int_to_float",
            VecIntPack => "vec_int_pack",
            VecIntUnpack => "vec_int_unpack",
            VecIntExpand => "vec_int_expand",
            VecFloatPack => "vec_float_pack",
            VecFloatUnpack => "vec_float_unpack",
            VecFloatExpand => "vec_float_expand",
            VecBox => "vec_box",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
