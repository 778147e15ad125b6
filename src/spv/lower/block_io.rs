//! Loads/stores (and atomics) on UBOs, SSBOs and push constants, all of
//! which are lowered to explicit byte offsets, following the block's layout.

use super::ssa::SsaValue;
use super::types::TypeInfo;
use super::values::DerefValue;
use super::{Error, Translator};
use crate::builder::FuncBuilder;
use crate::spv;
use crate::{
    AluOp, ArrayIndex, AtomicOp, Deref, DerefLink, IntrinsicOp, ScalarKind, Type, TypeDef, Value,
    VarMode,
};
use smallvec::SmallVec;
use std::rc::Rc;

/// Byte offset into a block, with the constant part kept separate until the
/// access itself, so that equivalent access chains produce the same offsets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(super) struct BlockOffset {
    pub constant: u32,
    pub indirect: Option<Value>,
}

impl BlockOffset {
    pub const ZERO: Self = Self { constant: 0, indirect: None };

    /// Offsets wrap around like the 32-bit `iadd`/`imul` of `indirect` do
    /// (e.g. for constant out-of-bounds indices).
    pub fn plus(self, bytes: u32) -> Self {
        Self { constant: self.constant.wrapping_add(bytes), ..self }
    }

    pub fn plus_index(self, fb: &mut FuncBuilder, index: ArrayIndex, stride: u32) -> Self {
        match index {
            ArrayIndex::Direct(i) => self.plus(i.wrapping_mul(stride)),
            ArrayIndex::Indirect(i) => {
                let stride = fb.imm_u32(stride);
                let scaled = fb.alu2(AluOp::Imul, i, stride);
                let indirect = match self.indirect {
                    Some(indirect) => fb.alu2(AluOp::Iadd, indirect, scaled),
                    None => scaled,
                };
                Self { indirect: Some(indirect), ..self }
            }
        }
    }

    pub fn materialize(self, fb: &mut FuncBuilder) -> Value {
        match self.indirect {
            Some(indirect) if self.constant == 0 => indirect,
            Some(indirect) => {
                let constant = fb.imm_u32(self.constant);
                fb.alu2(AluOp::Iadd, indirect, constant)
            }
            None => fb.imm_u32(self.constant),
        }
    }

    /// Offset of `path` (with no matrix or vector in the middle of it)
    /// within a value of type `ty`, along with the type it leads to.
    pub fn of_path(
        fb: &mut FuncBuilder,
        mut ty: Rc<TypeInfo>,
        path: &[DerefLink],
    ) -> (Self, Rc<TypeInfo>) {
        let mut offset = Self::ZERO;
        for &link in path {
            let next = match link {
                DerefLink::Struct(member) => {
                    offset = offset.plus(ty.offsets[member as usize]);
                    ty.members[member as usize].clone()
                }
                DerefLink::Array(index) => {
                    offset = offset.plus_index(fb, index, ty.stride);
                    ty.element().clone()
                }
            };
            ty = next;
        }
        (offset, ty)
    }
}

#[derive(Copy, Clone, Debug)]
enum BlockTarget {
    Ubo(Value),
    Ssbo(Value),
    PushConstant,
}

impl<'a> Translator<'a> {
    /// The `vulkan_resource_index` for the block `deref` points into, along
    /// with the rest of the path (past the array of blocks, if any) and the
    /// layout of the (single) block itself.
    fn block_resource_index<'d>(
        &mut self,
        deref: &'d Deref,
        ty: &Rc<TypeInfo>,
    ) -> (Value, &'d [DerefLink], Rc<TypeInfo>) {
        let decl = &self.module.vars[deref.var];
        let (desc_set, binding, mode) =
            (decl.data.descriptor_set, decl.data.binding, decl.mode);
        let is_array = matches!(self.cx[ty.ty], TypeDef::Array { .. });

        let fb = self.fb();
        let (array_index, path, ty) = match deref.path.first() {
            Some(&DerefLink::Array(index)) if is_array => {
                let index = match index {
                    ArrayIndex::Direct(i) => fb.imm_u32(i),
                    ArrayIndex::Indirect(i) => i,
                };
                (index, &deref.path[1..], ty.element().clone())
            }
            _ => {
                assert!(!is_array, "array of blocks accessed as a whole");
                (fb.imm_u32(0), &deref.path[..], ty.clone())
            }
        };
        let index = fb.intrinsic(
            IntrinsicOp::VulkanResourceIndex { desc_set, binding, mode },
            &[],
            &[array_index],
            Some(1),
        );
        (Value::Inst(index), path, ty)
    }

    fn block_target<'d>(
        &mut self,
        ptr: &'d DerefValue,
    ) -> (BlockTarget, &'d [DerefLink], Rc<TypeInfo>) {
        let decl = &self.module.vars[ptr.deref.var];
        match decl.mode {
            // Push constants are the only descriptor-less blocks.
            VarMode::Uniform if decl.data.descriptor_set == -1 => {
                (BlockTarget::PushConstant, &ptr.deref.path[..], ptr.ty.clone())
            }
            VarMode::Uniform => {
                let (index, path, ty) = self.block_resource_index(&ptr.deref, &ptr.ty);
                (BlockTarget::Ubo(index), path, ty)
            }
            VarMode::ShaderStorage => {
                let (index, path, ty) = self.block_resource_index(&ptr.deref, &ptr.ty);
                (BlockTarget::Ssbo(index), path, ty)
            }
            mode => unreachable!("{mode:?} variables aren't blocks"),
        }
    }

    pub(super) fn block_load(&mut self, src: &DerefValue) -> Rc<SsaValue> {
        let (target, path, ty) = self.block_target(src);
        self.block_access(target, BlockOffset::ZERO, path, &ty, None)
            .expect("loads always produce a value")
    }

    pub(super) fn block_store(&mut self, value: &Rc<SsaValue>, dest: &DerefValue) {
        let (target, path, ty) = self.block_target(dest);
        self.block_access(target, BlockOffset::ZERO, path, &ty, Some(value));
    }

    /// Load (if `value` is `None`), or store `value`, through `path` (from
    /// `offset` onwards, within a value of type `ty`).
    fn block_access(
        &mut self,
        target: BlockTarget,
        offset: BlockOffset,
        path: &[DerefLink],
        ty: &Rc<TypeInfo>,
        value: Option<&Rc<SsaValue>>,
    ) -> Option<Rc<SsaValue>> {
        let cx = self.cx.clone();
        match cx[ty.ty] {
            TypeDef::Scalar(_) | TypeDef::Vector { .. } if path.is_empty() => {
                self.block_access_leaf(target, offset, ty.ty, value)
            }

            TypeDef::Matrix { rows, cols } => match path.split_first() {
                // The whole matrix, one column (or row, if row-major) at a time.
                None => {
                    let (count, width) = if ty.row_major { (rows, cols) } else { (cols, rows) };
                    let vector_ty = cx.vector_type(ScalarKind::Float, width);
                    let value = match value {
                        Some(value) if ty.row_major => Some(self.transpose(value)),
                        value => value.cloned(),
                    };
                    let elems: Option<Vec<_>> = (0..count)
                        .map(|i| {
                            let elem =
                                value.as_ref().map(|value| value.elems()[usize::from(i)].clone());
                            let offset = offset.plus(u32::from(i) * ty.stride);
                            self.block_access_leaf(target, offset, vector_ty, elem.as_ref())
                        })
                        .collect();
                    let matrix = SsaValue::aggregate(cx.matrix_type(width, count), elems?);
                    Some(if ty.row_major { self.transpose(&matrix) } else { matrix })
                }

                // One column of a row-major matrix: each component is in a
                // different row, `stride` bytes apart.
                Some((&DerefLink::Array(col), rest)) if ty.row_major => {
                    let fb = self.fb();
                    let offset = offset.plus_index(fb, col, 4);
                    match rest {
                        &[DerefLink::Array(row)] => {
                            let offset = offset.plus_index(fb, row, ty.stride);
                            let scalar_ty = cx.scalar_type(ScalarKind::Float);
                            self.block_access_leaf(target, offset, scalar_ty, value)
                        }
                        [] => {
                            let scalar_ty = cx.scalar_type(ScalarKind::Float);
                            let column_ty = cx.vector_type(ScalarKind::Float, rows);
                            let mut comps = SmallVec::<[Value; 4]>::new();
                            for i in 0..rows {
                                let offset = offset.plus(u32::from(i) * ty.stride);
                                let elem = value.map(|value| {
                                    let comp = self.fb().channel(value.def(), i);
                                    SsaValue::leaf(scalar_ty, comp)
                                });
                                let loaded = self.block_access_leaf(
                                    target,
                                    offset,
                                    scalar_ty,
                                    elem.as_ref(),
                                );
                                comps.extend(loaded.map(|loaded| loaded.def()));
                            }
                            value
                                .is_none()
                                .then(|| SsaValue::leaf(column_ty, self.fb().vec(&comps)))
                        }
                        _ => unreachable!("row-major matrix column indexed too deeply"),
                    }
                }

                // Column-major columns (and their components) are just arrays.
                Some(_) => self.block_access_elements(target, offset, path, ty, value),
            },

            // A single component of a vector.
            TypeDef::Vector { .. } | TypeDef::Array { .. } => {
                self.block_access_elements(target, offset, path, ty, value)
            }

            TypeDef::Struct { .. } => match path.split_first() {
                Some((&DerefLink::Struct(member), rest)) => {
                    let member = member as usize;
                    let offset = offset.plus(ty.offsets[member]);
                    self.block_access(target, offset, rest, &ty.members[member], value)
                }
                Some((link, _)) => unreachable!("{link:?} into a struct"),
                None => {
                    let elems: Option<Vec<_>> = (0..ty.members.len())
                        .map(|member| {
                            let elem = value.map(|value| value.elems()[member].clone());
                            let offset = offset.plus(ty.offsets[member]);
                            self.block_access(
                                target,
                                offset,
                                &[],
                                &ty.members[member],
                                elem.as_ref(),
                            )
                        })
                        .collect();
                    Some(SsaValue::aggregate(ty.ty, elems?))
                }
            },

            ref def => unreachable!("{def:?} in a block"),
        }
    }

    /// Arrays, column-major matrices and vectors: `stride` bytes per element.
    fn block_access_elements(
        &mut self,
        target: BlockTarget,
        offset: BlockOffset,
        path: &[DerefLink],
        ty: &Rc<TypeInfo>,
        value: Option<&Rc<SsaValue>>,
    ) -> Option<Rc<SsaValue>> {
        match path.split_first() {
            Some((&DerefLink::Array(index), rest)) => {
                let offset = offset.plus_index(self.fb(), index, ty.stride);
                self.block_access(target, offset, rest, ty.element(), value)
            }
            Some((link, _)) => unreachable!("{link:?} into an array"),
            None => {
                let len = self.cx.aggregate_len(ty.ty) as u32;
                assert!(len > 0, "runtime arrays can't be accessed as a whole");
                let elems: Option<Vec<_>> = (0..len)
                    .map(|i| {
                        let elem = value.map(|value| value.elems()[i as usize].clone());
                        let offset = offset.plus(i * ty.stride);
                        self.block_access(target, offset, &[], ty.element(), elem.as_ref())
                    })
                    .collect();
                Some(SsaValue::aggregate(ty.ty, elems?))
            }
        }
    }

    /// The actual load/store instruction, for one scalar or vector.
    fn block_access_leaf(
        &mut self,
        target: BlockTarget,
        offset: BlockOffset,
        ty: Type,
        value: Option<&Rc<SsaValue>>,
    ) -> Option<Rc<SsaValue>> {
        let def = &self.cx[ty];
        let num_components = def.vector_elements();
        let is_bool = def.scalar_kind() == Some(ScalarKind::Bool);
        let push_constant_range = self.module.info.num_uniforms;

        let fb = self.fb();
        let offset = offset.materialize(fb);
        match value {
            None => {
                let (op, inputs): (_, SmallVec<[Value; 2]>) = match target {
                    BlockTarget::Ubo(index) => (IntrinsicOp::LoadUbo, [index, offset].into()),
                    BlockTarget::Ssbo(index) => (IntrinsicOp::LoadSsbo, [index, offset].into()),
                    BlockTarget::PushConstant => (
                        IntrinsicOp::LoadPushConstant { base: 0, range: push_constant_range },
                        [offset].into_iter().collect(),
                    ),
                };
                let loaded = Value::Inst(fb.intrinsic(op, &[], &inputs, Some(num_components)));
                Some(SsaValue::leaf(ty, bool_from_memory(fb, loaded, is_bool)))
            }
            Some(value) => {
                let BlockTarget::Ssbo(index) = target else {
                    unreachable!("only SSBOs can be stored to")
                };
                let write_mask = (1u8 << num_components) - 1;
                fb.intrinsic(
                    IntrinsicOp::StoreSsbo { write_mask },
                    &[],
                    &[value.def(), index, offset],
                    None,
                );
                None
            }
        }
    }

    /// Atomic operation and its data operands (`OpAtomic*` operands start at
    /// word 6, past the pointer/scope/semantics, the same for images).
    pub(super) fn atomic_operands(
        &mut self,
        inst: spv::Inst<'a>,
    ) -> (AtomicOp, SmallVec<[Value; 2]>) {
        use spirv::Op;
        let w = inst.words;
        let op = inst.op().expect("dispatched on a known opcode");
        let mut data = SmallVec::new();
        let atomic_op = match op {
            Op::AtomicIIncrement | Op::AtomicIDecrement => {
                let delta = if op == Op::AtomicIIncrement { 1 } else { -1 };
                data.push(self.fb().imm_i32(delta));
                AtomicOp::Add
            }
            Op::AtomicISub => {
                let x = self.ssa_leaf(w[6]);
                data.push(self.fb().alu1(AluOp::Ineg, x));
                AtomicOp::Add
            }
            Op::AtomicCompareExchange | Op::AtomicCompareExchangeWeak => {
                // Operands are (after both semantics) the value, then the comparator.
                let (value, comparator) = (self.ssa_leaf(w[7]), self.ssa_leaf(w[8]));
                data.extend([comparator, value]);
                AtomicOp::CompSwap
            }
            _ => {
                data.push(self.ssa_leaf(w[6]));
                match op {
                    Op::AtomicExchange => AtomicOp::Exchange,
                    Op::AtomicIAdd => AtomicOp::Add,
                    Op::AtomicSMin => AtomicOp::Imin,
                    Op::AtomicUMin => AtomicOp::Umin,
                    Op::AtomicSMax => AtomicOp::Imax,
                    Op::AtomicUMax => AtomicOp::Umax,
                    Op::AtomicAnd => AtomicOp::And,
                    Op::AtomicOr => AtomicOp::Or,
                    Op::AtomicXor => AtomicOp::Xor,
                    _ => unreachable!("{op:?} is not an atomic instruction"),
                }
            }
        };
        (atomic_op, data)
    }

    pub(super) fn handle_ssbo_atomic(&mut self, inst: spv::Inst<'a>) -> Result<(), Error> {
        let w = inst.words;
        let ptr = self.values.deref(w[3]).clone();
        if self.module.vars[ptr.deref.var].mode != VarMode::ShaderStorage
            || !self.is_external_block(ptr.deref.var)
        {
            return Err(Error::unsupported("atomics outside of SSBOs and images"));
        }

        let (index, path, ty) = self.block_resource_index(&ptr.deref, &ptr.ty);
        let (offset, _) = BlockOffset::of_path(self.fb(), ty, path);
        let offset = offset.materialize(self.fb());
        let (op, data) = self.atomic_operands(inst);

        let inputs: SmallVec<[Value; 4]> = [index, offset].into_iter().chain(data).collect();
        let result = self.fb().intrinsic(IntrinsicOp::SsboAtomic(op), &[], &inputs, Some(1));
        let result_ty = self.values.ty(w[1]).ty;
        self.push_leaf(w[2], result_ty, Value::Inst(result));
        Ok(())
    }

    /// `OpArrayLength`: `(buffer_size - offset) / stride`, for the trailing
    /// runtime array of an SSBO.
    pub(super) fn handle_array_length(&mut self, inst: spv::Inst<'a>) -> Result<(), Error> {
        let w = inst.words;
        let ptr = self.values.deref(w[3]).clone();
        let member = w[4] as usize;
        assert!(self.is_external_block(ptr.deref.var), "OpArrayLength on a non-block");

        let (index, path, block_ty) = self.block_resource_index(&ptr.deref, &ptr.ty);
        assert!(path.is_empty(), "OpArrayLength must point to the whole block");
        let (offset, stride) = (block_ty.offsets[member], block_ty.members[member].stride);

        let fb = self.fb();
        let size = Value::Inst(fb.intrinsic(IntrinsicOp::GetBufferSize, &[], &[index], Some(1)));
        let offset = fb.imm_u32(offset);
        let remaining = fb.alu2(AluOp::Isub, size, offset);
        let zero = fb.imm_u32(0);
        let remaining = fb.alu2(AluOp::Imax, remaining, zero);
        let stride = fb.imm_u32(stride);
        let len = fb.alu2(AluOp::Udiv, remaining, stride);

        let result_ty = self.values.ty(w[1]).ty;
        self.push_leaf(w[2], result_ty, len);
        Ok(())
    }
}

/// Booleans are stored as 32-bit integers, with any non-zero value being `true`.
fn bool_from_memory(fb: &mut FuncBuilder, loaded: Value, is_bool: bool) -> Value {
    if is_bool {
        let zero = fb.imm_u32(0);
        fb.alu2(AluOp::Ine, loaded, zero)
    } else {
        loaded
    }
}
