//! Constants (including specialization constants, at their default values).

use super::ssa::SsaValue;
use super::types::TypeInfo;
use super::values::SpvValue;
use super::{Error, Translator};
use crate::spv;
use crate::{Const, ConstDef, ConstKind, Context, Type, TypeDef};
use smallvec::SmallVec;
use std::rc::Rc;

const TRUE: u32 = !0;
const FALSE: u32 = 0;

/// All-zero constant of type `ty` (`OpConstantNull`).
fn null_constant(cx: &Context, ty: Type) -> Const {
    let kind = match &cx[ty] {
        TypeDef::Scalar(_) | TypeDef::Vector { .. } | TypeDef::Matrix { .. } => {
            let def = &cx[ty];
            let len = usize::from(def.vector_elements()) * usize::from(def.matrix_columns());
            ConstKind::Scalars(SmallVec::from_elem(0, len))
        }
        &TypeDef::Array { elem, len } => {
            ConstKind::Composite(SmallVec::from_elem(null_constant(cx, elem), len as usize))
        }
        TypeDef::Struct { fields } => {
            ConstKind::Composite(fields.iter().map(|&field| null_constant(cx, field)).collect())
        }
        def => unreachable!("no null constant of type {def:?}"),
    };
    cx.intern(ConstDef { ty, kind })
}

impl<'a> Translator<'a> {
    pub(super) fn handle_constant(&mut self, inst: spv::Inst<'a>) -> Result<(), Error> {
        use spirv::Op;
        let cx = self.cx.clone();
        let w = inst.words;
        let ty: Rc<TypeInfo> = self.values.ty(w[1]).clone();
        let op = inst.op().expect("dispatched on a known opcode");

        let scalars = |words: &[u32]| ConstKind::Scalars(words.iter().copied().collect());
        let kind = match op {
            Op::ConstantTrue | Op::SpecConstantTrue => scalars(&[TRUE]),
            Op::ConstantFalse | Op::SpecConstantFalse => scalars(&[FALSE]),
            Op::Constant | Op::SpecConstant => {
                assert!(cx[ty.ty].is_scalar(), "OpConstant of non-scalar type");
                scalars(inst.from(3))
            }
            Op::ConstantComposite | Op::SpecConstantComposite => {
                let elems: SmallVec<[Const; 4]> =
                    inst.from(3).iter().map(|&elem| self.values.constant(elem).1).collect();
                match cx[ty.ty] {
                    // Vectors, and matrices (column after column), are flattened.
                    TypeDef::Vector { .. } | TypeDef::Matrix { .. } => {
                        let mut words = SmallVec::new();
                        for elem in elems {
                            match &cx[elem].kind {
                                ConstKind::Scalars(elem_words) => {
                                    words.extend_from_slice(elem_words)
                                }
                                ConstKind::Composite(_) => {
                                    unreachable!("vector/matrix made of aggregates")
                                }
                            }
                        }
                        ConstKind::Scalars(words)
                    }
                    TypeDef::Array { .. } | TypeDef::Struct { .. } => ConstKind::Composite(elems),
                    ref def => unreachable!("composite constant of type {def:?}"),
                }
            }
            Op::ConstantNull => {
                let value = null_constant(&cx, ty.ty);
                self.values.push(w[2], SpvValue::Constant { ty, value });
                return Ok(());
            }
            Op::ConstantSampler => return Err(Error::unsupported("OpConstantSampler")),
            Op::SpecConstantOp => return Err(Error::unsupported("OpSpecConstantOp")),
            _ => unreachable!("{op:?} is not a constant instruction"),
        };

        let value = cx.intern(ConstDef { ty: ty.ty, kind });
        self.values.push(w[2], SpvValue::Constant { ty, value });
        Ok(())
    }

    /// The scalar value of constant `id` (e.g. a struct member index).
    pub(super) fn const_u32(&self, id: spv::Id) -> u32 {
        let (_, value) = self.values.constant(id);
        match &self.cx[value].kind {
            ConstKind::Scalars(words) => words[0],
            ConstKind::Composite(_) => unreachable!("%{id} is not a scalar constant"),
        }
    }

    /// Materialize a constant in the current function (only once per function).
    pub(super) fn const_ssa(&mut self, konst: Const) -> Rc<SsaValue> {
        if let Some(ssa) = self.func_state().consts.get(&konst) {
            return ssa.clone();
        }

        let cx = self.cx.clone();
        let def = &cx[konst];
        let ssa = match &def.kind {
            ConstKind::Scalars(words) => match cx[def.ty] {
                TypeDef::Matrix { rows, cols } => {
                    let column_ty = cx.element_type(def.ty);
                    let rows = usize::from(rows);
                    let fb = self.fb();
                    let columns = (0..usize::from(cols))
                        .map(|c| SsaValue::leaf(column_ty, fb.imm(&words[c * rows..][..rows])))
                        .collect();
                    SsaValue::aggregate(def.ty, columns)
                }
                _ => SsaValue::leaf(def.ty, self.fb().imm(words)),
            },
            ConstKind::Composite(elems) => {
                let elems = elems.iter().map(|&elem| self.const_ssa(elem)).collect();
                SsaValue::aggregate(def.ty, elems)
            }
        };
        self.func_state().consts.insert(konst, ssa.clone());
        ssa
    }
}
