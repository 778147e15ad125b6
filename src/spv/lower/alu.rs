//! Arithmetic, logic, comparison and conversion instructions, including the
//! matrix ones (which operate on one column at a time).

use super::ssa::SsaValue;
use super::{Error, Translator};
use crate::spv;
use crate::{AluOp, ScalarKind, TypeDef, Value};
use smallvec::SmallVec;
use std::rc::Rc;

/// ALU op implementing `op` directly, and whether its two operands need to
/// be swapped (greater-than and less-or-equal being expressed in terms of
/// less-than and greater-or-equal, respectively).
fn direct_alu_op(op: spirv::Op) -> Option<(AluOp, bool)> {
    use spirv::Op;
    Some(match op {
        Op::SNegate => (AluOp::Ineg, false),
        Op::FNegate => (AluOp::Fneg, false),
        Op::Not | Op::LogicalNot => (AluOp::Inot, false),

        Op::IAdd => (AluOp::Iadd, false),
        Op::FAdd => (AluOp::Fadd, false),
        Op::ISub => (AluOp::Isub, false),
        Op::FSub => (AluOp::Fsub, false),
        Op::IMul => (AluOp::Imul, false),
        Op::FMul | Op::VectorTimesScalar => (AluOp::Fmul, false),
        Op::UDiv => (AluOp::Udiv, false),
        Op::SDiv => (AluOp::Idiv, false),
        Op::FDiv => (AluOp::Fdiv, false),
        Op::UMod => (AluOp::Umod, false),
        Op::FMod => (AluOp::Fmod, false),

        Op::ShiftRightLogical => (AluOp::Ushr, false),
        Op::ShiftRightArithmetic => (AluOp::Ishr, false),
        Op::ShiftLeftLogical => (AluOp::Ishl, false),
        Op::LogicalOr | Op::BitwiseOr => (AluOp::Ior, false),
        Op::LogicalAnd | Op::BitwiseAnd => (AluOp::Iand, false),
        Op::BitwiseXor => (AluOp::Ixor, false),
        Op::LogicalEqual | Op::IEqual => (AluOp::Ieq, false),
        Op::LogicalNotEqual | Op::INotEqual => (AluOp::Ine, false),

        Op::BitFieldInsert => (AluOp::BitfieldInsert, false),
        Op::BitFieldSExtract => (AluOp::IbitfieldExtract, false),
        Op::BitFieldUExtract => (AluOp::UbitfieldExtract, false),
        Op::BitReverse => (AluOp::BitfieldReverse, false),
        Op::BitCount => (AluOp::BitCount, false),

        // FIXME: unordered comparisons should also be true for NaNs.
        Op::FOrdEqual | Op::FUnordEqual => (AluOp::Feq, false),
        Op::FOrdNotEqual | Op::FUnordNotEqual => (AluOp::Fne, false),
        Op::ULessThan => (AluOp::Ult, false),
        Op::SLessThan => (AluOp::Ilt, false),
        Op::FOrdLessThan | Op::FUnordLessThan => (AluOp::Flt, false),
        Op::UGreaterThan => (AluOp::Ult, true),
        Op::SGreaterThan => (AluOp::Ilt, true),
        Op::FOrdGreaterThan | Op::FUnordGreaterThan => (AluOp::Flt, true),
        Op::ULessThanEqual => (AluOp::Uge, true),
        Op::SLessThanEqual => (AluOp::Ige, true),
        Op::FOrdLessThanEqual | Op::FUnordLessThanEqual => (AluOp::Fge, true),
        Op::UGreaterThanEqual => (AluOp::Uge, false),
        Op::SGreaterThanEqual => (AluOp::Ige, false),
        Op::FOrdGreaterThanEqual | Op::FUnordGreaterThanEqual => (AluOp::Fge, false),

        Op::ConvertFToU => (AluOp::F2u, false),
        Op::ConvertFToS => (AluOp::F2i, false),
        Op::ConvertSToF => (AluOp::I2f, false),
        Op::ConvertUToF => (AluOp::U2f, false),
        // Everything is 32-bit, so these don't change any bits.
        Op::Bitcast | Op::UConvert | Op::SConvert => (AluOp::Imov, false),
        Op::FConvert => (AluOp::Fmov, false),
        Op::QuantizeToF16 => (AluOp::Fquantize2f16, false),

        Op::DPdx => (AluOp::Fddx, false),
        Op::DPdy => (AluOp::Fddy, false),
        Op::DPdxFine => (AluOp::FddxFine, false),
        Op::DPdyFine => (AluOp::FddyFine, false),
        Op::DPdxCoarse => (AluOp::FddxCoarse, false),
        Op::DPdyCoarse => (AluOp::FddyCoarse, false),

        _ => return None,
    })
}

/// Whether `op` has a (non-direct) lowering in `handle_alu`.
fn is_lowered_alu_op(op: spirv::Op) -> bool {
    use spirv::Op;
    matches!(
        op,
        Op::Select
            | Op::Any
            | Op::All
            | Op::Dot
            | Op::OuterProduct
            | Op::Transpose
            | Op::MatrixTimesScalar
            | Op::VectorTimesMatrix
            | Op::MatrixTimesVector
            | Op::MatrixTimesMatrix
            | Op::IAddCarry
            | Op::ISubBorrow
            | Op::UMulExtended
            | Op::SMulExtended
            | Op::SRem
            | Op::SMod
            | Op::FRem
            | Op::Fwidth
            | Op::FwidthFine
            | Op::FwidthCoarse
            | Op::IsNan
            | Op::IsInf
    )
}

pub(super) fn fdot_op(num_components: u8) -> AluOp {
    match num_components {
        2 => AluOp::Fdot2,
        3 => AluOp::Fdot3,
        4 => AluOp::Fdot4,
        _ => unreachable!("no fdot{num_components} ALU op"),
    }
}

impl<'a> Translator<'a> {
    pub(super) fn handle_alu(&mut self, inst: spv::Inst<'a>) -> Result<(), Error> {
        use spirv::Op;
        let w = inst.words;
        let op = match inst.op() {
            Some(op) if direct_alu_op(op).is_some() || is_lowered_alu_op(op) => op,
            Some(op) => return Err(Error::unsupported(format!("Op{op:?}"))),
            None => return Err(Error::unsupported(format!("opcode {}", inst.opcode))),
        };
        let cx = self.cx.clone();
        let ty = self.values.ty(w[1]).ty;

        let srcs: SmallVec<[Rc<SsaValue>; 4]> =
            inst.from(3).iter().map(|&src| self.ssa_value(src)).collect();

        if op == Op::Select {
            let result = self.select(srcs[0].def(), &srcs[1], &srcs[2]);
            self.push_ssa(w[2], result);
            return Ok(());
        }

        if srcs.iter().any(|src| cx[src.ty].is_matrix()) {
            let result = self.matrix_alu(op, &srcs)?;
            self.push_ssa(w[2], result);
            return Ok(());
        }

        let src: SmallVec<[Value; 4]> = srcs.iter().map(|src| src.def()).collect();
        let fb = self.fb();
        let def = match op {
            Op::Any | Op::All => match fb.num_components(src[0]) {
                1 => fb.alu1(AluOp::Imov, src[0]),
                n => {
                    let (op, other) = if op == Op::Any {
                        let any_op =
                            [AluOp::BanyInequal2, AluOp::BanyInequal3, AluOp::BanyInequal4];
                        (any_op[usize::from(n) - 2], fb.imm_zero(n))
                    } else {
                        let all_op = [AluOp::BallIequal2, AluOp::BallIequal3, AluOp::BallIequal4];
                        (all_op[usize::from(n) - 2], fb.imm(&vec![!0; usize::from(n)]))
                    };
                    fb.alu2(op, src[0], other)
                }
            },

            Op::Dot => match fb.num_components(src[0]) {
                1 => fb.alu2(AluOp::Fmul, src[0], src[1]),
                n => fb.alu2(fdot_op(n), src[0], src[1]),
            },

            Op::OuterProduct => {
                let column_ty = cx.element_type(ty);
                let columns = (0..fb.num_components(src[1]))
                    .map(|i| {
                        let scale = fb.channel(src[1], i);
                        SsaValue::leaf(column_ty, fb.alu2(AluOp::Fmul, src[0], scale))
                    })
                    .collect();
                self.push_ssa(w[2], SsaValue::aggregate(ty, columns));
                return Ok(());
            }

            Op::IAddCarry | Op::ISubBorrow | Op::UMulExtended | Op::SMulExtended => {
                let (low_op, high_op) = match op {
                    Op::IAddCarry => (AluOp::Iadd, AluOp::UaddCarry),
                    Op::ISubBorrow => (AluOp::Isub, AluOp::UsubBorrow),
                    Op::UMulExtended => (AluOp::Imul, AluOp::UmulHigh),
                    _ => (AluOp::Imul, AluOp::ImulHigh),
                };
                let TypeDef::Struct { fields } = &cx[ty] else {
                    unreachable!("Op{op:?} must produce a struct")
                };
                let low = fb.alu2(low_op, src[0], src[1]);
                let high = fb.alu2(high_op, src[0], src[1]);
                let elems = vec![SsaValue::leaf(fields[0], low), SsaValue::leaf(fields[1], high)];
                self.push_ssa(w[2], SsaValue::aggregate(ty, elems));
                return Ok(());
            }

            // Remainders take the sign of the dividend, and modulos that of the divisor.
            Op::SRem | Op::SMod => {
                let (a, b) = (src[0], src[1]);
                let abs_a = fb.alu1(AluOp::Iabs, a);
                let abs_b = fb.alu1(AluOp::Iabs, b);
                let abs_rem = fb.alu2(AluOp::Umod, abs_a, abs_b);
                let neg_rem = fb.alu1(AluOp::Ineg, abs_rem);
                let zero = fb.imm_i32(0);
                let a_is_neg = fb.alu2(AluOp::Ilt, a, zero);
                let rem = fb.alu3(AluOp::Bcsel, a_is_neg, neg_rem, abs_rem);
                if op == Op::SRem {
                    rem
                } else {
                    let b_is_neg = fb.alu2(AluOp::Ilt, b, zero);
                    let signs_differ = fb.alu2(AluOp::Ine, a_is_neg, b_is_neg);
                    let rem_is_nonzero = fb.alu2(AluOp::Ine, rem, zero);
                    let needs_fixup = fb.alu2(AluOp::Iand, signs_differ, rem_is_nonzero);
                    let fixed = fb.alu2(AluOp::Iadd, rem, b);
                    fb.alu3(AluOp::Bcsel, needs_fixup, fixed, rem)
                }
            }
            Op::FRem => {
                let (a, b) = (src[0], src[1]);
                let quotient = fb.alu2(AluOp::Fdiv, a, b);
                let truncated = fb.alu1(AluOp::Ftrunc, quotient);
                let multiple = fb.alu2(AluOp::Fmul, b, truncated);
                fb.alu2(AluOp::Fsub, a, multiple)
            }

            Op::Fwidth | Op::FwidthFine | Op::FwidthCoarse => {
                let (ddx_op, ddy_op) = match op {
                    Op::Fwidth => (AluOp::Fddx, AluOp::Fddy),
                    Op::FwidthFine => (AluOp::FddxFine, AluOp::FddyFine),
                    _ => (AluOp::FddxCoarse, AluOp::FddyCoarse),
                };
                let ddx = fb.alu1(ddx_op, src[0]);
                let ddy = fb.alu1(ddy_op, src[0]);
                let abs_ddx = fb.alu1(AluOp::Fabs, ddx);
                let abs_ddy = fb.alu1(AluOp::Fabs, ddy);
                fb.alu2(AluOp::Fadd, abs_ddx, abs_ddy)
            }

            Op::IsNan => fb.alu2(AluOp::Fne, src[0], src[0]),
            Op::IsInf => {
                let abs = fb.alu1(AluOp::Fabs, src[0]);
                let inf = fb.imm_f32(f32::INFINITY);
                fb.alu2(AluOp::Feq, abs, inf)
            }

            _ => {
                let (alu_op, swap) = direct_alu_op(op).expect("checked at the start");
                let mut src = src;
                if swap {
                    src.swap(0, 1);
                }
                fb.alu(alu_op, &src)
            }
        };
        self.push_leaf(w[2], ty, def);
        Ok(())
    }

    /// `OpSelect`, which (since SPIR-V 1.4) can also select whole composites.
    fn select(
        &mut self,
        cond: Value,
        a: &Rc<SsaValue>,
        b: &Rc<SsaValue>,
    ) -> Rc<SsaValue> {
        if self.cx[a.ty].is_vector_or_scalar() {
            let def = self.fb().alu3(AluOp::Bcsel, cond, a.def(), b.def());
            return SsaValue::leaf(a.ty, def);
        }
        let elems =
            a.elems().iter().zip(b.elems()).map(|(a, b)| self.select(cond, a, b)).collect();
        SsaValue::aggregate(a.ty, elems)
    }

    fn matrix_alu(
        &mut self,
        op: spirv::Op,
        srcs: &[Rc<SsaValue>],
    ) -> Result<Rc<SsaValue>, Error> {
        use spirv::Op;
        Ok(match op {
            Op::FNegate | Op::FAdd | Op::FSub => {
                let alu_op = match op {
                    Op::FNegate => AluOp::Fneg,
                    Op::FAdd => AluOp::Fadd,
                    _ => AluOp::Fsub,
                };
                let m = &srcs[0];
                let fb = self.fb();
                let columns = (0..m.elems().len())
                    .map(|i| {
                        let operands: SmallVec<[Value; 2]> =
                            srcs.iter().map(|src| src.elems()[i].def()).collect();
                        SsaValue::leaf(m.elems()[i].ty, fb.alu(alu_op, &operands))
                    })
                    .collect();
                SsaValue::aggregate(m.ty, columns)
            }

            Op::Transpose => self.transpose(&srcs[0]),

            Op::MatrixTimesScalar => {
                let scalar = srcs[1].def();
                match srcs[0].transposed.clone() {
                    Some(original) => {
                        let scaled = self.matrix_times_scalar(&original, scalar);
                        self.transpose(&scaled)
                    }
                    None => self.matrix_times_scalar(&srcs[0], scalar),
                }
            }

            // `v * M == transpose(M) * v`
            Op::VectorTimesMatrix => match srcs[1].transposed.clone() {
                Some(original) => self.matrix_multiply(&original, &srcs[0]),
                None => {
                    let (v, m) = (srcs[0].def(), &srcs[1]);
                    let ty = self.cx.vector_type(ScalarKind::Float, m.elems().len() as u8);
                    let fb = self.fb();
                    let comps: SmallVec<[Value; 4]> = m
                        .elems()
                        .iter()
                        .map(|column| {
                            let column = column.def();
                            let n = fb.num_components(column);
                            fb.alu2(fdot_op(n), column, v)
                        })
                        .collect();
                    SsaValue::leaf(ty, fb.vec(&comps))
                }
            },
            Op::MatrixTimesVector | Op::MatrixTimesMatrix => {
                self.matrix_multiply(&srcs[0], &srcs[1])
            }

            _ => return Err(Error::unsupported(format!("Op{op:?} on matrices"))),
        })
    }

    fn matrix_times_scalar(&mut self, m: &Rc<SsaValue>, scalar: Value) -> Rc<SsaValue> {
        let fb = self.fb();
        let columns = m
            .elems()
            .iter()
            .map(|column| SsaValue::leaf(column.ty, fb.alu2(AluOp::Fmul, column.def(), scalar)))
            .collect();
        SsaValue::aggregate(m.ty, columns)
    }

    /// `src0 * src1`, where `src1` can also be a (column) vector.
    fn matrix_multiply(&mut self, src0: &Rc<SsaValue>, src1: &Rc<SsaValue>) -> Rc<SsaValue> {
        let cx = self.cx.clone();

        let (mut a, mut b) = (src0.clone(), src1.clone());
        let mut a_rows = a.transposed.clone();
        let mut transpose_result = false;
        if let (Some(a_t), Some(b_t)) = (a.transposed.clone(), b.transposed.clone()) {
            // `A * B == transpose(transpose(B) * transpose(A))`
            (a, b) = (b_t, a_t);
            a_rows = None;
            transpose_result = true;
        }

        let columns_of = |v: &SsaValue| -> SmallVec<[Value; 4]> {
            if cx[v.ty].is_matrix() {
                v.elems().iter().map(|column| column.def()).collect()
            } else {
                [v.def()].into_iter().collect()
            }
        };
        let (a_columns, b_columns) = (columns_of(&a), columns_of(&b));
        let rows = cx[a.ty].vector_elements();
        let column_ty = cx.vector_type(ScalarKind::Float, rows);

        let fb = self.fb();
        let dest_columns: SmallVec<[Value; 4]> = b_columns
            .iter()
            .map(|&b_column| match &a_rows {
                // Rows of `a` are readily available, so each component of
                // the result is just a dot product.
                Some(a_t) => {
                    let comps: SmallVec<[Value; 4]> = a_t
                        .elems()
                        .iter()
                        .map(|row| {
                            let row = row.def();
                            let n = fb.num_components(row);
                            fb.alu2(fdot_op(n), row, b_column)
                        })
                        .collect();
                    fb.vec(&comps)
                }
                None => {
                    let first = fb.channel(b_column, 0);
                    let mut sum = fb.alu2(AluOp::Fmul, a_columns[0], first);
                    for (j, &a_column) in a_columns.iter().enumerate().skip(1) {
                        let scale = fb.channel(b_column, j as u8);
                        let term = fb.alu2(AluOp::Fmul, a_column, scale);
                        sum = fb.alu2(AluOp::Fadd, sum, term);
                    }
                    sum
                }
            })
            .collect();

        let dest = if dest_columns.len() == 1 {
            SsaValue::leaf(column_ty, dest_columns[0])
        } else {
            let dest_ty = cx.matrix_type(rows, dest_columns.len() as u8);
            let columns =
                dest_columns.iter().map(|&column| SsaValue::leaf(column_ty, column)).collect();
            SsaValue::aggregate(dest_ty, columns)
        };
        if transpose_result {
            self.transpose(&dest)
        } else {
            dest
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spirv::Op;

    #[test]
    fn inverted_comparisons_swap_operands() {
        assert_eq!(direct_alu_op(Op::SGreaterThan), Some((AluOp::Ilt, true)));
        assert_eq!(direct_alu_op(Op::FOrdLessThanEqual), Some((AluOp::Fge, true)));
        assert_eq!(direct_alu_op(Op::UGreaterThanEqual), Some((AluOp::Uge, false)));
        assert_eq!(direct_alu_op(Op::FUnordLessThan), Some((AluOp::Flt, false)));
    }

    #[test]
    fn lowered_ops_are_not_direct() {
        for op in [Op::Dot, Op::SMod, Op::Fwidth, Op::MatrixTimesVector, Op::Select] {
            assert!(is_lowered_alu_op(op));
            assert_eq!(direct_alu_op(op), None);
        }
        assert!(!is_lowered_alu_op(Op::IsFinite));
        assert_eq!(direct_alu_op(Op::IsFinite), None);
    }

    #[test]
    fn dot_ops_by_width() {
        assert_eq!(fdot_op(2), AluOp::Fdot2);
        assert_eq!(fdot_op(4), AluOp::Fdot4);
    }
}
