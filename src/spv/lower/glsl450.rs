//! `GLSL.std.450` extended instructions, most of which expand to several
//! ALU instructions.

use super::alu::fdot_op;
use super::ssa::SsaValue;
use super::{Error, Translator};
use crate::builder::FuncBuilder;
use crate::spv;
use crate::{AluOp, Value};
use smallvec::SmallVec;
use spirv::GLOp;
use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, LOG2_E};

fn length(fb: &mut FuncBuilder, v: Value) -> Value {
    let dot = match fb.num_components(v) {
        1 => fb.alu2(AluOp::Fmul, v, v),
        n => fb.alu2(fdot_op(n), v, v),
    };
    fb.alu1(AluOp::Fsqrt, dot)
}

fn dot(fb: &mut FuncBuilder, a: Value, b: Value) -> Value {
    match fb.num_components(a) {
        1 => fb.alu2(AluOp::Fmul, a, b),
        n => fb.alu2(fdot_op(n), a, b),
    }
}

fn fclamp(fb: &mut FuncBuilder, x: Value, min: Value, max: Value) -> Value {
    let clamped_below = fb.alu2(AluOp::Fmax, x, min);
    fb.alu2(AluOp::Fmin, clamped_below, max)
}

fn exp(fb: &mut FuncBuilder, x: Value) -> Value {
    let log2_e = fb.imm_f32(LOG2_E);
    let scaled = fb.alu2(AluOp::Fmul, x, log2_e);
    fb.alu1(AluOp::Fexp2, scaled)
}

fn log(fb: &mut FuncBuilder, x: Value) -> Value {
    let log2 = fb.alu1(AluOp::Flog2, x);
    let ln_2 = fb.imm_f32(1.0 / LOG2_E);
    fb.alu2(AluOp::Fmul, log2, ln_2)
}

/// `(exp(x), exp(-x))`, shared by the hyperbolic functions.
fn exp_pair(fb: &mut FuncBuilder, x: Value) -> (Value, Value) {
    let neg_x = fb.alu1(AluOp::Fneg, x);
    (exp(fb, x), exp(fb, neg_x))
}

/// Polynomial approximation of `asin(x)`, i.e.
/// `sign(x) * (π/2 - sqrt(1 - |x|) * (π/2 + |x| * (π/4 - 1 + |x| * (c0 + |x| * c1))))`.
fn asin(fb: &mut FuncBuilder, x: Value) -> Value {
    let abs_x = fb.alu1(AluOp::Fabs, x);
    let (c0, c1) = (fb.imm_f32(0.086566724), fb.imm_f32(-0.03102955));
    let (pi_2, pi_4_minus_1, one) =
        (fb.imm_f32(FRAC_PI_2), fb.imm_f32(FRAC_PI_4 - 1.0), fb.imm_f32(1.0));

    let mut poly = fb.alu2(AluOp::Fmul, abs_x, c1);
    poly = fb.alu2(AluOp::Fadd, c0, poly);
    poly = fb.alu2(AluOp::Fmul, abs_x, poly);
    poly = fb.alu2(AluOp::Fadd, pi_4_minus_1, poly);
    poly = fb.alu2(AluOp::Fmul, abs_x, poly);
    poly = fb.alu2(AluOp::Fadd, pi_2, poly);

    let one_minus_abs_x = fb.alu2(AluOp::Fsub, one, abs_x);
    let sqrt = fb.alu1(AluOp::Fsqrt, one_minus_abs_x);
    let scaled = fb.alu2(AluOp::Fmul, sqrt, poly);
    let unsigned = fb.alu2(AluOp::Fsub, pi_2, scaled);
    let sign = fb.alu1(AluOp::Fsign, x);
    fb.alu2(AluOp::Fmul, sign, unsigned)
}

const YZX: [u8; 3] = [1, 2, 0];
const ZXY: [u8; 3] = [2, 0, 1];

fn mat2_det(fb: &mut FuncBuilder, cols: &[Value]) -> Value {
    let yx = fb.swizzle(cols[1], &[1, 0]);
    let p = fb.alu2(AluOp::Fmul, cols[0], yx);
    let (p0, p1) = (fb.channel(p, 0), fb.channel(p, 1));
    fb.alu2(AluOp::Fsub, p0, p1)
}

fn mat3_det(fb: &mut FuncBuilder, cols: &[Value]) -> Value {
    let (c1_yzx, c1_zxy) = (fb.swizzle(cols[1], &YZX), fb.swizzle(cols[1], &ZXY));
    let (c2_yzx, c2_zxy) = (fb.swizzle(cols[2], &YZX), fb.swizzle(cols[2], &ZXY));
    let cross0 = fb.alu2(AluOp::Fmul, c1_yzx, c2_zxy);
    let cross1 = fb.alu2(AluOp::Fmul, c1_zxy, c2_yzx);
    let prod0 = fb.alu2(AluOp::Fmul, cols[0], cross0);
    let prod1 = fb.alu2(AluOp::Fmul, cols[0], cross1);
    let diff = fb.alu2(AluOp::Fsub, prod0, prod1);
    let (d0, d1, d2) = (fb.channel(diff, 0), fb.channel(diff, 1), fb.channel(diff, 2));
    let d12 = fb.alu2(AluOp::Fadd, d1, d2);
    fb.alu2(AluOp::Fadd, d0, d12)
}

/// All the components of `v` other than `skip` (out of the first `size`).
fn swizzle_without(fb: &mut FuncBuilder, v: Value, size: u8, skip: u8) -> Value {
    let comps: SmallVec<[u8; 4]> = (0..size).filter(|&i| i != skip).collect();
    fb.swizzle(v, &comps)
}

fn mat4_det(fb: &mut FuncBuilder, cols: &[Value]) -> Value {
    let subdets: SmallVec<[Value; 4]> = (0..4)
        .map(|i| {
            let subcols: SmallVec<[Value; 3]> =
                cols[1..].iter().map(|&col| swizzle_without(fb, col, 4, i)).collect();
            mat3_det(fb, &subcols)
        })
        .collect();
    let subdets = fb.vec(&subdets);
    let prod = fb.alu2(AluOp::Fmul, cols[0], subdets);
    let p: SmallVec<[Value; 4]> = (0..4).map(|i| fb.channel(prod, i)).collect();
    let p01 = fb.alu2(AluOp::Fsub, p[0], p[1]);
    let p23 = fb.alu2(AluOp::Fsub, p[2], p[3]);
    fb.alu2(AluOp::Fadd, p01, p23)
}

fn mat_det(fb: &mut FuncBuilder, cols: &[Value]) -> Value {
    match cols.len() {
        2 => mat2_det(fb, cols),
        3 => mat3_det(fb, cols),
        4 => mat4_det(fb, cols),
        n => unreachable!("determinant of a {n}x{n} matrix"),
    }
}

/// Determinant of the submatrix without row `row` and column `col`.
fn mat_subdet(fb: &mut FuncBuilder, cols: &[Value], row: u8, col: u8) -> Value {
    let size = cols.len() as u8;
    if size == 2 {
        return fb.channel(cols[usize::from(1 - col)], 1 - row);
    }
    let subcols: SmallVec<[Value; 3]> = (0..size)
        .filter(|&j| j != col)
        .map(|j| swizzle_without(fb, cols[usize::from(j)], size, row))
        .collect();
    mat_det(fb, &subcols)
}

/// Inverse, as the adjugate divided by the determinant.
fn mat_inverse(fb: &mut FuncBuilder, cols: &[Value]) -> SmallVec<[Value; 4]> {
    let size = cols.len() as u8;
    let adjugate: SmallVec<[Value; 4]> = (0..size)
        .map(|c| {
            let elems: SmallVec<[Value; 4]> = (0..size)
                .map(|r| {
                    let cofactor = mat_subdet(fb, cols, c, r);
                    if (r + c) % 2 == 1 {
                        fb.alu1(AluOp::Fneg, cofactor)
                    } else {
                        cofactor
                    }
                })
                .collect();
            fb.vec(&elems)
        })
        .collect();
    let det = mat_det(fb, cols);
    let inv_det = fb.alu1(AluOp::Frcp, det);
    adjugate.iter().map(|&column| fb.alu2(AluOp::Fmul, column, inv_det)).collect()
}

/// Extended instructions implemented by a single ALU instruction.
fn direct_glsl_op(ext_op: GLOp) -> Option<AluOp> {
    Some(match ext_op {
        // FIXME: `Round` allows either rounding direction for `.5`.
        GLOp::Round | GLOp::RoundEven => AluOp::FroundEven,
        GLOp::Trunc => AluOp::Ftrunc,
        GLOp::FAbs => AluOp::Fabs,
        GLOp::SAbs => AluOp::Iabs,
        GLOp::FSign => AluOp::Fsign,
        GLOp::SSign => AluOp::Isign,
        GLOp::Floor => AluOp::Ffloor,
        GLOp::Ceil => AluOp::Fceil,
        GLOp::Fract => AluOp::Ffract,
        GLOp::Sin => AluOp::Fsin,
        GLOp::Cos => AluOp::Fcos,
        GLOp::Pow => AluOp::Fpow,
        GLOp::Exp2 => AluOp::Fexp2,
        GLOp::Log2 => AluOp::Flog2,
        GLOp::Sqrt => AluOp::Fsqrt,
        GLOp::InverseSqrt => AluOp::Frsq,
        GLOp::FMin => AluOp::Fmin,
        GLOp::UMin => AluOp::Umin,
        GLOp::SMin => AluOp::Imin,
        GLOp::FMax => AluOp::Fmax,
        GLOp::UMax => AluOp::Umax,
        GLOp::SMax => AluOp::Imax,
        GLOp::FMix => AluOp::Flrp,
        GLOp::Fma => AluOp::Ffma,
        GLOp::Ldexp => AluOp::Ldexp,
        GLOp::FindILsb => AluOp::FindLsb,
        GLOp::FindSMsb => AluOp::IfindMsb,
        GLOp::FindUMsb => AluOp::UfindMsb,
        GLOp::PackSnorm4x8 => AluOp::PackSnorm4x8,
        GLOp::PackUnorm4x8 => AluOp::PackUnorm4x8,
        GLOp::PackSnorm2x16 => AluOp::PackSnorm2x16,
        GLOp::PackUnorm2x16 => AluOp::PackUnorm2x16,
        GLOp::PackHalf2x16 => AluOp::PackHalf2x16,
        GLOp::UnpackSnorm4x8 => AluOp::UnpackSnorm4x8,
        GLOp::UnpackUnorm4x8 => AluOp::UnpackUnorm4x8,
        GLOp::UnpackSnorm2x16 => AluOp::UnpackSnorm2x16,
        GLOp::UnpackUnorm2x16 => AluOp::UnpackUnorm2x16,
        GLOp::UnpackHalf2x16 => AluOp::UnpackHalf2x16,
        _ => return None,
    })
}

impl<'a> Translator<'a> {
    pub(super) fn handle_glsl450(&mut self, inst: spv::Inst<'a>) -> Result<(), Error> {
        let w = inst.words;
        let ty = self.values.ty(w[1]).ty;
        let ext_op = GLOp::from_u32(w[4])
            .ok_or_else(|| Error::unsupported(format!("GLSL.std.450 instruction {}", w[4])))?;

        // Matrix operands, which need their columns rather than a single value.
        match ext_op {
            GLOp::Determinant => {
                let m = self.ssa_value(w[5]);
                let cols: SmallVec<[Value; 4]> = m.elems().iter().map(|c| c.def()).collect();
                let det = mat_det(self.fb(), &cols);
                self.push_leaf(w[2], ty, det);
                return Ok(());
            }
            GLOp::MatrixInverse => {
                let m = self.ssa_value(w[5]);
                let cols: SmallVec<[Value; 4]> = m.elems().iter().map(|c| c.def()).collect();
                let inverse = mat_inverse(self.fb(), &cols);
                let columns = m
                    .elems()
                    .iter()
                    .zip(inverse)
                    .map(|(column, inverse)| SsaValue::leaf(column.ty, inverse))
                    .collect();
                self.push_ssa(w[2], SsaValue::aggregate(m.ty, columns));
                return Ok(());
            }
            GLOp::Modf => {
                // Both parts keep the sign of `x`, so this uses `trunc`, not `floor`.
                let x = self.ssa_leaf(w[5]);
                let fb = self.fb();
                let whole = fb.alu1(AluOp::Ftrunc, x);
                let frac = fb.alu2(AluOp::Fsub, x, whole);
                let whole_ptr = self.values.deref(w[6]).clone();
                self.variable_store(&SsaValue::leaf(ty, whole), &whole_ptr);
                self.push_leaf(w[2], ty, frac);
                return Ok(());
            }
            GLOp::Atan
            | GLOp::Atan2
            | GLOp::ModfStruct
            | GLOp::Frexp
            | GLOp::FrexpStruct
            | GLOp::IMix
            | GLOp::PackDouble2x32
            | GLOp::UnpackDouble2x32
            | GLOp::InterpolateAtCentroid
            | GLOp::InterpolateAtSample
            | GLOp::InterpolateAtOffset
            | GLOp::NMin
            | GLOp::NMax
            | GLOp::NClamp => {
                return Err(Error::unsupported(format!("GLSL.std.450 {ext_op:?}")));
            }
            _ => {}
        }

        let src: SmallVec<[Value; 3]> =
            inst.from(5).iter().map(|&src| self.ssa_leaf(src)).collect();
        let fb = self.fb();

        let def = if let Some(op) = direct_glsl_op(ext_op) {
            fb.alu(op, &src)
        } else {
            match ext_op {
                GLOp::Radians => {
                    let scale = fb.imm_f32(std::f32::consts::PI / 180.0);
                    fb.alu2(AluOp::Fmul, src[0], scale)
                }
                GLOp::Degrees => {
                    let scale = fb.imm_f32(180.0 / std::f32::consts::PI);
                    fb.alu2(AluOp::Fmul, src[0], scale)
                }
                GLOp::Tan => {
                    let (sin, cos) = (fb.alu1(AluOp::Fsin, src[0]), fb.alu1(AluOp::Fcos, src[0]));
                    fb.alu2(AluOp::Fdiv, sin, cos)
                }
                GLOp::Asin => asin(fb, src[0]),
                GLOp::Acos => {
                    let pi_2 = fb.imm_f32(FRAC_PI_2);
                    let asin = asin(fb, src[0]);
                    fb.alu2(AluOp::Fsub, pi_2, asin)
                }

                GLOp::Sinh | GLOp::Cosh | GLOp::Tanh => {
                    let (pos, neg) = exp_pair(fb, src[0]);
                    let diff = fb.alu2(AluOp::Fsub, pos, neg);
                    let sum = fb.alu2(AluOp::Fadd, pos, neg);
                    let half = fb.imm_f32(0.5);
                    match ext_op {
                        GLOp::Sinh => fb.alu2(AluOp::Fmul, half, diff),
                        GLOp::Cosh => fb.alu2(AluOp::Fmul, half, sum),
                        _ => fb.alu2(AluOp::Fdiv, diff, sum),
                    }
                }
                GLOp::Asinh => {
                    let one = fb.imm_f32(1.0);
                    let x2 = fb.alu2(AluOp::Fmul, src[0], src[0]);
                    let x2_plus_1 = fb.alu2(AluOp::Fadd, x2, one);
                    let sqrt = fb.alu1(AluOp::Fsqrt, x2_plus_1);
                    let abs = fb.alu1(AluOp::Fabs, src[0]);
                    let sum = fb.alu2(AluOp::Fadd, abs, sqrt);
                    let log = log(fb, sum);
                    let sign = fb.alu1(AluOp::Fsign, src[0]);
                    fb.alu2(AluOp::Fmul, sign, log)
                }
                GLOp::Acosh => {
                    let one = fb.imm_f32(1.0);
                    let x2 = fb.alu2(AluOp::Fmul, src[0], src[0]);
                    let x2_minus_1 = fb.alu2(AluOp::Fsub, x2, one);
                    let sqrt = fb.alu1(AluOp::Fsqrt, x2_minus_1);
                    let sum = fb.alu2(AluOp::Fadd, src[0], sqrt);
                    log(fb, sum)
                }
                GLOp::Atanh => {
                    let one = fb.imm_f32(1.0);
                    let num = fb.alu2(AluOp::Fadd, one, src[0]);
                    let denom = fb.alu2(AluOp::Fsub, one, src[0]);
                    let ratio = fb.alu2(AluOp::Fdiv, num, denom);
                    let log = log(fb, ratio);
                    let half = fb.imm_f32(0.5);
                    fb.alu2(AluOp::Fmul, half, log)
                }

                GLOp::Exp => exp(fb, src[0]),
                GLOp::Log => log(fb, src[0]),

                GLOp::FClamp => fclamp(fb, src[0], src[1], src[2]),
                GLOp::UClamp | GLOp::SClamp => {
                    let (max_op, min_op) = if ext_op == GLOp::UClamp {
                        (AluOp::Umax, AluOp::Umin)
                    } else {
                        (AluOp::Imax, AluOp::Imin)
                    };
                    let clamped_below = fb.alu2(max_op, src[0], src[1]);
                    fb.alu2(min_op, clamped_below, src[2])
                }
                // `step(edge, x)`: `x >= edge` as `0.0` or `1.0`.
                GLOp::Step => fb.alu2(AluOp::Sge, src[1], src[0]),
                GLOp::SmoothStep => {
                    let (edge0, edge1, x) = (src[0], src[1], src[2]);
                    let (zero, one) = (fb.imm_f32(0.0), fb.imm_f32(1.0));
                    let (two, three) = (fb.imm_f32(2.0), fb.imm_f32(3.0));
                    let num = fb.alu2(AluOp::Fsub, x, edge0);
                    let denom = fb.alu2(AluOp::Fsub, edge1, edge0);
                    let ratio = fb.alu2(AluOp::Fdiv, num, denom);
                    let t = fclamp(fb, ratio, zero, one);
                    let two_t = fb.alu2(AluOp::Fmul, two, t);
                    let poly = fb.alu2(AluOp::Fsub, three, two_t);
                    let t_poly = fb.alu2(AluOp::Fmul, t, poly);
                    fb.alu2(AluOp::Fmul, t, t_poly)
                }

                GLOp::Length => length(fb, src[0]),
                GLOp::Distance => {
                    let diff = fb.alu2(AluOp::Fsub, src[0], src[1]);
                    length(fb, diff)
                }
                GLOp::Normalize => {
                    let len = length(fb, src[0]);
                    fb.alu2(AluOp::Fdiv, src[0], len)
                }
                GLOp::Cross => {
                    let (a_yzx, a_zxy) = (fb.swizzle(src[0], &YZX), fb.swizzle(src[0], &ZXY));
                    let (b_yzx, b_zxy) = (fb.swizzle(src[1], &YZX), fb.swizzle(src[1], &ZXY));
                    let lhs = fb.alu2(AluOp::Fmul, a_yzx, b_zxy);
                    let rhs = fb.alu2(AluOp::Fmul, a_zxy, b_yzx);
                    fb.alu2(AluOp::Fsub, lhs, rhs)
                }
                GLOp::FaceForward => {
                    let (n, i, n_ref) = (src[0], src[1], src[2]);
                    let d = dot(fb, n_ref, i);
                    let zero = fb.imm_f32(0.0);
                    let is_facing = fb.alu2(AluOp::Flt, d, zero);
                    let neg_n = fb.alu1(AluOp::Fneg, n);
                    fb.alu3(AluOp::Bcsel, is_facing, n, neg_n)
                }
                // `I - 2 * dot(N, I) * N`
                GLOp::Reflect => {
                    let (i, n) = (src[0], src[1]);
                    let d = dot(fb, n, i);
                    let d_n = fb.alu2(AluOp::Fmul, d, n);
                    let two = fb.imm_f32(2.0);
                    let twice = fb.alu2(AluOp::Fmul, two, d_n);
                    fb.alu2(AluOp::Fsub, i, twice)
                }
                GLOp::Refract => {
                    let (i, n, eta) = (src[0], src[1], src[2]);
                    let (zero, one) = (fb.imm_f32(0.0), fb.imm_f32(1.0));
                    let n_dot_i = dot(fb, n, i);

                    // `k = 1 - eta * eta * (1 - dot(N, I) * dot(N, I))`
                    let n_dot_i_2 = fb.alu2(AluOp::Fmul, n_dot_i, n_dot_i);
                    let one_minus = fb.alu2(AluOp::Fsub, one, n_dot_i_2);
                    let eta_2 = fb.alu2(AluOp::Fmul, eta, eta);
                    let scaled = fb.alu2(AluOp::Fmul, eta_2, one_minus);
                    let k = fb.alu2(AluOp::Fsub, one, scaled);

                    // `eta * I - (eta * dot(N, I) + sqrt(k)) * N`
                    let eta_i = fb.alu2(AluOp::Fmul, eta, i);
                    let eta_n_dot_i = fb.alu2(AluOp::Fmul, eta, n_dot_i);
                    let sqrt_k = fb.alu1(AluOp::Fsqrt, k);
                    let factor = fb.alu2(AluOp::Fadd, eta_n_dot_i, sqrt_k);
                    let factor_n = fb.alu2(AluOp::Fmul, factor, n);
                    let refracted = fb.alu2(AluOp::Fsub, eta_i, factor_n);

                    let total_reflection = fb.alu2(AluOp::Flt, k, zero);
                    let zero = fb.imm_zero(fb.num_components(i));
                    fb.alu3(AluOp::Bcsel, total_reflection, zero, refracted)
                }

                _ => return Err(Error::unsupported(format!("GLSL.std.450 {ext_op:?}"))),
            }
        };
        self.push_leaf(w[2], ty, def);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Context, InstKind};
    use std::rc::Rc;

    fn alu_op_of(fb: &FuncBuilder, v: Value) -> AluOp {
        let Value::Inst(inst) = v else { unreachable!() };
        match fb.body.insts[inst].kind {
            InstKind::Alu(op) => op,
            _ => panic!("not an ALU instruction"),
        }
    }

    #[test]
    fn length_of_scalar_avoids_dot() {
        let mut fb = FuncBuilder::new(Rc::new(Context::new()));
        let x = fb.undef(1);
        let len = length(&mut fb, x);
        assert_eq!(alu_op_of(&fb, len), AluOp::Fsqrt);
        let Value::Inst(len) = len else { unreachable!() };
        let squared = fb.body.insts[len].inputs[0];
        assert_eq!(alu_op_of(&fb, squared), AluOp::Fmul);

        let v = fb.undef(3);
        let len = length(&mut fb, v);
        let Value::Inst(len) = len else { unreachable!() };
        let squared = fb.body.insts[len].inputs[0];
        assert_eq!(alu_op_of(&fb, squared), AluOp::Fdot3);
    }

    #[test]
    fn subdeterminants_of_2x2_are_single_components() {
        let mut fb = FuncBuilder::new(Rc::new(Context::new()));
        let cols = [fb.undef(2), fb.undef(2)];
        let sub = mat_subdet(&mut fb, &cols, 0, 1);
        let Value::Inst(sub) = sub else { unreachable!() };
        assert!(matches!(&fb.body.insts[sub].kind, InstKind::Swizzle(c) if c[..] == [1]));
        assert_eq!(fb.body.insts[sub].inputs[0], cols[0]);
    }

    #[test]
    fn inverse_keeps_the_matrix_size() {
        let mut fb = FuncBuilder::new(Rc::new(Context::new()));
        let cols: Vec<_> = (0..3).map(|_| fb.undef(3)).collect();
        let inverse = mat_inverse(&mut fb, &cols);
        assert_eq!(inverse.len(), 3);
        assert!(inverse.iter().all(|&column| fb.num_components(column) == 3));
    }
}
