//! Storage images: loads, stores and atomics.

use super::values::{ImagePointer, SpvValue};
use super::{Error, Translator};
use crate::builder::FuncBuilder;
use crate::spv;
use crate::{IntrinsicOp, Value};
use smallvec::SmallVec;
use spirv::ImageOperands;
use std::rc::Rc;

/// Image intrinsics always take 4-component coordinates, so the last
/// component gets repeated (the extra ones being ignored anyway).
fn pad_coord(fb: &mut FuncBuilder, coord: Value) -> Value {
    let n = fb.num_components(coord);
    if n == 4 {
        return coord;
    }
    let comps: [u8; 4] = [0, 1, 2, 3].map(|i| i.min(n - 1));
    fb.swizzle(coord, &comps)
}

impl<'a> Translator<'a> {
    /// The sample index found in the (optional) image operands starting at
    /// `w[mask_idx]`, or an undefined value if there's no `Sample` operand.
    fn image_sample(&mut self, words: &[u32], mask_idx: usize) -> Result<Value, Error> {
        let Some(&mask) = words.get(mask_idx) else {
            return Ok(self.fb().undef(1));
        };
        let mask = ImageOperands::from_bits(mask)
            .ok_or_else(|| Error::unsupported(format!("image operands {mask:#x}")))?;
        if !(mask - ImageOperands::SAMPLE).is_empty() {
            return Err(Error::unsupported(format!("storage image operands {mask:?}")));
        }
        assert_eq!(words.len(), mask_idx + 1 + mask.bits().count_ones() as usize);
        if mask.contains(ImageOperands::SAMPLE) {
            Ok(self.ssa_leaf(words[mask_idx + 1]))
        } else {
            Ok(self.fb().undef(1))
        }
    }

    pub(super) fn handle_image(&mut self, inst: spv::Inst<'a>) -> Result<(), Error> {
        use spirv::Op;
        let w = inst.words;
        let op = inst.op().expect("dispatched on a known opcode");
        match op {
            Op::ImageTexelPointer => {
                let image = self.values.deref(w[3]).deref.clone();
                let coord = self.ssa_leaf(w[4]);
                let coord = pad_coord(self.fb(), coord);
                let sample = self.ssa_leaf(w[5]);
                let ptr = ImagePointer { image, coord, sample };
                self.values.push(w[2], SpvValue::ImagePointer(Rc::new(ptr)));
            }

            Op::ImageRead => {
                let image = self.values.deref(w[3]).deref.clone();
                let coord = self.ssa_leaf(w[4]);
                let coord = pad_coord(self.fb(), coord);
                let sample = self.image_sample(w, 5)?;
                let result_ty = self.values.ty(w[1]).ty;
                let num_components = self.cx[result_ty].vector_elements();
                let texel = self.fb().intrinsic(
                    IntrinsicOp::ImageLoad,
                    &[image],
                    &[coord, sample],
                    Some(num_components),
                );
                self.push_leaf(w[2], result_ty, Value::Inst(texel));
            }

            Op::ImageWrite => {
                let image = self.values.deref(w[1]).deref.clone();
                let coord = self.ssa_leaf(w[2]);
                let coord = pad_coord(self.fb(), coord);
                let texel = self.ssa_leaf(w[3]);
                let sample = self.image_sample(w, 4)?;
                let inputs = [coord, sample, texel];
                self.fb().intrinsic(IntrinsicOp::ImageStore, &[image], &inputs, None);
            }

            // Atomics, on the result of `OpImageTexelPointer`.
            _ => {
                let ptr = match self.values.get_untyped(w[3]) {
                    SpvValue::ImagePointer(ptr) => ptr.clone(),
                    value => unreachable!("image atomic on %{} ({value:?})", w[3]),
                };
                let (atomic_op, data) = self.atomic_operands(inst);
                let inputs: SmallVec<[Value; 4]> =
                    [ptr.coord, ptr.sample].into_iter().chain(data).collect();
                let result = self.fb().intrinsic(
                    IntrinsicOp::ImageAtomic(atomic_op),
                    &[ptr.image.clone()],
                    &inputs,
                    Some(1),
                );
                let result_ty = self.values.ty(w[1]).ty;
                self.push_leaf(w[2], result_ty, Value::Inst(result));
            }
        }
        Ok(())
    }
}
