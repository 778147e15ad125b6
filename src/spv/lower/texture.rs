//! Sampling, fetching, gathering and querying (sampled) images.

use super::values::{SampledImage, SpvValue};
use super::{Error, Translator};
use crate::spv::{self, Id};
use crate::{
    AluOp, Deref, ImageDesc, InstDef, InstKind, SsaDest, TexInst, TexOp, TexSrc, TexSrcKind,
    TypeDef, Value,
};
use smallvec::SmallVec;
use spirv::ImageOperands;

/// Image operands, in the order their words appear (i.e. by bit position).
const ORDERED_IMAGE_OPERANDS: [ImageOperands; 8] = [
    ImageOperands::BIAS,
    ImageOperands::LOD,
    ImageOperands::GRAD,
    ImageOperands::CONST_OFFSET,
    ImageOperands::OFFSET,
    ImageOperands::CONST_OFFSETS,
    ImageOperands::SAMPLE,
    ImageOperands::MIN_LOD,
];

impl<'a> Translator<'a> {
    /// The sampler (or image, for fetches and queries) `id` refers to, along
    /// with the separate image, if it came from `OpSampledImage`.
    fn texture_operand(&self, id: Id) -> (Deref, Option<Deref>, ImageDesc) {
        let (sampler, texture) = match self.values.get_untyped(id) {
            SpvValue::SampledImage(sampled) => {
                (sampled.sampler.clone(), Some(sampled.image.deref.clone()))
            }
            SpvValue::Deref(image) => (image.deref.clone(), None),
            value => unreachable!("%{id} is not an image or sampler ({value:?})"),
        };
        let desc = match self.cx[texture.as_ref().unwrap_or(&sampler).ty] {
            TypeDef::Sampler(desc) | TypeDef::Image(desc) => desc,
            ref def => unreachable!("%{id} has non-image type {def:?}"),
        };
        (sampler, texture, desc)
    }

    pub(super) fn handle_texture(&mut self, inst: spv::Inst<'a>) -> Result<(), Error> {
        use spirv::Op;
        let w = inst.words;
        let op = inst.op().expect("dispatched on a known opcode");

        match op {
            Op::SampledImage => {
                let image = self.values.deref(w[3]).clone();
                let sampler = self.values.deref(w[4]).deref.clone();
                let sampled = SampledImage { image, sampler };
                self.values.push(w[2], SpvValue::SampledImage(sampled.into()));
                return Ok(());
            }
            Op::Image => {
                let image = match self.values.get_untyped(w[3]) {
                    SpvValue::SampledImage(sampled) => sampled.image.clone(),
                    SpvValue::Deref(image) => image.clone(),
                    value => unreachable!("OpImage of non-image %{} ({value:?})", w[3]),
                };
                self.values.push(w[2], SpvValue::Deref(image));
                return Ok(());
            }
            Op::ImageQuerySamples => return Err(Error::unsupported("OpImageQuerySamples")),
            _ => {}
        }

        let cx = self.cx.clone();
        let result_def = &cx[self.values.ty(w[1]).ty];
        let (num_components, dest_type) =
            (result_def.vector_elements(), result_def.scalar_kind().expect("non-scalar result"));
        let (sampler, texture, desc) = self.texture_operand(w[3]);

        let is_proj = matches!(
            op,
            Op::ImageSampleProjImplicitLod
                | Op::ImageSampleProjExplicitLod
                | Op::ImageSampleProjDrefImplicitLod
                | Op::ImageSampleProjDrefExplicitLod
        );
        let is_dref = matches!(
            op,
            Op::ImageSampleDrefImplicitLod
                | Op::ImageSampleDrefExplicitLod
                | Op::ImageSampleProjDrefImplicitLod
                | Op::ImageSampleProjDrefExplicitLod
                | Op::ImageDrefGather
        );
        let mut tex_op = match op {
            Op::ImageSampleImplicitLod
            | Op::ImageSampleDrefImplicitLod
            | Op::ImageSampleProjImplicitLod
            | Op::ImageSampleProjDrefImplicitLod => TexOp::Tex,
            Op::ImageSampleExplicitLod
            | Op::ImageSampleDrefExplicitLod
            | Op::ImageSampleProjExplicitLod
            | Op::ImageSampleProjDrefExplicitLod => TexOp::Txl,
            Op::ImageFetch => TexOp::Txf,
            Op::ImageGather | Op::ImageDrefGather => TexOp::Tg4,
            Op::ImageQuerySize | Op::ImageQuerySizeLod => TexOp::Txs,
            Op::ImageQueryLod => TexOp::Lod,
            Op::ImageQueryLevels => TexOp::QueryLevels,
            _ => unreachable!("{op:?} is not a texture instruction"),
        };

        let mut srcs = SmallVec::<[TexSrc; 4]>::new();
        let mut component = 0;
        let mut next = 4;

        let has_coord = !matches!(tex_op, TexOp::Txs | TexOp::QueryLevels);
        if has_coord {
            let mut coord = self.ssa_leaf(w[next]);
            next += 1;
            let mut dref = if is_dref {
                next += 1;
                Some(self.ssa_leaf(w[next - 1]))
            } else {
                None
            };

            if is_proj {
                let fb = self.fb();
                let n = fb.num_components(coord) - 1;
                let q = fb.channel(coord, n);
                let inv_q = fb.alu1(AluOp::Frcp, q);
                let comps: SmallVec<[u8; 4]> = (0..n).collect();
                let unprojected = fb.swizzle(coord, &comps);
                coord = fb.alu2(AluOp::Fmul, unprojected, inv_q);
                dref = dref.map(|dref| fb.alu2(AluOp::Fmul, dref, inv_q));
            }

            srcs.push(TexSrc { kind: TexSrcKind::Coord, value: coord });
            if let Some(dref) = dref {
                srcs.push(TexSrc { kind: TexSrcKind::Comparitor, value: dref });
            }
        }
        if op == Op::ImageGather {
            component = self.const_u32(w[next]) as u8;
            next += 1;
        }
        if op == Op::ImageQuerySizeLod {
            let lod = self.ssa_leaf(w[next]);
            next += 1;
            srcs.push(TexSrc { kind: TexSrcKind::Lod, value: lod });
        }

        if let Some(&mask) = w.get(next) {
            next += 1;
            let mask = ImageOperands::from_bits(mask)
                .ok_or_else(|| Error::unsupported(format!("image operands {mask:#x}")))?;
            for operand in ORDERED_IMAGE_OPERANDS {
                if !mask.contains(operand) {
                    continue;
                }
                if operand == ImageOperands::CONST_OFFSETS {
                    return Err(Error::unsupported("ConstOffsets image operand"));
                }
                if operand == ImageOperands::MIN_LOD {
                    return Err(Error::unsupported("MinLod image operand"));
                }

                let value = self.ssa_leaf(w[next]);
                next += 1;
                let kind = if operand == ImageOperands::BIAS {
                    assert_eq!(tex_op, TexOp::Tex, "Bias image operand on {op:?}");
                    tex_op = TexOp::Txb;
                    TexSrcKind::Bias
                } else if operand == ImageOperands::LOD {
                    TexSrcKind::Lod
                } else if operand == ImageOperands::GRAD {
                    assert!(
                        matches!(tex_op, TexOp::Tex | TexOp::Txl),
                        "Grad image operand on {op:?}"
                    );
                    tex_op = TexOp::Txd;
                    let ddy = self.ssa_leaf(w[next]);
                    next += 1;
                    srcs.push(TexSrc { kind: TexSrcKind::Ddx, value });
                    srcs.push(TexSrc { kind: TexSrcKind::Ddy, value: ddy });
                    continue;
                } else if operand == ImageOperands::CONST_OFFSET
                    || operand == ImageOperands::OFFSET
                {
                    TexSrcKind::Offset
                } else if operand == ImageOperands::SAMPLE {
                    assert_eq!(tex_op, TexOp::Txf, "Sample image operand on {op:?}");
                    tex_op = TexOp::TxfMs;
                    TexSrcKind::MsIndex
                } else {
                    unreachable!()
                };
                srcs.push(TexSrc { kind, value });
            }
        }
        assert_eq!(next, w.len(), "leftover operands in {op:?}");

        let tex = TexInst {
            op: tex_op,
            sampler,
            texture,
            dim: desc.dim,
            is_array: desc.arrayed,
            is_shadow: desc.shadow || is_dref,
            coord_components: desc.dim.coord_components() + u8::from(desc.arrayed),
            component,
            dest_type,
            srcs,
        };
        let result = self.fb().insert(InstDef {
            kind: InstKind::Tex(Box::new(tex)),
            inputs: SmallVec::new(),
            output: Some(SsaDest { num_components }),
        });
        let result_ty = self.values.ty(w[1]).ty;
        self.push_leaf(w[2], result_ty, Value::Inst(result));
        Ok(())
    }
}
