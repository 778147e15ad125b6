//! SPIR-V types, along with their (explicit) layout information.

use super::decorations::collect_decorations;
use super::values::SpvValue;
use super::{Error, Translator};
use crate::spv::{self, Id};
use crate::{ConstKind, Context, ImageDesc, SamplerDim, ScalarKind, Type, TypeDef};
use smallvec::SmallVec;
use std::rc::Rc;

/// Layout-aware type descriptor, the IR `Type` being only the structural part.
///
/// Children are shared (`Rc`), so changing the layout of e.g. one struct member
/// (through `Rc::make_mut`) never affects other users of the same child.
#[derive(Clone, Debug)]
pub(super) struct TypeInfo {
    pub ty: Type,

    /// Array element, matrix column, or vector component type.
    pub array_element: Option<Rc<TypeInfo>>,

    /// Array stride, matrix stride (between columns, or rows if `row_major`),
    /// or vector component stride, in bytes.
    pub stride: u32,

    /// Only meaningful for matrices.
    pub row_major: bool,

    pub members: Vec<Rc<TypeInfo>>,
    pub offsets: Vec<u32>,

    /// Set for struct members decorated `BuiltIn`, which get their own storage.
    pub builtin: Option<spirv::BuiltIn>,

    pub block: bool,
    pub buffer_block: bool,
    /// At least one member is a builtin (e.g. `gl_PerVertex`).
    pub builtin_block: bool,

    /// GL internal format of storage images (`0` if unknown).
    pub image_format: u32,

    pub params: Vec<Rc<TypeInfo>>,
    pub return_type: Option<Rc<TypeInfo>>,
}

impl TypeInfo {
    pub fn new(ty: Type) -> Self {
        Self {
            ty,
            array_element: None,
            stride: 0,
            row_major: false,
            members: vec![],
            offsets: vec![],
            builtin: None,
            block: false,
            buffer_block: false,
            builtin_block: false,
            image_format: 0,
            params: vec![],
            return_type: None,
        }
    }

    pub fn is_builtin(&self) -> bool {
        self.builtin.is_some()
    }

    /// Element type, for arrays, matrices and vectors.
    pub fn element(&self) -> &Rc<TypeInfo> {
        self.array_element.as_ref().expect("type has no elements")
    }

    /// Whether variables of this type (or arrays of it) are interfaces.
    pub fn is_interface(&self, cx: &Context) -> bool {
        self.block
            || self.buffer_block
            || matches!(cx[self.ty], TypeDef::Sampler(_) | TypeDef::Image(_))
    }

    /// Size of an interface block based on its explicit offsets and strides.
    pub fn block_size(&self, cx: &Context) -> u32 {
        match cx[self.ty] {
            TypeDef::Scalar(_) | TypeDef::Vector { .. } | TypeDef::Matrix { .. } => {
                let def = &cx[self.ty];
                let cols =
                    if self.row_major { def.vector_elements() } else { def.matrix_columns() };
                if cols > 1 {
                    assert!(self.stride > 0, "matrix without MatrixStride");
                    self.stride * u32::from(cols)
                } else {
                    u32::from(def.vector_elements()) * 4
                }
            }
            TypeDef::Struct { .. } => self
                .members
                .iter()
                .zip(&self.offsets)
                .map(|(member, &offset)| offset + member.block_size(cx))
                .max()
                .unwrap_or(0),
            TypeDef::Array { len, .. } => {
                assert!(self.stride > 0 && len > 0, "unsized or stride-less array in block");
                self.stride * len
            }
            ref def => unreachable!("{def:?} can't be part of a block"),
        }
    }
}

/// Copy-on-write access to the matrix found in struct member `member`,
/// through any number of arrays (of arrays) of matrices.
fn mutable_matrix_member<'t>(
    cx: &Context,
    members: &'t mut [Rc<TypeInfo>],
    member: usize,
) -> &'t mut TypeInfo {
    fn innermost<'t>(cx: &Context, ty: &'t mut Rc<TypeInfo>) -> &'t mut TypeInfo {
        let ty = Rc::make_mut(ty);
        if let TypeDef::Array { .. } = cx[ty.ty] {
            innermost(cx, ty.array_element.as_mut().expect("array without element"))
        } else {
            assert!(cx[ty.ty].is_matrix(), "matrix layout decoration on non-matrix");
            ty
        }
    }
    innermost(cx, &mut members[member])
}

/// GL internal format enum for a SPIR-V storage image format.
pub(super) fn gl_image_format(format: spirv::ImageFormat) -> u32 {
    use spirv::ImageFormat as F;
    match format {
        F::Unknown => 0,
        F::Rgba32f => 0x8814,
        F::Rgba16f => 0x881A,
        F::R32f => 0x822E,
        F::Rgba8 => 0x8058,
        F::Rgba8Snorm => 0x8F97,
        F::Rg32f => 0x8230,
        F::Rg16f => 0x822F,
        F::R11fG11fB10f => 0x8C3A,
        F::R16f => 0x822D,
        F::Rgba16 => 0x805B,
        F::Rgb10A2 => 0x8059,
        F::Rg16 => 0x822C,
        F::Rg8 => 0x822B,
        F::R16 => 0x822A,
        F::R8 => 0x8229,
        F::Rgba16Snorm => 0x8F9B,
        F::Rg16Snorm => 0x8F99,
        F::Rg8Snorm => 0x8F95,
        F::R16Snorm => 0x8F98,
        F::R8Snorm => 0x8F94,
        F::Rgba32i => 0x8D82,
        F::Rgba16i => 0x8D88,
        F::Rgba8i => 0x8D8E,
        F::R32i => 0x8235,
        F::Rg32i => 0x823B,
        F::Rg16i => 0x8239,
        F::Rg8i => 0x8237,
        F::R16i => 0x8233,
        F::R8i => 0x8231,
        F::Rgba32ui => 0x8D70,
        F::Rgba16ui => 0x8D76,
        F::Rgba8ui => 0x8D7C,
        F::R32ui => 0x8236,
        F::Rgb10a2ui => 0x906F,
        F::Rg32ui => 0x823C,
        F::Rg16ui => 0x823A,
        F::Rg8ui => 0x8238,
        F::R16ui => 0x8234,
        F::R8ui => 0x8232,
        // NOTE: 64-bit integer formats have no GL equivalent.
        F::R64ui | F::R64i => 0,
    }
}

fn sampler_dim(dim: spirv::Dim) -> Result<SamplerDim, Error> {
    Ok(match dim {
        spirv::Dim::Dim1D => SamplerDim::Dim1D,
        spirv::Dim::Dim2D => SamplerDim::Dim2D,
        spirv::Dim::Dim3D => SamplerDim::Dim3D,
        spirv::Dim::DimCube => SamplerDim::Cube,
        spirv::Dim::DimRect => SamplerDim::Rect,
        spirv::Dim::DimBuffer => SamplerDim::Buf,
        dim => return Err(Error::unsupported(format!("image dimension {dim:?}"))),
    })
}

impl<'a> Translator<'a> {
    pub(super) fn handle_type(&mut self, inst: spv::Inst<'a>) -> Result<(), Error> {
        let cx = self.cx.clone();
        let w = inst.words;
        let id = w[1];
        let op = inst.op().expect("type instructions are all known");

        let scalar = |kind| TypeInfo::new(cx.scalar_type(kind));
        let mut info = match op {
            spirv::Op::TypeVoid => TypeInfo::new(cx.intern(TypeDef::Void)),
            spirv::Op::TypeBool => scalar(ScalarKind::Bool),
            spirv::Op::TypeInt => {
                if w[2] != 32 {
                    return Err(Error::unsupported(format!("{}-bit integers", w[2])));
                }
                scalar(if w[3] != 0 { ScalarKind::Int } else { ScalarKind::Uint })
            }
            spirv::Op::TypeFloat => {
                if w[2] != 32 {
                    return Err(Error::unsupported(format!("{}-bit floats", w[2])));
                }
                scalar(ScalarKind::Float)
            }

            spirv::Op::TypeVector => {
                let base = self.values.ty(w[2]).clone();
                let TypeDef::Scalar(elem) = cx[base.ty] else {
                    unreachable!("vector of non-scalar type")
                };
                let len = u8::try_from(w[3]).ok().filter(|len| (2..=4).contains(len));
                let len = len.ok_or_else(|| Error::unsupported(format!("{}-vectors", w[3])))?;

                // Components are always 32-bit, so tightly packed 4 bytes apart.
                TypeInfo {
                    stride: 4,
                    array_element: Some(base),
                    ..TypeInfo::new(cx.vector_type(elem, len))
                }
            }

            spirv::Op::TypeMatrix => {
                let column = self.values.ty(w[2]).clone();
                let TypeDef::Vector { elem: ScalarKind::Float, len: rows } = cx[column.ty] else {
                    unreachable!("matrix columns must be float vectors")
                };
                let cols = u8::try_from(w[3]).ok().filter(|cols| (2..=4).contains(cols));
                let cols = cols.ok_or_else(|| Error::unsupported("matrix column count"))?;
                TypeInfo {
                    array_element: Some(column),
                    ..TypeInfo::new(cx.matrix_type(rows, cols))
                }
            }

            spirv::Op::TypeArray | spirv::Op::TypeRuntimeArray => {
                let elem = self.values.ty(w[2]).clone();
                // A length of `0` denotes runtime arrays.
                let len = if op == spirv::Op::TypeRuntimeArray {
                    0
                } else {
                    let (_, len) = self.values.constant(w[3]);
                    match &cx[len].kind {
                        ConstKind::Scalars(words) => words[0],
                        ConstKind::Composite(_) => unreachable!("non-scalar array length"),
                    }
                };
                let ty = cx.intern(TypeDef::Array { elem: elem.ty, len });
                TypeInfo { array_element: Some(elem), ..TypeInfo::new(ty) }
            }

            spirv::Op::TypeStruct => {
                let members: Vec<_> =
                    inst.from(2).iter().map(|&member| self.values.ty(member).clone()).collect();
                let fields = members.iter().map(|member| member.ty).collect();
                let mut info = TypeInfo {
                    offsets: vec![0; members.len()],
                    members,
                    ..TypeInfo::new(cx.intern(TypeDef::Struct { fields }))
                };
                self.apply_member_decorations(id, &mut info);
                info
            }

            spirv::Op::TypeFunction => {
                let return_type = self.values.ty(w[2]).clone();
                let params: Vec<_> =
                    inst.from(3).iter().map(|&param| self.values.ty(param).clone()).collect();
                let ty = cx.intern(TypeDef::Function {
                    params: params.iter().map(|param| param.ty).collect(),
                    ret: return_type.ty,
                });
                TypeInfo { params, return_type: Some(return_type), ..TypeInfo::new(ty) }
            }

            // HACK: pointers are erased (the pointee type is reused as-is),
            // which relies on the producer only ever dereferencing them correctly.
            spirv::Op::TypePointer => {
                let pointee = self.values.ty(w[3]).clone();
                self.values.push(id, SpvValue::Type(pointee));
                return Ok(());
            }
            spirv::Op::TypeSampledImage => {
                let image = self.values.ty(w[2]).clone();
                self.values.push(id, SpvValue::Type(image));
                return Ok(());
            }

            spirv::Op::TypeImage => {
                let sampled_type = self.values.ty(w[2]).clone();
                let result = cx[sampled_type.ty]
                    .scalar_kind()
                    .expect("image sampled type must be a scalar or vector");
                let dim = spirv::Dim::from_u32(w[3])
                    .ok_or_else(|| Error::unsupported(format!("image dimension {}", w[3])))?;
                let dim = sampler_dim(dim)?;
                let (shadow, arrayed, multisampled, sampled) =
                    (w[4] == 1, w[5] != 0, w[6] != 0, w[7]);
                let format = spirv::ImageFormat::from_u32(w[8])
                    .ok_or_else(|| Error::unsupported(format!("image format {}", w[8])))?;

                if multisampled {
                    return Err(Error::unsupported("multisampled images"));
                }

                let image_format = gl_image_format(format);
                let desc = ImageDesc { dim, arrayed, shadow, result, format: image_format };
                let def = match sampled {
                    1 => TypeDef::Sampler(desc),
                    2 => {
                        assert!(!shadow, "storage images can't be depth images");
                        TypeDef::Image(desc)
                    }
                    _ => return Err(Error::unsupported("images of unknown sampled-ness")),
                };
                TypeInfo { image_format, ..TypeInfo::new(cx.intern(def)) }
            }

            // NOTE: separate samplers only matter once combined with an
            // image, so any sampler type will do to represent them.
            spirv::Op::TypeSampler => TypeInfo::new(cx.intern(TypeDef::Sampler(ImageDesc {
                dim: SamplerDim::Dim2D,
                arrayed: false,
                shadow: false,
                result: ScalarKind::Float,
                format: 0,
            }))),

            _ => return Err(Error::unsupported(format!("type instruction {op:?}"))),
        };

        self.apply_type_decorations(id, &mut info)?;
        self.values.push(id, SpvValue::Type(Rc::new(info)));
        Ok(())
    }

    fn apply_member_decorations(&self, id: Id, info: &mut TypeInfo) {
        let cx = &self.cx;
        for dec in collect_decorations(&self.values, id) {
            let Some(member) = dec.member else { continue };
            let member = member as usize;
            match dec.decoration {
                spirv::Decoration::BuiltIn => {
                    let builtin = spirv::BuiltIn::from_u32(dec.literal(0))
                        .unwrap_or_else(|| unreachable!("unknown builtin {}", dec.literal(0)));
                    Rc::make_mut(&mut info.members[member]).builtin = Some(builtin);
                    info.builtin_block = true;
                }
                spirv::Decoration::Offset => info.offsets[member] = dec.literal(0),
                spirv::Decoration::MatrixStride => {
                    mutable_matrix_member(cx, &mut info.members, member).stride = dec.literal(0);
                }
                spirv::Decoration::RowMajor => {
                    mutable_matrix_member(cx, &mut info.members, member).row_major = true;
                }
                // Column-major is the default.
                spirv::Decoration::ColMajor => {}

                // Interface qualifiers only matter for (non-block) variables.
                spirv::Decoration::RelaxedPrecision
                | spirv::Decoration::NoPerspective
                | spirv::Decoration::Flat
                | spirv::Decoration::Centroid
                | spirv::Decoration::Sample
                | spirv::Decoration::Location
                | spirv::Decoration::Component
                | spirv::Decoration::Invariant
                | spirv::Decoration::Patch
                | spirv::Decoration::NonWritable
                | spirv::Decoration::NonReadable
                | spirv::Decoration::Coherent
                | spirv::Decoration::Volatile
                | spirv::Decoration::Restrict => {}

                decoration => {
                    log::debug!("ignoring member decoration {decoration:?} on %{id}");
                }
            }
        }
    }

    fn apply_type_decorations(&self, id: Id, info: &mut TypeInfo) -> Result<(), Error> {
        for dec in collect_decorations(&self.values, id) {
            if dec.member.is_some() {
                continue;
            }
            match dec.decoration {
                spirv::Decoration::ArrayStride => info.stride = dec.literal(0),
                spirv::Decoration::Block => info.block = true,
                spirv::Decoration::BufferBlock => info.buffer_block = true,

                // Offsets are always explicit anyway.
                spirv::Decoration::GLSLShared | spirv::Decoration::GLSLPacked => {}

                spirv::Decoration::Stream => {
                    if dec.literal(0) != 0 {
                        return Err(Error::unsupported("non-zero geometry stream"));
                    }
                }

                decoration => {
                    log::debug!("ignoring type decoration {decoration:?} on %{id}");
                }
            }
        }
        Ok(())
    }
}

/// Number of leaves (scalars/vectors) in a value of type `ty`.
pub(super) fn leaf_count(cx: &Context, ty: Type) -> usize {
    match &cx[ty] {
        TypeDef::Scalar(_) | TypeDef::Vector { .. } => 1,
        TypeDef::Matrix { cols, .. } => usize::from(*cols),
        &TypeDef::Array { elem, len } => len as usize * leaf_count(cx, elem),
        TypeDef::Struct { fields } => fields.iter().map(|&field| leaf_count(cx, field)).sum(),
        def => unreachable!("{def:?} has no SSA representation"),
    }
}

/// Types of all the leaves (scalars/vectors) of `ty`, in order.
pub(super) fn leaf_types(cx: &Context, ty: Type) -> SmallVec<[Type; 4]> {
    let mut leaves = SmallVec::new();
    fn collect(cx: &Context, ty: Type, leaves: &mut SmallVec<[Type; 4]>) {
        match &cx[ty] {
            TypeDef::Scalar(_) | TypeDef::Vector { .. } => leaves.push(ty),
            TypeDef::Matrix { .. } | TypeDef::Array { .. } => {
                let elem = cx.element_type(ty);
                for _ in 0..cx.aggregate_len(ty) {
                    collect(cx, elem, leaves);
                }
            }
            TypeDef::Struct { fields } => {
                for &field in fields {
                    collect(cx, field, leaves);
                }
            }
            def => unreachable!("{def:?} has no SSA representation"),
        }
    }
    collect(cx, ty, &mut leaves);
    leaves
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(cx: &Context, kind: ScalarKind) -> Rc<TypeInfo> {
        Rc::new(TypeInfo::new(cx.scalar_type(kind)))
    }

    fn struct_of(cx: &Context, members: Vec<Rc<TypeInfo>>, offsets: Vec<u32>) -> TypeInfo {
        let fields = members.iter().map(|member| member.ty).collect();
        TypeInfo { members, offsets, ..TypeInfo::new(cx.intern(TypeDef::Struct { fields })) }
    }

    #[test]
    fn block_size_of_two_ints() {
        let cx = Context::new();
        let int = scalar(&cx, ScalarKind::Int);
        let block = struct_of(&cx, vec![int.clone(), int], vec![0, 4]);
        assert_eq!(block.block_size(&cx), 8);
    }

    #[test]
    fn block_size_uses_strides() {
        let cx = Context::new();
        let float = scalar(&cx, ScalarKind::Float);
        let vec3 = Rc::new(TypeInfo {
            stride: 4,
            array_element: Some(float.clone()),
            ..TypeInfo::new(cx.vector_type(ScalarKind::Float, 3))
        });
        let mat3 = Rc::new(TypeInfo {
            stride: 16,
            row_major: true,
            array_element: Some(vec3.clone()),
            ..TypeInfo::new(cx.matrix_type(3, 3))
        });
        let array = Rc::new(TypeInfo {
            stride: 16,
            array_element: Some(vec3.clone()),
            ..TypeInfo::new(cx.intern(TypeDef::Array { elem: vec3.ty, len: 5 }))
        });
        let block = struct_of(&cx, vec![float, mat3, array], vec![0, 16, 64]);
        assert_eq!(block.block_size(&cx), 64 + 5 * 16);
    }

    #[test]
    fn matrix_layout_changes_are_not_shared() {
        let cx = Context::new();
        let float = scalar(&cx, ScalarKind::Float);
        let vec4 = Rc::new(TypeInfo {
            stride: 4,
            array_element: Some(float),
            ..TypeInfo::new(cx.vector_type(ScalarKind::Float, 4))
        });
        let mat4 = Rc::new(TypeInfo {
            array_element: Some(vec4),
            ..TypeInfo::new(cx.matrix_type(4, 4))
        });
        let mat4_array = Rc::new(TypeInfo {
            stride: 64,
            array_element: Some(mat4.clone()),
            ..TypeInfo::new(cx.intern(TypeDef::Array { elem: mat4.ty, len: 2 }))
        });

        let mut block = struct_of(&cx, vec![mat4.clone(), mat4_array.clone()], vec![0, 64]);
        mutable_matrix_member(&cx, &mut block.members, 0).row_major = true;
        mutable_matrix_member(&cx, &mut block.members, 1).stride = 16;

        assert!(block.members[0].row_major);
        assert_eq!(block.members[1].element().stride, 16);
        assert!(!mat4.row_major);
        assert_eq!(mat4.stride, 0);
        assert_eq!(mat4_array.element().stride, 0);
    }

    #[test]
    fn leaves_of_nested_aggregates() {
        let cx = Context::new();
        let vec2 = cx.vector_type(ScalarKind::Float, 2);
        let mat2 = cx.matrix_type(2, 2);
        let array = cx.intern(TypeDef::Array { elem: mat2, len: 3 });
        let int = cx.scalar_type(ScalarKind::Int);
        let fields = [int, array].into_iter().collect();
        let strukt = cx.intern(TypeDef::Struct { fields });
        assert_eq!(leaf_count(&cx, strukt), 7);
        let leaves = leaf_types(&cx, strukt);
        assert_eq!(leaves.len(), 7);
        assert!(leaves[0] == int);
        assert!(leaves[1..].iter().all(|&leaf| leaf == vec2));
    }

    #[test]
    fn image_formats() {
        assert_eq!(gl_image_format(spirv::ImageFormat::Unknown), 0);
        assert_eq!(gl_image_format(spirv::ImageFormat::Rgba8), 0x8058);
        assert_eq!(gl_image_format(spirv::ImageFormat::R16ui), 0x8234);
        assert_eq!(gl_image_format(spirv::ImageFormat::R32ui), 0x8236);
    }
}
