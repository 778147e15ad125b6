//! Variables (and their decorations), access chains, and everything that
//! goes through memory (loads, stores, copies and function calls).

use super::decorations::collect_decorations;
use super::ssa::SsaValue;
use super::types::leaf_types;
use super::values::{DerefValue, SampledImage, SpvValue};
use super::{Error, Translator};
use crate::slots::*;
use crate::spv::{self, Id};
use crate::{
    AluOp, ArrayIndex, ConstDef, ConstKind, Deref, DerefLink, InstDef, InstKind, Interpolation,
    IntrinsicOp, Location, ScalarKind, SsaDest, SystemValue, Type, TypeDef, Value, Var, VarData,
    VarDecl, VarMode,
};
use smallvec::SmallVec;
use std::rc::Rc;

/// Fixed location (and possibly changed mode) of a builtin variable.
fn builtin_location(
    builtin: spirv::BuiltIn,
    mode: VarMode,
    stage: spirv::ExecutionModel,
) -> Result<(Location, VarMode), Error> {
    use spirv::BuiltIn as B;

    let system_value = |sv| {
        assert!(
            matches!(mode, VarMode::ShaderIn | VarMode::SystemValue),
            "{builtin:?} can only be an input"
        );
        Ok((Location::SystemValue(sv), VarMode::SystemValue))
    };
    let varying = |slot| Ok((Location::Varying(slot), mode));

    match builtin {
        B::Position | B::FragCoord => varying(VARYING_SLOT_POS),
        B::PointSize => varying(VARYING_SLOT_PSIZ),
        B::ClipDistance => varying(VARYING_SLOT_CLIP_DIST0),
        B::PrimitiveId => varying(VARYING_SLOT_PRIMITIVE_ID),
        B::Layer => varying(VARYING_SLOT_LAYER),
        B::ViewportIndex => match stage {
            spirv::ExecutionModel::Geometry | spirv::ExecutionModel::Fragment => {
                varying(VARYING_SLOT_VIEWPORT)
            }
            _ => Err(Error::unsupported(format!("ViewportIndex in {stage:?} shaders"))),
        },
        B::PointCoord => varying(VARYING_SLOT_PNTC),
        B::FrontFacing => varying(VARYING_SLOT_FACE),

        // NOTE: `VertexId` is the legacy (zero-based) version of `VertexIndex`.
        B::VertexIndex => system_value(SystemValue::VertexId),
        B::VertexId => system_value(SystemValue::VertexIdZeroBase),
        B::InstanceIndex | B::InstanceId => system_value(SystemValue::InstanceId),
        B::InvocationId => system_value(SystemValue::InvocationId),
        B::SampleId => system_value(SystemValue::SampleId),
        B::SamplePosition => system_value(SystemValue::SamplePos),
        B::SampleMask => match mode {
            VarMode::ShaderOut => Ok((Location::FragResult(FRAG_RESULT_SAMPLE_MASK), mode)),
            _ => system_value(SystemValue::SampleMaskIn),
        },
        B::HelperInvocation => system_value(SystemValue::HelperInvocation),
        B::NumWorkgroups => system_value(SystemValue::NumWorkGroups),
        B::WorkgroupId => system_value(SystemValue::WorkGroupId),
        B::LocalInvocationId => system_value(SystemValue::LocalInvocationId),
        B::LocalInvocationIndex => system_value(SystemValue::LocalInvocationIndex),
        B::GlobalInvocationId => system_value(SystemValue::GlobalInvocationId),

        B::FragDepth => {
            assert_eq!(mode, VarMode::ShaderOut, "FragDepth can only be an output");
            Ok((Location::FragResult(FRAG_RESULT_DEPTH), mode))
        }

        B::CullDistance => Err(Error::unsupported("CullDistance")),
        B::TessLevelOuter
        | B::TessLevelInner
        | B::TessCoord
        | B::PatchVertices => Err(Error::unsupported(format!("tessellation builtin {builtin:?}"))),
        B::WorkgroupSize => unreachable!("WorkgroupSize is a constant, not a variable"),
        _ => Err(Error::unsupported(format!("builtin {builtin:?}"))),
    }
}

/// Split a trailing vector component selection (if any) off `deref`.
fn split_component(
    cx: &crate::Context,
    var_ty: Type,
    deref: &Deref,
) -> (Deref, Option<ArrayIndex>) {
    let mut ty = var_ty;
    for (i, link) in deref.path.iter().enumerate() {
        if cx[ty].is_vector_or_scalar() {
            assert_eq!(i + 1, deref.path.len(), "indexing into a vector component");
            let &DerefLink::Array(index) = link else {
                unreachable!("struct member of a vector")
            };
            let path = deref.path[..i].iter().copied().collect();
            return (Deref { var: deref.var, path, ty }, Some(index));
        }
        ty = match (link, &cx[ty]) {
            (&DerefLink::Struct(idx), TypeDef::Struct { fields }) => fields[idx as usize],
            (DerefLink::Array(_), _) => cx.element_type(ty),
            (_, def) => unreachable!("struct member of {def:?}"),
        };
    }
    (deref.clone(), None)
}

impl<'a> Translator<'a> {
    pub(super) fn handle_variable(&mut self, inst: spv::Inst<'a>) -> Result<(), Error> {
        use spirv::StorageClass as S;

        let cx = self.cx.clone();
        let w = inst.words;
        let ty = self.values.ty(w[1]).clone();
        let id = w[2];
        let storage_class = spirv::StorageClass::from_u32(w[3])
            .ok_or_else(|| Error::unsupported(format!("storage class {}", w[3])))?;

        // Interfaces are blocks/samplers/images, or arrays of them.
        let interface = if ty.is_interface(&cx) {
            Some(ty.clone())
        } else if matches!(cx[ty.ty], TypeDef::Array { .. }) && ty.element().is_interface(&cx) {
            Some(ty.element().clone())
        } else {
            None
        };

        let mut data = VarData::default();
        let info = &mut self.module.info;
        let mode = match storage_class {
            S::Uniform | S::UniformConstant => match &interface {
                Some(block) if block.buffer_block => {
                    info.num_ssbos += 1;
                    VarMode::ShaderStorage
                }
                _ => {
                    data.read_only = true;
                    match interface.as_ref().map(|i| &cx[i.ty]) {
                        Some(TypeDef::Image(_)) => {
                            info.num_images += 1;
                            data.image_format = interface.as_ref().map_or(0, |i| i.image_format);
                        }
                        Some(TypeDef::Sampler(_)) => info.num_textures += 1,
                        Some(TypeDef::Struct { .. }) => info.num_ubos += 1,
                        _ => {}
                    }
                    VarMode::Uniform
                }
            },
            S::StorageBuffer => {
                info.num_ssbos += 1;
                VarMode::ShaderStorage
            }
            S::PushConstant => {
                let Some(block) = &interface else {
                    unreachable!("push constants must be a block")
                };
                if info.num_uniforms != 0 {
                    return Err(Error::unsupported("more than one push constant block"));
                }
                info.num_uniforms = block.block_size(&cx);
                data.read_only = true;
                VarMode::Uniform
            }
            S::Input => {
                data.read_only = true;
                VarMode::ShaderIn
            }
            S::Output => VarMode::ShaderOut,
            S::Private => VarMode::Global,
            S::Function => VarMode::Local,
            S::Workgroup => VarMode::Shared,
            _ => return Err(Error::unsupported(format!("{storage_class:?} variables"))),
        };
        let interface_type = match mode {
            VarMode::Global | VarMode::Local => None,
            _ => interface.as_ref().map(|i| i.ty),
        };

        let mut initializer = (w.len() > 4).then(|| self.values.constant(w[4]).1);
        let mut mode = mode;
        let mut location = None;
        let mut builtin = None;
        for dec in collect_decorations(&self.values, id) {
            if dec.member.is_some() {
                continue;
            }
            use spirv::Decoration as D;
            match dec.decoration {
                D::RelaxedPrecision => {}
                D::NoPerspective => data.interpolation = Interpolation::NoPerspective,
                D::Flat => data.interpolation = Interpolation::Flat,
                D::Centroid => data.centroid = true,
                D::Sample => data.sample = true,
                D::Invariant => data.invariant = true,
                D::Constant => {
                    assert!(initializer.is_some(), "`Constant` variable without initializer");
                    data.read_only = true;
                }
                D::NonWritable => data.read_only = true,
                D::Location => location = Some(dec.literal(0)),
                D::Component => data.location_frac = dec.literal(0),
                D::Index => data.index = Some(dec.literal(0)),
                D::Binding => {
                    data.binding = dec.literal(0) as i32;
                    data.explicit_binding = true;
                }
                D::DescriptorSet => data.descriptor_set = dec.literal(0) as i32,
                D::BuiltIn => {
                    let b = spirv::BuiltIn::from_u32(dec.literal(0))
                        .ok_or_else(|| Error::unsupported(format!("builtin {}", dec.literal(0))))?;
                    if b == spirv::BuiltIn::WorkgroupSize {
                        // Really a constant, known from the execution modes.
                        let words = self.module.info.local_size.into_iter().collect();
                        let value =
                            cx.intern(ConstDef { ty: ty.ty, kind: ConstKind::Scalars(words) });
                        initializer = Some(value);
                        mode = VarMode::Global;
                        data.read_only = true;
                        continue;
                    }
                    let (builtin_location, builtin_mode) =
                        builtin_location(b, mode, self.options.stage)?;
                    data.location = Some(builtin_location);
                    data.explicit_location = true;
                    mode = builtin_mode;
                    if matches!(mode, VarMode::ShaderIn | VarMode::SystemValue) {
                        data.read_only = true;
                    }
                    if matches!(b, spirv::BuiltIn::FragCoord | spirv::BuiltIn::SamplePosition) {
                        data.origin_upper_left = self.module.info.origin_upper_left;
                    }
                    builtin = Some(b);
                }

                D::Patch => return Err(Error::unsupported("tessellation patch variables")),

                D::Block
                | D::BufferBlock
                | D::RowMajor
                | D::ColMajor
                | D::GLSLShared
                | D::GLSLPacked
                | D::ArrayStride
                | D::MatrixStride
                | D::Offset
                | D::Coherent
                | D::Volatile
                | D::Restrict
                | D::Aliased
                | D::NonReadable
                | D::SpecId => {
                    log::debug!("ignoring decoration {:?} on variable %{id}", dec.decoration);
                }
                decoration => {
                    log::debug!("unknown decoration {decoration:?} on variable %{id}");
                }
            }
        }

        // Non-builtin locations are relative to the first generic slot.
        if data.location.is_none() {
            let stage = self.options.stage;
            data.location = location.map(|location| match mode {
                VarMode::ShaderOut if stage == spirv::ExecutionModel::Fragment => {
                    Location::FragResult(FRAG_RESULT_DATA0 + location)
                }
                VarMode::ShaderIn if stage == spirv::ExecutionModel::Vertex => {
                    Location::VertAttrib(VERT_ATTRIB_GENERIC0 + location)
                }
                _ => Location::Varying(VARYING_SLOT_VAR0 + location),
            });
        }

        if storage_class == S::PushConstant {
            data.descriptor_set = -1;
            data.binding = -1;
        }

        match mode {
            VarMode::ShaderIn => self.module.info.num_inputs += 1,
            VarMode::ShaderOut => self.module.info.num_outputs += 1,
            _ => {}
        }

        let var = self.define_var(VarDecl {
            name: self.name_of(id),
            ty: ty.ty,
            mode,
            interface_type,
            initializer,
            data,
        });
        log::trace!("%{id}: {var:?} ({mode:?})");
        if let Some(b) = builtin {
            self.builtins.insert((b, mode), var);
        }

        let deref = Deref::root(var, ty.ty);
        self.values.push(id, SpvValue::Deref(DerefValue { deref, ty: ty.clone() }));

        // Struct interfaces (blocks) don't get their own variable in the
        // list, their builtin members or block accesses do instead.
        let is_struct_interface =
            interface_type.map_or(false, |i| matches!(cx[i], TypeDef::Struct { .. }));
        if mode == VarMode::Local {
            self.fb().body.locals.push(var);
        } else if !is_struct_interface {
            self.module.global_vars.push(var);
        }
        Ok(())
    }

    /// The singleton variable for `builtin` (replacing block members).
    fn builtin_variable(
        &mut self,
        builtin: spirv::BuiltIn,
        mode: VarMode,
        ty: Type,
    ) -> Result<Var, Error> {
        let (location, mode) = builtin_location(builtin, mode, self.options.stage)?;
        if let Some(&var) = self.builtins.get(&(builtin, mode)) {
            return Ok(var);
        }

        let data = VarData {
            location: Some(location),
            explicit_location: true,
            read_only: matches!(mode, VarMode::ShaderIn | VarMode::SystemValue),
            origin_upper_left: matches!(
                builtin,
                spirv::BuiltIn::FragCoord | spirv::BuiltIn::SamplePosition
            ) && self.module.info.origin_upper_left,
            ..VarData::default()
        };
        let var = self.define_var(VarDecl {
            name: Some(self.cx.intern(format!("{builtin:?}"))),
            ty,
            mode,
            interface_type: None,
            initializer: None,
            data,
        });
        log::trace!("builtin {builtin:?} ({mode:?}): {var:?}");
        self.module.global_vars.push(var);
        self.builtins.insert((builtin, mode), var);
        Ok(var)
    }

    /// Whether `var` is a UBO/SSBO/push constant block, whose memory is only
    /// reachable through explicit offsets.
    pub(super) fn is_external_block(&self, var: Var) -> bool {
        let decl = &self.module.vars[var];
        matches!(decl.mode, VarMode::Uniform | VarMode::ShaderStorage)
            && decl.interface_type.map_or(false, |i| matches!(self.cx[i], TypeDef::Struct { .. }))
    }

    fn array_index(&mut self, id: Id) -> ArrayIndex {
        match self.values.get_untyped(id) {
            SpvValue::Constant { .. } => ArrayIndex::Direct(self.const_u32(id)),
            _ => ArrayIndex::Indirect(self.ssa_leaf(id)),
        }
    }

    pub(super) fn handle_memory(&mut self, inst: spv::Inst<'a>) -> Result<(), Error> {
        use spirv::Op;
        let w = inst.words;
        let op = inst.op().expect("dispatched on a known opcode");
        match op {
            Op::AccessChain | Op::InBoundsAccessChain => self.handle_access_chain(inst)?,

            Op::Load | Op::AtomicLoad => {
                let src = self.values.deref(w[3]).clone();
                let interface = self.module.vars[src.deref.var].interface_type;
                if interface.map_or(false, |i| {
                    matches!(self.cx[i], TypeDef::Sampler(_) | TypeDef::Image(_))
                }) {
                    // Images and samplers are only ever used through their variable.
                    self.values.push(w[2], SpvValue::Deref(src));
                } else {
                    let value = self.variable_load(&src);
                    self.push_ssa(w[2], value);
                }
            }

            Op::Store | Op::AtomicStore => {
                let (dest, value) = if op == Op::Store { (w[1], w[2]) } else { (w[1], w[4]) };
                let dest = self.values.deref(dest).clone();
                let value = self.ssa_value(value);
                self.variable_store(&value, &dest);
            }

            Op::CopyMemory => {
                let dest = self.values.deref(w[1]).clone();
                let src = self.values.deref(w[2]).clone();
                let has_interface = |deref: &Deref| {
                    self.module.vars[deref.var].interface_type.is_some()
                };
                if has_interface(&dest.deref) || has_interface(&src.deref) {
                    let value = self.variable_load(&src);
                    self.variable_store(&value, &dest);
                } else {
                    self.fb().intrinsic(IntrinsicOp::CopyVar, &[dest.deref, src.deref], &[], None);
                }
            }

            Op::ArrayLength => self.handle_array_length(inst)?,

            _ => unreachable!("{op:?} is not a memory instruction"),
        }
        Ok(())
    }

    fn handle_access_chain(&mut self, inst: spv::Inst<'a>) -> Result<(), Error> {
        let cx = self.cx.clone();
        let w = inst.words;
        let id = w[2];
        let (base, sampler) = match self.values.get_untyped(w[3]) {
            SpvValue::SampledImage(sampled) => {
                (sampled.image.clone(), Some(sampled.sampler.clone()))
            }
            SpvValue::Deref(base) => (base.clone(), None),
            value => unreachable!("access chain base %{} is not a pointer ({value:?})", w[3]),
        };

        let base_var = base.deref.var;
        let external = self.is_external_block(base_var);
        let mut deref = base.deref.clone();
        let mut ty = base.ty.clone();
        for &index in inst.from(4) {
            let (link, elem_ty) = match cx[ty.ty] {
                TypeDef::Struct { .. } => {
                    let member = self.const_u32(index);
                    (DerefLink::Struct(member), ty.members[member as usize].clone())
                }
                TypeDef::Array { .. } | TypeDef::Matrix { .. } | TypeDef::Vector { .. } => {
                    (DerefLink::Array(self.array_index(index)), ty.element().clone())
                }
                ref def => unreachable!("access chain indexing into {def:?}"),
            };
            deref = deref.child(link, elem_ty.ty);
            ty = elem_ty;

            if let Some(builtin) = ty.builtin {
                // Builtin members live in their own variables, keeping only
                // the per-vertex index (of geometry shader inputs).
                let (base_var_ty, base_mode) = {
                    let decl = &self.module.vars[base_var];
                    (decl.ty, decl.mode)
                };
                let per_vertex = matches!(cx[base_var_ty], TypeDef::Array { .. });
                let (var_ty, path) = if per_vertex {
                    assert_eq!(self.options.stage, spirv::ExecutionModel::Geometry);
                    let len = self.module.info.vertices_in;
                    let array_ty = cx.intern(TypeDef::Array { elem: ty.ty, len });
                    (array_ty, deref.path[..1].iter().copied().collect())
                } else {
                    (ty.ty, SmallVec::new())
                };
                let var = self.builtin_variable(builtin, base_mode, var_ty)?;
                deref = Deref { var, path, ty: ty.ty };
            }
        }

        // Blocks keep the layout of the whole block, for computing offsets.
        let deref_value = DerefValue { deref, ty: if external { base.ty } else { ty } };
        let value = match sampler {
            Some(sampler) => SpvValue::SampledImage(Rc::new(SampledImage {
                image: deref_value,
                sampler,
            })),
            None => SpvValue::Deref(deref_value),
        };
        self.values.push(id, value);
        Ok(())
    }

    pub(super) fn variable_load(&mut self, src: &DerefValue) -> Rc<SsaValue> {
        if self.is_external_block(src.deref.var) {
            return self.block_load(src);
        }

        let var_ty = self.module.vars[src.deref.var].ty;
        let (tail, component) = split_component(&self.cx, var_ty, &src.deref);
        let value = self.load_deref(&tail);
        match component {
            None => value,
            Some(index) => {
                let elem_ty = self.cx.element_type(tail.ty);
                let fb = self.fb();
                let elem = match index {
                    ArrayIndex::Direct(i) => fb.channel(value.def(), i as u8),
                    ArrayIndex::Indirect(i) => fb.vector_extract_dynamic(value.def(), i),
                };
                SsaValue::leaf(elem_ty, elem)
            }
        }
    }

    pub(super) fn variable_store(&mut self, value: &Rc<SsaValue>, dest: &DerefValue) {
        if self.is_external_block(dest.deref.var) {
            assert_eq!(
                self.module.vars[dest.deref.var].mode,
                VarMode::ShaderStorage,
                "only SSBOs can be stored to"
            );
            self.block_store(value, dest);
            return;
        }

        let var_ty = self.module.vars[dest.deref.var].ty;
        let (tail, component) = split_component(&self.cx, var_ty, &dest.deref);
        match component {
            None => self.store_deref(&tail, value),
            Some(index) => {
                // Read-modify-write of the whole vector.
                let vector = self.load_deref(&tail).def();
                let fb = self.fb();
                let inserted = match index {
                    ArrayIndex::Direct(i) => fb.vector_insert(vector, value.def(), i as u8),
                    ArrayIndex::Indirect(i) => fb.vector_insert_dynamic(vector, value.def(), i),
                };
                self.store_deref(&tail, &SsaValue::leaf(tail.ty, inserted));
            }
        }
    }

    /// Load through `src` (which can't select a vector component), one
    /// scalar/vector leaf at a time.
    pub(super) fn load_deref(&mut self, src: &Deref) -> Rc<SsaValue> {
        let cx = self.cx.clone();
        match &cx[src.ty] {
            def @ (TypeDef::Scalar(_) | TypeDef::Vector { .. }) => {
                let num_components = def.vector_elements();
                let is_uniform = self.module.vars[src.var].mode == VarMode::Uniform;
                let fb = self.fb();
                let mut value = Value::Inst(fb.intrinsic(
                    IntrinsicOp::LoadVar,
                    std::slice::from_ref(src),
                    &[],
                    Some(num_components),
                ));
                // Booleans in uniform memory are any non-zero value.
                if is_uniform && def.scalar_kind() == Some(ScalarKind::Bool) {
                    let zero = fb.imm_u32(0);
                    value = fb.alu2(AluOp::Ine, value, zero);
                }
                SsaValue::leaf(src.ty, value)
            }
            TypeDef::Matrix { .. } | TypeDef::Array { .. } => {
                let elem = cx.element_type(src.ty);
                let elems = (0..cx.aggregate_len(src.ty) as u32)
                    .map(|i| {
                        self.load_deref(&src.child(DerefLink::Array(ArrayIndex::Direct(i)), elem))
                    })
                    .collect();
                SsaValue::aggregate(src.ty, elems)
            }
            TypeDef::Struct { fields } => {
                let elems = fields
                    .iter()
                    .enumerate()
                    .map(|(i, &field)| {
                        self.load_deref(&src.child(DerefLink::Struct(i as u32), field))
                    })
                    .collect();
                SsaValue::aggregate(src.ty, elems)
            }
            def => unreachable!("can't load a {def:?}"),
        }
    }

    pub(super) fn store_deref(&mut self, dest: &Deref, value: &Rc<SsaValue>) {
        let cx = self.cx.clone();
        match &cx[dest.ty] {
            def @ (TypeDef::Scalar(_) | TypeDef::Vector { .. }) => {
                let write_mask = (1u8 << def.vector_elements()) - 1;
                self.fb().intrinsic(
                    IntrinsicOp::StoreVar { write_mask },
                    std::slice::from_ref(dest),
                    &[value.def()],
                    None,
                );
            }
            TypeDef::Matrix { .. } | TypeDef::Array { .. } => {
                let elem = cx.element_type(dest.ty);
                for (i, elem_value) in value.elems().iter().enumerate() {
                    let link = DerefLink::Array(ArrayIndex::Direct(i as u32));
                    self.store_deref(&dest.child(link, elem), elem_value);
                }
            }
            TypeDef::Struct { fields } => {
                for (i, (&field, elem_value)) in fields.iter().zip(value.elems()).enumerate() {
                    self.store_deref(&dest.child(DerefLink::Struct(i as u32), field), elem_value);
                }
            }
            def => unreachable!("can't store a {def:?}"),
        }
    }

    pub(super) fn handle_function_call(&mut self, inst: spv::Inst<'a>) -> Result<(), Error> {
        let cx = self.cx.clone();
        let w = inst.words;
        let callee = self.values.func(w[3]).clone();

        let mut args = SmallVec::new();
        for &arg in inst.from(4) {
            if let SpvValue::Deref(arg) = self.values.get_untyped(arg) {
                args.push(arg.deref.clone());
                continue;
            }
            // Parameters are all pointers, so SSA values are passed through
            // temporaries.
            let value = self.ssa_value(arg);
            let tmp = self.define_var(VarDecl {
                name: Some(cx.intern("arg_tmp")),
                ty: value.ty,
                mode: VarMode::Local,
                interface_type: None,
                initializer: None,
                data: VarData::default(),
            });
            self.fb().body.locals.push(tmp);
            let tmp = Deref::root(tmp, value.ty);
            self.store_deref(&tmp, &value);
            args.push(tmp);
        }

        let ret_ty = callee.ret_type.ty;
        let returns_void = matches!(cx[ret_ty], TypeDef::Void);
        let leaves = if returns_void { SmallVec::new() } else { leaf_types(&cx, ret_ty) };
        let outputs = leaves
            .iter()
            .map(|&leaf| SsaDest { num_components: cx[leaf].vector_elements() })
            .collect();
        let call = self.fb().insert(InstDef {
            kind: InstKind::Call { callee: callee.func, args, outputs },
            inputs: SmallVec::new(),
            output: None,
        });

        if returns_void {
            self.values.push(w[2], SpvValue::Undef(callee.ret_type));
        } else {
            let mut idx = 0;
            let ssa = SsaValue::from_type(&cx, ret_ty, &mut |_| {
                let output = Value::CallOutput { call, idx };
                idx += 1;
                output
            });
            self.push_ssa(w[2], ssa);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Context, EntityDefs};

    #[test]
    fn builtin_modes() {
        let stage = spirv::ExecutionModel::Fragment;
        let (location, mode) =
            builtin_location(spirv::BuiltIn::FragCoord, VarMode::ShaderIn, stage).unwrap();
        assert_eq!((location, mode), (Location::Varying(VARYING_SLOT_POS), VarMode::ShaderIn));

        let (location, mode) =
            builtin_location(spirv::BuiltIn::SampleMask, VarMode::ShaderIn, stage).unwrap();
        assert_eq!(location, Location::SystemValue(SystemValue::SampleMaskIn));
        assert_eq!(mode, VarMode::SystemValue);

        let (location, _) =
            builtin_location(spirv::BuiltIn::SampleMask, VarMode::ShaderOut, stage).unwrap();
        assert_eq!(location, Location::FragResult(FRAG_RESULT_SAMPLE_MASK));

        let vertex = spirv::ExecutionModel::Vertex;
        let (location, _) =
            builtin_location(spirv::BuiltIn::VertexId, VarMode::ShaderIn, vertex).unwrap();
        assert_eq!(location, Location::SystemValue(SystemValue::VertexIdZeroBase));
        for builtin in [spirv::BuiltIn::ViewportIndex, spirv::BuiltIn::CullDistance] {
            assert!(builtin_location(builtin, VarMode::ShaderOut, vertex).is_err());
        }
    }

    #[test]
    fn component_selection_is_split_off() {
        let cx = Context::new();
        let vec4 = cx.vector_type(ScalarKind::Float, 4);
        let array = cx.intern(TypeDef::Array { elem: vec4, len: 3 });
        let mut vars = EntityDefs::<Var, VarDecl>::new();
        let var = vars.define(
            &cx,
            VarDecl {
                name: None,
                ty: array,
                mode: VarMode::Local,
                interface_type: None,
                initializer: None,
                data: VarData::default(),
            },
        );

        let float = cx.scalar_type(ScalarKind::Float);
        let element = Deref::root(var, array).child(DerefLink::Array(ArrayIndex::Direct(1)), vec4);
        let component = element.child(DerefLink::Array(ArrayIndex::Direct(2)), float);

        let (tail, index) = split_component(&cx, array, &component);
        assert_eq!(tail, element);
        assert_eq!(index, Some(ArrayIndex::Direct(2)));

        let (tail, index) = split_component(&cx, array, &element);
        assert_eq!(tail, element);
        assert_eq!(index, None);
    }
}
