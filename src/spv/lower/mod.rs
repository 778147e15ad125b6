//! SPIR-V to structured SSA IR lowering.
//!
//! Translation happens in a few passes over the (already split into
//! instructions) module:
//! * the preamble (capabilities, entry points, debug names, decorations)
//! * globals (types, constants, global variables), recorded in a [`ValueTable`]
//! * a scan of all functions, creating their declarations, parameters and
//!   recording the structured control-flow (merge/branch) of every block
//! * one structured walk per function, emitting IR as it goes, followed by
//!   the resolution of phi sources (which may be defined in later blocks)

mod alu;
mod block_io;
mod cfg;
mod constants;
mod decorations;
mod glsl450;
mod image;
mod phi;
mod ssa;
mod texture;
mod types;
mod values;
mod variables;

use self::cfg::{FuncInfo, FuncState};
use self::values::{ExtInstSet, SpvValue, ValueTable};
use crate::builder::FuncBuilder;
use crate::spv::read::{invalid, InstPos, ModuleParser};
use crate::spv::{self, Id};
use crate::{Context, DepthLayout, InternedStr, Module, Primitive, Var, VarDecl, VarMode};
use indexmap::IndexMap;
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;
use std::io;
use std::path::Path;
use std::rc::Rc;

pub(super) type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;

/// What to translate out of a SPIR-V module (which may contain several
/// entry points, for several stages).
#[derive(Clone, Debug)]
pub struct Options {
    pub stage: spirv::ExecutionModel,
    pub entry_point: String,
}

impl Options {
    pub fn new(stage: spirv::ExecutionModel, entry_point: impl Into<String>) -> Self {
        Self { stage, entry_point: entry_point.into() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed binary (bad header, truncated instructions, etc.).
    #[error(transparent)]
    Read(#[from] io::Error),

    #[error("unsupported SPIR-V feature: {what}")]
    Unsupported { what: String },

    #[error("no {stage:?} entry point named `{name}`")]
    EntryPointNotFound { name: String, stage: spirv::ExecutionModel },

    #[error("unsupported extended instruction set `{0}` (only GLSL.std.450 is)")]
    InvalidExtInstImport(String),

    #[error("only the `Logical` addressing model and `GLSL450` memory model are supported")]
    InvalidMemoryModel,
}

impl Error {
    pub(crate) fn unsupported(what: impl Into<String>) -> Self {
        Error::Unsupported { what: what.into() }
    }
}

/// Translate the entry point described by `options`, out of the SPIR-V module
/// in `words` (which may be in either endianness).
pub fn translate(words: &[u32], options: &Options) -> Result<Module, Error> {
    Module::lower_from_spv_words(Rc::new(Context::new()), words.to_vec(), options)
}

/// Like [`translate`], but starting from the raw bytes of a `.spv` file.
pub fn translate_bytes(bytes: Vec<u8>, options: &Options) -> Result<Module, Error> {
    Module::lower_from_spv_bytes(Rc::new(Context::new()), bytes, options)
}

impl crate::Module {
    pub fn lower_from_spv_file(
        cx: Rc<Context>,
        path: impl AsRef<Path>,
        options: &Options,
    ) -> Result<Self, Error> {
        Self::lower_from_spv_module_parser(cx, ModuleParser::read_from_spv_file(path)?, options)
    }

    pub fn lower_from_spv_bytes(
        cx: Rc<Context>,
        bytes: Vec<u8>,
        options: &Options,
    ) -> Result<Self, Error> {
        Self::lower_from_spv_module_parser(cx, ModuleParser::read_from_spv_bytes(bytes)?, options)
    }

    pub fn lower_from_spv_words(
        cx: Rc<Context>,
        words: Vec<u32>,
        options: &Options,
    ) -> Result<Self, Error> {
        Self::lower_from_spv_module_parser(cx, ModuleParser::read_from_spv_words(words)?, options)
    }

    pub fn lower_from_spv_module_parser(
        cx: Rc<Context>,
        mut parser: ModuleParser,
        options: &Options,
    ) -> Result<Self, Error> {
        let header = parser.header;
        let insts = parser.by_ref().collect::<io::Result<Vec<_>>>()?;
        let words = parser.into_words();

        log::debug!(
            "translating {:?} entry point `{}` ({} instructions, SPIR-V {:?})",
            options.stage,
            options.entry_point,
            insts.len(),
            header.version_major_minor(),
        );

        Translator::new(cx, options, header.id_bound, &words, insts).translate()
    }
}

/// Module section an instruction belongs to, which can only increase
/// while going through the module.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Seq {
    Capability,
    Extension,
    ExtInstImport,
    MemoryModel,
    EntryPoint,
    ExecutionMode,
    DebugStringAndSource,
    DebugName,
    DebugModuleProcessed,
    Decoration,
    Globals,
}

struct Translator<'a> {
    cx: Rc<Context>,
    options: &'a Options,

    words: &'a [u32],
    insts: Vec<InstPos>,

    values: ValueTable<'a>,
    module: Module,

    entry_point: Option<Id>,
    execution_modes: Vec<(Id, spirv::ExecutionMode, &'a [u32])>,

    /// Dedicated variables for the builtin members of interface blocks
    /// (e.g. `gl_Position` inside `gl_PerVertex`).
    builtins: FxIndexMap<(spirv::BuiltIn, VarMode), Var>,

    funcs: Vec<FuncInfo>,

    /// Only `Some` while translating a function body.
    func: Option<FuncState>,
}

impl<'a> Translator<'a> {
    fn new(
        cx: Rc<Context>,
        options: &'a Options,
        id_bound: u32,
        words: &'a [u32],
        insts: Vec<InstPos>,
    ) -> Self {
        let module = Module::new(cx.clone(), options.stage);
        Self {
            cx,
            options,
            words,
            insts,
            values: ValueTable::new(id_bound),
            module,
            entry_point: None,
            execution_modes: vec![],
            builtins: FxIndexMap::default(),
            funcs: vec![],
            func: None,
        }
    }

    fn inst(&self, idx: usize) -> spv::Inst<'a> {
        let words: &'a [u32] = self.words;
        let InstPos { pos, opcode, len } = self.insts[idx];
        spv::Inst { pos, opcode, words: &words[pos..][..len] }
    }

    fn func_state(&mut self) -> &mut FuncState {
        self.func.as_mut().expect("not inside a function body")
    }

    fn fb(&mut self) -> &mut FuncBuilder {
        &mut self.func_state().fb
    }

    fn name_of(&self, id: Id) -> Option<InternedStr> {
        self.values.name(id).map(|name| self.cx.intern(name))
    }

    fn define_var(&mut self, decl: VarDecl) -> Var {
        self.module.vars.define(&self.cx, decl)
    }

    fn translate(mut self) -> Result<Module, Error> {
        use spirv::ExecutionModel as M;
        match self.options.stage {
            M::Vertex | M::Geometry | M::Fragment | M::GLCompute => {}
            stage => return Err(Error::unsupported(format!("{stage:?} shaders"))),
        }
        if self.options.stage == M::Geometry {
            self.module.info.invocations = 1;
        }

        // Everything before the first function: preamble and globals.
        let mut seq = None;
        let mut has_memory_model = false;
        let mut idx = 0;
        while idx < self.insts.len() {
            let inst = self.inst(idx);
            let Some(op) = inst.op() else {
                return Err(Error::unsupported(format!("unknown opcode {}", inst.opcode)));
            };
            if op == spirv::Op::Function {
                break;
            }
            let next_seq = match op {
                // Debug line information can appear anywhere, and is ignored.
                spirv::Op::Line | spirv::Op::NoLine | spirv::Op::Nop => {
                    idx += 1;
                    continue;
                }
                spirv::Op::MemoryModel => {
                    has_memory_model = true;
                    self.handle_preamble(inst)?
                }
                _ => match self.handle_preamble(inst)? {
                    Some(next_seq) => Some(next_seq),
                    None => {
                        // Entry points and execution modes must be known before
                        // any global variables are created.
                        if seq < Some(Seq::Globals) {
                            self.check_entry_point()?;
                            self.apply_execution_modes()?;
                        }
                        self.handle_global(inst)?;
                        Some(Seq::Globals)
                    }
                },
            };
            if next_seq < seq {
                return Err(invalid(&format!(
                    "out of order: {next_seq:?} instructions must precede {seq:?} instructions"
                ))
                .into());
            }
            seq = next_seq;
            idx += 1;
        }
        if !has_memory_model {
            return Err(invalid("missing OpMemoryModel").into());
        }
        if seq < Some(Seq::Globals) {
            self.check_entry_point()?;
            self.apply_execution_modes()?;
        }

        self.scan_functions(idx)?;
        for i in 0..self.funcs.len() {
            self.emit_function(i)?;
        }

        let entry_point = self.entry_point.expect("entry point checked above");
        self.module.entry_point = Some(self.values.func(entry_point).func);
        Ok(self.module)
    }

    fn check_entry_point(&self) -> Result<(), Error> {
        if self.entry_point.is_none() {
            return Err(Error::EntryPointNotFound {
                name: self.options.entry_point.clone(),
                stage: self.options.stage,
            });
        }
        Ok(())
    }

    /// Handle a preamble instruction, returning its section, or `None` if
    /// `inst` isn't part of the preamble.
    fn handle_preamble(&mut self, inst: spv::Inst<'a>) -> Result<Option<Seq>, Error> {
        let w = inst.words;
        let literal_string = |idx: usize| {
            spv::decode_literal_string(inst.from(idx))
                .map_err(|_| Error::from(invalid("literal string is not valid UTF-8")))
        };

        let op = inst.op().expect("unknown opcodes rejected by caller");
        Ok(Some(match op {
            spirv::Op::Capability => {
                let cap = spirv::Capability::from_u32(w[1])
                    .ok_or_else(|| Error::unsupported(format!("capability {}", w[1])))?;
                check_capability(cap)?;
                Seq::Capability
            }
            spirv::Op::Extension => {
                let (ext, _) = literal_string(1)?;
                log::debug!("ignoring extension `{ext}`");
                Seq::Extension
            }
            spirv::Op::ExtInstImport => {
                let (name, _) = literal_string(2)?;
                if name != "GLSL.std.450" {
                    return Err(Error::InvalidExtInstImport(name));
                }
                self.values.push(w[1], SpvValue::ExtInstImport(ExtInstSet::GlslStd450));
                Seq::ExtInstImport
            }
            spirv::Op::MemoryModel => {
                if (w[1], w[2])
                    != (spirv::AddressingModel::Logical as u32, spirv::MemoryModel::GLSL450 as u32)
                {
                    return Err(Error::InvalidMemoryModel);
                }
                Seq::MemoryModel
            }
            spirv::Op::EntryPoint => {
                let (name, _) = literal_string(3)?;
                if w[1] == self.options.stage as u32 && name == self.options.entry_point {
                    if let Some(prev) = self.entry_point {
                        return Err(invalid(&format!(
                            "entry point `{name}` declared twice (%{prev} and %{})",
                            w[2]
                        ))
                        .into());
                    }
                    self.entry_point = Some(w[2]);
                }
                Seq::EntryPoint
            }
            spirv::Op::ExecutionMode => {
                let mode = spirv::ExecutionMode::from_u32(w[2])
                    .ok_or_else(|| Error::unsupported(format!("execution mode {}", w[2])))?;
                self.execution_modes.push((w[1], mode, inst.from(3)));
                Seq::ExecutionMode
            }
            spirv::Op::String => {
                let (s, _) = literal_string(2)?;
                self.values.push(w[1], SpvValue::String(s));
                Seq::DebugStringAndSource
            }
            spirv::Op::Source | spirv::Op::SourceContinued | spirv::Op::SourceExtension => {
                Seq::DebugStringAndSource
            }
            spirv::Op::Name => {
                let (name, _) = literal_string(2)?;
                self.values.set_name(w[1], name);
                Seq::DebugName
            }
            spirv::Op::MemberName => Seq::DebugName,
            spirv::Op::ModuleProcessed => Seq::DebugModuleProcessed,
            spirv::Op::Decorate
            | spirv::Op::MemberDecorate
            | spirv::Op::DecorationGroup
            | spirv::Op::GroupDecorate
            | spirv::Op::GroupMemberDecorate => {
                decorations::handle_decoration(&mut self.values, inst);
                Seq::Decoration
            }
            _ => return Ok(None),
        }))
    }

    fn apply_execution_modes(&mut self) -> Result<(), Error> {
        use spirv::ExecutionMode as E;
        let entry_point = self.entry_point.expect("entry point checked by caller");
        let stage = self.options.stage;
        let info = &mut self.module.info;
        for &(target, mode, literals) in &self.execution_modes {
            if target != entry_point {
                continue;
            }
            let geometry_only = |what| {
                if stage == spirv::ExecutionModel::Geometry {
                    Ok(())
                } else {
                    Err(Error::unsupported(format!("{what:?} outside geometry shaders")))
                }
            };
            match mode {
                E::OriginUpperLeft => info.origin_upper_left = true,
                E::OriginLowerLeft => info.origin_upper_left = false,
                E::PixelCenterInteger => info.pixel_center_integer = true,
                E::EarlyFragmentTests => info.early_fragment_tests = true,

                E::DepthGreater => info.depth_layout = DepthLayout::Greater,
                E::DepthLess => info.depth_layout = DepthLayout::Less,
                E::DepthUnchanged => info.depth_layout = DepthLayout::Unchanged,
                // NOTE: `DepthReplacing` only says `FragDepth` is written,
                // without any promise about the direction of the change.
                E::DepthReplacing => {
                    if info.depth_layout == DepthLayout::None {
                        info.depth_layout = DepthLayout::Any;
                    }
                }

                E::LocalSize => info.local_size = [literals[0], literals[1], literals[2]],

                E::Invocations => info.invocations = literals[0].max(1),
                E::OutputVertices => info.vertices_out = literals[0],

                E::InputPoints
                | E::InputLines
                | E::InputLinesAdjacency
                | E::Triangles
                | E::InputTrianglesAdjacency => {
                    geometry_only(mode)?;
                    let (primitive, vertices_in) = match mode {
                        E::InputPoints => (Primitive::Points, 1),
                        E::InputLines => (Primitive::Lines, 2),
                        E::InputLinesAdjacency => (Primitive::LinesAdjacency, 4),
                        E::Triangles => (Primitive::Triangles, 3),
                        E::InputTrianglesAdjacency => (Primitive::TrianglesAdjacency, 6),
                        _ => unreachable!(),
                    };
                    info.input_primitive = Some(primitive);
                    info.vertices_in = vertices_in;
                }
                E::OutputPoints => info.output_primitive = Some(Primitive::Points),
                E::OutputLineStrip => info.output_primitive = Some(Primitive::LineStrip),
                E::OutputTriangleStrip => info.output_primitive = Some(Primitive::TriangleStrip),

                E::SpacingEqual
                | E::SpacingFractionalEven
                | E::SpacingFractionalOdd
                | E::VertexOrderCw
                | E::VertexOrderCcw
                | E::PointMode
                | E::Quads
                | E::Isolines => {
                    return Err(Error::unsupported(format!("tessellation mode {mode:?}")));
                }
                E::Xfb => return Err(Error::unsupported("transform feedback")),

                _ => log::debug!("ignoring execution mode {mode:?}"),
            }
        }
        Ok(())
    }

    fn handle_global(&mut self, inst: spv::Inst<'a>) -> Result<(), Error> {
        use spirv::Op;
        let w = inst.words;
        let op = inst.op().expect("unknown opcodes rejected by caller");
        match op {
            Op::TypeVoid
            | Op::TypeBool
            | Op::TypeInt
            | Op::TypeFloat
            | Op::TypeVector
            | Op::TypeMatrix
            | Op::TypeImage
            | Op::TypeSampler
            | Op::TypeSampledImage
            | Op::TypeArray
            | Op::TypeRuntimeArray
            | Op::TypeStruct
            | Op::TypePointer
            | Op::TypeFunction
            | Op::TypeOpaque
            | Op::TypeEvent
            | Op::TypeDeviceEvent
            | Op::TypeReserveId
            | Op::TypeQueue
            | Op::TypePipe
            | Op::TypeForwardPointer => self.handle_type(inst),

            Op::ConstantTrue
            | Op::ConstantFalse
            | Op::Constant
            | Op::ConstantComposite
            | Op::ConstantNull
            | Op::ConstantSampler
            | Op::SpecConstantTrue
            | Op::SpecConstantFalse
            | Op::SpecConstant
            | Op::SpecConstantComposite
            | Op::SpecConstantOp => self.handle_constant(inst),

            Op::Variable => self.handle_variable(inst),

            Op::Undef => {
                let ty = self.values.ty(w[1]).clone();
                self.values.push(w[2], SpvValue::Undef(ty));
                Ok(())
            }

            _ => Err(Error::unsupported(format!("{op:?} outside of functions"))),
        }
    }

    /// Translate one (non-terminator) instruction of a function body.
    fn handle_body_inst(&mut self, inst: spv::Inst<'a>) -> Result<(), Error> {
        use spirv::Op;
        let w = inst.words;
        let Some(op) = inst.op() else {
            return Err(Error::unsupported(format!("unknown opcode {}", inst.opcode)));
        };
        match op {
            Op::Line | Op::NoLine | Op::Nop | Op::SelectionMerge | Op::LoopMerge => Ok(()),

            Op::Undef => {
                let ty = self.values.ty(w[1]).clone();
                self.values.push(w[2], SpvValue::Undef(ty));
                Ok(())
            }

            Op::Variable => self.handle_variable(inst),
            Op::Load
            | Op::Store
            | Op::CopyMemory
            | Op::AccessChain
            | Op::InBoundsAccessChain
            | Op::ArrayLength
            | Op::AtomicLoad
            | Op::AtomicStore => self.handle_memory(inst),
            Op::FunctionCall => self.handle_function_call(inst),

            Op::ExtInst => {
                match self.values.get_untyped(w[3]) {
                    SpvValue::ExtInstImport(ExtInstSet::GlslStd450) => {}
                    value => unreachable!("OpExtInst with non-import %{} ({value:?})", w[3]),
                }
                self.handle_glsl450(inst)
            }

            Op::SampledImage
            | Op::Image
            | Op::ImageSampleImplicitLod
            | Op::ImageSampleExplicitLod
            | Op::ImageSampleDrefImplicitLod
            | Op::ImageSampleDrefExplicitLod
            | Op::ImageSampleProjImplicitLod
            | Op::ImageSampleProjExplicitLod
            | Op::ImageSampleProjDrefImplicitLod
            | Op::ImageSampleProjDrefExplicitLod
            | Op::ImageFetch
            | Op::ImageGather
            | Op::ImageDrefGather
            | Op::ImageQuerySizeLod
            | Op::ImageQuerySize
            | Op::ImageQueryLod
            | Op::ImageQueryLevels
            | Op::ImageQuerySamples => self.handle_texture(inst),

            Op::ImageRead | Op::ImageWrite | Op::ImageTexelPointer => self.handle_image(inst),

            Op::AtomicExchange
            | Op::AtomicCompareExchange
            | Op::AtomicCompareExchangeWeak
            | Op::AtomicIIncrement
            | Op::AtomicIDecrement
            | Op::AtomicIAdd
            | Op::AtomicISub
            | Op::AtomicSMin
            | Op::AtomicUMin
            | Op::AtomicSMax
            | Op::AtomicUMax
            | Op::AtomicAnd
            | Op::AtomicOr
            | Op::AtomicXor => match self.values.get_untyped(w[3]) {
                SpvValue::ImagePointer(_) => self.handle_image(inst),
                _ => self.handle_ssbo_atomic(inst),
            },

            Op::VectorExtractDynamic
            | Op::VectorInsertDynamic
            | Op::VectorShuffle
            | Op::CompositeConstruct
            | Op::CompositeExtract
            | Op::CompositeInsert
            | Op::CopyObject => self.handle_composite(inst),

            Op::Phi => self.handle_phi(inst),

            Op::EmitVertex
            | Op::EndPrimitive
            | Op::EmitStreamVertex
            | Op::EndStreamPrimitive
            | Op::ControlBarrier
            | Op::MemoryBarrier => self.handle_barrier(inst),

            // Anything else is either an ALU instruction, or unsupported.
            _ => self.handle_alu(inst),
        }
    }
}

fn check_capability(cap: spirv::Capability) -> Result<(), Error> {
    use spirv::Capability as C;
    match cap {
        C::Matrix
        | C::Shader
        | C::Geometry
        | C::GeometryPointSize
        | C::ClipDistance
        | C::ImageGatherExtended
        | C::SampleRateShading
        | C::DerivativeControl
        | C::Sampled1D
        | C::Image1D
        | C::SampledRect
        | C::ImageRect
        | C::SampledBuffer
        | C::ImageBuffer
        | C::SampledCubeArray
        | C::ImageCubeArray
        | C::ImageQuery
        | C::StorageImageExtendedFormats
        | C::StorageImageReadWithoutFormat
        | C::StorageImageWriteWithoutFormat
        | C::UniformBufferArrayDynamicIndexing
        | C::SampledImageArrayDynamicIndexing
        | C::StorageBufferArrayDynamicIndexing
        | C::StorageImageArrayDynamicIndexing => Ok(()),
        _ => Err(Error::unsupported(format!("capability {cap:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities() {
        assert!(check_capability(spirv::Capability::Shader).is_ok());
        assert!(check_capability(spirv::Capability::ImageQuery).is_ok());
        assert!(matches!(
            check_capability(spirv::Capability::Float64),
            Err(Error::Unsupported { .. })
        ));
        assert!(matches!(
            check_capability(spirv::Capability::Tessellation),
            Err(Error::Unsupported { .. })
        ));
    }

    #[test]
    fn section_order() {
        assert!(Seq::Capability < Seq::MemoryModel);
        assert!(Seq::Decoration < Seq::Globals);
        assert!(None < Some(Seq::Capability));
    }

    #[test]
    fn error_messages() {
        let err = Error::EntryPointNotFound {
            name: "main".into(),
            stage: spirv::ExecutionModel::Fragment,
        };
        assert_eq!(err.to_string(), "no Fragment entry point named `main`");
        assert_eq!(
            Error::unsupported("switches").to_string(),
            "unsupported SPIR-V feature: switches"
        );
    }
}
