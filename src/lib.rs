//! Structured SSA IR, and translation into it from SPIR-V ([`spv::lower`]).
//!
//! The IR is a tree of structured control-flow nodes (blocks, `if`s and
//! `loop`s) holding SSA instructions, similar in spirit to the IRs used by
//! shader compilers right after their frontend: variables are still memory
//! (loaded/stored through [`Deref`] chains), interface blocks are accessed
//! through explicit byte offsets, and control-flow merges use phi instructions.

use arrayvec::ArrayVec;
use smallvec::SmallVec;

pub mod builder;
mod context;
pub use context::{
    Block, Const, Context, EntityDefs, Func, IfNode, Inst, InternedStr, LoopNode, Type, Var,
};

pub mod print;
pub mod spv;

pub use spv::lower::{Error, Options};

// HACK(eddyb) this only serves to disallow modifying the `cx` field of `Module`.
mod sealed {
    use super::*;
    use std::rc::Rc;

    pub struct Module {
        /// Context used for everything interned, in this module.
        ///
        /// Notable choices made for this field:
        /// * private to disallow switching the context of a module
        /// * `Rc` sharing to allow multiple modules to use the same context
        ///   (`Context: !Sync` because of the interners so it can't be `Arc`)
        cx: Rc<Context>,

        pub stage: spirv::ExecutionModel,
        pub info: ShaderInfo,

        /// Definitions of all variables (global, local and parameters alike).
        pub vars: EntityDefs<Var, VarDecl>,
        pub global_vars: Vec<Var>,

        pub funcs: EntityDefs<Func, FuncDecl>,
        pub all_funcs: Vec<Func>,

        pub entry_point: Option<Func>,
    }

    impl Module {
        pub fn new(cx: Rc<Context>, stage: spirv::ExecutionModel) -> Self {
            Self {
                cx,

                stage,
                info: ShaderInfo::default(),

                vars: Default::default(),
                global_vars: vec![],

                funcs: Default::default(),
                all_funcs: vec![],

                entry_point: None,
            }
        }

        // FIXME(eddyb) `cx_ref` might be the better default in situations where
        // the module doesn't need to be modified, figure out if that's common.
        pub fn cx(&self) -> Rc<Context> {
            self.cx.clone()
        }

        pub fn cx_ref(&self) -> &Rc<Context> {
            &self.cx
        }
    }
}
pub use sealed::Module;

/// Per-shader state gathered from execution modes and variable declarations.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShaderInfo {
    pub origin_upper_left: bool,
    pub pixel_center_integer: bool,
    pub early_fragment_tests: bool,
    pub depth_layout: DepthLayout,

    /// Geometry shader state.
    pub invocations: u32,
    pub vertices_in: u32,
    pub vertices_out: u32,
    pub input_primitive: Option<Primitive>,
    pub output_primitive: Option<Primitive>,

    /// Compute shader workgroup size.
    pub local_size: [u32; 3],

    /// Size (in bytes) of the push constant block.
    pub num_uniforms: u32,

    pub num_inputs: u32,
    pub num_outputs: u32,
    pub num_ubos: u32,
    pub num_ssbos: u32,
    pub num_textures: u32,
    pub num_images: u32,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DepthLayout {
    #[default]
    None,
    Any,
    Greater,
    Less,
    Unchanged,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Primitive {
    Points,
    Lines,
    LinesAdjacency,
    Triangles,
    TrianglesAdjacency,
    LineStrip,
    TriangleStrip,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Bool,
    Int,
    Uint,
    Float,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SamplerDim {
    Dim1D,
    Dim2D,
    Dim3D,
    Cube,
    Rect,
    Buf,
}

impl SamplerDim {
    /// Number of coordinate components needed to address a texel (sans array layer).
    pub fn coord_components(self) -> u8 {
        match self {
            Self::Dim1D | Self::Buf => 1,
            Self::Dim2D | Self::Rect => 2,
            Self::Dim3D | Self::Cube => 3,
        }
    }
}

/// Image type shape, shared between samplers (`OpTypeImage` with `Sampled = 1`)
/// and storage images (`Sampled = 2`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ImageDesc {
    pub dim: SamplerDim,
    pub arrayed: bool,
    pub shadow: bool,
    pub result: ScalarKind,

    /// GL internal format enum (e.g. `GL_RGBA8`), `0` if unknown.
    pub format: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeDef {
    Void,
    Scalar(ScalarKind),
    Vector { elem: ScalarKind, len: u8 },
    /// Always column-major, with `rows`-component float columns.
    Matrix { rows: u8, cols: u8 },
    /// A `len` of `0` indicates an unsized (runtime) array.
    Array { elem: Type, len: u32 },
    Struct { fields: SmallVec<[Type; 4]> },
    Sampler(ImageDesc),
    Image(ImageDesc),
    Function { params: SmallVec<[Type; 4]>, ret: Type },
}

impl TypeDef {
    pub fn vector_or_scalar(elem: ScalarKind, len: u8) -> Self {
        assert!((1..=4).contains(&len));
        if len == 1 { TypeDef::Scalar(elem) } else { TypeDef::Vector { elem, len } }
    }

    pub fn is_vector_or_scalar(&self) -> bool {
        matches!(self, TypeDef::Scalar(_) | TypeDef::Vector { .. })
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, TypeDef::Scalar(_))
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self, TypeDef::Matrix { .. })
    }

    /// Scalar kind of scalars, vectors and matrices.
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match *self {
            TypeDef::Scalar(kind) | TypeDef::Vector { elem: kind, .. } => Some(kind),
            TypeDef::Matrix { .. } => Some(ScalarKind::Float),
            _ => None,
        }
    }

    /// Number of components in a vector (`1` for scalars, rows for matrices).
    pub fn vector_elements(&self) -> u8 {
        match *self {
            TypeDef::Scalar(_) => 1,
            TypeDef::Vector { len, .. } => len,
            TypeDef::Matrix { rows, .. } => rows,
            _ => 0,
        }
    }

    /// Number of matrix columns (`1` for scalars and vectors).
    pub fn matrix_columns(&self) -> u8 {
        match *self {
            TypeDef::Scalar(_) | TypeDef::Vector { .. } => 1,
            TypeDef::Matrix { cols, .. } => cols,
            _ => 0,
        }
    }
}

impl Context {
    pub fn scalar_type(&self, kind: ScalarKind) -> Type {
        self.intern(TypeDef::Scalar(kind))
    }

    pub fn vector_type(&self, kind: ScalarKind, len: u8) -> Type {
        self.intern(TypeDef::vector_or_scalar(kind, len))
    }

    pub fn matrix_type(&self, rows: u8, cols: u8) -> Type {
        assert!(cols > 1 && rows > 1);
        self.intern(TypeDef::Matrix { rows, cols })
    }

    /// Type of one column of a matrix, one element of an array, or one
    /// component of a vector.
    pub fn element_type(&self, ty: Type) -> Type {
        match self[ty] {
            TypeDef::Vector { elem, .. } => self.scalar_type(elem),
            TypeDef::Matrix { rows, .. } => self.vector_type(ScalarKind::Float, rows),
            TypeDef::Array { elem, .. } => elem,
            ref def => unreachable!("{def:?} has no elements"),
        }
    }

    /// Number of children in the SSA representation of a value of type `ty`.
    pub fn aggregate_len(&self, ty: Type) -> usize {
        match &self[ty] {
            TypeDef::Matrix { cols, .. } => usize::from(*cols),
            TypeDef::Array { len, .. } => *len as usize,
            TypeDef::Struct { fields } => fields.len(),
            _ => 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConstDef {
    pub ty: Type,
    pub kind: ConstKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConstKind {
    /// Scalar, vector and (column-major flattened) matrix constants, one
    /// 32-bit word per component.
    Scalars(SmallVec<[u32; 4]>),
    Composite(SmallVec<[Const; 4]>),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum VarMode {
    ShaderIn,
    ShaderOut,
    Global,
    Local,
    Param,
    Uniform,
    ShaderStorage,
    SystemValue,
    Shared,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Interpolation {
    #[default]
    Smooth,
    Flat,
    NoPerspective,
}

/// Where a shader input/output lives.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Location {
    Varying(u32),
    VertAttrib(u32),
    FragResult(u32),
    SystemValue(SystemValue),
}

pub mod slots {
    pub const VARYING_SLOT_POS: u32 = 0;
    pub const VARYING_SLOT_PSIZ: u32 = 12;
    pub const VARYING_SLOT_CLIP_DIST0: u32 = 17;
    pub const VARYING_SLOT_PRIMITIVE_ID: u32 = 19;
    pub const VARYING_SLOT_LAYER: u32 = 20;
    pub const VARYING_SLOT_VIEWPORT: u32 = 21;
    pub const VARYING_SLOT_FACE: u32 = 22;
    pub const VARYING_SLOT_PNTC: u32 = 23;
    pub const VARYING_SLOT_VAR0: u32 = 32;

    pub const VERT_ATTRIB_GENERIC0: u32 = 17;

    pub const FRAG_RESULT_DEPTH: u32 = 0;
    pub const FRAG_RESULT_SAMPLE_MASK: u32 = 3;
    pub const FRAG_RESULT_DATA0: u32 = 4;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SystemValue {
    VertexId,
    VertexIdZeroBase,
    InstanceId,
    InvocationId,
    SampleId,
    SamplePos,
    SampleMaskIn,
    NumWorkGroups,
    WorkGroupId,
    LocalInvocationId,
    LocalInvocationIndex,
    GlobalInvocationId,
    HelperInvocation,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VarData {
    pub location: Option<Location>,
    pub location_frac: u32,
    /// Set for builtins, whose `location` is final (not relative to a base).
    pub explicit_location: bool,
    pub index: Option<u32>,
    /// `-1` for push constants.
    pub descriptor_set: i32,
    pub binding: i32,
    pub explicit_binding: bool,
    pub interpolation: Interpolation,
    pub centroid: bool,
    pub sample: bool,
    pub invariant: bool,
    pub read_only: bool,
    pub origin_upper_left: bool,
    pub image_format: u32,
}

pub struct VarDecl {
    pub name: Option<InternedStr>,
    pub ty: Type,
    pub mode: VarMode,

    /// Block/sampler/image type this variable is (an array of) an interface of.
    pub interface_type: Option<Type>,

    pub initializer: Option<Const>,
    pub data: VarData,
}

pub struct FuncDecl {
    pub name: Option<InternedStr>,
    pub ret_type: Type,

    /// One variable (of mode [`VarMode::Param`]) per parameter.
    pub params: SmallVec<[Var; 2]>,

    pub body: FuncDefBody,
}

#[derive(Default)]
pub struct FuncDefBody {
    pub locals: Vec<Var>,

    pub insts: EntityDefs<Inst, InstDef>,
    pub blocks: EntityDefs<Block, BlockDef>,
    pub ifs: EntityDefs<IfNode, IfDef>,
    pub loops: EntityDefs<LoopNode, LoopDef>,

    pub body: CfList,
}

/// Ordered list of structured control-flow nodes, executed in sequence
/// (consecutive blocks simply fall through into each other).
pub type CfList = Vec<CfNode>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CfNode {
    Block(Block),
    If(IfNode),
    Loop(LoopNode),
}

#[derive(Default)]
pub struct BlockDef {
    pub insts: Vec<Inst>,
}

pub struct IfDef {
    pub condition: Value,
    pub then_body: CfList,
    pub else_body: CfList,
}

pub struct LoopDef {
    pub body: CfList,

    /// Continue construct, executed before every back-edge (including the
    /// ones taken by `continue` jumps in `body`).
    pub continue_body: CfList,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Value {
    Inst(Inst),
    CallOutput { call: Inst, idx: u32 },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SsaDest {
    pub num_components: u8,
}

pub struct InstDef {
    pub kind: InstKind,

    // FIXME(eddyb) change the inline size of this to fit most instructions.
    pub inputs: SmallVec<[Value; 2]>,

    pub output: Option<SsaDest>,
}

pub enum InstKind {
    Alu(AluOp),
    /// Select (and reorder) components of the single input.
    Swizzle(ArrayVec<u8, 4>),
    LoadConst(SmallVec<[u32; 4]>),
    Undef,
    Phi(SmallVec<[PhiEdge; 2]>),
    Intrinsic {
        op: IntrinsicOp,
        derefs: SmallVec<[Deref; 2]>,
    },
    Tex(Box<TexInst>),
    Call {
        callee: Func,
        args: SmallVec<[Deref; 2]>,
        /// One output per scalar/vector leaf of the return value.
        outputs: SmallVec<[SsaDest; 1]>,
    },
    /// Must be the last instruction of its block. `Return` takes the
    /// (flattened) return value leaves as `inputs`.
    Jump(JumpKind),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PhiEdge {
    pub pred: Block,
    pub value: Value,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JumpKind {
    Break,
    Continue,
    Return,
}

/// Pointer into a variable, as a chain of array/struct selectors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Deref {
    pub var: Var,
    pub path: SmallVec<[DerefLink; 4]>,

    /// Type of the location pointed to (i.e. after the whole `path`).
    pub ty: Type,
}

impl Deref {
    /// The whole variable `var` (of type `ty`).
    pub fn root(var: Var, ty: Type) -> Self {
        Self { var, path: SmallVec::new(), ty }
    }

    pub fn child(&self, link: DerefLink, ty: Type) -> Self {
        let mut path = self.path.clone();
        path.push(link);
        Self { var: self.var, path, ty }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DerefLink {
    /// Array element, matrix column, or vector component.
    Array(ArrayIndex),
    Struct(u32),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArrayIndex {
    Direct(u32),
    Indirect(Value),
}

macro_rules! alu_ops {
    ($($op:ident => $name:literal $(: $size:literal)?),+ $(,)?) => {
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        pub enum AluOp {
            $($op),+
        }

        impl AluOp {
            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$op => $name),+
                }
            }

            /// Fixed number of output components, or `None` if the output
            /// is as wide as the (widest) input.
            pub fn output_size(self) -> Option<u8> {
                match self {
                    $(Self::$op => alu_ops!(@size $($size)?)),+
                }
            }
        }
    };
    (@size) => { None };
    (@size $size:literal) => { Some($size) };
}

alu_ops! {
    Fmov => "fmov",
    Imov => "imov",
    Fneg => "fneg",
    Ineg => "ineg",
    Inot => "inot",
    Fabs => "fabs",
    Iabs => "iabs",
    Fsat => "fsat",
    Fsign => "fsign",
    Isign => "isign",
    Frcp => "frcp",
    Frsq => "frsq",
    Fsqrt => "fsqrt",
    Fexp2 => "fexp2",
    Flog2 => "flog2",
    Fsin => "fsin",
    Fcos => "fcos",
    Ffloor => "ffloor",
    Fceil => "fceil",
    Ftrunc => "ftrunc",
    FroundEven => "fround_even",
    Ffract => "ffract",
    Fddx => "fddx",
    Fddy => "fddy",
    FddxFine => "fddx_fine",
    FddyFine => "fddy_fine",
    FddxCoarse => "fddx_coarse",
    FddyCoarse => "fddy_coarse",
    Fquantize2f16 => "fquantize2f16",
    F2i => "f2i",
    F2u => "f2u",
    I2f => "i2f",
    U2f => "u2f",
    Fadd => "fadd",
    Iadd => "iadd",
    Fsub => "fsub",
    Isub => "isub",
    Fmul => "fmul",
    Imul => "imul",
    Fdiv => "fdiv",
    Idiv => "idiv",
    Udiv => "udiv",
    Umod => "umod",
    Fmod => "fmod",
    Fmin => "fmin",
    Imin => "imin",
    Umin => "umin",
    Fmax => "fmax",
    Imax => "imax",
    Umax => "umax",
    Fpow => "fpow",
    Ldexp => "ldexp",
    Flt => "flt",
    Fge => "fge",
    Feq => "feq",
    Fne => "fne",
    Ilt => "ilt",
    Ige => "ige",
    Ieq => "ieq",
    Ine => "ine",
    Ult => "ult",
    Uge => "uge",
    Sge => "sge",
    Iand => "iand",
    Ior => "ior",
    Ixor => "ixor",
    Ishl => "ishl",
    Ishr => "ishr",
    Ushr => "ushr",
    Fdot2 => "fdot2": 1,
    Fdot3 => "fdot3": 1,
    Fdot4 => "fdot4": 1,
    BanyInequal2 => "bany_inequal2": 1,
    BanyInequal3 => "bany_inequal3": 1,
    BanyInequal4 => "bany_inequal4": 1,
    BallIequal2 => "ball_iequal2": 1,
    BallIequal3 => "ball_iequal3": 1,
    BallIequal4 => "ball_iequal4": 1,
    Vec2 => "vec2": 2,
    Vec3 => "vec3": 3,
    Vec4 => "vec4": 4,
    Bcsel => "bcsel",
    Ffma => "ffma",
    Flrp => "flrp",
    UaddCarry => "uadd_carry",
    UsubBorrow => "usub_borrow",
    UmulHigh => "umul_high",
    ImulHigh => "imul_high",
    BitfieldInsert => "bitfield_insert",
    UbitfieldExtract => "ubitfield_extract",
    IbitfieldExtract => "ibitfield_extract",
    BitfieldReverse => "bitfield_reverse",
    BitCount => "bit_count",
    UfindMsb => "ufind_msb",
    IfindMsb => "ifind_msb",
    FindLsb => "find_lsb",
    PackSnorm4x8 => "pack_snorm_4x8": 1,
    PackUnorm4x8 => "pack_unorm_4x8": 1,
    PackSnorm2x16 => "pack_snorm_2x16": 1,
    PackUnorm2x16 => "pack_unorm_2x16": 1,
    PackHalf2x16 => "pack_half_2x16": 1,
    UnpackSnorm4x8 => "unpack_snorm_4x8": 4,
    UnpackUnorm4x8 => "unpack_unorm_4x8": 4,
    UnpackSnorm2x16 => "unpack_snorm_2x16": 2,
    UnpackUnorm2x16 => "unpack_unorm_2x16": 2,
    UnpackHalf2x16 => "unpack_half_2x16": 2,
}

impl AluOp {
    /// `vecN` op gathering `n` scalars into a vector (`fmov` for `n == 1`).
    pub fn vec(n: usize) -> Self {
        match n {
            1 => Self::Fmov,
            2 => Self::Vec2,
            3 => Self::Vec3,
            4 => Self::Vec4,
            _ => unreachable!("no vec{n} ALU op"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AtomicOp {
    Add,
    Imin,
    Umin,
    Imax,
    Umax,
    And,
    Or,
    Xor,
    Exchange,
    /// Data operands are `[comparator, value]`.
    CompSwap,
}

impl AtomicOp {
    pub fn name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Imin => "imin",
            Self::Umin => "umin",
            Self::Imax => "imax",
            Self::Umax => "umax",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Exchange => "exchange",
            Self::CompSwap => "comp_swap",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IntrinsicOp {
    /// `derefs: [src]`.
    LoadVar,
    /// `derefs: [dst]`, `inputs: [value]`.
    StoreVar { write_mask: u8 },
    /// `derefs: [dst, src]`.
    CopyVar,

    /// `inputs: [resource_index]`.
    VulkanResourceIndex { desc_set: i32, binding: i32, mode: VarMode },
    /// `inputs: [resource_index, offset]`.
    LoadUbo,
    /// `inputs: [resource_index, offset]`.
    LoadSsbo,
    /// `inputs: [offset]`, the whole push constant block is accessible.
    LoadPushConstant { base: u32, range: u32 },
    /// `inputs: [value, resource_index, offset]`.
    StoreSsbo { write_mask: u8 },
    /// `inputs: [resource_index, offset, data...]`.
    SsboAtomic(AtomicOp),
    /// `inputs: [resource_index]`.
    GetBufferSize,

    /// `derefs: [image]`, `inputs: [coord, sample]`.
    ImageLoad,
    /// `derefs: [image]`, `inputs: [coord, sample, texel]`.
    ImageStore,
    /// `derefs: [image]`, `inputs: [coord, sample, data...]`.
    ImageAtomic(AtomicOp),

    Discard,
    EmitVertex { stream: u32 },
    EndPrimitive { stream: u32 },
    Barrier,
    MemoryBarrier,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TexOp {
    /// Regular sample.
    Tex,
    /// Sample with bias.
    Txb,
    /// Sample with explicit LOD.
    Txl,
    /// Sample with explicit derivatives.
    Txd,
    /// Texel fetch.
    Txf,
    /// Multisample texel fetch.
    TxfMs,
    /// Size query.
    Txs,
    /// LOD query.
    Lod,
    /// Gather.
    Tg4,
    QueryLevels,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TexSrcKind {
    Coord,
    Comparitor,
    Bias,
    Lod,
    Ddx,
    Ddy,
    Offset,
    MsIndex,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TexSrc {
    pub kind: TexSrcKind,
    pub value: Value,
}

#[derive(Clone, Debug)]
pub struct TexInst {
    pub op: TexOp,
    pub sampler: Deref,
    /// Separate image, when the sampler came from `OpSampledImage`.
    pub texture: Option<Deref>,
    pub dim: SamplerDim,
    pub is_array: bool,
    pub is_shadow: bool,
    pub coord_components: u8,
    /// Gather component (`0` unless `op` is `Tg4`).
    pub component: u8,
    pub dest_type: ScalarKind,
    pub srcs: SmallVec<[TexSrc; 4]>,
}
