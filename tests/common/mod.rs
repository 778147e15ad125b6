//! Tiny SPIR-V assembler (sections are kept apart so they can be filled in
//! any order, then concatenated in the order the binary format requires),
//! along with helpers for inspecting the translated IR.

#![allow(dead_code)]

use spirv::Op;
use spirv_ssa::{CfList, CfNode, FuncDefBody, Inst, InstKind, Module, Value};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub type Id = u32;

fn emit(section: &mut Vec<u32>, op: Op, operands: &[u32]) {
    let len = u32::try_from(1 + operands.len()).unwrap();
    section.push((len << 16) | op as u32);
    section.extend_from_slice(operands);
}

fn string(s: &str) -> Vec<u32> {
    spirv_ssa::spv::encode_literal_string(s).collect()
}

pub struct Asm {
    next_id: Id,

    capabilities: Vec<u32>,
    ext_inst_imports: Vec<u32>,
    memory_model: Vec<u32>,
    entry_points: Vec<u32>,
    execution_modes: Vec<u32>,
    names: Vec<u32>,
    decorations: Vec<u32>,
    globals: Vec<u32>,
    functions: Vec<u32>,
}

impl Asm {
    /// Start a `Shader`-capable, `Logical`/`GLSL450` module.
    pub fn new() -> Self {
        let mut asm = Self {
            next_id: 1,
            capabilities: vec![],
            ext_inst_imports: vec![],
            memory_model: vec![],
            entry_points: vec![],
            execution_modes: vec![],
            names: vec![],
            decorations: vec![],
            globals: vec![],
            functions: vec![],
        };
        asm.capability(spirv::Capability::Shader);
        emit(
            &mut asm.memory_model,
            Op::MemoryModel,
            &[spirv::AddressingModel::Logical as u32, spirv::MemoryModel::GLSL450 as u32],
        );
        asm
    }

    pub fn id(&mut self) -> Id {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn finish(self) -> Vec<u32> {
        let mut words = vec![spirv_ssa::spv::MAGIC, 0x0001_0000, 0, self.next_id, 0];
        for section in [
            self.capabilities,
            self.ext_inst_imports,
            self.memory_model,
            self.entry_points,
            self.execution_modes,
            self.names,
            self.decorations,
            self.globals,
            self.functions,
        ] {
            words.extend(section);
        }
        words
    }

    pub fn capability(&mut self, cap: spirv::Capability) {
        emit(&mut self.capabilities, Op::Capability, &[cap as u32]);
    }

    pub fn import_glsl450(&mut self) -> Id {
        let id = self.id();
        let operands: Vec<_> = [id].into_iter().chain(string("GLSL.std.450")).collect();
        emit(&mut self.ext_inst_imports, Op::ExtInstImport, &operands);
        id
    }

    pub fn entry_point(&mut self, model: spirv::ExecutionModel, func: Id, name: &str) {
        let operands: Vec<_> = [model as u32, func].into_iter().chain(string(name)).collect();
        emit(&mut self.entry_points, Op::EntryPoint, &operands);
    }

    pub fn execution_mode(&mut self, func: Id, mode: spirv::ExecutionMode, literals: &[u32]) {
        let operands: Vec<_> =
            [func, mode as u32].into_iter().chain(literals.iter().copied()).collect();
        emit(&mut self.execution_modes, Op::ExecutionMode, &operands);
    }

    pub fn name(&mut self, target: Id, name: &str) {
        let operands: Vec<_> = [target].into_iter().chain(string(name)).collect();
        emit(&mut self.names, Op::Name, &operands);
    }

    pub fn decorate(&mut self, target: Id, decoration: spirv::Decoration, literals: &[u32]) {
        let operands: Vec<_> =
            [target, decoration as u32].into_iter().chain(literals.iter().copied()).collect();
        emit(&mut self.decorations, Op::Decorate, &operands);
    }

    pub fn member_decorate(
        &mut self,
        target: Id,
        member: u32,
        decoration: spirv::Decoration,
        literals: &[u32],
    ) {
        let operands: Vec<_> = [target, member, decoration as u32]
            .into_iter()
            .chain(literals.iter().copied())
            .collect();
        emit(&mut self.decorations, Op::MemberDecorate, &operands);
    }

    /// Other annotations (i.e. decoration groups).
    pub fn annotation(&mut self, op: Op, operands: &[u32]) {
        emit(&mut self.decorations, op, operands);
    }

    /// Global instruction whose result ID comes first (i.e. types).
    pub fn ty(&mut self, op: Op, operands: &[u32]) -> Id {
        let id = self.id();
        let operands: Vec<_> = [id].into_iter().chain(operands.iter().copied()).collect();
        emit(&mut self.globals, op, &operands);
        id
    }

    /// Global instruction with a result type and ID (constants, variables).
    pub fn global(&mut self, op: Op, ty: Id, operands: &[u32]) -> Id {
        let id = self.id();
        let operands: Vec<_> = [ty, id].into_iter().chain(operands.iter().copied()).collect();
        emit(&mut self.globals, op, &operands);
        id
    }

    pub fn type_void(&mut self) -> Id {
        self.ty(Op::TypeVoid, &[])
    }
    pub fn type_bool(&mut self) -> Id {
        self.ty(Op::TypeBool, &[])
    }
    pub fn type_int(&mut self, signed: bool) -> Id {
        self.ty(Op::TypeInt, &[32, u32::from(signed)])
    }
    pub fn type_float(&mut self) -> Id {
        self.ty(Op::TypeFloat, &[32])
    }
    pub fn type_vector(&mut self, elem: Id, len: u32) -> Id {
        self.ty(Op::TypeVector, &[elem, len])
    }
    pub fn type_pointer(&mut self, storage: spirv::StorageClass, pointee: Id) -> Id {
        self.ty(Op::TypePointer, &[storage as u32, pointee])
    }
    pub fn type_function(&mut self, ret: Id, params: &[Id]) -> Id {
        let operands: Vec<_> = [ret].into_iter().chain(params.iter().copied()).collect();
        self.ty(Op::TypeFunction, &operands)
    }

    pub fn constant(&mut self, ty: Id, bits: u32) -> Id {
        self.global(Op::Constant, ty, &[bits])
    }

    pub fn variable(&mut self, ptr_ty: Id, storage: spirv::StorageClass) -> Id {
        self.global(Op::Variable, ptr_ty, &[storage as u32])
    }

    /// Function body instruction without a result.
    pub fn op(&mut self, op: Op, operands: &[u32]) {
        emit(&mut self.functions, op, operands);
    }

    /// Function body instruction with a result type and ID.
    pub fn value(&mut self, op: Op, ty: Id, operands: &[u32]) -> Id {
        let id = self.id();
        let operands: Vec<_> = [ty, id].into_iter().chain(operands.iter().copied()).collect();
        emit(&mut self.functions, op, &operands);
        id
    }

    pub fn begin_function(&mut self, func: Id, ret: Id, fn_ty: Id) {
        self.op(Op::Function, &[ret, func, 0, fn_ty]);
    }

    pub fn label(&mut self, label: Id) {
        self.op(Op::Label, &[label]);
    }
}

/// All instructions of a function body, in program order.
pub fn all_insts(body: &FuncDefBody) -> Vec<Inst> {
    fn collect(body: &FuncDefBody, list: &CfList, insts: &mut Vec<Inst>) {
        for &node in list {
            match node {
                CfNode::Block(block) => insts.extend(&body.blocks[block].insts),
                CfNode::If(node) => {
                    collect(body, &body.ifs[node].then_body, insts);
                    collect(body, &body.ifs[node].else_body, insts);
                }
                CfNode::Loop(node) => {
                    collect(body, &body.loops[node].body, insts);
                    collect(body, &body.loops[node].continue_body, insts);
                }
            }
        }
    }
    let mut insts = vec![];
    collect(body, &body.body, &mut insts);
    insts
}

/// Body of the module's entry point.
pub fn entry_body(module: &Module) -> &FuncDefBody {
    &module.funcs[module.entry_point.expect("no entry point")].body
}

/// Expression tree computing `v` (ignoring instruction identity), for
/// comparing values computed separately in the same way.
pub fn expr(body: &FuncDefBody, v: Value) -> String {
    let Value::Inst(inst) = v else {
        return format!("{v:?}");
    };
    let def = &body.insts[inst];
    let inputs = def.inputs.iter().map(|&input| expr(body, input)).collect::<Vec<_>>().join(", ");
    match &def.kind {
        InstKind::LoadConst(words) => format!("{words:?}"),
        InstKind::Alu(op) => format!("{}({inputs})", op.name()),
        InstKind::Swizzle(comps) => format!("{inputs}.{comps:?}"),
        InstKind::Intrinsic { op, derefs } => format!("{op:?}({derefs:?}; {inputs})"),
        InstKind::Undef => "undef".into(),
        _ => format!("%{}", inst.index()),
    }
}
