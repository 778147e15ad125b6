//! Plain-text rendering of a [`Module`] (mostly for debugging and tests).
//!
//! The output is line-oriented, with structured control-flow indented:
//! ```text
//! var v0 "color": out vec4<f32> @frag_result(4)
//!
//! func f0 "main"() -> void {
//!   block b0 {
//!     %0 = load_const(0x3f800000) : 1
//!     intrinsic store_var.0x1(v0, %0)
//!   }
//! }
//! ```

// FIXME(eddyb) stop using `itertools` for methods like `intersperse` when they
// get stabilized on `Iterator` instead.
#![allow(unstable_name_collisions)]
use itertools::Itertools as _;

use crate::{
    ArrayIndex, CfList, CfNode, Context, Deref, DerefLink, FuncDecl, FuncDefBody, InstDef,
    InstKind, IntrinsicOp, JumpKind, Location, Module, ScalarKind, TexSrc, Type, TypeDef, Value,
    Var, VarMode,
};
use std::fmt::{self, Write as _};

impl Module {
    /// Render the whole module (variables, then functions), see the module docs.
    pub fn print(&self) -> Printed<'_> {
        Printed { module: self }
    }
}

/// [`fmt::Display`] adapter returned by [`Module::print`].
pub struct Printed<'a> {
    module: &'a Module,
}

impl fmt::Display for Printed<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let module = self.module;
        let mut printer = Printer { cx: module.cx_ref(), module, out: String::new(), indent: 0 };
        printer.module().map_err(|_| fmt::Error)?;
        f.write_str(&printer.out)
    }
}

pub fn type_to_string(cx: &Context, ty: Type) -> String {
    let scalar = |kind| match kind {
        ScalarKind::Bool => "bool",
        ScalarKind::Int => "i32",
        ScalarKind::Uint => "u32",
        ScalarKind::Float => "f32",
    };
    match &cx[ty] {
        TypeDef::Void => "void".into(),
        &TypeDef::Scalar(kind) => scalar(kind).into(),
        &TypeDef::Vector { elem, len } => format!("vec{len}<{}>", scalar(elem)),
        &TypeDef::Matrix { rows, cols } => format!("mat{cols}x{rows}"),
        &TypeDef::Array { elem, len: 0 } => format!("[{}]", type_to_string(cx, elem)),
        &TypeDef::Array { elem, len } => format!("[{}; {len}]", type_to_string(cx, elem)),
        TypeDef::Struct { fields } => {
            format!("struct {{ {} }}", fields.iter().map(|&f| type_to_string(cx, f)).join(", "))
        }
        TypeDef::Sampler(desc) | TypeDef::Image(desc) => {
            let what = if matches!(cx[ty], TypeDef::Sampler(_)) { "sampler" } else { "image" };
            format!(
                "{what}{:?}{}{}<{}>",
                desc.dim,
                if desc.arrayed { "Array" } else { "" },
                if desc.shadow { "Shadow" } else { "" },
                scalar(desc.result)
            )
        }
        TypeDef::Function { params, ret } => format!(
            "fn({}) -> {}",
            params.iter().map(|&p| type_to_string(cx, p)).join(", "),
            type_to_string(cx, *ret)
        ),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Value::Inst(inst) => write!(f, "%{}", inst.index()),
            Value::CallOutput { call, idx } => write!(f, "%{}.{idx}", call.index()),
        }
    }
}

impl fmt::Display for Deref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.var.index())?;
        for link in &self.path {
            match *link {
                DerefLink::Array(ArrayIndex::Direct(i)) => write!(f, "[{i}]")?,
                DerefLink::Array(ArrayIndex::Indirect(v)) => write!(f, "[{v}]")?,
                DerefLink::Struct(i) => write!(f, ".{i}")?,
            }
        }
        Ok(())
    }
}

struct Printer<'a> {
    cx: &'a Context,
    module: &'a Module,
    out: String,
    indent: usize,
}

impl Printer<'_> {
    fn line(&mut self, args: fmt::Arguments<'_>) -> fmt::Result {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
        self.out.write_fmt(args)?;
        self.out.push('\n');
        Ok(())
    }

    fn module(&mut self) -> fmt::Result {
        let module = self.module;
        self.line(format_args!("shader {:?}", module.stage))?;
        self.line(format_args!("info {:?}", module.info))?;

        for &var in &module.global_vars {
            let decl = self.var_decl(var);
            self.line(format_args!("var {decl}"))?;
        }

        for &func in &module.all_funcs {
            self.out.push('\n');
            let entry = if module.entry_point == Some(func) { "entry " } else { "" };
            self.func(entry, func.index(), &module.funcs[func])?;
        }
        Ok(())
    }

    fn var_decl(&self, var: Var) -> String {
        let decl = &self.module.vars[var];
        let mut s = format!("v{}", var.index());
        if let Some(name) = decl.name {
            write!(s, " {:?}", &self.cx[name]).unwrap();
        }
        let mode = match decl.mode {
            VarMode::ShaderIn => "in",
            VarMode::ShaderOut => "out",
            VarMode::Global => "global",
            VarMode::Local => "local",
            VarMode::Param => "param",
            VarMode::Uniform => "uniform",
            VarMode::ShaderStorage => "storage",
            VarMode::SystemValue => "system_value",
            VarMode::Shared => "shared",
        };
        write!(s, ": {mode} {}", type_to_string(self.cx, decl.ty)).unwrap();

        match decl.data.location {
            Some(Location::Varying(slot)) => write!(s, " @varying({slot})").unwrap(),
            Some(Location::VertAttrib(slot)) => write!(s, " @vert_attrib({slot})").unwrap(),
            Some(Location::FragResult(slot)) => write!(s, " @frag_result({slot})").unwrap(),
            Some(Location::SystemValue(sv)) => write!(s, " @system_value({sv:?})").unwrap(),
            None => {}
        }
        if matches!(decl.mode, VarMode::Uniform | VarMode::ShaderStorage) {
            write!(s, " @set({}) @binding({})", decl.data.descriptor_set, decl.data.binding)
                .unwrap();
        }
        if let Some(init) = decl.initializer {
            write!(s, " = {:?}", self.cx[init].kind).unwrap();
        }
        s
    }

    fn func(&mut self, entry: &str, idx: u32, decl: &FuncDecl) -> fmt::Result {
        let name = decl.name.map(|name| format!(" {:?}", &self.cx[name])).unwrap_or_default();
        let params = decl.params.iter().map(|&param| self.var_decl(param)).join(", ");
        let ret = type_to_string(self.cx, decl.ret_type);
        self.line(format_args!("{entry}func f{idx}{name}({params}) -> {ret} {{"))?;
        self.indent += 1;
        for &local in &decl.body.locals {
            let local = self.var_decl(local);
            self.line(format_args!("var {local}"))?;
        }
        self.cf_list(&decl.body, &decl.body.body)?;
        self.indent -= 1;
        self.line(format_args!("}}"))
    }

    fn cf_list(&mut self, body: &FuncDefBody, list: &CfList) -> fmt::Result {
        for &node in list {
            match node {
                CfNode::Block(block) => {
                    self.line(format_args!("block b{} {{", block.index()))?;
                    self.indent += 1;
                    for &inst in &body.blocks[block].insts {
                        let text = inst_to_string(&body.insts[inst]);
                        match body.insts[inst].output {
                            Some(dest) => self.line(format_args!(
                                "%{} = {text} : {}",
                                inst.index(),
                                dest.num_components
                            ))?,
                            None => self.line(format_args!("{text}"))?,
                        }
                    }
                    self.indent -= 1;
                    self.line(format_args!("}}"))?;
                }
                CfNode::If(node) => {
                    let def = &body.ifs[node];
                    self.line(format_args!("if {} {{", def.condition))?;
                    self.indent += 1;
                    self.cf_list(body, &def.then_body)?;
                    self.indent -= 1;
                    self.line(format_args!("}} else {{"))?;
                    self.indent += 1;
                    self.cf_list(body, &def.else_body)?;
                    self.indent -= 1;
                    self.line(format_args!("}}"))?;
                }
                CfNode::Loop(node) => {
                    let def = &body.loops[node];
                    self.line(format_args!("loop {{"))?;
                    self.indent += 1;
                    self.cf_list(body, &def.body)?;
                    self.indent -= 1;
                    self.line(format_args!("}} continue {{"))?;
                    self.indent += 1;
                    self.cf_list(body, &def.continue_body)?;
                    self.indent -= 1;
                    self.line(format_args!("}}"))?;
                }
            }
        }
        Ok(())
    }
}

fn intrinsic_name(op: IntrinsicOp) -> String {
    match op {
        IntrinsicOp::LoadVar => "load_var".into(),
        IntrinsicOp::StoreVar { write_mask } => format!("store_var.{write_mask:#x}"),
        IntrinsicOp::CopyVar => "copy_var".into(),
        IntrinsicOp::VulkanResourceIndex { desc_set, binding, mode } => {
            format!("vulkan_resource_index.{desc_set}.{binding}.{mode:?}")
        }
        IntrinsicOp::LoadUbo => "load_ubo".into(),
        IntrinsicOp::LoadSsbo => "load_ssbo".into(),
        IntrinsicOp::LoadPushConstant { base, range } => {
            format!("load_push_constant.{base}.{range}")
        }
        IntrinsicOp::StoreSsbo { write_mask } => format!("store_ssbo.{write_mask:#x}"),
        IntrinsicOp::SsboAtomic(op) => format!("ssbo_atomic_{}", op.name()),
        IntrinsicOp::GetBufferSize => "get_buffer_size".into(),
        IntrinsicOp::ImageLoad => "image_load".into(),
        IntrinsicOp::ImageStore => "image_store".into(),
        IntrinsicOp::ImageAtomic(op) => format!("image_atomic_{}", op.name()),
        IntrinsicOp::Discard => "discard".into(),
        IntrinsicOp::EmitVertex { stream } => format!("emit_vertex.{stream}"),
        IntrinsicOp::EndPrimitive { stream } => format!("end_primitive.{stream}"),
        IntrinsicOp::Barrier => "barrier".into(),
        IntrinsicOp::MemoryBarrier => "memory_barrier".into(),
    }
}

/// Single-line form of one instruction (sans its output).
pub fn inst_to_string(inst: &InstDef) -> String {
    let inputs = inst.inputs.iter().join(", ");
    match &inst.kind {
        InstKind::Alu(op) => format!("{}({inputs})", op.name()),
        InstKind::Swizzle(comps) => {
            let comps = comps.iter().map(|&c| b"xyzw"[usize::from(c)] as char).collect::<String>();
            format!("{inputs}.{comps}")
        }
        InstKind::LoadConst(words) => {
            format!("load_const({})", words.iter().map(|w| format!("{w:#x}")).join(", "))
        }
        InstKind::Undef => "undef".into(),
        InstKind::Phi(edges) => format!(
            "phi({})",
            edges.iter().map(|edge| format!("b{}: {}", edge.pred.index(), edge.value)).join(", ")
        ),
        InstKind::Intrinsic { op, derefs } => format!(
            "intrinsic {}({})",
            intrinsic_name(*op),
            derefs
                .iter()
                .map(|d| d.to_string())
                .chain(inst.inputs.iter().map(|v| v.to_string()))
                .join(", ")
        ),
        InstKind::Tex(tex) => {
            let srcs = tex
                .srcs
                .iter()
                .map(|&TexSrc { kind, value }| format!("{kind:?}: {value}"))
                .join(", ");
            let texture = tex.texture.as_ref().map(|t| format!(", {t}")).unwrap_or_default();
            format!(
                "tex.{:?}{}({}{texture}; {srcs})",
                tex.op,
                if tex.op == crate::TexOp::Tg4 {
                    format!(".{}", tex.component)
                } else {
                    String::new()
                },
                tex.sampler
            )
        }
        InstKind::Call { callee, args, .. } => {
            format!("call f{}({})", callee.index(), args.iter().join(", "))
        }
        InstKind::Jump(kind) => {
            let kind = match kind {
                JumpKind::Break => "break",
                JumpKind::Continue => "continue",
                JumpKind::Return => "return",
            };
            if inputs.is_empty() { kind.into() } else { format!("{kind} {inputs}") }
        }
    }
}
