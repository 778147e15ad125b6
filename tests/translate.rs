mod common;

use common::{all_insts, entry_body, expr, init_logging, Asm};
use spirv::{Decoration, ExecutionModel, Op, StorageClass};
use spirv_ssa::spv::lower::translate;
use spirv_ssa::slots::{VARYING_SLOT_POS, VARYING_SLOT_PSIZ};
use spirv_ssa::{
    AluOp, ArrayIndex, AtomicOp, CfNode, DerefLink, Error, FuncDefBody, Inst, InstKind,
    IntrinsicOp, JumpKind, Location, Module, Options, SamplerDim, TexOp, TexSrcKind, TypeDef,
    Value, Var, VarMode,
};

fn fragment(words: &[u32]) -> Module {
    translate(words, &Options::new(ExecutionModel::Fragment, "main")).unwrap()
}

fn intrinsics(body: &FuncDefBody, pred: impl Fn(IntrinsicOp) -> bool) -> Vec<Inst> {
    all_insts(body)
        .into_iter()
        .filter(|&inst| matches!(body.insts[inst].kind, InstKind::Intrinsic { op, .. } if pred(op)))
        .collect()
}

fn alus(body: &FuncDefBody, alu_op: AluOp) -> Vec<Inst> {
    all_insts(body)
        .into_iter()
        .filter(|&inst| matches!(body.insts[inst].kind, InstKind::Alu(op) if op == alu_op))
        .collect()
}

fn var_name(module: &Module, inst: &InstKind) -> String {
    let InstKind::Intrinsic { derefs, .. } = inst else { panic!("not an intrinsic") };
    let name = module.vars[derefs[0].var].name.expect("unnamed variable");
    module.cx_ref()[name].to_string()
}

fn var_named(module: &Module, body: &FuncDefBody, name: &str) -> Var {
    module
        .global_vars
        .iter()
        .chain(&body.locals)
        .copied()
        .find(|&var| module.vars[var].name.map_or(false, |n| &module.cx_ref()[n] == name))
        .unwrap_or_else(|| panic!("no variable named {name:?}"))
}

/// Intrinsics (matching `pred`) whose first deref is into `var`.
fn var_accesses(body: &FuncDefBody, var: Var, pred: impl Fn(IntrinsicOp) -> bool) -> Vec<Inst> {
    intrinsics(body, pred)
        .into_iter()
        .filter(|&inst| match &body.insts[inst].kind {
            InstKind::Intrinsic { derefs, .. } => derefs.first().map_or(false, |d| d.var == var),
            _ => false,
        })
        .collect()
}

fn is_store(op: IntrinsicOp) -> bool {
    matches!(op, IntrinsicOp::StoreVar { .. })
}

#[test]
fn constant_returned_from_a_call() {
    init_logging();
    let mut asm = Asm::new();
    let (main, answer) = (asm.id(), asm.id());
    asm.entry_point(ExecutionModel::Fragment, main, "main");
    asm.name(answer, "answer");

    let void = asm.type_void();
    let int = asm.type_int(true);
    let void_fn = asm.type_function(void, &[]);
    let int_fn = asm.type_function(int, &[]);
    let c42 = asm.constant(int, 42);
    let out_ptr = asm.type_pointer(StorageClass::Output, int);
    let out = asm.variable(out_ptr, StorageClass::Output);
    asm.decorate(out, Decoration::Location, &[0]);

    asm.begin_function(main, void, void_fn);
    let label = asm.id();
    asm.label(label);
    let result = asm.value(Op::FunctionCall, int, &[answer]);
    asm.op(Op::Store, &[out, result]);
    asm.op(Op::Return, &[]);
    asm.op(Op::FunctionEnd, &[]);

    asm.begin_function(answer, int, int_fn);
    let label = asm.id();
    asm.label(label);
    asm.op(Op::ReturnValue, &[c42]);
    asm.op(Op::FunctionEnd, &[]);

    let module = fragment(&asm.finish());
    assert_eq!(module.all_funcs.len(), 2);
    let answer = module.all_funcs[1];
    let decl = &module.funcs[answer];
    assert_eq!(&module.cx_ref()[decl.name.unwrap()], "answer");

    // One constant, returned as-is.
    let body = &decl.body;
    let insts = all_insts(body);
    assert_eq!(insts.len(), 2);
    assert!(matches!(&body.insts[insts[0]].kind, InstKind::LoadConst(words) if words[..] == [42]));
    let ret = &body.insts[insts[1]];
    assert!(matches!(ret.kind, InstKind::Jump(JumpKind::Return)));
    assert_eq!(ret.inputs[..], [Value::Inst(insts[0])]);

    // The caller stores the (only) output of the call.
    let body = entry_body(&module);
    let call = all_insts(body)
        .into_iter()
        .find(|&inst| matches!(body.insts[inst].kind, InstKind::Call { .. }))
        .expect("no call");
    match &body.insts[call].kind {
        InstKind::Call { callee, args, outputs } => {
            assert!(*callee == answer);
            assert!(args.is_empty());
            assert_eq!(outputs.len(), 1);
        }
        _ => unreachable!(),
    }
    let stores = intrinsics(body, |op| matches!(op, IntrinsicOp::StoreVar { .. }));
    assert_eq!(stores.len(), 1);
    assert_eq!(body.insts[stores[0]].inputs[..], [Value::CallOutput { call, idx: 0 }]);
    assert_eq!(
        module.vars[module.global_vars[0]].data.location,
        Some(Location::FragResult(spirv_ssa::slots::FRAG_RESULT_DATA0))
    );
}

#[test]
fn push_constant_block_layout() {
    init_logging();
    let mut asm = Asm::new();
    let main = asm.id();
    asm.entry_point(ExecutionModel::Fragment, main, "main");

    let void = asm.type_void();
    let void_fn = asm.type_function(void, &[]);
    let int = asm.type_int(true);
    let block = asm.ty(Op::TypeStruct, &[int, int]);
    asm.decorate(block, Decoration::Block, &[]);
    asm.member_decorate(block, 0, Decoration::Offset, &[0]);
    asm.member_decorate(block, 1, Decoration::Offset, &[4]);
    let block_ptr = asm.type_pointer(StorageClass::PushConstant, block);
    let int_ptr = asm.type_pointer(StorageClass::PushConstant, int);
    let pc = asm.variable(block_ptr, StorageClass::PushConstant);
    let c1 = asm.constant(int, 1);

    asm.begin_function(main, void, void_fn);
    let label = asm.id();
    asm.label(label);
    let member = asm.value(Op::AccessChain, int_ptr, &[pc, c1]);
    asm.value(Op::Load, int, &[member]);
    asm.op(Op::Return, &[]);
    asm.op(Op::FunctionEnd, &[]);

    let module = fragment(&asm.finish());
    assert_eq!(module.info.num_uniforms, 8);
    // Blocks are only reachable through their loads and stores.
    assert!(module.global_vars.is_empty());

    let body = entry_body(&module);
    let loads = intrinsics(body, |op| matches!(op, IntrinsicOp::LoadPushConstant { .. }));
    assert_eq!(loads.len(), 1);
    let load = &body.insts[loads[0]];
    assert!(matches!(
        load.kind,
        InstKind::Intrinsic { op: IntrinsicOp::LoadPushConstant { base: 0, range: 8 }, .. }
    ));
    assert_eq!(expr(body, load.inputs[0]), "[4]");
}

#[test]
fn dot_product_keeps_operand_order() {
    init_logging();
    let mut asm = Asm::new();
    let main = asm.id();
    asm.entry_point(ExecutionModel::Fragment, main, "main");

    let void = asm.type_void();
    let void_fn = asm.type_function(void, &[]);
    let float = asm.type_float();
    let vec3 = asm.type_vector(float, 3);
    let in_ptr = asm.type_pointer(StorageClass::Input, vec3);
    let out_ptr = asm.type_pointer(StorageClass::Output, float);
    let a = asm.variable(in_ptr, StorageClass::Input);
    let b = asm.variable(in_ptr, StorageClass::Input);
    let out = asm.variable(out_ptr, StorageClass::Output);
    asm.name(a, "a");
    asm.name(b, "b");
    asm.decorate(a, Decoration::Location, &[0]);
    asm.decorate(b, Decoration::Location, &[1]);
    asm.decorate(out, Decoration::Location, &[0]);

    asm.begin_function(main, void, void_fn);
    let label = asm.id();
    asm.label(label);
    let a_value = asm.value(Op::Load, vec3, &[a]);
    let b_value = asm.value(Op::Load, vec3, &[b]);
    let dot = asm.value(Op::Dot, float, &[a_value, b_value]);
    asm.op(Op::Store, &[out, dot]);
    asm.op(Op::Return, &[]);
    asm.op(Op::FunctionEnd, &[]);

    let module = fragment(&asm.finish());
    assert_eq!((module.info.num_inputs, module.info.num_outputs), (2, 1));
    assert_eq!(
        module.vars[module.global_vars[1]].data.location,
        Some(Location::Varying(spirv_ssa::slots::VARYING_SLOT_VAR0 + 1))
    );

    let body = entry_body(&module);
    let loads = intrinsics(body, |op| op == IntrinsicOp::LoadVar);
    assert_eq!(loads.len(), 2);
    assert_eq!(var_name(&module, &body.insts[loads[0]].kind), "a");
    assert_eq!(var_name(&module, &body.insts[loads[1]].kind), "b");

    let dots = alus(body, AluOp::Fdot3);
    assert_eq!(dots.len(), 1);
    let dot = &body.insts[dots[0]];
    assert_eq!(dot.inputs[..], [Value::Inst(loads[0]), Value::Inst(loads[1])]);
    assert_eq!(dot.output.unwrap().num_components, 1);

    let text = module.print().to_string();
    assert!(text.contains("entry func"), "{text}");
    assert!(text.contains(&format!("fdot3(%{}, %{})", loads[0].index(), loads[1].index())));
}

#[test]
fn return_inside_then_arm() {
    init_logging();
    let mut asm = Asm::new();
    let main = asm.id();
    asm.entry_point(ExecutionModel::Fragment, main, "main");

    let void = asm.type_void();
    let void_fn = asm.type_function(void, &[]);
    let bool_ty = asm.type_bool();
    let cond = asm.global(Op::ConstantTrue, bool_ty, &[]);

    let [entry, then, els, merge] = [asm.id(), asm.id(), asm.id(), asm.id()];
    asm.begin_function(main, void, void_fn);
    asm.label(entry);
    asm.op(Op::SelectionMerge, &[merge, 0]);
    asm.op(Op::BranchConditional, &[cond, then, els]);
    asm.label(then);
    asm.op(Op::Return, &[]);
    asm.label(els);
    asm.op(Op::Branch, &[merge]);
    asm.label(merge);
    asm.op(Op::Return, &[]);
    asm.op(Op::FunctionEnd, &[]);

    let module = fragment(&asm.finish());
    let body = entry_body(&module);
    let [CfNode::Block(_), CfNode::If(node), CfNode::Block(after)] = body.body[..] else {
        panic!("unexpected structure: {:?}", body.body);
    };
    let if_def = &body.ifs[node];

    let [CfNode::Block(then_block)] = if_def.then_body[..] else {
        panic!("then: {:?}", if_def.then_body);
    };
    let then_insts = &body.blocks[then_block].insts;
    assert_eq!(then_insts.len(), 1);
    assert!(matches!(body.insts[then_insts[0]].kind, InstKind::Jump(JumpKind::Return)));

    // The else arm just falls through to the merge block.
    let [CfNode::Block(else_block)] = if_def.else_body[..] else {
        panic!("else: {:?}", if_def.else_body);
    };
    assert!(body.blocks[else_block].insts.is_empty());

    let after = &body.blocks[after].insts;
    assert!(matches!(body.insts[after[0]].kind, InstKind::Jump(JumpKind::Return)));
}

#[test]
fn loop_with_conditional_break() {
    init_logging();
    let mut asm = Asm::new();
    let main = asm.id();
    asm.entry_point(ExecutionModel::Fragment, main, "main");

    let void = asm.type_void();
    let void_fn = asm.type_function(void, &[]);
    let int = asm.type_int(true);
    let bool_ty = asm.type_bool();
    let c0 = asm.constant(int, 0);
    let c1 = asm.constant(int, 1);
    let c10 = asm.constant(int, 10);

    let [entry, header, check, body_label, cont, merge] =
        [asm.id(), asm.id(), asm.id(), asm.id(), asm.id(), asm.id()];
    let (i, next) = (asm.id(), asm.id());
    asm.begin_function(main, void, void_fn);
    asm.label(entry);
    asm.op(Op::Branch, &[header]);

    asm.label(header);
    asm.op(Op::Phi, &[int, i, c0, entry, next, cont]);
    asm.op(Op::LoopMerge, &[merge, cont, 0]);
    asm.op(Op::Branch, &[check]);

    asm.label(check);
    let cmp = asm.value(Op::SLessThan, bool_ty, &[i, c10]);
    asm.op(Op::BranchConditional, &[cmp, body_label, merge]);

    asm.label(body_label);
    asm.op(Op::Branch, &[cont]);

    asm.label(cont);
    asm.op(Op::IAdd, &[int, next, i, c1]);
    asm.op(Op::Branch, &[header]);

    asm.label(merge);
    asm.op(Op::Return, &[]);
    asm.op(Op::FunctionEnd, &[]);

    let module = fragment(&asm.finish());
    let body = entry_body(&module);
    let [CfNode::Block(entry_block), CfNode::Loop(node), CfNode::Block(_)] = body.body[..] else {
        panic!("unexpected structure: {:?}", body.body);
    };
    let loop_def = &body.loops[node];

    let [CfNode::Block(header_block), CfNode::If(if_node)] = loop_def.body[..] else {
        panic!("loop body: {:?}", loop_def.body);
    };
    let if_def = &body.ifs[if_node];

    // The exit is a `break` placed directly in its arm.
    let [CfNode::Block(break_block)] = if_def.else_body[..] else {
        panic!("else: {:?}", if_def.else_body);
    };
    let break_insts = &body.blocks[break_block].insts;
    assert_eq!(break_insts.len(), 1);
    assert!(matches!(body.insts[break_insts[0]].kind, InstKind::Jump(JumpKind::Break)));

    // The other arm continues the loop body.
    let then_insts = all_insts_of_list(body, &if_def.then_body);
    let last = *then_insts.last().unwrap();
    assert!(matches!(body.insts[last].kind, InstKind::Jump(JumpKind::Continue)));

    let [CfNode::Block(continue_block)] = loop_def.continue_body[..] else {
        panic!("continue: {:?}", loop_def.continue_body);
    };
    let increments = alus(body, AluOp::Iadd);
    assert_eq!(increments.len(), 1);
    assert!(body.blocks[continue_block].insts.contains(&increments[0]));

    // One phi (in the header), with one edge per predecessor.
    let phi = body.blocks[header_block].insts[0];
    let InstKind::Phi(edges) = &body.insts[phi].kind else {
        panic!("header doesn't start with a phi");
    };
    assert_eq!(edges.len(), 2);
    assert!(edges[0].pred == entry_block);
    assert_eq!(expr(body, edges[0].value), "[0]");
    assert!(edges[1].pred == continue_block);
    assert_eq!(edges[1].value, Value::Inst(increments[0]));

    let compares = alus(body, AluOp::Ilt);
    assert_eq!(body.insts[compares[0]].inputs[0], Value::Inst(phi));

    let text = module.print().to_string();
    assert!(text.contains("loop {") && text.contains("} continue {"), "{text}");
}

fn all_insts_of_list(body: &FuncDefBody, list: &[CfNode]) -> Vec<Inst> {
    let mut insts = vec![];
    for &node in list {
        match node {
            CfNode::Block(block) => insts.extend(&body.blocks[block].insts),
            _ => panic!("unexpected nested control-flow"),
        }
    }
    insts
}

#[test]
fn every_phi_has_one_edge_per_predecessor() {
    init_logging();
    let mut asm = Asm::new();
    let main = asm.id();
    asm.entry_point(ExecutionModel::Fragment, main, "main");

    let void = asm.type_void();
    let void_fn = asm.type_function(void, &[]);
    let float = asm.type_float();
    let bool_ty = asm.type_bool();
    let cond = asm.global(Op::ConstantFalse, bool_ty, &[]);
    let one = asm.constant(float, 1f32.to_bits());
    let two = asm.constant(float, 2f32.to_bits());
    let out_ptr = asm.type_pointer(StorageClass::Output, float);
    let out = asm.variable(out_ptr, StorageClass::Output);

    let [entry, then, els, merge] = [asm.id(), asm.id(), asm.id(), asm.id()];
    asm.begin_function(main, void, void_fn);
    asm.label(entry);
    asm.op(Op::SelectionMerge, &[merge, 0]);
    asm.op(Op::BranchConditional, &[cond, then, els]);
    asm.label(then);
    let doubled = asm.value(Op::FMul, float, &[two, two]);
    asm.op(Op::Branch, &[merge]);
    asm.label(els);
    asm.op(Op::Branch, &[merge]);
    asm.label(merge);
    let phi = asm.value(Op::Phi, float, &[doubled, then, one, els]);
    asm.op(Op::Store, &[out, phi]);
    asm.op(Op::Return, &[]);
    asm.op(Op::FunctionEnd, &[]);

    let module = fragment(&asm.finish());
    let body = entry_body(&module);
    let phis: Vec<_> = all_insts(body)
        .into_iter()
        .filter(|&inst| matches!(body.insts[inst].kind, InstKind::Phi(_)))
        .collect();
    assert_eq!(phis.len(), 1);
    let InstKind::Phi(edges) = &body.insts[phis[0]].kind else { unreachable!() };
    assert_eq!(edges.len(), 2);

    let [_, CfNode::If(node), ..] = body.body[..] else {
        panic!("unexpected structure: {:?}", body.body);
    };
    let if_def = &body.ifs[node];
    let [CfNode::Block(then_block)] = if_def.then_body[..] else { panic!() };
    let [CfNode::Block(else_block)] = if_def.else_body[..] else { panic!() };
    assert!(edges[0].pred == then_block);
    assert_eq!(edges[0].value, Value::Inst(alus(body, AluOp::Fmul)[0]));
    assert!(edges[1].pred == else_block);
}

/// Fragment shader with a flat `int` input (`selector`) and an `int` output
/// (`result`), returning `[int, selector, result]` with the body left open.
fn begin_switch_shader(asm: &mut Asm) -> [u32; 3] {
    let main = asm.id();
    asm.entry_point(ExecutionModel::Fragment, main, "main");

    let void = asm.type_void();
    let void_fn = asm.type_function(void, &[]);
    let int = asm.type_int(true);
    let in_ptr = asm.type_pointer(StorageClass::Input, int);
    let selector = asm.variable(in_ptr, StorageClass::Input);
    asm.name(selector, "selector");
    asm.decorate(selector, Decoration::Location, &[0]);
    asm.decorate(selector, Decoration::Flat, &[]);
    let out_ptr = asm.type_pointer(StorageClass::Output, int);
    let result = asm.variable(out_ptr, StorageClass::Output);
    asm.name(result, "result");
    asm.decorate(result, Decoration::Location, &[0]);

    asm.begin_function(main, void, void_fn);
    [int, selector, result]
}

fn ifs_of(list: &[CfNode]) -> Vec<spirv_ssa::IfNode> {
    list.iter()
        .filter_map(|&node| match node {
            CfNode::If(node) => Some(node),
            _ => None,
        })
        .collect()
}

#[test]
fn switch_cases_are_selected_by_index() {
    init_logging();
    let mut asm = Asm::new();
    let [int, selector, result] = begin_switch_shader(&mut asm);
    let c10 = asm.constant(int, 10);
    let c20 = asm.constant(int, 20);
    let c30 = asm.constant(int, 30);

    let [entry, case1, case2, default, merge] =
        [asm.id(), asm.id(), asm.id(), asm.id(), asm.id()];
    asm.label(entry);
    let sel = asm.value(Op::Load, int, &[selector]);
    asm.op(Op::SelectionMerge, &[merge, 0]);
    asm.op(Op::Switch, &[sel, default, 1, case1, 2, case2]);
    for (label, value) in [(case1, c10), (case2, c20), (default, c30)] {
        asm.label(label);
        asm.op(Op::Store, &[result, value]);
        asm.op(Op::Branch, &[merge]);
    }
    asm.label(merge);
    asm.op(Op::Return, &[]);
    asm.op(Op::FunctionEnd, &[]);

    let module = fragment(&asm.finish());
    let body = entry_body(&module);
    let [CfNode::Block(_), CfNode::Loop(node), CfNode::Block(after)] = body.body[..] else {
        panic!("unexpected structure: {:?}", body.body);
    };
    let after = &body.blocks[after].insts;
    assert!(matches!(body.insts[after[0]].kind, InstKind::Jump(JumpKind::Return)));

    // The case to run is picked once, before entering the loop.
    let selector = var_named(&module, body, "selector");
    let sel = var_accesses(body, selector, |op| op == IntrinsicOp::LoadVar);
    assert_eq!(sel.len(), 1);
    let sel = expr(body, Value::Inst(sel[0]));
    let case_var = var_named(&module, body, "switch_case");
    assert!(body.locals.contains(&case_var));
    let picks = var_accesses(body, case_var, is_store);
    assert_eq!(picks.len(), 1);
    assert_eq!(
        expr(body, body.insts[picks[0]].inputs[0]),
        format!("bcsel(ieq({sel}, [2]), [2], bcsel(ieq({sel}, [1]), [1], [0]))")
    );

    // One `if` per target (default first), each ending in a `break`.
    let loop_def = &body.loops[node];
    assert!(loop_def.continue_body.is_empty());
    let current = var_accesses(body, case_var, |op| op == IntrinsicOp::LoadVar);
    assert_eq!(current.len(), 1);
    let current = expr(body, Value::Inst(current[0]));
    let ifs = ifs_of(&loop_def.body);
    assert_eq!(ifs.len(), 3);
    for (i, (&node, value)) in ifs.iter().zip(["[30]", "[10]", "[20]"]).enumerate() {
        let if_def = &body.ifs[node];
        assert_eq!(expr(body, if_def.condition), format!("ieq({current}, [{i}])"));
        assert!(if_def.else_body.is_empty());
        let [store, jump] = all_insts_of_list(body, &if_def.then_body)[..] else {
            panic!("case {i}: {:?}", if_def.then_body);
        };
        assert_eq!(var_name(&module, &body.insts[store].kind), "result");
        assert_eq!(expr(body, body.insts[store].inputs[0]), value);
        assert!(matches!(body.insts[jump].kind, InstKind::Jump(JumpKind::Break)));
    }
    let Some(&CfNode::Block(last)) = loop_def.body.last() else {
        panic!("loop body: {:?}", loop_def.body);
    };
    let last = &body.blocks[last].insts;
    assert_eq!(last.len(), 1);
    assert!(matches!(body.insts[last[0]].kind, InstKind::Jump(JumpKind::Break)));
}

#[test]
fn switch_fallthrough_and_merge_phi() {
    init_logging();
    let mut asm = Asm::new();
    let [int, selector, result] = begin_switch_shader(&mut asm);
    let c20 = asm.constant(int, 20);
    let c30 = asm.constant(int, 30);

    let [entry, case1, case2, merge] = [asm.id(), asm.id(), asm.id(), asm.id()];
    asm.label(entry);
    let sel = asm.value(Op::Load, int, &[selector]);
    asm.op(Op::SelectionMerge, &[merge, 0]);
    // No default case (i.e. it's the merge block).
    asm.op(Op::Switch, &[sel, merge, 1, case1, 2, case2]);
    asm.label(case1);
    asm.op(Op::Branch, &[case2]);
    asm.label(case2);
    asm.op(Op::Branch, &[merge]);
    asm.label(merge);
    let phi = asm.value(Op::Phi, int, &[c20, case2, c30, entry]);
    asm.op(Op::Store, &[result, phi]);
    asm.op(Op::Return, &[]);
    asm.op(Op::FunctionEnd, &[]);

    let module = fragment(&asm.finish());
    let body = entry_body(&module);
    let [CfNode::Block(_), CfNode::Loop(node), CfNode::Block(_)] = body.body[..] else {
        panic!("unexpected structure: {:?}", body.body);
    };

    let selector = var_named(&module, body, "selector");
    let sel = var_accesses(body, selector, |op| op == IntrinsicOp::LoadVar);
    let sel = expr(body, Value::Inst(sel[0]));
    let case_var = var_named(&module, body, "switch_case");
    let picks = var_accesses(body, case_var, is_store);
    assert_eq!(picks.len(), 2);
    assert_eq!(
        expr(body, body.insts[picks[0]].inputs[0]),
        format!("bcsel(ieq({sel}, [2]), [1], bcsel(ieq({sel}, [1]), [0], [{}]))", -1i32 as u32)
    );

    let loop_def = &body.loops[node];
    let ifs = ifs_of(&loop_def.body);
    assert_eq!(ifs.len(), 2);

    // Falling through picks the next case, and runs the loop again.
    let [fall, jump] = all_insts_of_list(body, &body.ifs[ifs[0]].then_body)[..] else {
        panic!("first case: {:?}", body.ifs[ifs[0]].then_body);
    };
    assert!(fall == picks[1]);
    assert_eq!(expr(body, body.insts[fall].inputs[0]), "[1]");
    assert!(matches!(body.insts[jump].kind, InstKind::Jump(JumpKind::Continue)));

    let [CfNode::Block(case2_block)] = body.ifs[ifs[1]].then_body[..] else {
        panic!("second case: {:?}", body.ifs[ifs[1]].then_body);
    };
    let Some(&CfNode::Block(no_case_block)) = loop_def.body.last() else {
        panic!("loop body: {:?}", loop_def.body);
    };

    // The merge block is reached from the second case, or without any case.
    let phis: Vec<_> = all_insts(body)
        .into_iter()
        .filter(|&inst| matches!(body.insts[inst].kind, InstKind::Phi(_)))
        .collect();
    assert_eq!(phis.len(), 1);
    let InstKind::Phi(edges) = &body.insts[phis[0]].kind else { unreachable!() };
    assert_eq!(edges.len(), 2);
    assert!(edges[0].pred == case2_block);
    assert_eq!(expr(body, edges[0].value), "[20]");
    assert!(edges[1].pred == no_case_block);
    assert_eq!(expr(body, edges[1].value), "[30]");
}

#[test]
fn switch_with_only_a_default() {
    init_logging();
    let mut asm = Asm::new();
    let [int, selector, result] = begin_switch_shader(&mut asm);
    let c30 = asm.constant(int, 30);

    let [entry, default, merge] = [asm.id(), asm.id(), asm.id()];
    asm.label(entry);
    let sel = asm.value(Op::Load, int, &[selector]);
    asm.op(Op::SelectionMerge, &[merge, 0]);
    asm.op(Op::Switch, &[sel, default]);
    asm.label(default);
    asm.op(Op::Store, &[result, c30]);
    asm.op(Op::Branch, &[merge]);
    asm.label(merge);
    asm.op(Op::Return, &[]);
    asm.op(Op::FunctionEnd, &[]);

    let module = fragment(&asm.finish());
    let body = entry_body(&module);
    assert!(alus(body, AluOp::Bcsel).is_empty());

    let case_var = var_named(&module, body, "switch_case");
    let picks = var_accesses(body, case_var, is_store);
    assert_eq!(picks.len(), 1);
    assert_eq!(expr(body, body.insts[picks[0]].inputs[0]), "[0]");

    let [CfNode::Block(_), CfNode::Loop(node), CfNode::Block(_)] = body.body[..] else {
        panic!("unexpected structure: {:?}", body.body);
    };
    let [CfNode::Block(_), CfNode::If(node), CfNode::Block(_)] = body.loops[node].body[..] else {
        panic!("loop body: {:?}", body.loops[node].body);
    };
    let stores = var_accesses(body, var_named(&module, body, "result"), is_store);
    assert_eq!(stores.len(), 1);
    assert!(all_insts_of_list(body, &body.ifs[node].then_body).contains(&stores[0]));
    assert_eq!(expr(body, body.insts[stores[0]].inputs[0]), "[30]");
}

#[test]
fn continue_from_inside_a_switch() {
    init_logging();
    let mut asm = Asm::new();
    let [int, selector, _] = begin_switch_shader(&mut asm);

    let [entry, header, body_label, case1, switch_merge, cont, loop_merge] =
        [asm.id(), asm.id(), asm.id(), asm.id(), asm.id(), asm.id(), asm.id()];
    asm.label(entry);
    asm.op(Op::Branch, &[header]);
    asm.label(header);
    asm.op(Op::LoopMerge, &[loop_merge, cont, 0]);
    asm.op(Op::Branch, &[body_label]);
    asm.label(body_label);
    let sel = asm.value(Op::Load, int, &[selector]);
    asm.op(Op::SelectionMerge, &[switch_merge, 0]);
    asm.op(Op::Switch, &[sel, switch_merge, 1, case1]);
    asm.label(case1);
    asm.op(Op::Branch, &[cont]);
    asm.label(switch_merge);
    asm.op(Op::Branch, &[cont]);
    asm.label(cont);
    asm.op(Op::Branch, &[header]);
    asm.label(loop_merge);
    asm.op(Op::Return, &[]);
    asm.op(Op::FunctionEnd, &[]);

    let module = fragment(&asm.finish());
    let body = entry_body(&module);
    let [CfNode::Block(_), CfNode::Loop(outer), CfNode::Block(_)] = body.body[..] else {
        panic!("unexpected structure: {:?}", body.body);
    };
    let outer_body = &body.loops[outer].body;
    let [CfNode::Block(pre), CfNode::Loop(switch), _, CfNode::If(check), CfNode::Block(after)] =
        outer_body[..]
    else {
        panic!("loop body: {outer_body:?}");
    };

    // Breaks out of the switch first, with a flag cleared before the switch.
    let flag = var_named(&module, body, "switch_continue");
    let sets = var_accesses(body, flag, is_store);
    assert_eq!(sets.len(), 2);
    assert_eq!(body.blocks[pre].insts.last(), Some(&sets[0]));
    assert_eq!(expr(body, body.insts[sets[0]].inputs[0]), "[0]");
    assert_eq!(expr(body, body.insts[sets[1]].inputs[0]), format!("[{}]", u32::MAX));

    let [case1_if] = ifs_of(&body.loops[switch].body)[..] else {
        panic!("switch body: {:?}", body.loops[switch].body);
    };
    let [set, jump] = all_insts_of_list(body, &body.ifs[case1_if].then_body)[..] else {
        panic!("case: {:?}", body.ifs[case1_if].then_body);
    };
    assert!(set == sets[1]);
    assert!(matches!(body.insts[jump].kind, InstKind::Jump(JumpKind::Break)));

    // Then continues the enclosing loop.
    let check = &body.ifs[check];
    let loaded = var_accesses(body, flag, |op| op == IntrinsicOp::LoadVar);
    assert_eq!(check.condition, Value::Inst(loaded[0]));
    let [jump] = all_insts_of_list(body, &check.then_body)[..] else {
        panic!("then: {:?}", check.then_body);
    };
    assert!(matches!(body.insts[jump].kind, InstKind::Jump(JumpKind::Continue)));

    // Which the switch merge block also does.
    let after = &body.blocks[after].insts;
    assert!(matches!(body.insts[after[0]].kind, InstKind::Jump(JumpKind::Continue)));
}

#[test]
fn kill_discards() {
    init_logging();
    let mut asm = Asm::new();
    let main = asm.id();
    asm.entry_point(ExecutionModel::Fragment, main, "main");

    let void = asm.type_void();
    let void_fn = asm.type_function(void, &[]);
    let bool_ty = asm.type_bool();
    let cond = asm.global(Op::ConstantTrue, bool_ty, &[]);

    let [entry, kill, merge] = [asm.id(), asm.id(), asm.id()];
    asm.begin_function(main, void, void_fn);
    asm.label(entry);
    asm.op(Op::SelectionMerge, &[merge, 0]);
    asm.op(Op::BranchConditional, &[cond, kill, merge]);
    asm.label(kill);
    asm.op(Op::Kill, &[]);
    asm.label(merge);
    asm.op(Op::Return, &[]);
    asm.op(Op::FunctionEnd, &[]);

    let module = fragment(&asm.finish());
    let body = entry_body(&module);
    let [CfNode::Block(_), CfNode::If(node), CfNode::Block(_)] = body.body[..] else {
        panic!("unexpected structure: {:?}", body.body);
    };
    let discards = intrinsics(body, |op| op == IntrinsicOp::Discard);
    assert_eq!(discards.len(), 1);
    assert_eq!(all_insts_of_list(body, &body.ifs[node].then_body), discards);
}

/// Conditional branch to `then` or `merge`, with the phi in `merge` listing
/// `then`, `entry` and `extra_pred` as its predecessors. `extra_pred` is
/// either a block nothing branches to, or the block `entry` continues into
/// (making it the one with the conditional branch, instead of `entry`).
fn phi_with_extra_predecessor(dead_block: bool) -> Vec<u32> {
    let mut asm = Asm::new();
    let main = asm.id();
    asm.entry_point(ExecutionModel::Fragment, main, "main");

    let void = asm.type_void();
    let void_fn = asm.type_function(void, &[]);
    let int = asm.type_int(true);
    let bool_ty = asm.type_bool();
    let cond = asm.global(Op::ConstantTrue, bool_ty, &[]);
    let [c1, c2, c3] = [1, 2, 3].map(|x| asm.constant(int, x));
    let out_ptr = asm.type_pointer(StorageClass::Output, int);
    let out = asm.variable(out_ptr, StorageClass::Output);
    asm.decorate(out, Decoration::Location, &[0]);

    let [entry, then, extra_pred, merge] = [asm.id(), asm.id(), asm.id(), asm.id()];
    asm.begin_function(main, void, void_fn);
    asm.label(entry);
    if !dead_block {
        // Reached (as part of `entry`), but branching elsewhere.
        asm.op(Op::Branch, &[extra_pred]);
        asm.label(extra_pred);
    }
    asm.op(Op::SelectionMerge, &[merge, 0]);
    asm.op(Op::BranchConditional, &[cond, then, merge]);
    asm.label(then);
    asm.op(Op::Branch, &[merge]);
    if dead_block {
        asm.label(extra_pred);
        asm.op(Op::Branch, &[merge]);
    }
    asm.label(merge);
    let phi = asm.value(Op::Phi, int, &[c1, then, c2, entry, c3, extra_pred]);
    asm.op(Op::Store, &[out, phi]);
    asm.op(Op::Return, &[]);
    asm.op(Op::FunctionEnd, &[]);
    asm.finish()
}

#[test]
fn phi_sources_from_unreachable_blocks_are_dropped() {
    init_logging();
    let module = fragment(&phi_with_extra_predecessor(true));
    let body = entry_body(&module);
    let phis: Vec<_> = all_insts(body)
        .into_iter()
        .filter(|&inst| matches!(body.insts[inst].kind, InstKind::Phi(_)))
        .collect();
    let InstKind::Phi(edges) = &body.insts[phis[0]].kind else { unreachable!() };
    let values: Vec<_> = edges.iter().map(|edge| expr(body, edge.value)).collect();
    assert_eq!(values, ["[1]", "[2]"]);

    // A block that was translated must actually branch to the phi's block.
    let err = fragment_err(&phi_with_extra_predecessor(false));
    assert!(matches!(err, Error::Read(_)), "{err}");
    assert!(err.to_string().contains("doesn't branch to"), "{err}");
}

#[test]
fn row_major_matrix_is_loaded_by_rows() {
    init_logging();
    let mut asm = Asm::new();
    let main = asm.id();
    asm.entry_point(ExecutionModel::Fragment, main, "main");

    let void = asm.type_void();
    let void_fn = asm.type_function(void, &[]);
    let float = asm.type_float();
    let vec4 = asm.type_vector(float, 4);
    let mat4 = asm.ty(Op::TypeMatrix, &[vec4, 4]);
    let block = asm.ty(Op::TypeStruct, &[mat4]);
    asm.decorate(block, Decoration::Block, &[]);
    asm.member_decorate(block, 0, Decoration::Offset, &[0]);
    asm.member_decorate(block, 0, Decoration::RowMajor, &[]);
    asm.member_decorate(block, 0, Decoration::MatrixStride, &[16]);
    let block_ptr = asm.type_pointer(StorageClass::Uniform, block);
    let mat_ptr = asm.type_pointer(StorageClass::Uniform, mat4);
    let ubo = asm.variable(block_ptr, StorageClass::Uniform);
    asm.decorate(ubo, Decoration::DescriptorSet, &[0]);
    asm.decorate(ubo, Decoration::Binding, &[3]);
    let int = asm.type_int(true);
    let c0 = asm.constant(int, 0);
    let out_ptr = asm.type_pointer(StorageClass::Output, vec4);
    let out = asm.variable(out_ptr, StorageClass::Output);
    asm.decorate(out, Decoration::Location, &[0]);

    asm.begin_function(main, void, void_fn);
    let label = asm.id();
    asm.label(label);
    let matrix_ptr = asm.value(Op::AccessChain, mat_ptr, &[ubo, c0]);
    let matrix = asm.value(Op::Load, mat4, &[matrix_ptr]);
    let column = asm.value(Op::CompositeExtract, vec4, &[matrix, 0]);
    asm.op(Op::Store, &[out, column]);
    asm.op(Op::Return, &[]);
    asm.op(Op::FunctionEnd, &[]);

    let module = fragment(&asm.finish());
    assert_eq!(module.info.num_ubos, 1);
    let body = entry_body(&module);

    let indices = intrinsics(body, |op| matches!(op, IntrinsicOp::VulkanResourceIndex { .. }));
    assert_eq!(indices.len(), 1);
    assert!(matches!(
        body.insts[indices[0]].kind,
        InstKind::Intrinsic {
            op: IntrinsicOp::VulkanResourceIndex {
                desc_set: 0,
                binding: 3,
                mode: VarMode::Uniform
            },
            ..
        }
    ));

    // One whole-row load per row, rather than a load per component.
    let rows = intrinsics(body, |op| op == IntrinsicOp::LoadUbo);
    assert_eq!(rows.len(), 4);
    for (i, &row) in rows.iter().enumerate() {
        let row = &body.insts[row];
        assert_eq!(row.output.unwrap().num_components, 4);
        assert_eq!(row.inputs[0], Value::Inst(indices[0]));
        assert_eq!(expr(body, row.inputs[1]), format!("[{}]", i * 16));
    }

    // Transposed after loading, one column at a time.
    assert_eq!(alus(body, AluOp::Vec4).len(), 4);
    let stores = intrinsics(body, |op| matches!(op, IntrinsicOp::StoreVar { write_mask: 0xf }));
    let Value::Inst(column) = body.insts[stores[0]].inputs[0] else { unreachable!() };
    let column = &body.insts[column];
    assert!(matches!(column.kind, InstKind::Alu(AluOp::Vec4)));
    for (&comp, &row) in column.inputs.iter().zip(&rows) {
        let Value::Inst(comp) = comp else { unreachable!() };
        let comp = &body.insts[comp];
        assert!(matches!(&comp.kind, InstKind::Swizzle(c) if c[..] == [0]));
        assert_eq!(comp.inputs[0], Value::Inst(row));
    }
}

#[test]
fn ssbo_offsets_match_between_loads_and_stores() {
    init_logging();
    let mut asm = Asm::new();
    let main = asm.id();
    asm.entry_point(ExecutionModel::Fragment, main, "main");

    let void = asm.type_void();
    let void_fn = asm.type_function(void, &[]);
    let float = asm.type_float();
    let vec4 = asm.type_vector(float, 4);
    let int = asm.type_int(true);
    let uint = asm.type_int(false);
    let runtime_array = asm.ty(Op::TypeRuntimeArray, &[vec4]);
    asm.decorate(runtime_array, Decoration::ArrayStride, &[16]);
    let block = asm.ty(Op::TypeStruct, &[float, runtime_array]);
    asm.decorate(block, Decoration::BufferBlock, &[]);
    asm.member_decorate(block, 0, Decoration::Offset, &[0]);
    asm.member_decorate(block, 1, Decoration::Offset, &[16]);
    let block_ptr = asm.type_pointer(StorageClass::Uniform, block);
    let vec4_ptr = asm.type_pointer(StorageClass::Uniform, vec4);
    let ssbo = asm.variable(block_ptr, StorageClass::Uniform);
    asm.decorate(ssbo, Decoration::DescriptorSet, &[0]);
    asm.decorate(ssbo, Decoration::Binding, &[2]);
    let c1 = asm.constant(int, 1);
    let in_ptr = asm.type_pointer(StorageClass::Input, int);
    let index = asm.variable(in_ptr, StorageClass::Input);
    asm.decorate(index, Decoration::Location, &[0]);
    asm.decorate(index, Decoration::Flat, &[]);

    asm.begin_function(main, void, void_fn);
    let label = asm.id();
    asm.label(label);
    let i = asm.value(Op::Load, int, &[index]);
    let elem = asm.value(Op::AccessChain, vec4_ptr, &[ssbo, c1, i]);
    let value = asm.value(Op::Load, vec4, &[elem]);
    asm.op(Op::Store, &[elem, value]);
    asm.value(Op::ArrayLength, uint, &[ssbo, 1]);
    asm.op(Op::Return, &[]);
    asm.op(Op::FunctionEnd, &[]);

    let module = fragment(&asm.finish());
    assert_eq!((module.info.num_ssbos, module.info.num_ubos), (1, 0));
    let body = entry_body(&module);

    let loads = intrinsics(body, |op| op == IntrinsicOp::LoadSsbo);
    let stores = intrinsics(body, |op| matches!(op, IntrinsicOp::StoreSsbo { write_mask: 0xf }));
    assert_eq!((loads.len(), stores.len()), (1, 1));
    let (load, store) = (&body.insts[loads[0]], &body.insts[stores[0]]);
    assert_eq!(store.inputs[0], Value::Inst(loads[0]));

    let load_offset = expr(body, load.inputs[1]);
    assert!(load_offset.starts_with("iadd(imul(LoadVar("), "{load_offset}");
    assert!(load_offset.ends_with(", [16]), [16])"), "{load_offset}");
    assert_eq!(load_offset, expr(body, store.inputs[2]));

    let lengths = alus(body, AluOp::Udiv);
    assert_eq!(lengths.len(), 1);
    let length = expr(body, Value::Inst(lengths[0]));
    assert!(length.starts_with("udiv(imax(isub(GetBufferSize("), "{length}");
    assert!(length.ends_with(", [16]), [0]), [16])"), "{length}");
}

#[test]
fn ssbo_atomic_add() {
    init_logging();
    let mut asm = Asm::new();
    let main = asm.id();
    asm.entry_point(ExecutionModel::GLCompute, main, "main");
    asm.execution_mode(main, spirv::ExecutionMode::LocalSize, &[8, 4, 1]);

    let void = asm.type_void();
    let void_fn = asm.type_function(void, &[]);
    let uint = asm.type_int(false);
    let block = asm.ty(Op::TypeStruct, &[uint]);
    asm.decorate(block, Decoration::Block, &[]);
    asm.member_decorate(block, 0, Decoration::Offset, &[0]);
    let block_ptr = asm.type_pointer(StorageClass::StorageBuffer, block);
    let uint_ptr = asm.type_pointer(StorageClass::StorageBuffer, uint);
    let ssbo = asm.variable(block_ptr, StorageClass::StorageBuffer);
    asm.decorate(ssbo, Decoration::DescriptorSet, &[1]);
    asm.decorate(ssbo, Decoration::Binding, &[0]);
    let c0 = asm.constant(uint, 0);
    let c2 = asm.constant(uint, 2);
    let c5 = asm.constant(uint, 5);

    asm.begin_function(main, void, void_fn);
    let label = asm.id();
    asm.label(label);
    let counter = asm.value(Op::AccessChain, uint_ptr, &[ssbo, c0]);
    asm.value(Op::AtomicIAdd, uint, &[counter, c2, c0, c5]);
    asm.op(Op::ControlBarrier, &[c2, c2, c0]);
    asm.op(Op::Return, &[]);
    asm.op(Op::FunctionEnd, &[]);

    let module =
        translate(&asm.finish(), &Options::new(ExecutionModel::GLCompute, "main")).unwrap();
    assert_eq!(module.info.local_size, [8, 4, 1]);

    let body = entry_body(&module);
    let atomics = intrinsics(body, |op| op == IntrinsicOp::SsboAtomic(AtomicOp::Add));
    assert_eq!(atomics.len(), 1);
    let atomic = &body.insts[atomics[0]];
    assert_eq!(atomic.inputs.len(), 3);
    assert_eq!(expr(body, atomic.inputs[1]), "[0]");
    assert_eq!(expr(body, atomic.inputs[2]), "[5]");
    assert_eq!(intrinsics(body, |op| op == IntrinsicOp::Barrier).len(), 1);
}

#[test]
fn sample_with_bias() {
    init_logging();
    let mut asm = Asm::new();
    let main = asm.id();
    asm.entry_point(ExecutionModel::Fragment, main, "main");

    let void = asm.type_void();
    let void_fn = asm.type_function(void, &[]);
    let float = asm.type_float();
    let vec2 = asm.type_vector(float, 2);
    let vec4 = asm.type_vector(float, 4);
    let image = asm.ty(
        Op::TypeImage,
        &[float, spirv::Dim::Dim2D as u32, 0, 0, 0, 1, spirv::ImageFormat::Unknown as u32],
    );
    let sampled_image = asm.ty(Op::TypeSampledImage, &[image]);
    let tex_ptr = asm.type_pointer(StorageClass::UniformConstant, sampled_image);
    let tex = asm.variable(tex_ptr, StorageClass::UniformConstant);
    asm.name(tex, "tex");
    asm.decorate(tex, Decoration::DescriptorSet, &[0]);
    asm.decorate(tex, Decoration::Binding, &[1]);
    let half = asm.constant(float, 0.5f32.to_bits());
    let coord = asm.global(Op::ConstantComposite, vec2, &[half, half]);
    let out_ptr = asm.type_pointer(StorageClass::Output, vec4);
    let out = asm.variable(out_ptr, StorageClass::Output);
    asm.decorate(out, Decoration::Location, &[0]);

    asm.begin_function(main, void, void_fn);
    let label = asm.id();
    asm.label(label);
    let sampler = asm.value(Op::Load, sampled_image, &[tex]);
    let texel = asm.value(
        Op::ImageSampleImplicitLod,
        vec4,
        &[sampler, coord, spirv::ImageOperands::BIAS.bits(), half],
    );
    asm.op(Op::Store, &[out, texel]);
    asm.op(Op::Return, &[]);
    asm.op(Op::FunctionEnd, &[]);

    let module = fragment(&asm.finish());
    assert_eq!(module.info.num_textures, 1);
    let body = entry_body(&module);
    let tex_insts: Vec<_> = all_insts(body)
        .into_iter()
        .filter(|&inst| matches!(body.insts[inst].kind, InstKind::Tex(_)))
        .collect();
    assert_eq!(tex_insts.len(), 1);
    let def = &body.insts[tex_insts[0]];
    let InstKind::Tex(tex_inst) = &def.kind else { unreachable!() };
    assert_eq!(tex_inst.op, TexOp::Txb);
    assert_eq!(tex_inst.dim, SamplerDim::Dim2D);
    assert_eq!(tex_inst.coord_components, 2);
    assert!(!tex_inst.is_shadow && tex_inst.texture.is_none());
    let kinds: Vec<_> = tex_inst.srcs.iter().map(|src| src.kind).collect();
    assert_eq!(kinds, [TexSrcKind::Coord, TexSrcKind::Bias]);
    assert_eq!(def.output.unwrap().num_components, 4);
    let name = module.vars[tex_inst.sampler.var].name.unwrap();
    assert_eq!(&module.cx_ref()[name], "tex");
}

#[test]
fn glsl_length_is_sqrt_of_dot() {
    init_logging();
    let mut asm = Asm::new();
    let glsl = asm.import_glsl450();
    let main = asm.id();
    asm.entry_point(ExecutionModel::Fragment, main, "main");

    let void = asm.type_void();
    let void_fn = asm.type_function(void, &[]);
    let float = asm.type_float();
    let vec3 = asm.type_vector(float, 3);
    let in_ptr = asm.type_pointer(StorageClass::Input, vec3);
    let v = asm.variable(in_ptr, StorageClass::Input);
    asm.decorate(v, Decoration::Location, &[0]);

    asm.begin_function(main, void, void_fn);
    let label = asm.id();
    asm.label(label);
    let loaded = asm.value(Op::Load, vec3, &[v]);
    asm.value(Op::ExtInst, float, &[glsl, spirv::GLOp::Length as u32, loaded]);
    asm.op(Op::Return, &[]);
    asm.op(Op::FunctionEnd, &[]);

    let module = fragment(&asm.finish());
    let body = entry_body(&module);
    let sqrts = alus(body, AluOp::Fsqrt);
    assert_eq!(sqrts.len(), 1);
    let length = expr(body, Value::Inst(sqrts[0]));
    assert!(length.starts_with("fsqrt(fdot3(LoadVar("), "{length}");
}

#[test]
fn row_major_column_and_element_loads() {
    init_logging();
    let mut asm = Asm::new();
    let main = asm.id();
    asm.entry_point(ExecutionModel::Fragment, main, "main");

    let void = asm.type_void();
    let void_fn = asm.type_function(void, &[]);
    let float = asm.type_float();
    let vec4 = asm.type_vector(float, 4);
    let mat4 = asm.ty(Op::TypeMatrix, &[vec4, 4]);
    let block = asm.ty(Op::TypeStruct, &[mat4]);
    asm.decorate(block, Decoration::Block, &[]);
    asm.member_decorate(block, 0, Decoration::Offset, &[0]);
    asm.member_decorate(block, 0, Decoration::RowMajor, &[]);
    asm.member_decorate(block, 0, Decoration::MatrixStride, &[16]);
    let block_ptr = asm.type_pointer(StorageClass::Uniform, block);
    let vec4_ptr = asm.type_pointer(StorageClass::Uniform, vec4);
    let float_ptr = asm.type_pointer(StorageClass::Uniform, float);
    let ubo = asm.variable(block_ptr, StorageClass::Uniform);
    asm.decorate(ubo, Decoration::DescriptorSet, &[0]);
    asm.decorate(ubo, Decoration::Binding, &[0]);
    let int = asm.type_int(true);
    let [c0, c1, c2] = [0, 1, 2].map(|x| asm.constant(int, x));
    let column_out_ptr = asm.type_pointer(StorageClass::Output, vec4);
    let column_out = asm.variable(column_out_ptr, StorageClass::Output);
    asm.decorate(column_out, Decoration::Location, &[0]);
    let elem_out_ptr = asm.type_pointer(StorageClass::Output, float);
    let elem_out = asm.variable(elem_out_ptr, StorageClass::Output);
    asm.decorate(elem_out, Decoration::Location, &[1]);

    asm.begin_function(main, void, void_fn);
    let label = asm.id();
    asm.label(label);
    let column_ptr = asm.value(Op::AccessChain, vec4_ptr, &[ubo, c0, c1]);
    let column = asm.value(Op::Load, vec4, &[column_ptr]);
    asm.op(Op::Store, &[column_out, column]);
    let elem_ptr = asm.value(Op::AccessChain, float_ptr, &[ubo, c0, c1, c2]);
    let elem = asm.value(Op::Load, float, &[elem_ptr]);
    asm.op(Op::Store, &[elem_out, elem]);
    asm.op(Op::Return, &[]);
    asm.op(Op::FunctionEnd, &[]);

    let module = fragment(&asm.finish());
    let body = entry_body(&module);
    let loads = intrinsics(body, |op| op == IntrinsicOp::LoadUbo);
    assert_eq!(loads.len(), 5);
    for &load in &loads {
        assert_eq!(body.insts[load].output.unwrap().num_components, 1);
    }

    // Column 1 is the second float of each row.
    let offsets: Vec<_> =
        loads.iter().map(|&load| expr(body, body.insts[load].inputs[1])).collect();
    assert_eq!(offsets, ["[4]", "[20]", "[36]", "[52]", "[36]"]);

    let stores = intrinsics(body, is_store);
    let Value::Inst(column) = body.insts[stores[0]].inputs[0] else { unreachable!() };
    let column = &body.insts[column];
    assert!(matches!(column.kind, InstKind::Alu(AluOp::Vec4)));
    let rows: Vec<_> = loads[..4].iter().map(|&load| Value::Inst(load)).collect();
    assert_eq!(column.inputs[..], rows[..]);
    assert_eq!(body.insts[stores[1]].inputs[0], Value::Inst(loads[4]));
}

/// `a * b` (with `a` and, if `transpose_b`, also `b` transposed first), for
/// private `mat2` variables, along with `v * a` for a private `vec2`.
fn matrix_products(transpose_b: bool) -> Vec<u32> {
    let mut asm = Asm::new();
    let main = asm.id();
    asm.entry_point(ExecutionModel::Fragment, main, "main");

    let void = asm.type_void();
    let void_fn = asm.type_function(void, &[]);
    let float = asm.type_float();
    let vec2 = asm.type_vector(float, 2);
    let mat2 = asm.ty(Op::TypeMatrix, &[vec2, 2]);
    let mat_ptr = asm.type_pointer(StorageClass::Private, mat2);
    let vec_ptr = asm.type_pointer(StorageClass::Private, vec2);
    let [a, b, product] = [(); 3].map(|()| asm.variable(mat_ptr, StorageClass::Private));
    let [v, v_product] = [(); 2].map(|()| asm.variable(vec_ptr, StorageClass::Private));
    for (var, name) in [(a, "a"), (b, "b"), (product, "product"), (v, "v")] {
        asm.name(var, name);
    }
    asm.name(v_product, "v_product");

    asm.begin_function(main, void, void_fn);
    let label = asm.id();
    asm.label(label);
    let a = asm.value(Op::Load, mat2, &[a]);
    let b = asm.value(Op::Load, mat2, &[b]);
    let a_t = asm.value(Op::Transpose, mat2, &[a]);
    let b = if transpose_b { asm.value(Op::Transpose, mat2, &[b]) } else { b };
    let m = asm.value(Op::MatrixTimesMatrix, mat2, &[a_t, b]);
    asm.op(Op::Store, &[product, m]);
    let v = asm.value(Op::Load, vec2, &[v]);
    let vm = asm.value(Op::VectorTimesMatrix, vec2, &[v, a]);
    asm.op(Op::Store, &[v_product, vm]);
    asm.op(Op::Return, &[]);
    asm.op(Op::FunctionEnd, &[]);
    asm.finish()
}

#[test]
fn matrix_products_reuse_transposed_operands() {
    init_logging();

    // `transpose(a) * b`: the rows of `transpose(a)` are the columns of `a`.
    let module = fragment(&matrix_products(false));
    let body = entry_body(&module);
    let loaded_from = |v: Value| {
        let Value::Inst(inst) = v else { panic!("{v:?} is not an instruction") };
        var_name(&module, &body.insts[inst].kind)
    };
    let dots = alus(body, AluOp::Fdot2);
    assert_eq!(dots.len(), 4 + 2);
    for &dot in &dots[..4] {
        let inputs = &body.insts[dot].inputs;
        assert_eq!([loaded_from(inputs[0]), loaded_from(inputs[1])], ["a", "b"]);
    }
    assert!(alus(body, AluOp::Fmul).is_empty());

    // `v * a`: one dot product per column of `a`, without transposing `a`.
    for &dot in &dots[4..] {
        let inputs = &body.insts[dot].inputs;
        assert_eq!([loaded_from(inputs[0]), loaded_from(inputs[1])], ["a", "v"]);
    }
    let v_product = var_accesses(body, var_named(&module, body, "v_product"), is_store);
    let Value::Inst(v_product) = body.insts[v_product[0]].inputs[0] else { unreachable!() };
    assert!(matches!(body.insts[v_product].kind, InstKind::Alu(AluOp::Vec2)));
    let dot_values: Vec<_> = dots[4..].iter().map(|&dot| Value::Inst(dot)).collect();
    assert_eq!(body.insts[v_product].inputs[..], dot_values[..]);

    // `transpose(a) * transpose(b)` is `transpose(b * a)`, using columns.
    let module = fragment(&matrix_products(true));
    let body = entry_body(&module);
    let loaded_from = |v: Value| {
        let Value::Inst(inst) = v else { panic!("{v:?} is not an instruction") };
        var_name(&module, &body.insts[inst].kind)
    };
    assert_eq!(alus(body, AluOp::Fdot2).len(), 2);
    let muls = alus(body, AluOp::Fmul);
    assert_eq!(muls.len(), 4);
    assert_eq!(alus(body, AluOp::Fadd).len(), 2);
    for &mul in &muls {
        assert_eq!(loaded_from(body.insts[mul].inputs[0]), "b");
    }
}

#[test]
fn null_composite_constants() {
    init_logging();
    let mut asm = Asm::new();
    let main = asm.id();
    asm.entry_point(ExecutionModel::Fragment, main, "main");

    let void = asm.type_void();
    let void_fn = asm.type_function(void, &[]);
    let float = asm.type_float();
    let vec2 = asm.type_vector(float, 2);
    let vec3 = asm.type_vector(float, 3);
    let mat2 = asm.ty(Op::TypeMatrix, &[vec2, 2]);
    let uint = asm.type_int(false);
    let c2 = asm.constant(uint, 2);
    let array = asm.ty(Op::TypeArray, &[float, c2]);
    let strukt = asm.ty(Op::TypeStruct, &[mat2, vec3, array]);
    let null = asm.global(Op::ConstantNull, strukt, &[]);
    let ptr = asm.type_pointer(StorageClass::Private, strukt);
    let var = asm.variable(ptr, StorageClass::Private);
    asm.name(var, "s");

    asm.begin_function(main, void, void_fn);
    let label = asm.id();
    asm.label(label);
    asm.op(Op::Store, &[var, null]);
    asm.op(Op::Return, &[]);
    asm.op(Op::FunctionEnd, &[]);

    let module = fragment(&asm.finish());
    let body = entry_body(&module);
    let stores = var_accesses(body, var_named(&module, body, "s"), is_store);
    let stored: Vec<_> = stores
        .iter()
        .map(|&store| {
            let InstKind::Intrinsic { op: IntrinsicOp::StoreVar { write_mask }, derefs } =
                &body.insts[store].kind
            else {
                unreachable!()
            };
            (derefs[0].path.to_vec(), *write_mask, expr(body, body.insts[store].inputs[0]))
        })
        .collect();
    let elem = |i| DerefLink::Array(ArrayIndex::Direct(i));
    assert_eq!(
        stored,
        [
            (vec![DerefLink::Struct(0), elem(0)], 0x3, "[0, 0]".to_string()),
            (vec![DerefLink::Struct(0), elem(1)], 0x3, "[0, 0]".to_string()),
            (vec![DerefLink::Struct(1)], 0x7, "[0, 0, 0]".to_string()),
            (vec![DerefLink::Struct(2), elem(0)], 0x1, "[0]".to_string()),
            (vec![DerefLink::Struct(2), elem(1)], 0x1, "[0]".to_string()),
        ]
    );
}

#[test]
fn decoration_groups_apply_to_types_and_variables() {
    init_logging();
    let mut asm = Asm::new();
    let main = asm.id();
    asm.entry_point(ExecutionModel::Fragment, main, "main");

    let [block_group, member_group, binding_group] = [asm.id(), asm.id(), asm.id()];
    asm.decorate(block_group, Decoration::Block, &[]);
    asm.decorate(member_group, Decoration::Offset, &[16]);
    asm.decorate(binding_group, Decoration::DescriptorSet, &[2]);
    asm.decorate(binding_group, Decoration::Binding, &[5]);
    for group in [block_group, member_group, binding_group] {
        asm.annotation(Op::DecorationGroup, &[group]);
    }

    let void = asm.type_void();
    let void_fn = asm.type_function(void, &[]);
    let float = asm.type_float();
    let vec4 = asm.type_vector(float, 4);
    let block = asm.ty(Op::TypeStruct, &[float, vec4]);
    asm.member_decorate(block, 0, Decoration::Offset, &[0]);
    asm.annotation(Op::GroupDecorate, &[block_group, block]);
    asm.annotation(Op::GroupMemberDecorate, &[member_group, block, 1]);
    let block_ptr = asm.type_pointer(StorageClass::Uniform, block);
    let vec4_ptr = asm.type_pointer(StorageClass::Uniform, vec4);
    let ubo = asm.variable(block_ptr, StorageClass::Uniform);
    asm.annotation(Op::GroupDecorate, &[binding_group, ubo]);
    let int = asm.type_int(true);
    let c1 = asm.constant(int, 1);
    let out_ptr = asm.type_pointer(StorageClass::Output, vec4);
    let out = asm.variable(out_ptr, StorageClass::Output);
    asm.decorate(out, Decoration::Location, &[0]);

    asm.begin_function(main, void, void_fn);
    let label = asm.id();
    asm.label(label);
    let member_ptr = asm.value(Op::AccessChain, vec4_ptr, &[ubo, c1]);
    let member = asm.value(Op::Load, vec4, &[member_ptr]);
    asm.op(Op::Store, &[out, member]);
    asm.op(Op::Return, &[]);
    asm.op(Op::FunctionEnd, &[]);

    let module = fragment(&asm.finish());
    assert_eq!(module.info.num_ubos, 1);
    let body = entry_body(&module);
    let indices = intrinsics(body, |op| {
        op == IntrinsicOp::VulkanResourceIndex { desc_set: 2, binding: 5, mode: VarMode::Uniform }
    });
    assert_eq!(indices.len(), 1);
    let loads = intrinsics(body, |op| op == IntrinsicOp::LoadUbo);
    assert_eq!(loads.len(), 1);
    assert_eq!(body.insts[loads[0]].inputs[0], Value::Inst(indices[0]));
    assert_eq!(expr(body, body.insts[loads[0]].inputs[1]), "[16]");
}

/// `gl_PerVertex`-like block (`Position` and `PointSize` builtins).
fn per_vertex_block(asm: &mut Asm, vec4: u32, float: u32) -> u32 {
    let block = asm.ty(Op::TypeStruct, &[vec4, float]);
    asm.decorate(block, Decoration::Block, &[]);
    asm.member_decorate(block, 0, Decoration::BuiltIn, &[spirv::BuiltIn::Position as u32]);
    asm.member_decorate(block, 1, Decoration::BuiltIn, &[spirv::BuiltIn::PointSize as u32]);
    block
}

#[test]
fn builtin_block_members_are_separate_variables() {
    init_logging();
    let mut asm = Asm::new();
    let main = asm.id();
    asm.entry_point(ExecutionModel::Vertex, main, "main");

    let void = asm.type_void();
    let void_fn = asm.type_function(void, &[]);
    let float = asm.type_float();
    let vec4 = asm.type_vector(float, 4);
    let block = per_vertex_block(&mut asm, vec4, float);
    let block_ptr = asm.type_pointer(StorageClass::Output, block);
    let vec4_ptr = asm.type_pointer(StorageClass::Output, vec4);
    let float_ptr = asm.type_pointer(StorageClass::Output, float);
    let per_vertex = asm.variable(block_ptr, StorageClass::Output);
    let int = asm.type_int(true);
    let [c0, c1] = [0, 1].map(|x| asm.constant(int, x));
    let one = asm.constant(float, 1f32.to_bits());
    let origin = asm.global(Op::ConstantComposite, vec4, &[one, one, one, one]);

    asm.begin_function(main, void, void_fn);
    let label = asm.id();
    asm.label(label);
    let position = asm.value(Op::AccessChain, vec4_ptr, &[per_vertex, c0]);
    asm.op(Op::Store, &[position, origin]);
    let point_size = asm.value(Op::AccessChain, float_ptr, &[per_vertex, c1]);
    asm.op(Op::Store, &[point_size, one]);
    asm.op(Op::Return, &[]);
    asm.op(Op::FunctionEnd, &[]);

    let module =
        translate(&asm.finish(), &Options::new(ExecutionModel::Vertex, "main")).unwrap();
    let body = entry_body(&module);
    let stores = intrinsics(body, is_store);
    assert_eq!(stores.len(), 2);
    let expected = [("Position", VARYING_SLOT_POS, 0xf), ("PointSize", VARYING_SLOT_PSIZ, 1)];
    for (&store, (name, slot, write_mask)) in stores.iter().zip(expected) {
        let InstKind::Intrinsic { op, derefs } = &body.insts[store].kind else { unreachable!() };
        assert_eq!(*op, IntrinsicOp::StoreVar { write_mask });
        assert!(derefs[0].path.is_empty());
        let var = derefs[0].var;
        assert_eq!(var_name(&module, &body.insts[store].kind), name);
        assert_eq!(module.vars[var].mode, VarMode::ShaderOut);
        assert_eq!(module.vars[var].data.location, Some(Location::Varying(slot)));
        assert!(module.global_vars.contains(&var));
    }
}

#[test]
fn geometry_inputs_keep_the_vertex_index() {
    init_logging();
    let mut asm = Asm::new();
    asm.capability(spirv::Capability::Geometry);
    let main = asm.id();
    asm.entry_point(ExecutionModel::Geometry, main, "main");
    asm.execution_mode(main, spirv::ExecutionMode::Triangles, &[]);
    asm.execution_mode(main, spirv::ExecutionMode::OutputPoints, &[]);
    asm.execution_mode(main, spirv::ExecutionMode::OutputVertices, &[1]);

    let void = asm.type_void();
    let void_fn = asm.type_function(void, &[]);
    let float = asm.type_float();
    let vec4 = asm.type_vector(float, 4);
    let uint = asm.type_int(false);
    let [c0, c2, c3] = [0, 2, 3].map(|x| asm.constant(uint, x));
    let block = per_vertex_block(&mut asm, vec4, float);
    let per_vertex_array = asm.ty(Op::TypeArray, &[block, c3]);
    let in_ptr = asm.type_pointer(StorageClass::Input, per_vertex_array);
    let in_vec4_ptr = asm.type_pointer(StorageClass::Input, vec4);
    let gl_in = asm.variable(in_ptr, StorageClass::Input);
    let out_ptr = asm.type_pointer(StorageClass::Output, block);
    let out_vec4_ptr = asm.type_pointer(StorageClass::Output, vec4);
    let gl_out = asm.variable(out_ptr, StorageClass::Output);

    asm.begin_function(main, void, void_fn);
    let label = asm.id();
    asm.label(label);
    let src = asm.value(Op::AccessChain, in_vec4_ptr, &[gl_in, c2, c0]);
    let position = asm.value(Op::Load, vec4, &[src]);
    let dest = asm.value(Op::AccessChain, out_vec4_ptr, &[gl_out, c0]);
    asm.op(Op::Store, &[dest, position]);
    asm.op(Op::EmitVertex, &[]);
    asm.op(Op::Return, &[]);
    asm.op(Op::FunctionEnd, &[]);

    let module =
        translate(&asm.finish(), &Options::new(ExecutionModel::Geometry, "main")).unwrap();
    let body = entry_body(&module);

    // `gl_in[2].gl_Position`: one array of positions, indexed by vertex.
    let loads = intrinsics(body, |op| op == IntrinsicOp::LoadVar);
    assert_eq!(loads.len(), 1);
    let InstKind::Intrinsic { derefs, .. } = &body.insts[loads[0]].kind else { unreachable!() };
    assert_eq!(derefs[0].path[..], [DerefLink::Array(ArrayIndex::Direct(2))]);
    let input = &module.vars[derefs[0].var];
    assert_eq!(var_name(&module, &body.insts[loads[0]].kind), "Position");
    assert_eq!(input.mode, VarMode::ShaderIn);
    assert!(matches!(module.cx_ref()[input.ty], TypeDef::Array { len: 3, .. }));
    assert_eq!(input.data.location, Some(Location::Varying(VARYING_SLOT_POS)));

    // `gl_Position`, a separate (output) variable.
    let stores = intrinsics(body, |op| op == IntrinsicOp::StoreVar { write_mask: 0xf });
    assert_eq!(stores.len(), 1);
    let InstKind::Intrinsic { derefs: dest, .. } = &body.insts[stores[0]].kind else {
        unreachable!()
    };
    assert!(dest[0].path.is_empty() && dest[0].var != derefs[0].var);
    assert_eq!(var_name(&module, &body.insts[stores[0]].kind), "Position");
    assert_eq!(module.vars[dest[0].var].mode, VarMode::ShaderOut);
    assert_eq!(body.insts[stores[0]].inputs[..], [Value::Inst(loads[0])]);
}

#[test]
fn gather_with_constant_offset() {
    init_logging();
    let mut asm = Asm::new();
    let main = asm.id();
    asm.entry_point(ExecutionModel::Fragment, main, "main");

    let void = asm.type_void();
    let void_fn = asm.type_function(void, &[]);
    let float = asm.type_float();
    let vec2 = asm.type_vector(float, 2);
    let vec4 = asm.type_vector(float, 4);
    let int = asm.type_int(true);
    let ivec2 = asm.type_vector(int, 2);
    let image = asm.ty(
        Op::TypeImage,
        &[float, spirv::Dim::Dim2D as u32, 0, 0, 0, 1, spirv::ImageFormat::Unknown as u32],
    );
    let sampled_image = asm.ty(Op::TypeSampledImage, &[image]);
    let tex_ptr = asm.type_pointer(StorageClass::UniformConstant, sampled_image);
    let tex = asm.variable(tex_ptr, StorageClass::UniformConstant);
    asm.decorate(tex, Decoration::DescriptorSet, &[0]);
    asm.decorate(tex, Decoration::Binding, &[0]);
    let half = asm.constant(float, 0.5f32.to_bits());
    let coord = asm.global(Op::ConstantComposite, vec2, &[half, half]);
    let [c1, c_1] = [1, -1i32 as u32].map(|x| asm.constant(int, x));
    let offset = asm.global(Op::ConstantComposite, ivec2, &[c1, c_1]);
    let out_ptr = asm.type_pointer(StorageClass::Output, vec4);
    let out = asm.variable(out_ptr, StorageClass::Output);
    asm.decorate(out, Decoration::Location, &[0]);

    asm.begin_function(main, void, void_fn);
    let label = asm.id();
    asm.label(label);
    let sampler = asm.value(Op::Load, sampled_image, &[tex]);
    let texels = asm.value(
        Op::ImageGather,
        vec4,
        &[sampler, coord, c1, spirv::ImageOperands::CONST_OFFSET.bits(), offset],
    );
    asm.op(Op::Store, &[out, texels]);
    asm.op(Op::Return, &[]);
    asm.op(Op::FunctionEnd, &[]);

    let module = fragment(&asm.finish());
    let body = entry_body(&module);
    let [tex_inst] = all_insts(body)
        .into_iter()
        .filter(|&inst| matches!(body.insts[inst].kind, InstKind::Tex(_)))
        .collect::<Vec<_>>()[..]
    else {
        panic!("expected one texture instruction");
    };
    let InstKind::Tex(tex_inst) = &body.insts[tex_inst].kind else { unreachable!() };
    assert_eq!((tex_inst.op, tex_inst.component), (TexOp::Tg4, 1));
    let kinds: Vec<_> = tex_inst.srcs.iter().map(|src| src.kind).collect();
    assert_eq!(kinds, [TexSrcKind::Coord, TexSrcKind::Offset]);
    assert_eq!(expr(body, tex_inst.srcs[1].value), format!("[1, {}]", -1i32 as u32));
}

fn emitting_module(model: ExecutionModel) -> Vec<u32> {
    let mut asm = Asm::new();
    asm.capability(spirv::Capability::Geometry);
    let main = asm.id();
    asm.entry_point(model, main, "main");
    if model == ExecutionModel::Geometry {
        asm.execution_mode(main, spirv::ExecutionMode::InputPoints, &[]);
        asm.execution_mode(main, spirv::ExecutionMode::OutputPoints, &[]);
        asm.execution_mode(main, spirv::ExecutionMode::OutputVertices, &[1]);
        asm.execution_mode(main, spirv::ExecutionMode::Invocations, &[2]);
    }

    let void = asm.type_void();
    let void_fn = asm.type_function(void, &[]);
    asm.begin_function(main, void, void_fn);
    let label = asm.id();
    asm.label(label);
    asm.op(Op::EmitVertex, &[]);
    asm.op(Op::EndPrimitive, &[]);
    asm.op(Op::Return, &[]);
    asm.op(Op::FunctionEnd, &[]);
    asm.finish()
}

#[test]
fn geometry_shader_state() {
    init_logging();
    let words = emitting_module(ExecutionModel::Geometry);
    let module = translate(&words, &Options::new(ExecutionModel::Geometry, "main")).unwrap();
    let info = &module.info;
    assert_eq!((info.vertices_in, info.vertices_out, info.invocations), (1, 1, 2));
    assert_eq!(info.input_primitive, Some(spirv_ssa::Primitive::Points));
    assert_eq!(info.output_primitive, Some(spirv_ssa::Primitive::Points));

    let body = entry_body(&module);
    assert_eq!(intrinsics(body, |op| op == IntrinsicOp::EmitVertex { stream: 0 }).len(), 1);
    assert_eq!(intrinsics(body, |op| op == IntrinsicOp::EndPrimitive { stream: 0 }).len(), 1);

    let err = fragment_err(&emitting_module(ExecutionModel::Fragment));
    assert_eq!(
        err.to_string(),
        "unsupported SPIR-V feature: EmitVertex outside of a geometry shader"
    );
}

fn trivial_module(configure: impl FnOnce(&mut Asm)) -> Vec<u32> {
    let mut asm = Asm::new();
    configure(&mut asm);
    let main = asm.id();
    asm.entry_point(ExecutionModel::Fragment, main, "main");
    let void = asm.type_void();
    let void_fn = asm.type_function(void, &[]);
    asm.begin_function(main, void, void_fn);
    let label = asm.id();
    asm.label(label);
    asm.op(Op::Return, &[]);
    asm.op(Op::FunctionEnd, &[]);
    asm.finish()
}

#[test]
fn missing_entry_point() {
    init_logging();
    let words = trivial_module(|_| {});
    assert!(translate(&words, &Options::new(ExecutionModel::Fragment, "main")).is_ok());

    for options in [
        Options::new(ExecutionModel::Fragment, "other"),
        Options::new(ExecutionModel::Vertex, "main"),
    ] {
        match translate(&words, &options) {
            Err(Error::EntryPointNotFound { name, stage }) => {
                assert_eq!((name, stage), (options.entry_point.clone(), options.stage));
            }
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("found entry point {options:?}"),
        }
    }
}

#[test]
fn unsupported_features() {
    init_logging();
    let words = trivial_module(|asm| asm.capability(spirv::Capability::Float64));
    let err = match translate(&words, &Options::new(ExecutionModel::Fragment, "main")) {
        Ok(_) => panic!("translation unexpectedly succeeded"),
        Err(err) => err,
    };
    assert!(matches!(err, Error::Unsupported { .. }), "{err}");

    let words = trivial_module(|_| {});
    let err = match translate(&words, &Options::new(ExecutionModel::TessellationControl, "main")) {
        Ok(_) => panic!("translation unexpectedly succeeded"),
        Err(err) => err,
    };
    assert!(matches!(err, Error::Unsupported { .. }), "{err}");
}

fn fragment_err(words: &[u32]) -> Error {
    match translate(words, &Options::new(ExecutionModel::Fragment, "main")) {
        Ok(_) => panic!("translation unexpectedly succeeded"),
        Err(err) => err,
    }
}

#[test]
fn malformed_modules() {
    init_logging();
    let mut words = trivial_module(|_| {});
    words[0] = 0xdead_beef;
    assert!(matches!(fragment_err(&words), Error::Read(_)));

    // Byte-swapped modules are accepted.
    let words: Vec<_> = trivial_module(|_| {}).into_iter().map(u32::swap_bytes).collect();
    assert!(translate(&words, &Options::new(ExecutionModel::Fragment, "main")).is_ok());

    // `OpFunctionEnd` claiming an operand past the end of the module.
    let mut words = trivial_module(|_| {});
    *words.last_mut().unwrap() = (2 << 16) | Op::FunctionEnd as u32;
    assert!(matches!(fragment_err(&words), Error::Read(_)));
}
