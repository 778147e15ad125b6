//! Structured control-flow: scanning functions for their blocks, and walking
//! those blocks (following merge information) to build `if`/`loop` nodes.

use super::phi::PendingPhi;
use super::ssa::SsaValue;
use super::values::{DerefValue, FuncValue, SpvValue, ValueKind};
use super::{Error, FxIndexMap, Translator};
use crate::builder::{CfListRef, Cursor, FuncBuilder};
use crate::spv::read::invalid;
use crate::spv::{self, Id};
use crate::{
    AluOp, Const, Deref, Func, FuncDecl, FuncDefBody, IntrinsicOp, JumpKind, ScalarKind, Type,
    Value, VarDecl, VarMode,
};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::rc::Rc;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(super) enum Merge {
    Selection { merge: Id },
    Loop { merge: Id, cont: Id },
}

/// Per-block information, recorded by `scan_functions`.
#[derive(Copy, Clone, Debug)]
pub(super) struct BlockInfo {
    /// Index (into `Translator::insts`) of the `OpLabel`.
    pub label: usize,
    pub merge: Option<Merge>,
    /// Index of the terminator instruction.
    pub branch: Option<usize>,
    /// Set while walking the body of the loop this block is the header of,
    /// so that walking it again translates the block itself.
    pub loop_emitted: bool,
}

#[derive(Copy, Clone, Debug)]
pub(super) struct FuncInfo {
    pub id: Id,
    pub func: Func,
    pub start_label: Id,
}

/// Translation state for the function currently being emitted.
pub(super) struct FuncState {
    pub fb: FuncBuilder,

    /// Constants already materialized in this function.
    pub consts: FxHashMap<Const, Rc<SsaValue>>,

    /// Phis waiting for their sources, keyed by the position of their `OpPhi`.
    pub phis: FxIndexMap<usize, PendingPhi>,

    /// Where each `(predecessor, successor)` SPIR-V edge was taken from.
    pub edges: FxHashMap<(Id, Id), Cursor>,

    /// SPIR-V blocks whose instructions were translated.
    pub walked: FxHashSet<Id>,

    /// Switches being (or already) emitted, see `Targets::switch`.
    switches: Vec<SwitchState>,

    /// Label of the SPIR-V block being translated.
    pub label: Id,
}

/// An `OpSwitch`, lowered to a single-iteration `loop` (so that breaking out
/// of the switch is a `break`), holding one `if` per distinct case target,
/// each checking a local variable holding the index of the case to run.
struct SwitchState {
    /// Distinct targets, in order of first appearance (default first).
    cases: Vec<Id>,
    /// Index (into `cases`) of the case to run, or `-1` for none.
    next_case: Deref,
    /// End of the block right before the `loop`.
    pre: Cursor,
    /// Set when continuing an enclosing loop from inside the switch, which
    /// first has to break out of the switch's own `loop`.
    continue_flag: Option<Deref>,
}

/// How a branch target relates to the constructs being walked.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Exit {
    Break,
    Continue,
    /// End of the current list, which control falls out of naturally.
    FallThrough,
    /// Continue the loop enclosing a switch (by index into `FuncState::switches`).
    SwitchContinue(usize),
    /// Fall through from one case of a switch to another (by index).
    SwitchCase(usize, usize),
}

#[derive(Copy, Clone, Debug, Default)]
struct Targets {
    brk: Option<Id>,
    cont: Option<Id>,
    end: Option<Id>,
    /// Innermost switch (index into `FuncState::switches`) the walk is in,
    /// if it isn't also inside a loop nested in that switch.
    switch: Option<usize>,
}

impl Targets {
    fn exit(&self, target: Id) -> Option<Exit> {
        if Some(target) == self.brk {
            Some(Exit::Break)
        } else if Some(target) == self.cont {
            Some(Exit::Continue)
        } else if Some(target) == self.end {
            Some(Exit::FallThrough)
        } else {
            None
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Arm {
    /// Directly to the selection's merge block (i.e. an empty arm).
    Merge,
    Exit(Exit),
    /// Walk the blocks starting at the target, up until the merge block.
    Walk,
}

impl<'a> Translator<'a> {
    /// Create declarations for all functions (starting at `idx`), and record
    /// the structured control-flow of all their blocks.
    pub(super) fn scan_functions(&mut self, mut idx: usize) -> Result<(), Error> {
        use spirv::Op;

        let mut current: Option<(Id, Func, Option<Id>)> = None;
        let mut block = None;
        while idx < self.insts.len() {
            let inst = self.inst(idx);
            let w = inst.words;
            match inst.op() {
                Some(Op::Function) => {
                    if current.is_some() {
                        return Err(invalid("nested OpFunction").into());
                    }
                    let id = w[2];
                    let fn_ty = self.values.ty(w[4]).clone();
                    let ret_type = fn_ty
                        .return_type
                        .clone()
                        .ok_or_else(|| invalid("OpFunction with a non-function type"))?;
                    let func = self.module.funcs.define(
                        &self.cx,
                        FuncDecl {
                            name: self.name_of(id),
                            ret_type: ret_type.ty,
                            params: SmallVec::new(),
                            body: FuncDefBody::default(),
                        },
                    );
                    self.module.all_funcs.push(func);
                    self.values
                        .push(id, SpvValue::Function(FuncValue { func, ret_type, params: vec![] }));
                    current = Some((id, func, None));
                }
                Some(Op::FunctionParameter) => {
                    let Some((func_id, func, _)) = current else {
                        return Err(invalid("OpFunctionParameter outside of a function").into());
                    };
                    let ty = self.values.ty(w[1]).clone();
                    let var = self.define_var(VarDecl {
                        name: self.name_of(w[2]),
                        ty: ty.ty,
                        mode: VarMode::Param,
                        interface_type: None,
                        initializer: None,
                        data: Default::default(),
                    });
                    self.module.funcs[func].params.push(var);
                    match self.values.get_mut(func_id, ValueKind::Function) {
                        SpvValue::Function(func) => func.params.push(var),
                        _ => unreachable!(),
                    }
                    let deref = Deref::root(var, ty.ty);
                    self.values.push(w[2], SpvValue::Deref(DerefValue { deref, ty }));
                }
                Some(Op::Label) => {
                    let Some((_, _, start_label)) = &mut current else {
                        return Err(invalid("OpLabel outside of a function").into());
                    };
                    start_label.get_or_insert(w[1]);
                    self.values.push(
                        w[1],
                        SpvValue::Block(Box::new(BlockInfo {
                            label: idx,
                            merge: None,
                            branch: None,
                            loop_emitted: false,
                        })),
                    );
                    block = Some(w[1]);
                }
                Some(Op::SelectionMerge) => {
                    let label =
                        block.ok_or_else(|| invalid("OpSelectionMerge outside of a block"))?;
                    self.values.block_mut(label).merge = Some(Merge::Selection { merge: w[1] });
                }
                Some(Op::LoopMerge) => {
                    let label = block.ok_or_else(|| invalid("OpLoopMerge outside of a block"))?;
                    self.values.block_mut(label).merge =
                        Some(Merge::Loop { merge: w[1], cont: w[2] });
                }
                Some(
                    Op::Branch
                    | Op::BranchConditional
                    | Op::Switch
                    | Op::Return
                    | Op::ReturnValue
                    | Op::Kill
                    | Op::Unreachable,
                ) => {
                    let label =
                        block.take().ok_or_else(|| invalid("terminator outside of a block"))?;
                    self.values.block_mut(label).branch = Some(idx);
                }
                Some(Op::FunctionEnd) => {
                    let Some((id, func, start_label)) = current.take() else {
                        return Err(invalid("OpFunctionEnd outside of a function").into());
                    };
                    if block.is_some() {
                        return Err(invalid("block without a terminator").into());
                    }
                    let start_label = start_label
                        .ok_or_else(|| Error::unsupported("function declarations without a body"))?;
                    self.funcs.push(FuncInfo { id, func, start_label });
                }
                _ => {}
            }
            idx += 1;
        }
        if current.is_some() {
            return Err(invalid("missing OpFunctionEnd").into());
        }
        Ok(())
    }

    pub(super) fn emit_function(&mut self, i: usize) -> Result<(), Error> {
        let FuncInfo { id, func, start_label } = self.funcs[i];
        log::debug!(
            "translating function %{id}{}",
            self.values.name(id).map(|name| format!(" (`{name}`)")).unwrap_or_default()
        );

        self.func = Some(FuncState {
            fb: FuncBuilder::new(self.cx.clone()),
            consts: FxHashMap::default(),
            phis: FxIndexMap::default(),
            edges: FxHashMap::default(),
            walked: FxHashSet::default(),
            switches: vec![],
            label: start_label,
        });
        self.walk_blocks(start_label, Targets::default())?;
        self.resolve_phis()?;

        let state = self.func.take().expect("function state set above");
        self.module.funcs[func].body = state.fb.finish();
        Ok(())
    }

    /// Translate the blocks starting at `start`, following the structured
    /// control-flow until reaching one of `targets` (or returning).
    fn walk_blocks(&mut self, start: Id, targets: Targets) -> Result<(), Error> {
        use spirv::Op;

        let mut label = start;
        loop {
            let BlockInfo { label: label_idx, merge, branch, loop_emitted } =
                *self.values.block(label);
            let branch = branch.expect("block without a terminator");

            if let (Some(Merge::Loop { merge, cont }), false) = (merge, loop_emitted) {
                let fb = self.fb();
                let outer = fb.cursor().list;
                let node = fb.push_loop();
                log::trace!("%{label}: {node:?} (merge %{merge}, continue %{cont})");
                fb.enter(CfListRef::LoopBody(node));

                self.values.block_mut(label).loop_emitted = true;
                self.walk_blocks(
                    label,
                    Targets { brk: Some(merge), cont: Some(cont), end: None, switch: None },
                )?;
                if cont != label {
                    self.fb().enter(CfListRef::LoopContinue(node));
                    self.walk_blocks(
                        cont,
                        Targets { brk: Some(merge), cont: None, end: Some(label), switch: None },
                    )?;
                }
                self.values.block_mut(label).loop_emitted = false;

                if !self.continue_at_merge(merge, outer, targets) {
                    return Ok(());
                }
                label = merge;
                continue;
            }

            let state = self.func_state();
            state.label = label;
            state.walked.insert(label);
            for idx in label_idx + 1..branch {
                let inst = self.inst(idx);
                self.handle_body_inst(inst)?;
            }

            let inst = self.inst(branch);
            let w = inst.words;
            match inst.op() {
                Some(Op::Branch) => {
                    let target = w[1];
                    self.record_edge(label, target);
                    if let Some(exit) = self.exit(targets, target) {
                        self.jump(exit);
                        return Ok(());
                    }
                    // Straight-line code, the target block just continues
                    // the current IR block.
                    label = target;
                }

                Some(Op::BranchConditional) => {
                    let (then_target, else_target) = (w[2], w[3]);
                    let selection_merge = match merge {
                        Some(Merge::Selection { merge }) => Some(merge),
                        _ => None,
                    };

                    let arm = |target: Id| -> Result<Arm, Error> {
                        if Some(target) == selection_merge {
                            return Ok(Arm::Merge);
                        }
                        match self.exit(targets, target) {
                            Some(Exit::FallThrough) if selection_merge.is_some() => {
                                Err(Error::unsupported("branch out of a selection construct"))
                            }
                            Some(exit) => Ok(Arm::Exit(exit)),
                            None => Ok(Arm::Walk),
                        }
                    };
                    let arms = [(then_target, arm(then_target)?), (else_target, arm(else_target)?)];
                    if selection_merge.is_none() && arms.iter().all(|&(_, arm)| arm == Arm::Walk) {
                        return Err(Error::unsupported(
                            "conditional branch without a selection merge",
                        ));
                    }

                    let cond = self.ssa_leaf(w[1]);
                    let fb = self.fb();
                    let pre = fb.cursor();
                    let node = fb.push_if(cond);
                    log::trace!("%{label}: {node:?} (then %{then_target}, else %{else_target})");

                    let arm_targets = Targets { end: selection_merge.or(targets.end), ..targets };
                    for ((target, arm), list) in
                        arms.into_iter().zip([CfListRef::IfThen(node), CfListRef::IfElse(node)])
                    {
                        let block = self.fb().enter(list);
                        match arm {
                            Arm::Merge | Arm::Exit(Exit::FallThrough) => {
                                self.record_edge_from(label, target, Cursor { list, block });
                            }
                            Arm::Exit(exit) => {
                                self.record_edge_from(label, target, Cursor { list, block });
                                self.jump(exit);
                            }
                            Arm::Walk => {
                                self.record_edge_from(label, target, pre);
                                self.walk_blocks(target, arm_targets)?;
                            }
                        }
                    }

                    let both_jump = arms.iter().all(|&(_, arm)| {
                        matches!(arm, Arm::Exit(exit) if exit != Exit::FallThrough)
                    });
                    match selection_merge {
                        Some(merge) if !both_jump => {
                            if !self.continue_at_merge(merge, pre.list, targets) {
                                return Ok(());
                            }
                            label = merge;
                        }
                        _ => return Ok(()),
                    }
                }

                Some(Op::Return) => {
                    self.fb().jump(JumpKind::Return, &[]);
                    return Ok(());
                }
                Some(Op::ReturnValue) => {
                    let leaves = self.ssa_value(w[1]).leaves();
                    self.fb().jump(JumpKind::Return, &leaves);
                    return Ok(());
                }
                Some(Op::Kill) => {
                    self.fb().intrinsic(IntrinsicOp::Discard, &[], &[], None);
                    return Ok(());
                }
                Some(Op::Unreachable) => return Ok(()),

                Some(Op::Switch) => {
                    let Some(Merge::Selection { merge }) = merge else {
                        return Err(invalid("OpSwitch without an OpSelectionMerge").into());
                    };
                    let outer = self.emit_switch(label, inst, merge, targets)?;
                    if !self.continue_at_merge(merge, outer, targets) {
                        return Ok(());
                    }
                    label = merge;
                }

                op => unreachable!("{op:?} is not a terminator"),
            }
        }
    }

    /// Continue after a construct, at its `merge` block, unless that exits
    /// the current walk (in which case `false` is returned).
    fn continue_at_merge(&mut self, merge: Id, list: CfListRef, targets: Targets) -> bool {
        match self.exit(targets, merge) {
            Some(Exit::FallThrough) => false,
            Some(exit) => {
                self.fb().enter(list);
                self.jump(exit);
                false
            }
            None => {
                self.fb().enter(list);
                true
            }
        }
    }

    /// Lower the `OpSwitch` ending the block `label`, leaving the cursor
    /// right after it (in the returned list) once all cases were walked.
    fn emit_switch(
        &mut self,
        label: Id,
        inst: spv::Inst<'a>,
        merge: Id,
        targets: Targets,
    ) -> Result<CfListRef, Error> {
        let w = inst.words;
        let (selector, default) = (w[1], w[2]);
        let literals = inst.from(3);
        if literals.len() % 2 != 0 {
            return Err(invalid("OpSwitch with an odd number of literal/label words").into());
        }
        let literals = literals.chunks_exact(2).map(|pair| (pair[0], pair[1]));
        let reaches_merge = default == merge || literals.clone().any(|(_, target)| target == merge);

        // Cases only reaching the merge block don't need an `if`.
        let mut cases: Vec<Id> = vec![];
        for target in std::iter::once(default).chain(literals.clone().map(|(_, target)| target)) {
            if target != merge && !cases.contains(&target) {
                cases.push(target);
            }
        }
        let case_index =
            |target: Id| cases.iter().position(|&case| case == target).map_or(-1, |i| i as i32);

        let selector = self.ssa_leaf(selector);
        let int = self.cx.scalar_type(ScalarKind::Int);
        let next_case = self.local_var("switch_case", int);
        let fb = self.fb();
        let default_case = case_index(default);
        let mut next = fb.imm_i32(default_case);
        for (literal, target) in literals {
            let case = case_index(target);
            if case == default_case {
                continue;
            }
            let literal = fb.imm_u32(literal);
            let matches = fb.alu2(AluOp::Ieq, selector, literal);
            let case = fb.imm_i32(case);
            next = fb.alu3(AluOp::Bcsel, matches, case, next);
        }
        let store = IntrinsicOp::StoreVar { write_mask: 0x1 };
        fb.intrinsic(store, &[next_case.clone()], &[next], None);

        let pre = fb.cursor();
        let node = fb.push_loop();
        log::trace!("%{label}: switch {node:?} (merge %{merge}, cases {cases:?})");
        fb.enter(CfListRef::LoopBody(node));
        let current = fb.intrinsic(IntrinsicOp::LoadVar, &[next_case.clone()], &[], Some(1));

        let state = self.func_state();
        let switch = state.switches.len();
        state.switches.push(SwitchState {
            cases: cases.clone(),
            next_case,
            pre,
            continue_flag: None,
        });

        let case_targets =
            Targets { brk: Some(merge), cont: targets.cont, end: None, switch: Some(switch) };
        for (i, &case) in cases.iter().enumerate() {
            self.record_edge_from(label, case, pre);
            let fb = self.fb();
            let i = fb.imm_i32(i as i32);
            let is_current = fb.alu2(AluOp::Ieq, Value::Inst(current), i);
            let node_if = fb.push_if(is_current);
            fb.enter(CfListRef::IfThen(node_if));
            self.walk_blocks(case, case_targets)?;
            self.fb().enter(CfListRef::LoopBody(node));
        }
        // No case to run (or, after a fallthrough, nothing left to run).
        if reaches_merge {
            self.record_edge(label, merge);
        }
        self.fb().jump(JumpKind::Break, &[]);

        if let Some(flag) = self.func_state().switches[switch].continue_flag.clone() {
            let fb = self.fb();
            fb.enter(pre.list);
            let flag = fb.intrinsic(IntrinsicOp::LoadVar, &[flag], &[], Some(1));
            let node_if = fb.push_if(Value::Inst(flag));
            fb.enter(CfListRef::IfThen(node_if));
            let cont = targets.cont.expect("continue flag set outside of a loop");
            let exit = self.exit(targets, cont).expect("loop continue target is an exit");
            self.jump(exit);
        }
        Ok(pre.list)
    }

    fn local_var(&mut self, name: &str, ty: Type) -> Deref {
        let var = self.define_var(VarDecl {
            name: Some(self.cx.intern(name)),
            ty,
            mode: VarMode::Local,
            interface_type: None,
            initializer: None,
            data: Default::default(),
        });
        self.fb().body.locals.push(var);
        Deref::root(var, ty)
    }

    /// Like `Targets::exit`, also taking into account the cases of the
    /// switch being walked (if any).
    fn exit(&self, targets: Targets, target: Id) -> Option<Exit> {
        let exit = targets.exit(target);
        let Some(switch) = targets.switch else {
            return exit;
        };
        match exit {
            Some(Exit::Continue) => Some(Exit::SwitchContinue(switch)),
            Some(exit) => Some(exit),
            None => {
                let state = self.func.as_ref().expect("not inside a function body");
                let cases = &state.switches[switch].cases;
                cases.iter().position(|&case| case == target).map(|i| Exit::SwitchCase(switch, i))
            }
        }
    }

    fn jump(&mut self, exit: Exit) {
        let kind = match exit {
            Exit::Break => JumpKind::Break,
            Exit::Continue => JumpKind::Continue,
            Exit::FallThrough => return,
            Exit::SwitchContinue(switch) => {
                let flag = match &self.func_state().switches[switch].continue_flag {
                    Some(flag) => flag.clone(),
                    None => {
                        let ty = self.cx.scalar_type(ScalarKind::Bool);
                        let flag = self.local_var("switch_continue", ty);
                        // Cleared before entering the switch.
                        let pre = self.func_state().switches[switch].pre;
                        let here = self.fb().cursor();
                        self.fb().set_cursor(pre);
                        self.store_local(&flag, 0);
                        self.fb().set_cursor(here);
                        self.func_state().switches[switch].continue_flag = Some(flag.clone());
                        flag
                    }
                };
                self.store_local(&flag, !0);
                JumpKind::Break
            }
            Exit::SwitchCase(switch, case) => {
                let next_case = self.func_state().switches[switch].next_case.clone();
                self.store_local(&next_case, case as u32);
                JumpKind::Continue
            }
        };
        self.fb().jump(kind, &[]);
    }

    fn store_local(&mut self, deref: &Deref, value: u32) {
        let fb = self.fb();
        let value = fb.imm_u32(value);
        fb.intrinsic(IntrinsicOp::StoreVar { write_mask: 0x1 }, &[deref.clone()], &[value], None);
    }

    fn record_edge(&mut self, pred: Id, target: Id) {
        let cursor = self.fb().cursor();
        self.record_edge_from(pred, target, cursor);
    }

    fn record_edge_from(&mut self, pred: Id, target: Id, cursor: Cursor) {
        self.func_state().edges.insert((pred, target), cursor);
    }

    /// Geometry shader output, and barriers (neither of which affect the CFG).
    pub(super) fn handle_barrier(&mut self, inst: spv::Inst<'a>) -> Result<(), Error> {
        use spirv::Op;
        let op = inst.op().expect("dispatched on a known opcode");
        let intrinsic = match op {
            Op::EmitVertex => IntrinsicOp::EmitVertex { stream: 0 },
            Op::EndPrimitive => IntrinsicOp::EndPrimitive { stream: 0 },
            Op::EmitStreamVertex => {
                IntrinsicOp::EmitVertex { stream: self.const_u32(inst.words[1]) }
            }
            Op::EndStreamPrimitive => {
                IntrinsicOp::EndPrimitive { stream: self.const_u32(inst.words[1]) }
            }
            Op::ControlBarrier => IntrinsicOp::Barrier,
            Op::MemoryBarrier => IntrinsicOp::MemoryBarrier,
            _ => unreachable!("{op:?} is not a barrier instruction"),
        };
        if matches!(intrinsic, IntrinsicOp::EmitVertex { .. } | IntrinsicOp::EndPrimitive { .. })
            && self.options.stage != spirv::ExecutionModel::Geometry
        {
            return Err(Error::unsupported(format!("{op:?} outside of a geometry shader")));
        }
        self.fb().intrinsic(intrinsic, &[], &[], None);
        Ok(())
    }
}
