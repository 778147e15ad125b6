//! Cursor-based IR construction (inserting instructions and control-flow nodes).

use crate::{
    AluOp, Block, BlockDef, CfList, CfNode, Context, Deref, FuncDefBody, IfDef, IfNode, Inst,
    InstDef, InstKind, IntrinsicOp, JumpKind, LoopDef, LoopNode, ScalarKind, SsaDest, Value,
};
use arrayvec::ArrayVec;
use smallvec::SmallVec;
use std::rc::Rc;

/// One of the `CfList`s of a function (its body, or nested in a `CfNode`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CfListRef {
    FuncBody,
    IfThen(IfNode),
    IfElse(IfNode),
    LoopBody(LoopNode),
    LoopContinue(LoopNode),
}

/// Insertion point: the end of `block`, which itself is the last node of `list`
/// (at least while the cursor is being used).
#[derive(Copy, Clone, Debug)]
pub struct Cursor {
    pub list: CfListRef,
    pub block: Block,
}

pub struct FuncBuilder {
    cx: Rc<Context>,

    pub body: FuncDefBody,
    cursor: Cursor,

    entry_block: Block,

    /// Number of instructions at the start of `entry_block` which were
    /// inserted through `insert_at_start` (new ones go after them).
    hoisted: usize,
}

impl FuncBuilder {
    pub fn new(cx: Rc<Context>) -> Self {
        let mut body = FuncDefBody::default();
        let entry_block = body.blocks.define(&cx, BlockDef::default());
        body.body.push(CfNode::Block(entry_block));
        Self {
            cx,
            body,
            cursor: Cursor { list: CfListRef::FuncBody, block: entry_block },
            entry_block,
            hoisted: 0,
        }
    }

    pub fn cx(&self) -> &Context {
        &self.cx
    }

    pub fn finish(self) -> FuncDefBody {
        self.body
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn current_block(&self) -> Block {
        self.cursor.block
    }

    pub fn list_mut(&mut self, list: CfListRef) -> &mut CfList {
        match list {
            CfListRef::FuncBody => &mut self.body.body,
            CfListRef::IfThen(node) => &mut self.body.ifs[node].then_body,
            CfListRef::IfElse(node) => &mut self.body.ifs[node].else_body,
            CfListRef::LoopBody(node) => &mut self.body.loops[node].body,
            CfListRef::LoopContinue(node) => &mut self.body.loops[node].continue_body,
        }
    }

    /// Start a new (empty) block at the end of `list`, and move the cursor to it.
    pub fn enter(&mut self, list: CfListRef) -> Block {
        let block = self.body.blocks.define(&self.cx, BlockDef::default());
        self.list_mut(list).push(CfNode::Block(block));
        self.cursor = Cursor { list, block };
        block
    }

    /// Ensure the current block has nothing but phis in it, so that more phis
    /// can be added to it (splitting the block otherwise).
    pub fn ensure_phi_block(&mut self) -> Block {
        let has_non_phi = self.body.blocks[self.cursor.block]
            .insts
            .iter()
            .any(|&inst| !matches!(self.body.insts[inst].kind, InstKind::Phi(_)));
        if has_non_phi {
            self.enter(self.cursor.list);
        }
        self.cursor.block
    }

    /// Append an `if` node to the current list. The cursor is left unchanged,
    /// and the caller is responsible for `enter`ing the arms (and whatever
    /// follows the `if`).
    pub fn push_if(&mut self, condition: Value) -> IfNode {
        let node = self.body.ifs.define(
            &self.cx,
            IfDef { condition, then_body: vec![], else_body: vec![] },
        );
        self.list_mut(self.cursor.list).push(CfNode::If(node));
        node
    }

    /// Append a `loop` node to the current list (see also `push_if`).
    pub fn push_loop(&mut self) -> LoopNode {
        let node =
            self.body.loops.define(&self.cx, LoopDef { body: vec![], continue_body: vec![] });
        self.list_mut(self.cursor.list).push(CfNode::Loop(node));
        node
    }

    /// Move the cursor back to an earlier position (e.g. a predecessor block).
    pub fn set_cursor(&mut self, cursor: Cursor) {
        self.cursor = cursor;
    }

    /// Insert at the cursor, which for a block already ending in a `Jump`
    /// means right before that `Jump`.
    pub fn insert(&mut self, def: InstDef) -> Inst {
        let inst = self.body.insts.define(&self.cx, def);
        let insts = &self.body.insts;
        let block_insts = &mut self.body.blocks[self.cursor.block].insts;
        let pos = match block_insts.last() {
            Some(&last) if matches!(insts[last].kind, InstKind::Jump(_)) => block_insts.len() - 1,
            _ => block_insts.len(),
        };
        block_insts.insert(pos, inst);
        inst
    }

    /// Insert at the start of the function, ahead of everything but other
    /// instructions inserted the same way (used for constants and undefs).
    pub fn insert_at_start(&mut self, def: InstDef) -> Inst {
        let inst = self.body.insts.define(&self.cx, def);
        self.body.blocks[self.entry_block].insts.insert(self.hoisted, inst);
        self.hoisted += 1;
        inst
    }

    pub fn num_components(&self, v: Value) -> u8 {
        match v {
            Value::Inst(inst) => {
                self.body.insts[inst].output.expect("instruction has no output").num_components
            }
            Value::CallOutput { call, idx } => match &self.body.insts[call].kind {
                InstKind::Call { outputs, .. } => outputs[idx as usize].num_components,
                _ => unreachable!("CallOutput of non-call instruction"),
            },
        }
    }

    pub fn alu(&mut self, op: AluOp, srcs: &[Value]) -> Value {
        let num_components = op
            .output_size()
            .unwrap_or_else(|| srcs.iter().map(|&v| self.num_components(v)).max().unwrap_or(1));
        self.alu_sized(op, srcs, num_components)
    }

    pub fn alu_sized(&mut self, op: AluOp, srcs: &[Value], num_components: u8) -> Value {
        Value::Inst(self.insert(InstDef {
            kind: InstKind::Alu(op),
            inputs: srcs.iter().copied().collect(),
            output: Some(SsaDest { num_components }),
        }))
    }

    pub fn alu1(&mut self, op: AluOp, a: Value) -> Value {
        self.alu(op, &[a])
    }

    pub fn alu2(&mut self, op: AluOp, a: Value, b: Value) -> Value {
        self.alu(op, &[a, b])
    }

    pub fn alu3(&mut self, op: AluOp, a: Value, b: Value, c: Value) -> Value {
        self.alu(op, &[a, b, c])
    }

    pub fn swizzle(&mut self, v: Value, components: &[u8]) -> Value {
        let components: ArrayVec<u8, 4> = components.iter().copied().collect();
        let num_components = components.len() as u8;
        Value::Inst(self.insert(InstDef {
            kind: InstKind::Swizzle(components),
            inputs: [v].into_iter().collect(),
            output: Some(SsaDest { num_components }),
        }))
    }

    pub fn channel(&mut self, v: Value, c: u8) -> Value {
        self.swizzle(v, &[c])
    }

    /// Gather scalars into a vector (a plain move for a single scalar).
    pub fn vec(&mut self, comps: &[Value]) -> Value {
        self.alu(AluOp::vec(comps.len()), comps)
    }

    pub fn imm(&mut self, words: &[u32]) -> Value {
        Value::Inst(self.insert_at_start(InstDef {
            kind: InstKind::LoadConst(words.iter().copied().collect()),
            inputs: SmallVec::new(),
            output: Some(SsaDest { num_components: words.len() as u8 }),
        }))
    }

    pub fn imm_u32(&mut self, x: u32) -> Value {
        self.imm(&[x])
    }

    pub fn imm_i32(&mut self, x: i32) -> Value {
        self.imm(&[x as u32])
    }

    pub fn imm_f32(&mut self, x: f32) -> Value {
        self.imm(&[x.to_bits()])
    }

    /// Immediate zero (or `false`), with `num_components` components.
    pub fn imm_zero(&mut self, num_components: u8) -> Value {
        self.imm(&vec![0; usize::from(num_components)])
    }

    pub fn imm_for_kind(&mut self, kind: ScalarKind, x: f64) -> Value {
        match kind {
            ScalarKind::Float => self.imm_f32(x as f32),
            ScalarKind::Int | ScalarKind::Bool => self.imm_i32(x as i32),
            ScalarKind::Uint => self.imm_u32(x as u32),
        }
    }

    pub fn undef(&mut self, num_components: u8) -> Value {
        Value::Inst(self.insert_at_start(InstDef {
            kind: InstKind::Undef,
            inputs: SmallVec::new(),
            output: Some(SsaDest { num_components }),
        }))
    }

    pub fn intrinsic(
        &mut self,
        op: IntrinsicOp,
        derefs: &[Deref],
        inputs: &[Value],
        num_components: Option<u8>,
    ) -> Inst {
        self.insert(InstDef {
            kind: InstKind::Intrinsic { op, derefs: derefs.iter().cloned().collect() },
            inputs: inputs.iter().copied().collect(),
            output: num_components.map(|num_components| SsaDest { num_components }),
        })
    }

    pub fn jump(&mut self, kind: JumpKind, inputs: &[Value]) {
        self.insert(InstDef {
            kind: InstKind::Jump(kind),
            inputs: inputs.iter().copied().collect(),
            output: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hoisted_instructions_stay_ahead_of_the_rest() {
        let cx = Rc::new(Context::new());
        let mut fb = FuncBuilder::new(cx);
        let a = fb.imm_u32(1);
        let b = fb.imm_u32(2);
        let sum = fb.alu2(AluOp::Iadd, a, b);
        let c = fb.imm_u32(3);

        let entry = fb.current_block();
        let insts: Vec<_> =
            fb.body.blocks[entry].insts.iter().map(|&inst| Value::Inst(inst)).collect();
        assert_eq!(insts, [a, b, c, sum]);
    }

    #[test]
    fn phi_blocks_are_split_off() {
        let cx = Rc::new(Context::new());
        let mut fb = FuncBuilder::new(cx);
        let entry = fb.current_block();

        // Only hoisted instructions so far, still not a pure phi block.
        let one = fb.imm_u32(1);
        fb.alu1(AluOp::Imov, one);
        let phi_block = fb.ensure_phi_block();
        assert!(phi_block != entry);
        assert_eq!(fb.body.body.len(), 2);

        // Already empty, no further split.
        assert!(fb.ensure_phi_block() == phi_block);
    }

    #[test]
    fn jumps_stay_last() {
        let cx = Rc::new(Context::new());
        let mut fb = FuncBuilder::new(cx);
        let x = fb.undef(1);
        fb.jump(JumpKind::Return, &[]);
        let y = fb.alu1(AluOp::Fneg, x);

        let entry = fb.current_block();
        let insts = &fb.body.blocks[entry].insts;
        assert_eq!(insts.len(), 3);
        assert_eq!(Value::Inst(insts[1]), y);
        assert!(matches!(fb.body.insts[insts[2]].kind, InstKind::Jump(JumpKind::Return)));
    }

    #[test]
    fn alu_output_width_follows_inputs() {
        let cx = Rc::new(Context::new());
        let mut fb = FuncBuilder::new(cx);
        let v = fb.imm(&[0, 1, 2]);
        let s = fb.imm_u32(7);
        let sum = fb.alu2(AluOp::Iadd, v, s);
        assert_eq!(fb.num_components(sum), 3);
        let dot = fb.alu2(AluOp::Fdot3, v, v);
        assert_eq!(fb.num_components(dot), 1);
        let x = fb.channel(v, 2);
        assert_eq!(fb.num_components(x), 1);
    }
}
