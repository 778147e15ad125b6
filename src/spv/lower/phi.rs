//! Phis, created empty when reached, and completed once the whole function
//! was walked (as their sources may come from blocks translated later).

use super::ssa::SsaValue;
use super::{Error, Translator};
use crate::spv::read::invalid;
use crate::spv::{self, Id};
use crate::{InstDef, InstKind, PhiEdge, SsaDest, Value};
use smallvec::SmallVec;
use std::mem;
use std::rc::Rc;

pub(super) struct PendingPhi {
    /// Index (into `Translator::insts`) of the `OpPhi`.
    idx: usize,
    /// Label of the block the `OpPhi` is in.
    label: Id,
    ssa: Rc<SsaValue>,
}

impl<'a> Translator<'a> {
    pub(super) fn handle_phi(&mut self, inst: spv::Inst<'a>) -> Result<(), Error> {
        let w = inst.words;
        let ty = self.values.ty(w[1]).ty;
        let idx = self
            .insts
            .binary_search_by_key(&inst.pos, |pos| pos.pos)
            .expect("instruction not from this module");

        let cx = self.cx.clone();
        let state = self.func_state();
        state.fb.ensure_phi_block();
        let fb = &mut state.fb;
        let ssa = SsaValue::from_type(&cx, ty, &mut |leaf| {
            let num_components = cx[leaf].vector_elements();
            Value::Inst(fb.insert(InstDef {
                kind: InstKind::Phi(SmallVec::new()),
                inputs: SmallVec::new(),
                output: Some(SsaDest { num_components }),
            }))
        });
        let label = state.label;
        state.phis.insert(inst.pos, PendingPhi { idx, label, ssa: ssa.clone() });

        self.push_ssa(w[2], ssa);
        Ok(())
    }

    /// Add the sources of all the phis created so far, each one computed at
    /// the end of the IR block its SPIR-V edge was taken from.
    ///
    /// Sources from blocks that were never reached are dropped, while a
    /// reached block must have actually branched to the phi's block.
    pub(super) fn resolve_phis(&mut self) -> Result<(), Error> {
        let pending = mem::take(&mut self.func_state().phis);
        for PendingPhi { idx, label, ssa } in pending.into_values() {
            let inst = self.inst(idx);
            let phi_id = inst.words[2];
            for pair in inst.from(3).chunks_exact(2) {
                let (src, pred) = (pair[0], pair[1]);
                let state = self.func_state();
                let Some(&pred_cursor) = state.edges.get(&(pred, label)) else {
                    if state.walked.contains(&pred) {
                        return Err(invalid(&format!(
                            "OpPhi %{phi_id} source from %{pred}, which doesn't branch to %{label}"
                        ))
                        .into());
                    }
                    log::trace!("%{phi_id}: no edge from %{pred} (unreachable)");
                    continue;
                };
                if !self.values.is_defined(src) {
                    log::trace!("%{phi_id}: source %{src} (from %{pred}) was never defined");
                    continue;
                }

                self.fb().set_cursor(pred_cursor);
                let src = self.ssa_value(src);
                assert!(ssa.same_shape(&src), "phi %{phi_id} source has a different type");

                let body = &mut self.fb().body;
                for (phi, value) in ssa.leaves().into_iter().zip(src.leaves()) {
                    let Value::Inst(phi) = phi else { unreachable!() };
                    match &mut body.insts[phi].kind {
                        InstKind::Phi(edges) => {
                            edges.push(PhiEdge { pred: pred_cursor.block, value });
                        }
                        _ => unreachable!(),
                    }
                }
                log::trace!("%{phi_id}: edge from %{pred} ({:?})", pred_cursor.block);
            }
        }
        Ok(())
    }
}
