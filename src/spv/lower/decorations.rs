//! Decorations (and decoration groups), attached to IDs ahead of their use.

use super::values::{SpvValue, ValueKind, ValueTable};
use crate::spv::{self, Id};
use smallvec::SmallVec;

/// Decoration groups can only nest through `OpGroupDecorate`, and valid
/// modules can't have cycles, so anything deeper is certainly a cycle.
const MAX_GROUP_DEPTH: u32 = 32;

#[derive(Copy, Clone, Debug)]
pub(super) enum DecorationSource<'a> {
    Direct { decoration: spirv::Decoration, literals: &'a [u32] },
    /// Every decoration of the group, applied as if it was attached directly.
    Group(Id),
}

#[derive(Copy, Clone, Debug)]
pub(super) struct Decoration<'a> {
    /// `None` for decorations of the whole value (`OpDecorate`).
    pub member: Option<u32>,
    pub source: DecorationSource<'a>,
}

/// One decoration after expanding groups, as seen by its consumers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(super) struct EffectiveDecoration<'a> {
    pub member: Option<u32>,
    pub decoration: spirv::Decoration,
    pub literals: &'a [u32],
}

impl<'a> EffectiveDecoration<'a> {
    pub fn literal(&self, idx: usize) -> u32 {
        self.literals[idx]
    }
}

/// Record the decoration (or group) `inst` attaches to its target(s).
pub(super) fn handle_decoration<'a>(values: &mut ValueTable<'a>, inst: spv::Inst<'a>) {
    let w = inst.words;
    let direct = |decoration: u32, literals: &'a [u32]| {
        match spirv::Decoration::from_u32(decoration) {
            Some(decoration) => Some(DecorationSource::Direct { decoration, literals }),
            None => {
                log::debug!("ignoring unknown decoration {decoration}");
                None
            }
        }
    };

    match inst.op() {
        Some(spirv::Op::DecorationGroup) => values.push(w[1], SpvValue::DecorationGroup),

        Some(spirv::Op::Decorate) => {
            if let Some(source) = direct(w[2], inst.from(3)) {
                values.add_decoration(w[1], Decoration { member: None, source });
            }
        }
        Some(spirv::Op::MemberDecorate) => {
            if let Some(source) = direct(w[3], inst.from(4)) {
                values.add_decoration(w[1], Decoration { member: Some(w[2]), source });
            }
        }

        Some(spirv::Op::GroupDecorate) => {
            let group = w[1];
            values.get(group, ValueKind::DecorationGroup);
            for &target in inst.from(2) {
                let source = DecorationSource::Group(group);
                values.add_decoration(target, Decoration { member: None, source });
            }
        }
        Some(spirv::Op::GroupMemberDecorate) => {
            let group = w[1];
            values.get(group, ValueKind::DecorationGroup);
            for pair in inst.from(2).chunks_exact(2) {
                let source = DecorationSource::Group(group);
                values.add_decoration(pair[0], Decoration { member: Some(pair[1]), source });
            }
        }

        op => unreachable!("{op:?} is not a decoration instruction"),
    }
}

/// All the decorations effectively applying to `id`, in declaration order,
/// with decoration groups expanded (depth-first).
pub(super) fn collect_decorations<'a>(
    values: &ValueTable<'a>,
    id: Id,
) -> SmallVec<[EffectiveDecoration<'a>; 4]> {
    let mut out = SmallVec::new();
    expand_into(values, id, None, 0, &mut out);
    out
}

fn expand_into<'a>(
    values: &ValueTable<'a>,
    id: Id,
    parent_member: Option<u32>,
    depth: u32,
    out: &mut SmallVec<[EffectiveDecoration<'a>; 4]>,
) {
    debug_assert!(depth < MAX_GROUP_DEPTH, "cycle in decoration groups (through %{id})");

    for dec in values.decorations(id) {
        // A group applied to a member passes that member on to its contents.
        let member = match (dec.member, parent_member) {
            (Some(_), Some(_)) => {
                unreachable!("member decoration inside a group applied to a member")
            }
            (member, None) | (None, member) => member,
        };
        match dec.source {
            DecorationSource::Group(group) => expand_into(values, group, member, depth + 1, out),
            DecorationSource::Direct { decoration, literals } => {
                out.push(EffectiveDecoration { member, decoration, literals });
            }
        }
    }
}
