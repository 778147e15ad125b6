//! Write-once table of everything a SPIR-V ID can refer to.

use super::cfg::BlockInfo;
use super::decorations::Decoration;
use super::ssa::SsaValue;
use super::types::TypeInfo;
use crate::spv::Id;
use crate::{Const, Deref, Func, Value, Var};
use std::fmt;
use std::rc::Rc;

/// Pointer value: a deref chain, along with the layout of the type it points
/// to (or of the whole variable, for external blocks, which keep their chain
/// unresolved until the actual load/store).
#[derive(Clone)]
pub(super) struct DerefValue {
    pub deref: Deref,
    pub ty: Rc<TypeInfo>,
}

/// Result of `OpSampledImage` (or of an access chain into an array of images,
/// which keeps the sampler it was combined with).
#[derive(Clone)]
pub(super) struct SampledImage {
    pub image: DerefValue,
    pub sampler: Deref,
}

/// Result of `OpImageTexelPointer`, only usable by atomics.
#[derive(Clone)]
pub(super) struct ImagePointer {
    pub image: Deref,
    pub coord: Value,
    pub sample: Value,
}

#[derive(Clone)]
pub(super) struct FuncValue {
    pub func: Func,
    pub ret_type: Rc<TypeInfo>,
    pub params: Vec<Var>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(super) enum ExtInstSet {
    GlslStd450,
}

pub(super) enum SpvValue {
    Invalid,
    Undef(Rc<TypeInfo>),
    String(String),
    DecorationGroup,
    ExtInstImport(ExtInstSet),
    Type(Rc<TypeInfo>),
    Constant { ty: Rc<TypeInfo>, value: Const },
    Deref(DerefValue),
    SampledImage(Rc<SampledImage>),
    ImagePointer(Rc<ImagePointer>),
    Function(FuncValue),
    Block(Box<BlockInfo>),
    Ssa(Rc<SsaValue>),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(super) enum ValueKind {
    Invalid,
    Undef,
    String,
    DecorationGroup,
    ExtInstImport,
    Type,
    Constant,
    Deref,
    SampledImage,
    ImagePointer,
    Function,
    Block,
    Ssa,
}

impl SpvValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            SpvValue::Invalid => ValueKind::Invalid,
            SpvValue::Undef(_) => ValueKind::Undef,
            SpvValue::String(_) => ValueKind::String,
            SpvValue::DecorationGroup => ValueKind::DecorationGroup,
            SpvValue::ExtInstImport(_) => ValueKind::ExtInstImport,
            SpvValue::Type(_) => ValueKind::Type,
            SpvValue::Constant { .. } => ValueKind::Constant,
            SpvValue::Deref(_) => ValueKind::Deref,
            SpvValue::SampledImage(_) => ValueKind::SampledImage,
            SpvValue::ImagePointer(_) => ValueKind::ImagePointer,
            SpvValue::Function(_) => ValueKind::Function,
            SpvValue::Block(_) => ValueKind::Block,
            SpvValue::Ssa(_) => ValueKind::Ssa,
        }
    }
}

impl fmt::Debug for SpvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind())
    }
}

struct Entry<'a> {
    value: SpvValue,
    name: Option<String>,
    decorations: Vec<Decoration<'a>>,
}

/// Dense, ID-indexed table (sized by the module header's ID bound).
pub(super) struct ValueTable<'a> {
    entries: Vec<Entry<'a>>,
}

impl<'a> ValueTable<'a> {
    pub fn new(id_bound: u32) -> Self {
        Self {
            entries: (0..id_bound)
                .map(|_| Entry { value: SpvValue::Invalid, name: None, decorations: vec![] })
                .collect(),
        }
    }

    pub fn id_bound(&self) -> u32 {
        self.entries.len() as u32
    }

    fn entry(&self, id: Id) -> &Entry<'a> {
        self.entries
            .get(id as usize)
            .unwrap_or_else(|| panic!("%{id} is out of bounds (ID bound is {})", self.id_bound()))
    }

    fn entry_mut(&mut self, id: Id) -> &mut Entry<'a> {
        let id_bound = self.id_bound();
        self.entries
            .get_mut(id as usize)
            .unwrap_or_else(|| panic!("%{id} is out of bounds (ID bound is {id_bound})"))
    }

    /// Define `id`, which must not have been defined before.
    pub fn push(&mut self, id: Id, value: SpvValue) {
        let entry = self.entry_mut(id);
        assert!(
            matches!(entry.value, SpvValue::Invalid),
            "%{id} defined twice (already a {:?})",
            entry.value.kind()
        );
        entry.value = value;
    }

    pub fn is_defined(&self, id: Id) -> bool {
        !matches!(self.entry(id).value, SpvValue::Invalid)
    }

    /// Kind-polymorphic lookup, only `id` being undefined is an error.
    pub fn get_untyped(&self, id: Id) -> &SpvValue {
        let value = &self.entry(id).value;
        assert!(!matches!(value, SpvValue::Invalid), "%{id} used before being defined");
        value
    }

    /// Lookup which must find a value of the `expected` kind.
    pub fn get(&self, id: Id, expected: ValueKind) -> &SpvValue {
        let value = self.get_untyped(id);
        assert_eq!(value.kind(), expected, "unexpected kind of value for %{id}");
        value
    }

    pub fn get_mut(&mut self, id: Id, expected: ValueKind) -> &mut SpvValue {
        let value = &mut self.entry_mut(id).value;
        assert_eq!(value.kind(), expected, "unexpected kind of value for %{id}");
        value
    }

    pub fn ty(&self, id: Id) -> &Rc<TypeInfo> {
        match self.get(id, ValueKind::Type) {
            SpvValue::Type(ty) => ty,
            _ => unreachable!(),
        }
    }

    pub fn constant(&self, id: Id) -> (&Rc<TypeInfo>, Const) {
        match self.get(id, ValueKind::Constant) {
            SpvValue::Constant { ty, value } => (ty, *value),
            _ => unreachable!(),
        }
    }

    pub fn deref(&self, id: Id) -> &DerefValue {
        match self.get(id, ValueKind::Deref) {
            SpvValue::Deref(deref) => deref,
            _ => unreachable!(),
        }
    }

    pub fn func(&self, id: Id) -> &FuncValue {
        match self.get(id, ValueKind::Function) {
            SpvValue::Function(func) => func,
            _ => unreachable!(),
        }
    }

    pub fn block(&self, id: Id) -> &BlockInfo {
        match self.get(id, ValueKind::Block) {
            SpvValue::Block(block) => block,
            _ => unreachable!(),
        }
    }

    pub fn block_mut(&mut self, id: Id) -> &mut BlockInfo {
        match self.get_mut(id, ValueKind::Block) {
            SpvValue::Block(block) => block,
            _ => unreachable!(),
        }
    }

    pub fn name(&self, id: Id) -> Option<&str> {
        self.entry(id).name.as_deref()
    }

    pub fn set_name(&mut self, id: Id, name: String) {
        self.entry_mut(id).name = Some(name);
    }

    pub fn decorations(&self, id: Id) -> &[Decoration<'a>] {
        &self.entry(id).decorations
    }

    pub fn add_decoration(&mut self, id: Id, decoration: Decoration<'a>) {
        self.entry_mut(id).decorations.push(decoration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_are_write_once() {
        let mut values = ValueTable::new(4);
        values.push(1, SpvValue::String("foo".into()));
        assert!(values.is_defined(1));
        assert!(!values.is_defined(2));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            values.push(1, SpvValue::DecorationGroup);
        }));
        assert!(result.is_err());
    }

    #[test]
    #[should_panic(expected = "unexpected kind of value")]
    fn typed_lookup_checks_kind() {
        let mut values = ValueTable::new(2);
        values.push(1, SpvValue::DecorationGroup);
        values.get(1, ValueKind::Type);
    }

    #[test]
    #[should_panic(expected = "used before being defined")]
    fn undefined_lookup() {
        let values = ValueTable::new(2);
        values.get_untyped(1);
    }

    #[test]
    fn untyped_lookup_accepts_any_kind() {
        let mut values = ValueTable::new(3);
        values.push(2, SpvValue::ExtInstImport(ExtInstSet::GlslStd450));
        assert_eq!(values.get_untyped(2).kind(), ValueKind::ExtInstImport);
    }
}
