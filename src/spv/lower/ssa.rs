//! SSA values of any SPIR-V type, as trees with IR values at the leaves.

use super::values::SpvValue;
use super::{Error, Translator};
use crate::builder::FuncBuilder;
use crate::spv::{self, Id};
use crate::{AluOp, Context, Type, TypeDef, Value};
use smallvec::SmallVec;
use std::rc::Rc;

/// Scalars and vectors are single IR values, while matrices (one leaf per
/// column), arrays and structs have one child per element.
pub(super) struct SsaValue {
    pub ty: Type,
    pub kind: SsaKind,

    /// For the result of a transpose, the value it was transposed from
    /// (which makes transposing back, or multiplying by it, cheaper).
    pub transposed: Option<Rc<SsaValue>>,
}

pub(super) enum SsaKind {
    Leaf(Value),
    Children(Vec<Rc<SsaValue>>),
}

impl SsaValue {
    pub fn leaf(ty: Type, def: Value) -> Rc<Self> {
        Rc::new(SsaValue { ty, kind: SsaKind::Leaf(def), transposed: None })
    }

    pub fn aggregate(ty: Type, elems: Vec<Rc<SsaValue>>) -> Rc<Self> {
        Rc::new(SsaValue { ty, kind: SsaKind::Children(elems), transposed: None })
    }

    /// Build a value of type `ty`, with each leaf produced by `leaf`.
    pub fn from_type(
        cx: &Context,
        ty: Type,
        leaf: &mut dyn FnMut(Type) -> Value,
    ) -> Rc<Self> {
        match &cx[ty] {
            TypeDef::Scalar(_) | TypeDef::Vector { .. } => Self::leaf(ty, leaf(ty)),
            TypeDef::Matrix { .. } | TypeDef::Array { .. } => {
                let elem = cx.element_type(ty);
                let elems =
                    (0..cx.aggregate_len(ty)).map(|_| Self::from_type(cx, elem, leaf)).collect();
                Self::aggregate(ty, elems)
            }
            TypeDef::Struct { fields } => {
                let elems = fields.iter().map(|&field| Self::from_type(cx, field, leaf)).collect();
                Self::aggregate(ty, elems)
            }
            def => unreachable!("{def:?} has no SSA representation"),
        }
    }

    pub fn def(&self) -> Value {
        match self.kind {
            SsaKind::Leaf(def) => def,
            SsaKind::Children(_) => unreachable!("aggregate used as a scalar/vector value"),
        }
    }

    pub fn elems(&self) -> &[Rc<SsaValue>] {
        match &self.kind {
            SsaKind::Children(elems) => elems,
            SsaKind::Leaf(_) => unreachable!("scalar/vector value used as an aggregate"),
        }
    }

    /// All the leaf values, in order (depth-first).
    pub fn leaves(&self) -> SmallVec<[Value; 4]> {
        let mut leaves = SmallVec::new();
        fn collect(v: &SsaValue, leaves: &mut SmallVec<[Value; 4]>) {
            match &v.kind {
                SsaKind::Leaf(def) => leaves.push(*def),
                SsaKind::Children(elems) => {
                    for elem in elems {
                        collect(elem, leaves);
                    }
                }
            }
        }
        collect(self, &mut leaves);
        leaves
    }

    pub fn same_shape(&self, other: &SsaValue) -> bool {
        match (&self.kind, &other.kind) {
            (SsaKind::Leaf(_), SsaKind::Leaf(_)) => true,
            (SsaKind::Children(a), SsaKind::Children(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.same_shape(b))
            }
            _ => false,
        }
    }
}

/// Vector helpers, only ever producing new IR values.
impl FuncBuilder {
    pub fn vector_insert(&mut self, src: Value, insert: Value, index: u8) -> Value {
        let comps: SmallVec<[Value; 4]> = (0..self.num_components(src))
            .map(|i| if i == index { insert } else { self.channel(src, i) })
            .collect();
        self.vec(&comps)
    }

    pub fn vector_extract_dynamic(&mut self, src: Value, index: Value) -> Value {
        let mut dest = self.channel(src, 0);
        for i in 1..self.num_components(src) {
            let i_imm = self.imm_u32(u32::from(i));
            let is_i = self.alu2(AluOp::Ieq, index, i_imm);
            let comp = self.channel(src, i);
            dest = self.alu3(AluOp::Bcsel, is_i, comp, dest);
        }
        dest
    }

    pub fn vector_insert_dynamic(&mut self, src: Value, insert: Value, index: Value) -> Value {
        let mut dest = self.vector_insert(src, insert, 0);
        for i in 1..self.num_components(src) {
            let i_imm = self.imm_u32(u32::from(i));
            let is_i = self.alu2(AluOp::Ieq, index, i_imm);
            let inserted = self.vector_insert(src, insert, i);
            dest = self.alu3(AluOp::Bcsel, is_i, inserted, dest);
        }
        dest
    }

    /// Components are indices into the concatenation of `src0` and `src1`,
    /// with `0xFFFFFFFF` standing for an undefined component.
    pub fn vector_shuffle(&mut self, src0: Value, src1: Value, components: &[u32]) -> Value {
        let src0_len = u32::from(self.num_components(src0));
        let comps: SmallVec<[Value; 4]> = components
            .iter()
            .map(|&c| {
                if c == 0xFFFF_FFFF {
                    self.undef(1)
                } else if c < src0_len {
                    self.channel(src0, c as u8)
                } else {
                    self.channel(src1, (c - src0_len) as u8)
                }
            })
            .collect();
        self.vec(&comps)
    }

    /// Concatenate the components of all of `srcs` (scalars and/or vectors).
    pub fn vector_construct(&mut self, srcs: &[Value]) -> Value {
        let mut comps = SmallVec::<[Value; 4]>::new();
        for &src in srcs {
            match self.num_components(src) {
                1 => comps.push(src),
                n => comps.extend((0..n).map(|i| self.channel(src, i))),
            }
        }
        self.vec(&comps)
    }
}

impl<'a> Translator<'a> {
    /// Get `id` as an SSA value, loading it first if it's a pointer.
    pub(super) fn ssa_value(&mut self, id: Id) -> Rc<SsaValue> {
        match self.values.get_untyped(id) {
            SpvValue::Ssa(ssa) => ssa.clone(),
            SpvValue::Constant { value, .. } => {
                let value = *value;
                self.const_ssa(value)
            }
            SpvValue::Undef(ty) => {
                let ty = ty.ty;
                let cx = self.cx.clone();
                let fb = self.fb();
                SsaValue::from_type(&cx, ty, &mut |leaf| {
                    let num_components = cx[leaf].vector_elements();
                    fb.undef(num_components)
                })
            }
            SpvValue::Deref(src) => {
                let src = src.clone();
                self.variable_load(&src)
            }
            value => unreachable!("%{id} is not an SSA value (but a {value:?})"),
        }
    }

    /// Get `id` as a single (scalar or vector) IR value.
    pub(super) fn ssa_leaf(&mut self, id: Id) -> Value {
        self.ssa_value(id).def()
    }

    pub(super) fn push_ssa(&mut self, id: Id, ssa: Rc<SsaValue>) {
        self.values.push(id, SpvValue::Ssa(ssa));
    }

    pub(super) fn push_leaf(&mut self, id: Id, ty: Type, def: Value) {
        self.push_ssa(id, SsaValue::leaf(ty, def));
    }

    /// Transpose a matrix, reusing the source of a previous transpose.
    pub(super) fn transpose(&mut self, src: &Rc<SsaValue>) -> Rc<SsaValue> {
        if let Some(original) = &src.transposed {
            return original.clone();
        }

        let cx = self.cx.clone();
        let (rows, cols) = (cx[src.ty].vector_elements(), cx[src.ty].matrix_columns());
        let dest_ty = cx.matrix_type(cols, rows);
        let column_ty = cx.element_type(dest_ty);

        let fb = self.fb();
        let elems = (0..rows)
            .map(|i| {
                let comps: SmallVec<[Value; 4]> =
                    src.elems().iter().map(|column| fb.channel(column.def(), i)).collect();
                SsaValue::leaf(column_ty, fb.vec(&comps))
            })
            .collect();
        Rc::new(SsaValue {
            ty: dest_ty,
            kind: SsaKind::Children(elems),
            transposed: Some(src.clone()),
        })
    }

    fn composite_extract(&mut self, src: &Rc<SsaValue>, indices: &[u32]) -> Rc<SsaValue> {
        let cx = self.cx.clone();
        let mut cur = src.clone();
        for (i, &index) in indices.iter().enumerate() {
            if cx[cur.ty].is_vector_or_scalar() {
                // Only the last index can select a vector component.
                assert_eq!(i + 1, indices.len(), "indexing into a vector component");
                let elem = self.fb().channel(cur.def(), index as u8);
                return SsaValue::leaf(cx.element_type(cur.ty), elem);
            }
            let next = cur.elems()[index as usize].clone();
            cur = next;
        }
        cur
    }

    fn composite_insert(
        &mut self,
        src: &Rc<SsaValue>,
        insert: &Rc<SsaValue>,
        indices: &[u32],
    ) -> Rc<SsaValue> {
        let Some((&index, rest)) = indices.split_first() else {
            return insert.clone();
        };
        if self.cx[src.ty].is_vector_or_scalar() {
            assert!(rest.is_empty(), "indexing into a vector component");
            let def = self.fb().vector_insert(src.def(), insert.def(), index as u8);
            return SsaValue::leaf(src.ty, def);
        }
        let mut elems = src.elems().to_vec();
        let index = index as usize;
        elems[index] = self.composite_insert(&elems[index].clone(), insert, rest);
        SsaValue::aggregate(src.ty, elems)
    }

    pub(super) fn handle_composite(&mut self, inst: spv::Inst<'a>) -> Result<(), Error> {
        use spirv::Op;
        let w = inst.words;
        let ty = self.values.ty(w[1]).ty;
        let id = w[2];
        let op = inst.op().expect("dispatched on a known opcode");

        let ssa = match op {
            Op::VectorExtractDynamic => {
                let (src, index) = (self.ssa_leaf(w[3]), self.ssa_leaf(w[4]));
                SsaValue::leaf(ty, self.fb().vector_extract_dynamic(src, index))
            }
            Op::VectorInsertDynamic => {
                let (src, insert, index) =
                    (self.ssa_leaf(w[3]), self.ssa_leaf(w[4]), self.ssa_leaf(w[5]));
                SsaValue::leaf(ty, self.fb().vector_insert_dynamic(src, insert, index))
            }
            Op::VectorShuffle => {
                let (src0, src1) = (self.ssa_leaf(w[3]), self.ssa_leaf(w[4]));
                SsaValue::leaf(ty, self.fb().vector_shuffle(src0, src1, inst.from(5)))
            }
            Op::CompositeConstruct => {
                if self.cx[ty].is_vector_or_scalar() {
                    let srcs: SmallVec<[Value; 4]> =
                        inst.from(3).iter().map(|&src| self.ssa_leaf(src)).collect();
                    SsaValue::leaf(ty, self.fb().vector_construct(&srcs))
                } else {
                    let elems = inst.from(3).iter().map(|&src| self.ssa_value(src)).collect();
                    SsaValue::aggregate(ty, elems)
                }
            }
            Op::CompositeExtract => {
                let src = self.ssa_value(w[3]);
                self.composite_extract(&src, inst.from(4))
            }
            Op::CompositeInsert => {
                let (insert, src) = (self.ssa_value(w[3]), self.ssa_value(w[4]));
                self.composite_insert(&src, &insert, inst.from(5))
            }
            // Values are immutable, so sharing them is as good as a copy.
            Op::CopyObject => self.ssa_value(w[3]),
            _ => unreachable!("{op:?} is not a composite instruction"),
        };
        self.push_ssa(id, ssa);
        Ok(())
    }
}
