//! The canonical type system. `Type` is the checker's target type,
//! distinct from [`crate::ast::TypeExpr`] (the as-written syntax): checked,
//! `Rc`-shared, and structurally deduplicated rather than parsed syntax.

use std::rc::Rc;
use crate::ast::{IntWidth, PrimKind, Signedness};
use crate::symbol::Symbol;
use crate::target::Target;
use super::entity::{SymbolArena, SymbolInfo, SymbolRef, TypeInfo};

#[derive(Clone, Debug)]
pub enum Type {
  Keyword(PrimKind),
  Qualified { const_: bool, volatile: bool, base: Rc<Type> },
  Pointer(Rc<Type>),
  Array { len: u64, elem: Rc<Type> },
  FunPtr { ret: Rc<Type>, args: Rc<[Type]> },
  /// The result type of an aggregate-init literal.
  Aggregate(Rc<[Type]>),
  /// A named struct/union/enum/typedef, resolved by arena index.
  Reference { entry: SymbolRef, name: Symbol },
}

/// Structural equality for everything but `Reference`, which is nominal by
/// arena-slot identity.
impl PartialEq for Type {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Type::Keyword(a), Type::Keyword(b)) => a == b,
      (Type::Qualified { const_: c1, volatile: v1, base: b1 },
       Type::Qualified { const_: c2, volatile: v2, base: b2 }) => c1 == c2 && v1 == v2 && b1 == b2,
      (Type::Pointer(a), Type::Pointer(b)) => a == b,
      (Type::Array { len: l1, elem: e1 }, Type::Array { len: l2, elem: e2 }) => l1 == l2 && e1 == e2,
      (Type::FunPtr { ret: r1, args: a1 }, Type::FunPtr { ret: r2, args: a2 }) => r1 == r2 && a1 == a2,
      (Type::Aggregate(a), Type::Aggregate(b)) => a == b,
      (Type::Reference { entry: e1, .. }, Type::Reference { entry: e2, .. }) => e1 == e2,
      _ => false,
    }
  }
}
impl Eq for Type {}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Kind { GP, SSE, MEM }

fn width_bytes(w: IntWidth, target: &Target) -> u64 {
  u64::from(match w {
    IntWidth::Byte => 1,
    IntWidth::Short => target.short_width,
    IntWidth::Int => target.int_width,
    IntWidth::Long => target.long_width,
  })
}

impl Type {
  #[must_use] pub fn void() -> Self { Type::Keyword(PrimKind::Void) }
  #[must_use] pub fn bool_() -> Self { Type::Keyword(PrimKind::Bool) }
  #[must_use] pub fn int() -> Self {
    Type::Keyword(PrimKind::Int { width: IntWidth::Int, signedness: Signedness::Signed })
  }
  #[must_use] pub fn ulong() -> Self {
    Type::Keyword(PrimKind::Int { width: IntWidth::Long, signedness: Signedness::Unsigned })
  }
  /// The type of the `null` literal: convertible to any pointer type via
  /// the `void* <-> any pointer` rule below, without a dedicated variant.
  #[must_use] pub fn null_ptr() -> Self { Type::Pointer(Rc::new(Type::void())) }

  #[must_use] pub fn with_const(self) -> Self {
    match self {
      Type::Qualified { volatile, base, .. } => Type::Qualified { const_: true, volatile, base },
      other => Type::Qualified { const_: true, volatile: false, base: Rc::new(other) },
    }
  }

  /// `(const, volatile, unqualified base)`, qualifiers stripped through any
  /// nesting (only one level is ever produced by the parser, but this is
  /// robust to chained `const const T`).
  #[must_use] pub fn quals(&self) -> (bool, bool, &Type) {
    match self {
      Type::Qualified { const_, volatile, base } => {
        let (c, v, t) = base.quals();
        (*const_ || c, *volatile || v, t)
      }
      other => (false, false, other),
    }
  }

  #[must_use] pub fn is_const(&self) -> bool { self.quals().0 }

  /// Chase qualifiers and typedef chains down to a non-typedef base type.
  /// Returns an owned `Type` (rather than a reference) because the typedef's
  /// target lives behind a `RefCell`, mutated in place once the checker
  /// elaborates the `typedef`'s body.
  fn resolve_typedef(&self, arena: &SymbolArena) -> Type {
    let (_, _, base) = self.quals();
    if let Type::Reference { entry, .. } = base {
      if let SymbolInfo::Type(TypeInfo::Typedef(inner)) = arena.get(*entry) {
        return inner.borrow().resolve_typedef(arena);
      }
    }
    base.clone()
  }

  /// `size(t)`: traverses qualifiers and references; arrays and
  /// aggregates are defined recursively.
  #[must_use] pub fn size(&self, arena: &SymbolArena, target: &Target) -> u64 {
    match self.quals().2 {
      Type::Keyword(k) => prim_size(*k, target),
      Type::Pointer(_) | Type::FunPtr { .. } => u64::from(target.pointer_width),
      Type::Array { len, elem } => len * elem.size(arena, target),
      Type::Aggregate(fields) => aggregate_layout(fields, arena, target).0,
      Type::Reference { entry, .. } => match arena.get(*entry) {
        SymbolInfo::Type(TypeInfo::Typedef(t)) => t.borrow().size(arena, target),
        SymbolInfo::Type(TypeInfo::Struct { fields }) | SymbolInfo::Type(TypeInfo::Union { fields }) => {
          let is_union = matches!(arena.get(*entry), SymbolInfo::Type(TypeInfo::Union { .. }));
          let tys: Vec<Type> = fields.borrow().as_deref().unwrap_or_default().iter().map(|(_, t)| t.clone()).collect();
          if is_union { union_layout(&tys, arena, target).0 } else { aggregate_layout(&tys, arena, target).0 }
        }
        SymbolInfo::Type(TypeInfo::Enum { underlying, .. }) => underlying.borrow().size(arena, target),
        SymbolInfo::Var { .. } | SymbolInfo::Function { .. } =>
          crate::error::ice("size(): Reference to a non-type symbol"),
      },
      Type::Qualified { .. } => unreachable!("quals() already stripped qualifiers"),
    }
  }

  /// `align(t)`.
  #[must_use] pub fn align(&self, arena: &SymbolArena, target: &Target) -> u64 {
    match self.quals().2 {
      Type::Keyword(k) => prim_size(*k, target),
      Type::Pointer(_) | Type::FunPtr { .. } => u64::from(target.pointer_width),
      Type::Array { elem, .. } => elem.align(arena, target),
      Type::Aggregate(fields) => aggregate_layout(fields, arena, target).1,
      Type::Reference { entry, .. } => match arena.get(*entry) {
        SymbolInfo::Type(TypeInfo::Typedef(t)) => t.borrow().align(arena, target),
        SymbolInfo::Type(TypeInfo::Struct { fields }) | SymbolInfo::Type(TypeInfo::Union { fields }) => {
          let tys: Vec<Type> = fields.borrow().as_deref().unwrap_or_default().iter().map(|(_, t)| t.clone()).collect();
          aggregate_layout(&tys, arena, target).1
        }
        SymbolInfo::Type(TypeInfo::Enum { underlying, .. }) => underlying.borrow().align(arena, target),
        SymbolInfo::Var { .. } | SymbolInfo::Function { .. } =>
          crate::error::ice("align(): Reference to a non-type symbol"),
      },
      Type::Qualified { .. } => unreachable!("quals() already stripped qualifiers"),
    }
  }

  /// `kindof(t)`: the ABI class used by the frame to decide a GP vs.
  /// SSE register vs. memory temp.
  #[must_use] pub fn kindof(&self, arena: &SymbolArena) -> Kind {
    match self.quals().2 {
      Type::Keyword(PrimKind::Float | PrimKind::Double) => Kind::SSE,
      Type::Keyword(_) | Type::Pointer(_) | Type::FunPtr { .. } => Kind::GP,
      Type::Array { .. } | Type::Aggregate(_) => Kind::MEM,
      Type::Reference { entry, .. } => match arena.get(*entry) {
        SymbolInfo::Type(TypeInfo::Typedef(t)) => t.borrow().kindof(arena),
        SymbolInfo::Type(TypeInfo::Struct { .. } | TypeInfo::Union { .. }) => Kind::MEM,
        SymbolInfo::Type(TypeInfo::Enum { underlying, .. }) => underlying.borrow().kindof(arena),
        SymbolInfo::Var { .. } | SymbolInfo::Function { .. } =>
          crate::error::ice("kindof(): Reference to a non-type symbol"),
      },
      Type::Qualified { .. } => unreachable!("quals() already stripped qualifiers"),
    }
  }

  /// If this type (after qualifiers, typedefs and enum-underlying
  /// resolution) denotes an integer, its `(size_bytes, is_unsigned)`. Public
  /// so the translator can pick a conversion op's signedness the same way
  /// `implicitly_convertible` does, without re-deriving it.
  #[must_use] pub fn int_info(&self, arena: &SymbolArena, target: &Target) -> Option<(u64, bool)> {
    match self.resolve_typedef(arena) {
      Type::Keyword(PrimKind::Int { width, signedness }) =>
        Some((width_bytes(width, target), signedness == Signedness::Unsigned)),
      Type::Keyword(PrimKind::Char) => Some((u64::from(target.char_width), true)),
      Type::Keyword(PrimKind::WChar) => Some((u64::from(target.wchar_width), true)),
      Type::Reference { entry, .. } => match arena.get(entry) {
        SymbolInfo::Type(TypeInfo::Enum { underlying, .. }) => underlying.borrow().int_info(arena, target),
        _ => None,
      },
      _ => None,
    }
  }

  fn is_enum(&self, arena: &SymbolArena) -> bool {
    matches!(self.resolve_typedef(arena), Type::Reference { entry, .. }
      if matches!(arena.get(entry), SymbolInfo::Type(TypeInfo::Enum { .. })))
  }

  #[must_use] pub fn is_float(&self) -> bool { matches!(self.quals().2, Type::Keyword(PrimKind::Float)) }
  #[must_use] pub fn is_double(&self) -> bool { matches!(self.quals().2, Type::Keyword(PrimKind::Double)) }
  #[must_use] pub fn is_void(&self, arena: &SymbolArena) -> bool { matches!(self.resolve_typedef(arena), Type::Keyword(PrimKind::Void)) }

  /// Implicit convertibility between two types.
  #[must_use] pub fn implicitly_convertible(from: &Type, to: &Type, arena: &SymbolArena, target: &Target) -> bool {
    if from == to { return true }

    let (from_c, _, from_base) = from.quals();
    let (to_c, _, to_base) = to.quals();
    // Identity up to adding `const` (never removing it).
    if from_base == to_base && (!from_c || to_c) { return true }

    // enum <-> underlying integer (or another enum) at equal size.
    if let (Some((fs, _)), Some((ts, _))) = (from_base.int_info(arena, target), to_base.int_info(arena, target)) {
      if fs == ts && (from_base.is_enum(arena) || to_base.is_enum(arena)) { return true }
    }

    // Integer widening.
    if let (Some((fs, fu)), Some((ts, tu))) = (from_base.int_info(arena, target), to_base.int_info(arena, target)) {
      let widens = fs <= ts && match (fu, tu) {
        (true, true) | (false, false) => true,
        (true, false) => fs < ts,
        (false, true) => false,
      };
      if widens { return true }
    }

    // Integer -> floating.
    if from_base.int_info(arena, target).is_some() && (to_base.is_float() || to_base.is_double()) { return true }
    // float -> double.
    if from_base.is_float() && to_base.is_double() { return true }

    // Array-to-pointer decay, const propagating onto the pointee.
    if let Type::Array { elem, .. } = from_base {
      if let Type::Pointer(pointee) = to_base {
        let (pc, _, pbase) = pointee.quals();
        if elem.as_ref() == pbase && (!elem.is_const() || pc) { return true }
      }
    }

    // Any pointer <-> void* (covers `null`, whose type is `void*`).
    if let (Type::Pointer(fp), Type::Pointer(tp)) = (from_base, to_base) {
      if fp.is_void(arena) || tp.is_void(arena) { return true }
    }

    false
  }

  /// The "usual arithmetic conversions" for a binary operator's operands:
  /// any floating operand promotes both sides to the wider float type;
  /// otherwise both sides widen to the larger integer rank, preferring
  /// unsigned at equal rank. `None` if either side isn't arithmetic.
  #[must_use] pub fn usual_arithmetic(a: &Type, b: &Type, arena: &SymbolArena, target: &Target) -> Option<Type> {
    let (ab, bb) = (a.quals().2, b.quals().2);
    if ab.is_double() || bb.is_double() { return Some(Type::Keyword(PrimKind::Double)) }
    if ab.is_float() || bb.is_float() { return Some(Type::Keyword(PrimKind::Float)) }
    let (a_size, a_unsigned) = ab.int_info(arena, target)?;
    let (b_size, b_unsigned) = bb.int_info(arena, target)?;
    let size = a_size.max(b_size);
    let unsigned = match a_size.cmp(&b_size) {
      std::cmp::Ordering::Equal => a_unsigned || b_unsigned,
      std::cmp::Ordering::Greater => a_unsigned,
      std::cmp::Ordering::Less => b_unsigned,
    };
    let width = match size {
      1 => IntWidth::Byte,
      2 => IntWidth::Short,
      4 => IntWidth::Int,
      _ => IntWidth::Long,
    };
    Some(Type::Keyword(PrimKind::Int { width, signedness: if unsigned { Signedness::Unsigned } else { Signedness::Signed } }))
  }
}

#[must_use] fn prim_size(k: PrimKind, target: &Target) -> u64 {
  match k {
    PrimKind::Void => 0,
    PrimKind::Bool => 1,
    PrimKind::Char => u64::from(target.char_width),
    PrimKind::WChar => u64::from(target.wchar_width),
    PrimKind::Float => 4,
    PrimKind::Double => 8,
    PrimKind::Int { width, .. } => width_bytes(width, target),
  }
}

/// Sum-with-padding layout for a C-style struct: each field is aligned to
/// its own alignment, and the whole aggregate is padded up to the max field
/// alignment.
#[must_use] fn aggregate_layout(fields: &[Type], arena: &SymbolArena, target: &Target) -> (u64, u64) {
  let mut offset = 0u64;
  let mut max_align = 1u64;
  for f in fields {
    let a = f.align(arena, target).max(1);
    offset = offset.div_ceil(a) * a;
    offset += f.size(arena, target);
    max_align = max_align.max(a);
  }
  (offset.div_ceil(max_align) * max_align, max_align)
}

/// Byte offset of `field` within a struct's (not union's) field list, for
/// the translator's lvalue address computation: the same sum-with-padding walk
/// as [`aggregate_layout`], stopped early and reporting which field it
/// landed on instead of the whole aggregate's size.
#[must_use] pub fn struct_field_offset(fields: &[(Symbol, Type)], field: Symbol, arena: &SymbolArena, target: &Target) -> Option<(u64, Type)> {
  let mut offset = 0u64;
  for (name, ty) in fields {
    let a = ty.align(arena, target).max(1);
    offset = offset.div_ceil(a) * a;
    if *name == field { return Some((offset, ty.clone())) }
    offset += ty.size(arena, target);
  }
  None
}

/// Union layout: every field starts at offset 0; size is the max field size
/// padded to the max field alignment.
#[must_use] fn union_layout(fields: &[Type], arena: &SymbolArena, target: &Target) -> (u64, u64) {
  let mut size = 0u64;
  let mut max_align = 1u64;
  for f in fields {
    size = size.max(f.size(arena, target));
    max_align = max_align.max(f.align(arena, target).max(1));
  }
  (size.div_ceil(max_align) * max_align, max_align)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::entity::SymbolInfo;

  fn target() -> Target { Target::x86_64_sysv() }

  #[test] fn array_size_and_align() {
    let arena = SymbolArena::new();
    let t = target();
    let arr = Type::Array { len: 10, elem: Rc::new(Type::int()) };
    assert_eq!(arr.size(&arena, &t), 40);
    assert_eq!(arr.align(&arena, &t), 4);
  }

  #[test] fn const_int_not_equal_int() {
    assert_ne!(Type::int().with_const(), Type::int());
  }

  #[test] fn implicit_convertible_is_reflexive() {
    let arena = SymbolArena::new();
    let t = target();
    for ty in [Type::int(), Type::bool_(), Type::ulong(), Type::void()] {
      assert!(Type::implicitly_convertible(&ty, &ty, &arena, &t));
    }
  }

  #[test] fn adding_const_is_allowed_removing_is_not() {
    let arena = SymbolArena::new();
    let t = target();
    assert!(Type::implicitly_convertible(&Type::int(), &Type::int().with_const(), &arena, &t));
    assert!(!Type::implicitly_convertible(&Type::int().with_const(), &Type::int(), &arena, &t));
  }

  #[test] fn signed_widening_and_unsigned_to_signed_must_be_strictly_wider() {
    let arena = SymbolArena::new();
    let t = target();
    let byte = Type::Keyword(PrimKind::Int { width: IntWidth::Byte, signedness: Signedness::Signed });
    assert!(Type::implicitly_convertible(&byte, &Type::int(), &arena, &t));
    let ubyte = Type::Keyword(PrimKind::Int { width: IntWidth::Byte, signedness: Signedness::Unsigned });
    assert!(Type::implicitly_convertible(&ubyte, &Type::int(), &arena, &t));
    assert!(!Type::implicitly_convertible(&Type::Keyword(PrimKind::Int { width: IntWidth::Int, signedness: Signedness::Unsigned }),
      &Type::int(), &arena, &t));
  }

  #[test] fn null_converts_to_any_pointer() {
    let arena = SymbolArena::new();
    let t = target();
    let int_ptr = Type::Pointer(Rc::new(Type::int()));
    assert!(Type::implicitly_convertible(&Type::null_ptr(), &int_ptr, &arena, &t));
  }

  #[test] fn reference_equality_is_nominal() {
    let arena = SymbolArena::new();
    let a = arena.alloc(SymbolInfo::Type(TypeInfo::Typedef(std::cell::RefCell::new(Type::int()))));
    let b = arena.alloc(SymbolInfo::Type(TypeInfo::Typedef(std::cell::RefCell::new(Type::int()))));
    let ta = Type::Reference { entry: a, name: crate::symbol::intern("A") };
    let tb = Type::Reference { entry: b, name: crate::symbol::intern("B") };
    assert_ne!(ta, tb, "distinct entries are distinct types even with identical underlying typedefs");
    assert_eq!(ta, Type::Reference { entry: a, name: crate::symbol::intern("A") });
  }

  #[test] fn usual_arithmetic_widens_to_larger_rank_and_prefers_unsigned_at_equal_rank() {
    let arena = SymbolArena::new();
    let t = target();
    let ubyte = Type::Keyword(PrimKind::Int { width: IntWidth::Byte, signedness: Signedness::Unsigned });
    assert_eq!(Type::usual_arithmetic(&ubyte, &Type::int(), &arena, &t), Some(Type::int()));
    let uint = Type::Keyword(PrimKind::Int { width: IntWidth::Int, signedness: Signedness::Unsigned });
    assert_eq!(Type::usual_arithmetic(&Type::int(), &uint, &arena, &t), Some(uint));
    assert_eq!(Type::usual_arithmetic(&Type::int(), &Type::Keyword(PrimKind::Double), &arena, &t), Some(Type::Keyword(PrimKind::Double)));
  }

  #[test] fn struct_size_sums_fields_with_padding() {
    let arena = SymbolArena::new();
    let t = target();
    let byte = Type::Keyword(PrimKind::Int { width: IntWidth::Byte, signedness: Signedness::Signed });
    let entry = arena.alloc(SymbolInfo::Type(TypeInfo::Struct {
      fields: std::cell::RefCell::new(Some(smallvec::smallvec![
        (crate::symbol::intern("a"), byte.clone()),
        (crate::symbol::intern("b"), Type::int()),
      ])),
    }));
    let s = Type::Reference { entry, name: crate::symbol::intern("S") };
    // byte at 0, pad to 4, int at 4..8 => size 8, align 4
    assert_eq!(s.size(&arena, &t), 8);
    assert_eq!(s.align(&arena, &t), 4);
  }
}
