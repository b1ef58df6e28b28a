//! Symbol table entries, one module at a time. A module's declarations
//! live in a [`SymbolArena`]: an append-only pool addressed by stable
//! [`SymbolRef`] indices, so `Reference` can store an index instead of a
//! shared pointer. That avoids a shared-ownership cycle through `Rc`/`RefCell`
//! when two aggregates point at each other -- `typed_arena` backs the pool
//! itself, with a stable-index layer on top so `Type::Reference` survives
//! mutually recursive struct definitions.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use smallvec::SmallVec;
use crate::diagnostics::Span;
use crate::ir::{Operand, Entry, TempAllocator};
use crate::symbol::Symbol;
use super::ty::Type;

/// A stable index into a module's [`SymbolArena`]. `Type::Reference` stores
/// one of these instead of a shared pointer, so two structs that point at
/// each other (`struct A { B* b; }; struct B { A* a; }`) typecheck without a
/// reference cycle in the Rust ownership graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SymbolRef(pub u32);

/// An index into a [`SymbolInfo::Function`]'s overload set, filled in by
/// overload resolution and read back during translation to find the
/// chosen `OverloadSetElement`'s mangled label and access.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct OverloadId(pub u32);

/// An abstract storage location, implemented once
/// per concrete [`crate::frame::Frame`]. Symbol-table entries hold
/// `Rc<dyn Access>` rather than being generic over the frame, so the same
/// `SymbolArena` serves every module regardless of which frame translates
/// the function that reads it.
pub trait Access: fmt::Debug {
  /// Load the value into a temp, returning the operand that holds it.
  fn load(&self, out: &mut Vec<Entry>, temps: &mut TempAllocator) -> Operand;
  /// Store `source` into this location.
  fn store(&self, out: &mut Vec<Entry>, source: Operand, temps: &mut TempAllocator);
  /// The global label backing this access, if it is a named global.
  fn label(&self) -> Option<Symbol> { None }
  /// The location itself as an operand, for `&e` and for computing a field's
  /// address within an aggregate that lives here -- `None` for accesses with
  /// no well-defined address (a register-resident value has nowhere to take
  /// the address of without first spilling it). Memory-resident accesses
  /// (stack slots, globals) override this; it's needed because the
  /// translator's place/address lowering has no other way to ask a location
  /// for its own address.
  fn address(&self) -> Option<Operand> { None }
}

/// One overload of a function name. `access` is
/// `None` until the translator's access-allocation pre-pass runs; it must be
/// set before any IR is emitted for a call to this overload.
pub struct OverloadSetElement {
  pub arg_types: Vec<Type>,
  pub return_type: Type,
  pub mangled: Symbol,
  pub span: Span,
  pub access: RefCell<Option<Rc<dyn Access>>>,
}

impl fmt::Debug for OverloadSetElement {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("OverloadSetElement")
      .field("arg_types", &self.arg_types)
      .field("return_type", &self.return_type)
      .field("mangled", &self.mangled)
      .finish_non_exhaustive()
  }
}

/// The typechecking status of a user aggregate: `None`
/// while the declaration is only forward-declared or `opaque`, `Some` once
/// its body is seen. Most aggregates in practice have a handful of fields,
/// so the list stays inline up to 4 before spilling to the heap.
pub type Fields = RefCell<Option<SmallVec<[(Symbol, Type); 4]>>>;

/// Struct/union fields and enum variants start out unresolved and are filled
/// in by the checker once it elaborates the declaration's body; `Typedef`
/// and `Enum::underlying` are `RefCell`-wrapped for the same reason.
#[derive(Debug)]
pub enum TypeInfo {
  Typedef(RefCell<Type>),
  Struct { fields: Fields },
  Union { fields: Fields },
  Enum { underlying: RefCell<Type>, variants: RefCell<Vec<(Symbol, i64)>> },
}

impl TypeInfo {
  #[must_use] pub fn incomplete(&self) -> bool {
    match self {
      TypeInfo::Struct { fields } | TypeInfo::Union { fields } => fields.borrow().is_none(),
      TypeInfo::Typedef(_) | TypeInfo::Enum { .. } => false,
    }
  }
}

/// A symbol-table entry. One [`SymbolArena`] slot
/// per declared name; `Function` holds the whole overload set so that
/// re-declaring a name with different argument types extends it instead of
/// shadowing it.
#[derive(Debug)]
pub enum SymbolInfo {
  /// `ty` starts as a placeholder and is filled in once the checker
  /// elaborates the declaration's `TypeExpr` -- the same forward-then-fill
  /// shape as `TypeInfo::Typedef`, needed here because a module-level
  /// variable's single declaration site is the parser's, not the checker's.
  Var { ty: RefCell<Type>, escapes: bool, access: RefCell<Option<Rc<dyn Access>>> },
  Function { overloads: RefCell<Vec<OverloadSetElement>> },
  Type(TypeInfo),
}

impl SymbolInfo {
  #[must_use] pub fn as_type(&self) -> Option<&TypeInfo> {
    match self { SymbolInfo::Type(t) => Some(t), _ => None }
  }
}

/// A pool of [`SymbolInfo`], the "arena" of 's design note. One
/// [`SymbolArena`] backs the whole compilation ([`crate::env::Environment`]
/// owns the single instance): every module's declaration table maps names
/// to indices into it, so a scoped reference `M::name` resolves to exactly
/// the same kind of [`SymbolRef`] an unscoped one would, with no separate
/// per-module index space to thread through `Type::Reference`.
///
/// Entries are allocated with `typed_arena::Arena`, which never moves or
/// frees a value once allocated (only the whole arena's drop reclaims
/// memory), and we separately record each allocation's address in
/// declaration order so [`SymbolRef`] indices can be resolved back to a
/// reference in O(1) without the arena itself tracking indices.
pub struct SymbolArena {
  arena: typed_arena::Arena<SymbolInfo>,
  index: RefCell<Vec<*const SymbolInfo>>,
}

impl Default for SymbolArena {
  fn default() -> Self { Self { arena: typed_arena::Arena::new(), index: RefCell::new(Vec::new()) } }
}

impl SymbolArena {
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Allocate a new entry, returning the stable index future `Reference`s
  /// and `overload` selections will use to find it again.
  pub fn alloc(&self, info: SymbolInfo) -> SymbolRef {
    let r: &SymbolInfo = self.arena.alloc(info);
    let ptr: *const SymbolInfo = r;
    let mut index = self.index.borrow_mut();
    let id = SymbolRef(u32::try_from(index.len()).expect("more symbols than fit in a u32"));
    index.push(ptr);
    id
  }

  /// Resolve a stable index back to the entry it names.
  #[must_use] pub fn get(&self, r: SymbolRef) -> &SymbolInfo {
    // Safety: `typed_arena::Arena` guarantees an allocated value is never
    // moved or freed before the arena itself drops, and every pointer in
    // `index` was produced by `self.arena.alloc` above, so it stays valid
    // for as long as `self` does.
    unsafe { &*self.index.borrow()[r.0 as usize] }
  }

  #[must_use] pub fn len(&self) -> usize { self.index.borrow().len() }
  #[must_use] pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ast::PrimKind;

  #[test] fn stable_indices_survive_further_allocation() {
    let arena = SymbolArena::new();
    let a = arena.alloc(SymbolInfo::Type(TypeInfo::Typedef(RefCell::new(Type::Keyword(PrimKind::Bool)))));
    let b = arena.alloc(SymbolInfo::Type(TypeInfo::Typedef(RefCell::new(Type::Keyword(PrimKind::Void)))));
    assert!(matches!(arena.get(a), SymbolInfo::Type(TypeInfo::Typedef(t)) if matches!(*t.borrow(), Type::Keyword(PrimKind::Bool))));
    assert!(matches!(arena.get(b), SymbolInfo::Type(TypeInfo::Typedef(t)) if matches!(*t.borrow(), Type::Keyword(PrimKind::Void))));
    assert_ne!(a, b);
  }

  #[test] fn incomplete_struct_has_no_fields_yet() {
    let info = TypeInfo::Struct { fields: RefCell::new(None) };
    assert!(info.incomplete());
  }
}
