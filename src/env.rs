//! Symbol table & environment. An [`Environment`] bundles the
//! current module's declaration table, its name, the set of imported
//! modules, and a stack of nested lexical scopes, and is the single
//! authority the lexer's `is_type` callback and the parser/checker's name
//! resolution both go through -- "the parser never queries the symbol
//! table directly" holds because only this module and the lexer's
//! callback trait ever see a raw [`SymbolRef`] lookup.

use hashbrown::HashMap;
use std::cell::{Cell, RefCell};
use crate::diagnostics::{Diagnostics, Note, Span};
use crate::lexer::TypeClassifier;
use crate::symbol::Symbol;
use crate::types::entity::{SymbolArena, SymbolInfo, SymbolRef, TypeInfo};

/// One module's flat name table: every top-level declaration visible to
/// `M::name` lookups, keyed by its local name.
#[derive(Default)]
pub struct ModuleTable {
  pub names: HashMap<Symbol, SymbolRef>,
}

/// The outcome of a name lookup.
pub enum Resolved {
  Found(SymbolRef),
  Undefined,
  /// Two or more imported modules define the name; carries their names for
  /// the "candidate module: …" notes.
  Ambiguous(Vec<Symbol>),
}

/// Per-module/per-scope symbol tables. One [`SymbolArena`] is
/// shared by every module (see its doc comment): `Environment` is the only
/// thing that ever allocates into it, so `Type::Reference`s minted by one
/// module's checker remain valid once another module imports it.
pub struct Environment {
  arena: SymbolArena,
  modules: RefCell<HashMap<Symbol, ModuleTable>>,
  current: Cell<Symbol>,
  imports: RefCell<Vec<Symbol>>,
  scopes: RefCell<Vec<HashMap<Symbol, SymbolRef>>>,
}

/// Join a (possibly multi-segment) module path into the single `Symbol`
/// modules are keyed by here, e.g. `["A", "B"]` -> `A::B`.
#[must_use] pub fn join_path(path: &[Symbol]) -> Symbol {
  use itertools::Itertools;
  let joined = path.iter().map(crate::symbol::resolve).join("::");
  crate::symbol::intern(&joined)
}

impl Environment {
  #[must_use] pub fn new() -> Self {
    Self {
      arena: SymbolArena::new(),
      modules: RefCell::new(HashMap::new()),
      current: Cell::new(Symbol::UNDER),
      imports: RefCell::new(Vec::new()),
      scopes: RefCell::new(Vec::new()),
    }
  }

  #[must_use] pub fn arena(&self) -> &SymbolArena { &self.arena }

  /// Begin a new module, creating its table if this is the first file to
  /// declare it. Imports and scopes from any previous module are discarded.
  pub fn start_module(&self, path: &[Symbol]) {
    let name = join_path(path);
    self.modules.borrow_mut().entry(name).or_default();
    self.current.set(name);
    self.imports.borrow_mut().clear();
    self.scopes.borrow_mut().clear();
  }

  /// Record a `using` import of `path`.
  pub fn add_import(&self, path: &[Symbol]) {
    self.imports.borrow_mut().push(join_path(path));
  }

  pub fn push_scope(&self) { self.scopes.borrow_mut().push(HashMap::new()); }
  pub fn pop_scope(&self) { self.scopes.borrow_mut().pop(); }

  /// Declare `name` in the innermost open scope, or the current module's
  /// table if no scope is open.
  pub fn declare(&self, name: Symbol, info: SymbolInfo) -> SymbolRef {
    let r = self.arena.alloc(info);
    let mut scopes = self.scopes.borrow_mut();
    if let Some(top) = scopes.last_mut() {
      top.insert(name, r);
    } else {
      self.modules.borrow_mut().entry(self.current.get()).or_default().names.insert(name, r);
    }
    r
  }

  /// Declare a function overload, extending an existing overload set at the
  /// same name rather than shadowing it.
  /// Returns the `Function` symbol's ref and the index of the newly pushed
  /// [`crate::types::entity::OverloadSetElement`] within its overload set.
  pub fn declare_overload(&self, name: Symbol, element: crate::types::entity::OverloadSetElement) -> (SymbolRef, usize) {
    let existing = self.lookup_in_current_module(name);
    if let Some(r) = existing {
      if let SymbolInfo::Function { overloads } = self.arena.get(r) {
        let mut o = overloads.borrow_mut();
        o.push(element);
        return (r, o.len() - 1);
      }
    }
    let r = self.declare(name, SymbolInfo::Function { overloads: RefCell::new(vec![element]) });
    (r, 0)
  }

  fn lookup_in_current_module(&self, name: Symbol) -> Option<SymbolRef> {
    self.modules.borrow().get(&self.current.get()).and_then(|t| t.names.get(&name).copied())
  }

  fn lookup_in_module(&self, module: Symbol, name: Symbol) -> Option<SymbolRef> {
    self.modules.borrow().get(&module).and_then(|t| t.names.get(&name).copied())
  }

  /// Unscoped lookup: inner-to-outer scope stack, then the current module,
  /// then imports with ambiguity detection.
  #[must_use] pub fn lookup(&self, name: Symbol) -> Resolved {
    for scope in self.scopes.borrow().iter().rev() {
      if let Some(&r) = scope.get(&name) { return Resolved::Found(r) }
    }
    if let Some(r) = self.lookup_in_current_module(name) { return Resolved::Found(r) }
    let mut hits = Vec::new();
    for &m in self.imports.borrow().iter() {
      if self.lookup_in_module(m, name).is_some() { hits.push(m) }
    }
    match hits.len() {
      0 => Resolved::Undefined,
      1 => Resolved::Found(self.lookup_in_module(hits[0], name).expect("just found above")),
      _ => Resolved::Ambiguous(hits),
    }
  }

  /// Scoped lookup `M::name`. `path` is everything before the final
  /// segment; for a single-scope name this is one module name.
  #[must_use] pub fn lookup_scoped(&self, path: &[Symbol], name: Symbol) -> Resolved {
    let module = join_path(path);
    match self.lookup_in_module(module, name) {
      Some(r) => Resolved::Found(r),
      None => Resolved::Undefined,
    }
  }

  /// Double-scoped lookup `M::T::name`, an enum constant: resolve `M::T` as
  /// an enum, then `name` among its variants.
  #[must_use] pub fn lookup_enum_constant(&self, module_path: &[Symbol], enum_name: Symbol, constant: Symbol) -> Option<(SymbolRef, i64)> {
    let ty_ref = match self.lookup_scoped(module_path, enum_name) {
      Resolved::Found(r) => r,
      _ => return None,
    };
    if let SymbolInfo::Type(TypeInfo::Enum { variants, .. }) = self.arena.get(ty_ref) {
      variants.borrow().iter().find(|(n, _)| *n == constant).map(|(_, v)| (ty_ref, *v))
    } else {
      None
    }
  }

  /// Report a [`Resolved`] outcome as a diagnostic when it isn't `Found`,
  /// rendering the "ambiguous" and "undefined identifier" message shapes.
  /// Returns the resolved `SymbolRef` on success.
  pub fn report(&self, resolved: Resolved, name: Symbol, span: Span, diags: &mut Diagnostics) -> Option<SymbolRef> {
    match resolved {
      Resolved::Found(r) => Some(r),
      Resolved::Undefined => {
        diags.error(span, format!("undefined identifier '{}'", crate::symbol::resolve(name)));
        None
      }
      Resolved::Ambiguous(modules) => {
        let notes = modules.iter()
          .map(|m| Note { label: "candidate module".into(), message: crate::symbol::resolve(*m) })
          .collect();
        diags.error_with_notes(span, format!("ambiguous identifier '{}'", crate::symbol::resolve(name)), notes);
        None
      }
    }
  }
}

impl Default for Environment {
  fn default() -> Self { Self::new() }
}

/// The classifier exposed to the lexer must be monotone across a
/// single file's lexing: names are only ever added to a scope/module
/// table, never removed, so once `is_type` sees a name it keeps seeing it
/// for the rest of the file.
impl TypeClassifier for Environment {
  fn is_type(&self, name: Symbol) -> bool {
    match self.lookup(name) {
      Resolved::Found(r) => matches!(self.arena.get(r), SymbolInfo::Type(_)),
      Resolved::Undefined => false,
      // Ambiguous between two imports is still "a type" for lexing purposes
      // if at least one candidate is; the checker re-reports the ambiguity
      // itself when the name is actually used.
      Resolved::Ambiguous(modules) => modules.iter().any(|&m| {
        self.lookup_in_module(m, name).is_some_and(|r| matches!(self.arena.get(r), SymbolInfo::Type(_)))
      }),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::ty::Type;

  fn var(ty: Type) -> SymbolInfo {
    SymbolInfo::Var { ty: RefCell::new(ty), escapes: false, access: RefCell::new(None) }
  }

  #[test] fn unscoped_lookup_finds_current_module_declaration() {
    let env = Environment::new();
    env.start_module(&[crate::symbol::intern("a")]);
    let x = crate::symbol::intern("x");
    env.declare(x, var(Type::int()));
    assert!(matches!(env.lookup(x), Resolved::Found(_)));
  }

  #[test] fn inner_scope_shadows_module_scope() {
    let env = Environment::new();
    env.start_module(&[crate::symbol::intern("a")]);
    let i = crate::symbol::intern("i");
    let outer = env.declare(i, var(Type::int()));
    env.push_scope();
    let inner = env.declare(i, var(Type::int()));
    match env.lookup(i) {
      Resolved::Found(r) => assert_eq!(r, inner),
      _ => panic!("expected inner i"),
    }
    env.pop_scope();
    match env.lookup(i) {
      Resolved::Found(r) => assert_eq!(r, outer),
      _ => panic!("expected outer i after pop"),
    }
  }

  #[test] fn ambiguous_import_reports_both_candidates() {
    let env = Environment::new();
    let x = crate::symbol::intern("x");
    env.start_module(&[crate::symbol::intern("m1")]);
    env.declare(x, var(Type::int()));
    env.start_module(&[crate::symbol::intern("m2")]);
    env.declare(x, var(Type::int()));
    env.start_module(&[crate::symbol::intern("user")]);
    env.add_import(&[crate::symbol::intern("m1")]);
    env.add_import(&[crate::symbol::intern("m2")]);
    assert!(matches!(env.lookup(x), Resolved::Ambiguous(_)));
    let mut diags = Diagnostics::new("t");
    let r = env.report(env.lookup(x), x, Span::new(1, 1), &mut diags);
    assert!(r.is_none());
    assert!(diags.errored());
    assert_eq!(diags.diagnostics()[0].notes.len(), 2);
  }

  #[test] fn scoped_lookup_finds_name_in_named_module() {
    let env = Environment::new();
    let m = crate::symbol::intern("m");
    env.start_module(&[m]);
    let x = crate::symbol::intern("x");
    env.declare(x, var(Type::int()));
    assert!(matches!(env.lookup_scoped(&[m], x), Resolved::Found(_)));
  }

  #[test] fn function_redeclaration_extends_overload_set() {
    let env = Environment::new();
    env.start_module(&[crate::symbol::intern("a")]);
    let f = crate::symbol::intern("f");
    let element = |ty: Type| crate::types::entity::OverloadSetElement {
      arg_types: vec![ty], return_type: Type::int(),
      mangled: crate::symbol::intern("__Z1a1fi"), span: Span::new(1, 1),
      access: RefCell::new(None),
    };
    let (r1, i1) = env.declare_overload(f, element(Type::int()));
    let (r2, i2) = env.declare_overload(f, element(Type::ulong()));
    assert_eq!(r1, r2);
    assert_eq!((i1, i2), (0, 1));
    if let SymbolInfo::Function { overloads } = env.arena().get(r1) {
      assert_eq!(overloads.borrow().len(), 2);
    } else {
      panic!("expected Function entry");
    }
  }
}
