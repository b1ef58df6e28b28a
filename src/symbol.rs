//! String interning. Identifiers, module names, and mangled labels are
//! compared and hashed constantly throughout the pipeline, so every name
//! that reaches the symbol table or the AST is interned once here rather
//! than carried around as an owned `String`.

use std::cell::RefCell;
use std::fmt;
use hashbrown::HashMap;

/// An interned string. Cheap to copy, compare, and hash (it's a `u32` index
/// into the thread's [`Interner`]).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Symbol {
  /// The reserved symbol for `_`, used as the "don't care" binder name.
  pub const UNDER: Symbol = Symbol(0);

  #[must_use] pub fn into_usize(self) -> usize { self.0 as usize }
}

impl fmt::Debug for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    with_interner(|i| write!(f, "{:?}", i.resolve(*self)))
  }
}
impl fmt::Display for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    with_interner(|i| write!(f, "{}", i.resolve(*self)))
  }
}

/// A simple string interner: a growable table of owned strings plus a
/// reverse lookup for dedup. Strings live for the lifetime of the interner.
#[derive(Default)]
pub struct Interner {
  strings: Vec<Box<str>>,
  lookup: HashMap<Box<str>, Symbol>,
}

impl Interner {
  #[must_use] pub fn new() -> Self {
    let mut this = Self::default();
    this.intern("_");
    this
  }

  pub fn intern(&mut self, s: &str) -> Symbol {
    if let Some(&sym) = self.lookup.get(s) { return sym }
    let sym = Symbol(u32::try_from(self.strings.len()).expect("too many symbols"));
    let boxed: Box<str> = s.into();
    self.strings.push(boxed.clone());
    self.lookup.insert(boxed, sym);
    sym
  }

  #[must_use] pub fn resolve(&self, sym: Symbol) -> &str { &self.strings[sym.into_usize()] }
}

thread_local! {
  static INTERNER: RefCell<Interner> = RefCell::new(Interner::new());
}

fn with_interner<R>(f: impl FnOnce(&Interner) -> R) -> R {
  INTERNER.with(|i| f(&i.borrow()))
}

/// Intern a string in the thread-local interner.
pub fn intern(s: &str) -> Symbol {
  INTERNER.with(|i| i.borrow_mut().intern(s))
}

/// Look up the text of a symbol in the thread-local interner.
#[must_use] pub fn resolve(sym: Symbol) -> String {
  with_interner(|i| i.resolve(sym).to_owned())
}

/// Build a dense lookup table from symbol to `T`, for use in keyword/prim
/// classification tables where symbols are small and densely packed right
/// after startup interning. Symbols interned later simply miss the table.
#[must_use] pub fn init_dense_symbol_map<T: Copy>(pairs: &[(Symbol, T)]) -> Box<[Option<T>]> {
  let len = pairs.iter().map(|(s, _)| s.into_usize() + 1).max().unwrap_or(0);
  let mut map = vec![None; len].into_boxed_slice();
  for &(s, t) in pairs { map[s.into_usize()] = Some(t) }
  map
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test] fn interning_dedups() {
    let a = intern("module");
    let b = intern("module");
    assert_eq!(a, b);
    let c = intern("other");
    assert_ne!(a, c);
  }

  #[test] fn resolve_round_trips() {
    let s = intern("hello_world");
    assert_eq!(resolve(s), "hello_world");
  }
}
