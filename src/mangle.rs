//! Name mangling.
//! The scheme is stable and decodable: every label is reconstructible back
//! into `(module, name, argTypes)` without ambiguity, because every
//! variable-length piece (`A`, `B`, a module segment, a type name) is
//! length-prefixed before its text -- the `<len><text>` idiom an
//! itanium-flavored mangler uses to avoid delimiter collisions.

use crate::ast::{IntWidth, PrimKind, Signedness};
use crate::symbol::{resolve, Symbol};
use crate::types::entity::{SymbolArena, SymbolInfo, TypeInfo};
use crate::types::ty::Type;

fn push_len_prefixed(out: &mut String, text: &str) {
  out.push_str(&text.len().to_string());
  out.push_str(text);
}

/// `A::B` -> `__Z1A1B`.
#[must_use] pub fn mangle_module(path: &[Symbol]) -> String {
  let mut out = String::from("__Z");
  for seg in path {
    push_len_prefixed(&mut out, &resolve(*seg));
  }
  out
}

fn prim_tag(k: PrimKind) -> &'static str {
  match k {
    PrimKind::Void => "v",
    PrimKind::Bool => "B",
    PrimKind::Char => "c",
    PrimKind::WChar => "w",
    PrimKind::Float => "f",
    PrimKind::Double => "d",
    PrimKind::Int { width: IntWidth::Byte, signedness: Signedness::Unsigned } => "ub",
    PrimKind::Int { width: IntWidth::Byte, signedness: Signedness::Signed } => "sb",
    PrimKind::Int { width: IntWidth::Short, signedness: Signedness::Unsigned } => "us",
    PrimKind::Int { width: IntWidth::Short, signedness: Signedness::Signed } => "ss",
    PrimKind::Int { width: IntWidth::Int, signedness: Signedness::Unsigned } => "ui",
    PrimKind::Int { width: IntWidth::Int, signedness: Signedness::Signed } => "si",
    PrimKind::Int { width: IntWidth::Long, signedness: Signedness::Unsigned } => "ul",
    PrimKind::Int { width: IntWidth::Long, signedness: Signedness::Signed } => "sl",
  }
}

/// Encode one type per 's tag table: primitive single-letter tags,
/// `C<t>` for const, `A<n><t>` for arrays, `P<t>` for pointers, `F<ret>
/// <args…>` for function pointers, `T<len><typeName>` for named types.
#[must_use] pub fn mangle_type(ty: &Type, arena: &SymbolArena) -> String {
  match ty {
    Type::Keyword(k) => prim_tag(*k).to_string(),
    Type::Qualified { const_: true, base, .. } => format!("C{}", mangle_type(base, arena)),
    Type::Qualified { const_: false, base, .. } => mangle_type(base, arena),
    Type::Pointer(base) => format!("P{}", mangle_type(base, arena)),
    Type::Array { len, elem } => format!("A{len}{}", mangle_type(elem, arena)),
    Type::FunPtr { ret, args } => {
      let mut s = format!("F{}", mangle_type(ret, arena));
      for a in args.iter() { s.push_str(&mangle_type(a, arena)); }
      s
    }
    Type::Aggregate(fields) => {
      let mut s = String::from("G");
      s.push_str(&fields.len().to_string());
      for f in fields.iter() { s.push_str(&mangle_type(f, arena)); }
      s
    }
    Type::Reference { entry, name } => {
      let text = resolve(*name);
      let _ = arena.get(*entry); // reference must resolve; panics via arena.get on a stale index
      format!("T{}{text}", text.len())
    }
  }
}

/// A variable mangles to `<module><len><name>`.
#[must_use] pub fn mangle_variable(module: &[Symbol], name: Symbol) -> String {
  let mut out = mangle_module(module);
  push_len_prefixed(&mut out, &resolve(name));
  out
}

/// A function appends the concatenation of its mangled parameter types to
/// the plain variable mangling, to support overloading.
#[must_use] pub fn mangle_function(module: &[Symbol], name: Symbol, arg_types: &[Type], arena: &SymbolArena) -> String {
  let mut out = mangle_variable(module, name);
  for t in arg_types {
    out.push_str(&mangle_type(t, arena));
  }
  out
}

/// Resolve a typedef/struct/union/enum's own declared name for `T<len>name`
/// mangling, used by the translator when it needs a `Reference`'s mangled
/// form outside of a `Type` value (e.g. diagnostics); kept here rather than
/// duplicated at each call site.
#[must_use] pub fn type_entity_name(ty: &Type, arena: &SymbolArena) -> Option<Symbol> {
  match ty {
    Type::Reference { name, entry } => {
      match arena.get(*entry) {
        SymbolInfo::Type(TypeInfo::Typedef(_) | TypeInfo::Struct { .. } | TypeInfo::Union { .. } | TypeInfo::Enum { .. }) => Some(*name),
        _ => None,
      }
    }
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::entity::SymbolArena;

  #[test] fn minimal_module_mangling_matches_spec_scenario() {
    let module = [crate::symbol::intern("a")];
    assert_eq!(mangle_variable(&module, crate::symbol::intern("x")), "__Z1a1x");
  }

  #[test] fn const_string_global_mangling_matches_spec_scenario() {
    let module = [crate::symbol::intern("m")];
    assert_eq!(mangle_variable(&module, crate::symbol::intern("greeting")), "__Z1m8greeting");
  }

  #[test] fn distinct_overloads_produce_distinct_mangled_labels() {
    let arena = SymbolArena::new();
    let module = [crate::symbol::intern("a")];
    let f = crate::symbol::intern("f");
    let int_overload = mangle_function(&module, f, &[Type::int()], &arena);
    let long_overload = mangle_function(&module, f, &[Type::Keyword(PrimKind::Int {
      width: IntWidth::Long, signedness: Signedness::Signed })], &arena);
    assert_ne!(int_overload, long_overload);
  }

  #[test] fn pointer_and_array_and_const_compose() {
    let arena = SymbolArena::new();
    let ptr_to_const_int = Type::Pointer(std::rc::Rc::new(Type::int().with_const()));
    assert_eq!(mangle_type(&ptr_to_const_int, &arena), "PCsi");
    let array = Type::Array { len: 6, elem: std::rc::Rc::new(Type::Keyword(PrimKind::Int {
      width: IntWidth::Byte, signedness: Signedness::Unsigned })) };
    assert_eq!(mangle_type(&array, &arena), "A6ub");
  }

  #[test] fn module_path_with_multiple_segments() {
    let path = [crate::symbol::intern("A"), crate::symbol::intern("B")];
    assert_eq!(mangle_module(&path), "__Z1A1B");
  }
}
