//! The type checker. Runs after parsing: every name the parser declared is
//! elaborated to its final [`crate::types::ty::Type`], every expression's
//! `result_type` is filled in, and every `Id`/scoped-type-id node's resolved
//! cell is set. Diagnoses mismatches through [`Diagnostics`] rather than
//! failing fast; an internal invariant violation still goes through
//! [`crate::error::ice`].

use crate::ast::*;
use crate::diagnostics::{Diagnostics, Span};
use crate::env::{Environment, Resolved};
use crate::error::ice;
use crate::symbol::Symbol;
use crate::target::Target;
use crate::types::entity::{OverloadSetElement, SymbolInfo, SymbolRef, TypeInfo};
use crate::types::ty::Type;

pub struct TypeChecker<'a> {
  env: &'a Environment,
  target: &'a Target,
  diags: &'a mut Diagnostics,
  module: Box<[Symbol]>,
  /// Set while checking a function body; `return`'s operand is checked
  /// against it.
  return_type: Option<Type>,
  loop_depth: u32,
  switch_depth: u32,
}

impl<'a> TypeChecker<'a> {
  #[must_use] pub fn new(env: &'a Environment, target: &'a Target, diags: &'a mut Diagnostics, module: Box<[Symbol]>) -> Self {
    Self { env, target, diags, module, return_type: None, loop_depth: 0, switch_depth: 0 }
  }

  /// Elaborate every item in `file`, filling in aggregate fields, typedef
  /// targets, enum variants, and every expression's `result_type`.
  ///
  /// Two passes: the parser declares a `Var` placeholder for every
  /// module-level name it sees but never a `Function` entry, since a
  /// function's signature isn't known until its parameter/return
  /// `TypeExpr`s are elaborated. A first pass here declares every
  /// function's overload signature before any body is checked, so a call
  /// to a function declared later in the same file resolves just like one
  /// declared earlier.
  pub fn check_file(&mut self, file: &File) {
    for item in &file.items {
      if let Item::Fun(f) = item {
        self.declare_fun_signature(f);
      }
    }
    for item in &file.items {
      self.check_item(item);
    }
  }

  fn declare_fun_signature(&mut self, f: &FunDecl) {
    let ret = self.elaborate_type_expr(&f.ret);
    let arg_types: Vec<Type> = f.params.iter().map(|p| self.elaborate_type_expr(&p.ty)).collect();
    let mangled = crate::symbol::intern(&crate::mangle::mangle_function(&self.module, f.name, &arg_types, self.env.arena()));
    self.env.declare_overload(f.name, OverloadSetElement {
      arg_types, return_type: ret, mangled, span: f.span,
      access: std::cell::RefCell::new(None),
    });
  }

  fn check_item(&mut self, item: &Item) {
    match item {
      Item::Import { .. } => {}
      Item::Var(v) => self.check_global_var_decl(v),
      Item::Fun(f) => self.check_fun(f),
      Item::Struct(d) => self.elaborate_aggregate(d, false),
      Item::Union(d) => self.elaborate_aggregate(d, true),
      Item::Enum(d) => self.elaborate_enum(d),
      Item::Typedef { name, ty, .. } => self.elaborate_typedef(*name, ty),
      Item::Opaque { .. } => {}
    }
  }

  // --------------------------------------------------------- type elaboration

  /// Turn a parsed [`TypeExpr`] into a canonical [`Type`], resolving any
  /// `Id`/scoped reference through [`Environment`] and recording the result
  /// in the node's `resolved` cell.
  pub fn elaborate_type_expr(&mut self, te: &TypeExpr) -> Type {
    match te {
      TypeExpr::Keyword(k) => Type::Keyword(*k),
      TypeExpr::Const(inner) => self.elaborate_type_expr(inner).with_const(),
      // `volatile` carries no separate bit in `Type::Qualified`'s public
      // constructors beyond `const`; the checker still records it so a
      // future codegen pass could honor it, but size/align/convertibility
      // never depend on it.
      TypeExpr::Volatile(inner) => self.elaborate_type_expr(inner),
      TypeExpr::Pointer(inner) => Type::Pointer(std::rc::Rc::new(self.elaborate_type_expr(inner))),
      TypeExpr::Array { elem, len } => {
        let elem_ty = self.elaborate_type_expr(elem);
        let length = self.const_eval_array_len(len);
        Type::Array { len: length, elem: std::rc::Rc::new(elem_ty) }
      }
      TypeExpr::FnPtr { ret, args } => {
        let ret_ty = self.elaborate_type_expr(ret);
        let arg_tys: Vec<Type> = args.iter().map(|a| self.elaborate_type_expr(a)).collect();
        Type::FunPtr { ret: std::rc::Rc::new(ret_ty), args: arg_tys.into() }
      }
      TypeExpr::Id { path, resolved, span } => self.elaborate_type_id(path, resolved, *span),
    }
  }

  fn elaborate_type_id(&mut self, path: &[Symbol], resolved: &std::cell::Cell<Option<SymbolRef>>, span: Span) -> Type {
    let name = *path.last().expect("parser never emits an empty path");
    let outcome = if path.len() == 1 {
      self.env.lookup(name)
    } else {
      self.env.lookup_scoped(&path[..path.len() - 1], name)
    };
    match self.env.report(outcome, name, span, self.diags) {
      Some(r) => {
        resolved.set(Some(r));
        match self.env.arena().get(r) {
          SymbolInfo::Type(_) => Type::Reference { entry: r, name },
          SymbolInfo::Var { .. } | SymbolInfo::Function { .. } => {
            self.diags.error(span, format!("'{}' is not a type", crate::symbol::resolve(name)));
            Type::void()
          }
        }
      }
      None => Type::void(),
    }
  }

  /// Array lengths are restricted to constant expressions. Non-constant
  /// or non-integer lengths are diagnosed and treated as length 0.
  fn const_eval_array_len(&mut self, len: &Expr) -> u64 {
    match &len.kind {
      ExprKind::Const(ConstKind::Int(n)) => *n,
      _ => {
        self.diags.error(len.span, "array length must be a constant integer expression");
        0
      }
    }
  }

  fn elaborate_aggregate(&mut self, decl: &AggregateDecl, is_union: bool) {
    let Some(r) = self.lookup_own_declaration(decl.name) else { return };
    let Some(field_list) = &decl.fields else { return };
    let fields: smallvec::SmallVec<[(Symbol, Type); 4]> = field_list.iter().map(|f| (f.name, self.elaborate_type_expr(&f.ty))).collect();
    let info = self.env.arena().get(r);
    let expect_union = matches!(info, SymbolInfo::Type(TypeInfo::Union { .. }));
    if expect_union != is_union {
      self.diags.error(decl.span, format!("'{}' redeclared with a different aggregate kind", crate::symbol::resolve(decl.name)));
      return;
    }
    if let SymbolInfo::Type(TypeInfo::Struct { fields: slot } | TypeInfo::Union { fields: slot }) = info {
      *slot.borrow_mut() = Some(fields);
    }
  }

  fn elaborate_enum(&mut self, decl: &EnumDecl) {
    let Some(r) = self.lookup_own_declaration(decl.name) else { return };
    let underlying = decl.underlying.as_ref().map_or(Type::int(), |u| self.elaborate_type_expr(u));
    let mut next = 0i64;
    let mut variants = Vec::new();
    if let Some(vs) = &decl.variants {
      for v in vs {
        if let Some(value_expr) = &v.value {
          next = self.const_eval_int(value_expr);
        }
        variants.push((v.name, next));
        next += 1;
      }
    }
    if let SymbolInfo::Type(TypeInfo::Enum { underlying: u_slot, variants: v_slot }) = self.env.arena().get(r) {
      *u_slot.borrow_mut() = underlying;
      *v_slot.borrow_mut() = variants;
    }
  }

  fn const_eval_int(&mut self, e: &Expr) -> i64 {
    match &e.kind {
      ExprKind::Const(ConstKind::Int(n)) => i64::try_from(*n).unwrap_or(i64::MAX),
      ExprKind::UnOp(UnOp::Neg, inner) => -self.const_eval_int(inner),
      _ => {
        self.diags.error(e.span, "enum variant value must be a constant integer expression");
        0
      }
    }
  }

  fn elaborate_typedef(&mut self, name: Symbol, ty: &TypeExpr) {
    let Some(r) = self.lookup_own_declaration(name) else { return };
    let target = self.elaborate_type_expr(ty);
    if let SymbolInfo::Type(TypeInfo::Typedef(slot)) = self.env.arena().get(r) {
      *slot.borrow_mut() = target;
    }
  }

  /// Find the [`SymbolRef`] the parser already allocated for one of this
  /// module's own top-level declarations (struct/union/enum/typedef), by
  /// looking it up unscoped in the module the checker is currently
  /// processing. `None` only if the parser failed to declare it (itself a
  /// parse error already reported), never a checker-stage bug.
  fn lookup_own_declaration(&mut self, name: Symbol) -> Option<SymbolRef> {
    match self.env.lookup(name) {
      Resolved::Found(r) => Some(r),
      _ => None,
    }
  }

  // --------------------------------------------------------- declarations

  fn check_var_decl(&mut self, v: &VarDecl) -> Type {
    let declared = self.elaborate_type_expr(&v.ty);
    if let Some(init) = &v.init {
      let init_ty = self.check_expr(init);
      if !Type::implicitly_convertible(&init_ty, &declared, self.env.arena(), self.target) {
        self.diags.error(v.span, format!(
          "cannot initialize '{}' of type {declared:?} with value of type {init_ty:?}",
          crate::symbol::resolve(v.name)));
      }
    }
    declared
  }

  /// A module-level `Item::Var` was already given a placeholder `Var` entry
  /// by the parser; this writes the real elaborated type back into
  /// that same arena slot and records it on `v.symbol` so the translator's
  /// access-allocation pass can find it again without a name lookup.
  fn check_global_var_decl(&mut self, v: &VarDecl) {
    let declared = self.check_var_decl(v);
    let Some(r) = self.lookup_own_declaration(v.name) else { return };
    v.symbol.set(Some(r));
    if let SymbolInfo::Var { ty, .. } = self.env.arena().get(r) {
      *ty.borrow_mut() = declared;
    }
  }

  /// Checks a function's body, if it has one (a prototype-only declaration
  /// contributes nothing beyond the signature `declare_fun_signature`
  /// already registered). Re-elaborates the parameter/return `TypeExpr`s
  /// rather than threading them through from the signature pass: elaborating
  /// a `TypeExpr` is a pure, idempotent lookup against `Environment`, so
  /// doing it twice costs a little work but keeps the two passes decoupled.
  fn check_fun(&mut self, f: &FunDecl) {
    let ret = self.elaborate_type_expr(&f.ret);
    let Some(body) = &f.body else { return };
    self.env.push_scope();
    for p in &f.params {
      let ty = self.elaborate_type_expr(&p.ty);
      let r = self.env.declare(p.name, SymbolInfo::Var { ty: std::cell::RefCell::new(ty), escapes: false, access: std::cell::RefCell::new(None) });
      p.symbol.set(Some(r));
    }
    let saved_ret = self.return_type.replace(ret.clone());
    for stmt in body {
      self.check_stmt(stmt);
    }
    if !ret.is_void() && !stmts_always_return(body) {
      self.diags.error(f.span, "missing return at end of non-void function");
    }
    self.return_type = saved_ret;
    self.env.pop_scope();
  }

  // --------------------------------------------------------- statements

  fn check_stmt(&mut self, stmt: &Stmt) {
    match stmt {
      Stmt::Compound(stmts) => {
        self.env.push_scope();
        for s in stmts { self.check_stmt(s); }
        self.env.pop_scope();
      }
      Stmt::If { cond, then, else_ } => {
        self.check_condition(cond);
        self.check_stmt(then);
        if let Some(e) = else_ { self.check_stmt(e); }
      }
      Stmt::While { cond, body } => {
        self.check_condition(cond);
        self.loop_depth += 1;
        self.check_stmt(body);
        self.loop_depth -= 1;
      }
      Stmt::DoWhile { body, cond } => {
        self.loop_depth += 1;
        self.check_stmt(body);
        self.loop_depth -= 1;
        self.check_condition(cond);
      }
      Stmt::For { init, cond, update, body } => {
        self.env.push_scope();
        if let Some(i) = init { self.check_stmt(i); }
        if let Some(c) = cond { self.check_condition(c); }
        if let Some(u) = update { self.check_expr(u); }
        self.loop_depth += 1;
        self.check_stmt(body);
        self.loop_depth -= 1;
        self.env.pop_scope();
      }
      Stmt::Switch { scrutinee, cases, .. } => {
        self.check_expr(scrutinee);
        self.switch_depth += 1;
        let mut seen = Vec::new();
        for (i, case) in cases.iter().enumerate() {
          if let Some(v) = &case.value {
            let value = self.const_eval_int(v);
            if seen.contains(&value) {
              self.diags.error(case.span, format!("duplicate case value {value}"));
            }
            seen.push(value);
          } else if i + 1 != cases.len() {
            self.diags.error(case.span, "'default' must be the final case");
          }
          for s in &case.body { self.check_stmt(s); }
        }
        self.switch_depth -= 1;
      }
      Stmt::Break(span) => {
        if self.loop_depth == 0 && self.switch_depth == 0 {
          self.diags.error(*span, "'break' outside a loop or switch");
        }
      }
      Stmt::Continue(span) => {
        if self.loop_depth == 0 {
          self.diags.error(*span, "'continue' outside a loop");
        }
      }
      Stmt::Return(value, span) => self.check_return(value.as_ref(), *span),
      Stmt::Asm(_) | Stmt::Null => {}
      Stmt::Expr(e) => { self.check_expr(e); }
      Stmt::VarDefn(v) => { self.env_declare_local(v); }
      Stmt::StructDecl(d) => self.elaborate_aggregate(d, false),
      Stmt::UnionDecl(d) => self.elaborate_aggregate(d, true),
      Stmt::EnumDecl(d) => self.elaborate_enum(d),
      Stmt::TypedefDecl { name, ty, .. } => self.elaborate_typedef(*name, ty),
      Stmt::OpaqueDecl { .. } => {}
    }
  }

  fn env_declare_local(&mut self, v: &VarDecl) {
    let ty = self.check_var_decl(v);
    let r = self.env.declare(v.name, SymbolInfo::Var { ty: std::cell::RefCell::new(ty), escapes: false, access: std::cell::RefCell::new(None) });
    v.symbol.set(Some(r));
  }

  fn check_condition(&mut self, cond: &Expr) {
    let ty = self.check_expr(cond);
    if !Type::implicitly_convertible(&ty, &Type::bool_(), self.env.arena(), self.target) {
      self.diags.error(cond.span, format!("condition must be convertible to bool, found {ty:?}"));
    }
  }

  fn check_return(&mut self, value: Option<&Expr>, span: Span) {
    let Some(expected) = self.return_type.clone() else { ice("return statement checked outside a function body") };
    match value {
      Some(e) => {
        let actual = self.check_expr(e);
        if !expected.is_void() && !Type::implicitly_convertible(&actual, &expected, self.env.arena(), self.target) {
          self.diags.error(span, format!("cannot return value of type {actual:?} from a function returning {expected:?}"));
        }
      }
      None => {
        if !expected.is_void() {
          self.diags.error(span, "missing return value".to_string());
        }
      }
    }
  }

  // --------------------------------------------------------- expressions

  /// Type-check `e`, set its `result_type`, and return the same type (the
  /// invariant "every non-Const expression node has a non-null resultType"
  /// holds for `Const` too here -- it's simplest to annotate uniformly).
  pub fn check_expr(&mut self, e: &Expr) -> Type {
    let ty = self.check_expr_kind(&e.kind, e.span);
    *e.result_type.borrow_mut() = Some(ty.clone());
    ty
  }

  fn check_expr_kind(&mut self, kind: &ExprKind, span: Span) -> Type {
    match kind {
      ExprKind::Const(ConstKind::Int(_)) => Type::int(),
      ExprKind::Const(ConstKind::Float(_)) => Type::Keyword(PrimKind::Double),
      ExprKind::Const(ConstKind::Bool(_)) => Type::bool_(),
      ExprKind::Const(ConstKind::Null) => Type::null_ptr(),
      ExprKind::Const(ConstKind::Char(_)) => Type::Keyword(PrimKind::Char),
      ExprKind::Const(ConstKind::WChar(_)) => Type::Keyword(PrimKind::WChar),
      ExprKind::Str(_) => Type::Pointer(std::rc::Rc::new(Type::Keyword(PrimKind::Char).with_const())),
      ExprKind::WStr(_) => Type::Pointer(std::rc::Rc::new(Type::Keyword(PrimKind::WChar).with_const())),
      ExprKind::Id { name, symbol, overload } => self.check_id(name, symbol, overload, span),
      ExprKind::Seq(a, b) => { self.check_expr(a); self.check_expr(b) }
      ExprKind::BinOp(op, a, b) => self.check_binop(*op, a, b, span),
      ExprKind::CompOp(op, a, b) => self.check_compop(*op, a, b, span),
      ExprKind::UnOp(op, a) => self.check_unop(*op, a, span),
      ExprKind::Assign(target, value) => self.check_assign(target, value, span),
      ExprKind::CompoundAssign(op, target, value) => self.check_compound_assign(*op, target, value, span),
      ExprKind::LAndAssign(target, value) | ExprKind::LOrAssign(target, value) => {
        self.check_lvalue(target, span);
        self.check_condition(target);
        self.check_condition(value);
        Type::bool_()
      }
      ExprKind::Ternary(cond, t, f) => self.check_ternary(cond, t, f, span),
      ExprKind::LAnd(a, b) | ExprKind::LOr(a, b) => {
        self.check_condition(a);
        self.check_condition(b);
        Type::bool_()
      }
      ExprKind::ArrayAccess(arr, idx) => self.check_array_access(arr, idx, span),
      ExprKind::StructAccess(base, field) => self.check_struct_access(base, *field, span, false),
      ExprKind::StructPtrAccess(base, field) => self.check_struct_access(base, *field, span, true),
      ExprKind::FnCall(callee, args) => self.check_call(callee, args, span),
      ExprKind::AggregateInit(elems) => Type::Aggregate(elems.iter().map(|e| self.check_expr(e)).collect::<Vec<_>>().into()),
      ExprKind::Cast(ty, inner) => { self.check_expr(inner); self.elaborate_type_expr(ty) }
      ExprKind::SizeofType(ty) => { self.elaborate_type_expr(ty); Type::ulong() }
      ExprKind::SizeofExp(inner) => { self.check_expr_no_side_effects(inner); Type::ulong() }
    }
  }

  /// `sizeof(expr)` type-checks its operand but must not evaluate it;
  /// since this checker has no separate "evaluate" phase the distinction is
  /// moot here -- the translator is the one required to skip codegen for
  /// this subtree.
  fn check_expr_no_side_effects(&mut self, e: &Expr) -> Type { self.check_expr(e) }

  fn check_id(&mut self, name: &[Symbol], symbol: &std::cell::Cell<Option<SymbolRef>>, overload: &std::cell::Cell<Option<crate::types::entity::OverloadId>>, span: Span) -> Type {
    let resolved = match name.len() {
      1 => self.env.lookup(name[0]),
      2 => self.env.lookup_scoped(&name[..1], name[1]),
      3 => {
        match self.env.lookup_enum_constant(&name[..1], name[1], name[2]) {
          Some((enum_ref, _value)) => {
            symbol.set(Some(enum_ref));
            return Type::Reference { entry: enum_ref, name: name[1] };
          }
          None => Resolved::Undefined,
        }
      }
      _ => Resolved::Undefined,
    };
    let Some(r) = self.env.report(resolved, *name.last().unwrap(), span, self.diags) else { return Type::void() };
    symbol.set(Some(r));
    match self.env.arena().get(r) {
      SymbolInfo::Var { ty, .. } => ty.borrow().clone(),
      SymbolInfo::Function { overloads } => {
        let set = overloads.borrow();
        if set.len() == 1 {
          overload.set(Some(crate::types::entity::OverloadId(0)));
          Type::FunPtr { ret: std::rc::Rc::new(set[0].return_type.clone()), args: set[0].arg_types.clone().into() }
        } else {
          // Overload selection happens at the call site; a bare
          // function name outside a call yields the first overload's shape
          // as a placeholder FunPtr, matching its declared arity/types.
          Type::FunPtr { ret: std::rc::Rc::new(set[0].return_type.clone()), args: set[0].arg_types.clone().into() }
        }
      }
      SymbolInfo::Type(_) => {
        self.diags.error(span, format!("'{}' names a type, not a value", crate::symbol::resolve(*name.last().unwrap())));
        Type::void()
      }
    }
  }

  fn check_binop(&mut self, op: BinOp, a: &Expr, b: &Expr, span: Span) -> Type {
    let ta = self.check_expr(a);
    let tb = self.check_expr(b);
    match Type::usual_arithmetic(&ta, &tb, self.env.arena(), self.target) {
      Some(result) => result,
      None => {
        self.diags.error(span, format!("operator {op:?} requires arithmetic operands, found {ta:?} and {tb:?}"));
        Type::int()
      }
    }
  }

  fn check_compop(&mut self, op: CompOp, a: &Expr, b: &Expr, span: Span) -> Type {
    let ta = self.check_expr(a);
    let tb = self.check_expr(b);
    if Type::usual_arithmetic(&ta, &tb, self.env.arena(), self.target).is_none()
      && !Type::implicitly_convertible(&ta, &tb, self.env.arena(), self.target)
      && !Type::implicitly_convertible(&tb, &ta, self.env.arena(), self.target) {
      self.diags.error(span, format!("cannot compare {ta:?} and {tb:?}"));
    }
    if op == CompOp::Spaceship { Type::int() } else { Type::bool_() }
  }

  fn check_unop(&mut self, op: UnOp, a: &Expr, span: Span) -> Type {
    let ta = self.check_expr(a);
    match op {
      UnOp::Deref => match ta.quals().2 {
        Type::Pointer(pointee) => pointee.as_ref().clone(),
        _ => { self.diags.error(span, format!("cannot dereference {ta:?}")); Type::void() }
      },
      UnOp::AddrOf => {
        self.check_lvalue(a, span);
        Type::Pointer(std::rc::Rc::new(ta))
      }
      UnOp::PreInc | UnOp::PreDec | UnOp::PostInc | UnOp::PostDec => {
        self.check_lvalue(a, span);
        ta
      }
      UnOp::Not => Type::bool_(),
      UnOp::Neg | UnOp::BitNot => ta,
    }
  }

  fn check_lvalue(&mut self, e: &Expr, span: Span) {
    let is_lvalue = matches!(e.kind,
      ExprKind::Id { .. } | ExprKind::UnOp(UnOp::Deref, _) | ExprKind::ArrayAccess(..) |
      ExprKind::StructAccess(..) | ExprKind::StructPtrAccess(..));
    if !is_lvalue {
      self.diags.error(span, "expression is not assignable");
    }
  }

  fn check_assign(&mut self, target: &Expr, value: &Expr, span: Span) -> Type {
    self.check_lvalue(target, span);
    let t_ty = self.check_expr(target);
    if t_ty.is_const() {
      self.diags.error(span, format!("cannot assign to const-qualified {t_ty:?}"));
    }
    let v_ty = self.check_expr(value);
    if !Type::implicitly_convertible(&v_ty, &t_ty, self.env.arena(), self.target) {
      self.diags.error(span, format!("cannot assign {v_ty:?} to target of type {t_ty:?}"));
    }
    t_ty
  }

  fn check_compound_assign(&mut self, op: BinOp, target: &Expr, value: &Expr, span: Span) -> Type {
    self.check_lvalue(target, span);
    let t_ty = self.check_expr(target);
    if t_ty.is_const() {
      self.diags.error(span, format!("cannot assign to const-qualified {t_ty:?}"));
    }
    let v_ty = self.check_expr(value);
    if Type::usual_arithmetic(&t_ty, &v_ty, self.env.arena(), self.target).is_none() {
      self.diags.error(span, format!("operator {op:?}= requires arithmetic operands, found {t_ty:?} and {v_ty:?}"));
    }
    t_ty
  }

  fn check_ternary(&mut self, cond: &Expr, t: &Expr, f: &Expr, span: Span) -> Type {
    self.check_condition(cond);
    let tt = self.check_expr(t);
    let tf = self.check_expr(f);
    if tt == tf { return tt }
    if Type::implicitly_convertible(&tf, &tt, self.env.arena(), self.target) { return tt }
    if Type::implicitly_convertible(&tt, &tf, self.env.arena(), self.target) { return tf }
    if let Some(common) = Type::usual_arithmetic(&tt, &tf, self.env.arena(), self.target) { return common }
    self.diags.error(span, format!("ternary arms have incompatible types {tt:?} and {tf:?}"));
    tt
  }

  fn check_array_access(&mut self, arr: &Expr, idx: &Expr, span: Span) -> Type {
    let arr_ty = self.check_expr(arr);
    let idx_ty = self.check_expr(idx);
    if Type::usual_arithmetic(&idx_ty, &Type::int(), self.env.arena(), self.target).is_none() {
      self.diags.error(idx.span, format!("array index must be an integer, found {idx_ty:?}"));
    }
    match arr_ty.quals().2 {
      Type::Array { elem, .. } | Type::Pointer(elem) => elem.as_ref().clone(),
      _ => { self.diags.error(span, format!("cannot index into {arr_ty:?}")); Type::void() }
    }
  }

  fn check_struct_access(&mut self, base: &Expr, field: Symbol, span: Span, via_pointer: bool) -> Type {
    let base_ty = self.check_expr(base);
    let aggregate_ty = if via_pointer {
      match base_ty.quals().2 {
        Type::Pointer(pointee) => pointee.as_ref().clone(),
        _ => { self.diags.error(span, format!("'->' requires a pointer operand, found {base_ty:?}")); return Type::void() }
      }
    } else {
      base_ty
    };
    let Type::Reference { entry, .. } = aggregate_ty.quals().2 else {
      self.diags.error(span, format!("{aggregate_ty:?} is not a struct or union"));
      return Type::void();
    };
    match self.env.arena().get(*entry) {
      SymbolInfo::Type(TypeInfo::Struct { fields } | TypeInfo::Union { fields }) => {
        match fields.borrow().as_ref().and_then(|fs| fs.iter().find(|(n, _)| *n == field).map(|(_, t)| t.clone())) {
          Some(t) => t,
          None => {
            self.diags.error(span, format!("no field named '{}'", crate::symbol::resolve(field)));
            Type::void()
          }
        }
      }
      _ => { self.diags.error(span, format!("{aggregate_ty:?} is not a struct or union")); Type::void() }
    }
  }

  /// Resolves the callee, selects an overload by a "most exact matches
  /// wins" rule, and type-checks every argument. Records the selection in
  /// the callee `Id` node's `overload` cell when the callee is a direct
  /// name; a computed callee (a function pointer value) skips overload
  /// selection entirely and is simply called.
  fn check_call(&mut self, callee: &Expr, args: &[Expr], span: Span) -> Type {
    let arg_types: Vec<Type> = args.iter().map(|a| self.check_expr(a)).collect();
    if let ExprKind::Id { name, symbol, overload } = &callee.kind {
      let resolved = match name.len() {
        1 => self.env.lookup(name[0]),
        2 => self.env.lookup_scoped(&name[..1], name[1]),
        _ => Resolved::Undefined,
      };
      let Some(r) = self.env.report(resolved, *name.last().unwrap(), span, self.diags) else {
        *callee.result_type.borrow_mut() = Some(Type::void());
        return Type::void();
      };
      symbol.set(Some(r));
      if let SymbolInfo::Function { overloads } = self.env.arena().get(r) {
        let set = overloads.borrow();
        let chosen = self.select_overload(set.as_slice(), &arg_types, span, *name.last().unwrap());
        if let Some(idx) = chosen {
          overload.set(Some(crate::types::entity::OverloadId(u32::try_from(idx).unwrap_or(0))));
          let ret = set[idx].return_type.clone();
          let funptr = Type::FunPtr { ret: std::rc::Rc::new(set[idx].return_type.clone()), args: set[idx].arg_types.clone().into() };
          *callee.result_type.borrow_mut() = Some(funptr);
          return ret;
        }
        *callee.result_type.borrow_mut() = Some(Type::void());
        return Type::void();
      }
      self.diags.error(span, format!("'{}' is not callable", crate::symbol::resolve(*name.last().unwrap())));
      *callee.result_type.borrow_mut() = Some(Type::void());
      return Type::void();
    }
    // A computed callee: must type to a FunPtr.
    let callee_ty = self.check_expr(callee);
    match callee_ty {
      Type::FunPtr { ret, args: expected } => {
        if expected.len() != arg_types.len() {
          self.diags.error(span, format!("expected {} arguments, found {}", expected.len(), arg_types.len()));
        }
        ret.as_ref().clone()
      }
      _ => { self.diags.error(span, format!("{callee_ty:?} is not callable")); Type::void() }
    }
  }

  /// Overload resolution: among overloads whose arity matches, keep those
  /// every argument implicitly converts into; among those, prefer the one with the most
  /// exact (non-converting) argument matches. A tie is "ambiguous call".
  fn select_overload(&mut self, set: &[OverloadSetElement], arg_types: &[Type], span: Span, name: Symbol) -> Option<usize> {
    let mut candidates: Vec<(usize, usize)> = Vec::new(); // (index, exact match count)
    for (i, overload) in set.iter().enumerate() {
      if overload.arg_types.len() != arg_types.len() { continue }
      let mut ok = true;
      let mut exact = 0;
      for (param, arg) in overload.arg_types.iter().zip(arg_types) {
        if param == arg {
          exact += 1;
        } else if !Type::implicitly_convertible(arg, param, self.env.arena(), self.target) {
          ok = false;
          break;
        }
      }
      if ok { candidates.push((i, exact)); }
    }
    match candidates.len() {
      0 => {
        self.diags.error(span, format!("no overload of '{}' matches the given arguments", crate::symbol::resolve(name)));
        None
      }
      1 => Some(candidates[0].0),
      _ => {
        let best = candidates.iter().map(|&(_, e)| e).max().unwrap_or(0);
        let best_candidates: Vec<usize> = candidates.iter().filter(|&&(_, e)| e == best).map(|&(i, _)| i).collect();
        if best_candidates.len() == 1 {
          Some(best_candidates[0])
        } else {
          self.diags.error(span, format!("ambiguous call to '{}'", crate::symbol::resolve(name)));
          None
        }
      }
    }
  }
}

/// Conservative "definitely returns" analysis for the missing-return
/// diagnostic. Only recognizes the shapes that unambiguously
/// terminate every path; anything else (loops, `switch` without a
/// `default`, ...) is treated as falling through.
fn stmts_always_return(stmts: &[Stmt]) -> bool {
  stmts.last().is_some_and(stmt_always_returns)
}

fn stmt_always_returns(stmt: &Stmt) -> bool {
  match stmt {
    Stmt::Return(..) => true,
    Stmt::Compound(stmts) => stmts_always_return(stmts),
    Stmt::If { then, else_: Some(else_), .. } => stmt_always_returns(then) && stmt_always_returns(else_),
    Stmt::Switch { cases, .. } => {
      cases.last().is_some_and(|c| c.value.is_none())
        && cases.iter().all(|c| c.body.last().is_some_and(stmt_always_returns))
    }
    _ => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::env::Environment;

  fn module(name: &str) -> Box<[Symbol]> { vec![crate::symbol::intern(name)].into_boxed_slice() }

  fn parse(src: &str, module_name: &str, is_code: bool) -> (File, Environment) {
    let env = Environment::new();
    env.start_module(&module(module_name));
    let mut diags = Diagnostics::new("t");
    let mut parser = crate::parser::Parser::new(src, &env, &mut diags);
    let file = parser.parse_file(is_code);
    assert!(!diags.errored(), "parse errors: {:?}", diags.diagnostics().iter().map(ToString::to_string).collect::<Vec<_>>());
    (file, env)
  }

  #[test] fn arithmetic_expression_gets_widened_int_result_type() {
    let (file, env) = parse("module m; int x = 1 + 2;", "m", true);
    let target = Target::x86_64_sysv();
    let mut diags = Diagnostics::new("t");
    let mut checker = TypeChecker::new(&env, &target, &mut diags, module("m"));
    checker.check_file(&file);
    assert!(!diags.errored());
  }

  #[test] fn undefined_identifier_is_reported() {
    let (file, env) = parse("module m; int x = y;", "m", true);
    let target = Target::x86_64_sysv();
    let mut diags = Diagnostics::new("t");
    let mut checker = TypeChecker::new(&env, &target, &mut diags, module("m"));
    checker.check_file(&file);
    assert!(diags.errored());
  }

  #[test] fn assigning_to_const_is_rejected() {
    let (file, env) = parse("module m; int f() { const int x = 1; x = 2; return x; }", "m", true);
    let target = Target::x86_64_sysv();
    let mut diags = Diagnostics::new("t");
    let mut checker = TypeChecker::new(&env, &target, &mut diags, module("m"));
    checker.check_file(&file);
    assert!(diags.errored());
  }

  #[test] fn overload_resolution_picks_exact_match_over_widening_candidate() {
    let (file, env) = parse(
      "module m; int f(int a) { return a; } long f(long a) { return a; } int g() { return f(1); }",
      "m", true);
    let target = Target::x86_64_sysv();
    let mut diags = Diagnostics::new("t");
    let mut checker = TypeChecker::new(&env, &target, &mut diags, module("m"));
    checker.check_file(&file);
    assert!(!diags.errored(), "{:?}", diags.diagnostics().iter().map(ToString::to_string).collect::<Vec<_>>());
  }

  #[test] fn struct_field_access_resolves_declared_field_type() {
    let (file, env) = parse(
      "module m; struct S { int a; long b; } int f(S* p) { return p->a; }",
      "m", true);
    let target = Target::x86_64_sysv();
    let mut diags = Diagnostics::new("t");
    let mut checker = TypeChecker::new(&env, &target, &mut diags, module("m"));
    checker.check_file(&file);
    assert!(!diags.errored(), "{:?}", diags.diagnostics().iter().map(ToString::to_string).collect::<Vec<_>>());
  }

  #[test] fn break_outside_loop_is_reported() {
    let (file, env) = parse("module m; int f() { break; return 0; }", "m", true);
    let target = Target::x86_64_sysv();
    let mut diags = Diagnostics::new("t");
    let mut checker = TypeChecker::new(&env, &target, &mut diags, module("m"));
    checker.check_file(&file);
    assert!(diags.errored());
  }
}
