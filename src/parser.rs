//! Recursive-descent parser. Top-level structure is hand-written
//! descent; expressions use precedence climbing (Pratt-style). The parser
//! never queries [`crate::env::Environment`] for name *resolution* -- only
//! the lexer's `is_type` callback does that, keyed off the same
//! `Environment` -- but it does *declare* names into it as soon as a
//! declaration is parsed, which is what makes a subsequently lexed
//! occurrence of that name come back as `TypeId` instead of `Id`.

use crate::ast::*;
use crate::diagnostics::{Diagnostics, Span};
use crate::env::Environment;
use crate::lexer::{Keyword, Lexer, Number, Punct, Token, TokenKind};
use crate::symbol::Symbol;

pub struct Parser<'a> {
  lexer: Lexer<'a>,
  env: &'a Environment,
  diags: &'a mut Diagnostics,
  cur: Token,
  next_id: u32,
}

/// Tokens that legally start a new top-level declaration; used by the
/// panic-to-top-level error recovery.
fn is_decl_start_keyword(k: Keyword) -> bool {
  matches!(k,
    Keyword::Using | Keyword::Struct | Keyword::Union | Keyword::Enum |
    Keyword::Typedef | Keyword::Opaque) || k.is_primitive_type()
}

fn describe(kind: &TokenKind) -> String {
  match kind {
    TokenKind::Keyword(k) => format!("'{}'", k.text()),
    TokenKind::Punct(_) => "punctuation".into(),
    TokenKind::Id(s) | TokenKind::TypeId(s) => format!("identifier '{}'", crate::symbol::resolve(*s)),
    TokenKind::ScopedId(path) => {
      let text = path.iter().map(crate::symbol::resolve).collect::<Vec<_>>().join("::");
      format!("identifier '{text}'")
    }
    TokenKind::Number(_) => "a number".into(),
    TokenKind::Str(_) => "a string literal".into(),
    TokenKind::WStr(_) => "a wide string literal".into(),
    TokenKind::Char(_) => "a char literal".into(),
    TokenKind::WChar(_) => "a wide char literal".into(),
    TokenKind::Invalid(c) => format!("invalid character '{c}'"),
    TokenKind::Eof => "end of file".into(),
  }
}

impl<'a> Parser<'a> {
  #[must_use] pub fn new(src: &'a str, env: &'a Environment, diags: &'a mut Diagnostics) -> Self {
    let mut lexer = Lexer::new(src);
    let cur = lexer.lex(diags, env);
    Self { lexer, env, diags, cur, next_id: 0 }
  }

  fn fresh_id(&mut self) -> NodeId {
    let id = NodeId(self.next_id);
    self.next_id += 1;
    id
  }

  fn span(&self) -> Span { self.cur.span }
  fn peek(&self) -> &TokenKind { &self.cur.kind }

  fn bump(&mut self) -> Token {
    let next = self.lexer.lex(self.diags, self.env);
    std::mem::replace(&mut self.cur, next)
  }

  fn at_punct(&self, p: Punct) -> bool { self.peek() == &TokenKind::Punct(p) }
  fn at_kw(&self, k: Keyword) -> bool { self.peek() == &TokenKind::Keyword(k) }

  fn eat_punct(&mut self, p: Punct) -> bool {
    if self.at_punct(p) { self.bump(); true } else { false }
  }
  fn eat_kw(&mut self, k: Keyword) -> bool {
    if self.at_kw(k) { self.bump(); true } else { false }
  }

  fn error_expected(&mut self, what: &str) {
    let found = describe(self.peek());
    let span = self.span();
    self.diags.error(span, format!("expected {what}, but found {found}"));
  }

  fn expect_punct(&mut self, p: Punct, what: &str) {
    if !self.eat_punct(p) { self.error_expected(what) }
  }

  /// An identifier, type identifier, or scoped identifier read as a plain
  /// name path; callers that need a single
  /// unscoped name use [`Parser::expect_name`] instead.
  fn expect_path(&mut self, what: &str) -> Box<[Symbol]> {
    match self.peek().clone() {
      TokenKind::Id(s) | TokenKind::TypeId(s) => { self.bump(); vec![s].into_boxed_slice() }
      TokenKind::ScopedId(path) => { self.bump(); path }
      _ => { self.error_expected(what); vec![crate::symbol::intern("_")].into_boxed_slice() }
    }
  }

  fn expect_name(&mut self, what: &str) -> Symbol {
    match self.peek().clone() {
      TokenKind::Id(s) | TokenKind::TypeId(s) => { self.bump(); s }
      _ => { self.error_expected(what); crate::symbol::intern("_") }
    }
  }

  /// Consume tokens until a `;` (consumed) or a start-of-declaration
  /// keyword or EOF (left unconsumed) -- a "panic to a top-level
  /// boundary". Never crosses brace balance blindly: nested `{ }` are
  /// skipped as a unit so a stray `;` inside them does not end recovery
  /// early, and a stray `}` never desynchronizes the caller.
  fn recover_to_top_level(&mut self) {
    loop {
      match self.peek() {
        TokenKind::Eof => return,
        TokenKind::Punct(Punct::Semi) => { self.bump(); return }
        TokenKind::Keyword(k) if is_decl_start_keyword(*k) => return,
        TokenKind::Punct(Punct::LBrace) => { self.skip_balanced_braces(); }
        _ => { self.bump(); }
      }
    }
  }

  fn skip_balanced_braces(&mut self) {
    let mut depth = 0u32;
    loop {
      match self.peek() {
        TokenKind::Punct(Punct::LBrace) => { depth += 1; self.bump(); }
        TokenKind::Punct(Punct::RBrace) => {
          self.bump();
          depth -= 1;
          if depth == 0 { return }
        }
        TokenKind::Eof => return,
        _ => { self.bump(); }
      }
    }
  }

  // ---------------------------------------------------------------- file

  #[must_use] pub fn parse_file(&mut self, is_code: bool) -> File {
    self.expect_punct_kw(Keyword::Module, "'module'");
    let module = self.expect_path("a module name");
    self.expect_punct(Punct::Semi, "';'");
    self.env.start_module(&module);

    let mut items = Vec::new();
    while self.eat_kw(Keyword::Using) {
      let path = self.expect_path("an imported module name");
      self.expect_punct(Punct::Semi, "';'");
      self.env.add_import(&path);
      items.push(Item::Import { path, span: self.span() });
    }

    while !matches!(self.peek(), TokenKind::Eof) {
      if let Some(item) = self.parse_item(is_code) {
        items.push(item);
      } else {
        self.recover_to_top_level();
      }
    }
    File { module, is_code, items }
  }

  fn expect_punct_kw(&mut self, k: Keyword, what: &str) {
    if !self.eat_kw(k) { self.error_expected(what) }
  }

  fn parse_item(&mut self, is_code: bool) -> Option<Item> {
    match self.peek().clone() {
      TokenKind::Keyword(Keyword::Struct) => Some(Item::Struct(self.parse_aggregate_decl())),
      TokenKind::Keyword(Keyword::Union) => Some(Item::Union(self.parse_aggregate_decl())),
      TokenKind::Keyword(Keyword::Enum) => Some(Item::Enum(self.parse_enum_decl())),
      TokenKind::Keyword(Keyword::Typedef) => Some(self.parse_typedef_item()),
      TokenKind::Keyword(Keyword::Opaque) => Some(self.parse_opaque_item()),
      TokenKind::Keyword(k) if k.is_primitive_type() => Some(self.parse_var_or_fun_item(is_code)),
      TokenKind::Id(_) | TokenKind::TypeId(_) | TokenKind::ScopedId(_) => Some(self.parse_var_or_fun_item(is_code)),
      _ => { self.error_expected("a declaration"); None }
    }
  }

  // ------------------------------------------------------------ aggregates

  fn parse_aggregate_decl(&mut self) -> AggregateDecl {
    self.bump(); // struct/union
    let span = self.span();
    let name = self.expect_name("an aggregate name");
    self.env.declare(name, crate::types::entity::SymbolInfo::Type(
      crate::types::entity::TypeInfo::Struct { fields: std::cell::RefCell::new(None) }));
    if self.eat_punct(Punct::Semi) {
      return AggregateDecl { name, fields: None, span };
    }
    let mut fields = Vec::new();
    self.expect_punct(Punct::LBrace, "'{'");
    while !self.at_punct(Punct::RBrace) && !matches!(self.peek(), TokenKind::Eof) {
      let fspan = self.span();
      let ty = self.parse_type();
      let fname = self.expect_name("a field name");
      self.expect_punct(Punct::Semi, "';'");
      fields.push(Field { name: fname, ty, span: fspan });
    }
    self.expect_punct(Punct::RBrace, "'}'");
    AggregateDecl { name, fields: Some(fields), span }
  }

  fn parse_enum_decl(&mut self) -> EnumDecl {
    self.bump(); // enum
    let span = self.span();
    let name = self.expect_name("an enum name");
    self.env.declare(name, crate::types::entity::SymbolInfo::Type(
      crate::types::entity::TypeInfo::Enum {
        underlying: std::cell::RefCell::new(crate::types::ty::Type::int()),
        variants: std::cell::RefCell::new(Vec::new()),
      }));
    let underlying = if self.eat_punct(Punct::Colon) { Some(self.parse_type()) } else { None };
    if self.eat_punct(Punct::Semi) {
      return EnumDecl { name, underlying, variants: None, span };
    }
    let mut variants = Vec::new();
    self.expect_punct(Punct::LBrace, "'{'");
    while !self.at_punct(Punct::RBrace) && !matches!(self.peek(), TokenKind::Eof) {
      let vspan = self.span();
      let vname = self.expect_name("a variant name");
      let value = if self.eat_punct(Punct::Eq) { Some(self.parse_assign_expr()) } else { None };
      variants.push(EnumVariant { name: vname, value, span: vspan });
      if !self.eat_punct(Punct::Comma) { break }
    }
    self.expect_punct(Punct::RBrace, "'}'");
    EnumDecl { name, underlying, variants: Some(variants), span }
  }

  fn parse_typedef_item(&mut self) -> Item {
    self.bump(); // typedef
    let span = self.span();
    let name = self.expect_name("a typedef name");
    self.expect_punct(Punct::Eq, "'='");
    let ty = self.parse_type();
    self.expect_punct(Punct::Semi, "';'");
    self.env.declare(name, crate::types::entity::SymbolInfo::Type(
      crate::types::entity::TypeInfo::Typedef(std::cell::RefCell::new(crate::types::ty::Type::void()))));
    Item::Typedef { name, ty, span }
  }

  fn parse_opaque_item(&mut self) -> Item {
    self.bump(); // opaque
    let span = self.span();
    let name = self.expect_name("an opaque type name");
    self.expect_punct(Punct::Semi, "';'");
    self.env.declare(name, crate::types::entity::SymbolInfo::Type(
      crate::types::entity::TypeInfo::Struct { fields: std::cell::RefCell::new(None) }));
    Item::Opaque { name, span }
  }

  // ----------------------------------------------------------- var/fun

  /// Disambiguates a variable declaration from a function declaration or
  /// definition by the token following the name: `;`/`,`/`=` means
  /// variable, `(` means function.
  fn parse_var_or_fun_item(&mut self, is_code: bool) -> Item {
    let span = self.span();
    let ty = self.parse_type();
    let name = self.expect_name("a name");
    if self.at_punct(Punct::LParen) {
      Item::Fun(self.parse_fun_rest(name, ty, span, is_code))
    } else {
      Item::Var(self.parse_var_rest(name, ty, span))
    }
  }

  fn parse_var_rest(&mut self, name: Symbol, ty: TypeExpr, span: Span) -> VarDecl {
    let init = if self.eat_punct(Punct::Eq) { Some(self.parse_assign_expr()) } else { None };
    self.expect_punct(Punct::Semi, "';'");
    let r = self.env.declare(name, crate::types::entity::SymbolInfo::Var {
      ty: std::cell::RefCell::new(crate::types::ty::Type::void()), escapes: false, access: std::cell::RefCell::new(None),
    });
    VarDecl { name, ty, init, span, symbol: std::cell::Cell::new(Some(r)) }
  }

  fn parse_fun_rest(&mut self, name: Symbol, ret: TypeExpr, span: Span, is_code: bool) -> FunDecl {
    self.expect_punct(Punct::LParen, "'('");
    let mut params = Vec::new();
    if !self.at_punct(Punct::RParen) {
      loop {
        let pspan = self.span();
        let pty = self.parse_type();
        let pname = self.expect_name("a parameter name");
        params.push(Param { name: pname, ty: pty, span: pspan, symbol: std::cell::Cell::new(None) });
        if !self.eat_punct(Punct::Comma) { break }
      }
    }
    self.expect_punct(Punct::RParen, "')'");
    let body = if is_code && self.at_punct(Punct::LBrace) {
      self.env.push_scope();
      for p in &params {
        self.env.declare(p.name, crate::types::entity::SymbolInfo::Var {
          ty: std::cell::RefCell::new(crate::types::ty::Type::void()), escapes: false, access: std::cell::RefCell::new(None),
        });
      }
      let stmts = self.parse_compound_stmts();
      self.env.pop_scope();
      Some(stmts)
    } else {
      self.expect_punct(Punct::Semi, "';'");
      None
    };
    FunDecl { name, params, ret, body, span }
  }

  // -------------------------------------------------------------- types

  fn is_type_start(&self) -> bool {
    matches!(self.peek(), TokenKind::TypeId(_) | TokenKind::ScopedId(_))
      || matches!(self.peek(), TokenKind::Keyword(k) if k.is_primitive_type())
  }

  fn prim_kind_of(k: Keyword) -> PrimKind {
    match k {
      Keyword::Void => PrimKind::Void,
      Keyword::Bool => PrimKind::Bool,
      Keyword::Byte => PrimKind::Int { width: IntWidth::Byte, signedness: Signedness::Signed },
      Keyword::Ubyte => PrimKind::Int { width: IntWidth::Byte, signedness: Signedness::Unsigned },
      Keyword::Short => PrimKind::Int { width: IntWidth::Short, signedness: Signedness::Signed },
      Keyword::Ushort => PrimKind::Int { width: IntWidth::Short, signedness: Signedness::Unsigned },
      Keyword::Int => PrimKind::Int { width: IntWidth::Int, signedness: Signedness::Signed },
      Keyword::Uint => PrimKind::Int { width: IntWidth::Int, signedness: Signedness::Unsigned },
      Keyword::Long => PrimKind::Int { width: IntWidth::Long, signedness: Signedness::Signed },
      Keyword::Ulong => PrimKind::Int { width: IntWidth::Long, signedness: Signedness::Unsigned },
      Keyword::Char => PrimKind::Char,
      Keyword::Wchar => PrimKind::WChar,
      Keyword::Float => PrimKind::Float,
      Keyword::Double => PrimKind::Double,
      _ => unreachable!("prim_kind_of called on a non-primitive-type keyword"),
    }
  }

  /// A type is a primitive keyword, a (possibly scoped) type-id, or a
  /// left-recursive postfix over `const`, `[n]`, `*`, `(argTypes)`.
  /// Leading `const`/`volatile` is also accepted, matching the more common
  /// C-family spelling alongside the postfix form the grammar specifies.
  fn parse_type(&mut self) -> TypeExpr {
    let mut leading_const = false;
    let mut leading_volatile = false;
    loop {
      if self.eat_kw(Keyword::Const) { leading_const = true; continue }
      if self.eat_kw(Keyword::Volatile) { leading_volatile = true; continue }
      break;
    }
    let span = self.span();
    let mut ty = match self.peek().clone() {
      TokenKind::Keyword(k) if k.is_primitive_type() => { self.bump(); TypeExpr::Keyword(Self::prim_kind_of(k)) }
      TokenKind::TypeId(s) => { self.bump(); TypeExpr::Id { path: vec![s].into_boxed_slice(), resolved: std::cell::Cell::new(None), span } }
      TokenKind::ScopedId(path) => { self.bump(); TypeExpr::Id { path, resolved: std::cell::Cell::new(None), span } }
      _ => { self.error_expected("a type"); TypeExpr::Keyword(PrimKind::Void) }
    };
    if leading_const { ty = TypeExpr::Const(Box::new(ty)); }
    if leading_volatile { ty = TypeExpr::Volatile(Box::new(ty)); }

    loop {
      if self.eat_kw(Keyword::Const) { ty = TypeExpr::Const(Box::new(ty)); continue }
      if self.eat_kw(Keyword::Volatile) { ty = TypeExpr::Volatile(Box::new(ty)); continue }
      if self.eat_punct(Punct::LBracket) {
        let len = self.parse_assign_expr();
        self.expect_punct(Punct::RBracket, "']'");
        ty = TypeExpr::Array { elem: Box::new(ty), len: Box::new(len) };
        continue;
      }
      if self.eat_punct(Punct::Star) { ty = TypeExpr::Pointer(Box::new(ty)); continue }
      if self.at_punct(Punct::LParen) {
        self.bump();
        let mut args = Vec::new();
        if !self.at_punct(Punct::RParen) {
          loop {
            args.push(self.parse_type());
            if !self.eat_punct(Punct::Comma) { break }
          }
        }
        self.expect_punct(Punct::RParen, "')'");
        ty = TypeExpr::FnPtr { ret: Box::new(ty), args };
        continue;
      }
      break;
    }
    ty
  }

  // --------------------------------------------------------- statements

  fn parse_compound_stmts(&mut self) -> Vec<Stmt> {
    self.expect_punct(Punct::LBrace, "'{'");
    let mut stmts = Vec::new();
    while !self.at_punct(Punct::RBrace) && !matches!(self.peek(), TokenKind::Eof) {
      stmts.push(self.parse_stmt());
    }
    self.expect_punct(Punct::RBrace, "'}'");
    stmts
  }

  fn parse_stmt(&mut self) -> Stmt {
    match self.peek().clone() {
      TokenKind::Punct(Punct::LBrace) => {
        self.env.push_scope();
        let body = self.parse_compound_stmts();
        self.env.pop_scope();
        Stmt::Compound(body)
      }
      TokenKind::Keyword(Keyword::If) => self.parse_if(),
      TokenKind::Keyword(Keyword::While) => self.parse_while(),
      TokenKind::Keyword(Keyword::Do) => self.parse_do_while(),
      TokenKind::Keyword(Keyword::For) => self.parse_for(),
      TokenKind::Keyword(Keyword::Switch) => self.parse_switch(),
      TokenKind::Keyword(Keyword::Break) => { let s = self.span(); self.bump(); self.expect_punct(Punct::Semi, "';'"); Stmt::Break(s) }
      TokenKind::Keyword(Keyword::Continue) => { let s = self.span(); self.bump(); self.expect_punct(Punct::Semi, "';'"); Stmt::Continue(s) }
      TokenKind::Keyword(Keyword::Return) => self.parse_return(),
      TokenKind::Keyword(Keyword::Asm) => self.parse_asm(),
      TokenKind::Punct(Punct::Semi) => { self.bump(); Stmt::Null }
      TokenKind::Keyword(Keyword::Struct) => Stmt::StructDecl(self.parse_aggregate_decl()),
      TokenKind::Keyword(Keyword::Union) => Stmt::UnionDecl(self.parse_aggregate_decl()),
      TokenKind::Keyword(Keyword::Enum) => Stmt::EnumDecl(self.parse_enum_decl()),
      TokenKind::Keyword(Keyword::Typedef) => match self.parse_typedef_item() {
        Item::Typedef { name, ty, span } => Stmt::TypedefDecl { name, ty, span },
        _ => unreachable!(),
      },
      TokenKind::Keyword(Keyword::Opaque) => match self.parse_opaque_item() {
        Item::Opaque { name, span } => Stmt::OpaqueDecl { name, span },
        _ => unreachable!(),
      },
      _ if self.is_type_start() => {
        let span = self.span();
        let ty = self.parse_type();
        let name = self.expect_name("a variable name");
        Stmt::VarDefn(self.parse_var_rest(name, ty, span))
      }
      _ => {
        let e = self.parse_expr();
        self.expect_punct(Punct::Semi, "';'");
        Stmt::Expr(e)
      }
    }
  }

  fn parse_if(&mut self) -> Stmt {
    self.bump();
    self.expect_punct(Punct::LParen, "'('");
    let cond = self.parse_expr();
    self.expect_punct(Punct::RParen, "')'");
    let then = Box::new(self.parse_stmt());
    let else_ = if self.eat_kw(Keyword::Else) { Some(Box::new(self.parse_stmt())) } else { None };
    Stmt::If { cond, then, else_ }
  }

  fn parse_while(&mut self) -> Stmt {
    self.bump();
    self.expect_punct(Punct::LParen, "'('");
    let cond = self.parse_expr();
    self.expect_punct(Punct::RParen, "')'");
    let body = Box::new(self.parse_stmt());
    Stmt::While { cond, body }
  }

  fn parse_do_while(&mut self) -> Stmt {
    self.bump();
    let body = Box::new(self.parse_stmt());
    self.expect_punct_kw(Keyword::While, "'while'");
    self.expect_punct(Punct::LParen, "'('");
    let cond = self.parse_expr();
    self.expect_punct(Punct::RParen, "')'");
    self.expect_punct(Punct::Semi, "';'");
    Stmt::DoWhile { body, cond }
  }

  fn parse_for(&mut self) -> Stmt {
    self.bump();
    self.expect_punct(Punct::LParen, "'('");
    self.env.push_scope();
    let init = if self.at_punct(Punct::Semi) {
      self.bump();
      None
    } else {
      Some(Box::new(self.parse_stmt()))
    };
    let cond = if self.at_punct(Punct::Semi) { None } else { Some(self.parse_expr()) };
    self.expect_punct(Punct::Semi, "';'");
    let update = if self.at_punct(Punct::RParen) { None } else { Some(self.parse_expr()) };
    self.expect_punct(Punct::RParen, "')'");
    let body = Box::new(self.parse_stmt());
    self.env.pop_scope();
    Stmt::For { init, cond, update, body }
  }

  fn parse_switch(&mut self) -> Stmt {
    let span = self.span();
    self.bump();
    self.expect_punct(Punct::LParen, "'('");
    let scrutinee = self.parse_expr();
    self.expect_punct(Punct::RParen, "')'");
    self.expect_punct(Punct::LBrace, "'{'");
    let mut cases = Vec::new();
    while !self.at_punct(Punct::RBrace) && !matches!(self.peek(), TokenKind::Eof) {
      let cspan = self.span();
      let value = if self.eat_kw(Keyword::Case) {
        let v = self.parse_expr();
        self.expect_punct(Punct::Colon, "':'");
        Some(v)
      } else {
        self.expect_punct_kw(Keyword::Default, "'case' or 'default'");
        self.expect_punct(Punct::Colon, "':'");
        None
      };
      let mut body = Vec::new();
      while !matches!(self.peek(), TokenKind::Keyword(Keyword::Case | Keyword::Default))
        && !self.at_punct(Punct::RBrace) && !matches!(self.peek(), TokenKind::Eof) {
        body.push(self.parse_stmt());
      }
      cases.push(SwitchCase { value, span: cspan, body });
    }
    self.expect_punct(Punct::RBrace, "'}'");
    Stmt::Switch { scrutinee, cases, span }
  }

  fn parse_return(&mut self) -> Stmt {
    let span = self.span();
    self.bump();
    let value = if self.at_punct(Punct::Semi) { None } else { Some(self.parse_expr()) };
    self.expect_punct(Punct::Semi, "';'");
    Stmt::Return(value, span)
  }

  fn parse_asm(&mut self) -> Stmt {
    self.bump();
    self.expect_punct(Punct::LParen, "'('");
    let text = match self.peek().clone() {
      TokenKind::Str(bytes) => { self.bump(); String::from_utf8_lossy(&bytes).into_owned() }
      _ => { self.error_expected("a string literal"); String::new() }
    };
    self.expect_punct(Punct::RParen, "')'");
    self.expect_punct(Punct::Semi, "';'");
    Stmt::Asm(text)
  }

  // -------------------------------------------------------- expressions

  /// Full expression including top-level comma.
  fn parse_expr(&mut self) -> Expr {
    let mut e = self.parse_assign_expr();
    while self.eat_punct(Punct::Comma) {
      let id = self.fresh_id();
      let span = e.span;
      let rhs = self.parse_assign_expr();
      e = Expr { id, span, kind: ExprKind::Seq(Box::new(e), Box::new(rhs)), result_type: std::cell::RefCell::new(None) };
    }
    e
  }

  fn parse_assign_expr(&mut self) -> Expr {
    let lhs = self.parse_ternary();
    let op = match self.peek() {
      TokenKind::Punct(Punct::Eq) => None,
      TokenKind::Punct(Punct::PlusEq) => Some(Some(BinOp::Add)),
      TokenKind::Punct(Punct::MinusEq) => Some(Some(BinOp::Sub)),
      TokenKind::Punct(Punct::StarEq) => Some(Some(BinOp::Mul)),
      TokenKind::Punct(Punct::SlashEq) => Some(Some(BinOp::Div)),
      TokenKind::Punct(Punct::PercentEq) => Some(Some(BinOp::Mod)),
      TokenKind::Punct(Punct::AmpEq) => Some(Some(BinOp::BitAnd)),
      TokenKind::Punct(Punct::PipeEq) => Some(Some(BinOp::BitOr)),
      TokenKind::Punct(Punct::CaretEq) => Some(Some(BinOp::BitXor)),
      TokenKind::Punct(Punct::LtLtEq) => Some(Some(BinOp::Shl)),
      TokenKind::Punct(Punct::GtGtEq) => Some(Some(BinOp::Shr)),
      TokenKind::Punct(Punct::GtGtGtEq) => Some(Some(BinOp::AShr)),
      _ => return self.assign_or_logical(lhs),
    };
    self.bump();
    let id = self.fresh_id();
    let span = lhs.span;
    let rhs = self.parse_assign_expr();
    let kind = match op {
      None => ExprKind::Assign(Box::new(lhs), Box::new(rhs)),
      Some(Some(b)) => ExprKind::CompoundAssign(b, Box::new(lhs), Box::new(rhs)),
      Some(None) => unreachable!(),
    };
    Expr { id, span, kind, result_type: std::cell::RefCell::new(None) }
  }

  /// `&&=`/`||=` are lexed as `AmpAmpEq`/`PipePipeEq`; handled alongside
  /// the plain assignment forms above is awkward since they bind at the
  /// same precedence as `&&`/`||` rather than the bitwise ops, so they are
  /// checked for here instead, right after the ternary parse.
  fn assign_or_logical(&mut self, lhs: Expr) -> Expr {
    match self.peek() {
      TokenKind::Punct(Punct::AmpAmpEq) => {
        self.bump();
        let id = self.fresh_id();
        let span = lhs.span;
        let rhs = self.parse_assign_expr();
        Expr { id, span, kind: ExprKind::LAndAssign(Box::new(lhs), Box::new(rhs)), result_type: std::cell::RefCell::new(None) }
      }
      TokenKind::Punct(Punct::PipePipeEq) => {
        self.bump();
        let id = self.fresh_id();
        let span = lhs.span;
        let rhs = self.parse_assign_expr();
        Expr { id, span, kind: ExprKind::LOrAssign(Box::new(lhs), Box::new(rhs)), result_type: std::cell::RefCell::new(None) }
      }
      _ => lhs,
    }
  }

  fn parse_ternary(&mut self) -> Expr {
    let cond = self.parse_logor();
    if self.eat_punct(Punct::Question) {
      let id = self.fresh_id();
      let span = cond.span;
      let then = self.parse_assign_expr();
      self.expect_punct(Punct::Colon, "':'");
      let else_ = self.parse_assign_expr();
      Expr { id, span, kind: ExprKind::Ternary(Box::new(cond), Box::new(then), Box::new(else_)), result_type: std::cell::RefCell::new(None) }
    } else {
      cond
    }
  }

  fn parse_logor(&mut self) -> Expr {
    let mut e = self.parse_logand();
    while self.eat_punct(Punct::PipePipe) {
      let id = self.fresh_id();
      let span = e.span;
      let rhs = self.parse_logand();
      e = Expr { id, span, kind: ExprKind::LOr(Box::new(e), Box::new(rhs)), result_type: std::cell::RefCell::new(None) };
    }
    e
  }

  fn parse_logand(&mut self) -> Expr {
    let mut e = self.parse_bitor();
    while self.eat_punct(Punct::AmpAmp) {
      let id = self.fresh_id();
      let span = e.span;
      let rhs = self.parse_bitor();
      e = Expr { id, span, kind: ExprKind::LAnd(Box::new(e), Box::new(rhs)), result_type: std::cell::RefCell::new(None) };
    }
    e
  }

  fn parse_binop_level(&mut self, ops: &[(Punct, BinOp)], next: fn(&mut Self) -> Expr) -> Expr {
    let mut e = next(self);
    'outer: loop {
      for &(p, op) in ops {
        if self.at_punct(p) {
          self.bump();
          let id = self.fresh_id();
          let span = e.span;
          let rhs = next(self);
          e = Expr { id, span, kind: ExprKind::BinOp(op, Box::new(e), Box::new(rhs)), result_type: std::cell::RefCell::new(None) };
          continue 'outer;
        }
      }
      break;
    }
    e
  }

  fn parse_bitor(&mut self) -> Expr { self.parse_binop_level(&[(Punct::Pipe, BinOp::BitOr)], Self::parse_bitxor) }
  fn parse_bitxor(&mut self) -> Expr { self.parse_binop_level(&[(Punct::Caret, BinOp::BitXor)], Self::parse_bitand) }
  fn parse_bitand(&mut self) -> Expr { self.parse_binop_level(&[(Punct::Amp, BinOp::BitAnd)], Self::parse_equality) }

  fn parse_equality(&mut self) -> Expr {
    let mut e = self.parse_relational();
    loop {
      let op = if self.at_punct(Punct::EqEq) { CompOp::Eq }
        else if self.at_punct(Punct::BangEq) { CompOp::Ne }
        else { break };
      self.bump();
      let id = self.fresh_id();
      let span = e.span;
      let rhs = self.parse_relational();
      e = Expr { id, span, kind: ExprKind::CompOp(op, Box::new(e), Box::new(rhs)), result_type: std::cell::RefCell::new(None) };
    }
    e
  }

  fn parse_relational(&mut self) -> Expr {
    let mut e = self.parse_spaceship();
    loop {
      let op = if self.at_punct(Punct::Lt) { CompOp::Lt }
        else if self.at_punct(Punct::Gt) { CompOp::Gt }
        else if self.at_punct(Punct::LtEq) { CompOp::Le }
        else if self.at_punct(Punct::GtEq) { CompOp::Ge }
        else { break };
      self.bump();
      let id = self.fresh_id();
      let span = e.span;
      let rhs = self.parse_spaceship();
      e = Expr { id, span, kind: ExprKind::CompOp(op, Box::new(e), Box::new(rhs)), result_type: std::cell::RefCell::new(None) };
    }
    e
  }

  fn parse_spaceship(&mut self) -> Expr {
    let mut e = self.parse_shift();
    while self.eat_punct(Punct::Spaceship) {
      let id = self.fresh_id();
      let span = e.span;
      let rhs = self.parse_shift();
      e = Expr { id, span, kind: ExprKind::CompOp(CompOp::Spaceship, Box::new(e), Box::new(rhs)), result_type: std::cell::RefCell::new(None) };
    }
    e
  }

  fn parse_shift(&mut self) -> Expr {
    self.parse_binop_level(&[(Punct::LtLt, BinOp::Shl), (Punct::GtGt, BinOp::Shr), (Punct::GtGtGt, BinOp::AShr)], Self::parse_additive)
  }
  fn parse_additive(&mut self) -> Expr {
    self.parse_binop_level(&[(Punct::Plus, BinOp::Add), (Punct::Minus, BinOp::Sub)], Self::parse_multiplicative)
  }
  fn parse_multiplicative(&mut self) -> Expr {
    self.parse_binop_level(&[(Punct::Star, BinOp::Mul), (Punct::Slash, BinOp::Div), (Punct::Percent, BinOp::Mod)], Self::parse_prefix)
  }

  fn parse_prefix(&mut self) -> Expr {
    let span = self.span();
    let un = match self.peek() {
      TokenKind::Punct(Punct::Star) => Some(UnOp::Deref),
      TokenKind::Punct(Punct::Amp) => Some(UnOp::AddrOf),
      TokenKind::Punct(Punct::PlusPlus) => Some(UnOp::PreInc),
      TokenKind::Punct(Punct::MinusMinus) => Some(UnOp::PreDec),
      TokenKind::Punct(Punct::Minus) => Some(UnOp::Neg),
      TokenKind::Punct(Punct::Bang) => Some(UnOp::Not),
      TokenKind::Punct(Punct::Tilde) => Some(UnOp::BitNot),
      TokenKind::Punct(Punct::Plus) => None, // unary plus: parse operand, drop the op
      _ => return self.parse_cast_or_sizeof(),
    };
    self.bump();
    let operand = self.parse_prefix();
    match un {
      Some(op) => {
        let id = self.fresh_id();
        Expr { id, span, kind: ExprKind::UnOp(op, Box::new(operand)), result_type: std::cell::RefCell::new(None) }
      }
      None => operand,
    }
  }

  fn parse_cast_or_sizeof(&mut self) -> Expr {
    let span = self.span();
    if self.eat_kw(Keyword::Cast) {
      self.expect_punct(Punct::LBracket, "'['");
      let ty = self.parse_type();
      self.expect_punct(Punct::RBracket, "']'");
      self.expect_punct(Punct::LParen, "'('");
      let operand = self.parse_assign_expr();
      self.expect_punct(Punct::RParen, "')'");
      let id = self.fresh_id();
      return Expr { id, span, kind: ExprKind::Cast(ty, Box::new(operand)), result_type: std::cell::RefCell::new(None) };
    }
    if self.eat_kw(Keyword::Sizeof) {
      self.expect_punct(Punct::LParen, "'('");
      if self.is_type_start() {
        let ty = self.parse_type();
        self.expect_punct(Punct::RParen, "')'");
        let id = self.fresh_id();
        return Expr { id, span, kind: ExprKind::SizeofType(ty), result_type: std::cell::RefCell::new(None) };
      }
      let operand = self.parse_expr();
      self.expect_punct(Punct::RParen, "')'");
      let id = self.fresh_id();
      return Expr { id, span, kind: ExprKind::SizeofExp(Box::new(operand)), result_type: std::cell::RefCell::new(None) };
    }
    self.parse_postfix()
  }

  fn parse_postfix(&mut self) -> Expr {
    let mut e = self.parse_primary();
    loop {
      let span = e.span;
      if self.eat_punct(Punct::Dot) {
        let name = self.expect_name("a field name");
        let id = self.fresh_id();
        e = Expr { id, span, kind: ExprKind::StructAccess(Box::new(e), name), result_type: std::cell::RefCell::new(None) };
      } else if self.eat_punct(Punct::Arrow) {
        let name = self.expect_name("a field name");
        let id = self.fresh_id();
        e = Expr { id, span, kind: ExprKind::StructPtrAccess(Box::new(e), name), result_type: std::cell::RefCell::new(None) };
      } else if self.eat_punct(Punct::LParen) {
        let mut args = Vec::new();
        if !self.at_punct(Punct::RParen) {
          loop {
            args.push(self.parse_assign_expr());
            if !self.eat_punct(Punct::Comma) { break }
          }
        }
        self.expect_punct(Punct::RParen, "')'");
        let id = self.fresh_id();
        e = Expr { id, span, kind: ExprKind::FnCall(Box::new(e), args), result_type: std::cell::RefCell::new(None) };
      } else if self.eat_punct(Punct::LBracket) {
        let index = self.parse_expr();
        self.expect_punct(Punct::RBracket, "']'");
        let id = self.fresh_id();
        e = Expr { id, span, kind: ExprKind::ArrayAccess(Box::new(e), Box::new(index)), result_type: std::cell::RefCell::new(None) };
      } else if self.eat_punct(Punct::PlusPlus) {
        let id = self.fresh_id();
        e = Expr { id, span, kind: ExprKind::UnOp(UnOp::PostInc, Box::new(e)), result_type: std::cell::RefCell::new(None) };
      } else if self.eat_punct(Punct::MinusMinus) {
        let id = self.fresh_id();
        e = Expr { id, span, kind: ExprKind::UnOp(UnOp::PostDec, Box::new(e)), result_type: std::cell::RefCell::new(None) };
      } else {
        break;
      }
    }
    e
  }

  fn parse_primary(&mut self) -> Expr {
    let span = self.span();
    match self.peek().clone() {
      TokenKind::Number(Number::Int(v)) => { self.bump(); let id = self.fresh_id(); Expr { id, span, kind: ExprKind::Const(ConstKind::Int(v)), result_type: std::cell::RefCell::new(None) } }
      TokenKind::Number(Number::Float(v)) => { self.bump(); let id = self.fresh_id(); Expr { id, span, kind: ExprKind::Const(ConstKind::Float(v)), result_type: std::cell::RefCell::new(None) } }
      TokenKind::Str(bytes) => { self.bump(); let id = self.fresh_id(); Expr { id, span, kind: ExprKind::Str(bytes), result_type: std::cell::RefCell::new(None) } }
      TokenKind::WStr(cps) => { self.bump(); let id = self.fresh_id(); Expr { id, span, kind: ExprKind::WStr(cps), result_type: std::cell::RefCell::new(None) } }
      TokenKind::Char(c) => { self.bump(); let id = self.fresh_id(); Expr { id, span, kind: ExprKind::Const(ConstKind::Char(c)), result_type: std::cell::RefCell::new(None) } }
      TokenKind::WChar(c) => { self.bump(); let id = self.fresh_id(); Expr { id, span, kind: ExprKind::Const(ConstKind::WChar(c)), result_type: std::cell::RefCell::new(None) } }
      TokenKind::Keyword(Keyword::True) => { self.bump(); let id = self.fresh_id(); Expr { id, span, kind: ExprKind::Const(ConstKind::Bool(true)), result_type: std::cell::RefCell::new(None) } }
      TokenKind::Keyword(Keyword::False) => { self.bump(); let id = self.fresh_id(); Expr { id, span, kind: ExprKind::Const(ConstKind::Bool(false)), result_type: std::cell::RefCell::new(None) } }
      TokenKind::Keyword(Keyword::Null) => { self.bump(); let id = self.fresh_id(); Expr { id, span, kind: ExprKind::Const(ConstKind::Null), result_type: std::cell::RefCell::new(None) } }
      TokenKind::Id(s) | TokenKind::TypeId(s) => {
        self.bump();
        let id = self.fresh_id();
        Expr { id, span, kind: ExprKind::Id { name: vec![s].into_boxed_slice(), symbol: std::cell::Cell::new(None), overload: std::cell::Cell::new(None) }, result_type: std::cell::RefCell::new(None) }
      }
      TokenKind::ScopedId(path) => {
        self.bump();
        let id = self.fresh_id();
        Expr { id, span, kind: ExprKind::Id { name: path, symbol: std::cell::Cell::new(None), overload: std::cell::Cell::new(None) }, result_type: std::cell::RefCell::new(None) }
      }
      TokenKind::Punct(Punct::LParen) => {
        self.bump();
        let e = self.parse_expr();
        self.expect_punct(Punct::RParen, "')'");
        e
      }
      TokenKind::Punct(Punct::Lt) => {
        self.bump();
        let mut elems = Vec::new();
        if !self.at_punct(Punct::Gt) {
          loop {
            elems.push(self.parse_assign_expr());
            if !self.eat_punct(Punct::Comma) { break }
          }
        }
        self.expect_punct(Punct::Gt, "'>'");
        let id = self.fresh_id();
        Expr { id, span, kind: ExprKind::AggregateInit(elems), result_type: std::cell::RefCell::new(None) }
      }
      _ => {
        self.error_expected("an expression");
        let id = self.fresh_id();
        self.bump();
        Expr { id, span, kind: ExprKind::Const(ConstKind::Int(0)), result_type: std::cell::RefCell::new(None) }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(src: &str, is_code: bool) -> (File, bool) {
    let env = Environment::new();
    let mut diags = Diagnostics::new("t");
    let mut parser = Parser::new(src, &env, &mut diags);
    let file = parser.parse_file(is_code);
    (file, diags.errored())
  }

  #[test] fn minimal_declaration_module() {
    let (file, errored) = parse("module a; int x;", false);
    assert!(!errored);
    assert_eq!(file.module.len(), 1);
    assert_eq!(file.items.len(), 1);
    assert!(matches!(file.items[0], Item::Var(_)));
  }

  #[test] fn function_definition_with_body() {
    let (file, errored) = parse("module a; int f(int x) { return x + 1; }", true);
    assert!(!errored);
    match &file.items[0] {
      Item::Fun(f) => {
        assert_eq!(f.params.len(), 1);
        assert!(f.body.is_some());
        assert_eq!(f.body.as_ref().unwrap().len(), 1);
      }
      _ => panic!("expected a function item"),
    }
  }

  #[test] fn function_declaration_without_body_in_declaration_module() {
    let (file, errored) = parse("module a; int f(int x);", false);
    assert!(!errored);
    match &file.items[0] {
      Item::Fun(f) => assert!(f.body.is_none()),
      _ => panic!("expected a function item"),
    }
  }

  #[test] fn struct_with_pointer_field_and_later_use_as_type() {
    let (file, errored) = parse("module a; struct S { int x; } S* p;", true);
    assert!(!errored);
    assert!(matches!(file.items[0], Item::Struct(_)));
    assert!(matches!(file.items[1], Item::Var(_)));
  }

  #[test] fn ternary_and_precedence() {
    let (file, errored) = parse("module a; int f() { return 1 + 2 * 3 > 4 ? 5 : 6; }", true);
    assert!(!errored);
    let Item::Fun(f) = &file.items[0] else { panic!() };
    let Stmt::Return(Some(e), _) = &f.body.as_ref().unwrap()[0] else { panic!() };
    assert!(matches!(e.kind, ExprKind::Ternary(..)));
  }

  #[test] fn aggregate_init_and_cast_and_sizeof() {
    let (_, errored) = parse("module a; int f() { int x = cast[int](sizeof(int)); return x; }", true);
    assert!(!errored);
  }

  #[test] fn for_loop_scoping_parses_without_conflict() {
    let (file, errored) = parse("module a; int f() { for (int i = 0; i < 10; ++i) { int i = 42; } return 0; }", true);
    assert!(!errored);
    let Item::Fun(f) = &file.items[0] else { panic!() };
    assert!(matches!(f.body.as_ref().unwrap()[0], Stmt::For { .. }));
  }

  #[test] fn switch_with_default() {
    let (_, errored) = parse(
      "module a; int f(int x) { switch (x) { case 1: return 1; default: return 0; } }", true);
    assert!(!errored);
  }

  #[test] fn malformed_statement_recovers_to_next_declaration() {
    let (file, errored) = parse("module a; int x = ; int y;", true);
    assert!(errored);
    assert!(file.items.iter().any(|it| matches!(it, Item::Var(v) if crate::symbol::resolve(v.name) == "y")));
  }

  #[test] fn undefined_type_name_is_reported_but_parse_continues() {
    let (_, errored) = parse("module a; @ int x;", true);
    assert!(errored);
  }
}
