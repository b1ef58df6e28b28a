//! Core compilation pipeline for a small C-family systems language:
//! lex, parse, typecheck, translate to a target-independent three-address
//! IR. The only concrete target shipped is x86_64 System-V ([`x86_64`]);
//! everything from [`lexer`] through [`translator`] is written against
//! [`frame::Frame`] rather than that module, so a second target is a
//! sibling file rather than a rewrite.
//!
//! This crate has no command-line surface of its own: a driver links it
//! in, hands [`Compiler::compile_unit`] each translation unit's source
//! text, and decides what to do with the resulting [`ir::Fragment`]s
//! (assemble, archive, link) and with a non-empty [`Diagnostics`] (exit
//! status, rendering).

pub mod ast;
pub mod backend;
pub mod diagnostics;
pub mod env;
pub mod error;
pub mod frame;
pub mod ir;
pub mod lexer;
pub mod mangle;
pub mod parser;
pub mod symbol;
pub mod target;
pub mod translator;
pub mod typeck;
pub mod types;
pub mod x86_64;

use std::path::PathBuf;

use diagnostics::Diagnostics;
use env::Environment;
use ir::Fragment;
use parser::Parser;
use target::Target;
use typeck::TypeChecker;
use x86_64::SysVFrame;

/// One file's pipeline result. `fragments` is only populated when nothing
/// errored.
pub struct CompileResult {
  pub diagnostics: Diagnostics,
  pub fragments: Vec<Fragment>,
}

impl CompileResult {
  #[must_use] pub fn errored(&self) -> bool { self.diagnostics.errored() }
}

/// The library entry point a driver calls once per input file. Holds only what's shared across an entire run -- the
/// target -- and nothing file-specific, so one `Compiler` compiles every
/// file in a file list.
pub struct Compiler {
  target: Target,
}

impl Compiler {
  #[must_use] pub fn new(target: Target) -> Self { Self { target } }

  /// Lex, parse, typecheck, and (absent errors) translate one file.
  ///
  /// `path` is used only for diagnostic rendering. `is_code` is the
  /// driver's `isDeclaration`-per-extension classification inverted: a
  /// declaration module (header) passes `false` and gets signatures with
  /// no definitions; a code module passes `true`.
  pub fn compile_unit(&self, path: impl Into<PathBuf>, source: &str, is_code: bool) -> CompileResult {
    let mut diags = Diagnostics::new(path.into());
    let env = Environment::new();

    let file = {
      let mut parser = Parser::new(source, &env, &mut diags);
      log::trace!("{}: lexing + parsing", diags.file().display());
      parser.parse_file(is_code)
    };

    log::trace!("{}: resolving + type-checking", diags.file().display());
    let mut checker = TypeChecker::new(&env, &self.target, &mut diags, file.module.clone());
    checker.check_file(&file);

    let fragments = if diags.errored() {
      log::debug!("{}: {} diagnostic(s), skipping translation", diags.file().display(), diags.diagnostics().len());
      Vec::new()
    } else {
      log::trace!("{}: translating", diags.file().display());
      translator::translate_file(&file, &env, &self.target, &file.module, || SysVFrame::new(env.arena(), &self.target))
    };

    CompileResult { diagnostics: diags, fragments }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test] fn minimal_program_compiles_clean() {
    let compiler = Compiler::new(Target::x86_64_sysv());
    let result = compiler.compile_unit("t.c", "module m; int f(int a) { return a + 1; }", true);
    assert!(!result.errored(), "{:?}", result.diagnostics.diagnostics().iter().map(ToString::to_string).collect::<Vec<_>>());
    assert_eq!(result.fragments.len(), 1);
    assert!(matches!(result.fragments[0], Fragment::Text { .. }));
  }

  #[test] fn undefined_identifier_is_diagnosed_and_suppresses_translation() {
    let compiler = Compiler::new(Target::x86_64_sysv());
    let result = compiler.compile_unit("t.c", "module m; int f() { return y; }", true);
    assert!(result.errored());
    assert!(result.fragments.is_empty());
  }

  #[test] fn header_file_declarations_carry_no_bodies() {
    let compiler = Compiler::new(Target::x86_64_sysv());
    let result = compiler.compile_unit("t.h", "module m; int f(int a);", false);
    assert!(!result.errored(), "{:?}", result.diagnostics.diagnostics().iter().map(ToString::to_string).collect::<Vec<_>>());
  }
}
