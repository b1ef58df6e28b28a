//! Diagnostic collection. Every phase reports through
//! [`Diagnostics`] instead of failing fast, so a single run surfaces as many
//! independent errors as possible.

use std::fmt;
use std::path::{Path, PathBuf};

/// A 1-based source position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Span {
  pub line: u32,
  pub column: u32,
}

impl Span {
  #[must_use] pub fn new(line: u32, column: u32) -> Self { Self { line, column } }
}

/// A secondary note attached to a diagnostic, e.g. "candidate module: foo".
#[derive(Clone, Debug)]
pub struct Note {
  pub label: String,
  pub message: String,
}

/// A single user-visible diagnostic. Internal errors (kind 7)
/// never flow through this type: they abort via [`crate::bug`] instead.
#[derive(Clone, Debug)]
pub struct Diagnostic {
  pub file: PathBuf,
  pub span: Span,
  pub message: String,
  pub notes: Vec<Note>,
}

impl fmt::Display for Diagnostic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "{}:{}:{}: error: {}", self.file.display(), self.span.line, self.span.column, self.message)?;
    for note in &self.notes {
      writeln!(f, "\t{}: {}", note.label, note.message)?;
    }
    Ok(())
  }
}

/// Per-file diagnostic accumulator. A phase that notices a problem calls
/// [`Diagnostics::error`] and keeps going on a best-effort basis; the
/// caller checks [`Diagnostics::errored`] once the whole pipeline has run.
#[derive(Default)]
pub struct Diagnostics {
  file: PathBuf,
  diags: Vec<Diagnostic>,
}

impl Diagnostics {
  #[must_use] pub fn new(file: impl Into<PathBuf>) -> Self {
    Self { file: file.into(), diags: Vec::new() }
  }

  pub fn error(&mut self, span: Span, message: impl Into<String>) {
    let message = message.into();
    log::debug!("{}:{}:{}: error: {message}", self.file.display(), span.line, span.column);
    self.diags.push(Diagnostic { file: self.file.clone(), span, message, notes: Vec::new() });
  }

  pub fn error_with_notes(&mut self, span: Span, message: impl Into<String>, notes: Vec<Note>) {
    self.diags.push(Diagnostic { file: self.file.clone(), span, message: message.into(), notes });
  }

  #[must_use] pub fn errored(&self) -> bool { !self.diags.is_empty() }

  #[must_use] pub fn diagnostics(&self) -> &[Diagnostic] { &self.diags }

  #[must_use] pub fn file(&self) -> &Path { &self.file }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test] fn format_matches_spec() {
    let mut d = Diagnostics::new("test.src");
    d.error(Span::new(3, 5), "undefined identifier 'zzz'");
    assert!(d.errored());
    let rendered = d.diagnostics()[0].to_string();
    assert_eq!(rendered.lines().next().unwrap(), "test.src:3:5: error: undefined identifier 'zzz'");
  }

  #[test] fn notes_are_tab_indented() {
    let mut d = Diagnostics::new("test.src");
    d.error_with_notes(Span::new(1, 1), "ambiguous identifier 'x'", vec![
      Note { label: "candidate module".into(), message: "a".into() },
      Note { label: "candidate module".into(), message: "b".into() },
    ]);
    let rendered = d.diagnostics()[0].to_string();
    assert!(rendered.contains("\tcandidate module: a\n"));
  }
}
