//! Internal-error handling. User-visible errors (kinds 1-6)
//! always flow through [`crate::diagnostics::Diagnostics`] and never panic;
//! this module is the one documented boundary where an invariant violation
//! -- a bug, not a malformed program -- aborts the process.

use thiserror::Error;
use crate::diagnostics::Span;

/// Raised only by [`ice`]/[`ice_at`]; never constructed for user-facing
/// diagnostics. Exists as a typed payload so a
/// driver that does want to catch the panic (e.g. a test harness) can
/// downcast it instead of string-matching a panic message.
#[derive(Debug, Error)]
#[error("internal compiler error: {message}")]
pub struct InternalError {
  pub message: String,
}

/// Panic with an internal-compiler-error message, for invariant violations
/// that cannot happen in a correct implementation (an arena `Reference`
/// pointing at a non-type entity, an unresolved `Id` node reaching
/// translation, and so on). Never used for user input errors.
#[track_caller]
pub fn ice(message: impl Into<String>) -> ! {
  let message = message.into();
  log::error!("internal compiler error: {message}");
  std::panic::panic_any(InternalError { message })
}

/// The spanned form used once a file name is in scope, e.g. from the checker or translator.
#[track_caller]
pub fn ice_at(file: &std::path::Path, span: Span, message: impl std::fmt::Display) -> ! {
  ice(format!("{}:{}: {message}", file.display(), span.line))
}
