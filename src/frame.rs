//! The target-abstract `Frame`. This is the one seam in the crate where
//! polymorphism earns its keep: target selection is the one place that
//! wants an interface with a small, total method set rather than a tagged
//! variant. [`crate::x86_64::SysVFrame`] is the only implementation this
//! crate ships, but the translator is written entirely against this trait.

use crate::ir::Entry;
use crate::types::entity::Access;
use crate::types::ty::Type;
use std::rc::Rc;

/// A per-function allocator of storage locations, abstracting the target
/// calling convention and stack layout.
pub trait Frame {
  /// Wrap `body` with whatever stack setup a nested lexical scope needs
  /// (e.g. space for locals that escape into nested closures -- this
  /// source language has none, so the default SysV frame is a no-op here,
  /// but the hook exists for a future frame that does).
  fn scope_start(&mut self) {}
  /// The dual of [`Frame::scope_start`]; `body` is returned unchanged by
  /// the default frame.
  fn scope_end(&mut self, body: Vec<Entry>) -> Vec<Entry> { body }

  /// Allocate storage for the `index`-th incoming parameter (0-based, in
  /// declaration order).
  fn alloc_arg(&mut self, index: usize, ty: &Type, escapes: bool) -> Rc<dyn Access>;

  /// Allocate the return-value slot; `None` for a `void`-returning function.
  fn alloc_ret_val(&mut self, ty: &Type) -> Option<Rc<dyn Access>>;

  /// Allocate a local binding.
  fn alloc_local(&mut self, ty: &Type, escapes: bool) -> Rc<dyn Access>;

  /// Prepend the prologue and append the epilogue around the translated
  /// body (callee-save, stack alignment, return). Called once, after the
  /// whole function body has been translated.
  fn generate_entry_exit(&mut self, body: Vec<Entry>) -> Vec<Entry>;

  /// Total stack this frame has reserved so far, for `Fragment::Text`'s
  /// `frame_size` field.
  fn frame_size(&self) -> u64;
}
