//! The three-address intermediate representation and fragment model
//!. This is the target-independent handoff point between
//! the translator and an external backend; nothing past this module knows about x86_64 beyond
//! what [`crate::target::Target`] and the chosen [`crate::frame::Frame`]
//! impl already baked in.

use crate::symbol::Symbol;

/// The ABI class a temp was allocated for, carried on the
/// operand itself so the register allocator does not need
/// to re-derive it from a `Type`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RegClass { GP, SSE, MEM }

/// An IR operand.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
  /// A virtual register, allocated by a [`TempAllocator`]; never reused
  /// within one function.
  Temp { id: u32, size: u32, align: u32, class: RegClass },
  /// A target-specific physical register id, used only by a `Frame` impl
  /// wiring up calling-convention fixed registers (e.g. `RDI` for the first
  /// SysV integer argument).
  Reg(u32),
  Constant { bits: u64, size: u32 },
  /// A reference to a label: a global, a string literal's RODATA fragment,
  /// or a function.
  Name(Symbol),
  /// Verbatim inline assembly text, emitted as-is.
  Asm(String),
  String(Vec<u8>),
  WString(Vec<u32>),
  /// A location at a constant offset from the frame pointer.
  StackOffset(i64),
}

impl Operand {
  #[must_use] pub fn size(&self) -> u32 {
    match self {
      Operand::Temp { size, .. } | Operand::Constant { size, .. } => *size,
      Operand::Reg(_) | Operand::Name(_) | Operand::StackOffset(_) => 0,
      Operand::Asm(_) | Operand::String(_) | Operand::WString(_) => 0,
    }
  }
}

/// The fixed IR operator set. Every entry names exactly one of
/// these; control/label/asm/raw-data entries carry `op_size == 0`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Op {
  Const,
  Asm,
  Label,
  Move,
  MemLoad, MemStore,
  StkLoad, StkStore,
  OffsetLoad, OffsetStore,
  Add, Sub, SMul, UMul, SDiv, UDiv, SMod, UMod,
  FpAdd, FpSub, FpMul, FpDiv,
  And, Or, Xor, Not, Sll, Slr, Sar, LNot,
  SxShort, SxInt, SxLong,
  ZxShort, ZxInt, ZxLong,
  TruncByte, TruncShort, TruncInt,
  SToFloat, SToDouble, UToFloat, UToDouble,
  FToByte, FToShort, FToInt, FToLong,
  FToFloat, FToDouble,
  CmpE, CmpNe, CmpL, CmpLe, CmpG, CmpGe, CmpA, CmpAe, CmpB, CmpBe,
  FpCmpE, FpCmpNe, FpCmpL, FpCmpLe, FpCmpG, FpCmpGe,
  Jump,
  JE, JNE, JL, JLE, JG, JGE, JA, JAE, JB, JBE,
  FpJE, FpJNE, FpJL, FpJLE, FpJG, FpJGE,
  Call,
  Return,
}

impl Op {
  /// True for operators that carry no meaningful `op_size`.
  #[must_use] pub fn is_sizeless(self) -> bool {
    matches!(self, Op::Asm | Op::Label | Op::Jump | Op::Call | Op::Return | Op::Const)
  }
}

/// One three-address entry. Conditional jumps (`JE`..`JBE`
/// and the `FpJ*` family) use `arg1`/`arg2` as the two compared operands and
/// `dest` as a `Name` of the target label; `Jump`/`Label`/`Call` use `arg1`
/// for their single operand (target label or callee); `Return` carries no
/// operands.
#[derive(Clone, Debug)]
pub struct Entry {
  pub op: Op,
  pub op_size: u32,
  pub dest: Option<Operand>,
  pub arg1: Option<Operand>,
  pub arg2: Option<Operand>,
}

impl Entry {
  #[must_use] pub fn label(name: Symbol) -> Self {
    Self { op: Op::Label, op_size: 0, dest: Some(Operand::Name(name)), arg1: None, arg2: None }
  }
  #[must_use] pub fn jump(target: Symbol) -> Self {
    Self { op: Op::Jump, op_size: 0, dest: None, arg1: Some(Operand::Name(target)), arg2: None }
  }
  #[must_use] pub fn cond_jump(op: Op, a: Operand, b: Operand, target: Symbol) -> Self {
    debug_assert!(matches!(op,
      Op::JE | Op::JNE | Op::JL | Op::JLE | Op::JG | Op::JGE | Op::JA | Op::JAE | Op::JB | Op::JBE |
      Op::FpJE | Op::FpJNE | Op::FpJL | Op::FpJLE | Op::FpJG | Op::FpJGE));
    Self { op, op_size: a.size(), dest: Some(Operand::Name(target)), arg1: Some(a), arg2: Some(b) }
  }
  #[must_use] pub fn mov(size: u32, dest: Operand, src: Operand) -> Self {
    Self { op: Op::Move, op_size: size, dest: Some(dest), arg1: Some(src), arg2: None }
  }
  #[must_use] pub fn asm(text: String) -> Self {
    Self { op: Op::Asm, op_size: 0, dest: None, arg1: Some(Operand::Asm(text)), arg2: None }
  }
  #[must_use] pub fn ret() -> Self {
    Self { op: Op::Return, op_size: 0, dest: None, arg1: None, arg2: None }
  }
  #[must_use] pub fn const_(size: u32, value: Operand) -> Self {
    Self { op: Op::Const, op_size: size, dest: None, arg1: Some(value), arg2: None }
  }
}

/// A linkable unit of a compiled file. Non-`Text` variants
/// hold a sequence of `Op::Const` entries that together lay out the datum
///.
#[derive(Clone, Debug)]
pub enum Fragment {
  Bss { label: Symbol, size: u64, align: u64 },
  Rodata { label: Symbol, align: u64, ir: Vec<Entry> },
  Data { label: Symbol, align: u64, ir: Vec<Entry> },
  /// `frame_size` is the total stack the function's frame reserves
  /// (locals + spill + alignment padding); it is the one frame-derived fact
  /// a backend needs without re-deriving the whole `Frame`.
  Text { label: Symbol, frame_size: u64, ir: Vec<Entry> },
}

impl Fragment {
  #[must_use] pub fn label(&self) -> Symbol {
    match self {
      Fragment::Bss { label, .. } | Fragment::Rodata { label, .. } |
      Fragment::Data { label, .. } | Fragment::Text { label, .. } => *label,
    }
  }
}

/// Per-function monotonic temp-id allocator. A fresh one is
/// created per function.
#[derive(Default)]
pub struct TempAllocator {
  next: u32,
}

impl TempAllocator {
  #[must_use] pub fn new() -> Self { Self::default() }

  pub fn fresh(&mut self, size: u32, align: u32, class: RegClass) -> Operand {
    let id = self.next;
    self.next += 1;
    Operand::Temp { id, size, align, class }
  }

  #[must_use] pub fn count(&self) -> u32 { self.next }
}

/// Generates fresh code and data labels via `new_label()` and
/// `new_data_label()`.
#[derive(Default)]
pub struct LabelGenerator {
  next_label: u32,
  next_data: u32,
}

impl LabelGenerator {
  #[must_use] pub fn new() -> Self { Self::default() }

  pub fn new_label(&mut self) -> Symbol {
    let n = self.next_label;
    self.next_label += 1;
    crate::symbol::intern(&format!(".L{n}"))
  }

  pub fn new_data_label(&mut self) -> Symbol {
    let n = self.next_data;
    self.next_data += 1;
    crate::symbol::intern(&format!(".LC{n}"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test] fn temp_ids_are_monotonic_and_never_reused() {
    let mut temps = TempAllocator::new();
    let a = temps.fresh(4, 4, RegClass::GP);
    let b = temps.fresh(8, 8, RegClass::GP);
    match (a, b) {
      (Operand::Temp { id: ia, .. }, Operand::Temp { id: ib, .. }) => assert!(ib > ia),
      _ => panic!("expected temps"),
    }
  }

  #[test] fn sizeless_ops_per_spec() {
    assert!(Op::Asm.is_sizeless());
    assert!(Op::Label.is_sizeless());
    assert!(Op::Jump.is_sizeless());
    assert!(Op::Call.is_sizeless());
    assert!(Op::Return.is_sizeless());
    assert!(Op::Const.is_sizeless());
    assert!(!Op::Add.is_sizeless());
  }

  #[test] fn label_generator_produces_distinct_labels() {
    let mut g = LabelGenerator::new();
    let a = g.new_label();
    let b = g.new_label();
    assert_ne!(a, b);
  }
}
