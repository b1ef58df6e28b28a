//! The x86_64 System-V frame. The only concrete [`crate::frame::Frame`] this
//! crate ships; everything upstream of it (lexer through translator) is
//! written against the trait, not this module, so a second target would
//! only need a sibling of this file.

use std::rc::Rc;
use crate::frame::Frame;
use crate::ir::{Entry, Op, Operand, RegClass, TempAllocator};
use crate::types::entity::Access;
use crate::types::ty::{Kind, Type};
use crate::target::Target;

/// Physical register ids for `Operand::Reg`, in x86-64's own encoding
/// order for the general-purpose bank, with SSE registers offset past it so
/// the two banks never collide in one `u32` namespace.
pub mod reg {
  pub const RAX: u32 = 0;
  pub const RCX: u32 = 1;
  pub const RDX: u32 = 2;
  pub const RBX: u32 = 3;
  pub const RSP: u32 = 4;
  pub const RBP: u32 = 5;
  pub const RSI: u32 = 6;
  pub const RDI: u32 = 7;
  pub const R8: u32 = 8;
  pub const R9: u32 = 9;
  pub const R10: u32 = 10;
  pub const R11: u32 = 11;
  pub const R12: u32 = 12;
  pub const R13: u32 = 13;
  pub const R14: u32 = 14;
  pub const R15: u32 = 15;
  pub const XMM_BASE: u32 = 16;
  #[must_use] pub const fn xmm(n: u32) -> u32 { XMM_BASE + n }

  /// Callee-saved per the SysV ABI. The remainder, plus all of
  /// `XMM0..XMM15`, are caller-saved.
  pub const CALLEE_SAVE: [u32; 5] = [RBX, R12, R13, R14, R15];
}

const ARG_GP_REGS: [u32; 6] = [reg::RDI, reg::RSI, reg::RDX, reg::RCX, reg::R8, reg::R9];
const ARG_SSE_COUNT: u32 = 8;
const RET_GP_REG: u32 = reg::RAX;
const RET_SSE_REG: u32 = reg::XMM_BASE;

#[derive(Debug)]
struct RegAccess { reg: u32, size: u32 }

impl Access for RegAccess {
  fn load(&self, _out: &mut Vec<Entry>, _temps: &mut TempAllocator) -> Operand { Operand::Reg(self.reg) }
  fn store(&self, out: &mut Vec<Entry>, source: Operand, _temps: &mut TempAllocator) {
    out.push(Entry::mov(self.size, Operand::Reg(self.reg), source));
  }
}

#[derive(Debug)]
struct StackAccess { offset: i64, size: u32 }

impl Access for StackAccess {
  fn load(&self, out: &mut Vec<Entry>, temps: &mut TempAllocator) -> Operand {
    let class = if self.size <= 8 { RegClass::GP } else { RegClass::MEM };
    let dest = temps.fresh(self.size, self.size.min(8), class);
    out.push(Entry {
      op: Op::StkLoad, op_size: self.size,
      dest: Some(dest.clone()), arg1: Some(Operand::StackOffset(self.offset)), arg2: None,
    });
    dest
  }
  fn store(&self, out: &mut Vec<Entry>, source: Operand, _temps: &mut TempAllocator) {
    out.push(Entry {
      op: Op::StkStore, op_size: self.size,
      dest: Some(Operand::StackOffset(self.offset)), arg1: Some(source), arg2: None,
    });
  }
  fn address(&self) -> Option<Operand> { Some(Operand::StackOffset(self.offset)) }
}

/// A named global. Lives outside any `Frame`;
/// constructed directly by the translator for `BSS`/`DATA`/`RODATA` entries.
#[derive(Debug)]
pub struct GlobalAccess {
  pub label: crate::symbol::Symbol,
  pub size: u32,
}

impl Access for GlobalAccess {
  fn load(&self, out: &mut Vec<Entry>, temps: &mut TempAllocator) -> Operand {
    let class = if self.size <= 8 { RegClass::GP } else { RegClass::MEM };
    let dest = temps.fresh(self.size, self.size.min(8), class);
    out.push(Entry {
      op: Op::MemLoad, op_size: self.size,
      dest: Some(dest.clone()), arg1: Some(Operand::Name(self.label)), arg2: None,
    });
    dest
  }
  fn store(&self, out: &mut Vec<Entry>, source: Operand, _temps: &mut TempAllocator) {
    out.push(Entry {
      op: Op::MemStore, op_size: self.size,
      dest: Some(Operand::Name(self.label)), arg1: Some(source), arg2: None,
    });
  }
  fn label(&self) -> Option<crate::symbol::Symbol> { Some(self.label) }
  fn address(&self) -> Option<Operand> { Some(Operand::Name(self.label)) }
}

/// Per-function frame state: how many of each incoming argument register
/// class have been consumed, and the running stack-offset allocators for
/// incoming stack args, locals, and callee-save spill slots.
pub struct SysVFrame<'a> {
  arena: &'a crate::types::entity::SymbolArena,
  target: &'a Target,
  next_gp_arg: usize,
  next_sse_arg: usize,
  incoming_stack_offset: i64,
  local_offset: i64,
}

impl<'a> SysVFrame<'a> {
  #[must_use] pub fn new(arena: &'a crate::types::entity::SymbolArena, target: &'a Target) -> Self {
    Self {
      arena, target,
      next_gp_arg: 0, next_sse_arg: 0,
      // First incoming stack argument sits at +16(%rbp): the return
      // address and saved %rbp each take one register-width slot.
      incoming_stack_offset: 2 * i64::from(target.register_width),
      local_offset: 0,
    }
  }

  fn alloc_stack_local(&mut self, size: u64, align: u64) -> StackAccess {
    let align = align.max(1) as i64;
    self.local_offset -= size as i64;
    self.local_offset = -((-self.local_offset).div_ceil(align) * align);
    StackAccess { offset: self.local_offset, size: u32::try_from(size).unwrap_or(u32::MAX) }
  }
}

impl Frame for SysVFrame<'_> {
  fn alloc_arg(&mut self, _index: usize, ty: &Type, escapes: bool) -> Rc<dyn Access> {
    let size = u32::try_from(ty.size(self.arena, self.target)).unwrap_or(u32::MAX);
    let kind = ty.kindof(self.arena);
    if !escapes && kind != Kind::MEM {
      let reg = match kind {
        Kind::GP if self.next_gp_arg < ARG_GP_REGS.len() => {
          let r = ARG_GP_REGS[self.next_gp_arg];
          self.next_gp_arg += 1;
          Some(r)
        }
        Kind::SSE if self.next_sse_arg < ARG_SSE_COUNT as usize => {
          let r = reg::xmm(u32::try_from(self.next_sse_arg).unwrap());
          self.next_sse_arg += 1;
          Some(r)
        }
        _ => None,
      };
      if let Some(reg) = reg {
        return Rc::new(RegAccess { reg, size });
      }
    }
    // Either it escapes, is MEM-kind (always passed/addressed via memory),
    // or the register banks for its class are exhausted: it arrives on the
    // incoming-argument stack area.
    let align = i64::from(self.target.register_width);
    let offset = self.incoming_stack_offset;
    self.incoming_stack_offset += i64::from(size).max(align).div_ceil(align) * align;
    Rc::new(StackAccess { offset, size })
  }

  fn alloc_ret_val(&mut self, ty: &Type) -> Option<Rc<dyn Access>> {
    if ty == &Type::void() { return None }
    let size = u32::try_from(ty.size(self.arena, self.target)).unwrap_or(u32::MAX);
    let reg = match ty.kindof(self.arena) {
      Kind::SSE => RET_SSE_REG,
      _ => RET_GP_REG,
    };
    Some(Rc::new(RegAccess { reg, size }))
  }

  fn alloc_local(&mut self, ty: &Type, _escapes: bool) -> Rc<dyn Access> {
    let size = ty.size(self.arena, self.target).max(1);
    let align = ty.align(self.arena, self.target);
    Rc::new(self.alloc_stack_local(size, align))
  }

  fn generate_entry_exit(&mut self, mut body: Vec<Entry>) -> Vec<Entry> {
    let mut wrapped = Vec::with_capacity(body.len() + 8);
    wrapped.push(Entry::asm("push %rbp".into()));
    wrapped.push(Entry::asm("mov %rsp, %rbp".into()));
    let frame_size = self.frame_size();
    if frame_size > 0 {
      wrapped.push(Entry::asm(format!("sub ${frame_size}, %rsp")));
    }
    for &r in &reg::CALLEE_SAVE {
      wrapped.push(Entry::asm(format!("push {}", reg_name(r))));
    }
    wrapped.append(&mut body);
    for &r in reg::CALLEE_SAVE.iter().rev() {
      wrapped.push(Entry::asm(format!("pop {}", reg_name(r))));
    }
    wrapped.push(Entry::asm("leave".into()));
    wrapped.push(Entry::ret());
    wrapped
  }

  fn frame_size(&self) -> u64 {
    let align = i64::from(self.target.register_width);
    (-self.local_offset).div_ceil(align) as u64 * align as u64
  }
}

fn reg_name(r: u32) -> &'static str {
  match r {
    reg::RAX => "%rax", reg::RCX => "%rcx", reg::RDX => "%rdx", reg::RBX => "%rbx",
    reg::RSP => "%rsp", reg::RBP => "%rbp", reg::RSI => "%rsi", reg::RDI => "%rdi",
    reg::R8 => "%r8", reg::R9 => "%r9", reg::R10 => "%r10", reg::R11 => "%r11",
    reg::R12 => "%r12", reg::R13 => "%r13", reg::R14 => "%r14", reg::R15 => "%r15",
    _ => "%xmm?",
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::entity::SymbolArena;

  #[test] fn first_six_int_args_go_in_registers() {
    let arena = SymbolArena::new();
    let target = Target::x86_64_sysv();
    let mut frame = SysVFrame::new(&arena, &target);
    for i in 0..6 {
      let access = frame.alloc_arg(i, &Type::int(), false);
      assert_eq!(access.label(), None);
    }
    // a 7th integer arg overflows to the stack
    let mut temps = TempAllocator::new();
    let mut out = Vec::new();
    let seventh = frame.alloc_arg(6, &Type::int(), false);
    let op = seventh.load(&mut out, &mut temps);
    assert!(matches!(op, Operand::Temp { .. }));
    assert!(matches!(out[0].op, Op::StkLoad));
  }

  #[test] fn escaping_arg_is_spilled_to_stack_even_in_register_range() {
    let arena = SymbolArena::new();
    let target = Target::x86_64_sysv();
    let mut frame = SysVFrame::new(&arena, &target);
    let access = frame.alloc_arg(0, &Type::int(), true);
    let mut temps = TempAllocator::new();
    let mut out = Vec::new();
    access.load(&mut out, &mut temps);
    assert!(matches!(out[0].op, Op::StkLoad));
  }

  #[test] fn void_return_has_no_access() {
    let arena = SymbolArena::new();
    let target = Target::x86_64_sysv();
    let mut frame = SysVFrame::new(&arena, &target);
    assert!(frame.alloc_ret_val(&Type::void()).is_none());
  }

  #[test] fn locals_get_distinct_frame_offsets() {
    let arena = SymbolArena::new();
    let target = Target::x86_64_sysv();
    let mut frame = SysVFrame::new(&arena, &target);
    let a = frame.alloc_local(&Type::int(), false);
    let b = frame.alloc_local(&Type::int(), false);
    let mut temps = TempAllocator::new();
    let mut out_a = Vec::new();
    let mut out_b = Vec::new();
    a.load(&mut out_a, &mut temps);
    b.load(&mut out_b, &mut temps);
    assert_ne!(format!("{out_a:?}"), format!("{out_b:?}"));
    assert!(frame.frame_size() >= 8);
  }
}
