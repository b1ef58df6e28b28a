//! A default, non-normative assembly-shaped renderer for [`Fragment`]s.
//! Real ISA-correct instruction selection and encoding are out of scope
//! for this crate -- this module exists only so the core can hand a
//! driver something textual to inspect or pipe to an assembler's own
//! frontend, rendering to an `impl Write` rather than owning the file
//! the output ends up in.

use std::io::{self, Write};

use crate::ir::{Entry, Fragment, Op, Operand};
use crate::symbol::resolve;

/// Consumes a file's fragments and renders them to an `impl Write`. The
/// only implementation this crate ships is [`TextBackend`]; a real
/// assembler/object-file backend is an external collaborator that would
/// implement this trait instead.
pub trait Backend {
  fn emit(&self, fragments: &[Fragment], out: &mut dyn Write) -> io::Result<()>;
}

/// Renders each fragment as a readable, mnemonic-shaped text block: a
/// section directive, a label, then one line per `CONST`/IR entry.
/// Mnemonics are descriptive, not assembler-accurate -- see the module doc.
#[derive(Default)]
pub struct TextBackend;

impl Backend for TextBackend {
  fn emit(&self, fragments: &[Fragment], out: &mut dyn Write) -> io::Result<()> {
    for fragment in fragments {
      self.emit_fragment(fragment, out)?;
    }
    Ok(())
  }
}

impl TextBackend {
  fn emit_fragment(&self, fragment: &Fragment, out: &mut dyn Write) -> io::Result<()> {
    match fragment {
      Fragment::Bss { label, size, align } => {
        writeln!(out, ".bss")?;
        writeln!(out, ".align {align}")?;
        writeln!(out, "{}:", resolve(*label))?;
        writeln!(out, "  .lcomm {size}")
      }
      Fragment::Rodata { label, align, ir } => {
        writeln!(out, ".section .rodata")?;
        writeln!(out, ".align {align}")?;
        writeln!(out, "{}:", resolve(*label))?;
        self.emit_data(ir, out)
      }
      Fragment::Data { label, align, ir } => {
        writeln!(out, ".data")?;
        writeln!(out, ".align {align}")?;
        writeln!(out, "{}:", resolve(*label))?;
        self.emit_data(ir, out)
      }
      Fragment::Text { label, frame_size, ir } => {
        writeln!(out, ".text")?;
        writeln!(out, "{}:  ; frame_size={frame_size}", resolve(*label))?;
        self.emit_text(ir, out)
      }
    }
  }

  /// One data directive per `CONST` entry, sized to `op_size`.
  fn emit_data(&self, ir: &[Entry], out: &mut dyn Write) -> io::Result<()> {
    for entry in ir {
      debug_assert_eq!(entry.op, Op::Const);
      let directive = match entry.op_size {
        1 => ".byte",
        2 => ".word",
        4 => ".long",
        _ => ".quad",
      };
      match entry.arg1.as_ref().expect("CONST entry always carries its value") {
        Operand::Constant { bits, .. } => writeln!(out, "  {directive} {bits}")?,
        Operand::String(bytes) => writeln!(out, "  .ascii {:?}", String::from_utf8_lossy(bytes))?,
        Operand::WString(points) => writeln!(out, "  .long {}", points.iter().map(u32::to_string).collect::<Vec<_>>().join(", "))?,
        Operand::Name(sym) => writeln!(out, "  {directive} {}", resolve(*sym))?,
        other => writeln!(out, "  {directive} {other:?}")?,
      }
    }
    Ok(())
  }

  fn emit_text(&self, ir: &[Entry], out: &mut dyn Write) -> io::Result<()> {
    for entry in ir {
      match entry.op {
        Op::Label => writeln!(out, "{}:", operand_str(entry.dest.as_ref()))?,
        Op::Asm => writeln!(out, "  {}", operand_str(entry.arg1.as_ref()))?,
        _ => {
          let mut line = format!("  {:?}", entry.op);
          if entry.op_size > 0 { line.push_str(&format!(".{}", entry.op_size)); }
          if let Some(d) = &entry.dest { line.push_str(&format!(" {}", operand_str(Some(d)))); }
          if let Some(a) = &entry.arg1 { line.push_str(&format!(", {}", operand_str(Some(a)))); }
          if let Some(a) = &entry.arg2 { line.push_str(&format!(", {}", operand_str(Some(a)))); }
          writeln!(out, "{line}")?;
        }
      }
    }
    Ok(())
  }
}

fn operand_str(op: Option<&Operand>) -> String {
  match op {
    None => String::new(),
    Some(Operand::Temp { id, .. }) => format!("%t{id}"),
    Some(Operand::Reg(r)) => format!("%r{r}"),
    Some(Operand::Constant { bits, .. }) => bits.to_string(),
    Some(Operand::Name(s)) => resolve(*s),
    Some(Operand::Asm(s)) => s.clone(),
    Some(Operand::String(b)) => format!("{:?}", String::from_utf8_lossy(b)),
    Some(Operand::WString(cps)) => format!("{cps:?}"),
    Some(Operand::StackOffset(o)) => format!("{o}(%rbp)"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::symbol::intern;

  #[test] fn bss_fragment_renders_a_reservation_directive() {
    let backend = TextBackend;
    let fragments = [Fragment::Bss { label: intern("__Z1a1x"), size: 4, align: 4 }];
    let mut out = Vec::new();
    backend.emit(&fragments, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains(".bss"));
    assert!(text.contains("__Z1a1x:"));
    assert!(text.contains(".lcomm 4"));
  }

  #[test] fn rodata_string_entry_renders_as_ascii_directive() {
    let backend = TextBackend;
    let entry = Entry::const_(1, Operand::String(b"hi\0".to_vec()));
    let fragments = [Fragment::Rodata { label: intern("__Z1mL"), align: 1, ir: vec![entry] }];
    let mut out = Vec::new();
    backend.emit(&fragments, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains(".ascii"));
  }

  #[test] fn text_fragment_renders_one_line_per_entry() {
    let backend = TextBackend;
    let label = intern("__Z1m1f");
    let ir = vec![Entry::label(label), Entry::ret()];
    let fragments = [Fragment::Text { label, frame_size: 0, ir }];
    let mut out = Vec::new();
    backend.emit(&fragments, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.lines().count(), 3);
  }
}
