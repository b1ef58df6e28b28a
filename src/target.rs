//! Target parameters as data. Keeping
//! them in a struct instead of literals scattered through the checker and
//! translator is what makes the x86_64 System-V frame in [`crate::x86_64`]
//! a genuine instantiation of the pluggable [`crate::frame::Frame`] trait
//! rather than the only possible one.

/// Byte widths of the primitive machine quantities this compiler core
/// reasons about. All fields are byte counts, not bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Target {
  pub pointer_width: u32,
  pub register_width: u32,
  pub char_width: u32,
  pub wchar_width: u32,
  pub short_width: u32,
  pub int_width: u32,
  pub long_width: u32,
}

impl Target {
  /// The only concrete target this crate ships: x86_64 System-V.
  #[must_use] pub const fn x86_64_sysv() -> Self {
    Self {
      pointer_width: 8,
      register_width: 8,
      char_width: 1,
      wchar_width: 4,
      short_width: 2,
      int_width: 4,
      long_width: 8,
    }
  }
}

impl Default for Target {
  fn default() -> Self { Self::x86_64_sysv() }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test] fn sysv_widths() {
    let t = Target::x86_64_sysv();
    assert_eq!(t.int_width, 4);
    assert_eq!(t.long_width, 8);
    assert_eq!(t.pointer_width, t.long_width);
  }
}
