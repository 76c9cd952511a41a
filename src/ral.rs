//! Re-exporting the ral-registers APIs
//!
//! The shared status and control words are described with the same
//! field-module layout as a register access layer, so the `ral-registers`
//! macros work on them. [`AtomicRegister`] is the register type behind
//! those words.

pub use ral_registers::{modify_reg, read_reg, write_reg};

use core::sync::atomic::{AtomicU32, Ordering};

/// Atomic cell that conforms to the RAL's register API
///
/// Each register has exactly one writing context. Writes publish with
/// `Release`, reads observe with `Acquire`, so `modify_reg!` is a plain
/// read-then-write and is only sound for the owning writer.
#[repr(transparent)]
pub struct AtomicRegister(AtomicU32);

impl AtomicRegister {
    pub const fn new(val: u32) -> Self {
        AtomicRegister(AtomicU32::new(val))
    }
    pub fn read(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }
    pub fn write(&self, val: u32) {
        self.0.store(val, Ordering::Release)
    }
}
