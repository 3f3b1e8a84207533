//! # report
//! Classification of a faulting address from its shadow byte, the trap-stub
//! ABI shared with the compiler pass, and the shadow dump rendering. The
//! full report pipeline (which needs every registry) lives in `rt`.
use core::fmt::{self, Display, Write};

use crate::{
    Addr,
    mmap::Mmap,
    shadow::map::{ShadowLayout, ShadowMap},
    stack::StackTrace,
};

/// `ud2` on x86.
pub const TRAP_OPCODE: [u8; 2] = [0x0f, 0x0b];

/// The immediate byte following the trap is `0x50 + (size_log2 | write_bit)`.
pub const TRAP_IMMEDIATE_BASE: u8 = 0x50;

pub const TRAP_WRITE_BIT: u8 = 0x08;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    HeapBufferOverflow,
    HeapUseAfterFree,
    StackBufferUnderflow,
    StackBufferOverflow,
    StackUseAfterReturn,
    GlobalBufferOverflow,
    UnknownCrash,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::HeapBufferOverflow => "heap-buffer-overflow",
            ErrorKind::HeapUseAfterFree => "heap-use-after-free",
            ErrorKind::StackBufferUnderflow => "stack-buffer-underflow",
            ErrorKind::StackBufferOverflow => "stack-buffer-overflow",
            ErrorKind::StackUseAfterReturn => "stack-use-after-return",
            ErrorKind::GlobalBufferOverflow => "global-buffer-overflow",
            ErrorKind::UnknownCrash => "unknown-crash",
        };
        f.write_str(name)
    }
}

/// Map a shadow byte to a bug kind. A positive partial byte means the fault
/// sits in the ragged tail of a word; the species is identified by the
/// following shadow byte, which the caller passes as `next`.
pub fn classify_shadow_byte(byte: u8, next: u8) -> ErrorKind {
    let species = if (1..=7).contains(&byte) { next } else { byte };
    match species {
        0xfa | 0xfb => ErrorKind::HeapBufferOverflow,
        0xfd => ErrorKind::HeapUseAfterFree,
        0xf1 => ErrorKind::StackBufferUnderflow,
        0xf2 | 0xf3 | 0xf5 => ErrorKind::StackBufferOverflow,
        0xf4 => ErrorKind::StackUseAfterReturn,
        0xf9 => ErrorKind::GlobalBufferOverflow,
        _ => ErrorKind::UnknownCrash,
    }
}

/// Classify a faulting application address by reading its shadow.
///
/// # Safety
/// The shadow must be reserved (and, for lazy mode, paged in for this
/// address, which it is by construction: the fault came from reading it).
pub unsafe fn classify_addr<M: Mmap, L: ShadowLayout>(addr: Addr) -> ErrorKind {
    if !ShadowMap::<M, L>::is_memory(addr, 1) {
        return ErrorKind::UnknownCrash;
    }
    let shadow = ShadowMap::<M, L>::mem_to_shadow(addr);
    let byte = unsafe { *(shadow as *const u8) };
    let next = unsafe { *((shadow + 1) as *const u8) };
    classify_shadow_byte(byte, next)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessInfo {
    pub pc: Addr,
    pub bp: Addr,
    pub sp: Addr,
    pub addr: Addr,
    pub is_write: bool,
    pub size: usize,
}

impl AccessInfo {
    /// Decode the `size_log2 | write_bit` code used by both the trap stubs
    /// and the `__asan_report_error_<k>` entry points.
    pub fn decode_size_and_type(code: u8) -> Option<(bool, usize)> {
        if code >= 16 {
            return None;
        }
        let size_log2 = code & 0x07;
        if size_log2 > 4 {
            return None;
        }
        Some((code & TRAP_WRITE_BIT != 0, 1 << size_log2))
    }

    pub fn encode_size_and_type(is_write: bool, size: usize) -> Option<u8> {
        if !size.is_power_of_two() || size > 16 {
            return None;
        }
        let mut code = size.trailing_zeros() as u8;
        if is_write {
            code |= TRAP_WRITE_BIT;
        }
        Some(code)
    }

    pub fn direction(&self) -> &'static str {
        if self.is_write { "WRITE" } else { "READ" }
    }
}

/// Decode a trap site: `ud2` followed by one immediate byte.
///
/// # Safety
/// `pc` must point at readable code (it does when we got here via SIGILL at
/// that pc).
pub unsafe fn decode_trap(pc: Addr) -> Option<(bool, usize)> {
    let insn = pc as *const u8;
    unsafe {
        if *insn != TRAP_OPCODE[0] || *insn.add(1) != TRAP_OPCODE[1] {
            return None;
        }
        let imm = *insn.add(2);
        AccessInfo::decode_size_and_type(imm.wrapping_sub(TRAP_IMMEDIATE_BASE))
    }
}

pub fn write_stack_trace(out: &mut dyn Write, trace: &StackTrace) -> fmt::Result {
    for (i, pc) in trace.frames().iter().enumerate() {
        writeln!(out, "    #{i} {pc:#x}")?;
    }
    Ok(())
}

fn write_shadow_row(out: &mut dyn Write, marker: &str, row: Addr) -> fmt::Result {
    write!(out, "{marker}{row:#018x}:")?;
    for i in 0..size_of::<Addr>() {
        let byte = unsafe { *((row + i) as *const u8) };
        write!(out, " {byte:02x}")?;
    }
    writeln!(out)
}

/// Dump nine word-aligned rows of shadow around the faulting address, the
/// faulting row marked with `=>`.
///
/// # Safety
/// The shadow of `addr` must be mapped.
pub unsafe fn write_shadow_dump<M: Mmap, L: ShadowLayout>(
    out: &mut dyn Write,
    addr: Addr,
) -> fmt::Result {
    let word = size_of::<Addr>();
    let shadow = ShadowMap::<M, L>::mem_to_shadow(addr);
    writeln!(out, "Shadow byte and word:")?;
    writeln!(out, "  {shadow:#018x}: {:02x}", unsafe {
        *(shadow as *const u8)
    })?;
    let aligned = shadow & !(word - 1);
    writeln!(out, "More shadow bytes:")?;
    for i in -4i64..=4 {
        let row = (aligned as i64 + i * word as i64) as Addr;
        let marker = if i == 0 { "=>" } else { "  " };
        write_shadow_row(out, marker, row)?;
    }
    Ok(())
}
