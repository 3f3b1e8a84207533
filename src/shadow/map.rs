//! # map
//! The shadow map proper: a fixed partition of the virtual address space into
//! LowMem, LowShadow, ShadowGap, HighShadow and HighMem, with the arithmetic
//! mapping `shadow(a) = (a >> SCALE) + OFFSET`. The mapping is a contiguous
//! bijection so the compiler can inline the check in two instructions; the
//! shadow of any shadow address lands inside the gap, which stays `PROT_NONE`
//! so shadow-of-shadow accesses trap.
use core::{fmt::Debug, marker::PhantomData, ptr::write_bytes};

use log::debug;
use thiserror::Error;

use crate::{
    Addr,
    mmap::{Mmap, MmapProt, PAGE_SIZE},
    shadow::{PoisonType, Shadow},
};

/// Chunk granule used when paging shadow in lazily from the fault handler.
pub const LAZY_MAP_CHUNK: usize = PAGE_SIZE << 10;

pub trait ShadowLayout: Debug + Send + 'static {
    const SCALE: usize;
    const OFFSET: Addr;

    const LOW_MEM_BEG: Addr;
    const LOW_MEM_END: Addr;
    const LOW_SHADOW_BEG: Addr;
    const LOW_SHADOW_END: Addr;
    const SHADOW_GAP_BEG: Addr;
    const SHADOW_GAP_END: Addr;
    const HIGH_SHADOW_BEG: Addr;
    const HIGH_SHADOW_END: Addr;
    const HIGH_MEM_BEG: Addr;
    const HIGH_MEM_END: Addr;

    const GRANULARITY: usize = 1 << Self::SCALE;
}

/// The 64-bit layout: 3-bit scale, shadow offset at `1 << 44`, 47-bit user
/// address space.
#[derive(Debug)]
pub struct DefaultShadowLayout;

impl ShadowLayout for DefaultShadowLayout {
    const SCALE: usize = 3;
    const OFFSET: Addr = 0x0000_1000_0000_0000;

    const LOW_MEM_BEG: Addr = 0;
    const LOW_MEM_END: Addr = 0x0000_0fff_ffff_ffff;
    const LOW_SHADOW_BEG: Addr = 0x0000_1000_0000_0000;
    const LOW_SHADOW_END: Addr = 0x0000_11ff_ffff_ffff;
    const SHADOW_GAP_BEG: Addr = 0x0000_1200_0000_0000;
    const SHADOW_GAP_END: Addr = 0x0000_1dff_ffff_ffff;
    const HIGH_SHADOW_BEG: Addr = 0x0000_1e00_0000_0000;
    const HIGH_SHADOW_END: Addr = 0x0000_1fff_ffff_ffff;
    const HIGH_MEM_BEG: Addr = 0x0000_7000_0000_0000;
    const HIGH_MEM_END: Addr = 0x0000_7fff_ffff_ffff;
}

#[derive(Debug)]
pub struct ShadowMap<M: Mmap, L: ShadowLayout> {
    _phantom: PhantomData<(M, L)>,
}

impl<M: Mmap, L: ShadowLayout> ShadowMap<M, L> {
    /// Reserve the shadow regions. Eager mode maps LowShadow (plus one guard
    /// page below it) and HighShadow read-write up front; lazy mode leaves
    /// them unmapped for the fault handler to page in. The gap is reserved
    /// inaccessible in both modes.
    pub fn reserve(lazy: bool) -> Result<Self, ShadowReserveError<M>> {
        if !lazy {
            if L::LOW_SHADOW_BEG != L::LOW_SHADOW_END {
                let beg = L::LOW_SHADOW_BEG - PAGE_SIZE;
                M::map_at(beg, L::LOW_SHADOW_END + 1 - beg, MmapProt::READ | MmapProt::WRITE)
                    .map_err(ShadowReserveError::FailedToMapShadow)?;
            }
            M::map_at(
                L::HIGH_SHADOW_BEG,
                L::HIGH_SHADOW_END + 1 - L::HIGH_SHADOW_BEG,
                MmapProt::READ | MmapProt::WRITE,
            )
            .map_err(ShadowReserveError::FailedToMapShadow)?;
        }
        M::map_at(
            L::SHADOW_GAP_BEG,
            L::SHADOW_GAP_END + 1 - L::SHADOW_GAP_BEG,
            MmapProt::empty(),
        )
        .map_err(ShadowReserveError::FailedToProtectGap)?;
        debug!(
            "shadow reserved - low: [{:#x}, {:#x}], high: [{:#x}, {:#x}], lazy: {}",
            L::LOW_SHADOW_BEG,
            L::LOW_SHADOW_END,
            L::HIGH_SHADOW_BEG,
            L::HIGH_SHADOW_END,
            lazy
        );
        Ok(ShadowMap {
            _phantom: PhantomData,
        })
    }

    /// A second handle onto an already reserved map, for subsystems that
    /// paint disjoint ranges under their own locks.
    ///
    /// # Safety
    /// `reserve` must have succeeded in this process.
    pub unsafe fn attach() -> Self {
        ShadowMap {
            _phantom: PhantomData,
        }
    }

    pub const fn mem_to_shadow(addr: Addr) -> Addr {
        (addr >> L::SCALE) + L::OFFSET
    }

    pub const fn align_down(addr: Addr) -> Addr {
        addr & !(L::GRANULARITY - 1)
    }

    pub const fn align_up(addr: Addr) -> Addr {
        (addr + L::GRANULARITY - 1) & !(L::GRANULARITY - 1)
    }

    pub fn is_memory(addr: Addr, len: usize) -> bool {
        if len == 0 {
            return Self::is_mem_byte(addr);
        }
        let Some(last) = addr.checked_add(len - 1) else {
            return false;
        };
        (addr >= L::LOW_MEM_BEG && last <= L::LOW_MEM_END)
            || (addr >= L::HIGH_MEM_BEG && last <= L::HIGH_MEM_END)
    }

    fn is_mem_byte(addr: Addr) -> bool {
        addr <= L::LOW_MEM_END || (addr >= L::HIGH_MEM_BEG && addr <= L::HIGH_MEM_END)
    }

    /// True if `addr` lies in a pageable shadow region (not the gap).
    pub fn is_shadow(addr: Addr) -> bool {
        (addr >= L::LOW_SHADOW_BEG && addr <= L::LOW_SHADOW_END)
            || (addr >= L::HIGH_SHADOW_BEG && addr <= L::HIGH_SHADOW_END)
    }

    /// Map one lazy chunk around a faulting shadow address read-write. Called
    /// from the SEGV handler; uses nothing but `mmap`.
    pub fn page_in(addr: Addr) -> Result<(), M::Error> {
        let chunk = addr & !(LAZY_MAP_CHUNK - 1);
        M::map_at(chunk, LAZY_MAP_CHUNK, MmapProt::READ | MmapProt::WRITE)
    }

    /// Read one shadow byte without a handle. Used by the reporter, which
    /// runs after the runtime is initialized by definition.
    ///
    /// # Safety
    /// The shadow must be reserved and `addr` must be an application address.
    pub unsafe fn shadow_byte_raw(addr: Addr) -> u8 {
        unsafe { *(Self::mem_to_shadow(addr) as *const u8) }
    }

    fn check_range(start: Addr, len: usize) -> Result<(), ShadowError> {
        if !Self::is_memory(start, len) {
            return Err(ShadowError::InvalidMemoryAddress(start));
        }
        Ok(())
    }
}

impl<M: Mmap, L: ShadowLayout> Shadow for ShadowMap<M, L> {
    type Error = ShadowError;

    const GRANULARITY: usize = L::GRANULARITY;

    fn poison(&mut self, start: Addr, len: usize, val: PoisonType) -> Result<(), Self::Error> {
        if len == 0 {
            return Ok(());
        }
        Self::check_range(start, len)?;
        if start & (L::GRANULARITY - 1) != 0 {
            return Err(ShadowError::UnalignedStartAddress(start));
        }
        if (start + len) & (L::GRANULARITY - 1) != 0 {
            return Err(ShadowError::UnalignedEndAddress(start, len));
        }
        let shadow = Self::mem_to_shadow(start) as *mut u8;
        unsafe { write_bytes(shadow, val.byte(), len >> L::SCALE) };
        Ok(())
    }

    fn unpoison(&mut self, start: Addr, len: usize) -> Result<(), Self::Error> {
        if len == 0 {
            return Ok(());
        }
        Self::check_range(start, len)?;
        if start & (L::GRANULARITY - 1) != 0 {
            return Err(ShadowError::UnalignedStartAddress(start));
        }
        let shadow = Self::mem_to_shadow(start) as *mut u8;
        let full = len >> L::SCALE;
        let partial = len & (L::GRANULARITY - 1);
        unsafe {
            write_bytes(shadow, 0, full);
            if partial != 0 {
                *shadow.add(full) = partial as u8;
            }
        }
        Ok(())
    }

    fn is_poison(&self, start: Addr, len: usize) -> Result<bool, Self::Error> {
        if len == 0 {
            return Ok(false);
        }
        Self::check_range(start, len)?;
        let mut addr = start;
        let end = start + len;
        while addr < end {
            let byte = unsafe { Self::shadow_byte_raw(addr) };
            let in_word = addr & (L::GRANULARITY - 1);
            match byte {
                0 => addr += L::GRANULARITY - in_word,
                1..=7 => {
                    // Only the first `byte` bytes of this word are good; the
                    // part of the request inside it must fit below that mark.
                    let word_end = addr + (L::GRANULARITY - in_word);
                    let want_end = end.min(word_end);
                    if (want_end - 1) & (L::GRANULARITY - 1) >= byte as usize {
                        return Ok(true);
                    }
                    addr = word_end;
                }
                _ => return Ok(true),
            }
        }
        Ok(false)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ShadowError {
    #[error("Invalid memory address: {0:#x}")]
    InvalidMemoryAddress(Addr),
    #[error("Unaligned start address: {0:#x}")]
    UnalignedStartAddress(Addr),
    #[error("Unaligned end address - start: {0:#x}, len: {1:#x}")]
    UnalignedEndAddress(Addr, usize),
}

#[derive(Error, Debug)]
pub enum ShadowReserveError<M: Mmap> {
    #[error("Failed to map shadow: {0:?}")]
    FailedToMapShadow(M::Error),
    #[error("Failed to protect gap: {0:?}")]
    FailedToProtectGap(M::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmap::linux::LinuxMmap;

    type L = DefaultShadowLayout;
    type SM = ShadowMap<LinuxMmap, L>;

    #[test]
    fn mapping_is_arithmetic() {
        assert_eq!(SM::mem_to_shadow(0), L::OFFSET);
        assert_eq!(SM::mem_to_shadow(8), L::OFFSET + 1);
        assert_eq!(
            SM::mem_to_shadow(L::HIGH_MEM_END),
            L::HIGH_SHADOW_END,
        );
    }

    #[test]
    fn mapping_is_bijective_mod_granularity() {
        let a = 0x7000_dead_bee8usize;
        for d in 0..8 {
            assert_eq!(SM::mem_to_shadow(a), SM::mem_to_shadow(a + d));
        }
        assert_ne!(SM::mem_to_shadow(a), SM::mem_to_shadow(a + 8));
    }

    #[test]
    fn shadow_of_shadow_is_in_gap() {
        for addr in [
            L::LOW_SHADOW_BEG,
            L::LOW_SHADOW_END,
            L::HIGH_SHADOW_BEG,
            L::HIGH_SHADOW_END,
        ] {
            let s = SM::mem_to_shadow(addr);
            assert!(s >= L::SHADOW_GAP_BEG && s <= L::SHADOW_GAP_END, "{s:#x}");
        }
    }

    #[test]
    fn shadow_of_memory_is_in_shadow() {
        for addr in [L::LOW_MEM_BEG, L::LOW_MEM_END] {
            let s = SM::mem_to_shadow(addr);
            assert!(s >= L::LOW_SHADOW_BEG && s <= L::LOW_SHADOW_END);
        }
        for addr in [L::HIGH_MEM_BEG, L::HIGH_MEM_END] {
            let s = SM::mem_to_shadow(addr);
            assert!(s >= L::HIGH_SHADOW_BEG && s <= L::HIGH_SHADOW_END);
        }
    }

    #[test]
    fn region_bounds() {
        assert!(!SM::is_memory(L::LOW_MEM_END, 2));
        assert!(SM::is_memory(L::HIGH_MEM_BEG, 16));
        assert!(!SM::is_memory(L::SHADOW_GAP_BEG, 1));
        assert!(SM::is_shadow(L::LOW_SHADOW_BEG));
        assert!(SM::is_shadow(L::HIGH_SHADOW_END));
        assert!(!SM::is_shadow(L::SHADOW_GAP_BEG));
    }
}
