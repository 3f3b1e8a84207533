//! # mmap
//! Raw virtual-memory plumbing behind a trait so that the shadow map and the
//! slab backend can be exercised against test reservations as well as the
//! real host implementation.
use core::fmt::Debug;

use bitflags::bitflags;

use crate::Addr;

#[cfg(all(feature = "linux", target_os = "linux"))]
pub mod linux;

/// Host page size. The runtime only targets 4 KiB-page configurations.
pub const PAGE_SIZE: usize = 4096;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MmapProt: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
    }
}

pub trait Mmap: Debug + Send + Sized {
    type Error: Debug;

    /// Map `len` bytes of zeroed read-write memory at a kernel-chosen
    /// address. Unmapped on drop.
    fn map(len: usize) -> Result<Self, Self::Error>;

    /// Map `len` bytes at exactly `addr` (`MAP_FIXED | MAP_NORESERVE`). The
    /// mapping is never reclaimed; callers use this for reservations that
    /// live for the rest of the process.
    fn map_at(addr: Addr, len: usize, prot: MmapProt) -> Result<(), Self::Error>;

    /// Return `[addr, addr + len)` to the kernel.
    ///
    /// # Safety
    /// The range must be a mapping obtained from this trait and no longer
    /// referenced.
    unsafe fn unmap(addr: Addr, len: usize) -> Result<(), Self::Error>;

    fn as_slice(&self) -> &[u8];

    fn as_mut_slice(&mut self) -> &mut [u8];

    /// Give up ownership; the mapping leaks and the base address is returned.
    fn into_raw(self) -> Addr {
        let addr = self.as_slice().as_ptr() as Addr;
        core::mem::forget(self);
        addr
    }
}
