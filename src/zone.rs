//! # zone
//! Hosts with a malloc-zone registry treat the process allocator as a
//! polymorphic component with a small capability set. We model that set as a
//! trait and provide the one implementation that delegates to the runtime
//! allocator; registering it with the host registry is platform plumbing
//! outside this crate.
use core::fmt::Debug;

use crate::{Addr, rt};

pub trait AllocatorZone: Debug + Send {
    /// Size of the allocation owning `addr`, or 0 when it is not ours.
    fn size(&self, addr: Addr) -> usize;
    fn malloc(&self, len: usize) -> Addr;
    fn calloc(&self, nmemb: usize, len: usize) -> Addr;
    fn valloc(&self, len: usize) -> Addr;
    fn realloc(&self, addr: Addr, len: usize) -> Addr;
    fn free(&self, addr: Addr);
    fn memalign(&self, align: usize, len: usize) -> Addr;
}

/// The process-default zone: every capability lands on the instrumented
/// allocator.
#[derive(Debug, Default)]
pub struct RuntimeZone;

impl AllocatorZone for RuntimeZone {
    fn size(&self, addr: Addr) -> usize {
        rt::usable_size(addr)
    }

    fn malloc(&self, len: usize) -> Addr {
        rt::malloc(len)
    }

    fn calloc(&self, nmemb: usize, len: usize) -> Addr {
        rt::calloc(nmemb, len)
    }

    fn valloc(&self, len: usize) -> Addr {
        rt::memalign(crate::mmap::PAGE_SIZE, len)
    }

    fn realloc(&self, addr: Addr, len: usize) -> Addr {
        rt::realloc(addr, len)
    }

    fn free(&self, addr: Addr) {
        rt::free(addr)
    }

    fn memalign(&self, align: usize, len: usize) -> Addr {
        rt::memalign(align, len)
    }
}
