use core::{
    cell::UnsafeCell,
    ffi::c_void,
    sync::atomic::{AtomicUsize, Ordering},
};

use log::trace;

use crate::{Addr, check, rt, size_t};

const POOL_WORDS: usize = 1024;

/// `dlsym` calls `calloc` while we are still resolving the real functions;
/// those very early requests are served from a fixed pool. Nothing from here
/// is ever returned to a freelist.
struct BootstrapPool {
    words: UnsafeCell<[Addr; POOL_WORDS]>,
    used: AtomicUsize,
}

unsafe impl Sync for BootstrapPool {}

static POOL: BootstrapPool = BootstrapPool {
    words: UnsafeCell::new([0; POOL_WORDS]),
    used: AtomicUsize::new(0),
};

impl BootstrapPool {
    fn alloc(&self, bytes: usize) -> *mut c_void {
        let words = bytes.div_ceil(size_of::<Addr>());
        let start = self.used.fetch_add(words, Ordering::Relaxed);
        check!(start + words <= POOL_WORDS);
        unsafe { (self.words.get() as *mut Addr).add(start) as *mut c_void }
    }
}

pub(crate) fn in_pool(addr: Addr) -> bool {
    let base = POOL.words.get() as Addr;
    addr >= base && addr < base + POOL_WORDS * size_of::<Addr>()
}

/// Readable bytes left between `addr` and the end of the pool.
pub(crate) fn pool_tail(addr: Addr) -> usize {
    let end = POOL.words.get() as Addr + POOL_WORDS * size_of::<Addr>();
    end.saturating_sub(addr)
}

/// # Safety
/// See man pages
#[unsafe(export_name = "calloc")]
pub unsafe extern "C" fn calloc(nmemb: size_t, size: size_t) -> *mut c_void {
    trace!("calloc - nmemb: {nmemb:#x}, size: {size:#x}");
    if !rt::initialized() {
        return POOL.alloc(nmemb.saturating_mul(size));
    }
    rt::calloc(nmemb, size) as *mut c_void
}
