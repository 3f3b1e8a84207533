//! # slab
//! Power-of-two size classes over anonymous mappings. Each class keeps a
//! singly-linked freelist threaded through the first word of each free
//! chunk, so allocation from a warm class is a pop and the backend itself
//! never allocates. A cold class is refilled by carving a fresh super-chunk.
//! Requests at or above the large threshold are mapped directly and returned
//! to the kernel on dealloc.
use core::{
    alloc::{GlobalAlloc, Layout},
    marker::PhantomData,
    ptr::null_mut,
    sync::atomic::Ordering,
};

use spin::Mutex;

use crate::{
    Addr,
    mmap::{Mmap, PAGE_SIZE},
    stats::STATS,
};

const NUM_CLASSES: usize = 48;
const MIN_CLASS_LOG: usize = 6;
const SUPER_CHUNK: usize = 1 << 20;

#[derive(Debug)]
struct SlabState {
    free: [Addr; NUM_CLASSES],
}

#[derive(Debug)]
pub struct SlabBackend<M: Mmap> {
    state: Mutex<SlabState>,
    large_threshold: usize,
    _phantom: PhantomData<fn() -> M>,
}

const fn round_up(value: usize, to: usize) -> usize {
    (value + to - 1) & !(to - 1)
}

impl<M: Mmap> SlabBackend<M> {
    pub const fn new(large_threshold: usize) -> Self {
        SlabBackend {
            state: Mutex::new(SlabState {
                free: [0; NUM_CLASSES],
            }),
            large_threshold,
            _phantom: PhantomData,
        }
    }

    pub fn large_threshold(&self) -> usize {
        self.large_threshold
    }

    /// Class index covering `len` bytes at `align`. Chunk bases are aligned
    /// to `min(chunk_size, PAGE_SIZE)`, so alignment is satisfied by bumping
    /// the class; alignment beyond a page is not supported here.
    fn class_for(len: usize, align: usize) -> Option<usize> {
        if align > PAGE_SIZE {
            return None;
        }
        let size = len.max(1).max(align).next_power_of_two();
        let class = size.trailing_zeros() as usize;
        Some(class.max(MIN_CLASS_LOG))
    }

    fn is_large(&self, len: usize) -> bool {
        len >= self.large_threshold
    }

    fn pop(state: &mut SlabState, class: usize) -> Option<Addr> {
        let head = state.free[class];
        if head == 0 {
            return None;
        }
        state.free[class] = unsafe { *(head as *const Addr) };
        Some(head)
    }

    fn push(state: &mut SlabState, class: usize, chunk: Addr) {
        unsafe { *(chunk as *mut Addr) = state.free[class] };
        state.free[class] = chunk;
    }

    /// Map a super-chunk, thread all but one of its chunks onto the freelist
    /// and return the remaining one.
    fn carve(state: &mut SlabState, class: usize) -> Option<Addr> {
        let chunk_size = 1 << class;
        let region_len = chunk_size.max(SUPER_CHUNK);
        let base = M::map(region_len).ok()?.into_raw();
        STATS.note_mmap(region_len);
        STATS.malloc_small_slow.fetch_add(1, Ordering::Relaxed);
        for offset in (chunk_size..region_len).step_by(chunk_size) {
            Self::push(state, class, base + offset);
        }
        Some(base)
    }
}

unsafe impl<M: Mmap> GlobalAlloc for SlabBackend<M> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if self.is_large(layout.size()) || layout.align() > PAGE_SIZE {
            if layout.align() > PAGE_SIZE {
                return null_mut();
            }
            let len = round_up(layout.size(), PAGE_SIZE);
            let Ok(map) = M::map(len) else {
                return null_mut();
            };
            STATS.note_mmap(len);
            STATS.malloc_large.fetch_add(1, Ordering::Relaxed);
            return map.into_raw() as *mut u8;
        }
        let Some(class) = Self::class_for(layout.size(), layout.align()) else {
            return null_mut();
        };
        let mut state = self.state.lock();
        match Self::pop(&mut state, class).or_else(|| Self::carve(&mut state, class)) {
            Some(chunk) => chunk as *mut u8,
            None => null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if ptr.is_null() {
            return;
        }
        if self.is_large(layout.size()) {
            let len = round_up(layout.size(), PAGE_SIZE);
            let _ = unsafe { M::unmap(ptr as Addr, len) };
            return;
        }
        let Some(class) = Self::class_for(layout.size(), layout.align()) else {
            return;
        };
        let mut state = self.state.lock();
        Self::push(&mut state, class, ptr as Addr);
    }
}
