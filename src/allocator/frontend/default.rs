//! # default
//! The default frontend: redzone layout, chunk headers, shadow poisoning and
//! the quarantine. A chunk occupies `left_rz + round_up(len, G) + right_rz`
//! bytes of backend memory; the header lives in the last 32 bytes of the
//! left redzone, immediately below the payload, so it can always be found
//! from the payload address alone.
use alloc::collections::BTreeMap;
use core::{
    alloc::{GlobalAlloc, Layout},
    fmt::{self, Write},
    ptr,
};

use log::trace;
use thiserror::Error;

use crate::{
    Addr,
    allocator::frontend::{
        AllocatorFrontend,
        quarantine::{Quarantine, QuarantinedChunk},
    },
    options::MIN_REDZONE,
    shadow::{PoisonType, Shadow},
    stack::{StackDepot, StackTrace},
    stats::STATS,
};

const CHUNK_MAGIC: u16 = 0xc6a1;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Allocated = 1,
    Quarantined = 2,
    Freed = 3,
}

/// Stored immediately below the payload, inside the left redzone.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct ChunkHeader {
    magic: u16,
    state: u8,
    align_log2: u8,
    alloc_tid: u32,
    size: usize,
    chunk_offset: u32,
    alloc_stack: u32,
    free_stack: u32,
    free_tid: u32,
}

const HEADER_SIZE: usize = size_of::<ChunkHeader>();
const _: () = assert!(HEADER_SIZE == 32);
const _: () = assert!(HEADER_SIZE <= MIN_REDZONE);

#[derive(Debug, Clone, Copy)]
struct ChunkRecord {
    base: Addr,
    total: usize,
}

#[derive(Debug)]
pub struct DefaultFrontend<B: GlobalAlloc, S: Shadow> {
    backend: B,
    shadow: S,
    depot: StackDepot,
    chunks: BTreeMap<Addr, ChunkRecord>,
    quarantine: Quarantine,
    redzone: usize,
    poison_shadow: bool,
}

const fn round_up(value: usize, to: usize) -> usize {
    (value + to - 1) & !(to - 1)
}

unsafe fn read_header(payload: Addr) -> ChunkHeader {
    unsafe { ptr::read((payload - HEADER_SIZE) as *const ChunkHeader) }
}

unsafe fn write_header(payload: Addr, header: &ChunkHeader) {
    unsafe { ptr::write((payload - HEADER_SIZE) as *mut ChunkHeader, *header) };
}

impl<B: GlobalAlloc + Send, S: Shadow> DefaultFrontend<B, S> {
    pub const DEFAULT_REDZONE_SIZE: usize = 128;
    pub const DEFAULT_QUARANTINE_SIZE: usize = 1 << 28;

    pub fn new(
        backend: B,
        shadow: S,
        redzone: usize,
        quarantine_size: usize,
        poison_shadow: bool,
    ) -> Result<Self, DefaultFrontendError<S>> {
        if redzone < MIN_REDZONE || !redzone.is_power_of_two() {
            return Err(DefaultFrontendError::InvalidRedzone(redzone));
        }
        Ok(DefaultFrontend {
            backend,
            shadow,
            depot: StackDepot::new(),
            chunks: BTreeMap::new(),
            quarantine: Quarantine::new(quarantine_size),
            redzone,
            poison_shadow,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn shadow(&self) -> &S {
        &self.shadow
    }

    pub fn depot(&self) -> &StackDepot {
        &self.depot
    }

    pub fn quarantine(&self) -> &Quarantine {
        &self.quarantine
    }

    pub fn redzone(&self) -> usize {
        self.redzone
    }

    fn paint_allocated(
        &mut self,
        base: Addr,
        payload: Addr,
        len: usize,
    ) -> Result<(), DefaultFrontendError<S>> {
        if !self.poison_shadow {
            return Ok(());
        }
        let rounded = round_up(len, S::GRANULARITY);
        self.shadow
            .poison(base, payload - base, PoisonType::AsanHeapLeftRz)
            .map_err(DefaultFrontendError::Shadow)?;
        self.shadow
            .unpoison(payload, len)
            .map_err(DefaultFrontendError::Shadow)?;
        self.shadow
            .poison(payload + rounded, self.redzone, PoisonType::AsanHeapRightRz)
            .map_err(DefaultFrontendError::Shadow)?;
        Ok(())
    }

    /// Move one quarantined chunk to the FREED state and hand its memory
    /// back to the backend: payload shadow re-zeroed, redzones left in
    /// place, large mappings returned to the kernel by the backend.
    fn finish_free(&mut self, chunk: QuarantinedChunk) -> Result<(), DefaultFrontendError<S>> {
        let Some(record) = self.chunks.remove(&chunk.payload) else {
            return Err(DefaultFrontendError::CorruptHeader(chunk.payload));
        };
        let mut header = unsafe { read_header(chunk.payload) };
        header.state = ChunkState::Freed as u8;
        unsafe { write_header(chunk.payload, &header) };
        if self.poison_shadow {
            let rounded = round_up(header.size.max(1), S::GRANULARITY);
            self.shadow
                .unpoison(chunk.payload, rounded)
                .map_err(DefaultFrontendError::Shadow)?;
        }
        let layout = unsafe { Layout::from_size_align_unchecked(record.total, S::GRANULARITY) };
        unsafe { self.backend.dealloc(record.base as *mut u8, layout) };
        STATS.note_real_free(header.size);
        Ok(())
    }

    /// State of the chunk owning `addr`, if `addr` is its exact payload
    /// address.
    pub fn chunk_state(&self, addr: Addr) -> Option<ChunkState> {
        self.chunks.get(&addr)?;
        let header = unsafe { read_header(addr) };
        match header.state {
            1 => Some(ChunkState::Allocated),
            2 => Some(ChunkState::Quarantined),
            3 => Some(ChunkState::Freed),
            _ => None,
        }
    }

    fn write_stack(&self, out: &mut dyn Write, id: u32) -> fmt::Result {
        match self.depot.get(id) {
            Some(trace) => {
                for (i, pc) in trace.frames().iter().enumerate() {
                    writeln!(out, "    #{i} {pc:#x}")?;
                }
                Ok(())
            }
            None => writeln!(out, "    <no stack recorded>"),
        }
    }

    /// Describe `addr` relative to the nearest chunk, with the allocation
    /// (and free) stacks. Returns false when no chunk is anywhere near.
    pub fn describe_addr(&self, addr: Addr, out: &mut dyn Write) -> Result<bool, fmt::Error> {
        let below = self
            .chunks
            .range(..=addr)
            .next_back()
            .map(|(&payload, _)| payload);
        let above = self
            .chunks
            .range(addr.saturating_add(1)..)
            .next()
            .map(|(&payload, _)| payload);

        // Prefer the chunk containing the address, otherwise the closer
        // neighbour.
        let payload = match (below, above) {
            (Some(b), _) if addr < b + unsafe { read_header(b) }.size.max(1) => b,
            (Some(b), Some(a)) => {
                let end = b + unsafe { read_header(b) }.size;
                if addr - end <= a - addr { b } else { a }
            }
            (Some(b), None) => b,
            (None, Some(a)) => a,
            (None, None) => return Ok(false),
        };

        let header = unsafe { read_header(payload) };
        let size = header.size;
        let end = payload + size;
        if addr < payload {
            writeln!(
                out,
                "{addr:#x} is located {} bytes to the left of {size}-byte region [{payload:#x},{end:#x})",
                payload - addr
            )?;
        } else if addr >= end {
            writeln!(
                out,
                "{addr:#x} is located {} bytes to the right of {size}-byte region [{payload:#x},{end:#x})",
                addr - end
            )?;
        } else {
            writeln!(
                out,
                "{addr:#x} is located {} bytes inside of {size}-byte region [{payload:#x},{end:#x})",
                addr - payload
            )?;
        }
        if header.state == ChunkState::Allocated as u8 {
            writeln!(out, "allocated by thread T{} here:", header.alloc_tid)?;
            self.write_stack(out, header.alloc_stack)?;
        } else {
            writeln!(out, "freed by thread T{} here:", header.free_tid)?;
            self.write_stack(out, header.free_stack)?;
            writeln!(
                out,
                "previously allocated by thread T{} here:",
                header.alloc_tid
            )?;
            self.write_stack(out, header.alloc_stack)?;
        }
        Ok(true)
    }

    /// Write the alloc (and, for non-live chunks, free) stacks for an exact
    /// payload address; used by the invalid-free report.
    pub fn describe_free_site(&self, addr: Addr, out: &mut dyn Write) -> fmt::Result {
        if self.chunks.get(&addr).is_none() {
            return Ok(());
        }
        let header = unsafe { read_header(addr) };
        if header.state != ChunkState::Allocated as u8 {
            writeln!(out, "freed by thread T{} here:", header.free_tid)?;
            self.write_stack(out, header.free_stack)?;
        }
        writeln!(out, "allocated by thread T{} here:", header.alloc_tid)?;
        self.write_stack(out, header.alloc_stack)
    }
}

impl<B: GlobalAlloc + Send, S: Shadow> AllocatorFrontend for DefaultFrontend<B, S> {
    type Error = DefaultFrontendError<S>;

    fn alloc(
        &mut self,
        len: usize,
        align: usize,
        tid: u32,
        stack: &StackTrace,
    ) -> Result<Addr, Self::Error> {
        trace!("alloc - len: {len:#x}, align: {align:#x}");
        let align = if align == 0 { S::GRANULARITY } else { align };
        if !align.is_power_of_two() {
            return Err(DefaultFrontendError::InvalidAlignment(align));
        }
        let align = align.max(S::GRANULARITY);
        let rounded = round_up(len.max(1), S::GRANULARITY);
        // Backend chunks are only guaranteed granularity-aligned; any larger
        // alignment is bought with slack and taken out of the left redzone.
        let slack = if align > S::GRANULARITY { align } else { 0 };
        let total = self.redzone + slack + rounded + self.redzone;
        let layout = Layout::from_size_align(total, S::GRANULARITY)
            .map_err(|_| DefaultFrontendError::AllocationFailed(len))?;
        let base = unsafe { self.backend.alloc(layout) } as Addr;
        if base == 0 {
            return Err(DefaultFrontendError::AllocationFailed(len));
        }
        let payload = round_up(base + self.redzone, align);

        let header = ChunkHeader {
            magic: CHUNK_MAGIC,
            state: ChunkState::Allocated as u8,
            align_log2: align.trailing_zeros() as u8,
            alloc_tid: tid,
            size: len,
            chunk_offset: (payload - base) as u32,
            alloc_stack: self.depot.intern(stack),
            free_stack: u32::MAX,
            free_tid: 0,
        };
        unsafe { write_header(payload, &header) };
        self.paint_allocated(base, payload, len.max(1))?;
        self.chunks.insert(payload, ChunkRecord { base, total });
        STATS.note_malloc(len, total - rounded);
        Ok(payload)
    }

    fn dealloc(&mut self, addr: Addr, tid: u32, stack: &StackTrace) -> Result<(), Self::Error> {
        trace!("dealloc - addr: {addr:#x}");
        if addr == 0 {
            return Ok(());
        }
        let Some(&record) = self.chunks.get(&addr) else {
            return Err(DefaultFrontendError::InvalidFree(addr));
        };
        let mut header = unsafe { read_header(addr) };
        if header.magic != CHUNK_MAGIC || record.base + header.chunk_offset as usize != addr {
            return Err(DefaultFrontendError::CorruptHeader(addr));
        }
        match header.state {
            s if s == ChunkState::Allocated as u8 => {}
            s if s == ChunkState::Quarantined as u8 => {
                return Err(DefaultFrontendError::DoubleFree(addr));
            }
            _ => return Err(DefaultFrontendError::InvalidFree(addr)),
        }

        header.state = ChunkState::Quarantined as u8;
        header.free_stack = self.depot.intern(stack);
        header.free_tid = tid;
        unsafe { write_header(addr, &header) };
        if self.poison_shadow {
            let rounded = round_up(header.size.max(1), S::GRANULARITY);
            self.shadow
                .poison(addr, rounded, PoisonType::AsanHeapFreed)
                .map_err(DefaultFrontendError::Shadow)?;
        }
        self.quarantine.push(QuarantinedChunk {
            payload: addr,
            bytes: record.total,
        });
        STATS.note_free(header.size);

        while let Some(chunk) = self.quarantine.evict() {
            self.finish_free(chunk)?;
        }
        Ok(())
    }

    fn realloc(
        &mut self,
        addr: Addr,
        len: usize,
        tid: u32,
        stack: &StackTrace,
    ) -> Result<Addr, Self::Error> {
        trace!("realloc - addr: {addr:#x}, len: {len:#x}");
        if addr == 0 {
            return self.alloc(len, 0, tid, stack);
        }
        if len == 0 {
            self.dealloc(addr, tid, stack)?;
            return Ok(0);
        }
        let old_size = self.get_size(addr)?;
        // Always move; a stale reference to the old location keeps faulting
        // for the whole quarantine window.
        let new = self.alloc(len, 0, tid, stack)?;
        unsafe {
            ptr::copy_nonoverlapping(addr as *const u8, new as *mut u8, old_size.min(len));
        }
        self.dealloc(addr, tid, stack)?;
        STATS.note_realloc(len);
        Ok(new)
    }

    fn get_size(&self, addr: Addr) -> Result<usize, Self::Error> {
        if self.chunk_state(addr) != Some(ChunkState::Allocated) {
            return Err(DefaultFrontendError::NoSuchAllocation(addr));
        }
        Ok(unsafe { read_header(addr) }.size)
    }
}

#[derive(Error, Debug)]
pub enum DefaultFrontendError<S: Shadow> {
    #[error("Invalid alignment: {0}")]
    InvalidAlignment(usize),
    #[error("Invalid redzone: {0}")]
    InvalidRedzone(usize),
    #[error("Allocation failed - len: {0:#x}")]
    AllocationFailed(usize),
    #[error("Invalid free - addr: {0:#x}")]
    InvalidFree(Addr),
    #[error("Double free - addr: {0:#x}")]
    DoubleFree(Addr),
    #[error("No such allocation - addr: {0:#x}")]
    NoSuchAllocation(Addr),
    #[error("Corrupt chunk header - addr: {0:#x}")]
    CorruptHeader(Addr),
    #[error("Shadow error: {0:?}")]
    Shadow(S::Error),
}
