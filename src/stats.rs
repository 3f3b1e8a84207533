//! # stats
//! Process-wide allocation counters and per-log2 volume histograms, printed
//! with every report and optionally on normal exit.
use core::{
    fmt::{self, Write},
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::mmap::PAGE_SIZE;

const SIZE_CLASSES: usize = 64;

#[derive(Debug)]
pub struct AsanStats {
    pub mallocs: AtomicUsize,
    pub malloced: AtomicUsize,
    pub malloced_redzones: AtomicUsize,
    pub frees: AtomicUsize,
    pub freed: AtomicUsize,
    pub reallocs: AtomicUsize,
    pub realloced: AtomicUsize,
    pub real_frees: AtomicUsize,
    pub really_freed: AtomicUsize,
    pub mmaps: AtomicUsize,
    pub mmaped: AtomicUsize,
    pub malloc_large: AtomicUsize,
    pub malloc_small_slow: AtomicUsize,
    mmaped_by_size: [AtomicUsize; SIZE_CLASSES],
    malloced_by_size: [AtomicUsize; SIZE_CLASSES],
    freed_by_size: [AtomicUsize; SIZE_CLASSES],
    really_freed_by_size: [AtomicUsize; SIZE_CLASSES],
}

/// The process-wide instance. Counters are advanced under the subsystem locks
/// that own the corresponding operations; relaxed ordering is enough.
pub static STATS: AsanStats = AsanStats::new();

fn size_log2(size: usize) -> usize {
    (size.max(1).next_power_of_two().trailing_zeros() as usize).min(SIZE_CLASSES - 1)
}

impl AsanStats {
    pub const fn new() -> Self {
        AsanStats {
            mallocs: AtomicUsize::new(0),
            malloced: AtomicUsize::new(0),
            malloced_redzones: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
            freed: AtomicUsize::new(0),
            reallocs: AtomicUsize::new(0),
            realloced: AtomicUsize::new(0),
            real_frees: AtomicUsize::new(0),
            really_freed: AtomicUsize::new(0),
            mmaps: AtomicUsize::new(0),
            mmaped: AtomicUsize::new(0),
            malloc_large: AtomicUsize::new(0),
            malloc_small_slow: AtomicUsize::new(0),
            mmaped_by_size: [const { AtomicUsize::new(0) }; SIZE_CLASSES],
            malloced_by_size: [const { AtomicUsize::new(0) }; SIZE_CLASSES],
            freed_by_size: [const { AtomicUsize::new(0) }; SIZE_CLASSES],
            really_freed_by_size: [const { AtomicUsize::new(0) }; SIZE_CLASSES],
        }
    }

    pub fn note_malloc(&self, size: usize, redzone_bytes: usize) {
        self.mallocs.fetch_add(1, Ordering::Relaxed);
        self.malloced.fetch_add(size, Ordering::Relaxed);
        self.malloced_redzones.fetch_add(redzone_bytes, Ordering::Relaxed);
        self.malloced_by_size[size_log2(size)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_free(&self, size: usize) {
        self.frees.fetch_add(1, Ordering::Relaxed);
        self.freed.fetch_add(size, Ordering::Relaxed);
        self.freed_by_size[size_log2(size)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_realloc(&self, size: usize) {
        self.reallocs.fetch_add(1, Ordering::Relaxed);
        self.realloced.fetch_add(size, Ordering::Relaxed);
    }

    pub fn note_real_free(&self, size: usize) {
        self.real_frees.fetch_add(1, Ordering::Relaxed);
        self.really_freed.fetch_add(size, Ordering::Relaxed);
        self.really_freed_by_size[size_log2(size)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_mmap(&self, size: usize) {
        self.mmaps.fetch_add(1, Ordering::Relaxed);
        self.mmaped.fetch_add(size, Ordering::Relaxed);
        self.mmaped_by_size[size_log2(size)].fetch_add(1, Ordering::Relaxed);
    }

    fn write_histogram(
        &self,
        out: &mut dyn Write,
        name: &str,
        array: &[AtomicUsize; SIZE_CLASSES],
    ) -> fmt::Result {
        write!(out, "{name}")?;
        for (i, count) in array.iter().enumerate() {
            let count = count.load(Ordering::Relaxed);
            if count == 0 {
                continue;
            }
            write!(out, "{}:{:03}; ", i, (count << i) >> 20)?;
        }
        writeln!(out)
    }

    pub fn write(&self, out: &mut dyn Write) -> fmt::Result {
        writeln!(
            out,
            "Stats: {}M malloced ({}M for red zones) by {} calls",
            self.malloced.load(Ordering::Relaxed) >> 20,
            self.malloced_redzones.load(Ordering::Relaxed) >> 20,
            self.mallocs.load(Ordering::Relaxed)
        )?;
        writeln!(
            out,
            "Stats: {}M realloced by {} calls",
            self.realloced.load(Ordering::Relaxed) >> 20,
            self.reallocs.load(Ordering::Relaxed)
        )?;
        writeln!(
            out,
            "Stats: {}M freed by {} calls",
            self.freed.load(Ordering::Relaxed) >> 20,
            self.frees.load(Ordering::Relaxed)
        )?;
        writeln!(
            out,
            "Stats: {}M really freed by {} calls",
            self.really_freed.load(Ordering::Relaxed) >> 20,
            self.real_frees.load(Ordering::Relaxed)
        )?;
        let mmaped = self.mmaped.load(Ordering::Relaxed);
        writeln!(
            out,
            "Stats: {}M ({} pages) mmaped in {} calls",
            mmaped >> 20,
            mmaped / PAGE_SIZE,
            self.mmaps.load(Ordering::Relaxed)
        )?;
        self.write_histogram(out, " mmaps   by size: ", &self.mmaped_by_size)?;
        self.write_histogram(out, " mallocs by size: ", &self.malloced_by_size)?;
        self.write_histogram(out, " frees   by size: ", &self.freed_by_size)?;
        self.write_histogram(out, " rfrees  by size: ", &self.really_freed_by_size)?;
        writeln!(
            out,
            "Stats: malloc large: {} small slow: {}",
            self.malloc_large.load(Ordering::Relaxed),
            self.malloc_small_slow.load(Ordering::Relaxed)
        )
    }
}
