//! # asan_rt
//! The runtime core of an address sanitizer for native programs. The
//! compiler pass rewrites every load and store to consult a shadow map and
//! calls into this crate when a check fails; the runtime provides the shadow
//! map itself, a redzone/quarantine allocator replacing the process heap, a
//! registry of instrumented globals, per-thread stack bookkeeping and the
//! fault-reporting pipeline that turns a bad access into a human-readable
//! report before aborting.
//!
//! The crate is `no_std` so that it can be linked into arbitrary target
//! processes; the allocating collections it uses internally are routed to its
//! own mmap-backed slab allocator by the `global_alloc` feature rather than
//! to the intercepted heap.
#![no_std]
#![allow(clippy::missing_safety_doc)]

extern crate alloc;

pub mod allocator;
pub mod globals;
pub mod mmap;
pub mod options;
pub mod shadow;
pub mod stack;
pub mod stats;
pub mod symbols;

#[cfg(all(feature = "hooks", target_os = "linux"))]
pub mod hooks;
#[cfg(all(feature = "linux", target_os = "linux"))]
pub mod logger;
#[cfg(all(feature = "linux", target_os = "linux"))]
pub mod output;
#[cfg(all(feature = "linux", target_os = "linux"))]
pub mod report;
#[cfg(all(feature = "linux", target_os = "linux"))]
pub mod rt;
#[cfg(all(feature = "linux", target_os = "linux"))]
pub mod signals;
#[cfg(all(feature = "linux", target_os = "linux"))]
pub mod thread;
#[cfg(all(feature = "linux", target_os = "linux"))]
pub mod zone;

/// An address in the instrumented process.
pub type Addr = usize;

#[expect(non_camel_case_types)]
pub type size_t = usize;

/// Fixed redzone applied by the compiler to globals and stack frames. The
/// heap redzone is configurable at runtime; this one is baked into the
/// generated code and must match the instrumentation.
pub const GLOBAL_AND_STACK_REDZONE: usize = 32;

/// Word stamped by the instrumentation at the base of every described stack
/// frame; the following word points at the frame-descriptor string.
pub const FRAME_MAGIC: Addr = 0x41B58AB3;

#[cfg(all(feature = "global_alloc", target_os = "linux"))]
#[global_allocator]
static GLOBAL_BACKEND: allocator::backend::slab::SlabBackend<mmap::linux::LinuxMmap> =
    allocator::backend::slab::SlabBackend::new(allocator::DEFAULT_LARGE_MALLOC);

#[cfg(all(feature = "panic_handler", feature = "linux", target_os = "linux", not(test)))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    use core::fmt::Write;

    let mut buf = output::LineBuffer::new();
    let _ = write!(buf, "=={}== AddressSanitizer runtime panic: {}", output::pid(), info);
    buf.flush();
    unsafe { libc::abort() }
}
