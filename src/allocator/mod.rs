//! # allocator
//! The instrumented heap, split the same way as the rest of the runtime:
//! a raw backend hands out chunk memory (size-classed freelists over mmap)
//! and the frontend layers the sanitizer semantics on top: redzones, shadow
//! poisoning, chunk headers, quarantine and address description.
pub mod backend;
pub mod frontend;

/// Requests at or above this many bytes bypass the size classes and are
/// mapped (and later unmapped) directly.
pub const DEFAULT_LARGE_MALLOC: usize = 1 << 31;
