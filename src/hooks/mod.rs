//! # hooks
//! Interceptors replacing the host allocation entry points and a handful of
//! control-flow primitives, exported under the real symbol names for the
//! dynamic linker to interpose. One file per hook. Only compiled into the
//! preload build; a test binary must never export `malloc`.
pub mod calloc;
pub mod cxa_throw;
pub mod cxx;
pub mod free;
pub mod longjmp;
pub mod malloc;
pub mod memalign;
pub mod posix_memalign;
pub mod pthread_create;
pub mod pvalloc;
pub mod realloc;
pub mod sigaction;
pub mod signal;
pub mod valloc;
