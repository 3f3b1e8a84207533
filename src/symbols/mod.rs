//! # symbols
//! Lookup of the real host functions shadowed by our interceptors.
use core::{ffi::CStr, fmt::Debug};

use crate::Addr;

#[cfg(all(feature = "linux", target_os = "linux"))]
pub mod dlsym;

pub trait Symbols: Debug {
    type Error: Debug;
    fn lookup(name: &CStr) -> Result<Addr, Self::Error>;
}
