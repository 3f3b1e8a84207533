use alloc::string::{String, ToString};
use core::{ffi::CStr, fmt::Debug, marker::PhantomData};

use log::trace;
use thiserror::Error;

use crate::{Addr, symbols::Symbols};

pub trait LookupType: Debug {
    const HANDLE: *mut core::ffi::c_void;
}

/// Resolve the next occurrence of the symbol after this object, skipping our
/// own interposed definition.
#[derive(Debug)]
pub struct LookupTypeNext;

impl LookupType for LookupTypeNext {
    const HANDLE: *mut core::ffi::c_void = libc::RTLD_NEXT;
}

#[derive(Debug)]
pub struct LookupTypeDefault;

impl LookupType for LookupTypeDefault {
    const HANDLE: *mut core::ffi::c_void = libc::RTLD_DEFAULT;
}

#[derive(Debug)]
pub struct DlSymSymbols<T: LookupType> {
    _phantom: PhantomData<T>,
}

impl<T: LookupType> Symbols for DlSymSymbols<T> {
    type Error = DlSymError;

    fn lookup(name: &CStr) -> Result<Addr, Self::Error> {
        let p = unsafe { libc::dlsym(T::HANDLE, name.as_ptr()) };
        trace!("lookup - name: {name:?}, addr: {p:p}");
        if p.is_null() {
            Err(DlSymError::NotFound(
                name.to_str().unwrap_or("<non-utf8>").to_string(),
            ))
        } else {
            Ok(p as Addr)
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DlSymError {
    #[error("Symbol not found: {0}")]
    NotFound(String),
}
