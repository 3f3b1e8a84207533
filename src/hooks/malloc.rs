use core::ffi::c_void;

use log::trace;

use crate::{rt, size_t};

/// # Safety
/// See man pages
#[unsafe(export_name = "malloc")]
pub unsafe extern "C" fn malloc(size: size_t) -> *mut c_void {
    trace!("malloc - size: {size:#x}");
    rt::init();
    rt::malloc(size) as *mut c_void
}
