use core::ffi::c_void;

use log::trace;

use crate::{rt, size_t};

/// # Safety
/// See man pages
#[unsafe(export_name = "memalign")]
pub unsafe extern "C" fn memalign(align: size_t, size: size_t) -> *mut c_void {
    trace!("memalign - align: {align:#x}, size: {size:#x}");
    rt::init();
    rt::memalign(align, size) as *mut c_void
}
