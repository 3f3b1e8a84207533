use core::ffi::c_void;

use log::trace;

use crate::{mmap::PAGE_SIZE, rt, size_t};

/// # Safety
/// See man pages
#[unsafe(export_name = "valloc")]
pub unsafe extern "C" fn valloc(size: size_t) -> *mut c_void {
    trace!("valloc - size: {size:#x}");
    rt::init();
    rt::memalign(PAGE_SIZE, size) as *mut c_void
}
