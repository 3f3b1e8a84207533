use core::ffi::c_void;

use log::trace;

use crate::{mmap::PAGE_SIZE, rt, size_t};

/// # Safety
/// See man pages
#[unsafe(export_name = "pvalloc")]
pub unsafe extern "C" fn pvalloc(size: size_t) -> *mut c_void {
    trace!("pvalloc - size: {size:#x}");
    rt::init();
    let rounded = size.max(1).div_ceil(PAGE_SIZE) * PAGE_SIZE;
    rt::memalign(PAGE_SIZE, rounded) as *mut c_void
}
