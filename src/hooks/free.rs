use core::ffi::c_void;

use log::trace;

use crate::{Addr, hooks::calloc::in_pool, rt};

/// # Safety
/// See man pages
#[unsafe(export_name = "free")]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    trace!("free - ptr: {ptr:p}");
    if ptr.is_null() {
        return;
    }
    // Bootstrap-pool memory has no chunk behind it.
    if in_pool(ptr as Addr) {
        return;
    }
    rt::init();
    rt::free(ptr as Addr)
}
