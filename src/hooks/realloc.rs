use core::{ffi::c_void, ptr::copy_nonoverlapping};

use log::trace;

use crate::{
    Addr,
    hooks::calloc::{in_pool, pool_tail},
    rt, size_t,
};

/// # Safety
/// See man pages
#[unsafe(export_name = "realloc")]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: size_t) -> *mut c_void {
    trace!("realloc - ptr: {ptr:p}, size: {size:#x}");
    rt::init();
    // Bootstrap-pool chunks carry no header; migrate them onto the real
    // heap.
    if !ptr.is_null() && in_pool(ptr as Addr) {
        let new = rt::malloc(size);
        let take = size.min(pool_tail(ptr as Addr));
        unsafe { copy_nonoverlapping(ptr as *const u8, new as *mut u8, take) };
        return new as *mut c_void;
    }
    rt::realloc(ptr as Addr, size) as *mut c_void
}
