use core::{ffi::c_void, ptr::null_mut};

use log::trace;

use crate::{rt, size_t};

/// # Safety
/// See man pages
#[unsafe(export_name = "posix_memalign")]
pub unsafe extern "C" fn posix_memalign(
    memptr: *mut *mut c_void,
    align: size_t,
    size: size_t,
) -> libc::c_int {
    trace!("posix_memalign - align: {align:#x}, size: {size:#x}");
    if memptr.is_null() {
        return libc::EINVAL;
    }
    if !align.is_power_of_two() || align < size_of::<*mut c_void>() {
        return libc::EINVAL;
    }
    if size == 0 {
        unsafe { *memptr = null_mut() };
        return 0;
    }
    rt::init();
    unsafe { *memptr = rt::memalign(align, size) as *mut c_void };
    0
}
