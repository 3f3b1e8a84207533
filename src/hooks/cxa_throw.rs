use core::ffi::c_void;

use log::trace;

use crate::rt;

/// Exception unwinding jumps over poisoned frames exactly like `longjmp`;
/// clean the stack shadow, then let the real unwinder do its job. The user
/// exception propagates unchanged.
///
/// # Safety
/// Itanium ABI `__cxa_throw`
#[unsafe(export_name = "__cxa_throw")]
pub unsafe extern "C" fn cxa_throw(exception: *mut c_void, tinfo: *mut c_void, dest: *mut c_void) {
    trace!("__cxa_throw - exception: {exception:p}");
    rt::init();
    rt::unpoison_current_stack();
    unsafe { (rt::runtime().real.cxa_throw())(exception, tinfo, dest) }
}
