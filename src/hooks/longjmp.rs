use core::ffi::c_void;

use log::trace;

use crate::rt;

/// Control is about to jump over any number of poisoned frames; their
/// shadow must be clean before the landing site runs.
///
/// # Safety
/// See man pages
#[unsafe(export_name = "longjmp")]
pub unsafe extern "C" fn longjmp(env: *mut c_void, val: libc::c_int) {
    trace!("longjmp - env: {env:p}, val: {val}");
    rt::init();
    rt::unpoison_current_stack();
    unsafe { (rt::runtime().real.longjmp())(env, val) }
}

/// # Safety
/// See man pages
#[unsafe(export_name = "siglongjmp")]
pub unsafe extern "C" fn siglongjmp(env: *mut c_void, val: libc::c_int) {
    trace!("siglongjmp - env: {env:p}, val: {val}");
    rt::init();
    rt::unpoison_current_stack();
    unsafe { (rt::runtime().real.siglongjmp())(env, val) }
}
