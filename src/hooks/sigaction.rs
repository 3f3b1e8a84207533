use log::trace;

use crate::rt;

/// The runtime owns the fault signals; user registrations for them are
/// silently swallowed.
///
/// # Safety
/// See man pages
#[unsafe(export_name = "sigaction")]
pub unsafe extern "C" fn sigaction(
    signum: libc::c_int,
    act: *const libc::sigaction,
    oldact: *mut libc::sigaction,
) -> libc::c_int {
    trace!("sigaction - signum: {signum}");
    rt::init();
    if signum == libc::SIGSEGV || signum == libc::SIGILL {
        return 0;
    }
    unsafe { (rt::runtime().real.sigaction())(signum, act, oldact) }
}
