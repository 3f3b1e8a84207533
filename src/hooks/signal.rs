use log::trace;

use crate::rt;

/// The runtime owns the fault signals; user registrations for them are
/// silently swallowed.
///
/// # Safety
/// See man pages
#[unsafe(export_name = "signal")]
pub unsafe extern "C" fn signal(
    signum: libc::c_int,
    handler: libc::sighandler_t,
) -> libc::sighandler_t {
    trace!("signal - signum: {signum}");
    rt::init();
    if signum == libc::SIGSEGV || signum == libc::SIGILL {
        return 0;
    }
    unsafe { (rt::runtime().real.signal())(signum, handler) }
}
