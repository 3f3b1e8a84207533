use core::{ffi::c_void, ptr::null_mut};

use log::trace;

use crate::{
    rt,
    thread::{AsanThread, StartRoutine},
};

/// Trampoline start routine: install the record as the current thread,
/// discover the stack extent, then run the user routine. User errors
/// propagate unchanged.
unsafe extern "C" fn thread_start(arg: *mut c_void) -> *mut c_void {
    let thread: &'static AsanThread = unsafe { &*(arg as *const AsanThread) };
    let runtime = rt::runtime();
    runtime.threads.install_current(thread);
    let ret = match thread.start_routine() {
        Some(start) => unsafe { start(thread.arg()) },
        None => null_mut(),
    };
    runtime.threads.retire(thread);
    ret
}

/// # Safety
/// See man pages
#[unsafe(export_name = "pthread_create")]
pub unsafe extern "C" fn pthread_create(
    thread: *mut libc::pthread_t,
    attr: *const libc::pthread_attr_t,
    start_routine: Option<StartRoutine>,
    arg: *mut c_void,
) -> libc::c_int {
    trace!("pthread_create - arg: {arg:p}");
    rt::init();
    let runtime = rt::runtime();
    let stack = rt::capture_stack();
    let record = runtime.threads.create_thread(start_routine, arg, stack);
    unsafe {
        (runtime.real.pthread_create())(
            thread,
            attr,
            Some(thread_start),
            record as *const AsanThread as *mut c_void,
        )
    }
}
