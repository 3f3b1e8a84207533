//! # signals
//! The runtime owns SIGSEGV and SIGILL. SEGV either pages in lazy shadow or
//! reports an unknown crash; SIGILL decodes the compiler trap stub. Until a
//! report is committed the handlers stick to `write`, `mmap` and `abort`;
//! the reporter that runs afterwards may take ordinary locks because the
//! process is aborting either way.
use core::{ffi::c_void, mem, ptr::null_mut};

use thiserror::Error;

use crate::{
    Addr,
    mmap::linux::LinuxMmap,
    output::write_stderr,
    report::{self, AccessInfo},
    rt,
    shadow::map::{DefaultShadowLayout, ShadowMap},
};

pub type SigactionFn =
    unsafe extern "C" fn(libc::c_int, *const libc::sigaction, *mut libc::sigaction) -> libc::c_int;

type Shadow = ShadowMap<LinuxMmap, DefaultShadowLayout>;

/// Register, pc, sp, bp and accumulator out of a signal context.
#[cfg(target_arch = "x86_64")]
unsafe fn context_regs(context: *mut c_void) -> (Addr, Addr, Addr, Addr) {
    let ucontext = context as *const libc::ucontext_t;
    let gregs = unsafe { &(*ucontext).uc_mcontext.gregs };
    (
        gregs[libc::REG_RIP as usize] as Addr,
        gregs[libc::REG_RSP as usize] as Addr,
        gregs[libc::REG_RBP as usize] as Addr,
        gregs[libc::REG_RAX as usize] as Addr,
    )
}

#[cfg(target_arch = "x86")]
unsafe fn context_regs(context: *mut c_void) -> (Addr, Addr, Addr, Addr) {
    let ucontext = context as *const libc::ucontext_t;
    let gregs = unsafe { &(*ucontext).uc_mcontext.gregs };
    (
        gregs[libc::REG_EIP as usize] as Addr,
        gregs[libc::REG_ESP as usize] as Addr,
        gregs[libc::REG_EBP as usize] as Addr,
        gregs[libc::REG_EAX as usize] as Addr,
    )
}

unsafe extern "C" fn handle_sigsegv(
    _signum: libc::c_int,
    info: *mut libc::siginfo_t,
    context: *mut c_void,
) {
    let addr = unsafe { (*info).si_addr() } as Addr;
    if rt::lazy_shadow_enabled() && Shadow::is_shadow(addr) {
        // First touch of an unmapped shadow page; map a chunk around it and
        // resume the faulting instruction.
        if Shadow::page_in(addr).is_ok() {
            return;
        }
    }
    write_stderr(b"ASAN:SIGSEGV\n");
    let (pc, sp, bp, _ax) = unsafe { context_regs(context) };
    rt::report_unknown_crash(addr, pc, sp, bp);
}

unsafe extern "C" fn handle_sigill(
    _signum: libc::c_int,
    _info: *mut libc::siginfo_t,
    context: *mut c_void,
) {
    write_stderr(b"ASAN:SIGILL\n");
    let (pc, sp, bp, ax) = unsafe { context_regs(context) };
    let Some((is_write, size)) = (unsafe { report::decode_trap(pc) }) else {
        rt::check_failed("SIGILL at a non-trap instruction", file!(), line!());
    };
    rt::report_error(AccessInfo {
        pc,
        bp,
        sp,
        addr: ax,
        is_write,
        size,
    });
}

unsafe fn install_one(
    real_sigaction: SigactionFn,
    signum: libc::c_int,
    handler: unsafe extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut c_void),
) -> Result<(), SignalsError> {
    let mut action: libc::sigaction = unsafe { mem::zeroed() };
    action.sa_sigaction = handler as Addr;
    action.sa_flags = libc::SA_SIGINFO;
    unsafe { libc::sigemptyset(&mut action.sa_mask) };
    if unsafe { real_sigaction(signum, &action, null_mut()) } != 0 {
        return Err(SignalsError::FailedToInstall(signum));
    }
    Ok(())
}

/// Install our handlers through the real `sigaction` (ours swallows
/// registrations for these signals).
pub unsafe fn install(
    real_sigaction: SigactionFn,
    handle_segv: bool,
) -> Result<(), SignalsError> {
    if handle_segv {
        unsafe { install_one(real_sigaction, libc::SIGSEGV, handle_sigsegv)? };
    }
    unsafe { install_one(real_sigaction, libc::SIGILL, handle_sigill) }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignalsError {
    #[error("Failed to install handler for signal {0}")]
    FailedToInstall(libc::c_int),
}
