//! # thread
//! Per-thread bookkeeping. Every intercepted `pthread_create` allocates an
//! `AsanThread` record and starts the thread through a trampoline that
//! installs the record as current and discovers the stack extent from the
//! OS. The registry localizes faulting stack addresses to a thread and, via
//! the compiler-stamped frame magic, to a frame descriptor.
use alloc::{boxed::Box, vec::Vec};
use core::{
    ffi::{CStr, c_char, c_void},
    fmt::{self, Write},
    ptr::null_mut,
    sync::atomic::{AtomicU32, AtomicUsize, Ordering},
};

use log::debug;
use spin::{Mutex, Once};
use thiserror::Error;

use crate::{Addr, FRAME_MAGIC, stack::StackTrace};

pub type StartRoutine = unsafe extern "C" fn(*mut c_void) -> *mut c_void;

#[derive(Debug)]
pub struct AsanThread {
    tid: u32,
    parent_tid: u32,
    start_routine: Option<StartRoutine>,
    arg: Addr,
    stack_bottom: AtomicUsize,
    stack_top: AtomicUsize,
    creation_stack: StackTrace,
}

impl AsanThread {
    pub fn tid(&self) -> u32 {
        self.tid
    }

    pub fn start_routine(&self) -> Option<StartRoutine> {
        self.start_routine
    }

    pub fn arg(&self) -> *mut c_void {
        self.arg as *mut c_void
    }

    pub fn stack_bottom(&self) -> Addr {
        self.stack_bottom.load(Ordering::Acquire)
    }

    pub fn stack_top(&self) -> Addr {
        self.stack_top.load(Ordering::Acquire)
    }

    pub fn contains_stack_addr(&self, addr: Addr) -> bool {
        let bottom = self.stack_bottom();
        let top = self.stack_top();
        bottom != 0 && addr >= bottom && addr < top
    }

    /// "Thread T1 created by T0 here:" plus the creation stack. The main
    /// thread was not created by anyone we saw.
    pub fn announce(&self, out: &mut dyn Write) -> fmt::Result {
        if self.tid == 0 {
            return Ok(());
        }
        writeln!(out, "Thread T{} created by T{} here:", self.tid, self.parent_tid)?;
        for (i, pc) in self.creation_stack.frames().iter().enumerate() {
            writeln!(out, "    #{i} {pc:#x}")?;
        }
        Ok(())
    }

    /// Walk word-aligned addresses from `addr` down to the stack bottom
    /// looking for the compiler frame stamp; the word after the stamp points
    /// at the frame-descriptor string.
    pub fn frame_descriptor(&self, addr: Addr) -> Option<(Addr, *const c_char, usize)> {
        let word = size_of::<Addr>();
        let mut p = addr & !(word - 1);
        let bottom = self.stack_bottom();
        if bottom == 0 || addr < bottom || addr >= self.stack_top() {
            return None;
        }
        while p >= bottom + word {
            let value = unsafe { *(p as *const Addr) };
            if value == FRAME_MAGIC {
                let descr = unsafe { *((p + word) as *const Addr) } as *const c_char;
                if descr.is_null() {
                    return None;
                }
                return Some((p, descr, addr - p));
            }
            p -= word;
        }
        None
    }
}

/// Parsed view of a compiler-emitted frame descriptor:
/// `"FunctionName N off size len Name ..."`. Zero-copy; the string itself is
/// owned by the code image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDescriptor<'a> {
    pub function: &'a str,
    pub objects: Vec<FrameObject<'a>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameObject<'a> {
    pub offset: usize,
    pub size: usize,
    pub name: &'a str,
}

impl<'a> FrameDescriptor<'a> {
    pub fn parse(descr: &'a str) -> Result<Self, FrameDescriptorError> {
        let mut tokens = descr.split_ascii_whitespace();
        let function = tokens.next().ok_or(FrameDescriptorError::Truncated)?;
        let count: usize = tokens
            .next()
            .ok_or(FrameDescriptorError::Truncated)?
            .parse()
            .map_err(|_| FrameDescriptorError::BadNumber)?;
        let mut objects = Vec::with_capacity(count);
        for _ in 0..count {
            let offset = Self::number(tokens.next())?;
            let size = Self::number(tokens.next())?;
            let _name_len = Self::number(tokens.next())?;
            let name = tokens.next().ok_or(FrameDescriptorError::Truncated)?;
            objects.push(FrameObject { offset, size, name });
        }
        Ok(FrameDescriptor { function, objects })
    }

    fn number(token: Option<&str>) -> Result<usize, FrameDescriptorError> {
        token
            .ok_or(FrameDescriptorError::Truncated)?
            .parse()
            .map_err(|_| FrameDescriptorError::BadNumber)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameDescriptorError {
    #[error("Frame descriptor truncated")]
    Truncated,
    #[error("Frame descriptor contains a malformed number")]
    BadNumber,
}

#[derive(Debug)]
pub struct ThreadRegistry {
    threads: Mutex<Vec<&'static AsanThread>>,
    next_tid: AtomicU32,
    key: Once<libc::pthread_key_t>,
}

impl ThreadRegistry {
    pub const fn new() -> Self {
        ThreadRegistry {
            threads: Mutex::new(Vec::new()),
            next_tid: AtomicU32::new(0),
            key: Once::new(),
        }
    }

    fn tls_key(&self) -> libc::pthread_key_t {
        *self.key.call_once(|| {
            let mut key: libc::pthread_key_t = 0;
            unsafe { libc::pthread_key_create(&mut key, None) };
            key
        })
    }

    /// Create and install the record for the thread that called
    /// `__asan_init`.
    pub fn init_main(&self) -> &'static AsanThread {
        let main = self.create_thread(None, null_mut(), StackTrace::empty());
        self.install_current(main);
        main
    }

    pub fn create_thread(
        &self,
        start_routine: Option<StartRoutine>,
        arg: *mut c_void,
        creation_stack: StackTrace,
    ) -> &'static AsanThread {
        let parent_tid = self.current().map(|t| t.tid()).unwrap_or(0);
        let thread = Box::leak(Box::new(AsanThread {
            tid: self.next_tid.fetch_add(1, Ordering::Relaxed),
            parent_tid,
            start_routine,
            arg: arg as Addr,
            stack_bottom: AtomicUsize::new(0),
            stack_top: AtomicUsize::new(0),
            creation_stack,
        }));
        self.threads.lock().push(thread);
        thread
    }

    /// Make `thread` current on the calling OS thread and discover its stack
    /// extent.
    pub fn install_current(&self, thread: &'static AsanThread) {
        let (bottom, top) = stack_bounds();
        thread.stack_bottom.store(bottom, Ordering::Release);
        thread.stack_top.store(top, Ordering::Release);
        debug!(
            "thread T{} stack: [{bottom:#x}, {top:#x})",
            thread.tid()
        );
        unsafe {
            libc::pthread_setspecific(self.tls_key(), thread as *const AsanThread as *const c_void)
        };
    }

    /// Drop a finished thread from stack-address lookup. The record itself
    /// stays allocated; reports referencing its tid remain valid.
    pub fn retire(&self, thread: &'static AsanThread) {
        self.threads
            .lock()
            .retain(|t| t.tid() != thread.tid());
    }

    pub fn current(&self) -> Option<&'static AsanThread> {
        let p = unsafe { libc::pthread_getspecific(self.tls_key()) };
        if p.is_null() {
            return None;
        }
        Some(unsafe { &*(p as *const AsanThread) })
    }

    pub fn find_by_stack_address(&self, addr: Addr) -> Option<&'static AsanThread> {
        self.threads
            .lock()
            .iter()
            .copied()
            .find(|t| t.contains_stack_addr(addr))
    }

    /// Describe a faulting stack address: owning thread, frame, and the
    /// frame's objects.
    pub fn describe_addr(&self, addr: Addr, out: &mut dyn Write) -> Result<bool, fmt::Error> {
        let Some(thread) = self.find_by_stack_address(addr) else {
            return Ok(false);
        };
        let Some((_, descr, offset)) = thread.frame_descriptor(addr) else {
            return Ok(false);
        };
        let descr = match unsafe { CStr::from_ptr(descr) }.to_str() {
            Ok(s) => s,
            Err(_) => return Ok(false),
        };
        let Ok(frame) = FrameDescriptor::parse(descr) else {
            return Ok(false);
        };
        writeln!(
            out,
            "Address {addr:#x} is located at offset {offset} in frame <{}> of T{}'s stack:",
            frame.function,
            thread.tid()
        )?;
        writeln!(out, "  This frame has {} object(s):", frame.objects.len())?;
        for object in &frame.objects {
            writeln!(
                out,
                "    [{}, {}) '{}'",
                object.offset,
                object.offset + object.size,
                object.name
            )?;
        }
        writeln!(
            out,
            "HINT: this may be a false positive if your program uses some custom stack unwind mechanism"
        )?;
        writeln!(out, "      (longjmp and C++ exceptions *are* supported)")?;
        thread.announce(out)?;
        Ok(true)
    }
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn stack_bounds() -> (Addr, Addr) {
    unsafe {
        let mut attr: libc::pthread_attr_t = core::mem::zeroed();
        if libc::pthread_getattr_np(libc::pthread_self(), &mut attr) != 0 {
            return (0, 0);
        }
        let mut stackaddr: *mut c_void = null_mut();
        let mut stacksize: usize = 0;
        let rc = libc::pthread_attr_getstack(&attr, &mut stackaddr, &mut stacksize);
        libc::pthread_attr_destroy(&mut attr);
        if rc != 0 {
            return (0, 0);
        }
        let bottom = stackaddr as Addr;
        (bottom, bottom + stacksize)
    }
}
