//! # rt
//! Process-wide runtime state and the exported compiler ABI. Everything the
//! instrumented program can reach lands here: `__asan_init` from every
//! translation unit's constructor, the explicit report entry points, global
//! registration, and the allocation primitives the interceptors delegate to.
//! The singletons are initialization-ordered: the shadow, allocator and
//! registries come up inside one `Once`, and only then is the main thread
//! registered, because registering it can re-enter the allocator.
use core::{
    ffi::{CStr, c_char, c_void},
    fmt::Write as _,
    mem,
    ptr::write_bytes,
    sync::atomic::{AtomicU8, Ordering},
};

use spin::{Mutex, Once};

use crate::{
    Addr, asan_printf,
    allocator::{backend::slab::SlabBackend, frontend::{AllocatorFrontend, default::{DefaultFrontend, DefaultFrontendError}}},
    globals::GlobalRegistry,
    logger,
    mmap::{PAGE_SIZE, linux::LinuxMmap},
    options::Options,
    output::{LineBuffer, pid},
    report::{self, AccessInfo},
    shadow::map::{DefaultShadowLayout, ShadowLayout, ShadowMap},
    signals,
    stack::{FramePointerUnwinder, StackTrace, Unwinder},
    stats::STATS,
    symbols::{Symbols, dlsym::{DlSymSymbols, LookupTypeNext}},
    thread::{StartRoutine, ThreadRegistry},
};

pub type Backend = SlabBackend<LinuxMmap>;
pub type Shadow = ShadowMap<LinuxMmap, DefaultShadowLayout>;
pub type Frontend = DefaultFrontend<Backend, Shadow>;
type Layout = DefaultShadowLayout;
type Syms = DlSymSymbols<LookupTypeNext>;

#[unsafe(export_name = "__asan_mapping_scale")]
pub static MAPPING_SCALE: usize = DefaultShadowLayout::SCALE;

#[unsafe(export_name = "__asan_mapping_offset")]
pub static MAPPING_OFFSET: usize = DefaultShadowLayout::OFFSET;

/// Fail hard on a broken runtime invariant: condition, location, current
/// stack, stats, abort.
#[macro_export]
macro_rules! check {
    ($cond:expr) => {
        if !$cond {
            $crate::rt::check_failed(stringify!($cond), file!(), line!());
        }
    };
}

pub type SignalFn = unsafe extern "C" fn(libc::c_int, libc::sighandler_t) -> libc::sighandler_t;
pub type LongjmpFn = unsafe extern "C" fn(*mut c_void, libc::c_int);
pub type CxaThrowFn = unsafe extern "C" fn(*mut c_void, *mut c_void, *mut c_void);
pub type PthreadCreateFn = unsafe extern "C" fn(
    *mut libc::pthread_t,
    *const libc::pthread_attr_t,
    Option<StartRoutine>,
    *mut c_void,
) -> libc::c_int;

/// The host functions our interceptors shadow, resolved once at init.
/// `__cxa_throw` may legitimately be absent in a pure-C process; everything
/// else must resolve.
#[derive(Debug)]
pub struct RealFns {
    sigaction: Addr,
    signal: Addr,
    longjmp: Addr,
    siglongjmp: Addr,
    cxa_throw: Addr,
    pthread_create: Addr,
}

impl RealFns {
    fn resolve() -> Self {
        let lookup = |name: &CStr| Syms::lookup(name).unwrap_or(0);
        RealFns {
            sigaction: lookup(c"sigaction"),
            signal: lookup(c"signal"),
            longjmp: lookup(c"longjmp"),
            siglongjmp: lookup(c"siglongjmp"),
            cxa_throw: lookup(c"__cxa_throw"),
            pthread_create: lookup(c"pthread_create"),
        }
    }

    pub fn sigaction(&self) -> signals::SigactionFn {
        check!(self.sigaction != 0);
        unsafe { mem::transmute(self.sigaction) }
    }

    pub fn signal(&self) -> SignalFn {
        check!(self.signal != 0);
        unsafe { mem::transmute(self.signal) }
    }

    pub fn longjmp(&self) -> LongjmpFn {
        check!(self.longjmp != 0);
        unsafe { mem::transmute(self.longjmp) }
    }

    pub fn siglongjmp(&self) -> LongjmpFn {
        check!(self.siglongjmp != 0);
        unsafe { mem::transmute(self.siglongjmp) }
    }

    pub fn cxa_throw(&self) -> CxaThrowFn {
        check!(self.cxa_throw != 0);
        unsafe { mem::transmute(self.cxa_throw) }
    }

    pub fn pthread_create(&self) -> PthreadCreateFn {
        check!(self.pthread_create != 0);
        unsafe { mem::transmute(self.pthread_create) }
    }
}

#[derive(Debug)]
pub struct Runtime {
    pub options: Options,
    pub real: RealFns,
    pub frontend: Mutex<Frontend>,
    pub globals: GlobalRegistry<Shadow>,
    pub threads: ThreadRegistry,
    unwinder: FramePointerUnwinder,
}

static RUNTIME: Once<Runtime> = Once::new();

const LATE_PENDING: u8 = 0;
const LATE_RUNNING: u8 = 1;
const LATE_DONE: u8 = 2;
static LATE_INIT: AtomicU8 = AtomicU8::new(LATE_PENDING);

pub fn initialized() -> bool {
    RUNTIME.is_completed()
}

pub fn runtime() -> &'static Runtime {
    check!(initialized());
    RUNTIME.get().unwrap_or_else(|| unreachable!())
}

pub fn lazy_shadow_enabled() -> bool {
    RUNTIME.get().map(|rt| rt.options.lazy_shadow).unwrap_or(false)
}

/// Idempotent; called from every instrumented constructor and from the
/// allocation interceptors. The late phase re-enters the allocator (glibc
/// mallocs under `pthread_getattr_np`), so it is guarded by a state flag
/// rather than a second `Once`: a recursive call observes `LATE_RUNNING`,
/// skips the phase and proceeds against the already published runtime.
pub fn init() {
    RUNTIME.call_once(early_init);
    if LATE_INIT
        .compare_exchange(LATE_PENDING, LATE_RUNNING, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
    {
        late_init();
        LATE_INIT.store(LATE_DONE, Ordering::Release);
    }
}

fn read_options() -> Options {
    let raw = unsafe { libc::getenv(c"ASAN_OPTIONS".as_ptr()) };
    if raw.is_null() {
        return Options::default();
    }
    let text = match unsafe { CStr::from_ptr(raw) }.to_str() {
        Ok(text) => text,
        Err(_) => fatal_options_error("ASAN_OPTIONS is not valid UTF-8"),
    };
    match Options::parse(text) {
        Ok(options) => options,
        Err(e) => {
            let mut buf = LineBuffer::new();
            let _ = write!(buf, "invalid ASAN_OPTIONS: {e}");
            let msg = core::str::from_utf8(buf.as_bytes()).unwrap_or("invalid ASAN_OPTIONS");
            fatal_options_error(msg)
        }
    }
}

fn fatal_options_error(msg: &str) -> ! {
    asan_printf!("=={}== ERROR: AddressSanitizer: {msg}\n", pid());
    unsafe { libc::abort() }
}

/// Everything that must exist before the first malloc can be answered.
fn early_init() -> Runtime {
    let options = read_options();
    logger::init(options.verbosity);
    let real = RealFns::resolve();
    let shadow = match Shadow::reserve(options.lazy_shadow) {
        Ok(shadow) => shadow,
        Err(_) => {
            asan_printf!(
                "=={}== ERROR: AddressSanitizer failed to reserve shadow memory\n",
                pid()
            );
            unsafe { libc::abort() }
        }
    };
    let backend = Backend::new(options.large_malloc);
    let frontend = match Frontend::new(
        backend,
        shadow,
        options.redzone,
        options.quarantine_size,
        options.poison_shadow,
    ) {
        Ok(frontend) => frontend,
        Err(_) => fatal_options_error("bad allocator configuration"),
    };
    let globals = GlobalRegistry::new(unsafe { Shadow::attach() }, options.report_globals);
    Runtime {
        options,
        real,
        frontend: Mutex::new(frontend),
        globals,
        threads: ThreadRegistry::new(),
        unwinder: FramePointerUnwinder,
    }
}

/// Steps that may re-enter the allocator, so they run after the runtime is
/// published.
fn late_init() {
    let rt = runtime();
    let install = unsafe { signals::install(rt.real.sigaction(), rt.options.handle_segv) };
    check!(install.is_ok());
    rt.threads.init_main();
    if rt.options.atexit {
        unsafe { libc::atexit(atexit_stats) };
    }
    if rt.options.verbosity >= 1 {
        print_layout(rt);
        asan_printf!("=={}== AddressSanitizer Init done\n", pid());
    }
}

extern "C" fn atexit_stats() {
    asan_printf!("AddressSanitizer exit stats:\n");
    print_stats();
}

fn print_layout(rt: &Runtime) {
    asan_printf!(
        "|| `[{:#x}, {:#x}]` || HighMem    ||\n",
        Layout::HIGH_MEM_BEG,
        Layout::HIGH_MEM_END
    );
    asan_printf!(
        "|| `[{:#x}, {:#x}]` || HighShadow ||\n",
        Layout::HIGH_SHADOW_BEG,
        Layout::HIGH_SHADOW_END
    );
    asan_printf!(
        "|| `[{:#x}, {:#x}]` || ShadowGap  ||\n",
        Layout::SHADOW_GAP_BEG,
        Layout::SHADOW_GAP_END
    );
    asan_printf!(
        "|| `[{:#x}, {:#x}]` || LowShadow  ||\n",
        Layout::LOW_SHADOW_BEG,
        Layout::LOW_SHADOW_END
    );
    asan_printf!(
        "|| `[{:#x}, {:#x}]` || LowMem     ||\n",
        Layout::LOW_MEM_BEG,
        Layout::LOW_MEM_END
    );
    asan_printf!(
        "MemToShadow(shadow): {:#x} {:#x} {:#x} {:#x}\n",
        Shadow::mem_to_shadow(Layout::LOW_SHADOW_BEG),
        Shadow::mem_to_shadow(Layout::LOW_SHADOW_END),
        Shadow::mem_to_shadow(Layout::HIGH_SHADOW_BEG),
        Shadow::mem_to_shadow(Layout::HIGH_SHADOW_END)
    );
    asan_printf!(
        "red_zone={} malloc_context_size={} fast_unwind={}\n",
        rt.options.redzone,
        rt.options.malloc_context_size,
        rt.options.fast_unwind as u32
    );
    asan_printf!(
        "SHADOW_SCALE: {} SHADOW_GRANULARITY: {} SHADOW_OFFSET: {:#x}\n",
        Layout::SCALE,
        Layout::GRANULARITY,
        Layout::OFFSET
    );
}

fn current_tid(rt: &Runtime) -> u32 {
    rt.threads.current().map(|t| t.tid()).unwrap_or(0)
}

/// Full-depth capture for thread-creation sites and other one-off events.
pub fn capture_stack() -> StackTrace {
    let rt = runtime();
    rt.unwinder.capture(
        crate::stack::MAX_FRAMES,
        rt.threads.current().map(|t| t.stack_top()),
    )
}

fn capture_malloc_stack(rt: &Runtime) -> StackTrace {
    rt.unwinder.capture(
        rt.options.malloc_context_size,
        rt.threads.current().map(|t| t.stack_top()),
    )
}

// ---- allocation primitives shared by the interceptors and the zone ----

pub fn malloc(len: usize) -> Addr {
    let rt = runtime();
    let stack = capture_malloc_stack(rt);
    let tid = current_tid(rt);
    let result = rt.frontend.lock().alloc(len, 0, tid, &stack);
    match result {
        Ok(addr) => addr,
        Err(e) => alloc_failure(e, len, "malloc"),
    }
}

pub fn memalign(align: usize, len: usize) -> Addr {
    let rt = runtime();
    let stack = capture_malloc_stack(rt);
    let tid = current_tid(rt);
    let result = rt.frontend.lock().alloc(len, align, tid, &stack);
    match result {
        Ok(addr) => addr,
        Err(e) => alloc_failure(e, len, "memalign"),
    }
}

pub fn calloc(nmemb: usize, len: usize) -> Addr {
    let Some(total) = nmemb.checked_mul(len) else {
        oom_abort("calloc", usize::MAX);
    };
    let addr = malloc(total);
    // Recycled chunks are not zero; calloc promises zeroes.
    unsafe { write_bytes(addr as *mut u8, 0, total) };
    addr
}

pub fn realloc(addr: Addr, len: usize) -> Addr {
    let rt = runtime();
    let stack = capture_malloc_stack(rt);
    let tid = current_tid(rt);
    let result = rt.frontend.lock().realloc(addr, len, tid, &stack);
    match result {
        Ok(new_addr) => new_addr,
        Err(e) => alloc_failure(e, len, "realloc"),
    }
}

pub fn free(addr: Addr) {
    if addr == 0 {
        return;
    }
    let rt = runtime();
    let stack = capture_malloc_stack(rt);
    let tid = current_tid(rt);
    let result = rt.frontend.lock().dealloc(addr, tid, &stack);
    if let Err(e) = result {
        alloc_failure(e, 0, "free");
    }
}

pub fn usable_size(addr: Addr) -> usize {
    if addr == 0 || !initialized() {
        return 0;
    }
    runtime().frontend.lock().get_size(addr).unwrap_or(0)
}

fn alloc_failure(error: DefaultFrontendError<Shadow>, len: usize, what: &'static str) -> ! {
    match error {
        DefaultFrontendError::AllocationFailed(_) => oom_abort(what, len),
        DefaultFrontendError::DoubleFree(addr) => report_invalid_free(addr, true),
        DefaultFrontendError::InvalidFree(addr)
        | DefaultFrontendError::CorruptHeader(addr)
        | DefaultFrontendError::NoSuchAllocation(addr) => report_invalid_free(addr, false),
        DefaultFrontendError::InvalidAlignment(_)
        | DefaultFrontendError::InvalidRedzone(_)
        | DefaultFrontendError::Shadow(_) => {
            check_failed("allocator invariant violated", file!(), line!())
        }
    }
}

/// Zero the shadow of the current stack from just below the caller's frame
/// up to the stack top. Used before `longjmp` and `__cxa_throw` so stale
/// frame poison cannot fire on the post-jump path.
pub fn unpoison_current_stack() {
    let rt = runtime();
    let Some(thread) = rt.threads.current() else {
        return;
    };
    let top = thread.stack_top();
    if top == 0 {
        return;
    }
    let local = 0usize;
    let here = &local as *const usize as Addr;
    let bottom = (here - PAGE_SIZE) & !(PAGE_SIZE - 1);
    let shadow_bottom = Shadow::mem_to_shadow(bottom);
    let shadow_top = Shadow::mem_to_shadow(top);
    unsafe { write_bytes(shadow_bottom as *mut u8, 0, shadow_top - shadow_bottom) };
}

// ---- reporting ----

fn print_banner() {
    asan_printf!("=================================================================\n");
}

fn print_unwinder_hint() {
    if let Some(rt) = RUNTIME.get()
        && rt.options.fast_unwind
    {
        asan_printf!(
            "HINT: if your stack trace looks short or garbled, use ASAN_OPTIONS=fast_unwind=0\n"
        );
    }
}

fn print_stats() {
    let Some(rt) = RUNTIME.get() else {
        return;
    };
    if !rt.options.stats {
        return;
    }
    let mut buf = LineBuffer::new();
    let _ = STATS.write(&mut buf);
    buf.flush();
}

fn print_current_stack(pc_hint: Addr) -> StackTrace {
    let depth = crate::stack::MAX_FRAMES;
    let trace = match RUNTIME.get() {
        Some(rt) => rt
            .unwinder
            .capture(depth, rt.threads.current().map(|t| t.stack_top())),
        None => FramePointerUnwinder.capture(depth, None),
    };
    let mut buf = LineBuffer::new();
    if trace.is_empty() && pc_hint != 0 {
        let _ = writeln!(buf, "    #0 {pc_hint:#x}");
    } else {
        let _ = report::write_stack_trace(&mut buf, &trace);
    }
    buf.flush();
    trace
}

/// Try global, then stack, then heap, in that order.
fn describe_address(addr: Addr) {
    let Some(rt) = RUNTIME.get() else {
        return;
    };
    let mut buf = LineBuffer::new();
    if rt.globals.describe(addr, &mut buf) == Ok(true) {
        buf.flush();
        return;
    }
    if rt.threads.describe_addr(addr, &mut buf) == Ok(true) {
        buf.flush();
        return;
    }
    // The reporter may be running on top of a fault inside the allocator
    // itself; do not wedge on its lock, a report without the heap detail is
    // still a report.
    match rt.frontend.try_lock() {
        Some(frontend) => {
            if frontend.describe_addr(addr, &mut buf) == Ok(true) {
                buf.flush();
            }
        }
        None => asan_printf!("(allocator busy; no heap description)\n"),
    }
}

fn print_pc_bytes(pc: Addr) {
    let mut buf = LineBuffer::new();
    let _ = write!(buf, "PC: {pc:#018x}:");
    for i in 0..size_of::<Addr>() {
        let byte = unsafe { *((pc + i) as *const u8) };
        let _ = write!(buf, " {byte:02x}");
    }
    let _ = writeln!(buf);
    buf.flush();
}

pub fn report_error(mut access: AccessInfo) -> ! {
    print_banner();
    print_unwinder_hint();
    let kind = unsafe { report::classify_addr::<LinuxMmap, Layout>(access.addr) };
    let tid = RUNTIME.get().map(current_tid).unwrap_or(0);
    let trace = {
        // Fill a missing pc from the first captured frame (explicit-call
        // entry points do not know their caller).
        let t = print_current_stack_precapture();
        if access.pc == 0 {
            access.pc = t.frames().first().copied().unwrap_or(0);
        }
        t
    };
    asan_printf!(
        "=={}== ERROR: AddressSanitizer {kind} on address {:#x} at pc {:#x} bp {:#x} sp {:#x}\n",
        pid(),
        access.addr,
        access.pc,
        access.bp,
        access.sp
    );
    asan_printf!(
        "{} of size {} at {:#x} thread T{}\n",
        access.direction(),
        access.size,
        access.addr,
        tid
    );
    if let Some(rt) = RUNTIME.get()
        && rt.options.debug
        && access.pc != 0
    {
        print_pc_bytes(access.pc);
    }
    {
        let mut buf = LineBuffer::new();
        let _ = report::write_stack_trace(&mut buf, &trace);
        buf.flush();
    }
    if Shadow::is_memory(access.addr, 1) {
        describe_address(access.addr);
    }
    asan_printf!("=={}== ABORTING\n", pid());
    print_stats();
    if Shadow::is_memory(access.addr, 1) {
        let mut buf = LineBuffer::new();
        let _ = unsafe { report::write_shadow_dump::<LinuxMmap, Layout>(&mut buf, access.addr) };
        buf.flush();
    }
    unsafe { libc::abort() }
}

fn print_current_stack_precapture() -> StackTrace {
    match RUNTIME.get() {
        Some(rt) => rt.unwinder.capture(
            crate::stack::MAX_FRAMES,
            rt.threads.current().map(|t| t.stack_top()),
        ),
        None => FramePointerUnwinder.capture(crate::stack::MAX_FRAMES, None),
    }
}

pub fn report_invalid_free(addr: Addr, double: bool) -> ! {
    print_banner();
    if double {
        asan_printf!(
            "=={}== ERROR: AddressSanitizer invalid-free (double free) on address {:#x}\n",
            pid(),
            addr
        );
    } else {
        asan_printf!(
            "=={}== ERROR: AddressSanitizer invalid-free (address not malloc()-ed) on address {:#x}\n",
            pid(),
            addr
        );
    }
    print_current_stack(0);
    if let Some(rt) = RUNTIME.get()
        && let Some(frontend) = rt.frontend.try_lock()
    {
        let mut buf = LineBuffer::new();
        let _ = frontend.describe_free_site(addr, &mut buf);
        buf.flush();
    }
    asan_printf!("=={}== ABORTING\n", pid());
    print_stats();
    unsafe { libc::abort() }
}

pub fn report_unknown_crash(addr: Addr, pc: Addr, sp: Addr, bp: Addr) -> ! {
    let tid = RUNTIME.get().map(current_tid).unwrap_or(0);
    asan_printf!(
        "=={}== ERROR: AddressSanitizer unknown-crash on address {:#x} (pc {:#x} sp {:#x} bp {:#x} T{})\n",
        pid(),
        addr,
        pc,
        sp,
        bp,
        tid
    );
    asan_printf!("AddressSanitizer can not provide additional info. ABORTING\n");
    print_current_stack(pc);
    print_stats();
    unsafe { libc::abort() }
}

pub fn oom_abort(mem_type: &str, size: usize) -> ! {
    asan_printf!(
        "=={}== ERROR: AddressSanitizer failed to allocate {size:#x} ({size}) bytes of {mem_type}\n",
        pid()
    );
    print_stats();
    unsafe { libc::abort() }
}

pub fn check_failed(condition: &str, file: &str, line: u32) -> ! {
    asan_printf!("CHECK failed: {condition} at {file}:{line}\n");
    print_current_stack(0);
    print_stats();
    unsafe { libc::abort() }
}

// ---- exported compiler ABI ----

#[unsafe(export_name = "__asan_init")]
pub extern "C" fn __asan_init() {
    init();
}

/// Called from a module constructor that walks the linker-emitted metadata
/// array, once per global per translation unit.
#[unsafe(export_name = "__asan_register_global")]
pub unsafe extern "C" fn __asan_register_global(addr: Addr, size: usize, name: *const c_char) {
    check!(initialized());
    let rt = runtime();
    let name: &'static CStr = if name.is_null() {
        c"<unknown>"
    } else {
        unsafe { CStr::from_ptr(name) }
    };
    check!(rt.globals.register(addr, size, name).is_ok());
}

macro_rules! report_error_stub {
    ($name:ident, $export:literal, $code:literal) => {
        #[unsafe(export_name = $export)]
        pub unsafe extern "C" fn $name(addr: Addr) {
            let Some((is_write, size)) = AccessInfo::decode_size_and_type($code) else {
                check_failed("bad report stub code", file!(), line!());
            };
            report_error(AccessInfo {
                pc: 0,
                bp: crate::stack::current_bp(),
                sp: crate::stack::current_sp(),
                addr,
                is_write,
                size,
            });
        }
    };
}

// Reads of 1, 2, 4, 8 and 16 bytes.
report_error_stub!(__asan_report_error_0, "__asan_report_error_0", 0u8);
report_error_stub!(__asan_report_error_1, "__asan_report_error_1", 1u8);
report_error_stub!(__asan_report_error_2, "__asan_report_error_2", 2u8);
report_error_stub!(__asan_report_error_3, "__asan_report_error_3", 3u8);
report_error_stub!(__asan_report_error_4, "__asan_report_error_4", 4u8);
// Writes of 1, 2, 4, 8 and 16 bytes.
report_error_stub!(__asan_report_error_8, "__asan_report_error_8", 8u8);
report_error_stub!(__asan_report_error_9, "__asan_report_error_9", 9u8);
report_error_stub!(__asan_report_error_10, "__asan_report_error_10", 10u8);
report_error_stub!(__asan_report_error_11, "__asan_report_error_11", 11u8);
report_error_stub!(__asan_report_error_12, "__asan_report_error_12", 12u8);
