extern crate alloc;

#[cfg(all(test, feature = "linux", target_os = "linux"))]
mod tests {
    use alloc::alloc::{GlobalAlloc, Layout};

    use asan_rt::{
        Addr,
        allocator::frontend::{AllocatorFrontend, default::DefaultFrontend},
        mmap::{Mmap, linux::LinuxMmap},
        shadow::{
            Shadow,
            map::{DefaultShadowLayout, ShadowMap},
        },
        stack::StackTrace,
    };
    use log::{debug, info};
    use mockall::mock;
    use spin::{Lazy, Mutex, MutexGuard};

    const MAX_ADDR: Addr = 64 << 20;

    // We can't mock GlobalAlloc since `*mut u8` isn't Send and Sync, so we
    // create a trivial implementation of it which converts the types and
    // calls this substitute mockable trait instead.
    trait BackendTrait {
        fn do_alloc(&self, layout: Layout) -> Addr;
        fn do_dealloc(&self, addr: Addr, layout: Layout);
    }

    mock! {
        #[derive(Debug)]
        pub Backend {}

        impl BackendTrait for Backend {
            fn do_alloc(&self, layout: Layout) -> Addr;
            fn do_dealloc(&self, addr: Addr, layout: Layout);
        }
    }

    unsafe impl GlobalAlloc for MockBackend {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            self.do_alloc(layout) as *mut u8
        }

        unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
            self.do_dealloc(ptr as Addr, layout)
        }
    }

    type DF = DefaultFrontend<MockBackend, ShadowMap<LinuxMmap, DefaultShadowLayout>>;

    static INIT_ONCE: Lazy<Mutex<DF>> = Lazy::new(|| {
        Mutex::new({
            env_logger::init();
            let backend = MockBackend::new();
            let shadow = ShadowMap::<LinuxMmap, DefaultShadowLayout>::reserve(false).unwrap();
            DF::new(
                backend,
                shadow,
                DF::DEFAULT_REDZONE_SIZE,
                DF::DEFAULT_QUARANTINE_SIZE,
                true,
            )
            .unwrap()
        })
    });

    static MAP: Lazy<LinuxMmap> = Lazy::new(|| LinuxMmap::map(MAX_ADDR).unwrap());

    fn frontend() -> MutexGuard<'static, DF> {
        INIT_ONCE.lock()
    }

    #[test]
    fn test_allocate_is_poisoned() {
        let mut frontend = frontend();

        let base = MAP.as_slice().as_ptr() as Addr;
        info!("base: {base:#x}");

        let inputs = [[4, 8, 0], [0x3ff, 0, 0]];
        for [len, align, addr] in inputs {
            frontend
                .backend_mut()
                .expect_do_alloc()
                .returning(move |layout| {
                    debug!(
                        "mock - len: {:#x}, align: {:#x}",
                        layout.size(),
                        layout.align()
                    );
                    base + addr
                });
            frontend
                .backend_mut()
                .expect_do_dealloc()
                .returning(|addr, layout| {
                    debug!(
                        "mock - addr: {:#x}, len: {:#x}, align: {:#x}",
                        addr,
                        layout.size(),
                        layout.align()
                    );
                });

            let mut trace = StackTrace::empty();
            trace.push(0x0bad_cafe);

            let buf = frontend.alloc(len, align, 0, &trace).unwrap();
            info!("buf: {buf:#x}");
            for i in buf - DF::DEFAULT_REDZONE_SIZE..buf + len + DF::DEFAULT_REDZONE_SIZE {
                let expected = i < buf || i >= buf + len;
                let poisoned = frontend.shadow().is_poison(i, 1).unwrap();
                assert_eq!(expected, poisoned);
            }
            frontend.dealloc(buf, 0, &trace).unwrap();
        }
    }
}
