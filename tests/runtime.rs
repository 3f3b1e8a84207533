#[cfg(all(test, feature = "linux", target_os = "linux"))]
mod tests {
    use asan_rt::{
        Addr,
        mmap::{Mmap, linux::LinuxMmap},
        report::{self, ErrorKind},
        rt,
        shadow::{
            PoisonType, Shadow,
            map::{DefaultShadowLayout, ShadowMap},
        },
        zone::{AllocatorZone, RuntimeZone},
    };
    use spin::{Lazy, Mutex, MutexGuard};

    // Bring the whole runtime up once in this process: options, shadow,
    // allocator, registries, signal handlers and the main thread record.
    static INIT_ONCE: Lazy<Mutex<()>> = Lazy::new(|| {
        rt::init();
        Mutex::new(())
    });

    fn serialize() -> MutexGuard<'static, ()> {
        INIT_ONCE.lock()
    }

    fn classify(addr: Addr) -> ErrorKind {
        unsafe { report::classify_addr::<LinuxMmap, DefaultShadowLayout>(addr) }
    }

    #[test]
    fn exported_mapping_constants() {
        let _guard = serialize();
        assert_eq!(rt::MAPPING_SCALE, 3);
        assert_eq!(rt::MAPPING_OFFSET, 1 << 44);
    }

    #[test]
    fn malloc_paints_and_free_quarantines() {
        let _guard = serialize();
        let p = rt::malloc(10);
        assert_ne!(p, 0);
        assert_eq!(p % 8, 0);
        unsafe { (p as *mut u8).write_bytes(0xab, 10) };
        assert_eq!(rt::usable_size(p), 10);

        // One past the end sits in the right redzone.
        assert_eq!(classify(p + 10), ErrorKind::HeapBufferOverflow);

        rt::free(p);
        assert_eq!(classify(p), ErrorKind::HeapUseAfterFree);
        assert_eq!(rt::usable_size(p), 0);
    }

    #[test]
    fn calloc_zeroes_recycled_memory() {
        let _guard = serialize();
        let p = rt::calloc(4, 8);
        assert_ne!(p, 0);
        for o in 0..32 {
            assert_eq!(unsafe { *((p + o) as *const u8) }, 0);
        }
        rt::free(p);
    }

    #[test]
    fn realloc_moves_the_payload() {
        let _guard = serialize();
        let p = rt::malloc(16);
        unsafe { (p as *mut u8).write_bytes(0x77, 16) };
        let q = rt::realloc(p, 64);
        assert_ne!(q, p);
        for o in 0..16 {
            assert_eq!(unsafe { *((q + o) as *const u8) }, 0x77);
        }
        assert_eq!(rt::usable_size(q), 64);
        assert_eq!(classify(p), ErrorKind::HeapUseAfterFree);
        rt::free(q);
    }

    #[test]
    fn memalign_honors_alignment() {
        let _guard = serialize();
        for align in [16usize, 256, 4096] {
            let p = rt::memalign(align, 24);
            assert_eq!(p % align, 0, "align {align}");
            rt::free(p);
        }
    }

    #[test]
    fn zone_capabilities_delegate_to_the_runtime() {
        let _guard = serialize();
        let zone = RuntimeZone;

        let p = zone.malloc(24);
        assert_eq!(zone.size(p), 24);
        let q = zone.realloc(p, 48);
        assert_eq!(zone.size(q), 48);
        assert_eq!(zone.size(p), 0);
        zone.free(q);

        let c = zone.calloc(2, 8);
        assert_eq!(zone.size(c), 16);
        zone.free(c);

        let v = zone.valloc(8);
        assert_eq!(v % 4096, 0);
        zone.free(v);

        let m = zone.memalign(64, 8);
        assert_eq!(m % 64, 0);
        zone.free(m);
    }

    #[test]
    fn heap_description_flows_through_the_runtime() {
        let _guard = serialize();
        let p = rt::malloc(10);
        let mut out = String::new();
        assert!(
            rt::runtime()
                .frontend
                .lock()
                .describe_addr(p + 10, &mut out)
                .unwrap()
        );
        assert!(out.contains("0 bytes to the right of 10-byte region"), "{out}");
        assert!(out.contains("allocated by thread T"), "{out}");
        rt::free(p);
    }

    #[test]
    fn registered_globals_are_described() {
        let _guard = serialize();
        let map = LinuxMmap::map(0x1000).unwrap();
        let g = map.as_slice().as_ptr() as Addr;
        unsafe { rt::__asan_register_global(g, 7, c"counter".as_ptr()) };

        assert_eq!(classify(g + 7), ErrorKind::GlobalBufferOverflow);
        let mut out = String::new();
        assert!(rt::runtime().globals.describe(g + 7, &mut out).unwrap());
        assert!(out.contains("0 bytes to the right of global 'counter'"), "{out}");
        map.into_raw();
    }

    #[test]
    fn thread_records_localize_stack_addresses() {
        let _guard = serialize();
        let threads = &rt::runtime().threads;
        // Register this test thread the way the trampoline would, then check
        // that its stack addresses resolve to a covering record.
        let record =
            threads.create_thread(None, core::ptr::null_mut(), asan_rt::stack::StackTrace::empty());
        threads.install_current(record);
        assert_eq!(threads.current().map(|t| t.tid()), Some(record.tid()));
        assert!(record.stack_top() > record.stack_bottom());

        let local = 0usize;
        let here = &local as *const usize as Addr;
        assert!(record.contains_stack_addr(here));
        let found = threads
            .find_by_stack_address(here)
            .expect("a record covers this stack");
        assert!(found.contains_stack_addr(here));
        threads.retire(record);
    }

    #[test]
    fn jump_paths_unpoison_the_live_stack() {
        let _guard = serialize();
        let threads = &rt::runtime().threads;
        let record = threads.create_thread(
            None,
            core::ptr::null_mut(),
            asan_rt::stack::StackTrace::empty(),
        );
        threads.install_current(record);

        // Poison one word of this frame the way a returned callee's redzone
        // would linger, then take the longjmp path.
        let local = [0u8; 64];
        let addr = (local.as_ptr() as Addr) & !7;
        let mut shadow = unsafe { ShadowMap::<LinuxMmap, DefaultShadowLayout>::attach() };
        shadow.poison(addr, 8, PoisonType::AsanStackMidRz).unwrap();
        assert!(shadow.is_poison(addr, 8).unwrap());

        rt::unpoison_current_stack();
        assert!(!shadow.is_poison(addr, 8).unwrap());
        threads.retire(record);
    }

    #[test]
    fn stack_faults_resolve_to_frame_descriptors() {
        let _guard = serialize();
        let threads = &rt::runtime().threads;
        let record = threads.create_thread(
            None,
            core::ptr::null_mut(),
            asan_rt::stack::StackTrace::empty(),
        );
        threads.install_current(record);

        // Lay out what the instrumentation writes at a frame base: the magic
        // word followed by a pointer to the frame-descriptor string.
        let descr = c"crunch 1 32 8 3 acc";
        let frame: [usize; 3] = [asan_rt::FRAME_MAGIC, descr.as_ptr() as usize, 0];
        let probe = &frame[2] as *const usize as Addr;

        let (base, _, offset) = record.frame_descriptor(probe).expect("frame stamp found");
        assert_eq!(base, frame.as_ptr() as Addr);
        assert_eq!(offset, 2 * size_of::<usize>());

        let mut out = String::new();
        assert!(threads.describe_addr(probe, &mut out).unwrap());
        assert!(out.contains("in frame <crunch>"), "{out}");
        assert!(out.contains("This frame has 1 object(s):"), "{out}");
        assert!(out.contains("[32, 40) 'acc'"), "{out}");
        threads.retire(record);
    }
}
