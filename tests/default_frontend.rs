#[cfg(all(test, feature = "linux", target_os = "linux"))]
mod tests {
    use asan_rt::{
        Addr,
        allocator::{
            backend::slab::SlabBackend,
            frontend::{
                AllocatorFrontend,
                default::{ChunkState, DefaultFrontend, DefaultFrontendError},
            },
        },
        mmap::linux::LinuxMmap,
        report::{self, ErrorKind},
        shadow::{
            Shadow,
            map::{DefaultShadowLayout, ShadowMap},
        },
        stack::StackTrace,
    };
    use spin::{Lazy, Mutex, MutexGuard};

    type Backend = SlabBackend<LinuxMmap>;
    type SM = ShadowMap<LinuxMmap, DefaultShadowLayout>;
    type DF = DefaultFrontend<Backend, SM>;

    const RZ: usize = DF::DEFAULT_REDZONE_SIZE;

    static FRONTEND: Lazy<Mutex<DF>> = Lazy::new(|| {
        env_logger::init();
        let shadow = SM::reserve(false).unwrap();
        Mutex::new(
            DF::new(
                Backend::new(1 << 31),
                shadow,
                DF::DEFAULT_REDZONE_SIZE,
                DF::DEFAULT_QUARANTINE_SIZE,
                true,
            )
            .unwrap(),
        )
    });

    fn frontend() -> MutexGuard<'static, DF> {
        FRONTEND.lock()
    }

    fn stack() -> StackTrace {
        let mut trace = StackTrace::empty();
        trace.push(0x1111);
        trace.push(0x2222);
        trace
    }

    fn classify(addr: Addr) -> ErrorKind {
        unsafe { report::classify_addr::<LinuxMmap, DefaultShadowLayout>(addr) }
    }

    #[test]
    fn redzones_and_partials_are_painted() {
        let mut frontend = frontend();
        let p = frontend.alloc(10, 0, 0, &stack()).unwrap();
        for a in p - RZ..p + 10 + RZ {
            let expected = a < p || a >= p + 10;
            assert_eq!(frontend.shadow().is_poison(a, 1).unwrap(), expected, "{a:#x}");
        }
        unsafe {
            assert_eq!(SM::shadow_byte_raw(p - 8), 0xfa);
            assert_eq!(SM::shadow_byte_raw(p), 0x00);
            assert_eq!(SM::shadow_byte_raw(p + 8), 0x02);
            assert_eq!(SM::shadow_byte_raw(p + 16), 0xfb);
        }
        assert_eq!(classify(p + 10), ErrorKind::HeapBufferOverflow);
        assert_eq!(classify(p - 1), ErrorKind::HeapBufferOverflow);
        frontend.dealloc(p, 0, &stack()).unwrap();
    }

    #[test]
    fn every_in_bounds_access_is_addressable() {
        let mut frontend = frontend();
        let p = frontend.alloc(40, 0, 0, &stack()).unwrap();
        for k in [1usize, 2, 4, 8, 16] {
            for o in 0..=40 - k {
                assert!(
                    !frontend.shadow().is_poison(p + o, k).unwrap(),
                    "offset {o} size {k}"
                );
            }
            // Any access straddling the end of the region must fail.
            assert!(frontend.shadow().is_poison(p + 40 - k + 1, k).unwrap());
        }
        frontend.dealloc(p, 0, &stack()).unwrap();
    }

    #[test]
    fn freed_chunks_classify_as_use_after_free() {
        let mut frontend = frontend();
        let p = frontend.alloc(40, 0, 0, &stack()).unwrap();
        frontend.dealloc(p, 0, &stack()).unwrap();
        assert_eq!(frontend.chunk_state(p), Some(ChunkState::Quarantined));
        for o in (0..40).step_by(8) {
            assert_eq!(unsafe { SM::shadow_byte_raw(p + o) }, 0xfd);
        }
        assert_eq!(classify(p), ErrorKind::HeapUseAfterFree);
        assert_eq!(classify(p + 39), ErrorKind::HeapUseAfterFree);
    }

    #[test]
    fn double_free_is_detected() {
        let mut frontend = frontend();
        let p = frontend.alloc(40, 0, 0, &stack()).unwrap();
        frontend.dealloc(p, 0, &stack()).unwrap();
        assert!(matches!(
            frontend.dealloc(p, 0, &stack()),
            Err(DefaultFrontendError::DoubleFree(addr)) if addr == p
        ));
    }

    #[test]
    fn invalid_free_is_detected() {
        let mut frontend = frontend();
        let p = frontend.alloc(16, 0, 0, &stack()).unwrap();
        assert!(matches!(
            frontend.dealloc(p + 8, 0, &stack()),
            Err(DefaultFrontendError::InvalidFree(_))
        ));
        assert!(matches!(
            frontend.dealloc(0x7000_0000_1000, 0, &stack()),
            Err(DefaultFrontendError::InvalidFree(_))
        ));
        frontend.dealloc(p, 0, &stack()).unwrap();
    }

    #[test]
    fn realloc_null_allocates_and_zero_frees() {
        let mut frontend = frontend();
        let p = frontend.realloc(0, 24, 0, &stack()).unwrap();
        assert_ne!(p, 0);
        assert_eq!(frontend.get_size(p).unwrap(), 24);

        let r = frontend.realloc(p, 0, 0, &stack()).unwrap();
        assert_eq!(r, 0);
        assert_eq!(frontend.chunk_state(p), Some(ChunkState::Quarantined));
    }

    #[test]
    fn realloc_always_moves_and_copies() {
        let mut frontend = frontend();
        let p = frontend.alloc(16, 0, 0, &stack()).unwrap();
        unsafe {
            (p as *mut u8).write_bytes(0x5a, 16);
        }
        let q = frontend.realloc(p, 32, 0, &stack()).unwrap();
        assert_ne!(q, p);
        assert_eq!(frontend.get_size(q).unwrap(), 32);
        assert_eq!(frontend.chunk_state(p), Some(ChunkState::Quarantined));
        for o in 0..16 {
            assert_eq!(unsafe { *((q + o) as *const u8) }, 0x5a);
        }
        frontend.dealloc(q, 0, &stack()).unwrap();
    }

    #[test]
    fn payload_honors_requested_alignment() {
        let mut frontend = frontend();
        for align in [16usize, 64, 256, 4096] {
            let p = frontend.alloc(8, align, 0, &stack()).unwrap();
            assert_eq!(p % align, 0, "align {align}");
            assert_eq!(unsafe { SM::shadow_byte_raw(p - 8) }, 0xfa);
            frontend.dealloc(p, 0, &stack()).unwrap();
        }
        assert!(matches!(
            frontend.alloc(8, 24, 0, &stack()),
            Err(DefaultFrontendError::InvalidAlignment(24))
        ));
    }

    #[test]
    fn malloc_zero_is_one_addressable_byte() {
        let mut frontend = frontend();
        let p = frontend.alloc(0, 0, 0, &stack()).unwrap();
        assert_eq!(frontend.get_size(p).unwrap(), 0);
        assert!(!frontend.shadow().is_poison(p, 1).unwrap());
        assert!(frontend.shadow().is_poison(p + 1, 1).unwrap());
        frontend.dealloc(p, 0, &stack()).unwrap();
    }

    #[test]
    fn describes_addresses_against_the_nearest_chunk() {
        let mut frontend = frontend();
        let p = frontend.alloc(10, 0, 7, &stack()).unwrap();

        let mut out = String::new();
        assert!(frontend.describe_addr(p + 10, &mut out).unwrap());
        assert!(out.contains("0 bytes to the right of 10-byte region"), "{out}");
        assert!(out.contains("allocated by thread T7 here:"), "{out}");
        assert!(out.contains("#0 0x1111"), "{out}");

        let mut out = String::new();
        assert!(frontend.describe_addr(p + 3, &mut out).unwrap());
        assert!(out.contains("3 bytes inside of 10-byte region"), "{out}");

        frontend.dealloc(p, 9, &stack()).unwrap();
        let mut out = String::new();
        assert!(frontend.describe_addr(p, &mut out).unwrap());
        assert!(out.contains("freed by thread T9 here:"), "{out}");
        assert!(out.contains("previously allocated by thread T7 here:"), "{out}");
    }

    #[test]
    fn quarantine_eviction_recycles_the_oldest_chunk() {
        Lazy::force(&FRONTEND);
        let shadow = unsafe { SM::attach() };
        let mut frontend =
            DF::new(Backend::new(1 << 31), shadow, 128, 4096, true).unwrap();

        let p1 = frontend.alloc(2048, 0, 0, &stack()).unwrap();
        frontend.dealloc(p1, 0, &stack()).unwrap();
        assert_eq!(frontend.chunk_state(p1), Some(ChunkState::Quarantined));

        // Second free pushes the quarantine over its 4 KiB budget; the
        // oldest chunk is handed back to the freelist with a clean payload.
        let p2 = frontend.alloc(2048, 0, 0, &stack()).unwrap();
        frontend.dealloc(p2, 0, &stack()).unwrap();
        assert_eq!(frontend.chunk_state(p1), None);
        assert_eq!(frontend.chunk_state(p2), Some(ChunkState::Quarantined));
        assert!(!frontend.shadow().is_poison(p1, 2048).unwrap());
        assert_eq!(unsafe { SM::shadow_byte_raw(p1 - 8) }, 0xfa);

        // Freelist is LIFO: the next allocation of the class reuses it.
        let p3 = frontend.alloc(2048, 0, 0, &stack()).unwrap();
        assert_eq!(p3, p1);
    }
}
