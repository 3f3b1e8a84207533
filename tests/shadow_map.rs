#[cfg(all(test, feature = "linux", target_os = "linux"))]
mod tests {
    use asan_rt::{
        Addr,
        mmap::{Mmap, linux::LinuxMmap},
        report::{self, ErrorKind},
        shadow::{
            PoisonType, Shadow,
            map::{DefaultShadowLayout, ShadowError, ShadowLayout, ShadowMap},
        },
    };
    use spin::{Lazy, Mutex, MutexGuard};

    type SM = ShadowMap<LinuxMmap, DefaultShadowLayout>;

    const MAP_LEN: usize = 1 << 20;

    static SHADOW: Lazy<Mutex<SM>> = Lazy::new(|| {
        env_logger::init();
        Mutex::new(SM::reserve(false).unwrap())
    });

    static MAP: Lazy<LinuxMmap> = Lazy::new(|| {
        let map = LinuxMmap::map(MAP_LEN).unwrap();
        assert!(SM::is_memory(map.as_slice().as_ptr() as Addr, MAP_LEN));
        map
    });

    fn shadow() -> MutexGuard<'static, SM> {
        SHADOW.lock()
    }

    /// A private 4 KiB slice of application memory per test.
    fn region(slot: usize) -> Addr {
        MAP.as_slice().as_ptr() as Addr + slot * 0x1000
    }

    #[test]
    fn poison_codes_are_the_contract_bytes() {
        assert_eq!(PoisonType::AsanStackLeftRz.byte(), 0xf1);
        assert_eq!(PoisonType::AsanStackMidRz.byte(), 0xf2);
        assert_eq!(PoisonType::AsanStackRightRz.byte(), 0xf3);
        assert_eq!(PoisonType::AsanStackAfterReturn.byte(), 0xf4);
        assert_eq!(PoisonType::AsanStackPartialRz.byte(), 0xf5);
        assert_eq!(PoisonType::AsanGlobalRz.byte(), 0xf9);
        assert_eq!(PoisonType::AsanHeapLeftRz.byte(), 0xfa);
        assert_eq!(PoisonType::AsanHeapRightRz.byte(), 0xfb);
        assert_eq!(PoisonType::AsanHeapFreed.byte(), 0xfd);
        assert_eq!(PoisonType::AsanValid.byte(), 0x00);
    }

    #[test]
    fn poison_and_unpoison_roundtrip() {
        let mut shadow = shadow();
        let start = region(0);
        shadow.poison(start, 64, PoisonType::AsanHeapLeftRz).unwrap();
        assert!(shadow.is_poison(start, 64).unwrap());
        assert!(shadow.is_poison(start + 63, 1).unwrap());
        unsafe {
            assert_eq!(SM::shadow_byte_raw(start), 0xfa);
        }
        shadow.unpoison(start, 64).unwrap();
        assert!(!shadow.is_poison(start, 64).unwrap());
    }

    #[test]
    fn partial_tail_is_encoded_in_the_low_codes() {
        let mut shadow = shadow();
        let start = region(1);
        shadow.poison(start, 16, PoisonType::AsanHeapRightRz).unwrap();
        shadow.unpoison(start, 13).unwrap();
        unsafe {
            assert_eq!(SM::shadow_byte_raw(start), 0x00);
            assert_eq!(SM::shadow_byte_raw(start + 8), 0x05);
        }
        assert!(!shadow.is_poison(start, 13).unwrap());
        assert!(shadow.is_poison(start, 14).unwrap());
        assert!(shadow.is_poison(start + 13, 1).unwrap());
    }

    #[test]
    fn word_rule_accepts_prefix_accesses_only() {
        let mut shadow = shadow();
        let start = region(2);
        shadow.poison(start, 8, PoisonType::AsanHeapRightRz).unwrap();
        shadow.unpoison(start, 5).unwrap();
        // shadow == 0, or (a mod G) + k <= shadow
        assert!(!shadow.is_poison(start, 5).unwrap());
        assert!(!shadow.is_poison(start + 2, 3).unwrap());
        assert!(shadow.is_poison(start + 2, 4).unwrap());
        assert!(shadow.is_poison(start + 5, 1).unwrap());
    }

    #[test]
    fn poison_requires_aligned_ends() {
        let mut shadow = shadow();
        let start = region(3);
        assert_eq!(
            shadow.poison(start + 1, 8, PoisonType::AsanHeapLeftRz),
            Err(ShadowError::UnalignedStartAddress(start + 1))
        );
        assert_eq!(
            shadow.poison(start, 12, PoisonType::AsanHeapLeftRz),
            Err(ShadowError::UnalignedEndAddress(start, 12))
        );
        assert_eq!(
            shadow.unpoison(start + 1, 8),
            Err(ShadowError::UnalignedStartAddress(start + 1))
        );
    }

    #[test]
    fn rejects_addresses_outside_application_memory() {
        let mut shadow = shadow();
        let gap = DefaultShadowLayout::SHADOW_GAP_BEG;
        assert_eq!(
            shadow.poison(gap, 8, PoisonType::AsanHeapLeftRz),
            Err(ShadowError::InvalidMemoryAddress(gap))
        );
        assert_eq!(
            shadow.is_poison(gap, 8),
            Err(ShadowError::InvalidMemoryAddress(gap))
        );
    }

    #[test]
    fn zero_length_queries_are_trivially_clean() {
        let mut shadow = shadow();
        let start = region(4);
        shadow.poison(start, 8, PoisonType::AsanHeapFreed).unwrap();
        assert!(!shadow.is_poison(start, 0).unwrap());
        shadow.unpoison(start, 0).unwrap();
        assert!(shadow.is_poison(start, 1).unwrap());
        shadow.unpoison(start, 8).unwrap();
    }

    #[test]
    fn classification_reads_species_through_partials() {
        let mut shadow = shadow();
        let start = region(5);
        shadow.poison(start, 16, PoisonType::AsanGlobalRz).unwrap();
        shadow.unpoison(start, 5).unwrap();
        unsafe {
            assert_eq!(
                report::classify_addr::<LinuxMmap, DefaultShadowLayout>(start + 8),
                ErrorKind::GlobalBufferOverflow
            );
            // Partial byte at the boundary word defers to the species that
            // follows it.
            assert_eq!(
                report::classify_addr::<LinuxMmap, DefaultShadowLayout>(start + 5),
                ErrorKind::GlobalBufferOverflow
            );
        }

        shadow.poison(start + 32, 8, PoisonType::AsanStackAfterReturn).unwrap();
        unsafe {
            assert_eq!(
                report::classify_addr::<LinuxMmap, DefaultShadowLayout>(start + 32),
                ErrorKind::StackUseAfterReturn
            );
        }
    }
}
