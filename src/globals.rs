//! # globals
//! Registry of instrumented global variables. The compiler pads every global
//! with right slack and a module constructor reports each one here; we paint
//! the right redzone in shadow and keep the descriptors, ordered by address,
//! for fault descriptions. Registration may happen once per translation
//! unit, so it is idempotent per address with last write winning.
use alloc::collections::BTreeMap;
use core::{
    ffi::CStr,
    fmt::{self, Write},
};

use log::info;
use spin::Mutex;
use thiserror::Error;

use crate::{
    Addr, GLOBAL_AND_STACK_REDZONE,
    shadow::{PoisonType, Shadow},
};

#[derive(Debug, Clone, Copy)]
pub struct Global {
    pub beg: Addr,
    pub size: usize,
    pub name: &'static CStr,
}

const fn round_up(value: usize, to: usize) -> usize {
    (value + to - 1) & !(to - 1)
}

impl Global {
    fn aligned_size(&self, granularity: usize) -> usize {
        round_up(self.size, granularity)
    }

    fn name_str(&self) -> &str {
        self.name.to_str().unwrap_or("<non-utf8>")
    }

    /// Emit a description if `addr` falls inside this global or its
    /// redzones.
    fn describe_if_mine(
        &self,
        addr: Addr,
        granularity: usize,
        out: &mut dyn Write,
    ) -> Result<bool, fmt::Error> {
        if addr < self.beg.saturating_sub(GLOBAL_AND_STACK_REDZONE) {
            return Ok(false);
        }
        if addr >= self.beg + self.aligned_size(granularity) + GLOBAL_AND_STACK_REDZONE {
            return Ok(false);
        }
        write!(out, "{addr:#x} is located ")?;
        if addr < self.beg {
            write!(out, "{} bytes to the left", self.beg - addr)?;
        } else if addr >= self.beg + self.size {
            write!(out, "{} bytes to the right", addr - (self.beg + self.size))?;
        } else {
            write!(out, "{} bytes inside", addr - self.beg)?;
        }
        writeln!(
            out,
            " of global '{}' ({:#x}) of size {}",
            self.name_str(),
            self.beg,
            self.size
        )?;
        Ok(true)
    }
}

#[derive(Debug)]
struct RegistryInner<S: Shadow> {
    globals: BTreeMap<Addr, Global>,
    shadow: S,
}

#[derive(Debug)]
pub struct GlobalRegistry<S: Shadow> {
    inner: Mutex<RegistryInner<S>>,
    report_globals: u32,
}

impl<S: Shadow> GlobalRegistry<S> {
    pub fn new(shadow: S, report_globals: u32) -> Self {
        GlobalRegistry {
            inner: Mutex::new(RegistryInner {
                globals: BTreeMap::new(),
                shadow,
            }),
            report_globals,
        }
    }

    /// Record one global and paint its right redzone. The body is unpoisoned
    /// so a ragged tail gets its partial shadow byte.
    pub fn register(
        &self,
        beg: Addr,
        size: usize,
        name: &'static CStr,
    ) -> Result<(), GlobalRegistryError<S>> {
        if self.report_globals == 0 {
            return Ok(());
        }
        if beg & (S::GRANULARITY - 1) != 0 {
            return Err(GlobalRegistryError::UnalignedGlobal(beg));
        }
        let global = Global { beg, size, name };
        let mut inner = self.inner.lock();
        inner
            .shadow
            .unpoison(beg, size)
            .map_err(GlobalRegistryError::Shadow)?;
        inner
            .shadow
            .poison(
                beg + global.aligned_size(S::GRANULARITY),
                GLOBAL_AND_STACK_REDZONE,
                PoisonType::AsanGlobalRz,
            )
            .map_err(GlobalRegistryError::Shadow)?;
        if self.report_globals >= 2 {
            info!(
                "Added Global: beg: {beg:#x} size: {size} name: {}",
                global.name_str()
            );
        }
        inner.globals.insert(beg, global);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().globals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().globals.is_empty()
    }

    /// Describe `addr` against every registered global. Small N; a linear
    /// address-ascending scan is fine.
    pub fn describe(&self, addr: Addr, out: &mut dyn Write) -> Result<bool, fmt::Error> {
        if self.report_globals == 0 {
            return Ok(false);
        }
        let inner = self.inner.lock();
        let mut found = false;
        for global in inner.globals.values() {
            found |= global.describe_if_mine(addr, S::GRANULARITY, out)?;
        }
        Ok(found)
    }
}

#[derive(Error, Debug)]
pub enum GlobalRegistryError<S: Shadow> {
    #[error("Unaligned global: {0:#x}")]
    UnalignedGlobal(Addr),
    #[error("Shadow error: {0:?}")]
    Shadow(S::Error),
}
