use core::{ffi::c_void, ptr::null_mut, slice};

use log::trace;
use rustix::{
    io::Errno,
    mm::{MapFlags, ProtFlags, mmap_anonymous, munmap},
};
use thiserror::Error;

use crate::{
    Addr,
    mmap::{Mmap, MmapProt},
};

/// Anonymous private mappings obtained straight from the kernel.
#[derive(Debug)]
pub struct LinuxMmap {
    addr: Addr,
    len: usize,
}

impl From<MmapProt> for ProtFlags {
    fn from(prot: MmapProt) -> Self {
        let mut flags = ProtFlags::empty();
        if prot.contains(MmapProt::READ) {
            flags |= ProtFlags::READ;
        }
        if prot.contains(MmapProt::WRITE) {
            flags |= ProtFlags::WRITE;
        }
        if prot.contains(MmapProt::EXEC) {
            flags |= ProtFlags::EXEC;
        }
        flags
    }
}

impl Mmap for LinuxMmap {
    type Error = LinuxMmapError;

    fn map(len: usize) -> Result<Self, Self::Error> {
        let map = unsafe {
            mmap_anonymous(
                null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::PRIVATE | MapFlags::NORESERVE,
            )
        }
        .map_err(|errno| LinuxMmapError::FailedToMap(len, errno))?;
        let addr = map as Addr;
        trace!("map - addr: {addr:#x}, len: {len:#x}");
        Ok(LinuxMmap { addr, len })
    }

    fn map_at(addr: Addr, len: usize, prot: MmapProt) -> Result<(), Self::Error> {
        trace!("map_at - addr: {addr:#x}, len: {len:#x}, prot: {prot:?}");
        let map = unsafe {
            mmap_anonymous(
                addr as *mut c_void,
                len,
                prot.into(),
                MapFlags::PRIVATE | MapFlags::FIXED | MapFlags::NORESERVE,
            )
        }
        .map_err(|errno| LinuxMmapError::FailedToMapAt(addr, len, errno))?;
        if map as Addr != addr {
            return Err(LinuxMmapError::MappedElsewhere(addr, map as Addr));
        }
        Ok(())
    }

    unsafe fn unmap(addr: Addr, len: usize) -> Result<(), Self::Error> {
        trace!("unmap - addr: {addr:#x}, len: {len:#x}");
        unsafe { munmap(addr as *mut c_void, len) }
            .map_err(|errno| LinuxMmapError::FailedToUnmap(addr, len, errno))
    }

    fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.addr as *const u8, self.len) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.addr as *mut u8, self.len) }
    }
}

impl Drop for LinuxMmap {
    fn drop(&mut self) {
        unsafe { munmap(self.addr as *mut c_void, self.len) }.expect("munmap failed");
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum LinuxMmapError {
    #[error("Failed to map - len: {0:#x}, errno: {1}")]
    FailedToMap(usize, Errno),
    #[error("Failed to map - addr: {0:#x}, len: {1:#x}, errno: {2}")]
    FailedToMapAt(Addr, usize, Errno),
    #[error("Fixed mapping moved - requested: {0:#x}, got: {1:#x}")]
    MappedElsewhere(Addr, Addr),
    #[error("Failed to unmap - addr: {0:#x}, len: {1:#x}, errno: {2}")]
    FailedToUnmap(Addr, usize, Errno),
}
