//! # frontend
//! The frontend of the allocator is responsible for applying the value-added
//! sanitizer features on behalf of incoming user requests for allocations:
//! red-zones, shadow poisoning, quarantine and memory tracking.
use core::fmt::Debug;

use crate::{Addr, stack::StackTrace};

pub mod default;
pub mod quarantine;

pub trait AllocatorFrontend: Sized + Send {
    type Error: Debug;

    fn alloc(
        &mut self,
        len: usize,
        align: usize,
        tid: u32,
        stack: &StackTrace,
    ) -> Result<Addr, Self::Error>;

    fn dealloc(&mut self, addr: Addr, tid: u32, stack: &StackTrace) -> Result<(), Self::Error>;

    fn realloc(
        &mut self,
        addr: Addr,
        len: usize,
        tid: u32,
        stack: &StackTrace,
    ) -> Result<Addr, Self::Error>;

    fn get_size(&self, addr: Addr) -> Result<usize, Self::Error>;
}
