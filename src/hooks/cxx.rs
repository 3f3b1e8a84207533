//! The C++ allocation surface, exported under the Itanium-mangled names.
//! Throwing and nothrow forms are identical here: allocation failure is
//! always fatal in this runtime, so there is nothing to throw.
use core::ffi::c_void;

use log::trace;

use crate::{Addr, rt, size_t};

/// # Safety
/// `operator new(size_t)`
#[unsafe(export_name = "_Znwm")]
pub unsafe extern "C" fn operator_new(size: size_t) -> *mut c_void {
    trace!("operator new - size: {size:#x}");
    rt::init();
    rt::memalign(0, size) as *mut c_void
}

/// # Safety
/// `operator new[](size_t)`
#[unsafe(export_name = "_Znam")]
pub unsafe extern "C" fn operator_new_array(size: size_t) -> *mut c_void {
    trace!("operator new[] - size: {size:#x}");
    rt::init();
    rt::memalign(0, size) as *mut c_void
}

/// # Safety
/// `operator new(size_t, nothrow_t const&)`
#[unsafe(export_name = "_ZnwmRKSt9nothrow_t")]
pub unsafe extern "C" fn operator_new_nothrow(size: size_t, _nothrow: *const c_void) -> *mut c_void {
    trace!("operator new nothrow - size: {size:#x}");
    rt::init();
    rt::memalign(0, size) as *mut c_void
}

/// # Safety
/// `operator new[](size_t, nothrow_t const&)`
#[unsafe(export_name = "_ZnamRKSt9nothrow_t")]
pub unsafe extern "C" fn operator_new_array_nothrow(
    size: size_t,
    _nothrow: *const c_void,
) -> *mut c_void {
    trace!("operator new[] nothrow - size: {size:#x}");
    rt::init();
    rt::memalign(0, size) as *mut c_void
}

/// # Safety
/// `operator delete(void*)`
#[unsafe(export_name = "_ZdlPv")]
pub unsafe extern "C" fn operator_delete(ptr: *mut c_void) {
    trace!("operator delete - ptr: {ptr:p}");
    if ptr.is_null() {
        return;
    }
    rt::init();
    rt::free(ptr as Addr)
}

/// # Safety
/// `operator delete[](void*)`
#[unsafe(export_name = "_ZdaPv")]
pub unsafe extern "C" fn operator_delete_array(ptr: *mut c_void) {
    trace!("operator delete[] - ptr: {ptr:p}");
    if ptr.is_null() {
        return;
    }
    rt::init();
    rt::free(ptr as Addr)
}

/// # Safety
/// `operator delete(void*, nothrow_t const&)`
#[unsafe(export_name = "_ZdlPvRKSt9nothrow_t")]
pub unsafe extern "C" fn operator_delete_nothrow(ptr: *mut c_void, _nothrow: *const c_void) {
    trace!("operator delete nothrow - ptr: {ptr:p}");
    if ptr.is_null() {
        return;
    }
    rt::init();
    rt::free(ptr as Addr)
}

/// # Safety
/// `operator delete[](void*, nothrow_t const&)`
#[unsafe(export_name = "_ZdaPvRKSt9nothrow_t")]
pub unsafe extern "C" fn operator_delete_array_nothrow(ptr: *mut c_void, _nothrow: *const c_void) {
    trace!("operator delete[] nothrow - ptr: {ptr:p}");
    if ptr.is_null() {
        return;
    }
    rt::init();
    rt::free(ptr as Addr)
}
