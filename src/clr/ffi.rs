//! FFI signatures for the CoreCLR hosting library and the interop assembly.
//!
//! Entry points are resolved at run time, so everything here is a function
//! pointer type rather than an `extern` block.

use std::ffi::{c_char, c_int, c_uint, c_void};

/// Name of the hosting shared library on this platform
#[cfg(target_os = "macos")]
pub const HOSTING_LIBRARY: &str = "libcoreclr.dylib";
#[cfg(all(unix, not(target_os = "macos")))]
pub const HOSTING_LIBRARY: &str = "libcoreclr.so";
#[cfg(windows)]
pub const HOSTING_LIBRARY: &str = "coreclr.dll";

pub const INITIALIZE_SYMBOL: &str = "coreclr_initialize";
pub const CREATE_DELEGATE_SYMBOL: &str = "coreclr_create_delegate";
pub const SHUTDOWN_SYMBOL: &str = "coreclr_shutdown_2";

/// Opaque host handle returned by `coreclr_initialize`
pub type HostHandle = *mut c_void;

/// AppDomain identifier returned by `coreclr_initialize`
pub type DomainId = c_uint;

pub type InitializeFn = unsafe extern "C" fn(
    exe_path: *const c_char,
    app_domain_friendly_name: *const c_char,
    property_count: c_int,
    property_keys: *const *const c_char,
    property_values: *const *const c_char,
    host_handle: *mut HostHandle,
    domain_id: *mut DomainId,
) -> c_int;

pub type CreateDelegateFn = unsafe extern "C" fn(
    host_handle: HostHandle,
    domain_id: DomainId,
    entry_point_assembly_name: *const c_char,
    entry_point_type_name: *const c_char,
    entry_point_method_name: *const c_char,
    delegate: *mut *mut c_void,
) -> c_int;

pub type ShutdownFn = unsafe extern "C" fn(
    host_handle: HostHandle,
    domain_id: DomainId,
    latched_exit_code: *mut c_int,
) -> c_int;

/// `SUCCEEDED()` for hosting status codes
pub fn succeeded(status: c_int) -> bool {
    status >= 0
}

// Delegates exported by PluginInterop.PluginLoader

pub const INTEROP_ASSEMBLY: &str = "PluginInterop";
pub const INTEROP_ASSEMBLY_FILE: &str = "PluginInterop.dll";
pub const INTEROP_TYPE: &str = "PluginInterop.PluginLoader";

pub type LoadPluginFn = unsafe extern "C" fn(path: *const c_char) -> *mut c_char;

pub type GetExportCountFn = unsafe extern "C" fn(plugin_name: *const c_char) -> c_int;

pub type GetExportNameFn =
    unsafe extern "C" fn(plugin_name: *const c_char, index: c_int) -> *mut c_char;

pub type InvokeFn = unsafe extern "C" fn(
    plugin_name: *const c_char,
    command_name: *const c_char,
    services: *mut c_void,
    args: *const c_char,
);
