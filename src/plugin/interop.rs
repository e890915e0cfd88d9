//! Delegates exported by the managed `PluginInterop` assembly

use std::ffi::{c_char, c_void, CStr, CString};
use std::path::{Path, PathBuf};

use nix::libc;

use crate::clr::bridge::{path_cstring, RuntimeBridge};
use crate::clr::ffi::{
    GetExportCountFn, GetExportNameFn, InvokeFn, LoadPluginFn, INTEROP_ASSEMBLY, INTEROP_TYPE,
};
use crate::clr::properties::to_cstring;
use crate::error::{BridgeError, Result};
use crate::services::ServicesObject;

const LOAD_PLUGIN: &str = "LoadPlugin";
const GET_EXPORT_COUNT: &str = "GetExportCount";
const GET_EXPORT_NAME: &str = "GetExportName";
const INVOKE: &str = "Invoke";

/// Name the managed loader gave a plugin; identifies it in later calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginHandle {
    name: CString,
}

impl PluginHandle {
    pub fn name(&self) -> &str {
        self.name.to_str().unwrap_or_default()
    }
}

/// Something that can run a plugin command against a services object
pub trait InvokeTarget {
    /// Directory reported to managed code as the runtime location
    fn runtime_directory(&self) -> &Path;

    fn invoke(
        &self,
        plugin: &PluginHandle,
        command: &str,
        services: &mut ServicesObject<'_>,
        args: &str,
    ) -> Result<()>;
}

/// The four loader delegates, resolved once after the runtime started
pub struct PluginInterop {
    load_plugin: LoadPluginFn,
    get_export_count: GetExportCountFn,
    get_export_name: GetExportNameFn,
    invoke: InvokeFn,
    runtime_dir: PathBuf,
}

impl PluginInterop {
    /// Resolve every loader delegate; fails on the first one missing
    pub fn resolve(bridge: &RuntimeBridge) -> Result<Self> {
        let runtime_dir = bridge
            .runtime_directory()
            .ok_or(BridgeError::NotStarted)?
            .to_path_buf();

        // SAFETY: the ffi aliases match the [UnmanagedCallersOnly] signatures
        // of PluginInterop.PluginLoader
        unsafe {
            Ok(Self {
                load_plugin: resolve_one(bridge, LOAD_PLUGIN)?,
                get_export_count: resolve_one(bridge, GET_EXPORT_COUNT)?,
                get_export_name: resolve_one(bridge, GET_EXPORT_NAME)?,
                invoke: resolve_one(bridge, INVOKE)?,
                runtime_dir,
            })
        }
    }

    /// Load the plugin assembly at `path`
    pub fn load_plugin(&self, path: &Path) -> Result<PluginHandle> {
        let path_c = path_cstring(path)?;

        // SAFETY: path_c is NUL-terminated and outlives the call
        let name = unsafe { take_managed_string((self.load_plugin)(path_c.as_ptr())) };
        match name.filter(|n| !n.is_empty()) {
            Some(name) => {
                log::info!("Loaded managed plugin {} from {}", name, path.display());
                Ok(PluginHandle {
                    name: to_cstring(&name)?,
                })
            }
            None => Err(BridgeError::PluginLoadFailure {
                path: path.to_path_buf(),
            }),
        }
    }

    pub fn export_count(&self, plugin: &PluginHandle) -> usize {
        // SAFETY: plugin name is NUL-terminated
        let count = unsafe { (self.get_export_count)(plugin.name.as_ptr()) };
        usize::try_from(count).unwrap_or(0)
    }

    pub fn export_name(&self, plugin: &PluginHandle, index: usize) -> Option<String> {
        let index = i32::try_from(index).ok()?;
        // SAFETY: plugin name is NUL-terminated; the result is ours to free
        unsafe { take_managed_string((self.get_export_name)(plugin.name.as_ptr(), index)) }
    }

    /// Export names in index order, skipping any the loader cannot name
    pub fn export_names(&self, plugin: &PluginHandle) -> Vec<String> {
        let count = self.export_count(plugin);
        log::debug!("Plugin {} exports {} commands", plugin.name(), count);

        (0..count)
            .filter_map(|index| {
                let name = self.export_name(plugin, index);
                if name.is_none() {
                    log::warn!("Export {} of {} has no name", index, plugin.name());
                }
                name
            })
            .collect()
    }
}

impl InvokeTarget for PluginInterop {
    fn runtime_directory(&self) -> &Path {
        &self.runtime_dir
    }

    fn invoke(
        &self,
        plugin: &PluginHandle,
        command: &str,
        services: &mut ServicesObject<'_>,
        args: &str,
    ) -> Result<()> {
        let command_c = to_cstring(command)?;
        let args_c = to_cstring(args)?;

        log::trace!("Invoke {}!{} '{}'", plugin.name(), command, args);
        // SAFETY: strings outlive the call; services stays valid until it returns
        unsafe {
            (self.invoke)(
                plugin.name.as_ptr(),
                command_c.as_ptr(),
                services.as_raw(),
                args_c.as_ptr(),
            )
        };
        Ok(())
    }
}

unsafe fn resolve_one<F: Copy>(bridge: &RuntimeBridge, method: &str) -> Result<F> {
    unsafe { bridge.resolve_as::<F>(INTEROP_ASSEMBLY, INTEROP_TYPE, method) }?.ok_or_else(|| {
        BridgeError::DelegateResolutionFailure {
            symbol: method.to_string(),
            assembly: INTEROP_ASSEMBLY.to_string(),
        }
    })
}

/// Copy a string allocated by the managed side and release it with `free`
unsafe fn take_managed_string(ptr: *mut c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let text = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
    unsafe { libc::free(ptr as *mut c_void) };
    Some(text)
}
