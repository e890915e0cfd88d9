//! CoreCLR host bridge
//!
//! Loads the hosting library, starts the runtime once per process and
//! resolves managed methods into native function pointers.

use std::ffi::{c_int, c_void, CString};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use crate::clr::assemblies;
use crate::clr::ffi::{
    self, CreateDelegateFn, DomainId, HostHandle, InitializeFn, ShutdownFn, HOSTING_LIBRARY,
};
use crate::clr::library::{self, DynamicLoader, LibraryLoader, SymbolSource};
use crate::clr::properties::{to_cstring, PropertyTable};
use crate::config::RuntimeConfig;
use crate::error::{BridgeError, Result};

/// Longest path the platform accepts, including the terminator
#[cfg(unix)]
pub const PATH_MAX: usize = nix::libc::PATH_MAX as usize;
#[cfg(not(unix))]
pub const PATH_MAX: usize = 260;

/// A started runtime: library kept loaded, entry points and handles cached
struct HostedRuntime {
    create_delegate: CreateDelegateFn,
    shutdown: ShutdownFn,
    handle: HostHandle,
    domain: DomainId,
    runtime_dir: PathBuf,
    // Dropped last so the entry points above stay valid
    _library: Box<dyn SymbolSource>,
}

/// Process-wide bridge to the managed runtime
pub struct RuntimeBridge {
    loader: Box<dyn LibraryLoader>,
    runtime: Option<HostedRuntime>,
}

impl RuntimeBridge {
    /// Bridge that loads the hosting library with `dlopen`
    pub fn new() -> Self {
        Self::with_loader(Box::new(DynamicLoader))
    }

    pub fn with_loader(loader: Box<dyn LibraryLoader>) -> Self {
        Self {
            loader,
            runtime: None,
        }
    }

    /// Whether a start call has succeeded
    pub fn is_started(&self) -> bool {
        self.runtime.is_some()
    }

    /// Cached handle and domain, once started
    pub fn handles(&self) -> Option<(HostHandle, DomainId)> {
        self.runtime.as_ref().map(|rt| (rt.handle, rt.domain))
    }

    /// Directory the running runtime was loaded from
    pub fn runtime_directory(&self) -> Option<&Path> {
        self.runtime.as_ref().map(|rt| rt.runtime_dir.as_path())
    }

    /// Start the runtime, reading toggles from the process environment.
    ///
    /// A second call after a successful start is a no-op returning the
    /// cached handle and domain.
    pub fn start(
        &mut self,
        host_name: &str,
        current_exe: &Path,
        runtime_dir: &Path,
        seed_assembly: &Path,
    ) -> Result<(HostHandle, DomainId)> {
        if let Some(handles) = self.handles() {
            return Ok(handles);
        }
        self.start_with_config(
            host_name,
            current_exe,
            runtime_dir,
            seed_assembly,
            &RuntimeConfig::from_env(),
        )
    }

    /// Start the runtime with an explicit configuration
    pub fn start_with_config(
        &mut self,
        host_name: &str,
        current_exe: &Path,
        runtime_dir: &Path,
        seed_assembly: &Path,
        config: &RuntimeConfig,
    ) -> Result<(HostHandle, DomainId)> {
        if let Some(handles) = self.handles() {
            log::debug!("Runtime already initialized");
            return Ok(handles);
        }

        let library_path = runtime_dir.join(HOSTING_LIBRARY);
        if library_path.as_os_str().len() >= PATH_MAX {
            return Err(BridgeError::PathTooLong {
                library: HOSTING_LIBRARY,
                path: library_path,
            });
        }

        let app_dir = seed_assembly
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let override_dir = config.override_directory(runtime_dir);

        let native_search_path =
            assemblies::native_search_path(&app_dir, override_dir, runtime_dir);

        let mut tpa_dirs: Vec<&Path> = Vec::with_capacity(2);
        if let Some(dir) = override_dir {
            tpa_dirs.push(dir);
        }
        tpa_dirs.push(runtime_dir);
        let trusted_assemblies = assemblies::build(&tpa_dirs, Some(seed_assembly));

        let library = self.loader.open(&library_path)?;
        let (initialize, create_delegate, shutdown) = resolve_entry_points(library.as_ref())?;

        let app_path = app_dir.to_string_lossy();
        let properties =
            PropertyTable::new(&trusted_assemblies, &app_path, &native_search_path, config)?;
        let (keys, values) = properties.as_raw();

        let exe_path = path_cstring(current_exe)?;
        let friendly_name = to_cstring(host_name)?;

        let mut handle: HostHandle = std::ptr::null_mut();
        let mut domain: DomainId = 0;

        log::info!(
            "Initializing CoreCLR from {} ({} trusted assemblies)",
            runtime_dir.display(),
            trusted_assemblies.len()
        );

        // SAFETY: every pointer argument outlives the call; the entry point
        // was resolved from the library that is still loaded
        let status = unsafe {
            initialize(
                exe_path.as_ptr(),
                friendly_name.as_ptr(),
                properties.len() as c_int,
                keys.as_ptr(),
                values.as_ptr(),
                &mut handle,
                &mut domain,
            )
        };

        if !ffi::succeeded(status) {
            log::error!("coreclr_initialize failed - status: {:#010x}", status);
            return Err(BridgeError::RuntimeStartFailure { status });
        }

        log::info!("CoreCLR initialized (domain {})", domain);

        self.runtime = Some(HostedRuntime {
            create_delegate,
            shutdown,
            handle,
            domain,
            runtime_dir: runtime_dir.to_path_buf(),
            _library: library,
        });

        Ok((handle, domain))
    }

    /// Resolve a managed static method into a native function pointer.
    ///
    /// Returns `Ok(None)` when the runtime cannot find the method.
    pub fn resolve(
        &self,
        assembly: &str,
        type_name: &str,
        method: &str,
    ) -> Result<Option<NonNull<c_void>>> {
        let runtime = self.runtime.as_ref().ok_or(BridgeError::NotStarted)?;

        let assembly_c = to_cstring(assembly)?;
        let type_c = to_cstring(type_name)?;
        let method_c = to_cstring(method)?;
        let mut delegate: *mut c_void = std::ptr::null_mut();

        // SAFETY: handle/domain come from a successful initialize
        let status = unsafe {
            (runtime.create_delegate)(
                runtime.handle,
                runtime.domain,
                assembly_c.as_ptr(),
                type_c.as_ptr(),
                method_c.as_ptr(),
                &mut delegate,
            )
        };

        if !ffi::succeeded(status) {
            log::debug!(
                "coreclr_create_delegate({}, {}, {}) failed - status: {:#010x}",
                assembly,
                type_name,
                method,
                status
            );
            return Ok(None);
        }

        Ok(NonNull::new(delegate))
    }

    /// Resolve a managed method as a typed function pointer.
    ///
    /// # Safety
    /// `F` must be an `extern "C"` function pointer type matching the
    /// managed method's marshalled signature.
    pub unsafe fn resolve_as<F: Copy>(
        &self,
        assembly: &str,
        type_name: &str,
        method: &str,
    ) -> Result<Option<F>> {
        Ok(self
            .resolve(assembly, type_name, method)?
            .map(|ptr| unsafe { library::cast_fn::<F>(ptr) }))
    }

    /// Shut the runtime down and unload the hosting library.
    ///
    /// Returns the latched exit code.
    pub fn shutdown(mut self) -> Result<i32> {
        let runtime = self.runtime.take().ok_or(BridgeError::NotStarted)?;
        let mut exit_code: c_int = 0;

        // SAFETY: handle/domain come from a successful initialize
        let status = unsafe { (runtime.shutdown)(runtime.handle, runtime.domain, &mut exit_code) };
        if !ffi::succeeded(status) {
            log::warn!("coreclr_shutdown_2 failed - status: {:#010x}", status);
            return Err(BridgeError::RuntimeStartFailure { status });
        }

        Ok(exit_code)
    }
}

impl Default for RuntimeBridge {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_entry_points(
    library: &dyn SymbolSource,
) -> Result<(InitializeFn, CreateDelegateFn, ShutdownFn)> {
    let missing = |symbol| BridgeError::MissingEntryPoint {
        symbol,
        library: HOSTING_LIBRARY,
    };

    // SAFETY: the hosting library exports these names with these signatures
    unsafe {
        let initialize = library::resolve_fn::<InitializeFn>(library, ffi::INITIALIZE_SYMBOL)
            .ok_or_else(|| missing(ffi::INITIALIZE_SYMBOL))?;
        let create_delegate =
            library::resolve_fn::<CreateDelegateFn>(library, ffi::CREATE_DELEGATE_SYMBOL)
                .ok_or_else(|| missing(ffi::CREATE_DELEGATE_SYMBOL))?;
        let shutdown = library::resolve_fn::<ShutdownFn>(library, ffi::SHUTDOWN_SYMBOL)
            .ok_or_else(|| missing(ffi::SHUTDOWN_SYMBOL))?;
        Ok((initialize, create_delegate, shutdown))
    }
}

/// Path as a C string, byte-for-byte on Unix
pub(crate) fn path_cstring(path: &Path) -> Result<CString> {
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        CString::new(path.as_os_str().as_bytes())
            .map_err(|_| BridgeError::InvalidString(path.display().to_string()))
    }

    #[cfg(not(unix))]
    {
        to_cstring(&path.to_string_lossy())
    }
}

/// Absolute path of `PluginInterop.dll` next to the extension image
pub fn interop_assembly_path(extension_dir: &Path) -> PathBuf {
    extension_dir.join(ffi::INTEROP_ASSEMBLY_FILE)
}
