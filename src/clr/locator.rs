//! Runtime locator - find the CoreCLR directory from the debug target

use std::path::{Path, PathBuf};

use crate::clr::ffi::HOSTING_LIBRARY;
use crate::debug::DebuggerHost;
use crate::error::{BridgeError, Result};

/// Used until the operator sets a path or the target reveals one
pub const DEFAULT_RUNTIME_DIRECTORY: &str = "/usr/share/dotnet/shared/Microsoft.NETCore.App/2.2.1/";

/// Directory of the hosting library loaded in the selected target
pub fn try_locate(host: &dyn DebuggerHost) -> Result<PathBuf> {
    let target = host.target().ok_or(BridgeError::TargetNotSelected)?;

    target
        .modules()
        .iter()
        .find(|module| module.file_name() == HOSTING_LIBRARY)
        .and_then(|module| module.directory())
        .map(Path::to_path_buf)
        .ok_or(BridgeError::RuntimeNotFound {
            library: HOSTING_LIBRARY,
        })
}

/// Like [`try_locate`], logging instead of failing
pub fn locate(host: &dyn DebuggerHost) -> Option<PathBuf> {
    match try_locate(host) {
        Ok(dir) => {
            log::info!("Found {} in {}", HOSTING_LIBRARY, dir.display());
            Some(dir)
        }
        Err(e) => {
            log::debug!("Runtime directory not detected: {}", e);
            None
        }
    }
}

/// Directory of the image containing this code
#[cfg(unix)]
pub fn extension_directory() -> Option<PathBuf> {
    use nix::libc;
    use std::ffi::CStr;
    use std::os::unix::ffi::OsStrExt;

    let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
    let anchor = extension_directory as fn() -> Option<PathBuf> as *const libc::c_void;

    // SAFETY: dladdr only reads the address and fills `info`
    let found = unsafe { libc::dladdr(anchor, &mut info) };
    if found == 0 || info.dli_fname.is_null() {
        log::warn!("dladdr could not resolve the extension image");
        return None;
    }

    // SAFETY: dli_fname points at the loader's NUL-terminated image path
    let image = unsafe { CStr::from_ptr(info.dli_fname) };
    let image = Path::new(std::ffi::OsStr::from_bytes(image.to_bytes()));
    let image = image.canonicalize().unwrap_or_else(|_| image.to_path_buf());
    image.parent().map(Path::to_path_buf)
}
