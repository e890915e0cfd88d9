//! Dynamic library loading and by-name symbol resolution.
//!
//! Every resolution site (hosting entry points, managed delegates) goes
//! through [`SymbolSource`]: resolve a name, get an optional address.

use std::ffi::c_void;
use std::path::Path;
use std::ptr::NonNull;

use crate::error::{BridgeError, Result};

/// Something that can turn a symbol name into an address
pub trait SymbolSource {
    /// Address of `name`, or `None` if it is not exported
    fn symbol(&self, name: &str) -> Option<NonNull<c_void>>;
}

/// Opens shared libraries
pub trait LibraryLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn SymbolSource>>;
}

/// Resolve `name` from `source` as a function pointer of type `F`.
///
/// # Safety
/// `F` must be a function pointer type whose signature matches the symbol.
pub unsafe fn resolve_fn<F: Copy>(source: &dyn SymbolSource, name: &str) -> Option<F> {
    source.symbol(name).map(|ptr| unsafe { cast_fn(ptr) })
}

/// Reinterpret a code address as a function pointer of type `F`.
///
/// # Safety
/// `F` must be a function pointer type whose signature matches the code at `ptr`.
pub unsafe fn cast_fn<F: Copy>(ptr: NonNull<c_void>) -> F {
    assert_eq!(
        std::mem::size_of::<F>(),
        std::mem::size_of::<*mut c_void>(),
        "function pointer type expected"
    );
    let raw = ptr.as_ptr();
    unsafe { std::mem::transmute_copy::<*mut c_void, F>(&raw) }
}

/// `dlopen`-backed loader used in production
#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicLoader;

struct DynamicLibrary {
    library: libloading::Library,
}

impl SymbolSource for DynamicLibrary {
    fn symbol(&self, name: &str) -> Option<NonNull<c_void>> {
        let mut symbol_name = name.as_bytes().to_vec();
        symbol_name.push(0);

        // SAFETY: the symbol is only read as an address, never called here
        let symbol = unsafe { self.library.get::<*mut c_void>(&symbol_name) };
        match symbol {
            Ok(symbol) => NonNull::new(*symbol),
            Err(e) => {
                log::debug!("Symbol {} not found: {}", name, e);
                None
            }
        }
    }
}

impl Drop for DynamicLibrary {
    fn drop(&mut self) {
        log::debug!("Unloading hosting library");
    }
}

impl LibraryLoader for DynamicLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn SymbolSource>> {
        log::info!("Loading {}", path.display());

        // SAFETY: loading runs the library's initializers; the hosting
        // library is trusted by the operator who pointed us at it
        let library = unsafe { open_library(path) }.map_err(|e| {
            BridgeError::LibraryLoadFailure {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;

        Ok(Box::new(DynamicLibrary { library }))
    }
}

#[cfg(unix)]
unsafe fn open_library(path: &Path) -> std::result::Result<libloading::Library, libloading::Error> {
    use libloading::os::unix::{Library, RTLD_LOCAL, RTLD_NOW};

    unsafe { Library::open(Some(path), RTLD_NOW | RTLD_LOCAL) }.map(Into::into)
}

#[cfg(not(unix))]
unsafe fn open_library(path: &Path) -> std::result::Result<libloading::Library, libloading::Error> {
    unsafe { libloading::Library::new(path) }
}
