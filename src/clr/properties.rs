//! Runtime property table passed to `coreclr_initialize`.

use std::ffi::{c_char, CString};

use crate::clr::assemblies::{NativeSearchPath, TrustedAssemblyList};
use crate::config::{bool_property, RuntimeConfig};
use crate::error::{BridgeError, Result};

pub const TRUSTED_PLATFORM_ASSEMBLIES: &str = "TRUSTED_PLATFORM_ASSEMBLIES";
pub const APP_PATHS: &str = "APP_PATHS";
pub const APP_NI_PATHS: &str = "APP_NI_PATHS";
pub const NATIVE_DLL_SEARCH_DIRECTORIES: &str = "NATIVE_DLL_SEARCH_DIRECTORIES";
pub const GC_SERVER: &str = "System.GC.Server";
pub const GLOBALIZATION_INVARIANT: &str = "System.Globalization.Invariant";

/// Fixed key/value table, kept alive for the duration of the initialize call
#[derive(Debug)]
pub struct PropertyTable {
    keys: Vec<CString>,
    values: Vec<CString>,
}

impl PropertyTable {
    pub fn new(
        trusted_assemblies: &TrustedAssemblyList,
        app_path: &str,
        native_search_path: &NativeSearchPath,
        config: &RuntimeConfig,
    ) -> Result<Self> {
        let pairs = [
            (TRUSTED_PLATFORM_ASSEMBLIES, trusted_assemblies.to_string()),
            (APP_PATHS, app_path.to_string()),
            (APP_NI_PATHS, app_path.to_string()),
            (NATIVE_DLL_SEARCH_DIRECTORIES, native_search_path.to_string()),
            (GC_SERVER, bool_property(config.server_gc).to_string()),
            (
                GLOBALIZATION_INVARIANT,
                bool_property(config.globalization_invariant).to_string(),
            ),
        ];

        let mut keys = Vec::with_capacity(pairs.len());
        let mut values = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            keys.push(to_cstring(key)?);
            values.push(to_cstring(&value)?);
        }

        Ok(Self { keys, values })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Value stored under `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.keys
            .iter()
            .position(|k| k.as_bytes() == key.as_bytes())
            .and_then(|i| self.values[i].to_str().ok())
    }

    /// Pointer arrays in the shape `coreclr_initialize` expects.
    ///
    /// The pointers borrow from `self`; the table must outlive their use.
    pub fn as_raw(&self) -> (Vec<*const c_char>, Vec<*const c_char>) {
        (
            self.keys.iter().map(|k| k.as_ptr()).collect(),
            self.values.iter().map(|v| v.as_ptr()).collect(),
        )
    }
}

pub(crate) fn to_cstring(value: &str) -> Result<CString> {
    CString::new(value).map_err(|_| BridgeError::InvalidString(value.to_string()))
}
