//! Runtime configuration read from the environment
//!
//! Each value is read once per runtime start. Absent variables mean
//! "disabled" or "unset".

use std::env;
use std::path::PathBuf;

/// Enables server GC when set to `1` or `true`.
pub const SERVER_GC_VAR: &str = "COMPlus_gcServer";

/// Enables `System.Globalization.Invariant` when set to `1` or `true`.
pub const GLOBALIZATION_INVARIANT_VAR: &str = "CORECLR_GLOBAL_INVARIANT";

/// Extra directory probed for framework assemblies and native libraries.
pub const CORE_LIBRARIES_VAR: &str = "CORE_LIBRARIES";

/// Environment-derived settings consumed by the runtime bridge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Server GC toggle
    pub server_gc: bool,
    /// Globalization-invariant toggle
    pub globalization_invariant: bool,
    /// Native-library override directory
    pub core_libraries: Option<PathBuf>,
}

impl RuntimeConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read the configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            server_gc: lookup(SERVER_GC_VAR).is_some_and(|v| parse_bool(&v)),
            globalization_invariant: lookup(GLOBALIZATION_INVARIANT_VAR)
                .is_some_and(|v| parse_bool(&v)),
            core_libraries: lookup(CORE_LIBRARIES_VAR)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        };

        log::debug!("Runtime configuration: {:?}", config);
        config
    }

    /// Override directory, if it is set and differs from `runtime_dir`
    pub fn override_directory(&self, runtime_dir: &std::path::Path) -> Option<&std::path::Path> {
        self.core_libraries
            .as_deref()
            .filter(|dir| *dir != runtime_dir)
    }
}

/// `"1"` or a case-insensitive `"true"` enable a toggle
fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// The runtime expects the literal strings `"true"` and `"false"`
pub fn bool_property(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}
