//! Error types for the runtime bridge and plugin loading.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while locating, starting or talking to the managed runtime
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Absolute path to {library} too long: {path}")]
    PathTooLong { library: &'static str, path: PathBuf },

    #[error("Failed to load {path}: {reason}")]
    LibraryLoadFailure { path: PathBuf, reason: String },

    #[error("Function {symbol} not found in {library}")]
    MissingEntryPoint {
        symbol: &'static str,
        library: &'static str,
    },

    #[error("coreclr_initialize failed - status: {status:#010x}")]
    RuntimeStartFailure { status: i32 },

    #[error("Could not find function {symbol} in {assembly}.dll")]
    DelegateResolutionFailure { symbol: String, assembly: String },

    #[error("Failed to load managed plugin {path}")]
    PluginLoadFailure { path: PathBuf },

    #[error("Invalid debug target")]
    TargetNotSelected,

    #[error("Could not locate {library} in the modules of the debug target")]
    RuntimeNotFound { library: &'static str },

    #[error("The managed runtime has not been started")]
    NotStarted,

    #[error("String contains an interior NUL byte: {0:?}")]
    InvalidString(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
