//! LoadManaged - host CoreCLR inside a debugger and expose managed plugin
//! commands.
//!
//! The crate starts the managed runtime from the directory the debug target
//! loaded it from, loads plugins through the `PluginInterop` assembly and
//! registers each plugin export as a host command. Managed code calls back
//! through the services v-table in [`services`].

#[cfg(not(unix))]
compile_error!("loadmanaged supports Unix hosts only");

pub mod app;
pub mod clr;
pub mod config;
pub mod core;
pub mod debug;
pub mod error;
pub mod plugin;
pub mod services;
pub mod ui;

pub use error::{BridgeError, Result};
