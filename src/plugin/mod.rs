//! Plugin module - managed plugins as host commands
//!
//! [`PluginInterop`] wraps the loader delegates of the interop assembly;
//! [`register_exports`] turns a loaded plugin's exports into commands.

pub mod interop;
pub mod registrar;

pub use interop::{InvokeTarget, PluginHandle, PluginInterop};
pub use registrar::{register_exports, ManagedCommand};
