//! CLR Module - hosting the managed runtime
//!
//! Locates the runtime directory, builds the runtime properties and starts
//! CoreCLR through its hosting library.

pub mod assemblies;
pub mod bridge;
pub mod ffi;
pub mod library;
pub mod locator;
pub mod properties;

pub use bridge::RuntimeBridge;
pub use locator::{locate, try_locate, DEFAULT_RUNTIME_DIRECTORY};
