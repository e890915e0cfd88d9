//! Core module - live process backend
//!
//! Memory access, symbol tables and expression evaluation used by the
//! ptrace-based [`debugger::ProcessTarget`].

#[cfg(target_os = "linux")]
pub mod debugger;
pub mod expr;
pub mod memory;
pub mod symbols;
