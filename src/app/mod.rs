//! App module - extension state and commands
//!
//! Provides the shared context and the commands a host registers when the
//! extension is loaded.

mod commands;
mod state;

pub use commands::*;
pub use state::*;
