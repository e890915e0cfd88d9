//! Debug module - the debugger host as seen by the extension.
//!
//! The host owns the command table and the selected debug target; the
//! extension only talks to it through these traits:
//! - [`DebuggerHost`]: command registration/execution, target selection
//! - [`Target`]: process, thread, register, memory, module and symbol access
//! - [`HostCommand`]: a command the extension registers with the host

pub mod types;

#[cfg(test)]
pub(crate) mod fakes;

use std::rc::Rc;

use crate::core::memory::MemoryError;
use types::{CommandResult, LineInfo, ModuleInfo, RegisterState, SymbolInfo, ThreadInfo};

/// The debug target currently selected in the host
pub trait Target {
    /// Process id of the target
    fn process_id(&self) -> u32;

    /// All threads, in debugger index order
    fn threads(&self) -> Vec<ThreadInfo>;

    /// Thread the host currently considers selected
    fn selected_thread(&self) -> Option<ThreadInfo>;

    /// Select a thread by debugger index
    fn select_thread(&mut self, id: u32) -> bool;

    /// Register values of the current frame of the thread with `system_id`
    fn registers(&self, system_id: u32) -> Option<RegisterState>;

    /// Loaded modules, in load order
    fn modules(&self) -> Vec<ModuleInfo>;

    /// Read target memory; returns the number of bytes read
    fn read_memory(&self, address: u64, buffer: &mut [u8]) -> Result<usize, MemoryError>;

    /// Write target memory; returns the number of bytes written
    fn write_memory(&mut self, address: u64, data: &[u8]) -> Result<usize, MemoryError>;

    /// Nearest symbol at or below `address`
    fn symbol_at(&self, address: u64) -> Option<SymbolInfo>;

    /// Source line for `address`, when line tables are available
    fn line_at(&self, _address: u64) -> Option<LineInfo> {
        None
    }

    /// Evaluate a host expression in the context of the current frame
    fn evaluate(&self, expression: &str) -> Result<u64, String>;

    fn page_size(&self) -> u32 {
        4096
    }

    fn is_64bit(&self) -> bool {
        true
    }
}

/// The native debugger hosting this extension
pub trait DebuggerHost {
    /// The selected target, if any
    fn target(&self) -> Option<&dyn Target>;

    /// Mutable access to the selected target
    fn target_mut(&mut self) -> Option<&mut dyn Target>;

    /// Register `command` under `name`; a later registration of the same
    /// name replaces the earlier one
    fn add_command(&mut self, name: &str, command: Rc<dyn HostCommand>, help: &str) -> bool;

    /// Run a command line as if the operator typed it
    fn handle_command(&mut self, line: &str, result: &mut CommandResult) -> bool;

    /// Whether the operator asked to interrupt the running command
    fn is_interrupted(&self) -> bool {
        false
    }
}

/// A command registered with the host
pub trait HostCommand {
    /// Execute with the raw argument string (`None` when no arguments were given)
    fn execute(
        &self,
        host: &mut dyn DebuggerHost,
        args: Option<&str>,
        result: &mut CommandResult,
    ) -> bool;
}
