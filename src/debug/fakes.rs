//! In-memory host and target used by unit tests.

use std::path::PathBuf;
use std::rc::Rc;

use super::types::{CommandResult, LineInfo, ModuleInfo, RegisterState, SymbolInfo, ThreadInfo};
use super::{DebuggerHost, HostCommand, Target};
use crate::core::expr;
use crate::core::memory::MemoryError;

pub const MAIN_THREAD: u32 = 4243;
pub const WORKER_THREAD: u32 = 4250;

pub struct FakeTarget {
    selected: usize,
    memory: Vec<u8>,
}

impl FakeTarget {
    pub const PID: u32 = 4242;
    pub const MAIN_RIP: u64 = 0x40_1000;
    pub const MAIN_RSP: u64 = 0x7ffc_1000;
    pub const WORKER_RIP: u64 = 0x7f00_0000_2000;
    pub const WORKER_RSP: u64 = 0x7ffc_8000;
    pub const CORECLR_BASE: u64 = 0x7f00_0000_0000;
    pub const CORECLR_PATH: &'static str =
        "/opt/dotnet/shared/Microsoft.NETCore.App/8.0.0/libcoreclr.so";
    pub const MEMORY_BASE: u64 = 0x1000;
    pub const MEMORY_SIZE: usize = 64;

    pub fn new() -> Self {
        Self {
            selected: 0,
            memory: vec![0; Self::MEMORY_SIZE],
        }
    }

    fn range(&self, address: u64, len: usize) -> Option<std::ops::Range<usize>> {
        let start = address.checked_sub(Self::MEMORY_BASE)? as usize;
        if start >= self.memory.len() {
            return None;
        }
        Some(start..(start + len).min(self.memory.len()))
    }
}

impl Target for FakeTarget {
    fn process_id(&self) -> u32 {
        Self::PID
    }

    fn threads(&self) -> Vec<ThreadInfo> {
        vec![
            ThreadInfo {
                id: 1,
                system_id: MAIN_THREAD,
            },
            ThreadInfo {
                id: 2,
                system_id: WORKER_THREAD,
            },
        ]
    }

    fn selected_thread(&self) -> Option<ThreadInfo> {
        self.threads().get(self.selected).copied()
    }

    fn select_thread(&mut self, id: u32) -> bool {
        match self.threads().iter().position(|t| t.id == id) {
            Some(index) => {
                self.selected = index;
                true
            }
            None => false,
        }
    }

    fn registers(&self, system_id: u32) -> Option<RegisterState> {
        let (rip, rsp) = match system_id {
            MAIN_THREAD => (Self::MAIN_RIP, Self::MAIN_RSP),
            WORKER_THREAD => (Self::WORKER_RIP, Self::WORKER_RSP),
            _ => return None,
        };
        Some(RegisterState {
            rip,
            rsp,
            rbp: rsp + 0x40,
            rax: 0x2a,
            rflags: 0x246,
            cs: 0x33,
            ss: 0x2b,
            ..Default::default()
        })
    }

    fn modules(&self) -> Vec<ModuleInfo> {
        vec![
            ModuleInfo {
                path: PathBuf::from("/usr/bin/dotnet"),
                base: 0x40_0000,
                size: 0x1_0000,
            },
            ModuleInfo {
                path: PathBuf::from(Self::CORECLR_PATH),
                base: Self::CORECLR_BASE,
                size: 0x50_0000,
            },
        ]
    }

    fn read_memory(&self, address: u64, buffer: &mut [u8]) -> Result<usize, MemoryError> {
        let range = self.range(address, buffer.len()).ok_or(MemoryError::ReadFailed {
            address,
            reason: "unmapped".into(),
        })?;
        let n = range.len();
        buffer[..n].copy_from_slice(&self.memory[range]);
        Ok(n)
    }

    fn write_memory(&mut self, address: u64, data: &[u8]) -> Result<usize, MemoryError> {
        let range = self.range(address, data.len()).ok_or(MemoryError::WriteFailed {
            address,
            reason: "unmapped".into(),
        })?;
        let n = range.len();
        self.memory[range].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn symbol_at(&self, address: u64) -> Option<SymbolInfo> {
        (Self::MAIN_RIP..Self::MAIN_RIP + 0x100)
            .contains(&address)
            .then(|| SymbolInfo {
                module: "dotnet".into(),
                name: "main".into(),
                address: Self::MAIN_RIP,
            })
    }

    fn line_at(&self, address: u64) -> Option<LineInfo> {
        (Self::MAIN_RIP..Self::MAIN_RIP + 0x10)
            .contains(&address)
            .then(|| LineInfo {
                file: PathBuf::from("/src/host/main.c"),
                line: 42,
                address: Self::MAIN_RIP,
            })
    }

    fn evaluate(&self, expression: &str) -> Result<u64, String> {
        let registers = self
            .selected_thread()
            .and_then(|t| self.registers(t.system_id));
        expr::evaluate(expression, |term| registers.as_ref()?.get(term))
    }
}

/// Host with a flat command table and a built-in `echo`
#[derive(Default)]
pub struct FakeHost {
    pub target: Option<FakeTarget>,
    pub commands: Vec<(String, Rc<dyn HostCommand>, String)>,
    pub interrupted: bool,
}

impl FakeHost {
    pub fn with_target(target: FakeTarget) -> Self {
        Self {
            target: Some(target),
            ..Default::default()
        }
    }

    pub fn command_names(&self) -> Vec<&str> {
        self.commands.iter().map(|(name, _, _)| name.as_str()).collect()
    }

    /// Run `line` and return its result
    pub fn run(&mut self, line: &str) -> (bool, CommandResult) {
        let mut result = CommandResult::new();
        let handled = self.handle_command(line, &mut result);
        (handled, result)
    }
}

impl DebuggerHost for FakeHost {
    fn target(&self) -> Option<&dyn Target> {
        self.target.as_ref().map(|t| t as &dyn Target)
    }

    fn target_mut(&mut self) -> Option<&mut dyn Target> {
        self.target.as_mut().map(|t| t as &mut dyn Target)
    }

    fn add_command(&mut self, name: &str, command: Rc<dyn HostCommand>, help: &str) -> bool {
        self.commands.retain(|(existing, _, _)| existing != name);
        self.commands
            .push((name.to_string(), command, help.to_string()));
        true
    }

    fn handle_command(&mut self, line: &str, result: &mut CommandResult) -> bool {
        let line = line.trim();
        let (name, args) = match line.split_once(' ') {
            Some((name, args)) => (name, Some(args.trim())),
            None => (line, None),
        };

        if name == "echo" {
            result.append_output(args.unwrap_or_default());
            return true;
        }

        let command = self
            .commands
            .iter()
            .find(|(existing, _, _)| existing == name)
            .map(|(_, command, _)| Rc::clone(command));
        match command {
            Some(command) => command.execute(self, args, result),
            None => false,
        }
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted
    }
}
