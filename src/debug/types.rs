//! Common types exchanged with the debugger host.

use std::path::{Path, PathBuf};

/// A module (shared object or executable) loaded in the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Full path of the image on disk
    pub path: PathBuf,
    /// Lowest mapped address
    pub base: u64,
    /// Size of the mapped range in bytes
    pub size: u64,
}

impl ModuleInfo {
    /// File name component, e.g. `libcoreclr.so`
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// Directory containing the image
    pub fn directory(&self) -> Option<&Path> {
        self.path.parent()
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address - self.base < self.size
    }
}

/// A thread of the target process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadInfo {
    /// Debugger-assigned index (1-based, stable for the session)
    pub id: u32,
    /// Operating system thread id
    pub system_id: u32,
}

/// CPU register state (x64) of a thread's current frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterState {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rflags: u64,
    pub cs: u64,
    pub ds: u64,
    pub es: u64,
    pub fs: u64,
    pub gs: u64,
    pub ss: u64,
}

impl RegisterState {
    /// Look up a register by name (case-insensitive, optional `$` prefix)
    pub fn get(&self, name: &str) -> Option<u64> {
        let name = name.strip_prefix('$').unwrap_or(name).to_ascii_lowercase();
        let value = match name.as_str() {
            "rax" => self.rax,
            "rbx" => self.rbx,
            "rcx" => self.rcx,
            "rdx" => self.rdx,
            "rsi" => self.rsi,
            "rdi" => self.rdi,
            "rbp" | "fp" => self.rbp,
            "rsp" | "sp" => self.rsp,
            "r8" => self.r8,
            "r9" => self.r9,
            "r10" => self.r10,
            "r11" => self.r11,
            "r12" => self.r12,
            "r13" => self.r13,
            "r14" => self.r14,
            "r15" => self.r15,
            "rip" | "pc" => self.rip,
            "rflags" | "eflags" => self.rflags,
            "cs" => self.cs,
            "ds" => self.ds,
            "es" => self.es,
            "fs" => self.fs,
            "gs" => self.gs,
            "ss" => self.ss,
            _ => return None,
        };
        Some(value)
    }

    /// Name/value pairs in display order
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        const NAMES: [&str; 24] = [
            "rax", "rbx", "rcx", "rdx", "rsi", "rdi", "rbp", "rsp", "r8", "r9", "r10", "r11",
            "r12", "r13", "r14", "r15", "rip", "rflags", "cs", "ds", "es", "fs", "gs", "ss",
        ];
        NAMES
            .into_iter()
            .filter_map(move |name| self.get(name).map(|v| (name, v)))
    }
}

/// Nearest symbol at or below an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInfo {
    /// Module file name
    pub module: String,
    /// Symbol name
    pub name: String,
    /// Address the symbol starts at
    pub address: u64,
}

/// Source line information for an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineInfo {
    pub file: PathBuf,
    pub line: u32,
    /// Address the line starts at
    pub address: u64,
}

/// Output and status of one host command execution
#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    output: String,
    error: String,
    failed: bool,
}

impl CommandResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the regular output stream
    pub fn append_output(&mut self, text: &str) {
        self.output.push_str(text);
    }

    /// Append to the error stream
    pub fn append_error(&mut self, text: &str) {
        self.error.push_str(text);
    }

    /// Write a diagnostic line and mark the command as failed
    pub fn fail(&mut self, message: &str) {
        self.error.push_str(message);
        if !message.ends_with('\n') {
            self.error.push('\n');
        }
        self.failed = true;
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn error(&self) -> &str {
        &self.error
    }

    pub fn succeeded(&self) -> bool {
        !self.failed
    }

    /// Move everything written so far into `self` from `other`
    pub fn absorb(&mut self, other: CommandResult) {
        self.output.push_str(&other.output);
        self.error.push_str(&other.error);
        self.failed |= other.failed;
    }
}
