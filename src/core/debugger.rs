//! Debugger - live Linux process target
//!
//! Attaches to every thread of a process with ptrace and exposes it to the
//! extension as a [`Target`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use nix::sys::ptrace;
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::Pid;
use thiserror::Error;

use crate::core::expr;
use crate::core::memory::{MemoryError, ProcessMemory};
use crate::core::symbols::ModuleSymbols;
use crate::debug::types::{ModuleInfo, RegisterState, SymbolInfo, ThreadInfo};
use crate::debug::Target;

/// Debugger-specific errors
#[derive(Error, Debug)]
pub enum DebugError {
    #[error("Failed to attach to process {pid}: {reason}")]
    AttachFailed { pid: u32, reason: String },

    #[error("Failed to detach from process {pid}: {reason}")]
    DetachFailed { pid: u32, reason: String },

    #[error("Process not found: {pid}")]
    ProcessNotFound { pid: u32 },
}

/// A stopped process the host is debugging
pub struct ProcessTarget {
    pid: u32,
    threads: Vec<ThreadInfo>,
    selected: usize,
    memory: ProcessMemory,
    modules: Vec<ModuleInfo>,
    /// Parsed lazily; `None` marks images that could not be parsed
    symbols: RefCell<HashMap<PathBuf, Option<ModuleSymbols>>>,
}

impl ProcessTarget {
    /// Attach to every thread of `pid` and wait for each to stop
    pub fn attach(pid: u32) -> Result<Self, DebugError> {
        log::info!("Attaching to process {}", pid);

        let tids = list_tasks(pid)?;
        let mut threads = Vec::with_capacity(tids.len());

        for (index, tid) in tids.into_iter().enumerate() {
            let raw = Pid::from_raw(tid as i32);
            if let Err(e) = ptrace::attach(raw) {
                detach_all(&threads);
                return Err(DebugError::AttachFailed {
                    pid,
                    reason: format!("thread {}: {}", tid, e),
                });
            }
            if let Err(e) = waitpid(raw, Some(WaitPidFlag::__WALL)) {
                log::warn!("waitpid({}) failed: {}", tid, e);
            }
            threads.push(ThreadInfo {
                id: index as u32 + 1,
                system_id: tid,
            });
        }

        let modules = fs::read_to_string(format!("/proc/{}/maps", pid))
            .map(|maps| parse_maps(&maps))
            .unwrap_or_default();

        log::info!(
            "Attached to process {} ({} threads, {} modules)",
            pid,
            threads.len(),
            modules.len()
        );

        Ok(Self {
            pid,
            threads,
            selected: 0,
            memory: ProcessMemory::new(pid),
            modules,
            symbols: RefCell::new(HashMap::new()),
        })
    }

    /// Detach from all threads, letting the process run again
    pub fn detach(mut self) -> Result<(), DebugError> {
        log::info!("Detaching from process {}", self.pid);
        let threads = std::mem::take(&mut self.threads);
        let mut failure = None;
        for thread in &threads {
            if let Err(e) = ptrace::detach(Pid::from_raw(thread.system_id as i32), None) {
                failure.get_or_insert(DebugError::DetachFailed {
                    pid: self.pid,
                    reason: e.to_string(),
                });
            }
        }
        failure.map_or(Ok(()), Err)
    }

    fn with_symbols<R>(
        &self,
        module: &ModuleInfo,
        f: impl FnOnce(&ModuleSymbols) -> Option<R>,
    ) -> Option<R> {
        let mut cache = self.symbols.borrow_mut();
        let entry = cache.entry(module.path.clone()).or_insert_with(|| {
            ModuleSymbols::load(&module.path, module.base)
                .map_err(|e| log::debug!("No symbols for {}: {}", module.path.display(), e))
                .ok()
        });
        entry.as_ref().and_then(f)
    }

    fn selected_registers(&self) -> Option<RegisterState> {
        self.selected_thread()
            .and_then(|thread| self.registers(thread.system_id))
    }
}

impl Drop for ProcessTarget {
    fn drop(&mut self) {
        detach_all(&self.threads);
    }
}

impl Target for ProcessTarget {
    fn process_id(&self) -> u32 {
        self.pid
    }

    fn threads(&self) -> Vec<ThreadInfo> {
        self.threads.clone()
    }

    fn selected_thread(&self) -> Option<ThreadInfo> {
        self.threads.get(self.selected).copied()
    }

    fn select_thread(&mut self, id: u32) -> bool {
        match self.threads.iter().position(|t| t.id == id) {
            Some(index) => {
                self.selected = index;
                true
            }
            None => false,
        }
    }

    fn registers(&self, system_id: u32) -> Option<RegisterState> {
        if !self.threads.iter().any(|t| t.system_id == system_id) {
            return None;
        }
        read_registers(system_id)
    }

    fn modules(&self) -> Vec<ModuleInfo> {
        self.modules.clone()
    }

    fn read_memory(&self, address: u64, buffer: &mut [u8]) -> Result<usize, MemoryError> {
        self.memory.read(address, buffer)
    }

    fn write_memory(&mut self, address: u64, data: &[u8]) -> Result<usize, MemoryError> {
        self.memory.write(address, data)
    }

    fn symbol_at(&self, address: u64) -> Option<SymbolInfo> {
        let module = self.modules.iter().find(|m| m.contains(address))?;
        self.with_symbols(module, |symbols| {
            symbols.lookup(address).map(|(name, start)| SymbolInfo {
                module: module.file_name().to_string(),
                name: name.to_string(),
                address: start,
            })
        })
    }

    fn evaluate(&self, expression: &str) -> Result<u64, String> {
        let registers = self.selected_registers();
        expr::evaluate(expression, |term| {
            if let Some(value) = registers.as_ref().and_then(|r| r.get(term)) {
                return Some(value);
            }
            self.modules
                .iter()
                .find_map(|m| self.with_symbols(m, |s| s.address_of(term)))
        })
    }
}

fn list_tasks(pid: u32) -> Result<Vec<u32>, DebugError> {
    let entries = fs::read_dir(format!("/proc/{}/task", pid))
        .map_err(|_| DebugError::ProcessNotFound { pid })?;
    let mut tids: Vec<u32> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().and_then(|s| s.parse().ok()))
        .collect();
    tids.sort_unstable();
    // The main thread id equals the pid; keep it first
    if let Some(pos) = tids.iter().position(|&t| t == pid) {
        tids.swap(0, pos);
    }
    Ok(tids)
}

fn detach_all(threads: &[ThreadInfo]) {
    for thread in threads {
        let _ = ptrace::detach(Pid::from_raw(thread.system_id as i32), None);
    }
}

#[cfg(target_arch = "x86_64")]
fn read_registers(tid: u32) -> Option<RegisterState> {
    let regs = ptrace::getregs(Pid::from_raw(tid as i32))
        .map_err(|e| log::debug!("getregs({}) failed: {}", tid, e))
        .ok()?;
    Some(RegisterState {
        rax: regs.rax,
        rbx: regs.rbx,
        rcx: regs.rcx,
        rdx: regs.rdx,
        rsi: regs.rsi,
        rdi: regs.rdi,
        rbp: regs.rbp,
        rsp: regs.rsp,
        r8: regs.r8,
        r9: regs.r9,
        r10: regs.r10,
        r11: regs.r11,
        r12: regs.r12,
        r13: regs.r13,
        r14: regs.r14,
        r15: regs.r15,
        rip: regs.rip,
        rflags: regs.eflags,
        cs: regs.cs,
        ds: regs.ds,
        es: regs.es,
        fs: regs.fs,
        gs: regs.gs,
        ss: regs.ss,
    })
}

#[cfg(not(target_arch = "x86_64"))]
fn read_registers(_tid: u32) -> Option<RegisterState> {
    None
}

/// File-backed mappings of `/proc/<pid>/maps`, one entry per image
pub fn parse_maps(maps: &str) -> Vec<ModuleInfo> {
    let mut modules: Vec<ModuleInfo> = Vec::new();

    for line in maps.lines() {
        let mut fields = line.split_whitespace();
        let Some(range) = fields.next() else { continue };
        // perms, offset, dev, inode
        let path = fields.nth(4).map(str::to_string);
        let Some(path) = path.filter(|p| p.starts_with('/')) else {
            continue;
        };
        let Some((start, end)) = range.split_once('-') else {
            continue;
        };
        let (Ok(start), Ok(end)) = (u64::from_str_radix(start, 16), u64::from_str_radix(end, 16))
        else {
            continue;
        };

        let path = PathBuf::from(path);
        match modules.iter_mut().find(|m| m.path == path) {
            Some(module) => {
                let module_end = (module.base + module.size).max(end);
                module.base = module.base.min(start);
                module.size = module_end - module.base;
            }
            None => modules.push(ModuleInfo {
                path,
                base: start,
                size: end - start,
            }),
        }
    }

    modules
}
