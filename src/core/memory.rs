//! Memory - target process memory access
//!
//! Reads and writes go through `/proc/<pid>/mem`, which honors the target's
//! mappings: unmapped ranges fail instead of faulting the debugger.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use thiserror::Error;

/// Memory operation errors
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Failed to read memory at {address:#x}: {reason}")]
    ReadFailed { address: u64, reason: String },

    #[error("Failed to write memory at {address:#x}: {reason}")]
    WriteFailed { address: u64, reason: String },
}

/// Memory accessor bound to one process
#[derive(Debug, Clone)]
pub struct ProcessMemory {
    pid: u32,
}

impl ProcessMemory {
    pub fn new(pid: u32) -> Self {
        Self { pid }
    }

    fn mem_path(&self) -> String {
        format!("/proc/{}/mem", self.pid)
    }

    /// Read as many bytes as are readable starting at `address`.
    ///
    /// A short count means the range crosses into unreadable memory.
    pub fn read(&self, address: u64, buffer: &mut [u8]) -> Result<usize, MemoryError> {
        let failed = |reason: String| MemoryError::ReadFailed { address, reason };

        let mut file = File::open(self.mem_path()).map_err(|e| failed(e.to_string()))?;
        file.seek(SeekFrom::Start(address))
            .map_err(|e| failed(e.to_string()))?;

        let mut total = 0;
        while total < buffer.len() {
            match file.read(&mut buffer[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if total == 0 => return Err(failed(e.to_string())),
                Err(_) => break,
            }
        }

        log::trace!(
            "read {:#x} [{}]: {}",
            address,
            total,
            hex::encode(&buffer[..total.min(32)])
        );
        Ok(total)
    }

    /// Write `data` at `address`; returns the number of bytes written
    pub fn write(&self, address: u64, data: &[u8]) -> Result<usize, MemoryError> {
        let failed = |reason: String| MemoryError::WriteFailed { address, reason };

        let mut file = OpenOptions::new()
            .write(true)
            .open(self.mem_path())
            .map_err(|e| failed(e.to_string()))?;
        file.seek(SeekFrom::Start(address))
            .map_err(|e| failed(e.to_string()))?;

        let mut total = 0;
        while total < data.len() {
            match file.write(&data[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if total == 0 => return Err(failed(e.to_string())),
                Err(_) => break,
            }
        }

        log::debug!("wrote {} bytes at {:#x}", total, address);
        Ok(total)
    }
}
