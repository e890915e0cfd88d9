//! Services - the callback surface managed plugins use to talk to the debugger
//!
//! [`DebugServices`] is the operation set in Rust terms. [`HostServices`]
//! implements it over one command invocation's host and result, and
//! [`ServicesObject`] exposes any implementation through the fixed v-table
//! the managed side expects.

pub mod adapter;
pub mod context;
pub mod format;
pub mod vtable;

use std::ffi::CStr;

pub use adapter::HostServices;
pub use context::DtContext;
pub use vtable::ServicesObject;

/// COM-style status code
pub type HResult = i32;

pub const S_OK: HResult = 0;
pub const S_FALSE: HResult = 1;
pub const E_NOTIMPL: HResult = 0x8000_4001_u32 as i32;
pub const E_NOINTERFACE: HResult = 0x8000_4002_u32 as i32;
pub const E_FAIL: HResult = 0x8000_4005_u32 as i32;
pub const E_UNEXPECTED: HResult = 0x8000_FFFF_u32 as i32;
pub const E_INVALIDARG: HResult = 0x8007_0057_u32 as i32;

/// Success value, or the status to hand back to managed code
pub type ServiceResult<T> = std::result::Result<T, HResult>;

// Output masks
pub const DEBUG_OUTPUT_NORMAL: u32 = 0x1;
pub const DEBUG_OUTPUT_ERROR: u32 = 0x2;
pub const DEBUG_OUTPUT_WARNING: u32 = 0x4;

pub const DEBUG_CLASS_USER_WINDOWS: u32 = 2;
pub const DEBUG_USER_WINDOWS_PROCESS: u32 = 0;
pub const DEBUG_EVENT_EXCEPTION: u32 = 0x2;
pub const DEBUG_SYMTYPE_DEFERRED: u32 = 5;
pub const DEBUG_ANY_ID: u32 = 0xffff_ffff;
pub const SYMOPT_LOAD_LINES: u32 = 0x10;
pub const IMAGE_FILE_MACHINE_AMD64: u32 = 0x8664;

/// Which name `GetModuleNameString` asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleNameKind {
    Image,
    Module,
    LoadedImage,
    SymbolFile,
    MappedImage,
}

impl ModuleNameKind {
    pub fn from_raw(which: u32) -> Option<Self> {
        match which {
            0 => Some(Self::Image),
            1 => Some(Self::Module),
            2 => Some(Self::LoadedImage),
            3 => Some(Self::SymbolFile),
            4 => Some(Self::MappedImage),
            _ => None,
        }
    }
}

/// The three names `GetModuleNames` reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleNames {
    pub image: String,
    pub module: String,
    pub loaded_image: String,
}

/// `DEBUG_MODULE_PARAMETERS`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugModuleParameters {
    pub base: u64,
    pub size: u32,
    pub time_date_stamp: u32,
    pub checksum: u32,
    pub flags: u32,
    pub symbol_type: u32,
    pub image_name_size: u32,
    pub module_name_size: u32,
    pub loaded_image_name_size: u32,
    pub symbol_file_name_size: u32,
    pub mapped_image_name_size: u32,
    pub reserved: [u64; 2],
}

/// The event that last stopped the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastEvent {
    pub kind: u32,
    pub process_id: u32,
    pub thread_id: u32,
    pub description: String,
}

/// Source location of an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineLocation {
    pub line: u32,
    pub file: String,
    pub displacement: u64,
}

/// Debugger operations available to managed plugins.
///
/// Thread ids taken by the context calls are operating system ids; the
/// `*_thread_id` calls use debugger indices unless named `system`.
pub trait DebugServices {
    /// Runtime directory, with a trailing separator
    fn core_clr_directory(&self) -> &CStr;

    /// Evaluate an expression; 0 when it cannot be evaluated
    fn expression(&self, expression: &str) -> u64;

    /// Fill `context` with the current frame of `thread_id`
    fn virtual_unwind(&self, thread_id: u32, context: &mut [u8]) -> HResult;

    fn set_exception_callback(&mut self) -> HResult {
        E_NOTIMPL
    }

    fn clear_exception_callback(&mut self) -> HResult {
        E_NOTIMPL
    }

    /// `S_OK` when the operator interrupted, `S_FALSE` otherwise
    fn interrupt(&self) -> HResult;

    fn output(&mut self, mask: u32, text: &str);

    /// Debuggee class and qualifier
    fn debuggee_type(&self) -> (u32, u32);

    fn page_size(&self) -> ServiceResult<u32>;

    fn executing_processor_type(&self) -> u32;

    /// Run a host command, capturing its output into this invocation
    fn execute(&mut self, command: &str) -> HResult;

    fn last_event(&self) -> ServiceResult<LastEvent>;

    fn disassemble(&self, _offset: u64) -> ServiceResult<(String, u64)> {
        Err(E_NOTIMPL)
    }

    fn context_stack_trace(&self) -> HResult {
        E_NOTIMPL
    }

    fn read_virtual(&self, offset: u64, buffer: &mut [u8]) -> ServiceResult<usize>;

    fn write_virtual(&mut self, offset: u64, data: &[u8]) -> ServiceResult<usize>;

    fn symbol_options(&self) -> u32;

    /// Symbol name and displacement for `offset`
    fn name_by_offset(&self, offset: u64) -> ServiceResult<(String, u64)>;

    /// Loaded and unloaded module counts
    fn number_modules(&self) -> ServiceResult<(u32, u32)>;

    fn module_by_index(&self, index: u32) -> ServiceResult<u64>;

    /// Index and base of the first module at or after `start` named `name`
    fn module_by_name(&self, name: &str, start: u32) -> ServiceResult<(u32, u64)>;

    /// Index and base of the first module at or after `start` containing `offset`
    fn module_by_offset(&self, offset: u64, start: u32) -> ServiceResult<(u32, u64)>;

    /// Names of the module selected by `index`, or by `base` when `index` is
    /// [`DEBUG_ANY_ID`]
    fn module_names(&self, index: u32, base: u64) -> ServiceResult<ModuleNames>;

    fn module_parameters(&self, index: u32, base: u64) -> ServiceResult<DebugModuleParameters>;

    fn module_name_string(
        &self,
        which: ModuleNameKind,
        index: u32,
        base: u64,
    ) -> ServiceResult<String>;

    fn is_pointer_64bit(&self) -> bool;

    fn line_by_offset(&self, offset: u64) -> ServiceResult<LineLocation>;

    fn source_file_line_offsets(&self, _file: &str) -> HResult {
        E_NOTIMPL
    }

    fn find_source_file(&self, _file: &str) -> HResult {
        E_NOTIMPL
    }

    fn current_process_id(&self) -> ServiceResult<u32>;

    fn current_thread_id(&self) -> ServiceResult<u32>;

    fn set_current_thread_id(&mut self, id: u32) -> HResult;

    fn current_thread_system_id(&self) -> ServiceResult<u32>;

    fn thread_id_by_system_id(&self, system_id: u32) -> ServiceResult<u32>;

    /// Like [`virtual_unwind`](Self::virtual_unwind), recording `flags` in
    /// the context record
    fn thread_context_by_id(&self, thread_id: u32, flags: u32, context: &mut [u8]) -> HResult;

    /// Named register of the current frame
    fn value_by_name(&self, name: &str) -> ServiceResult<u64>;

    fn instruction_offset(&self) -> ServiceResult<u64>;

    fn stack_offset(&self) -> ServiceResult<u64>;

    fn frame_offset(&self) -> ServiceResult<u64>;

    /// Directory containing the module named `name`
    fn module_directory(&mut self, name: &str) -> Option<&CStr>;
}
