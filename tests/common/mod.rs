//! Shared fixtures: an in-memory host and target, and a fake hosting
//! library whose delegates stand in for the managed plugin loader.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::rc::Rc;

use loadmanaged::clr::ffi::{self, DomainId, HostHandle};
use loadmanaged::clr::library::{LibraryLoader, SymbolSource};
use loadmanaged::clr::RuntimeBridge;
use loadmanaged::core::memory::MemoryError;
use loadmanaged::debug::types::{CommandResult, ModuleInfo, RegisterState, SymbolInfo, ThreadInfo};
use loadmanaged::debug::{DebuggerHost, HostCommand, Target};
use loadmanaged::error::Result;
use loadmanaged::services::context::DtContext;
use loadmanaged::services::vtable::{ServicesVtbl, IID_ILLDBSERVICES};
use loadmanaged::services::{DEBUG_OUTPUT_NORMAL, S_OK};

pub const PID: u32 = 900;
pub const TID: u32 = 901;
pub const RIP: u64 = 0x5555_0000_1234;
pub const RSP: u64 = 0x7fff_0000_0100;
pub const RUNTIME_DIR: &str = "/usr/lib/dotnet/shared/Microsoft.NETCore.App/6.0.0";

pub const PLUGIN: &str = "Diagnostics";
pub const EXPORTS: [&str; 3] = ["ip", "say", "nested"];

/// Single-threaded target with libcoreclr loaded from [`RUNTIME_DIR`]
pub struct TestTarget;

impl Target for TestTarget {
    fn process_id(&self) -> u32 {
        PID
    }

    fn threads(&self) -> Vec<ThreadInfo> {
        vec![ThreadInfo {
            id: 1,
            system_id: TID,
        }]
    }

    fn selected_thread(&self) -> Option<ThreadInfo> {
        self.threads().first().copied()
    }

    fn select_thread(&mut self, id: u32) -> bool {
        id == 1
    }

    fn registers(&self, system_id: u32) -> Option<RegisterState> {
        (system_id == TID).then(|| RegisterState {
            rip: RIP,
            rsp: RSP,
            rbp: RSP + 0x10,
            ..Default::default()
        })
    }

    fn modules(&self) -> Vec<ModuleInfo> {
        vec![ModuleInfo {
            path: Path::new(RUNTIME_DIR).join("libcoreclr.so"),
            base: 0x7f00_0000_0000,
            size: 0x60_0000,
        }]
    }

    fn read_memory(
        &self,
        address: u64,
        _buffer: &mut [u8],
    ) -> std::result::Result<usize, MemoryError> {
        Err(MemoryError::ReadFailed {
            address,
            reason: "no memory".into(),
        })
    }

    fn write_memory(
        &mut self,
        address: u64,
        _data: &[u8],
    ) -> std::result::Result<usize, MemoryError> {
        Err(MemoryError::WriteFailed {
            address,
            reason: "no memory".into(),
        })
    }

    fn symbol_at(&self, _address: u64) -> Option<SymbolInfo> {
        None
    }

    fn evaluate(&self, expression: &str) -> std::result::Result<u64, String> {
        Err(format!("cannot evaluate {}", expression))
    }
}

/// Host with a flat command table and a built-in `echo`
#[derive(Default)]
pub struct TestHost {
    pub target: Option<TestTarget>,
    pub commands: Vec<(String, Rc<dyn HostCommand>)>,
}

impl TestHost {
    pub fn attached() -> Self {
        Self {
            target: Some(TestTarget),
            ..Default::default()
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.commands.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn run(&mut self, line: &str) -> (bool, CommandResult) {
        let mut result = CommandResult::new();
        let handled = self.handle_command(line, &mut result);
        (handled, result)
    }
}

impl DebuggerHost for TestHost {
    fn target(&self) -> Option<&dyn Target> {
        self.target.as_ref().map(|t| t as &dyn Target)
    }

    fn target_mut(&mut self) -> Option<&mut dyn Target> {
        self.target.as_mut().map(|t| t as &mut dyn Target)
    }

    fn add_command(&mut self, name: &str, command: Rc<dyn HostCommand>, _help: &str) -> bool {
        self.commands.retain(|(n, _)| n != name);
        self.commands.push((name.to_string(), command));
        true
    }

    fn handle_command(&mut self, line: &str, result: &mut CommandResult) -> bool {
        let (name, args) = match line.trim().split_once(' ') {
            Some((name, args)) => (name, Some(args)),
            None => (line.trim(), None),
        };
        if name == "echo" {
            result.append_output(args.unwrap_or_default());
            return true;
        }
        let command = self
            .commands
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| Rc::clone(c));
        match command {
            Some(command) => command.execute(self, args, result),
            None => false,
        }
    }
}

thread_local! {
    pub static INIT_CALLS: Cell<u32> = const { Cell::new(0) };
    pub static PROPERTIES: RefCell<Vec<(String, String)>> = const { RefCell::new(Vec::new()) };
    pub static OPENED: RefCell<Vec<PathBuf>> = const { RefCell::new(Vec::new()) };
}

pub fn property(key: &str) -> Option<String> {
    PROPERTIES.with(|p| p.borrow().iter().find(|(k, _)| k == key).map(|(_, v)| v.clone()))
}

unsafe extern "C" fn initialize(
    _exe: *const c_char,
    _name: *const c_char,
    count: c_int,
    keys: *const *const c_char,
    values: *const *const c_char,
    handle: *mut HostHandle,
    domain: *mut DomainId,
) -> c_int {
    INIT_CALLS.with(|c| c.set(c.get() + 1));
    let text = |p: *const c_char| unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned();
    let pairs = (0..count as usize)
        .map(|i| unsafe { (text(*keys.add(i)), text(*values.add(i))) })
        .collect();
    PROPERTIES.with(|p| *p.borrow_mut() = pairs);
    unsafe {
        *handle = 0x1000 as HostHandle;
        *domain = 1;
    }
    0
}

unsafe extern "C" fn create_delegate(
    _handle: HostHandle,
    _domain: DomainId,
    assembly: *const c_char,
    type_name: *const c_char,
    method: *const c_char,
    delegate: *mut *mut c_void,
) -> c_int {
    let assembly = unsafe { CStr::from_ptr(assembly) }.to_bytes();
    let type_name = unsafe { CStr::from_ptr(type_name) }.to_bytes();
    if assembly != b"PluginInterop" || type_name != b"PluginInterop.PluginLoader" {
        return -1;
    }
    let function = match unsafe { CStr::from_ptr(method) }.to_bytes() {
        b"LoadPlugin" => load_plugin as *mut c_void,
        b"GetExportCount" => export_count as *mut c_void,
        b"GetExportName" => export_name as *mut c_void,
        b"Invoke" => invoke as *mut c_void,
        _ => return -1,
    };
    unsafe { *delegate = function };
    0
}

unsafe extern "C" fn shutdown(_handle: HostHandle, _domain: DomainId, exit: *mut c_int) -> c_int {
    unsafe { *exit = 0 };
    0
}

fn managed_string(text: &str) -> *mut c_char {
    let text = CString::new(text).unwrap();
    unsafe { nix::libc::strdup(text.as_ptr()) }
}

unsafe extern "C" fn load_plugin(_path: *const c_char) -> *mut c_char {
    managed_string(PLUGIN)
}

unsafe extern "C" fn export_count(_plugin: *const c_char) -> c_int {
    EXPORTS.len() as c_int
}

unsafe extern "C" fn export_name(_plugin: *const c_char, index: c_int) -> *mut c_char {
    managed_string(EXPORTS[index as usize])
}

/// A small managed plugin, written against the services v-table
unsafe extern "C" fn invoke(
    _plugin: *const c_char,
    command: *const c_char,
    services: *mut c_void,
    args: *const c_char,
) {
    let vtbl = unsafe { &**(services as *const *const ServicesVtbl) };

    let mut this = std::ptr::null_mut();
    assert_eq!(unsafe { (vtbl.query_interface)(services, &IID_ILLDBSERVICES, &mut this) }, S_OK);

    match unsafe { CStr::from_ptr(command) }.to_bytes() {
        b"ip" => {
            let mut thread = 0u32;
            unsafe { (vtbl.get_current_thread_system_id)(this, &mut thread) };
            let mut context = DtContext::zeroed();
            let status = unsafe {
                (vtbl.virtual_unwind)(
                    this,
                    thread,
                    DtContext::SIZE as u32,
                    &mut context as *mut DtContext as *mut u8,
                )
            };
            assert_eq!(status, S_OK);
            unsafe {
                (vtbl.output)(
                    this,
                    DEBUG_OUTPUT_NORMAL,
                    c"ip=%p sp=%p\n".as_ptr(),
                    context.rip as usize,
                    context.rsp as usize,
                    0,
                )
            };
        }
        b"say" => unsafe {
            (vtbl.output)(this, DEBUG_OUTPUT_NORMAL, c"%s".as_ptr(), args as usize, 0, 0);
        },
        b"nested" => unsafe {
            (vtbl.execute)(this, 0, c"echo from host".as_ptr(), 0);
        },
        _ => {}
    }

    unsafe { (vtbl.release)(this) };
}

struct FakeRuntime;

impl SymbolSource for FakeRuntime {
    fn symbol(&self, name: &str) -> Option<NonNull<c_void>> {
        let ptr = match name {
            ffi::INITIALIZE_SYMBOL => initialize as *mut c_void,
            ffi::CREATE_DELEGATE_SYMBOL => create_delegate as *mut c_void,
            ffi::SHUTDOWN_SYMBOL => shutdown as *mut c_void,
            _ => return None,
        };
        NonNull::new(ptr)
    }
}

struct FakeRuntimeLoader;

impl LibraryLoader for FakeRuntimeLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn SymbolSource>> {
        OPENED.with(|o| o.borrow_mut().push(path.to_path_buf()));
        Ok(Box::new(FakeRuntime))
    }
}

/// Bridge whose hosting library is [`FakeRuntime`]
pub fn bridge() -> RuntimeBridge {
    RuntimeBridge::with_loader(Box::new(FakeRuntimeLoader))
}
