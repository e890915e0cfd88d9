//! Fixed-layout services object handed to managed code.
//!
//! Managed plugins see a COM-style interface pointer: the first field of
//! [`ServicesObject`] points at a static table of `extern "C"` functions in
//! `IUnknown` + `ILLDBServices` order. Every entry forwards to the
//! [`DebugServices`] implementation the object wraps.

use std::borrow::Cow;
use std::cell::Cell;
use std::ffi::{c_char, c_void, CStr};
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use super::format::{self, VaListTag, WordArgs};
use super::*;

/// COM interface identifier
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

/// 00000000-0000-0000-C000-000000000046
pub const IID_IUNKNOWN: Guid = Guid {
    data1: 0x0000_0000,
    data2: 0x0000,
    data3: 0x0000,
    data4: [0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46],
};

/// 2E6C569A-9E14-4DA4-9DFC-CDB73A532566
pub const IID_ILLDBSERVICES: Guid = Guid {
    data1: 0x2E6C_569A,
    data2: 0x9E14,
    data3: 0x4DA4,
    data4: [0x9D, 0xFC, 0xCD, 0xB7, 0x3A, 0x53, 0x25, 0x66],
};

/// Marks a module parameters entry that could not be filled
pub const DEBUG_INVALID_OFFSET: u64 = u64::MAX;

type This = *mut c_void;

/// Function table, in interface declaration order
#[repr(C)]
pub struct ServicesVtbl {
    // IUnknown
    pub query_interface:
        unsafe extern "C" fn(this: This, riid: *const Guid, object: *mut *mut c_void) -> HResult,
    pub add_ref: unsafe extern "C" fn(this: This) -> u32,
    pub release: unsafe extern "C" fn(this: This) -> u32,

    // ILLDBServices
    pub get_core_clr_directory: unsafe extern "C" fn(this: This) -> *const c_char,
    pub get_expression: unsafe extern "C" fn(this: This, expression: *const c_char) -> usize,
    pub virtual_unwind: unsafe extern "C" fn(
        this: This,
        thread_id: u32,
        context_size: u32,
        context: *mut u8,
    ) -> HResult,
    pub set_exception_callback:
        unsafe extern "C" fn(this: This, callback: *mut c_void) -> HResult,
    pub clear_exception_callback: unsafe extern "C" fn(this: This) -> HResult,

    // IDebugControl2
    pub get_interrupt: unsafe extern "C" fn(this: This) -> HResult,
    pub output: unsafe extern "C" fn(
        this: This,
        mask: u32,
        format: *const c_char,
        arg0: usize,
        arg1: usize,
        arg2: usize,
    ) -> HResult,
    pub output_va_list: unsafe extern "C" fn(
        this: This,
        mask: u32,
        format: *const c_char,
        args: *mut VaListTag,
    ) -> HResult,
    pub controlled_output: unsafe extern "C" fn(
        this: This,
        output_control: u32,
        mask: u32,
        format: *const c_char,
        arg0: usize,
        arg1: usize,
    ) -> HResult,
    pub controlled_output_va_list: unsafe extern "C" fn(
        this: This,
        output_control: u32,
        mask: u32,
        format: *const c_char,
        args: *mut VaListTag,
    ) -> HResult,
    pub get_debuggee_type:
        unsafe extern "C" fn(this: This, debug_class: *mut u32, qualifier: *mut u32) -> HResult,
    pub get_page_size: unsafe extern "C" fn(this: This, size: *mut u32) -> HResult,
    pub get_executing_processor_type:
        unsafe extern "C" fn(this: This, processor: *mut u32) -> HResult,
    pub execute: unsafe extern "C" fn(
        this: This,
        output_control: u32,
        command: *const c_char,
        flags: u32,
    ) -> HResult,
    pub get_last_event_information: unsafe extern "C" fn(
        this: This,
        event_type: *mut u32,
        process_id: *mut u32,
        thread_id: *mut u32,
        extra_information: *mut c_void,
        extra_information_size: u32,
        extra_information_used: *mut u32,
        description: *mut c_char,
        description_size: u32,
        description_used: *mut u32,
    ) -> HResult,
    pub disassemble: unsafe extern "C" fn(
        this: This,
        offset: u64,
        flags: u32,
        buffer: *mut c_char,
        buffer_size: u32,
        disassembly_size: *mut u32,
        end_offset: *mut u64,
    ) -> HResult,

    // IDebugControl4
    pub get_context_stack_trace: unsafe extern "C" fn(
        this: This,
        start_context: *mut c_void,
        start_context_size: u32,
        frames: *mut c_void,
        frames_size: u32,
        frame_contexts: *mut c_void,
        frame_contexts_size: u32,
        frame_contexts_entry_size: u32,
        frames_filled: *mut u32,
    ) -> HResult,

    // IDebugDataSpaces
    pub read_virtual: unsafe extern "C" fn(
        this: This,
        offset: u64,
        buffer: *mut c_void,
        buffer_size: u32,
        bytes_read: *mut u32,
    ) -> HResult,
    pub write_virtual: unsafe extern "C" fn(
        this: This,
        offset: u64,
        buffer: *mut c_void,
        buffer_size: u32,
        bytes_written: *mut u32,
    ) -> HResult,

    // IDebugSymbols
    pub get_symbol_options: unsafe extern "C" fn(this: This, options: *mut u32) -> HResult,
    pub get_name_by_offset: unsafe extern "C" fn(
        this: This,
        offset: u64,
        name_buffer: *mut c_char,
        name_buffer_size: u32,
        name_size: *mut u32,
        displacement: *mut u64,
    ) -> HResult,
    pub get_number_modules:
        unsafe extern "C" fn(this: This, loaded: *mut u32, unloaded: *mut u32) -> HResult,
    pub get_module_by_index:
        unsafe extern "C" fn(this: This, index: u32, base: *mut u64) -> HResult,
    pub get_module_by_module_name: unsafe extern "C" fn(
        this: This,
        name: *const c_char,
        start_index: u32,
        index: *mut u32,
        base: *mut u64,
    ) -> HResult,
    pub get_module_by_offset: unsafe extern "C" fn(
        this: This,
        offset: u64,
        start_index: u32,
        index: *mut u32,
        base: *mut u64,
    ) -> HResult,
    pub get_module_names: unsafe extern "C" fn(
        this: This,
        index: u32,
        base: u64,
        image_name_buffer: *mut c_char,
        image_name_buffer_size: u32,
        image_name_size: *mut u32,
        module_name_buffer: *mut c_char,
        module_name_buffer_size: u32,
        module_name_size: *mut u32,
        loaded_image_name_buffer: *mut c_char,
        loaded_image_name_buffer_size: u32,
        loaded_image_name_size: *mut u32,
    ) -> HResult,
    pub get_module_parameters: unsafe extern "C" fn(
        this: This,
        count: u32,
        bases: *const u64,
        start: u32,
        params: *mut DebugModuleParameters,
    ) -> HResult,
    pub get_module_name_string: unsafe extern "C" fn(
        this: This,
        which: u32,
        index: u32,
        base: u64,
        buffer: *mut c_char,
        buffer_size: u32,
        name_size: *mut u32,
    ) -> HResult,
    pub is_pointer_64bit: unsafe extern "C" fn(this: This) -> HResult,
    pub get_line_by_offset: unsafe extern "C" fn(
        this: This,
        offset: u64,
        line: *mut u32,
        file_buffer: *mut c_char,
        file_buffer_size: u32,
        file_size: *mut u32,
        displacement: *mut u64,
    ) -> HResult,
    pub get_source_file_line_offsets: unsafe extern "C" fn(
        this: This,
        file: *const c_char,
        buffer: *mut u64,
        buffer_lines: u32,
        file_lines: *mut u32,
    ) -> HResult,
    pub find_source_file: unsafe extern "C" fn(
        this: This,
        start_element: u32,
        file: *const c_char,
        flags: u32,
        found_element: *mut u32,
        buffer: *mut c_char,
        buffer_size: u32,
        found_size: *mut u32,
    ) -> HResult,

    // IDebugSystemObjects
    pub get_current_process_id: unsafe extern "C" fn(this: This, id: *mut u32) -> HResult,
    pub get_current_thread_id: unsafe extern "C" fn(this: This, id: *mut u32) -> HResult,
    pub set_current_thread_id: unsafe extern "C" fn(this: This, id: u32) -> HResult,
    pub get_current_thread_system_id:
        unsafe extern "C" fn(this: This, system_id: *mut u32) -> HResult,
    pub get_thread_id_by_system_id:
        unsafe extern "C" fn(this: This, system_id: u32, thread_id: *mut u32) -> HResult,
    pub get_thread_context_by_id: unsafe extern "C" fn(
        this: This,
        thread_id: u32,
        context_flags: u32,
        context_size: u32,
        context: *mut u8,
    ) -> HResult,

    // IDebugRegisters
    pub get_value_by_name:
        unsafe extern "C" fn(this: This, name: *const c_char, value: *mut usize) -> HResult,
    pub get_instruction_offset: unsafe extern "C" fn(this: This, offset: *mut u64) -> HResult,
    pub get_stack_offset: unsafe extern "C" fn(this: This, offset: *mut u64) -> HResult,
    pub get_frame_offset: unsafe extern "C" fn(this: This, offset: *mut u64) -> HResult,

    // Internal
    pub get_module_directory:
        unsafe extern "C" fn(this: This, name: *const c_char) -> *const c_char,
}

static SERVICES_VTBL: ServicesVtbl = ServicesVtbl {
    query_interface,
    add_ref,
    release,
    get_core_clr_directory,
    get_expression,
    virtual_unwind,
    set_exception_callback,
    clear_exception_callback,
    get_interrupt,
    output,
    output_va_list,
    controlled_output,
    controlled_output_va_list,
    get_debuggee_type,
    get_page_size,
    get_executing_processor_type,
    execute,
    get_last_event_information,
    disassemble,
    get_context_stack_trace,
    read_virtual,
    write_virtual,
    get_symbol_options,
    get_name_by_offset,
    get_number_modules,
    get_module_by_index,
    get_module_by_module_name,
    get_module_by_offset,
    get_module_names,
    get_module_parameters,
    get_module_name_string,
    is_pointer_64bit,
    get_line_by_offset,
    get_source_file_line_offsets,
    find_source_file,
    get_current_process_id,
    get_current_thread_id,
    set_current_thread_id,
    get_current_thread_system_id,
    get_thread_id_by_system_id,
    get_thread_context_by_id,
    get_value_by_name,
    get_instruction_offset,
    get_stack_offset,
    get_frame_offset,
    get_module_directory,
};

/// Interface object wrapping a [`DebugServices`] for one managed call.
///
/// It lives on the caller's stack, so `AddRef`/`Release` only count and
/// never free; the pointer is invalid once the object is dropped.
#[repr(C)]
pub struct ServicesObject<'a> {
    vtbl: *const ServicesVtbl,
    ref_count: Cell<u32>,
    services: *mut (dyn DebugServices + 'a),
    _borrow: PhantomData<&'a mut dyn DebugServices>,
}

impl<'a> ServicesObject<'a> {
    pub fn new(services: &'a mut dyn DebugServices) -> Self {
        Self {
            vtbl: &SERVICES_VTBL,
            ref_count: Cell::new(1),
            services,
            _borrow: PhantomData,
        }
    }

    /// Interface pointer to pass to managed code
    pub fn as_raw(&mut self) -> *mut c_void {
        self as *mut Self as *mut c_void
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count.get()
    }
}

/// Run `f`, turning a panic into `fallback`
fn guarded<T>(name: &'static str, fallback: T, f: impl FnOnce() -> T) -> T {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        log::error!("Panic in services callback {}", name);
        fallback
    })
}

/// Call `f` with the services behind `this`, panic-guarded
unsafe fn with_services<T>(
    this: This,
    name: &'static str,
    fallback: T,
    f: impl FnOnce(&mut dyn DebugServices) -> T,
) -> T {
    // SAFETY: `this` was produced by ServicesObject::as_raw and the object
    // outlives the managed call
    let object = unsafe { (this as *const ServicesObject).as_ref() };
    match object {
        Some(object) => {
            let services = unsafe { &mut *object.services };
            guarded(name, fallback, || f(services))
        }
        None => fallback,
    }
}

unsafe fn store<T>(out: *mut T, value: T) {
    if !out.is_null() {
        unsafe { out.write(value) };
    }
}

unsafe fn input<'s>(text: *const c_char) -> Option<Cow<'s, str>> {
    if text.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(text) }.to_string_lossy())
}

/// Copy `text` NUL-terminated into a caller buffer; `S_FALSE` when truncated
unsafe fn write_string(text: &str, buffer: *mut c_char, size: u32, needed: *mut u32) -> HResult {
    let bytes = text.as_bytes();
    unsafe { store(needed, bytes.len() as u32 + 1) };
    if buffer.is_null() {
        return S_OK;
    }
    if size == 0 {
        return S_FALSE;
    }
    let n = bytes.len().min(size as usize - 1);
    unsafe {
        ptr::copy_nonoverlapping(bytes.as_ptr(), buffer as *mut u8, n);
        buffer.add(n).write(0);
    }
    if n < bytes.len() {
        S_FALSE
    } else {
        S_OK
    }
}

/// Store a `ServiceResult` through `out`, zeroing it on failure
unsafe fn store_result<T: Default>(out: *mut T, result: ServiceResult<T>) -> HResult {
    match result {
        Ok(value) => {
            unsafe { store(out, value) };
            S_OK
        }
        Err(status) => {
            unsafe { store(out, T::default()) };
            status
        }
    }
}

unsafe extern "C" fn query_interface(
    this: This,
    riid: *const Guid,
    object: *mut *mut c_void,
) -> HResult {
    if object.is_null() || riid.is_null() {
        return E_INVALIDARG;
    }
    let riid = unsafe { &*riid };
    if *riid == IID_IUNKNOWN || *riid == IID_ILLDBSERVICES {
        unsafe {
            *object = this;
            add_ref(this);
        }
        return S_OK;
    }
    unsafe { *object = ptr::null_mut() };
    E_NOINTERFACE
}

unsafe extern "C" fn add_ref(this: This) -> u32 {
    match unsafe { (this as *const ServicesObject).as_ref() } {
        Some(object) => {
            let count = object.ref_count.get() + 1;
            object.ref_count.set(count);
            count
        }
        None => 0,
    }
}

unsafe extern "C" fn release(this: This) -> u32 {
    match unsafe { (this as *const ServicesObject).as_ref() } {
        Some(object) => {
            let count = object.ref_count.get().saturating_sub(1);
            object.ref_count.set(count);
            count
        }
        None => 0,
    }
}

unsafe extern "C" fn get_core_clr_directory(this: This) -> *const c_char {
    unsafe {
        with_services(this, "GetCoreClrDirectory", ptr::null(), |s| {
            s.core_clr_directory().as_ptr()
        })
    }
}

unsafe extern "C" fn get_expression(this: This, expression: *const c_char) -> usize {
    unsafe {
        with_services(this, "GetExpression", 0, |s| match input(expression) {
            Some(expression) => s.expression(&expression) as usize,
            None => 0,
        })
    }
}

unsafe extern "C" fn virtual_unwind(
    this: This,
    thread_id: u32,
    context_size: u32,
    context: *mut u8,
) -> HResult {
    if context.is_null() {
        return E_INVALIDARG;
    }
    unsafe {
        with_services(this, "VirtualUnwind", E_UNEXPECTED, |s| {
            let buffer = std::slice::from_raw_parts_mut(context, context_size as usize);
            s.virtual_unwind(thread_id, buffer)
        })
    }
}

unsafe extern "C" fn set_exception_callback(this: This, _callback: *mut c_void) -> HResult {
    unsafe {
        with_services(this, "SetExceptionCallback", E_UNEXPECTED, |s| {
            s.set_exception_callback()
        })
    }
}

unsafe extern "C" fn clear_exception_callback(this: This) -> HResult {
    unsafe {
        with_services(this, "ClearExceptionCallback", E_UNEXPECTED, |s| {
            s.clear_exception_callback()
        })
    }
}

unsafe extern "C" fn get_interrupt(this: This) -> HResult {
    unsafe { with_services(this, "GetInterrupt", E_UNEXPECTED, |s| s.interrupt()) }
}

unsafe fn output_words(
    this: This,
    name: &'static str,
    mask: u32,
    fmt: *const c_char,
    words: &[u64],
) -> HResult {
    if fmt.is_null() {
        return E_INVALIDARG;
    }
    unsafe {
        with_services(this, name, E_UNEXPECTED, |s| {
            let text = format::format_or_raw(CStr::from_ptr(fmt), &mut WordArgs::new(words));
            s.output(mask, &text);
            S_OK
        })
    }
}

unsafe fn output_va(
    this: This,
    name: &'static str,
    mask: u32,
    fmt: *const c_char,
    args: *mut VaListTag,
) -> HResult {
    if fmt.is_null() {
        return E_INVALIDARG;
    }
    unsafe {
        with_services(this, name, E_UNEXPECTED, |s| {
            let fmt = CStr::from_ptr(fmt);
            let text = if cfg!(target_arch = "x86_64") && !args.is_null() {
                format::format_or_raw(fmt, &mut format::VaListArgs::new(args))
            } else {
                fmt.to_string_lossy().into_owned()
            };
            s.output(mask, &text);
            S_OK
        })
    }
}

unsafe extern "C" fn output(
    this: This,
    mask: u32,
    format: *const c_char,
    arg0: usize,
    arg1: usize,
    arg2: usize,
) -> HResult {
    let words = [arg0 as u64, arg1 as u64, arg2 as u64];
    unsafe { output_words(this, "Output", mask, format, &words) }
}

unsafe extern "C" fn output_va_list(
    this: This,
    mask: u32,
    format: *const c_char,
    args: *mut VaListTag,
) -> HResult {
    unsafe { output_va(this, "OutputVaList", mask, format, args) }
}

unsafe extern "C" fn controlled_output(
    this: This,
    _output_control: u32,
    mask: u32,
    format: *const c_char,
    arg0: usize,
    arg1: usize,
) -> HResult {
    let words = [arg0 as u64, arg1 as u64];
    unsafe { output_words(this, "ControlledOutput", mask, format, &words) }
}

unsafe extern "C" fn controlled_output_va_list(
    this: This,
    _output_control: u32,
    mask: u32,
    format: *const c_char,
    args: *mut VaListTag,
) -> HResult {
    unsafe { output_va(this, "ControlledOutputVaList", mask, format, args) }
}

unsafe extern "C" fn get_debuggee_type(
    this: This,
    debug_class: *mut u32,
    qualifier: *mut u32,
) -> HResult {
    unsafe {
        with_services(this, "GetDebuggeeType", E_UNEXPECTED, |s| {
            let (class, kind) = s.debuggee_type();
            store(debug_class, class);
            store(qualifier, kind);
            S_OK
        })
    }
}

unsafe extern "C" fn get_page_size(this: This, size: *mut u32) -> HResult {
    unsafe {
        with_services(this, "GetPageSize", E_UNEXPECTED, |s| {
            store_result(size, s.page_size())
        })
    }
}

unsafe extern "C" fn get_executing_processor_type(this: This, processor: *mut u32) -> HResult {
    unsafe {
        with_services(this, "GetExecutingProcessorType", E_UNEXPECTED, |s| {
            store(processor, s.executing_processor_type());
            S_OK
        })
    }
}

unsafe extern "C" fn execute(
    this: This,
    _output_control: u32,
    command: *const c_char,
    _flags: u32,
) -> HResult {
    unsafe {
        with_services(this, "Execute", E_UNEXPECTED, |s| match input(command) {
            Some(command) => s.execute(&command),
            None => E_INVALIDARG,
        })
    }
}

unsafe extern "C" fn get_last_event_information(
    this: This,
    event_type: *mut u32,
    process_id: *mut u32,
    thread_id: *mut u32,
    extra_information: *mut c_void,
    extra_information_size: u32,
    extra_information_used: *mut u32,
    description: *mut c_char,
    description_size: u32,
    description_used: *mut u32,
) -> HResult {
    unsafe {
        with_services(this, "GetLastEventInformation", E_UNEXPECTED, |s| {
            let event = match s.last_event() {
                Ok(event) => event,
                Err(status) => return status,
            };
            store(event_type, event.kind);
            store(process_id, event.process_id);
            store(thread_id, event.thread_id);
            if !extra_information.is_null() {
                ptr::write_bytes(
                    extra_information as *mut u8,
                    0,
                    extra_information_size as usize,
                );
            }
            store(extra_information_used, 0);
            write_string(&event.description, description, description_size, description_used)
        })
    }
}

unsafe extern "C" fn disassemble(
    this: This,
    offset: u64,
    _flags: u32,
    buffer: *mut c_char,
    buffer_size: u32,
    disassembly_size: *mut u32,
    end_offset: *mut u64,
) -> HResult {
    unsafe {
        with_services(this, "Disassemble", E_UNEXPECTED, |s| match s.disassemble(offset) {
            Ok((text, end)) => {
                store(end_offset, end);
                write_string(&text, buffer, buffer_size, disassembly_size)
            }
            Err(status) => status,
        })
    }
}

unsafe extern "C" fn get_context_stack_trace(
    this: This,
    _start_context: *mut c_void,
    _start_context_size: u32,
    _frames: *mut c_void,
    _frames_size: u32,
    _frame_contexts: *mut c_void,
    _frame_contexts_size: u32,
    _frame_contexts_entry_size: u32,
    frames_filled: *mut u32,
) -> HResult {
    unsafe {
        store(frames_filled, 0);
        with_services(this, "GetContextStackTrace", E_UNEXPECTED, |s| {
            s.context_stack_trace()
        })
    }
}

unsafe extern "C" fn read_virtual(
    this: This,
    offset: u64,
    buffer: *mut c_void,
    buffer_size: u32,
    bytes_read: *mut u32,
) -> HResult {
    if buffer.is_null() {
        return E_INVALIDARG;
    }
    unsafe {
        with_services(this, "ReadVirtual", E_UNEXPECTED, |s| {
            let buffer = std::slice::from_raw_parts_mut(buffer as *mut u8, buffer_size as usize);
            let read = s.read_virtual(offset, buffer).map(|n| n as u32);
            store_result(bytes_read, read)
        })
    }
}

unsafe extern "C" fn write_virtual(
    this: This,
    offset: u64,
    buffer: *mut c_void,
    buffer_size: u32,
    bytes_written: *mut u32,
) -> HResult {
    if buffer.is_null() {
        return E_INVALIDARG;
    }
    unsafe {
        with_services(this, "WriteVirtual", E_UNEXPECTED, |s| {
            let data = std::slice::from_raw_parts(buffer as *const u8, buffer_size as usize);
            let written = s.write_virtual(offset, data).map(|n| n as u32);
            store_result(bytes_written, written)
        })
    }
}

unsafe extern "C" fn get_symbol_options(this: This, options: *mut u32) -> HResult {
    unsafe {
        with_services(this, "GetSymbolOptions", E_UNEXPECTED, |s| {
            store(options, s.symbol_options());
            S_OK
        })
    }
}

unsafe extern "C" fn get_name_by_offset(
    this: This,
    offset: u64,
    name_buffer: *mut c_char,
    name_buffer_size: u32,
    name_size: *mut u32,
    displacement: *mut u64,
) -> HResult {
    unsafe {
        with_services(this, "GetNameByOffset", E_UNEXPECTED, |s| {
            match s.name_by_offset(offset) {
                Ok((name, delta)) => {
                    store(displacement, delta);
                    write_string(&name, name_buffer, name_buffer_size, name_size)
                }
                Err(status) => status,
            }
        })
    }
}

unsafe extern "C" fn get_number_modules(
    this: This,
    loaded: *mut u32,
    unloaded: *mut u32,
) -> HResult {
    unsafe {
        with_services(this, "GetNumberModules", E_UNEXPECTED, |s| {
            match s.number_modules() {
                Ok((count, gone)) => {
                    store(loaded, count);
                    store(unloaded, gone);
                    S_OK
                }
                Err(status) => status,
            }
        })
    }
}

unsafe extern "C" fn get_module_by_index(this: This, index: u32, base: *mut u64) -> HResult {
    unsafe {
        with_services(this, "GetModuleByIndex", E_UNEXPECTED, |s| {
            store_result(base, s.module_by_index(index))
        })
    }
}

unsafe fn store_module(
    found: ServiceResult<(u32, u64)>,
    index: *mut u32,
    base: *mut u64,
) -> HResult {
    match found {
        Ok((i, b)) => {
            unsafe {
                store(index, i);
                store(base, b);
            }
            S_OK
        }
        Err(status) => status,
    }
}

unsafe extern "C" fn get_module_by_module_name(
    this: This,
    name: *const c_char,
    start_index: u32,
    index: *mut u32,
    base: *mut u64,
) -> HResult {
    unsafe {
        with_services(this, "GetModuleByModuleName", E_UNEXPECTED, |s| match input(name) {
            Some(name) => store_module(s.module_by_name(&name, start_index), index, base),
            None => E_INVALIDARG,
        })
    }
}

unsafe extern "C" fn get_module_by_offset(
    this: This,
    offset: u64,
    start_index: u32,
    index: *mut u32,
    base: *mut u64,
) -> HResult {
    unsafe {
        with_services(this, "GetModuleByOffset", E_UNEXPECTED, |s| {
            store_module(s.module_by_offset(offset, start_index), index, base)
        })
    }
}

unsafe extern "C" fn get_module_names(
    this: This,
    index: u32,
    base: u64,
    image_name_buffer: *mut c_char,
    image_name_buffer_size: u32,
    image_name_size: *mut u32,
    module_name_buffer: *mut c_char,
    module_name_buffer_size: u32,
    module_name_size: *mut u32,
    loaded_image_name_buffer: *mut c_char,
    loaded_image_name_buffer_size: u32,
    loaded_image_name_size: *mut u32,
) -> HResult {
    unsafe {
        with_services(this, "GetModuleNames", E_UNEXPECTED, |s| {
            let names = match s.module_names(index, base) {
                Ok(names) => names,
                Err(status) => return status,
            };
            let statuses = [
                write_string(
                    &names.image,
                    image_name_buffer,
                    image_name_buffer_size,
                    image_name_size,
                ),
                write_string(
                    &names.module,
                    module_name_buffer,
                    module_name_buffer_size,
                    module_name_size,
                ),
                write_string(
                    &names.loaded_image,
                    loaded_image_name_buffer,
                    loaded_image_name_buffer_size,
                    loaded_image_name_size,
                ),
            ];
            statuses.into_iter().max().unwrap_or(S_OK)
        })
    }
}

unsafe extern "C" fn get_module_parameters(
    this: This,
    count: u32,
    bases: *const u64,
    start: u32,
    params: *mut DebugModuleParameters,
) -> HResult {
    if params.is_null() {
        return E_INVALIDARG;
    }
    // Indices run from start to start + count - 1
    if bases.is_null() && count > 0 && start.checked_add(count - 1).is_none() {
        return E_INVALIDARG;
    }
    unsafe {
        with_services(this, "GetModuleParameters", E_UNEXPECTED, |s| {
            let mut status = S_OK;
            for i in 0..count {
                let found = if bases.is_null() {
                    s.module_parameters(start + i, 0)
                } else {
                    s.module_parameters(DEBUG_ANY_ID, *bases.add(i as usize))
                };
                let entry = found.unwrap_or_else(|_| {
                    status = S_FALSE;
                    DebugModuleParameters {
                        base: DEBUG_INVALID_OFFSET,
                        ..Default::default()
                    }
                });
                params.add(i as usize).write(entry);
            }
            status
        })
    }
}

unsafe extern "C" fn get_module_name_string(
    this: This,
    which: u32,
    index: u32,
    base: u64,
    buffer: *mut c_char,
    buffer_size: u32,
    name_size: *mut u32,
) -> HResult {
    let Some(which) = ModuleNameKind::from_raw(which) else {
        return E_INVALIDARG;
    };
    unsafe {
        with_services(this, "GetModuleNameString", E_UNEXPECTED, |s| {
            match s.module_name_string(which, index, base) {
                Ok(name) => write_string(&name, buffer, buffer_size, name_size),
                Err(status) => status,
            }
        })
    }
}

unsafe extern "C" fn is_pointer_64bit(this: This) -> HResult {
    unsafe {
        with_services(this, "IsPointer64Bit", E_UNEXPECTED, |s| {
            if s.is_pointer_64bit() {
                S_OK
            } else {
                S_FALSE
            }
        })
    }
}

unsafe extern "C" fn get_line_by_offset(
    this: This,
    offset: u64,
    line: *mut u32,
    file_buffer: *mut c_char,
    file_buffer_size: u32,
    file_size: *mut u32,
    displacement: *mut u64,
) -> HResult {
    unsafe {
        with_services(this, "GetLineByOffset", E_UNEXPECTED, |s| {
            match s.line_by_offset(offset) {
                Ok(location) => {
                    store(line, location.line);
                    store(displacement, location.displacement);
                    write_string(&location.file, file_buffer, file_buffer_size, file_size)
                }
                Err(status) => status,
            }
        })
    }
}

unsafe extern "C" fn get_source_file_line_offsets(
    this: This,
    file: *const c_char,
    _buffer: *mut u64,
    _buffer_lines: u32,
    _file_lines: *mut u32,
) -> HResult {
    unsafe {
        with_services(this, "GetSourceFileLineOffsets", E_UNEXPECTED, |s| {
            s.source_file_line_offsets(&input(file).unwrap_or_default())
        })
    }
}

unsafe extern "C" fn find_source_file(
    this: This,
    _start_element: u32,
    file: *const c_char,
    _flags: u32,
    _found_element: *mut u32,
    _buffer: *mut c_char,
    _buffer_size: u32,
    _found_size: *mut u32,
) -> HResult {
    unsafe {
        with_services(this, "FindSourceFile", E_UNEXPECTED, |s| {
            s.find_source_file(&input(file).unwrap_or_default())
        })
    }
}

unsafe extern "C" fn get_current_process_id(this: This, id: *mut u32) -> HResult {
    unsafe {
        with_services(this, "GetCurrentProcessId", E_UNEXPECTED, |s| {
            store_result(id, s.current_process_id())
        })
    }
}

unsafe extern "C" fn get_current_thread_id(this: This, id: *mut u32) -> HResult {
    unsafe {
        with_services(this, "GetCurrentThreadId", E_UNEXPECTED, |s| {
            store_result(id, s.current_thread_id())
        })
    }
}

unsafe extern "C" fn set_current_thread_id(this: This, id: u32) -> HResult {
    unsafe {
        with_services(this, "SetCurrentThreadId", E_UNEXPECTED, |s| {
            s.set_current_thread_id(id)
        })
    }
}

unsafe extern "C" fn get_current_thread_system_id(this: This, system_id: *mut u32) -> HResult {
    unsafe {
        with_services(this, "GetCurrentThreadSystemId", E_UNEXPECTED, |s| {
            store_result(system_id, s.current_thread_system_id())
        })
    }
}

unsafe extern "C" fn get_thread_id_by_system_id(
    this: This,
    system_id: u32,
    thread_id: *mut u32,
) -> HResult {
    unsafe {
        with_services(this, "GetThreadIdBySystemId", E_UNEXPECTED, |s| {
            store_result(thread_id, s.thread_id_by_system_id(system_id))
        })
    }
}

unsafe extern "C" fn get_thread_context_by_id(
    this: This,
    thread_id: u32,
    context_flags: u32,
    context_size: u32,
    context: *mut u8,
) -> HResult {
    if context.is_null() {
        return E_INVALIDARG;
    }
    unsafe {
        with_services(this, "GetThreadContextById", E_UNEXPECTED, |s| {
            let buffer = std::slice::from_raw_parts_mut(context, context_size as usize);
            s.thread_context_by_id(thread_id, context_flags, buffer)
        })
    }
}

unsafe extern "C" fn get_value_by_name(
    this: This,
    name: *const c_char,
    value: *mut usize,
) -> HResult {
    unsafe {
        with_services(this, "GetValueByName", E_UNEXPECTED, |s| {
            let found = match input(name) {
                Some(name) => s.value_by_name(&name).map(|v| v as usize),
                None => Err(E_INVALIDARG),
            };
            store_result(value, found)
        })
    }
}

unsafe extern "C" fn get_instruction_offset(this: This, offset: *mut u64) -> HResult {
    unsafe {
        with_services(this, "GetInstructionOffset", E_UNEXPECTED, |s| {
            store_result(offset, s.instruction_offset())
        })
    }
}

unsafe extern "C" fn get_stack_offset(this: This, offset: *mut u64) -> HResult {
    unsafe {
        with_services(this, "GetStackOffset", E_UNEXPECTED, |s| {
            store_result(offset, s.stack_offset())
        })
    }
}

unsafe extern "C" fn get_frame_offset(this: This, offset: *mut u64) -> HResult {
    unsafe {
        with_services(this, "GetFrameOffset", E_UNEXPECTED, |s| {
            store_result(offset, s.frame_offset())
        })
    }
}

unsafe extern "C" fn get_module_directory(this: This, name: *const c_char) -> *const c_char {
    unsafe {
        with_services(this, "GetModuleDirectory", ptr::null(), |s| {
            input(name)
                .and_then(|name| s.module_directory(&name).map(CStr::as_ptr))
                .unwrap_or(ptr::null())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::fakes::{FakeHost, FakeTarget, MAIN_THREAD};
    use crate::debug::types::CommandResult;
    use crate::services::context::{CONTEXT_ALL, CONTEXT_CONTROL};
    use crate::services::{DtContext, HostServices};
    use std::mem::{offset_of, size_of};
    use std::path::Path;

    fn vtbl(raw: *mut c_void) -> &'static ServicesVtbl {
        unsafe { &**(raw as *const *const ServicesVtbl) }
    }

    /// Run `f` against an interface pointer over a fake host
    fn with_object(f: impl FnOnce(*mut c_void, &ServicesVtbl)) -> CommandResult {
        let mut host = FakeHost::with_target(FakeTarget::new());
        let mut result = CommandResult::new();
        {
            let mut services = HostServices::new(&mut host, &mut result, Path::new("/rt"));
            let mut object = ServicesObject::new(&mut services);
            let raw = object.as_raw();
            f(raw, vtbl(raw));
        }
        result
    }

    #[test]
    fn test_table_layout() {
        let slot = size_of::<usize>();
        assert_eq!(size_of::<ServicesVtbl>(), 46 * slot);
        assert_eq!(offset_of!(ServicesVtbl, get_core_clr_directory), 3 * slot);
        assert_eq!(offset_of!(ServicesVtbl, output), 9 * slot);
        assert_eq!(offset_of!(ServicesVtbl, read_virtual), 20 * slot);
        assert_eq!(offset_of!(ServicesVtbl, get_module_parameters), 29 * slot);
        assert_eq!(offset_of!(ServicesVtbl, get_current_process_id), 35 * slot);
        assert_eq!(offset_of!(ServicesVtbl, get_value_by_name), 41 * slot);
        assert_eq!(offset_of!(ServicesVtbl, get_module_directory), 45 * slot);
        assert_eq!(offset_of!(ServicesObject<'static>, vtbl), 0);
        assert_eq!(size_of::<DebugModuleParameters>(), 64);
    }

    #[test]
    fn test_query_interface_and_ref_counting() {
        with_object(|raw, v| unsafe {
            let mut out: *mut c_void = ptr::null_mut();
            assert_eq!((v.query_interface)(raw, &IID_ILLDBSERVICES, &mut out), S_OK);
            assert_eq!(out, raw);
            assert_eq!((v.query_interface)(raw, &IID_IUNKNOWN, &mut out), S_OK);

            let other = Guid {
                data1: 1,
                ..IID_IUNKNOWN
            };
            assert_eq!((v.query_interface)(raw, &other, &mut out), E_NOINTERFACE);
            assert!(out.is_null());

            // 1 initial + 2 successful queries
            assert_eq!((v.add_ref)(raw), 4);
            assert_eq!((v.release)(raw), 3);
        });
    }

    #[test]
    fn test_output_through_table() {
        let name = c"plugin";
        let result = with_object(|raw, v| unsafe {
            let status = (v.output)(
                raw,
                DEBUG_OUTPUT_NORMAL,
                c"%s has %d exports\n".as_ptr(),
                name.as_ptr() as usize,
                3,
                0,
            );
            assert_eq!(status, S_OK);
            (v.controlled_output)(raw, 0, DEBUG_OUTPUT_ERROR, c"bad %f".as_ptr(), 0, 0);
        });
        assert_eq!(result.output(), "plugin has 3 exports\n");
        assert_eq!(result.error(), "bad %f");
    }

    #[test]
    fn test_directory_and_expression() {
        with_object(|raw, v| unsafe {
            let dir = CStr::from_ptr((v.get_core_clr_directory)(raw));
            assert_eq!(dir.to_bytes(), b"/rt/");
            assert_eq!(
                (v.get_expression)(raw, c"rip + 0x10".as_ptr()),
                FakeTarget::MAIN_RIP as usize + 0x10
            );
            assert_eq!((v.get_expression)(raw, c"nonsense".as_ptr()), 0);
            assert_eq!((v.get_expression)(raw, ptr::null()), 0);

            let module_dir = (v.get_module_directory)(raw, c"dotnet".as_ptr());
            assert_eq!(CStr::from_ptr(module_dir).to_bytes(), b"/usr/bin");
            assert!((v.get_module_directory)(raw, c"nope".as_ptr()).is_null());
        });
    }

    #[test]
    fn test_register_queries() {
        with_object(|raw, v| unsafe {
            let mut value = 0usize;
            assert_eq!((v.get_value_by_name)(raw, c"rsp".as_ptr(), &mut value), S_OK);
            assert_eq!(value, FakeTarget::MAIN_RSP as usize);

            value = 7;
            assert_eq!((v.get_value_by_name)(raw, c"st0".as_ptr(), &mut value), E_FAIL);
            assert_eq!(value, 0);

            let mut offset = 0u64;
            assert_eq!((v.get_instruction_offset)(raw, &mut offset), S_OK);
            assert_eq!(offset, FakeTarget::MAIN_RIP);
        });
    }

    #[test]
    fn test_thread_context_through_table() {
        with_object(|raw, v| unsafe {
            let mut context = DtContext::zeroed();
            let size = DtContext::SIZE as u32;
            let buffer = &mut context as *mut DtContext as *mut u8;

            assert_eq!((v.virtual_unwind)(raw, MAIN_THREAD, size - 1, buffer), E_INVALIDARG);
            assert_eq!((v.virtual_unwind)(raw, MAIN_THREAD, size, buffer), S_OK);
            assert_eq!(context.rip, FakeTarget::MAIN_RIP);
            assert_eq!(context.context_flags & CONTEXT_CONTROL, CONTEXT_CONTROL);

            let status = (v.get_thread_context_by_id)(raw, MAIN_THREAD, CONTEXT_ALL, size, buffer);
            assert_eq!(status, S_OK);
            assert_eq!(context.context_flags, CONTEXT_ALL);
            assert_eq!(context.rsp, FakeTarget::MAIN_RSP);
        });
    }

    #[test]
    fn test_string_buffers() {
        with_object(|raw, v| unsafe {
            let mut buffer = [0 as c_char; 8];
            let mut needed = 0u32;
            let status = (v.get_module_name_string)(
                raw,
                1,
                1,
                0,
                buffer.as_mut_ptr(),
                buffer.len() as u32,
                &mut needed,
            );
            assert_eq!(status, S_FALSE);
            assert_eq!(needed, "libcoreclr.so".len() as u32 + 1);
            assert_eq!(CStr::from_ptr(buffer.as_ptr()).to_bytes(), b"libcore");

            let mut name = [0 as c_char; 64];
            let mut displacement = 0u64;
            let status = (v.get_name_by_offset)(
                raw,
                FakeTarget::MAIN_RIP + 8,
                name.as_mut_ptr(),
                name.len() as u32,
                ptr::null_mut(),
                &mut displacement,
            );
            assert_eq!(status, S_OK);
            assert_eq!(CStr::from_ptr(name.as_ptr()).to_bytes(), b"dotnet!main");
            assert_eq!(displacement, 8);

            assert_eq!(
                (v.get_module_name_string)(raw, 9, 0, 0, ptr::null_mut(), 0, ptr::null_mut()),
                E_INVALIDARG
            );
        });
    }

    #[test]
    fn test_module_parameters_by_base() {
        with_object(|raw, v| unsafe {
            let bases = [FakeTarget::CORECLR_BASE, 0xdead_0000];
            let mut params = [DebugModuleParameters::default(); 2];
            let status =
                (v.get_module_parameters)(raw, 2, bases.as_ptr(), 0, params.as_mut_ptr());
            assert_eq!(status, S_FALSE);
            assert_eq!(params[0].base, FakeTarget::CORECLR_BASE);
            assert_eq!(params[0].symbol_type, DEBUG_SYMTYPE_DEFERRED);
            assert_eq!(params[1].base, DEBUG_INVALID_OFFSET);
        });
    }

    #[test]
    fn test_module_parameters_index_range() {
        with_object(|raw, v| unsafe {
            let mut params = [DebugModuleParameters::default(); 2];
            let status = (v.get_module_parameters)(
                raw,
                2,
                ptr::null(),
                u32::MAX,
                params.as_mut_ptr(),
            );
            assert_eq!(status, E_INVALIDARG);
            assert_eq!(params[0].base, 0);

            let status =
                (v.get_module_parameters)(raw, 1, ptr::null(), u32::MAX, params.as_mut_ptr());
            assert_eq!(status, S_FALSE);
            assert_eq!(params[0].base, DEBUG_INVALID_OFFSET);

            let status = (v.get_module_parameters)(raw, 2, ptr::null(), 0, params.as_mut_ptr());
            assert_eq!(status, S_OK);
            assert_eq!(params[1].base, FakeTarget::CORECLR_BASE);
        });
    }

    #[test]
    fn test_memory_through_table() {
        with_object(|raw, v| unsafe {
            let mut data = *b"wxyz";
            let mut written = 0u32;
            let status = (v.write_virtual)(
                raw,
                FakeTarget::MEMORY_BASE,
                data.as_mut_ptr() as *mut c_void,
                4,
                &mut written,
            );
            assert_eq!((status, written), (S_OK, 4));

            let mut read_back = [0u8; 4];
            let mut read = 0u32;
            let status = (v.read_virtual)(
                raw,
                FakeTarget::MEMORY_BASE,
                read_back.as_mut_ptr() as *mut c_void,
                4,
                &mut read,
            );
            assert_eq!((status, read), (S_OK, 4));
            assert_eq!(&read_back, b"wxyz");

            read = 9;
            let buffer = read_back.as_mut_ptr() as *mut c_void;
            let status = (v.read_virtual)(raw, 0, buffer, 4, &mut read);
            assert_eq!((status, read), (E_FAIL, 0));
        });
    }

    #[test]
    fn test_unimplemented_entries() {
        with_object(|raw, v| unsafe {
            assert_eq!((v.set_exception_callback)(raw, ptr::null_mut()), E_NOTIMPL);
            assert_eq!((v.clear_exception_callback)(raw), E_NOTIMPL);
            let mut filled = 5u32;
            let status = (v.get_context_stack_trace)(
                raw,
                ptr::null_mut(),
                0,
                ptr::null_mut(),
                0,
                ptr::null_mut(),
                0,
                0,
                &mut filled,
            );
            assert_eq!((status, filled), (E_NOTIMPL, 0));
            assert_eq!(
                (v.disassemble)(raw, 0, 0, ptr::null_mut(), 0, ptr::null_mut(), ptr::null_mut()),
                E_NOTIMPL
            );
        });
    }

    #[test]
    fn test_panic_is_contained() {
        let status = guarded("test", E_UNEXPECTED, || -> HResult { panic!("boom") });
        assert_eq!(status, E_UNEXPECTED);
        assert_eq!(guarded("test", E_UNEXPECTED, || S_OK), S_OK);
    }
}
