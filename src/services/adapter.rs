//! [`DebugServices`] over the host's session objects.

use std::ffi::{CStr, CString};
use std::path::Path;

use super::context::{DtContext, CONTEXT_CONTROL, CONTEXT_INTEGER, CONTEXT_SEGMENTS};
use super::*;
use crate::debug::types::{CommandResult, ModuleInfo, RegisterState};
use crate::debug::{DebuggerHost, Target};

/// Services bound to one command invocation
pub struct HostServices<'a> {
    host: &'a mut dyn DebuggerHost,
    result: &'a mut CommandResult,
    runtime_dir: CString,
    /// Strings handed out as raw pointers; they live as long as the adapter
    strings: Vec<CString>,
}

impl<'a> HostServices<'a> {
    pub fn new(
        host: &'a mut dyn DebuggerHost,
        result: &'a mut CommandResult,
        runtime_dir: &Path,
    ) -> Self {
        Self {
            host,
            result,
            runtime_dir: directory_cstring(runtime_dir),
            strings: Vec::new(),
        }
    }

    fn target(&self) -> ServiceResult<&dyn Target> {
        self.host.target().ok_or(E_FAIL)
    }

    fn modules(&self) -> ServiceResult<Vec<ModuleInfo>> {
        Ok(self.target()?.modules())
    }

    /// Module at `index`, or the one based at `base` for [`DEBUG_ANY_ID`]
    fn module(&self, index: u32, base: u64) -> ServiceResult<ModuleInfo> {
        let modules = self.modules()?;
        let found = if index == DEBUG_ANY_ID {
            modules.into_iter().find(|m| m.base == base)
        } else {
            modules.into_iter().nth(index as usize)
        };
        found.ok_or(E_FAIL)
    }

    fn current_registers(&self) -> ServiceResult<RegisterState> {
        let target = self.target()?;
        let thread = target.selected_thread().ok_or(E_FAIL)?;
        target.registers(thread.system_id).ok_or(E_FAIL)
    }

    fn fill_context(&self, thread_id: u32, flags: u32, context: &mut [u8]) -> HResult {
        if context.len() < DtContext::SIZE {
            return E_INVALIDARG;
        }
        let registers = match self.target().map(|t| t.registers(thread_id)) {
            Ok(Some(registers)) => registers,
            _ => return E_FAIL,
        };
        DtContext::from_registers(&registers, flags).write_to(context);
        S_OK
    }

    fn keep(&mut self, value: CString) -> &CStr {
        self.strings.push(value);
        self.strings.last().map(CString::as_c_str).unwrap_or_default()
    }
}

impl DebugServices for HostServices<'_> {
    fn core_clr_directory(&self) -> &CStr {
        &self.runtime_dir
    }

    fn expression(&self, expression: &str) -> u64 {
        let value = self.target().map(|t| t.evaluate(expression));
        match value {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                log::debug!("Expression '{}' failed: {}", expression, e);
                0
            }
            Err(_) => 0,
        }
    }

    fn virtual_unwind(&self, thread_id: u32, context: &mut [u8]) -> HResult {
        self.fill_context(
            thread_id,
            CONTEXT_CONTROL | CONTEXT_INTEGER | CONTEXT_SEGMENTS,
            context,
        )
    }

    fn interrupt(&self) -> HResult {
        if self.host.is_interrupted() {
            S_OK
        } else {
            S_FALSE
        }
    }

    fn output(&mut self, mask: u32, text: &str) {
        if mask & DEBUG_OUTPUT_ERROR != 0 {
            self.result.append_error(text);
        } else {
            self.result.append_output(text);
        }
    }

    fn debuggee_type(&self) -> (u32, u32) {
        (DEBUG_CLASS_USER_WINDOWS, DEBUG_USER_WINDOWS_PROCESS)
    }

    fn page_size(&self) -> ServiceResult<u32> {
        Ok(self.target().map_or(4096, |t| t.page_size()))
    }

    fn executing_processor_type(&self) -> u32 {
        IMAGE_FILE_MACHINE_AMD64
    }

    fn execute(&mut self, command: &str) -> HResult {
        log::debug!("Executing host command: {}", command);
        let mut nested = CommandResult::new();
        let handled = self.host.handle_command(command, &mut nested);
        let succeeded = handled && nested.succeeded();
        self.result.absorb(nested);
        if succeeded {
            S_OK
        } else {
            E_FAIL
        }
    }

    fn last_event(&self) -> ServiceResult<LastEvent> {
        let target = self.target()?;
        let thread = target.selected_thread().ok_or(E_FAIL)?;
        Ok(LastEvent {
            kind: DEBUG_EVENT_EXCEPTION,
            process_id: target.process_id(),
            thread_id: thread.system_id,
            description: format!("stopped thread {:#x}", thread.system_id),
        })
    }

    fn read_virtual(&self, offset: u64, buffer: &mut [u8]) -> ServiceResult<usize> {
        self.target()?.read_memory(offset, buffer).map_err(|e| {
            log::debug!("ReadVirtual: {}", e);
            E_FAIL
        })
    }

    fn write_virtual(&mut self, offset: u64, data: &[u8]) -> ServiceResult<usize> {
        let target = self.host.target_mut().ok_or(E_FAIL)?;
        target.write_memory(offset, data).map_err(|e| {
            log::debug!("WriteVirtual: {}", e);
            E_FAIL
        })
    }

    fn symbol_options(&self) -> u32 {
        SYMOPT_LOAD_LINES
    }

    fn name_by_offset(&self, offset: u64) -> ServiceResult<(String, u64)> {
        let symbol = self.target()?.symbol_at(offset).ok_or(E_FAIL)?;
        Ok((
            format!("{}!{}", symbol.module, symbol.name),
            offset.saturating_sub(symbol.address),
        ))
    }

    fn number_modules(&self) -> ServiceResult<(u32, u32)> {
        Ok((self.modules()?.len() as u32, 0))
    }

    fn module_by_index(&self, index: u32) -> ServiceResult<u64> {
        let modules = self.modules()?;
        modules.get(index as usize).map(|m| m.base).ok_or(E_FAIL)
    }

    fn module_by_name(&self, name: &str, start: u32) -> ServiceResult<(u32, u64)> {
        self.modules()?
            .iter()
            .enumerate()
            .skip(start as usize)
            .find(|(_, m)| m.file_name() == name)
            .map(|(i, m)| (i as u32, m.base))
            .ok_or(E_FAIL)
    }

    fn module_by_offset(&self, offset: u64, start: u32) -> ServiceResult<(u32, u64)> {
        self.modules()?
            .iter()
            .enumerate()
            .skip(start as usize)
            .find(|(_, m)| m.contains(offset))
            .map(|(i, m)| (i as u32, m.base))
            .ok_or(E_FAIL)
    }

    fn module_names(&self, index: u32, base: u64) -> ServiceResult<ModuleNames> {
        let module = self.module(index, base)?;
        let path = module.path.to_string_lossy().into_owned();
        Ok(ModuleNames {
            module: module.file_name().to_string(),
            loaded_image: path.clone(),
            image: path,
        })
    }

    fn module_parameters(&self, index: u32, base: u64) -> ServiceResult<DebugModuleParameters> {
        let module = self.module(index, base)?;
        let path_size = module.path.as_os_str().len() as u32 + 1;
        Ok(DebugModuleParameters {
            base: module.base,
            size: module.size as u32,
            symbol_type: DEBUG_SYMTYPE_DEFERRED,
            image_name_size: path_size,
            module_name_size: module.file_name().len() as u32 + 1,
            loaded_image_name_size: path_size,
            ..Default::default()
        })
    }

    fn module_name_string(
        &self,
        which: ModuleNameKind,
        index: u32,
        base: u64,
    ) -> ServiceResult<String> {
        let module = self.module(index, base)?;
        match which {
            ModuleNameKind::Module => Ok(module.file_name().to_string()),
            ModuleNameKind::Image | ModuleNameKind::LoadedImage | ModuleNameKind::MappedImage => {
                Ok(module.path.to_string_lossy().into_owned())
            }
            // No separate symbol files are tracked
            ModuleNameKind::SymbolFile => Err(E_FAIL),
        }
    }

    fn is_pointer_64bit(&self) -> bool {
        self.target().map_or(cfg!(target_pointer_width = "64"), |t| t.is_64bit())
    }

    fn line_by_offset(&self, offset: u64) -> ServiceResult<LineLocation> {
        let line = self.target()?.line_at(offset).ok_or(E_FAIL)?;
        Ok(LineLocation {
            line: line.line,
            file: line.file.to_string_lossy().into_owned(),
            displacement: offset.saturating_sub(line.address),
        })
    }

    fn current_process_id(&self) -> ServiceResult<u32> {
        Ok(self.target()?.process_id())
    }

    fn current_thread_id(&self) -> ServiceResult<u32> {
        let thread = self.target()?.selected_thread().ok_or(E_FAIL)?;
        Ok(thread.id)
    }

    fn set_current_thread_id(&mut self, id: u32) -> HResult {
        match self.host.target_mut() {
            Some(target) => {
                if target.select_thread(id) {
                    S_OK
                } else {
                    E_FAIL
                }
            }
            None => E_FAIL,
        }
    }

    fn current_thread_system_id(&self) -> ServiceResult<u32> {
        let thread = self.target()?.selected_thread().ok_or(E_FAIL)?;
        Ok(thread.system_id)
    }

    fn thread_id_by_system_id(&self, system_id: u32) -> ServiceResult<u32> {
        self.target()?
            .threads()
            .into_iter()
            .find(|t| t.system_id == system_id)
            .map(|t| t.id)
            .ok_or(E_FAIL)
    }

    fn thread_context_by_id(&self, thread_id: u32, flags: u32, context: &mut [u8]) -> HResult {
        self.fill_context(thread_id, flags, context)
    }

    fn value_by_name(&self, name: &str) -> ServiceResult<u64> {
        self.current_registers()?.get(name).ok_or(E_FAIL)
    }

    fn instruction_offset(&self) -> ServiceResult<u64> {
        Ok(self.current_registers()?.rip)
    }

    fn stack_offset(&self) -> ServiceResult<u64> {
        Ok(self.current_registers()?.rsp)
    }

    fn frame_offset(&self) -> ServiceResult<u64> {
        Ok(self.current_registers()?.rbp)
    }

    fn module_directory(&mut self, name: &str) -> Option<&CStr> {
        let modules = self.modules().ok()?;
        let module = modules.iter().find(|m| m.file_name() == name)?;
        let directory = module.directory()?.as_os_str().to_string_lossy().into_owned();
        let directory = CString::new(directory).ok()?;
        Some(self.keep(directory))
    }
}

/// `dir` as a C string ending in a path separator
fn directory_cstring(dir: &Path) -> CString {
    let mut text = dir.to_string_lossy().into_owned();
    if !text.ends_with(std::path::MAIN_SEPARATOR) {
        text.push(std::path::MAIN_SEPARATOR);
    }
    CString::new(text).unwrap_or_else(|_| {
        log::warn!("Runtime directory contains a NUL byte: {}", dir.display());
        CString::default()
    })
}
