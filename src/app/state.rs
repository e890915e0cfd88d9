//! Process-wide extension state
//!
//! Shared between the extension's commands as `Rc<RefCell<_>>`. Borrows
//! must end before calling into managed code, which may re-enter the host.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::clr::bridge::interop_assembly_path;
use crate::clr::{locator, RuntimeBridge, DEFAULT_RUNTIME_DIRECTORY};
use crate::error::Result;
use crate::plugin::PluginInterop;

/// Friendly name the runtime is started under
pub const HOST_NAME: &str = "LoadManaged";

pub type SharedContext = Rc<RefCell<ExtensionContext>>;

pub struct ExtensionContext {
    /// Where the runtime will be loaded from
    pub runtime_dir: PathBuf,
    /// Directory holding this extension and `PluginInterop.dll`
    pub extension_dir: PathBuf,
    bridge: RuntimeBridge,
    interop: Option<Rc<PluginInterop>>,
}

impl ExtensionContext {
    pub fn new(extension_dir: PathBuf) -> Self {
        Self::with_bridge(RuntimeBridge::new(), extension_dir)
    }

    pub fn with_bridge(bridge: RuntimeBridge, extension_dir: PathBuf) -> Self {
        Self {
            runtime_dir: PathBuf::from(DEFAULT_RUNTIME_DIRECTORY),
            extension_dir,
            bridge,
            interop: None,
        }
    }

    /// Context for the image this code was loaded from
    pub fn detect() -> Self {
        let extension_dir = locator::extension_directory().unwrap_or_else(|| {
            log::warn!("Extension directory unknown, using the working directory");
            PathBuf::from(".")
        });
        Self::new(extension_dir)
    }

    pub fn shared(self) -> SharedContext {
        Rc::new(RefCell::new(self))
    }

    pub fn is_started(&self) -> bool {
        self.bridge.is_started()
    }

    /// Directory of the running runtime, or the configured one before start
    pub fn effective_runtime_dir(&self) -> &Path {
        self.bridge
            .runtime_directory()
            .unwrap_or(self.runtime_dir.as_path())
    }

    /// Loader delegates, starting the runtime on first use
    pub fn interop(&mut self) -> Result<Rc<PluginInterop>> {
        if let Some(interop) = &self.interop {
            return Ok(Rc::clone(interop));
        }

        let seed = interop_assembly_path(&self.extension_dir);
        self.bridge
            .start(HOST_NAME, &self.extension_dir, &self.runtime_dir, &seed)?;

        let interop = Rc::new(PluginInterop::resolve(&self.bridge)?);
        self.interop = Some(Rc::clone(&interop));
        Ok(interop)
    }
}
