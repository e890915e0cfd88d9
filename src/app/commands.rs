//! Extension commands
//!
//! `SetClrPath` and `LoadManaged`, plus [`initialize`] which registers them
//! with a host.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::state::SharedContext;
use crate::clr::locator;
use crate::debug::types::CommandResult;
use crate::debug::{DebuggerHost, HostCommand};
use crate::plugin::{register_exports, InvokeTarget};

pub const SET_CLR_PATH: &str = "SetClrPath";
pub const LOAD_MANAGED: &str = "LoadManaged";

/// `SetClrPath <path>`
pub struct SetClrPathCommand {
    context: SharedContext,
}

impl SetClrPathCommand {
    pub fn new(context: SharedContext) -> Self {
        Self { context }
    }
}

impl HostCommand for SetClrPathCommand {
    fn execute(
        &self,
        _host: &mut dyn DebuggerHost,
        args: Option<&str>,
        result: &mut CommandResult,
    ) -> bool {
        let Some(path) = args.map(str::trim).filter(|p| !p.is_empty()) else {
            result.fail("The path cannot be empty");
            return false;
        };

        let mut context = self.context.borrow_mut();
        if context.is_started() {
            log::warn!(
                "Runtime already running from {}",
                context.effective_runtime_dir().display()
            );
            result.append_error("The CLR is already running; the new path is not used\n");
        }
        context.runtime_dir = PathBuf::from(path);
        log::info!("CLR path set to {}", path);
        true
    }
}

/// `LoadManaged <path>`
pub struct LoadManagedCommand {
    context: SharedContext,
}

impl LoadManagedCommand {
    pub fn new(context: SharedContext) -> Self {
        Self { context }
    }
}

impl HostCommand for LoadManagedCommand {
    fn execute(
        &self,
        host: &mut dyn DebuggerHost,
        args: Option<&str>,
        result: &mut CommandResult,
    ) -> bool {
        let Some(path) = args.map(str::trim).filter(|p| !p.is_empty()) else {
            result.fail("Usage: LoadManaged <path>");
            return false;
        };
        let path = absolute(Path::new(path));

        // The borrow ends here; managed code below may run host commands
        let interop = match self.context.borrow_mut().interop() {
            Ok(interop) => interop,
            Err(e) => {
                log::error!("CLR initialization failed: {}", e);
                result.fail(&format!("Failed to initialize the CLR: {}", e));
                return false;
            }
        };

        let plugin = match interop.load_plugin(&path) {
            Ok(plugin) => plugin,
            Err(e) => {
                log::error!("{}", e);
                result.fail(&e.to_string());
                return false;
            }
        };

        let names = interop.export_names(&plugin);
        let target: Rc<dyn InvokeTarget> = interop;
        let count = register_exports(host, &plugin, target, &names);

        result.append_output(&format!("Imported {} functions\n", count));
        true
    }
}

/// Register the extension commands and report where the runtime was found
pub fn initialize(
    host: &mut dyn DebuggerHost,
    context: &SharedContext,
    result: &mut CommandResult,
) -> bool {
    host.add_command(
        SET_CLR_PATH,
        Rc::new(SetClrPathCommand::new(Rc::clone(context))),
        "Set the path to the CLR",
    );
    host.add_command(
        LOAD_MANAGED,
        Rc::new(LoadManagedCommand::new(Rc::clone(context))),
        "Load managed plugin",
    );

    match locator::try_locate(host) {
        Ok(dir) => {
            log::info!("Found CoreCLR at {}", dir.display());
            result.append_output(&format!(
                "Found CoreCLR at \"{}\". Use {} to override.\n",
                dir.display(),
                SET_CLR_PATH
            ));
            context.borrow_mut().runtime_dir = dir;
        }
        Err(e) => {
            log::debug!("{}", e);
            result.append_output(&format!(
                "Could not locate CoreCLR. Use {} to manually set the path to the CLR.\n",
                SET_CLR_PATH
            ));
        }
    }
    true
}

fn absolute(path: &Path) -> PathBuf {
    path.canonicalize()
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
