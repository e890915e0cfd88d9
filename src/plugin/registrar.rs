//! Host commands backed by managed plugin exports

use std::rc::Rc;

use super::interop::{InvokeTarget, PluginHandle};
use crate::debug::types::CommandResult;
use crate::debug::{DebuggerHost, HostCommand};
use crate::services::{HostServices, ServicesObject};

/// One plugin export registered as a host command
pub struct ManagedCommand {
    name: String,
    plugin: PluginHandle,
    target: Rc<dyn InvokeTarget>,
}

impl ManagedCommand {
    pub fn new(name: &str, plugin: PluginHandle, target: Rc<dyn InvokeTarget>) -> Self {
        Self {
            name: name.to_string(),
            plugin,
            target,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl HostCommand for ManagedCommand {
    fn execute(
        &self,
        host: &mut dyn DebuggerHost,
        args: Option<&str>,
        result: &mut CommandResult,
    ) -> bool {
        let outcome = {
            let mut services = HostServices::new(host, result, self.target.runtime_directory());
            let mut object = ServicesObject::new(&mut services);
            let outcome =
                self.target
                    .invoke(&self.plugin, &self.name, &mut object, args.unwrap_or(""));
            if object.ref_count() != 1 {
                log::debug!(
                    "{} returned holding {} services references",
                    self.name,
                    object.ref_count()
                );
            }
            outcome
        };

        match outcome {
            Ok(()) => true,
            Err(e) => {
                log::error!("{}: {}", self.name, e);
                result.fail(&e.to_string());
                false
            }
        }
    }
}

/// Register one host command per export name, in order.
///
/// Returns how many the host accepted.
pub fn register_exports(
    host: &mut dyn DebuggerHost,
    plugin: &PluginHandle,
    target: Rc<dyn InvokeTarget>,
    names: &[String],
) -> usize {
    let mut registered = 0;
    for name in names {
        let command = ManagedCommand::new(name, plugin.clone(), Rc::clone(&target));
        let help = format!("{} (managed, {})", name, plugin.name());
        if host.add_command(name, Rc::new(command), &help) {
            log::debug!("Registered managed command {}", name);
            registered += 1;
        } else {
            log::warn!("Host rejected command {}", name);
        }
    }
    registered
}
