//! End-to-end: initialize the extension, load a plugin, run its commands.

mod common;

use std::path::{Path, PathBuf};

use common::{TestHost, EXPORTS, INIT_CALLS, OPENED, RIP, RSP, RUNTIME_DIR};
use loadmanaged::app::{initialize, ExtensionContext, LOAD_MANAGED, SET_CLR_PATH};
use loadmanaged::debug::types::CommandResult;

fn loaded_host() -> TestHost {
    let context = ExtensionContext::with_bridge(common::bridge(), PathBuf::from("/ext")).shared();
    let mut host = TestHost::attached();

    let mut result = CommandResult::new();
    assert!(initialize(&mut host, &context, &mut result));
    assert_eq!(
        result.output(),
        format!("Found CoreCLR at \"{}\". Use SetClrPath to override.\n", RUNTIME_DIR)
    );

    let (handled, result) = host.run("LoadManaged /plugins/Diagnostics.dll");
    assert!(handled, "{}", result.error());
    assert_eq!(result.output(), "Imported 3 functions\n");
    host
}

#[test]
fn test_exports_become_commands() {
    let host = loaded_host();

    let mut expected = vec![SET_CLR_PATH, LOAD_MANAGED];
    expected.extend(EXPORTS);
    assert_eq!(host.names(), expected);

    // The hosting library was opened from the located runtime directory
    let opened = OPENED.with(|o| o.borrow().clone());
    assert_eq!(opened, vec![Path::new(RUNTIME_DIR).join("libcoreclr.so")]);
}

#[test]
fn test_runtime_starts_once() {
    let mut host = loaded_host();
    let (handled, result) = host.run("LoadManaged /plugins/Other.dll");
    assert!(handled);
    assert_eq!(result.output(), "Imported 3 functions\n");
    assert_eq!(INIT_CALLS.with(|c| c.get()), 1);
}

#[test]
fn test_plugin_unwinds_current_thread() {
    let mut host = loaded_host();
    let (handled, result) = host.run("ip");
    assert!(handled);
    assert_eq!(result.output(), format!("ip={:#x} sp={:#x}\n", RIP, RSP));
}

#[test]
fn test_plugin_output_and_nested_execute() {
    let mut host = loaded_host();

    let (_, result) = host.run("say hello world");
    assert_eq!(result.output(), "hello world");

    let (_, result) = host.run("say");
    assert_eq!(result.output(), "");

    let (_, result) = host.run("nested");
    assert_eq!(result.output(), "from host");
}
