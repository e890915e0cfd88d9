//! CLI - reedline-based host REPL
//!
//! A standalone debugger host: it owns the command table and the attached
//! process, and offers a few built-in inspection commands next to the ones
//! the extension and its plugins register.

use anyhow::Result;
use colored::Colorize;
use reedline::{Prompt, PromptHistorySearch, PromptHistorySearchStatus, Reedline, Signal};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::core::expr::parse_address;
use crate::debug::types::CommandResult;
use crate::debug::{DebuggerHost, HostCommand, Target};

/// Bytes shown by `read` without an explicit length
const DEFAULT_READ_LEN: usize = 64;
/// Largest single `read`
const MAX_READ_LEN: usize = 0x1_0000;
const BYTES_PER_LINE: usize = 16;

/// Prompt showing the attached process and selected thread
pub struct HostPrompt {
    pid: Option<u32>,
    thread: Option<u32>,
}

impl HostPrompt {
    pub fn new() -> Self {
        Self {
            pid: None,
            thread: None,
        }
    }

    pub fn update(&mut self, host: &ReplHost) {
        self.pid = host.target().map(|t| t.process_id());
        self.thread = host
            .target()
            .and_then(|t| t.selected_thread())
            .map(|t| t.id);
    }
}

impl Default for HostPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompt for HostPrompt {
    fn render_prompt_left(&self) -> Cow<'_, str> {
        match (self.pid, self.thread) {
            (Some(pid), Some(thread)) => Cow::Owned(format!("[{}:{}]", pid, thread)),
            (Some(pid), None) => Cow::Owned(format!("[{}]", pid)),
            _ => Cow::Borrowed("[---]"),
        }
    }

    fn render_prompt_right(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _prompt_mode: reedline::PromptEditMode) -> Cow<'_, str> {
        Cow::Borrowed("> ")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
        Cow::Borrowed("... ")
    }

    fn render_prompt_history_search_indicator(
        &self,
        history_search: PromptHistorySearch,
    ) -> Cow<'_, str> {
        let prefix = match history_search.status {
            PromptHistorySearchStatus::Passing => "",
            PromptHistorySearchStatus::Failing => "(failed) ",
        };
        Cow::Owned(format!("(search: {}{}) ", prefix, history_search.term))
    }
}

/// Built-in commands of the REPL host
#[derive(Debug, PartialEq, Eq)]
enum Builtin {
    /// attach <pid>
    Attach(u32),
    /// detach
    Detach,
    /// modules
    Modules,
    /// threads
    Threads,
    /// thread <id>
    SelectThread(u32),
    /// registers
    Registers,
    /// read <addr> [len]
    Read(u64, usize),
    /// help
    Help,
}

/// Parse a built-in; `None` means the line is for the command table
fn parse_builtin(input: &str) -> Option<std::result::Result<Builtin, String>> {
    let mut parts = input.split_whitespace();
    let cmd = parts.next()?;
    let arg = parts.next();

    let parsed = match cmd {
        "attach" => match arg.map(str::parse) {
            Some(Ok(pid)) => Ok(Builtin::Attach(pid)),
            _ => Err("Usage: attach <pid>".to_string()),
        },
        "detach" => Ok(Builtin::Detach),
        "modules" | "lm" => Ok(Builtin::Modules),
        "threads" => Ok(Builtin::Threads),
        "thread" => match arg.map(str::parse) {
            Some(Ok(id)) => Ok(Builtin::SelectThread(id)),
            _ => Err("Usage: thread <id>".to_string()),
        },
        "registers" | "regs" => Ok(Builtin::Registers),
        "read" => {
            let address = arg.map(parse_address);
            let len = parts
                .next()
                .map(|l| parse_address(l).map(|l| l as usize))
                .unwrap_or(Ok(DEFAULT_READ_LEN));
            match (address, len) {
                (Some(Ok(address)), Ok(len)) => Ok(Builtin::Read(address, len.min(MAX_READ_LEN))),
                _ => Err("Usage: read <addr> [len]".to_string()),
            }
        }
        "help" | "?" => Ok(Builtin::Help),
        _ => return None,
    };
    Some(parsed)
}

/// The REPL's [`DebuggerHost`]
#[derive(Default)]
pub struct ReplHost {
    target: Option<Box<dyn Target>>,
    commands: BTreeMap<String, (Rc<dyn HostCommand>, String)>,
}

impl ReplHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select `target` as the debug target, replacing any previous one
    pub fn set_target(&mut self, target: Box<dyn Target>) {
        self.target = Some(target);
    }

    #[cfg(target_os = "linux")]
    pub fn attach(
        &mut self,
        pid: u32,
    ) -> std::result::Result<(), crate::core::debugger::DebugError> {
        self.target = None;
        let target = crate::core::debugger::ProcessTarget::attach(pid)?;
        self.target = Some(Box::new(target));
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    pub fn attach(&mut self, pid: u32) -> anyhow::Result<()> {
        anyhow::bail!("attaching to {} is only supported on Linux", pid)
    }

    fn run_builtin(&mut self, builtin: Builtin, result: &mut CommandResult) -> bool {
        match builtin {
            Builtin::Attach(pid) => match self.attach(pid) {
                Ok(()) => {
                    result.append_output(&format!("Attached to process {}\n", pid));
                    true
                }
                Err(e) => {
                    result.fail(&e.to_string());
                    false
                }
            },
            Builtin::Detach => match self.target.take() {
                Some(target) => {
                    result.append_output(&format!("Detached from {}\n", target.process_id()));
                    true
                }
                None => {
                    result.fail("No process attached");
                    false
                }
            },
            Builtin::Help => {
                result.append_output(&self.help_text());
                true
            }
            other => {
                let Some(target) = self.target.as_deref_mut() else {
                    result.fail("No process attached");
                    return false;
                };
                inspect(target, other, result)
            }
        }
    }

    fn help_text(&self) -> String {
        let mut text = String::new();
        text.push_str(&format!("{}\n", "Host commands".bold().cyan()));
        for (usage, help) in [
            ("attach <pid>", "Attach to a process"),
            ("detach", "Detach from the process"),
            ("modules", "List loaded modules"),
            ("threads", "List threads"),
            ("thread <id>", "Select a thread"),
            ("registers", "Show registers of the selected thread"),
            ("read <addr> [len]", "Hex dump of target memory"),
            ("quit", "Exit"),
        ] {
            text.push_str(&format!("  {:<20} {}\n", usage.green(), help));
        }

        if !self.commands.is_empty() {
            text.push_str(&format!("\n{}\n", "Extension commands".bold().cyan()));
            for (name, (_, help)) in &self.commands {
                text.push_str(&format!("  {:<20} {}\n", name.green(), help));
            }
        }
        text
    }
}

/// Commands that read from the attached target
fn inspect(target: &mut dyn Target, builtin: Builtin, result: &mut CommandResult) -> bool {
    match builtin {
        Builtin::Modules => {
            for module in target.modules() {
                result.append_output(&format!(
                    "{:#018x} {:#018x}  {}\n",
                    module.base,
                    module.base + module.size,
                    module.path.display()
                ));
            }
            true
        }
        Builtin::Threads => {
            let selected = target.selected_thread().map(|t| t.id);
            for thread in target.threads() {
                let marker = if Some(thread.id) == selected { '*' } else { ' ' };
                result.append_output(&format!(
                    "{} {:>3}  tid {}\n",
                    marker, thread.id, thread.system_id
                ));
            }
            true
        }
        Builtin::SelectThread(id) => {
            if target.select_thread(id) {
                true
            } else {
                result.fail(&format!("No thread {}", id));
                false
            }
        }
        Builtin::Registers => {
            let registers = target
                .selected_thread()
                .and_then(|t| target.registers(t.system_id));
            match registers {
                Some(registers) => {
                    for (name, value) in registers.iter() {
                        result.append_output(&format!("{:>6} = {:#018x}\n", name, value));
                    }
                    true
                }
                None => {
                    result.fail("Registers unavailable");
                    false
                }
            }
        }
        Builtin::Read(address, len) => {
            let mut buffer = vec![0u8; len];
            match target.read_memory(address, &mut buffer) {
                Ok(n) => {
                    result.append_output(&hex_dump(address, &buffer[..n]));
                    true
                }
                Err(e) => {
                    result.fail(&e.to_string());
                    false
                }
            }
        }
        _ => false,
    }
}

/// `addr: hex  ascii` lines, 16 bytes each
pub fn hex_dump(address: u64, bytes: &[u8]) -> String {
    let mut out = String::new();
    for (i, chunk) in bytes.chunks(BYTES_PER_LINE).enumerate() {
        let hex = hex::encode(chunk);
        let spaced: Vec<&str> = (0..chunk.len()).map(|j| &hex[j * 2..j * 2 + 2]).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        out.push_str(&format!(
            "{:016x}  {:<47}  {}\n",
            address + (i * BYTES_PER_LINE) as u64,
            spaced.join(" "),
            ascii
        ));
    }
    out
}

impl DebuggerHost for ReplHost {
    fn target(&self) -> Option<&dyn Target> {
        self.target.as_deref()
    }

    fn target_mut(&mut self) -> Option<&mut dyn Target> {
        match self.target.as_mut() {
            Some(target) => Some(target.as_mut()),
            None => None,
        }
    }

    fn add_command(&mut self, name: &str, command: Rc<dyn HostCommand>, help: &str) -> bool {
        if self
            .commands
            .insert(name.to_string(), (command, help.to_string()))
            .is_some()
        {
            log::debug!("Command {} replaced", name);
        }
        true
    }

    fn handle_command(&mut self, line: &str, result: &mut CommandResult) -> bool {
        let line = line.trim();
        let (name, args) = match line.split_once(char::is_whitespace) {
            Some((name, args)) => (name, Some(args.trim())),
            None => (line, None),
        };

        // Registered commands shadow builtins of the same name
        let command = self.commands.get(name).map(|(command, _)| Rc::clone(command));
        if let Some(command) = command {
            return command.execute(self, args, result);
        }

        match parse_builtin(line) {
            Some(Ok(builtin)) => self.run_builtin(builtin, result),
            Some(Err(usage)) => {
                result.fail(&usage);
                false
            }
            None => {
                result.fail(&format!("Unknown command '{}'. Type 'help' for help", name));
                false
            }
        }
    }
}

/// Print a command's output, errors in red
pub fn print_result(result: &CommandResult) {
    print!("{}", result.output());
    if !result.error().is_empty() {
        eprint!("{}", result.error().red());
    }
}

/// Run `line` against `host` and print what it produced
pub fn run_line(host: &mut ReplHost, line: &str) -> bool {
    let mut result = CommandResult::new();
    let handled = host.handle_command(line, &mut result);
    print_result(&result);
    handled
}

/// Run the REPL until `quit` or end of input
pub fn run_repl(host: &mut ReplHost) -> Result<()> {
    let mut line_editor = Reedline::create();
    let mut prompt = HostPrompt::new();

    println!(
        "{}",
        "LoadManaged host - type 'help' for commands, 'quit' to exit".cyan()
    );

    loop {
        prompt.update(host);
        let sig = line_editor.read_line(&prompt)?;
        match sig {
            Signal::Success(buffer) => {
                let input = buffer.trim();
                if input.is_empty() {
                    continue;
                }
                if matches!(input, "q" | "quit" | "exit") {
                    break;
                }
                run_line(host, input);
            }
            Signal::CtrlD | Signal::CtrlC => {
                println!("\n[*] Interrupted");
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::fakes::FakeTarget;

    struct Echo;

    impl HostCommand for Echo {
        fn execute(
            &self,
            _host: &mut dyn DebuggerHost,
            args: Option<&str>,
            result: &mut CommandResult,
        ) -> bool {
            result.append_output(args.unwrap_or("<none>"));
            true
        }
    }

    fn host() -> ReplHost {
        let mut host = ReplHost::new();
        host.set_target(Box::new(FakeTarget::new()));
        host
    }

    fn run(host: &mut ReplHost, line: &str) -> (bool, CommandResult) {
        let mut result = CommandResult::new();
        let handled = host.handle_command(line, &mut result);
        (handled, result)
    }

    #[test]
    fn test_parse_builtin() {
        assert_eq!(parse_builtin("attach 42"), Some(Ok(Builtin::Attach(42))));
        assert!(matches!(parse_builtin("attach x"), Some(Err(_))));
        assert_eq!(
            parse_builtin("read 0x1000 32"),
            Some(Ok(Builtin::Read(0x1000, 32)))
        );
        assert_eq!(
            parse_builtin("read 0x1000"),
            Some(Ok(Builtin::Read(0x1000, DEFAULT_READ_LEN)))
        );
        assert_eq!(
            parse_builtin("read 0 0xffffffff"),
            Some(Ok(Builtin::Read(0, MAX_READ_LEN)))
        );
        assert_eq!(parse_builtin("LoadManaged /tmp/a.dll"), None);
    }

    #[test]
    fn test_registered_commands_get_raw_args() {
        let mut host = host();
        host.add_command("echoargs", Rc::new(Echo), "Echo");

        let (handled, result) = run(&mut host, "echoargs  -a  b ");
        assert!(handled);
        assert_eq!(result.output(), "-a  b");

        let (_, result) = run(&mut host, "echoargs");
        assert_eq!(result.output(), "<none>");

        let (handled, result) = run(&mut host, "nope");
        assert!(!handled);
        assert!(result.error().contains("Unknown command 'nope'"));
    }

    #[test]
    fn test_registered_command_shadows_builtin() {
        let mut host = host();
        assert!(host.add_command("threads", Rc::new(Echo), "Plugin threads"));
        host.add_command("read", Rc::new(Echo), "Plugin read");

        let (handled, result) = run(&mut host, "threads");
        assert!(handled);
        assert_eq!(result.output(), "<none>");

        // Builtin usage errors no longer apply to the shadowed name
        let (handled, result) = run(&mut host, "read not-an-address");
        assert!(handled);
        assert_eq!(result.output(), "not-an-address");

        let (_, result) = run(&mut host, "modules");
        assert!(result.output().contains("libcoreclr.so"));
    }

    #[test]
    fn test_inspection_builtins() {
        let mut host = host();

        let (_, result) = run(&mut host, "modules");
        assert!(result.output().contains("libcoreclr.so"));

        let (handled, _) = run(&mut host, "thread 2");
        assert!(handled);
        let (_, result) = run(&mut host, "threads");
        assert!(result.output().contains("*   2  tid 4250"));

        let (_, result) = run(&mut host, "registers");
        assert!(result
            .output()
            .contains(&format!("{:#018x}", FakeTarget::WORKER_RIP)));

        let (handled, _) = run(&mut host, "thread 9");
        assert!(!handled);
    }

    #[test]
    fn test_read_and_detach() {
        let mut host = host();
        let (handled, result) = run(&mut host, "read 0x1000 4");
        assert!(handled);
        assert_eq!(
            result.output(),
            format!("{:016x}  {:<47}  ....\n", 0x1000, "00 00 00 00")
        );

        let (handled, _) = run(&mut host, "detach");
        assert!(handled);
        let (handled, result) = run(&mut host, "modules");
        assert!(!handled);
        assert!(result.error().contains("No process attached"));
    }

    #[test]
    fn test_hex_dump_layout() {
        let bytes: Vec<u8> = (0x41..0x41 + 18).collect();
        let dump = hex_dump(0x7f00, &bytes);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0000000000007f00  41 42 43"));
        assert!(lines[0].ends_with("ABCDEFGHIJKLMNOP"));
        assert!(lines[1].starts_with("0000000000007f10  51 52"));
        assert!(lines[1].ends_with("QR"));
    }
}
