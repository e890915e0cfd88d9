//! LoadManaged - standalone debugger host
//!
//! Parses the command line, optionally attaches to a process, initializes
//! the extension and runs the REPL.

use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;

use loadmanaged::app::{self, ExtensionContext, LOAD_MANAGED, SET_CLR_PATH};
use loadmanaged::debug::types::CommandResult;
use loadmanaged::ui::cli::{print_result, run_line, run_repl, ReplHost};

/// LoadManaged: run managed debugger plugins against a live process
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Process to attach to
    #[arg(short, long)]
    pid: Option<u32>,

    /// Runtime directory, overriding detection
    #[arg(long)]
    clr_path: Option<PathBuf>,

    /// Managed plugins to load at startup
    #[arg(short, long)]
    load: Vec<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        match args.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        },
    ))
    .init();

    log::debug!("{:?}", args);
    println!("[*] LoadManaged v{}", env!("CARGO_PKG_VERSION"));

    let mut host = ReplHost::new();
    if let Some(pid) = args.pid {
        match host.attach(pid) {
            Ok(()) => println!("[*] Attached to process {}", pid),
            Err(e) => eprintln!("{} {}", "[!]".red(), e),
        }
    }

    let context = ExtensionContext::detect().shared();
    let mut result = CommandResult::new();
    app::initialize(&mut host, &context, &mut result);
    print_result(&result);

    if let Some(path) = &args.clr_path {
        run_line(&mut host, &format!("{} {}", SET_CLR_PATH, path.display()));
    }
    for plugin in &args.load {
        run_line(&mut host, &format!("{} {}", LOAD_MANAGED, plugin.display()));
    }

    run_repl(&mut host)
}
