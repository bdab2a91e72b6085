use ccdeck::app::Monitor;
use ccdeck::cli::{CliInvocation, CliRunError, parse_invocation, run};
use ccdeck::infra::{ConfigError, MonitorConfig};
use std::io::{self, IsTerminal, Write};
use thiserror::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "warn,ccdeck=info";

#[derive(Debug, Error)]
enum MainError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cli(#[from] CliRunError),
}

fn main() {
    init_logging();
    if let Err(error) = run_main() {
        let mut err = io::stderr().lock();
        let _ = writeln!(err, "{error}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(io::stderr().is_terminal()),
        )
        .try_init()
        .ok();
}

fn run_main() -> Result<(), MainError> {
    let args = std::env::args().collect::<Vec<_>>();
    let invocation = match parse_invocation(&args) {
        Ok(invocation) => invocation,
        Err(error) => {
            let mut err = io::stderr().lock();
            let _ = writeln!(err, "{error}");
            let _ = writeln!(err);
            print_help();
            std::process::exit(2);
        }
    };

    match invocation {
        CliInvocation::PrintHelp => {
            print_help();
            Ok(())
        }
        CliInvocation::PrintVersion => {
            let mut out = io::stdout().lock();
            let _ = writeln!(out, "{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliInvocation::Command { command, pretty } => {
            let monitor = Monitor::new(MonitorConfig::from_env()?);
            let stdout = io::stdout();
            let mut out = io::BufWriter::new(stdout.lock());
            run(command, pretty, &monitor, &mut out)?;
            Ok(())
        }
    }
}

fn print_help() {
    let mut out = io::stdout().lock();
    let _ = write!(
        out,
        "{name} - read and follow Claude Code sessions, subagents and tasks\n\nUSAGE:\n  {name} projects                        List projects (newest activity first)\n  {name} sessions [--project ID]          List sessions, optionally for one encoded project dir\n  {name} messages <session-id>            Print the parsed messages of a session\n  {name} session-path <session-id>        Print the log file path of a session\n  {name} subagents                        List subagents (active first)\n  {name} todos <session-id> [agent-id]    Print todos of a session or one agent\n  {name} tasks [session-id]               List task files\n  {name} watch [--tasks] [--project PATH]...  Stream change events as JSON lines\n  {name} --help | --version\n\nFLAGS:\n  --pretty       Indent JSON output\n\nENV:\n  CLAUDE_CONFIG_DIR            Data root (default: ~/.claude)\n  CCDECK_STALE_SECS            Seconds without writes before an agent counts as stale (default: 300)\n  CCDECK_SHOW_EMPTY_SUBAGENTS  Keep subagents without todos (1/true)\n  RUST_LOG                     Log filter (default: {filter})\n",
        name = env!("CARGO_PKG_NAME"),
        filter = DEFAULT_LOG_FILTER,
    );
}
