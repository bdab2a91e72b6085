use crate::app::{Monitor, Subscription};
use crate::infra::{ConfigError, WatchError};
use serde::Serialize;
use serde_json::json;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CliInvocation {
    PrintHelp,
    PrintVersion,
    Command { command: CliCommand, pretty: bool },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CliCommand {
    Projects,
    Sessions {
        project: Option<String>,
    },
    Messages {
        session_id: String,
    },
    SessionPath {
        session_id: String,
    },
    Subagents,
    Todos {
        session_id: String,
        agent_id: Option<String>,
    },
    Tasks {
        session_id: Option<String>,
    },
    Watch {
        tasks: bool,
        projects: Vec<PathBuf>,
    },
}

#[derive(Debug, Error)]
pub enum CliParseError {
    #[error("unknown subcommand: {0}")]
    UnknownSubcommand(String),

    #[error("unknown flag: {0}")]
    UnknownFlag(String),

    #[error("missing value for flag: {0}")]
    MissingFlagValue(String),

    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),
}

pub fn parse_invocation(args: &[String]) -> Result<CliInvocation, CliParseError> {
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        return Ok(CliInvocation::PrintHelp);
    }
    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        return Ok(CliInvocation::PrintVersion);
    }

    let pretty = args.iter().any(|arg| arg == "--pretty");
    let mut iter = args.iter().skip(1).filter(|arg| *arg != "--pretty");

    let Some(subcommand) = iter.next() else {
        return Ok(CliInvocation::PrintHelp);
    };

    let command = match subcommand.as_str() {
        "projects" => {
            reject_rest(iter)?;
            CliCommand::Projects
        }
        "sessions" => {
            let mut project: Option<String> = None;
            while let Some(arg) = iter.next() {
                match arg.as_str() {
                    "--project" | "-p" => {
                        let value = iter.next().ok_or_else(|| {
                            CliParseError::MissingFlagValue("--project".to_string())
                        })?;
                        project = Some(value.to_string());
                    }
                    _ => return Err(unexpected(arg)),
                }
            }
            CliCommand::Sessions { project }
        }
        "messages" => {
            let session_id = required(iter.next(), "session-id")?;
            reject_rest(iter)?;
            CliCommand::Messages { session_id }
        }
        "session-path" => {
            let session_id = required(iter.next(), "session-id")?;
            reject_rest(iter)?;
            CliCommand::SessionPath { session_id }
        }
        "subagents" => {
            reject_rest(iter)?;
            CliCommand::Subagents
        }
        "todos" => {
            let session_id = required(iter.next(), "session-id")?;
            let agent_id = iter.next().map(|arg| positional(arg)).transpose()?;
            reject_rest(iter)?;
            CliCommand::Todos {
                session_id,
                agent_id,
            }
        }
        "tasks" => {
            let session_id = iter.next().map(|arg| positional(arg)).transpose()?;
            reject_rest(iter)?;
            CliCommand::Tasks { session_id }
        }
        "watch" => {
            let mut tasks = false;
            let mut projects = Vec::new();
            while let Some(arg) = iter.next() {
                match arg.as_str() {
                    "--tasks" => tasks = true,
                    "--project" | "-p" => {
                        let value = iter.next().ok_or_else(|| {
                            CliParseError::MissingFlagValue("--project".to_string())
                        })?;
                        projects.push(PathBuf::from(value));
                    }
                    _ => return Err(unexpected(arg)),
                }
            }
            CliCommand::Watch { tasks, projects }
        }
        other => return Err(CliParseError::UnknownSubcommand(other.to_string())),
    };

    Ok(CliInvocation::Command { command, pretty })
}

fn unexpected(arg: &str) -> CliParseError {
    if arg.starts_with('-') {
        CliParseError::UnknownFlag(arg.to_string())
    } else {
        CliParseError::UnexpectedArgument(arg.to_string())
    }
}

fn positional(arg: &str) -> Result<String, CliParseError> {
    if arg.starts_with('-') {
        return Err(CliParseError::UnknownFlag(arg.to_string()));
    }
    Ok(arg.to_string())
}

fn required(arg: Option<&String>, name: &'static str) -> Result<String, CliParseError> {
    let Some(arg) = arg else {
        return Err(CliParseError::MissingArgument(name));
    };
    positional(arg)
}

fn reject_rest<'a>(mut rest: impl Iterator<Item = &'a String>) -> Result<(), CliParseError> {
    match rest.next() {
        Some(arg) => Err(unexpected(arg)),
        None => Ok(()),
    }
}

#[derive(Debug, Error)]
pub enum CliRunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("session not found: {0}\nHint: run `ccdeck sessions` and copy the session id.")]
    SessionNotFound(String),

    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    WriteOutput(#[from] io::Error),
}

pub fn run(
    command: CliCommand,
    pretty: bool,
    monitor: &Monitor,
    out: &mut impl Write,
) -> Result<(), CliRunError> {
    match command {
        CliCommand::Projects => {
            write_json(out, &monitor.list_projects(), pretty)?;
        }
        CliCommand::Sessions { project } => {
            write_json(out, &monitor.list_sessions(project.as_deref()), pretty)?;
        }
        CliCommand::Messages { session_id } => {
            if monitor.get_session_file_path(&session_id).is_none() {
                return Err(CliRunError::SessionNotFound(session_id));
            }
            write_json(out, &monitor.get_messages(&session_id), pretty)?;
        }
        CliCommand::SessionPath { session_id } => {
            let Some(path) = monitor.get_session_file_path(&session_id) else {
                return Err(CliRunError::SessionNotFound(session_id));
            };
            write_line(out, &path.display().to_string())?;
        }
        CliCommand::Subagents => {
            write_json(out, &monitor.list_active_subagents(), pretty)?;
        }
        CliCommand::Todos {
            session_id,
            agent_id,
        } => {
            let todos = match agent_id {
                Some(agent_id) => monitor.get_agent_todos(&session_id, &agent_id),
                None => monitor.get_todos(&session_id),
            };
            write_json(out, &todos, pretty)?;
        }
        CliCommand::Tasks { session_id } => {
            let tasks = match session_id {
                Some(session_id) => monitor.list_session_tasks(&session_id),
                None => monitor.list_tasks(),
            };
            write_json(out, &tasks, pretty)?;
        }
        CliCommand::Watch { tasks, projects } => {
            run_watch(monitor, tasks, &projects, pretty)?;
        }
    }
    out.flush()?;
    Ok(())
}

/// Streams one JSON line per broadcast until stdout is closed.
fn run_watch(
    monitor: &Monitor,
    tasks: bool,
    projects: &[PathBuf],
    pretty: bool,
) -> Result<(), CliRunError> {
    let closed = Arc::new(AtomicBool::new(false));
    let subscriptions: Vec<Subscription> = vec![
        monitor.on_sessions_changed({
            let closed = Arc::clone(&closed);
            move |sessions| emit_to_stdout("sessions", sessions, pretty, &closed)
        }),
        monitor.on_messages_changed({
            let closed = Arc::clone(&closed);
            move |change| emit_to_stdout("messages", change, pretty, &closed)
        }),
        monitor.on_subagents_changed({
            let closed = Arc::clone(&closed);
            move |subagents| emit_to_stdout("subagents", subagents, pretty, &closed)
        }),
        monitor.on_tasks_changed({
            let closed = Arc::clone(&closed);
            move |tasks| emit_to_stdout("tasks", tasks, pretty, &closed)
        }),
        monitor.on_project_issues_changed({
            let closed = Arc::clone(&closed);
            move |root| emit_to_stdout("projectIssues", root, pretty, &closed)
        }),
    ];

    monitor.start_watching()?;
    if tasks {
        monitor.start_tasks_watching()?;
    }
    for root in projects {
        monitor.start_project_watching(root)?;
    }

    monitor.run_until(&closed);
    info!("stdout closed; stopping watchers");

    monitor.stop_all_watching();
    for subscription in subscriptions {
        subscription.unsubscribe();
    }
    Ok(())
}

fn emit_to_stdout(event: &str, data: &impl Serialize, pretty: bool, closed: &AtomicBool) {
    let mut out = io::stdout().lock();
    emit(&mut out, event, data, pretty, closed);
}

/// Writes one event line; sets `closed` once the reader has gone away.
fn emit(
    out: &mut impl Write,
    event: &str,
    data: &impl Serialize,
    pretty: bool,
    closed: &AtomicBool,
) {
    let payload = json!({ "event": event, "data": data });
    let written = write_json(out, &payload, pretty).and_then(|written| {
        if !written {
            return Ok(false);
        }
        match out.flush() {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == io::ErrorKind::BrokenPipe => Ok(false),
            Err(error) => Err(error.into()),
        }
    });
    match written {
        Ok(true) => {}
        Ok(false) => closed.store(true, Ordering::SeqCst),
        Err(error) => warn!(%error, event, "failed to write watch event"),
    }
}

fn write_json(
    out: &mut impl Write,
    value: &impl Serialize,
    pretty: bool,
) -> Result<bool, CliRunError> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(write_line(out, &text)?)
}

fn write_line(out: &mut impl Write, line: &str) -> io::Result<bool> {
    match writeln!(out, "{line}") {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == io::ErrorKind::BrokenPipe => Ok(false),
        Err(error) => Err(error),
    }
}
