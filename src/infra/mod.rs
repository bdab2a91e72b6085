mod claude;
mod fs;
mod projects;
mod session_index;
mod session_log;
mod subagents;
mod tasks;
mod watch;

pub use claude::*;
pub use fs::*;
pub use projects::*;
pub use session_index::*;
pub use session_log::*;
pub use subagents::*;
pub use tasks::*;
pub use watch::*;

#[cfg(test)]
pub(crate) use fs::testing;
