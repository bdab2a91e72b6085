mod claude;
mod project_path;
mod subagent;
mod tasks;
mod types;

pub use claude::*;
pub use project_path::*;
pub use subagent::*;
pub use tasks::*;
pub use types::*;
