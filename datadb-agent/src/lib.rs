//! datadb agent library
//!
//! Backs up a local directory to a datadb server and restores it, over rsync+ssh or
//! as a tar archive streamed over HTTP.

pub mod config;
pub mod executor;
pub mod fs;
pub mod hooks;
pub mod remote;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::{Profile, Settings};
pub use executor::{Executor, RestoreOutcome};
pub use fs::SyncStatus;
pub use utils::errors::AgentError;
pub type Result<T> = std::result::Result<T, AgentError>;
