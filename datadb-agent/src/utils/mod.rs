//! Utility modules for the datadb agent.

pub mod binaries;
pub mod errors;
pub mod logger;

pub use errors::{AgentError, Result};
