//! Tool-calling agents.
//!
//! Each agent is bound to one data domain, sees only that domain's tools
//! and runs a bounded model/tool loop until it has an answer.

pub mod agent_loop;
pub mod model;
pub mod tools;

pub use agent_loop::AgentRuntime;
pub use model::{ChatModel, OllamaClient};
pub use tools::ToolRegistry;
