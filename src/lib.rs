//! PDF Form Filling MCP Server Library
//!
//! This crate fills PDF forms through a small tool surface driven by an agent:
//! - `pdf`: field detection over a pluggable document backend
//! - `session`: staged edits, commits, and a durable session store
//! - `tools`: the seven form-filling tools
//! - `agent`: turn runner streaming progress events
//! - `server`: MCP server exposing the tools over stdio

pub mod agent;
pub mod config;
pub mod error;
pub mod pdf;
pub mod server;
pub mod session;
pub mod source;
pub mod tools;

pub use agent::{
    DecisionMaker, ScriptStep, ScriptedDecisionMaker, ToolInvoker, TurnEvent, TurnRequest,
    TurnRunner,
};
pub use config::ServerConfig;
pub use error::{Error, Result};
pub use server::{run_server, run_server_with_config, FormServer};
pub use session::{Session, SessionStore};
pub use tools::ToolContext;
