//! Model Context Protocol surface.
//!
//! The server side of the tool channel agents talk to: JSON-RPC 2.0 over
//! stdio, a fixed tool list, and dispatch into the orchestration core.

pub mod protocol;
pub mod server;
pub mod tools;

pub use protocol::{CallToolResult, ToolContent, ToolDefinition};
pub use server::McpServer;
pub use tools::Dispatcher;
