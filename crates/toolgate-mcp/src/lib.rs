//! Tool invocation with human-in-the-loop confirmation, served over MCP.
//!
//! A [`server::ToolServer`] owns a tool registry and an
//! [`engine::ExecutionEngine`]. Tools flagged as requiring confirmation never
//! run on invocation; they yield a pending [`engine::ExecutionStep`] that a
//! host resolves later with `confirm`.

pub mod chat;
pub mod config;
pub mod engine;
pub mod error;
pub mod handler;
pub mod model;
pub mod provider;
pub mod registry;
pub mod server;
pub mod store;
pub mod tool;
