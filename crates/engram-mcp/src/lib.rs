//! # Engram server
//!
//! Surfaces over the engram-core engine:
//!
//! - **stdio tool protocol**: line-delimited JSON-RPC with five tools
//!   (capture_memory, get_memories, search_memories, trigger_consolidation,
//!   get_stats)
//! - **HTTP API**: `/api/v1/journal*` plus `/health` and `/ready`
//! - **Operator CLI**: the `engram` binary speaking to the HTTP API

pub mod api;
pub mod context;
pub mod protocol;
pub mod server;
pub mod services;
pub mod tools;

pub use context::AppContext;
pub use server::ToolServer;
