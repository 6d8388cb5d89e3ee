//! Tool registry for the stdio surface.
//!
//! Five tools: capture_memory, get_memories, search_memories,
//! trigger_consolidation, get_stats. Each returns a structured result that
//! includes a human-readable `summary` line.

pub mod capture;
pub mod consolidate;
pub mod memories;
pub mod search;
pub mod stats;

use serde::Serialize;
use serde_json::Value;

use crate::context::AppContext;

/// Tool descriptor advertised by `tools/list`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescription {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

pub fn descriptions() -> Vec<ToolDescription> {
    vec![
        ToolDescription {
            name: "capture_memory",
            description: "Store one context snippet as an episodic memory entry",
            input_schema: capture::schema(),
        },
        ToolDescription {
            name: "get_memories",
            description: "List the most recently created memories",
            input_schema: memories::schema(),
        },
        ToolDescription {
            name: "search_memories",
            description: "Similarity search within one memory type",
            input_schema: search::schema(),
        },
        ToolDescription {
            name: "trigger_consolidation",
            description: "Enqueue a consolidation trigger for the engine",
            input_schema: consolidate::schema(),
        },
        ToolDescription {
            name: "get_stats",
            description: "Journal statistics, pipeline metrics, and engine counters",
            input_schema: stats::schema(),
        },
    ]
}

/// Dispatch one tool call. `Err` carries a human-readable message.
pub async fn dispatch(ctx: &AppContext, name: &str, args: Value) -> Result<Value, String> {
    match name {
        "capture_memory" => capture::execute(ctx, args).await,
        "get_memories" => memories::execute(ctx, args).await,
        "search_memories" => search::execute(ctx, args).await,
        "trigger_consolidation" => consolidate::execute(ctx, args).await,
        "get_stats" => stats::execute(ctx, args).await,
        other => Err(format!("unknown tool: {other}")),
    }
}
