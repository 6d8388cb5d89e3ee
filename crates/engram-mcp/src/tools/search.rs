//! search_memories - similarity retrieval within one memory type.

use serde::Deserialize;
use serde_json::{json, Value};

use engram_core::{Cancellation, MemoryType};

use crate::context::AppContext;

#[derive(Deserialize)]
struct SearchArgs {
    content: String,
    #[serde(default)]
    memory_type: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    5
}

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "content": {
                "type": "string",
                "description": "Query text"
            },
            "memory_type": {
                "type": "string",
                "enum": ["episodic", "semantic", "procedural", "metacognitive"],
                "description": "Collection to search (default episodic)"
            },
            "limit": {
                "type": "integer",
                "description": "Maximum hits (default 5)",
                "minimum": 1
            }
        },
        "required": ["content"]
    })
}

pub async fn execute(ctx: &AppContext, args: Value) -> Result<Value, String> {
    let args: SearchArgs = serde_json::from_value(args).map_err(|e| e.to_string())?;
    let memory_type = match args.memory_type.as_deref() {
        None => MemoryType::Episodic,
        Some(raw) => {
            MemoryType::parse_name(raw).ok_or_else(|| format!("unknown memory type: {raw}"))?
        }
    };

    let hits = ctx
        .journal
        .query_similar(&args.content, memory_type, args.limit, &Cancellation::new())
        .await
        .map_err(|e| e.to_string())?;

    let listed: Vec<Value> = hits
        .iter()
        .map(|hit| {
            json!({
                "id": hit.entry.id,
                "content": hit.entry.content,
                "source": hit.entry.source(),
                "similarity": hit.similarity,
                "composite": hit.composite,
            })
        })
        .collect();

    Ok(json!({
        "results": listed,
        "count": hits.len(),
        "summary": format!(
            "{} {} memories matching {:?}",
            hits.len(), memory_type.as_str(), args.content
        ),
    }))
}
