//! get_memories - list the most recent entries.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::context::AppContext;

#[derive(Deserialize)]
struct ListArgs {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    10
}

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "limit": {
                "type": "integer",
                "description": "Maximum entries to return (default 10)",
                "minimum": 1
            }
        }
    })
}

pub async fn execute(ctx: &AppContext, args: Value) -> Result<Value, String> {
    let args: ListArgs = serde_json::from_value(args).map_err(|e| e.to_string())?;
    let entries = ctx
        .journal
        .get_memories(args.limit)
        .await
        .map_err(|e| e.to_string())?;

    let listed: Vec<Value> = entries
        .iter()
        .map(|entry| {
            json!({
                "id": entry.id,
                "memoryType": entry.memory_type.as_str(),
                "content": entry.content,
                "source": entry.source(),
                "createdAt": entry.created_at.to_rfc3339(),
                "strength": entry.strength,
            })
        })
        .collect();

    Ok(json!({
        "memories": listed,
        "count": entries.len(),
        "summary": format!("{} recent memories", entries.len()),
    }))
}
