//! capture_memory - store one context snippet as an episodic entry.

use serde::Deserialize;
use serde_json::{json, Value};

use engram_core::{Cancellation, Metadata};

use crate::context::AppContext;

#[derive(Deserialize)]
struct CaptureArgs {
    source: String,
    content: String,
    #[serde(default)]
    metadata: Metadata,
}

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "source": {
                "type": "string",
                "description": "Origin of the snippet (path, command, conversation id)"
            },
            "content": {
                "type": "string",
                "description": "Text to remember"
            },
            "metadata": {
                "type": "object",
                "description": "Optional free-form metadata"
            }
        },
        "required": ["source", "content"]
    })
}

pub async fn execute(ctx: &AppContext, args: Value) -> Result<Value, String> {
    let args: CaptureArgs = serde_json::from_value(args).map_err(|e| e.to_string())?;
    let entry = ctx
        .journal
        .capture_context(&args.source, &args.content, args.metadata, &Cancellation::new())
        .await
        .map_err(|e| e.to_string())?;

    Ok(json!({
        "id": entry.id,
        "memoryType": entry.memory_type.as_str(),
        "pending": entry.is_pending(),
        "createdAt": entry.created_at.to_rfc3339(),
        "summary": format!(
            "Captured {} chars from {} as {}",
            entry.content.len(), args.source, entry.id
        ),
    }))
}
