//! trigger_consolidation - enqueue an engine trigger.

use serde::Deserialize;
use serde_json::{json, Value};

use engram_core::ConsolidationTrigger;

use crate::context::AppContext;

#[derive(Deserialize)]
struct TriggerArgs {
    #[serde(default)]
    trigger: Option<String>,
}

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "trigger": {
                "type": "string",
                "enum": ["context_init", "new_context", "threshold_reached", "conversation_end"],
                "description": "Engine trigger to enqueue (default conversation_end)"
            }
        }
    })
}

fn parse_trigger(raw: &str) -> Result<ConsolidationTrigger, String> {
    match raw {
        "context_init" => Ok(ConsolidationTrigger::ContextInit),
        "new_context" => Ok(ConsolidationTrigger::NewContext),
        "threshold_reached" => Ok(ConsolidationTrigger::ThresholdReached),
        "conversation_end" => Ok(ConsolidationTrigger::ConversationEnd),
        other => Err(format!("unknown trigger: {other}")),
    }
}

pub async fn execute(ctx: &AppContext, args: Value) -> Result<Value, String> {
    let args: TriggerArgs = serde_json::from_value(args).map_err(|e| e.to_string())?;
    let trigger = match args.trigger.as_deref() {
        None => ConsolidationTrigger::ConversationEnd,
        Some(raw) => parse_trigger(raw)?,
    };

    ctx.consolidation
        .notify(trigger)
        .map_err(|e| e.to_string())?;

    Ok(json!({
        "queued": true,
        "trigger": trigger.as_str(),
        "summary": format!("Consolidation trigger {} queued", trigger.as_str()),
    }))
}
