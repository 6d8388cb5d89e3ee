//! get_stats - journal statistics, pipeline metrics, and engine counters.

use serde_json::{json, Value};

use crate::context::AppContext;

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {}
    })
}

pub async fn execute(ctx: &AppContext, _args: Value) -> Result<Value, String> {
    let stats = ctx.journal.stats().await.map_err(|e| e.to_string())?;
    let pipeline = ctx.pipeline.metrics();
    let engine = ctx.engine.counters();
    let context = ctx.monitor.state();

    Ok(json!({
        "journal": stats,
        "pipeline": pipeline,
        "consolidation": engine,
        "context": context,
        "summary": format!(
            "{} memories, {} associations, {} events processed",
            stats.total_memories, stats.total_associations, pipeline.processed_events
        ),
    }))
}
