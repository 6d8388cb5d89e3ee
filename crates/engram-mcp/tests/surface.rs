//! End-to-end surface tests: HTTP API and stdio tool dispatch over a fully
//! wired stack with a deterministic in-process embedding provider.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use engram_core::{
    Cancellation, EmbeddingProvider, EngramConfig, EngramError, MemoryIndex, Result,
};
use engram_mcp::context::AppContext;
use engram_mcp::protocol::types::{JsonRpcRequest, JSONRPC_VERSION};
use engram_mcp::server::ToolServer;

const DIM: usize = 64;

/// Deterministic bag-of-words embedder: shared tokens correlate vectors.
struct TestEmbedder;

impl TestEmbedder {
    fn token_vector(token: &str) -> Vec<f32> {
        let digest = Sha256::digest(token.as_bytes());
        (0..DIM)
            .map(|i| {
                let byte = digest[i % digest.len()];
                (f32::from(byte.wrapping_mul(31)) / 127.5) - 1.0
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for TestEmbedder {
    fn model_name(&self) -> &str {
        "test-embedder"
    }

    async fn embed(&self, text: &str, _cancel: &Cancellation) -> Result<Vec<f32>> {
        let mut vector = vec![0.0_f32; DIM];
        for token in text.to_lowercase().split_whitespace() {
            for (slot, value) in vector.iter_mut().zip(Self::token_vector(token)) {
                *slot += value;
            }
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for slot in &mut vector {
                *slot /= norm;
            }
        }
        Ok(vector)
    }

    async fn summarize(&self, _contents: &[String], _cancel: &Cancellation) -> Result<String> {
        Err(EngramError::Internal("no summarizer".to_string()))
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

async fn build_stack() -> Arc<AppContext> {
    let mut config = EngramConfig::default();
    config.journal.vector_dimension = DIM;
    config.pipeline.batch_window_ms = 50;
    let ctx = AppContext::build_with(config, Arc::new(TestEmbedder), Arc::new(MemoryIndex::default()))
        .await
        .unwrap();
    ctx.start().await.unwrap();
    ctx
}

/// Serve the API on an ephemeral port; returns the base URL.
async fn serve(ctx: Arc<AppContext>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut shutdown_rx = ctx.shutdown.subscribe();
    let app = engram_mcp::api::router(ctx);
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
            })
            .await
            .unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test(flavor = "multi_thread")]
async fn capture_then_search_over_http() {
    let ctx = build_stack().await;
    let base = serve(Arc::clone(&ctx)).await;
    let client = reqwest::Client::new();

    let created = client
        .post(format!("{base}/api/v1/journal"))
        .json(&json!({
            "source": "a.txt",
            "content": "hello world",
            "metadata": { "change_size": 200 }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 201);
    let body: Value = created.json().await.unwrap();
    let id = body["id"].as_str().unwrap().to_string();

    let search: Value = client
        .post(format!("{base}/api/v1/journal/search"))
        .json(&json!({ "content": "hello" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(search["count"], 1);
    let hit = &search["results"][0];
    assert_eq!(hit["entry"]["id"].as_str().unwrap(), id);
    assert!(hit["similarity"].as_f64().unwrap() >= 0.5);

    // Read-your-writes: fetching the returned id yields the same entry.
    let fetched: Value = client
        .get(format!("{base}/api/v1/journal/{id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["entry"]["content"], "hello world");

    ctx.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn filter_rejects_small_write_via_events() {
    let ctx = build_stack().await;
    let base = serve(Arc::clone(&ctx)).await;
    let client = reqwest::Client::new();

    let before: Value = client
        .get(format!("{base}/api/v1/journal/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let response = client
        .post(format!("{base}/api/v1/events"))
        .json(&json!({
            "type": "file_write",
            "source": "tiny.txt",
            "content": "x",
            "metadata": { "change_size": 10 },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200); // accepted=false path
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["accepted"], false);

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let after: Value = client
        .get(format!("{base}/api/v1/journal/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        after["journal"]["totalMemories"],
        before["journal"]["totalMemories"]
    );
    assert_eq!(after["pipeline"]["filteredEvents"], 1);

    ctx.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn accepted_event_flows_through_the_pipeline() {
    let ctx = build_stack().await;
    let base = serve(Arc::clone(&ctx)).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/api/v1/events"))
        .json(&json!({
            "type": "file_write",
            "source": "big.txt",
            "content": "a meaningful chunk of edited text",
            "metadata": { "change_size": 400 },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);

    // The worker persists asynchronously.
    for _ in 0..100 {
        let stats: Value = client
            .get(format!("{base}/api/v1/journal/stats"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if stats["journal"]["totalMemories"] == 1 {
            ctx.shutdown().await;
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("event never reached the journal");
}

#[tokio::test(flavor = "multi_thread")]
async fn consolidate_by_ids_links_sources() {
    let ctx = build_stack().await;
    let base = serve(Arc::clone(&ctx)).await;
    let client = reqwest::Client::new();

    let mut ids = Vec::new();
    for i in 0..5 {
        let body: Value = client
            .post(format!("{base}/api/v1/journal"))
            .json(&json!({
                "source": format!("log-{i}"),
                "content": format!("deploy pipeline failed with timeout variant{i}"),
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        ids.push(body["id"].as_str().unwrap().to_string());
    }

    let outcome: Value = client
        .post(format!("{base}/api/v1/journal/consolidate"))
        .json(&json!({ "memory_ids": ids }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(outcome["processed_count"], 5);
    assert_eq!(outcome["created"].as_array().unwrap().len(), 1);
    let derived = outcome["created"][0].as_str().unwrap();

    // The derived entry carries derived_from edges to all five sources.
    let detail: Value = client
        .get(format!("{base}/api/v1/journal/{derived}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["entry"]["type"], "semantic");
    let outbound = detail["outbound"].as_array().unwrap();
    assert_eq!(
        outbound
            .iter()
            .filter(|edge| edge["kind"] == "derived_from")
            .count(),
        5
    );

    // Sources gained the consolidation stamp.
    let source: Value = client
        .get(format!("{base}/api/v1/journal/{}", detail["outbound"][0]["targetId"].as_str().unwrap()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(source["entry"]["metadata"]["last_consolidation"].is_string());

    ctx.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn readiness_tracks_lifecycle() {
    let mut config = EngramConfig::default();
    config.journal.vector_dimension = DIM;
    let ctx = AppContext::build_with(config, Arc::new(TestEmbedder), Arc::new(MemoryIndex::default()))
        .await
        .unwrap();

    // Initialized but not started: not ready.
    assert!(!ctx.registry.is_ready().await);

    ctx.start().await.unwrap();
    let base = serve(Arc::clone(&ctx)).await;
    let client = reqwest::Client::new();

    let ready = client.get(format!("{base}/ready")).send().await.unwrap();
    assert_eq!(ready.status(), 200);
    let health: Value = client
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(health["services"]["journal"]["healthy"].as_bool().unwrap());

    ctx.shutdown().await;
    assert!(!ctx.registry.is_ready().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn stdio_tools_roundtrip() {
    let ctx = build_stack().await;
    let mut server = ToolServer::new(Arc::clone(&ctx));

    let request = |id: i64, method: &str, params: Value| JsonRpcRequest {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id: Some(Value::from(id)),
        method: method.to_string(),
        params: Some(params),
    };

    // Calls before initialize are refused.
    let refused = server
        .handle_request(request(1, "tools/list", json!({})))
        .await
        .unwrap();
    assert!(refused.error.is_some());

    server
        .handle_request(request(2, "initialize", json!({})))
        .await
        .unwrap();

    let listed = server
        .handle_request(request(3, "tools/list", json!({})))
        .await
        .unwrap();
    let tools = listed.result.unwrap()["tools"].as_array().unwrap().len();
    assert_eq!(tools, 5);

    let captured = server
        .handle_request(request(
            4,
            "tools/call",
            json!({
                "name": "capture_memory",
                "arguments": { "source": "chat", "content": "remember the gateway ip" }
            }),
        ))
        .await
        .unwrap();
    let result = captured.result.unwrap();
    assert_eq!(result["isError"], false);
    assert!(result["structuredContent"]["id"].is_string());

    let found = server
        .handle_request(request(
            5,
            "tools/call",
            json!({
                "name": "search_memories",
                "arguments": { "content": "gateway" }
            }),
        ))
        .await
        .unwrap();
    let result = found.result.unwrap();
    assert_eq!(result["structuredContent"]["count"], 1);

    let stats = server
        .handle_request(request(6, "tools/call", json!({ "name": "get_stats" })))
        .await
        .unwrap();
    let result = stats.result.unwrap();
    assert_eq!(result["structuredContent"]["journal"]["totalMemories"], 1);

    let listed = server
        .handle_request(request(
            7,
            "tools/call",
            json!({ "name": "get_memories", "arguments": { "limit": 5 } }),
        ))
        .await
        .unwrap();
    assert_eq!(listed.result.unwrap()["structuredContent"]["count"], 1);

    let triggered = server
        .handle_request(request(
            8,
            "tools/call",
            json!({
                "name": "trigger_consolidation",
                "arguments": { "trigger": "conversation_end" }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(
        triggered.result.unwrap()["structuredContent"]["queued"],
        true
    );

    let unknown = server
        .handle_request(request(9, "tools/call", json!({ "name": "no_such_tool" })))
        .await
        .unwrap();
    assert_eq!(unknown.result.unwrap()["isError"], true);

    ctx.shutdown().await;
}
