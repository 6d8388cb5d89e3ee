//! Operator CLI for a running engram server.
//!
//! Speaks to the HTTP API. Exit codes: 0 success, 1 usage or server-side
//! error, 2 server unreachable.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::{json, Value};

const EXIT_ERROR: u8 = 1;
const EXIT_UNREACHABLE: u8 = 2;

#[derive(Parser)]
#[command(name = "engram", version, about = "Operator CLI for the engram memory server")]
struct Cli {
    /// Base URL of the server.
    #[arg(long, default_value = "http://127.0.0.1:8420", env = "ENGRAM_URL")]
    url: String,

    /// Print raw JSON instead of summaries.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capture one memory entry.
    Capture {
        source: String,
        content: String,
    },
    /// List recent memories.
    List {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Fetch one memory with its associations.
    Get { id: String },
    /// Similarity search.
    Search {
        query: String,
        #[arg(long)]
        memory_type: Option<String>,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Consolidate specific memories by id.
    Consolidate { ids: Vec<String> },
    /// Journal statistics and pipeline metrics.
    Stats,
    /// Service health map.
    Health,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/').to_string();

    let outcome = match &cli.command {
        Command::Capture { source, content } => {
            post(
                &client,
                &format!("{base}/api/v1/journal"),
                json!({ "source": source, "content": content }),
            )
            .await
        }
        Command::List { limit } => get(&client, &format!("{base}/api/v1/journal?limit={limit}")).await,
        Command::Get { id } => get(&client, &format!("{base}/api/v1/journal/{id}")).await,
        Command::Search {
            query,
            memory_type,
            limit,
        } => {
            let mut body = json!({ "content": query, "limit": limit });
            if let Some(memory_type) = memory_type {
                body["memory_type"] = json!(memory_type);
            }
            post(&client, &format!("{base}/api/v1/journal/search"), body).await
        }
        Command::Consolidate { ids } => {
            post(
                &client,
                &format!("{base}/api/v1/journal/consolidate"),
                json!({ "memory_ids": ids }),
            )
            .await
        }
        Command::Stats => get(&client, &format!("{base}/api/v1/journal/stats")).await,
        Command::Health => get(&client, &format!("{base}/health")).await,
    };

    match outcome {
        Ok((status, body)) => {
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
            } else {
                render(&cli.command, &body);
            }
            if status.is_success() {
                ExitCode::SUCCESS
            } else {
                eprintln!("{} {}", "error:".red().bold(), status);
                ExitCode::from(EXIT_ERROR)
            }
        }
        Err(err) => {
            eprintln!("{} {err}", "unreachable:".red().bold());
            ExitCode::from(EXIT_UNREACHABLE)
        }
    }
}

async fn get(client: &reqwest::Client, url: &str) -> Result<(reqwest::StatusCode, Value), reqwest::Error> {
    let response = client.get(url).send().await?;
    let status = response.status();
    let body = response.json().await.unwrap_or_else(|_| json!({}));
    Ok((status, body))
}

async fn post(
    client: &reqwest::Client,
    url: &str,
    body: Value,
) -> Result<(reqwest::StatusCode, Value), reqwest::Error> {
    let response = client.post(url).json(&body).send().await?;
    let status = response.status();
    let body = response.json().await.unwrap_or_else(|_| json!({}));
    Ok((status, body))
}

fn render(command: &Command, body: &Value) {
    match command {
        Command::Capture { source, .. } => {
            if let Some(id) = body["id"].as_str() {
                println!("{} {} ({})", "captured".green().bold(), id, source);
            }
        }
        Command::List { .. } => {
            for entry in body["memories"].as_array().into_iter().flatten() {
                println!(
                    "{}  {:<13} {}",
                    entry["id"].as_str().unwrap_or("?").dimmed(),
                    entry["type"].as_str().unwrap_or("?").cyan(),
                    preview(entry["content"].as_str().unwrap_or("")),
                );
            }
        }
        Command::Get { .. } => {
            let entry = &body["entry"];
            println!(
                "{} {}",
                entry["id"].as_str().unwrap_or("?").bold(),
                entry["type"].as_str().unwrap_or("?").cyan()
            );
            println!("{}", entry["content"].as_str().unwrap_or(""));
            let outbound = body["outbound"].as_array().map(Vec::len).unwrap_or(0);
            let inbound = body["inbound"].as_array().map(Vec::len).unwrap_or(0);
            println!("{} {outbound} out, {inbound} in", "edges:".dimmed());
        }
        Command::Search { .. } => {
            for hit in body["results"].as_array().into_iter().flatten() {
                println!(
                    "{:.3}  {}  {}",
                    hit["similarity"].as_f64().unwrap_or(0.0),
                    hit["entry"]["id"].as_str().unwrap_or("?").dimmed(),
                    preview(hit["entry"]["content"].as_str().unwrap_or("")),
                );
            }
        }
        Command::Consolidate { .. } => {
            println!(
                "{} processed {}, created {}",
                "consolidated".green().bold(),
                body["processed_count"].as_u64().unwrap_or(0),
                body["created"].as_array().map(Vec::len).unwrap_or(0),
            );
        }
        Command::Stats => {
            let journal = &body["journal"];
            println!(
                "memories: {}  associations: {}  avg strength: {:.2}",
                journal["totalMemories"].as_u64().unwrap_or(0),
                journal["totalAssociations"].as_u64().unwrap_or(0),
                journal["avgStrength"].as_f64().unwrap_or(0.0),
            );
            let pipeline = &body["pipeline"];
            println!(
                "events: {} total, {} processed, {} filtered, {} failed",
                pipeline["totalEvents"].as_u64().unwrap_or(0),
                pipeline["processedEvents"].as_u64().unwrap_or(0),
                pipeline["filteredEvents"].as_u64().unwrap_or(0),
                pipeline["failedEvents"].as_u64().unwrap_or(0),
            );
        }
        Command::Health => {
            for (name, status) in body["services"].as_object().into_iter().flatten() {
                let healthy = status["healthy"].as_bool().unwrap_or(false);
                let marker = if healthy { "ok".green() } else { "down".red() };
                println!("{marker}  {name}");
            }
        }
    }
}

fn preview(content: &str) -> String {
    let line = content.lines().next().unwrap_or("");
    if line.chars().count() > 72 {
        let cut: String = line.chars().take(72).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}
