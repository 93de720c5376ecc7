//! Minimal CLI for exercising a spec document against the dispatcher
//! without a network listener (spec.md Non-goals exclude an HTTP server
//! binding). Grounded on the teacher's `cli::cli` clap layout.

use clap::Parser;
use hyperswitch::config::Config;
use hyperswitch::dispatcher::Dispatcher;
use hyperswitch::filter::FilterRegistry;
use hyperswitch::http_client::ReqwestHttpClient;
use hyperswitch::metrics::InMemoryMetrics;
use hyperswitch::model::{Body, Request};
use hyperswitch::ratelimit::InMemoryRateLimiter;
use hyperswitch::spec::{build_tree, load_merged_document, HandlerRegistry, ModuleRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hyperswitch-demo")]
#[command(about = "Dispatch a single request against a merged spec document", long_about = None)]
struct Cli {
    /// Path to the entry OpenAPI spec document.
    #[arg(short, long)]
    spec: PathBuf,

    /// Optional runtime config (YAML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP method to dispatch.
    #[arg(short, long, default_value = "get")]
    method: String,

    /// Request path.
    #[arg(short, long)]
    path: String,

    /// Optional JSON request body.
    #[arg(short, long)]
    body: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_yaml_str(&std::fs::read_to_string(path)?)?,
        None => Config::default(),
    };

    let doc = load_merged_document(&cli.spec, &ModuleRegistry::new())?;
    let tree = build_tree(
        &doc,
        &HandlerRegistry::new(),
        &FilterRegistry::with_stock_filters(),
        Arc::new(serde_json::Value::Null),
    )?;

    let skip_resources = config.skip_resources;
    let dispatcher = Dispatcher::new(
        Arc::new(tree),
        Arc::new(config.clone()),
        Arc::new(InMemoryMetrics::new()),
        Arc::new(InMemoryRateLimiter::default()),
        Arc::new(ReqwestHttpClient::new(&config.user_agent)),
    );

    if !skip_resources {
        dispatcher.run_resource_phase().await?;
    }

    let mut request = Request::new(cli.method, cli.path);
    if let Some(raw) = cli.body {
        request = request.with_body(Body::Json(serde_json::from_str(&raw)?));
    }

    let response = dispatcher.request(request).await;
    println!("{} {}", response.status, serde_json::to_string_pretty(&response.body.as_json())?);
    Ok(())
}
