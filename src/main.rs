use std::sync::Arc;

use anyhow::Context;
use research_assist::config::PipelineConfig;
use research_assist::error::ConfigError;
use research_assist::llm::{LlmBackend, LlmConfig, create_provider};
use research_assist::pipeline::Orchestrator;
use research_assist::tools::{DuckDuckGoSearch, McpToolServer};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

const DEFAULT_TOPIC: &str = "Artificial intelligence in healthcare";
const LOG_FILE: &str = "research_assist.log";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = PipelineConfig::from_env().context("invalid pipeline configuration")?;

    // Console plus a plain-text log file; the guard flushes the file on exit
    let file_appender = tracing_appender::rolling::never(".", LOG_FILE);
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    let backend_name = std::env::var("LLM_BACKEND").unwrap_or_else(|_| "openai".to_string());
    let backend = LlmBackend::parse(&backend_name)
        .with_context(|| format!("unknown LLM_BACKEND '{backend_name}' (expected anthropic or openai)"))?;
    let api_key = std::env::var(backend.api_key_var())
        .map_err(|_| ConfigError::MissingEnvVar(backend.api_key_var().to_string()))?;

    let llm = create_provider(&LlmConfig {
        backend,
        api_key: secrecy::SecretString::from(api_key),
        model: config.model.clone(),
    })?;

    eprintln!("🔬 Research Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {} ({:?})", config.model, backend);
    eprintln!(
        "   Gatherer: {}",
        if config.use_mcp { "MCP tools" } else { "web search" }
    );
    eprintln!("   Run budget: {}s", config.run_timeout.as_secs_f64());
    eprintln!("   Log file: {}\n", LOG_FILE);

    let search = Arc::new(DuckDuckGoSearch::new(reqwest::Client::new()));
    let tools = Arc::new(McpToolServer::new());
    let orchestrator = Orchestrator::new(config, llm, search, tools);

    let mut topics: Vec<String> = std::env::args().skip(1).collect();
    if topics.is_empty() {
        topics.push(DEFAULT_TOPIC.to_string());
    }

    for topic in &topics {
        eprintln!("── {topic} ──");
        let outcome = orchestrator.run(topic).await;
        println!("{}\n", outcome.render());
    }

    Ok(())
}
