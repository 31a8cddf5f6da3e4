//! Tool server abstraction (MCP-style named tools with JSON parameters).

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::error::ToolError;

/// Names of the tools the built-in server exposes.
pub const BUILTIN_TOOLS: &[&str] = &[
    "web_search",
    "data_analysis",
    "content_summarization",
    "fact_verification",
];

/// A server exposing named tools.
#[async_trait]
pub trait ToolServer: Send + Sync {
    /// Bring the server up. Returns `true` if tools are available.
    async fn start(&self) -> bool;

    /// Names of the currently available tools.
    fn tools(&self) -> Vec<String>;

    /// Execute a tool by name.
    async fn call_tool(&self, name: &str, params: &Value) -> Result<String, ToolError>;
}

/// Local tool server with deterministic canned responses.
///
/// Stands in for a remote MCP server; responses echo the relevant parameter
/// so the downstream stages have topic-specific text to work with.
pub struct McpToolServer {
    running: AtomicBool,
}

impl McpToolServer {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Default for McpToolServer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolServer for McpToolServer {
    async fn start(&self) -> bool {
        info!("MCP tool server starting");
        self.running.store(true, Ordering::SeqCst);
        info!(tools = ?BUILTIN_TOOLS, "MCP tool server started");
        true
    }

    fn tools(&self) -> Vec<String> {
        if !self.is_running() {
            return Vec::new();
        }
        BUILTIN_TOOLS.iter().map(|s| s.to_string()).collect()
    }

    async fn call_tool(&self, name: &str, params: &Value) -> Result<String, ToolError> {
        if !self.is_running() {
            return Err(ToolError::ServerUnavailable);
        }
        info!(tool = name, params = %params, "Executing MCP tool");

        match name {
            "web_search" => Ok(format!(
                "MCP Web Search Results for '{}': Found relevant information about the topic from multiple sources.",
                str_param(params, "query")
            )),
            "data_analysis" => Ok(format!(
                "MCP Data Analysis: Analyzed {} and identified key patterns and trends.",
                non_empty_or(str_param(params, "data"), "research data")
            )),
            "content_summarization" => Ok(
                "MCP Summary: Extracted main points and structured the information effectively."
                    .to_string(),
            ),
            "fact_verification" => Ok(format!(
                "MCP Fact Check: Verified information reliability for: '{}'",
                str_param(params, "claim")
            )),
            other => Err(ToolError::NotFound {
                name: other.to_string(),
            }),
        }
    }
}

fn str_param<'a>(params: &'a Value, key: &str) -> &'a str {
    params.get(key).and_then(Value::as_str).unwrap_or("")
}

fn non_empty_or<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.trim().is_empty() { default } else { value }
}
