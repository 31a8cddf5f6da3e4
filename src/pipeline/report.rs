//! Printable research reports.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Status tag carried by degraded summaries.
pub const FALLBACK_SUMMARY_STATUS: &str = "fallback_summary";

const REPORT_HEADER: &str = "=== RESEARCH SUMMARY ===";

/// Reduced-fidelity summary built locally when generation fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FallbackSummary {
    pub status: String,
    pub topic: String,
    pub summary: String,
    pub key_findings: Vec<String>,
    pub conclusion: String,
}

/// Body of a completed summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryBody {
    Generated(String),
    Fallback(FallbackSummary),
}

impl SummaryBody {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

/// Render a completed summary report.
pub fn render_summary(topic: &str, body: &SummaryBody, generated_at: DateTime<Utc>) -> String {
    let mut out = String::with_capacity(512);
    out.push_str(REPORT_HEADER);
    out.push('\n');
    out.push_str(&format!("Topic: {}\n\n", topic));

    match body {
        SummaryBody::Generated(text) => {
            out.push_str("Status: COMPLETED\n\n");
            out.push_str("Summary:\n");
            out.push_str(text.trim());
            out.push_str("\n\n");
        }
        SummaryBody::Fallback(fallback) => {
            out.push_str(&format!("Status: COMPLETED ({})\n", fallback.status));
            out.push_str(&format!("Summary: {}\n", fallback.summary));
            out.push_str("Key Findings:\n");
            for finding in &fallback.key_findings {
                out.push_str(&format!("  • {}\n", finding));
            }
            out.push_str(&format!("\nConclusion: {}\n\n", fallback.conclusion));
        }
    }

    out.push_str(&format!("Generated at: {}", format_stamp(generated_at)));
    out
}

/// Render the report for an error that reached the terminal stage.
pub fn render_failure(topic: &str, error: &str, generated_at: DateTime<Utc>) -> String {
    format!(
        "{REPORT_HEADER}\n\
         Topic: {topic}\n\n\
         Status: ERROR\n\
         Error: {error}\n\n\
         The research pipeline encountered an error. Please try again.\n\
         Generated at: {}",
        format_stamp(generated_at)
    )
}

fn format_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
