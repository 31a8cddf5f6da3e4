//! Research Assist: message-routed research pipeline.

pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod retry;
pub mod stages;
pub mod tools;
