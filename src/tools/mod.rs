//! External capabilities consumed by the gatherer stage.

pub mod search;
pub mod server;

pub use search::{DuckDuckGoSearch, SearchHit, SearchProvider, format_hits};
pub use server::{BUILTIN_TOOLS, McpToolServer, ToolServer};
