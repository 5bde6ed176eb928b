//! Massive market-data API integration: the HTTP client, OCC option
//! symbology helpers, output formatting, and the tool set exposed over MCP.

pub mod client;
pub mod formatters;
pub mod options;
pub mod tools;

pub use client::{ensure_api_key, MassiveClient};
pub use tools::register_market_tools;
