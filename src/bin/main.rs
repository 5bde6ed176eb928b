use std::path::Path;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use mcp_massive::massive::{ensure_api_key, register_market_tools, MassiveClient};
use mcp_massive::{McpServer, Settings};

#[derive(Parser)]
#[command(author, version, about = "Massive market-data MCP server", long_about = None)]
struct Cli {
    /// Transport to serve
    #[arg(value_enum, default_value_t = TransportArg::Sse)]
    transport: TransportArg,

    /// Host interface for the HTTP transports
    #[arg(long, env = "MASSIVE_MCP_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "MASSIVE_MCP_PORT", default_value_t = 8000)]
    port: u16,

    /// Require Bearer JWTs signed with this secret on the HTTP transports
    #[arg(long, env = "MASSIVE_MCP_JWT_SECRET")]
    jwt_secret: Option<String>,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum TransportArg {
    Stdio,
    Sse,
    #[value(name = "streamable-http")]
    StreamableHttp,
}

impl TransportArg {
    fn as_str(self) -> &'static str {
        match self {
            TransportArg::Stdio => "stdio",
            TransportArg::Sse => "sse",
            TransportArg::StreamableHttp => "streamable-http",
        }
    }
}

/// Load KEY=VALUE pairs from a .env file if present, without overriding
/// variables already set in the environment.
fn load_env_file(path: impl AsRef<Path>) {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return;
    };
    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim().trim_matches('"').trim_matches('\'');
        if !key.is_empty() && std::env::var_os(key).is_none() {
            std::env::set_var(key, value);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env_file(".env");

    // stdout carries the stdio transport, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    ensure_api_key()?;

    let server = McpServer::new("massive").with_settings(Settings {
        host: cli.host,
        port: cli.port,
        jwt_secret: cli.jwt_secret,
        ..Default::default()
    });
    register_market_tools(&server, MassiveClient::from_env()?)?;

    server.run(cli.transport.as_str()).await?;
    Ok(())
}
