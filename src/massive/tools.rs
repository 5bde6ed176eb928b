//! The market-data tool set served over MCP.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{json, Value};

use super::client::MassiveClient;
use super::formatters::json_to_csv;
use super::options::{build_occ_option_list, generate_strike_ladder, parse_occ_strike};
use crate::error::ServerError;
use crate::server::McpServer;
use crate::types::{CallToolResponse, ToolAnnotations};

const DEFAULT_STRIKE_STEP: f64 = 0.5;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum OutputFormat {
    Json,
    Csv,
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Json
    }
}

#[derive(Debug, Deserialize)]
struct MassiveGetArgs {
    path: String,
    #[serde(default)]
    params: HashMap<String, Value>,
    #[serde(default)]
    format: OutputFormat,
}

#[derive(Debug, Deserialize)]
struct BuildTickersArgs {
    underlying: String,
    expiration_date: String,
    contract_type: String,
    strike: Option<f64>,
    strike_gte: Option<f64>,
    strike_lte: Option<f64>,
    step: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ParseTickerArgs {
    ticker: String,
}

fn read_only() -> ToolAnnotations {
    ToolAnnotations {
        read_only_hint: Some(true),
        ..Default::default()
    }
}

/// Render a query parameter the way it should appear on the wire: bare
/// strings stay bare, everything else keeps its JSON form.
fn query_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Register the Massive market-data tools on `server`.
pub fn register_market_tools(
    server: &McpServer,
    client: MassiveClient,
) -> Result<(), ServerError> {
    server
        .tool("massive_get")
        .description(
            "Fetch a Massive API path with the given query parameters and \
             return the payload as JSON or flattened CSV",
        )
        .input_schema(json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "API path, e.g. /v3/reference/options/contracts"
                },
                "params": {
                    "type": "object",
                    "description": "Query parameters; the API key is added automatically"
                },
                "format": {
                    "type": "string",
                    "enum": ["json", "csv"],
                    "default": "json"
                }
            },
            "required": ["path"]
        }))
        .annotations(ToolAnnotations {
            read_only_hint: Some(true),
            open_world_hint: Some(true),
            ..Default::default()
        })
        .register_typed(move |args: MassiveGetArgs| {
            let client = client.clone();
            async move {
                let params: Vec<(String, String)> = args
                    .params
                    .iter()
                    .map(|(key, value)| (key.clone(), query_value(value)))
                    .collect();
                let payload = client.get(&args.path, &params).await?;
                let text = match args.format {
                    OutputFormat::Json => serde_json::to_string_pretty(&payload)?,
                    OutputFormat::Csv => json_to_csv(&payload),
                };
                Ok(CallToolResponse::text(text))
            }
        })?;

    server
        .tool("build_option_tickers")
        .description(
            "Build OCC option tickers for an underlying and expiry, either \
             for a fixed strike or a ladder between strike_gte and strike_lte",
        )
        .input_schema(json!({
            "type": "object",
            "properties": {
                "underlying": {"type": "string"},
                "expiration_date": {
                    "type": "string",
                    "description": "YYYY-MM-DD"
                },
                "contract_type": {
                    "type": "string",
                    "enum": ["call", "put"]
                },
                "strike": {"type": "number"},
                "strike_gte": {"type": "number"},
                "strike_lte": {"type": "number"},
                "step": {"type": "number", "default": DEFAULT_STRIKE_STEP}
            },
            "required": ["underlying", "expiration_date", "contract_type"]
        }))
        .annotations(read_only())
        .register_typed(|args: BuildTickersArgs| async move {
            let strikes = generate_strike_ladder(
                args.strike,
                args.strike_gte,
                args.strike_lte,
                args.step.unwrap_or(DEFAULT_STRIKE_STEP),
            );
            let tickers = build_occ_option_list(
                &args.underlying,
                &args.expiration_date,
                &args.contract_type,
                &strikes,
            )?;
            Ok(CallToolResponse::text(serde_json::to_string(&tickers)?))
        })?;

    server
        .tool("parse_option_ticker")
        .description("Parse an OCC option ticker and return its strike price")
        .input_schema(json!({
            "type": "object",
            "properties": {
                "ticker": {
                    "type": "string",
                    "description": "e.g. O:RZLV251107C00005500"
                }
            },
            "required": ["ticker"]
        }))
        .annotations(read_only())
        .register_typed(|args: ParseTickerArgs| async move {
            let strike = parse_occ_strike(&args.ticker)?;
            Ok(CallToolResponse::text(strike.to_string()))
        })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolResponseContent;

    fn market_server() -> McpServer {
        let server = McpServer::new("massive");
        let client = MassiveClient::new("https://api.massive.test", "test-key").unwrap();
        register_market_tools(&server, client).unwrap();
        server
    }

    fn text_of(response: &CallToolResponse) -> &str {
        match &response.content[0] {
            ToolResponseContent::Text { text } => text,
            other => panic!("expected text content, got {other:?}"),
        }
    }

    #[test]
    fn registers_the_full_tool_set_in_order() {
        let tools = market_server().list_tools();
        let names: Vec<_> = tools.iter().map(|tool| tool.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["massive_get", "build_option_tickers", "parse_option_ticker"]
        );
        for tool in &tools {
            let annotations = tool.annotations.as_ref().unwrap();
            assert_eq!(annotations.read_only_hint, Some(true));
        }
    }

    async fn call_tool(server: &McpServer, name: &str, arguments: Value) -> CallToolResponse {
        let response = server
            .dispatcher()
            .handle_request(crate::transport::JsonRpcRequest {
                id: 1,
                method: "tools/call".to_string(),
                params: Some(serde_json::json!({
                    "name": name,
                    "arguments": arguments
                })),
                jsonrpc: Default::default(),
            })
            .await;
        serde_json::from_value(response.result.expect("tool call failed")).unwrap()
    }

    #[tokio::test]
    async fn build_option_tickers_walks_the_ladder() {
        let server = market_server();
        let result = call_tool(
            &server,
            "build_option_tickers",
            serde_json::json!({
                "underlying": "rzlv",
                "expiration_date": "2025-11-07",
                "contract_type": "call",
                "strike_gte": 2.0,
                "strike_lte": 3.0
            }),
        )
        .await;
        let tickers: Vec<String> = serde_json::from_str(text_of(&result)).unwrap();
        assert_eq!(
            tickers,
            vec![
                "O:RZLV251107C00002000",
                "O:RZLV251107C00002500",
                "O:RZLV251107C00003000"
            ]
        );
    }

    #[tokio::test]
    async fn parse_option_ticker_returns_the_strike() {
        let server = market_server();
        let result = call_tool(
            &server,
            "parse_option_ticker",
            serde_json::json!({"ticker": "O:RZLV251107C00009500"}),
        )
        .await;
        assert_eq!(text_of(&result), "9.5");
    }

    #[tokio::test]
    async fn malformed_ticker_surfaces_as_tool_error() {
        let server = market_server();
        let result = call_tool(
            &server,
            "parse_option_ticker",
            serde_json::json!({"ticker": "not-a-ticker"}),
        )
        .await;
        assert_eq!(result.is_error, Some(true));
        assert!(text_of(&result).contains("invalid OCC option ticker"));
    }

    #[test]
    fn query_values_keep_strings_bare() {
        assert_eq!(query_value(&serde_json::json!("AAPL")), "AAPL");
        assert_eq!(query_value(&serde_json::json!(50)), "50");
        assert_eq!(query_value(&serde_json::json!(true)), "true");
    }
}
