use std::sync::Arc;

use futures::future::BoxFuture;
use rmcp::model::{
    CallToolResult, Content, ErrorCode, ErrorData, Implementation, ProtocolVersion,
    ServerCapabilities, ServerInfo,
};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::TrendingError;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, ToolCall, ToolDefinition};
use crate::query::QueryService;
use crate::trending::{QueryKey, Since, TrendingRecord};

pub const SERVER_NAME: &str = "github-trending-mcp";

/// Entries beyond this are left out of the tool's text output.
pub const MAX_LISTED_REPOS: usize = 15;

/// Serves MCP JSON-RPC calls. Holds no per-session state; every request is
/// handled on its own.
#[derive(Clone)]
pub struct TrendingMcpServer {
    query: Arc<QueryService>,
}

// -- Tool parameter types --

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
pub struct TrendingParams {
    #[schemars(
        description = "Programming language filter, e.g. python, javascript, typescript, go, rust, java. Leave empty for all languages."
    )]
    #[serde(default)]
    pub language: Option<String>,

    #[schemars(
        with = "Since",
        description = "Time range: daily (trending today), weekly (this week) or monthly (this month). Default: daily"
    )]
    #[serde(default, deserialize_with = "lenient_since")]
    pub since: Since,
}

/// `null`, missing and blank all mean the default range.
fn lenient_since<'de, D>(deserializer: D) -> Result<Since, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)?.as_deref().map(str::trim) {
        None | Some("") => Ok(Since::default()),
        Some(raw) => raw.parse().map_err(de::Error::custom),
    }
}

// -- Tool registry --

type ToolHandler =
    for<'a> fn(&'a TrendingMcpServer, Value) -> BoxFuture<'a, Result<CallToolResult, TrendingError>>;

struct ToolEntry {
    name: &'static str,
    description: &'static str,
    input_schema: fn() -> Value,
    handler: ToolHandler,
}

static TOOLS: &[ToolEntry] = &[ToolEntry {
    name: "get_trending_repos",
    description: "Get repositories currently trending on GitHub. Filter by programming language \
                  and by time range (daily, weekly, monthly). Returns each project's name, total \
                  stars, stars gained in the range, language and description.",
    input_schema: schema_for::<TrendingParams>,
    handler: call_get_trending_repos,
}];

fn call_get_trending_repos(
    server: &TrendingMcpServer,
    arguments: Value,
) -> BoxFuture<'_, Result<CallToolResult, TrendingError>> {
    Box::pin(server.get_trending_repos(arguments))
}

fn schema_for<T: schemars::JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    TOOLS
        .iter()
        .map(|t| ToolDefinition {
            name: t.name.to_string(),
            description: t.description.to_string(),
            input_schema: (t.input_schema)(),
        })
        .collect()
}

impl TrendingMcpServer {
    pub fn new(query: Arc<QueryService>) -> Self {
        Self { query }
    }

    pub fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "GitHub trending server. Use get_trending_repos to list trending repositories, \
                 optionally filtered by language and by daily, weekly or monthly range."
                    .to_string(),
            ),
        }
    }

    /// Parse a raw message body and dispatch it. A body that is not JSON
    /// yields a parse error with a null id; JSON that is not a request object
    /// yields an invalid request error carrying whatever id it had.
    pub async fn handle_message(&self, body: &[u8]) -> JsonRpcResponse {
        let message: Value = match serde_json::from_slice(body) {
            Ok(message) => message,
            Err(e) => {
                return JsonRpcResponse::error(
                    Value::Null,
                    ErrorData::new(
                        ErrorCode::PARSE_ERROR,
                        "Parse error",
                        Some(serde_json::json!({ "detail": e.to_string() })),
                    ),
                )
            }
        };

        let id = message.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<JsonRpcRequest>(message) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => JsonRpcResponse::error(
                id,
                ErrorData::new(
                    ErrorCode::INVALID_REQUEST,
                    "Invalid Request",
                    Some(serde_json::json!({ "detail": e.to_string() })),
                ),
            ),
        }
    }

    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;

        match method.as_str() {
            "initialize" => match serde_json::to_value(self.get_info()) {
                Ok(info) => JsonRpcResponse::success(id, info),
                Err(e) => JsonRpcResponse::error(id, ErrorData::internal_error(e.to_string(), None)),
            },
            "tools/list" => JsonRpcResponse::success(
                id,
                serde_json::json!({ "tools": tool_definitions() }),
            ),
            "tools/call" => match self.call_tool(params).await {
                Ok(result) => match serde_json::to_value(result) {
                    Ok(v) => JsonRpcResponse::success(id, v),
                    Err(e) => {
                        JsonRpcResponse::error(id, ErrorData::internal_error(e.to_string(), None))
                    }
                },
                Err(e) => JsonRpcResponse::error(id, e.to_mcp_error()),
            },
            "notifications/initialized" | "ping" => {
                JsonRpcResponse::success(id, serde_json::json!({}))
            }
            other => {
                debug!(method = other, "Unknown JSON-RPC method");
                JsonRpcResponse::error(
                    id,
                    ErrorData::new(
                        ErrorCode::METHOD_NOT_FOUND,
                        format!("Method not found: {}", other),
                        None,
                    ),
                )
            }
        }
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<CallToolResult, TrendingError> {
        let params = params
            .ok_or_else(|| TrendingError::InvalidParams("missing params for tools/call".into()))?;
        let call: ToolCall = serde_json::from_value(params)
            .map_err(|e| TrendingError::InvalidParams(e.to_string()))?;

        let tool = TOOLS
            .iter()
            .find(|t| t.name == call.name)
            .ok_or_else(|| TrendingError::UnknownTool(call.name.clone()))?;

        let arguments = call.arguments.unwrap_or_else(|| serde_json::json!({}));
        (tool.handler)(self, arguments).await
    }

    // -- Tool handlers --

    async fn get_trending_repos(&self, arguments: Value) -> Result<CallToolResult, TrendingError> {
        let params: TrendingParams = serde_json::from_value(arguments)
            .map_err(|e| TrendingError::InvalidParams(e.to_string()))?;

        let key = QueryKey::new(params.language.as_deref(), params.since);
        let outcome = self.query.get(&key).await?;

        let text = format_trending(&key, &outcome.records);
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
}

/// Render records as plain text for an LLM reader.
pub fn format_trending(key: &QueryKey, records: &[TrendingRecord]) -> String {
    let since = key.since();
    let mut text = format!(
        "GitHub trending repositories (language: {}, since: {}):\n\n",
        key.language_label(),
        since
    );

    for repo in records.iter().take(MAX_LISTED_REPOS) {
        text.push_str(&format!("{}. {}\n", repo.rank, repo.full_name()));
        text.push_str(&format!(
            "   ⭐ {} stars (+{} {})\n",
            format_thousands(repo.stars),
            repo.stars_in_window,
            since.window_phrase()
        ));
        if !repo.language.is_empty() {
            text.push_str(&format!("   Language: {}\n", repo.language));
        }
        if !repo.description.is_empty() {
            text.push_str(&format!("   Description: {}\n", repo.description));
        }
        text.push_str(&format!("   URL: {}\n\n", repo.url));
    }

    text
}

fn format_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
