//! HTTP surface: the trending query API, the MCP SSE/message pair, and the
//! small helper endpoints around them.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Query, Request, State};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use futures::StreamExt;
use rmcp::model::ErrorCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error};
use url::Url;

use crate::cache::{MemoryCache, TrendingCache};
use crate::config::ServiceConfig;
use crate::error::FetchError;
use crate::query::QueryService;
use crate::server::TrendingMcpServer;
use crate::session::{open_session, SessionEvent};
use crate::trending::{GithubTrendingFetcher, QueryKey, Since};

const CORS_HEADERS: [(HeaderName, &str); 4] = [
    (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
    (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS"),
    (
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        "Content-Type, Accept, Authorization, X-Requested-With",
    ),
    (header::ACCESS_CONTROL_MAX_AGE, "86400"),
];

#[derive(Clone)]
pub struct AppState {
    query: Arc<QueryService>,
    mcp: TrendingMcpServer,
    public_url: Option<Url>,
    heartbeat: Duration,
}

impl AppState {
    pub fn new(query: Arc<QueryService>, public_url: Option<Url>, heartbeat: Duration) -> Self {
        Self {
            mcp: TrendingMcpServer::new(query.clone()),
            query,
            public_url,
            heartbeat,
        }
    }

    /// Wire the scrape pipeline described by `config`.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, FetchError> {
        let fetcher = GithubTrendingFetcher::new(config.upstream_url.clone(), config.fetch_timeout)?;
        let cache = config
            .cache_ttl
            .map(|ttl| TrendingCache::new(Arc::new(MemoryCache::new()), ttl));
        let query = QueryService::new(Arc::new(fetcher), cache, config.fetch_timeout);
        Ok(Self::new(
            Arc::new(query),
            config.public_url.clone(),
            config.heartbeat_interval,
        ))
    }

    /// Configured public origin, else the one the client addressed.
    fn origin(&self, headers: &HeaderMap) -> Option<Url> {
        if let Some(url) = &self.public_url {
            return Some(url.clone());
        }
        let host = headers.get(header::HOST)?.to_str().ok()?;
        let scheme = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("http");
        Url::parse(&format!("{}://{}", scheme, host)).ok()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/trending", get(get_trending))
        .route("/api/openapi.json", get(openapi_document))
        .route("/mcp/sse", get(mcp_sse))
        .route("/mcp/message", post(mcp_message))
        .route("/mcp/debug", any(debug_echo))
        .route("/health", get(health))
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

// -- Cross-origin wrapper --

async fn cors(request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };
    let headers = response.headers_mut();
    for (name, value) in CORS_HEADERS {
        headers
            .entry(name)
            .or_insert(HeaderValue::from_static(value));
    }
    response
}

fn pretty_json(status: StatusCode, body: &Value) -> Response {
    let text = serde_json::to_string_pretty(body).unwrap_or_else(|_| "{}".to_string());
    (status, [(header::CONTENT_TYPE, "application/json")], text).into_response()
}

// -- Query API --

#[derive(Debug, Deserialize)]
struct TrendingQuery {
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    since: Option<String>,
}

async fn get_trending(State(state): State<AppState>, Query(params): Query<TrendingQuery>) -> Response {
    let since = match params.since.as_deref().filter(|s| !s.is_empty()) {
        None => Since::default(),
        Some(raw) => match raw.parse::<Since>() {
            Ok(since) => since,
            Err(e) => return pretty_json(e.status_code(), &json!({ "error": e.to_string() })),
        },
    };
    let key = QueryKey::new(params.language.as_deref(), since);

    match state.query.get(&key).await {
        Ok(outcome) => pretty_json(
            StatusCode::OK,
            &json!({
                "data": outcome.records,
                "cached": outcome.cached,
                "language": key.language_label(),
                "since": since,
            }),
        ),
        Err(e) => {
            error!(key = %key, error = %e, "Error fetching trending");
            pretty_json(
                e.status_code(),
                &json!({ "error": "Failed to fetch trending repos", "detail": e.to_string() }),
            )
        }
    }
}

async fn openapi_document(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let server_url = state
        .origin(&headers)
        .map(|u| u.as_str().trim_end_matches('/').to_string())
        .unwrap_or_default();

    let number = |description: &str| json!({ "type": "number", "description": description });
    let string = |description: &str| json!({ "type": "string", "description": description });

    pretty_json(
        StatusCode::OK,
        &json!({
            "openapi": "3.0.0",
            "info": {
                "title": "GitHub Trending API",
                "version": env!("CARGO_PKG_VERSION"),
                "description": "API to fetch GitHub trending repositories",
            },
            "servers": [{ "url": server_url }],
            "paths": {
                "/api/trending": {
                    "get": {
                        "operationId": "getTrendingRepos",
                        "summary": "Get trending repositories",
                        "description": "Fetch GitHub trending repositories with optional language and time range filters",
                        "parameters": [
                            {
                                "name": "language",
                                "in": "query",
                                "schema": { "type": "string" },
                                "description": "Programming language filter (e.g., python, javascript, go, rust)",
                            },
                            {
                                "name": "since",
                                "in": "query",
                                "schema": { "type": "string", "enum": Since::ALLOWED, "default": "daily" },
                                "description": "Time range: daily, weekly, or monthly",
                            },
                        ],
                        "responses": {
                            "200": {
                                "description": "Successful response",
                                "content": {
                                    "application/json": {
                                        "schema": {
                                            "type": "object",
                                            "properties": {
                                                "data": {
                                                    "type": "array",
                                                    "items": { "$ref": "#/components/schemas/TrendingRepo" },
                                                },
                                                "cached": { "type": "boolean" },
                                                "language": { "type": "string" },
                                                "since": { "type": "string" },
                                            },
                                        },
                                    },
                                },
                            },
                            "400": { "description": "Invalid since parameter" },
                            "500": { "description": "Upstream fetch failed" },
                            "504": { "description": "Upstream fetch timed out" },
                        },
                    },
                },
            },
            "components": {
                "schemas": {
                    "TrendingRepo": {
                        "type": "object",
                        "properties": {
                            "rank": number("Ranking position"),
                            "username": string("Repository owner"),
                            "reponame": string("Repository name"),
                            "url": string("Repository URL"),
                            "description": string("Repository description"),
                            "language": string("Primary programming language"),
                            "stars": number("Total star count"),
                            "forks": number("Total fork count"),
                            "starsToday": number("Stars gained in the time period"),
                        },
                    },
                },
            },
        }),
    )
}

async fn health() -> Response {
    pretty_json(
        StatusCode::OK,
        &json!({
            "status": "ok",
            "service": "github-trending-service",
            "endpoints": {
                "api": "/api/trending",
                "openapi": "/api/openapi.json",
                "mcp": "/mcp/sse",
            },
        }),
    )
}

// -- MCP transport --

fn sse_event(event: SessionEvent) -> Event {
    match event {
        SessionEvent::Endpoint(url) => Event::default().event("endpoint").data(url.as_str()),
        SessionEvent::Heartbeat => Event::default().comment("keepalive"),
    }
}

async fn mcp_sse(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(origin) = state.origin(&headers) else {
        return pretty_json(
            StatusCode::BAD_REQUEST,
            &json!({ "error": "Cannot determine request origin: missing Host header" }),
        );
    };

    match open_session(&origin, state.heartbeat) {
        Ok(stream) => {
            let events = stream.map(|event| Ok::<_, Infallible>(sse_event(event)));
            Sse::new(events).into_response()
        }
        Err(e) => {
            error!(origin = %origin, error = %e, "Failed to build MCP message endpoint");
            pretty_json(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({ "error": "Failed to open MCP session" }),
            )
        }
    }
}

async fn mcp_message(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    if let Some(session_id) = params.get("sessionId") {
        debug!(session_id = %session_id, "MCP message");
    }

    let response = state.mcp.handle_message(&body).await;
    let status = match &response.error {
        Some(e) if e.code == ErrorCode::PARSE_ERROR => StatusCode::BAD_REQUEST,
        _ => StatusCode::OK,
    };
    (status, Json(response)).into_response()
}

async fn debug_echo(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let url = state
        .origin(&headers)
        .and_then(|origin| {
            origin
                .join(uri.path_and_query().map(|p| p.as_str()).unwrap_or("/"))
                .ok()
        })
        .map(|u| u.to_string())
        .unwrap_or_else(|| uri.to_string());

    let header_map: serde_json::Map<String, Value> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
            )
        })
        .collect();

    pretty_json(
        StatusCode::OK,
        &json!({
            "method": method.as_str(),
            "url": url,
            "pathname": uri.path(),
            "search": uri.query().map(|q| format!("?{}", q)).unwrap_or_default(),
            "headers": header_map,
            "body": String::from_utf8_lossy(&body),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trending::fetch::DEFAULT_UPSTREAM_URL;

    const PAGE: &str = r#"<html><body>
        <article class="Box-row">
          <h2><a href="/golang/go">golang / go</a></h2>
          <p class="col-9">The Go programming language</p>
          <span itemprop="programmingLanguage">Go</span>
          <a href="/golang/go/stargazers"><svg></svg> 1,234</a>
          <a href="/golang/go/forks"><svg></svg> 56</a>
          <span>12 stars today</span>
        </article>
        <article class="Box-row"><h2>sponsored</h2></article>
        <article class="Box-row">
          <h2><a href="/rust-lang/rust">rust-lang / rust</a></h2>
        </article>
        </body></html>"#;

    async fn spawn_app(upstream: &str, cache: bool) -> String {
        let config = ServiceConfig {
            upstream_url: Url::parse(upstream).unwrap(),
            cache_ttl: cache.then(|| Duration::from_secs(3600)),
            fetch_timeout: Duration::from_secs(5),
            ..ServiceConfig::default()
        };
        let state = AppState::from_config(&config).unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn mock_upstream(status: usize, expect: usize) -> (mockito::ServerGuard, mockito::Mock) {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", mockito::Matcher::Regex(r"^/trending".into()))
            .match_query(mockito::Matcher::Any)
            .with_status(status)
            .with_header("content-type", "text/html")
            .with_body(PAGE)
            .expect(expect)
            .create_async()
            .await;
        (server, mock)
    }

    async fn get_json(url: &str) -> (StatusCode, Value) {
        let resp = reqwest::get(url).await.unwrap();
        let status = StatusCode::from_u16(resp.status().as_u16()).unwrap();
        let body = resp.text().await.unwrap();
        (status, serde_json::from_str(&body).unwrap())
    }

    #[tokio::test]
    async fn test_invalid_since_is_rejected() {
        let (upstream, mock) = mock_upstream(200, 0).await;
        let base = spawn_app(&format!("{}/trending", upstream.url()), true).await;

        for bad in ["yearly", "DAILY", "hourly"] {
            let (status, body) = get_json(&format!("{base}/api/trending?since={bad}")).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            let error = body["error"].as_str().unwrap();
            assert!(error.contains("daily, weekly, monthly"), "{error}");
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_query_is_cached_on_second_call() {
        let (upstream, mock) = mock_upstream(200, 1).await;
        let base = spawn_app(&format!("{}/trending", upstream.url()), true).await;
        let url = format!("{base}/api/trending?language=go&since=weekly");

        let (status, first) = get_json(&url).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["cached"], false);
        assert_eq!(first["language"], "go");
        assert_eq!(first["since"], "weekly");

        let data = first["data"].as_array().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0]["rank"], 1);
        assert_eq!(data[0]["username"], "golang");
        assert_eq!(data[0]["stars"], 1234);
        assert_eq!(data[0]["forks"], 56);
        assert_eq!(data[0]["starsToday"], 12);
        assert_eq!(data[1]["rank"], 2);
        assert_eq!(data[1]["reponame"], "rust");

        let (_, second) = get_json(&url).await;
        assert_eq!(second["cached"], true);
        assert_eq!(second["data"], first["data"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_defaults_to_all_languages_daily() {
        let (upstream, _mock) = mock_upstream(200, 1).await;
        let base = spawn_app(&format!("{}/trending", upstream.url()), false).await;

        let (status, body) = get_json(&format!("{base}/api/trending")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["language"], "all");
        assert_eq!(body["since"], "daily");
        assert_eq!(body["cached"], false);
    }

    #[tokio::test]
    async fn test_upstream_failure_is_500() {
        let (upstream, _mock) = mock_upstream(503, 1).await;
        let base = spawn_app(&format!("{}/trending", upstream.url()), true).await;

        let (status, body) = get_json(&format!("{base}/api/trending")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to fetch trending repos");
        assert!(body["detail"].as_str().unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_unparsable_message_is_parse_error() {
        let base = spawn_app(DEFAULT_UPSTREAM_URL, true).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/mcp/message?sessionId=abc"))
            .header("content-type", "application/json")
            .body("{this is not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 400);

        let body: Value = serde_json::from_str(&resp.text().await.unwrap()).unwrap();
        assert_eq!(body["jsonrpc"], "2.0");
        assert!(body["id"].is_null());
        assert_eq!(body["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn test_message_without_method_is_invalid_request_with_200() {
        let base = spawn_app(DEFAULT_UPSTREAM_URL, true).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/mcp/message"))
            .body(r#"{"jsonrpc":"2.0","id":"x1"}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);

        let body: Value = serde_json::from_str(&resp.text().await.unwrap()).unwrap();
        assert_eq!(body["id"], "x1");
        assert_eq!(body["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn test_tool_call_over_http_uses_pipeline() {
        let (upstream, mock) = mock_upstream(200, 1).await;
        let base = spawn_app(&format!("{}/trending", upstream.url()), true).await;

        let request = json!({
            "jsonrpc": "2.0",
            "id": 42,
            "method": "tools/call",
            "params": { "name": "get_trending_repos", "arguments": { "language": "rust" } },
        });
        let resp = reqwest::Client::new()
            .post(format!("{base}/mcp/message"))
            .body(request.to_string())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);

        let body: Value = serde_json::from_str(&resp.text().await.unwrap()).unwrap();
        assert_eq!(body["id"], 42);
        let text = body["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.starts_with("GitHub trending repositories (language: rust, since: daily):"));
        assert!(text.contains("1. golang/go"));
        assert!(text.contains("⭐ 1,234 stars (+12 today)"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_sse_announces_endpoint_first() {
        let base = spawn_app(DEFAULT_UPSTREAM_URL, true).await;
        let mut resp = reqwest::get(format!("{base}/mcp/sse")).await.unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        let content_type = resp.headers()["content-type"].to_str().unwrap().to_string();
        assert!(content_type.starts_with("text/event-stream"));
        assert_eq!(resp.headers()["cache-control"], "no-cache");

        let mut received = String::new();
        while !received.contains("\n\n") {
            let chunk = tokio::time::timeout(Duration::from_secs(5), resp.chunk())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            received.push_str(&String::from_utf8_lossy(&chunk));
        }

        let first_event = received.split("\n\n").next().unwrap();
        assert!(!first_event.starts_with(':'), "heartbeat before endpoint");
        assert!(first_event.contains("event: endpoint"));

        let data = first_event
            .lines()
            .find_map(|l| l.strip_prefix("data: "))
            .unwrap();
        let url = Url::parse(data).unwrap();
        assert_eq!(url.path(), "/mcp/message");
        assert_eq!(url.host_str(), Some("127.0.0.1"));
        let session_id = url
            .query_pairs()
            .find(|(k, _)| k == "sessionId")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert!(uuid::Uuid::parse_str(&session_id).is_ok());
    }

    #[tokio::test]
    async fn test_preflight_short_circuits_with_cors_headers() {
        let base = spawn_app(DEFAULT_UPSTREAM_URL, true).await;
        let resp = reqwest::Client::new()
            .request(reqwest::Method::OPTIONS, format!("{base}/mcp/message"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 204);
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");
        assert_eq!(resp.headers()["access-control-max-age"], "86400");
    }

    #[tokio::test]
    async fn test_health_carries_cors_headers() {
        let base = spawn_app(DEFAULT_UPSTREAM_URL, true).await;
        let resp = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");
        let body: Value = serde_json::from_str(&resp.text().await.unwrap()).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["endpoints"]["mcp"], "/mcp/sse");
    }

    #[tokio::test]
    async fn test_openapi_uses_request_origin() {
        let base = spawn_app(DEFAULT_UPSTREAM_URL, true).await;
        let (status, doc) = get_json(&format!("{base}/api/openapi.json")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(doc["servers"][0]["url"], base);
        assert!(doc["paths"]["/api/trending"]["get"].is_object());
    }

    #[tokio::test]
    async fn test_debug_echoes_request() {
        let base = spawn_app(DEFAULT_UPSTREAM_URL, true).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/mcp/debug?x=1"))
            .header("x-request-tag", "yes")
            .body("hello")
            .send()
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&resp.text().await.unwrap()).unwrap();
        assert_eq!(body["method"], "POST");
        assert_eq!(body["pathname"], "/mcp/debug");
        assert_eq!(body["search"], "?x=1");
        assert_eq!(body["headers"]["x-request-tag"], "yes");
        assert_eq!(body["body"], "hello");
    }
}
