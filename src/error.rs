use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use rmcp::model::{ErrorCode, ErrorData};

/// JSON-RPC error code for a tool that failed while executing.
pub const TOOL_EXECUTION_ERROR: ErrorCode = ErrorCode(-32000);

/// Failure talking to the trending page. Cloneable so one failed fetch can be
/// handed to every caller waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("upstream returned HTTP {0}")]
    Status(u16),

    #[error("request failed: {0}")]
    Http(#[source] Arc<reqwest::Error>),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Http(Arc::new(e))
    }
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Http(e) if e.is_timeout())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TrendingError {
    #[error("Invalid since parameter '{0}'. Use: daily, weekly, monthly")]
    InvalidSince(String),

    #[error("Failed to fetch trending: {0}")]
    UpstreamUnavailable(#[from] FetchError),

    #[error("Failed to fetch trending: upstream did not respond within {0:?}")]
    Timeout(Duration),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

impl TrendingError {
    pub fn to_mcp_error(&self) -> ErrorData {
        match self {
            TrendingError::InvalidSince(_)
            | TrendingError::InvalidParams(_)
            | TrendingError::UnknownTool(_) => ErrorData::invalid_params(self.to_string(), None),
            TrendingError::UpstreamUnavailable(_) | TrendingError::Timeout(_) => {
                ErrorData::new(TOOL_EXECUTION_ERROR, self.to_string(), None)
            }
        }
    }

    /// Status used by the plain query endpoint.
    pub fn status_code(&self) -> StatusCode {
        match self {
            TrendingError::InvalidSince(_)
            | TrendingError::InvalidParams(_)
            | TrendingError::UnknownTool(_) => StatusCode::BAD_REQUEST,
            TrendingError::UpstreamUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TrendingError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}
