//! Lifecycle of one MCP SSE connection.
//!
//! Opening a session queues the `endpoint` announcement and spawns a
//! heartbeat task. The task is tied to the returned [`SessionStream`] through
//! a cancellation token: dropping the stream (client went away) cancels it,
//! and a failed heartbeat write cancels it too. Either way the timer stops
//! once and the channel closes.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

pub const MESSAGE_PATH: &str = "mcp/message";

const EVENT_BUFFER: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Announced,
    Streaming,
    Closed(CloseReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientAbort,
    WriteFailure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Absolute URL the client must POST JSON-RPC messages to.
    Endpoint(Url),
    Heartbeat,
}

#[derive(Debug, Clone)]
pub struct McpSession {
    pub id: Uuid,
    pub endpoint: Url,
    pub created_at: DateTime<Utc>,
}

/// Event stream for one connection. Dropping it ends the session.
pub struct SessionStream {
    // Declared first so the heartbeat is cancelled before the receiver closes.
    _abort: DropGuard,
    events: ReceiverStream<SessionEvent>,
    state: watch::Receiver<SessionState>,
    session: McpSession,
}

impl SessionStream {
    pub fn session(&self) -> &McpSession {
        &self.session
    }

    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }
}

impl Stream for SessionStream {
    type Item = SessionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

/// `<origin>/mcp/message?sessionId=<id>`, keeping any path prefix of the
/// origin.
pub fn message_endpoint(origin: &Url, id: Uuid) -> Result<Url, url::ParseError> {
    let mut base = origin.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    let mut endpoint = base.join(MESSAGE_PATH)?;
    endpoint
        .query_pairs_mut()
        .clear()
        .append_pair("sessionId", &id.to_string());
    Ok(endpoint)
}

/// Open a session: announce the endpoint, then start heartbeats every
/// `heartbeat` once streaming. Must be called inside a tokio runtime.
pub fn open_session(origin: &Url, heartbeat: Duration) -> Result<SessionStream, url::ParseError> {
    let (state_tx, state_rx) = watch::channel(SessionState::Connecting);

    let id = Uuid::new_v4();
    let endpoint = message_endpoint(origin, id)?;
    let session = McpSession {
        id,
        endpoint: endpoint.clone(),
        created_at: Utc::now(),
    };

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    // Fresh channel with spare capacity: the announcement is always first.
    let _ = tx.try_send(SessionEvent::Endpoint(endpoint));
    state_tx.send_replace(SessionState::Announced);

    let cancel = CancellationToken::new();
    tokio::spawn(run_heartbeat(id, tx, cancel.clone(), state_tx, heartbeat));

    info!(session_id = %id, endpoint = %session.endpoint, "MCP session opened");

    Ok(SessionStream {
        _abort: cancel.drop_guard(),
        events: ReceiverStream::new(rx),
        state: state_rx,
        session,
    })
}

async fn run_heartbeat(
    id: Uuid,
    tx: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
    state: watch::Sender<SessionState>,
    period: Duration,
) {
    state.send_replace(SessionState::Streaming);

    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break CloseReason::ClientAbort,
            _ = ticker.tick() => match tx.try_send(SessionEvent::Heartbeat) {
                Ok(()) => {}
                // Client is still draining earlier events; skip this beat.
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(session_id = %id, "Heartbeat skipped, buffer full");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break CloseReason::WriteFailure,
            },
        }
    };

    cancel.cancel();
    drop(ticker);
    drop(tx);
    state.send_replace(SessionState::Closed(reason));
    info!(session_id = %id, reason = ?reason, "MCP session closed");
}
