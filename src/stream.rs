use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::extractor::{AlphaEvent, extract_from_event};
use crate::pipeline::{SignalPipeline, Submission};
use crate::retry::RetryPolicy;
use crate::types::{RawOrigin, Signal};

/// Backoff after the first connection fault.
pub const BACKOFF_FLOOR: Duration = Duration::from_secs(5);

/// Backoff never grows past this.
pub const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Keepalive ping cadence on an open websocket.
pub const PING_INTERVAL: Duration = Duration::from_secs(20);

/// A connected session with no inbound frame (pongs included) for this long
/// is treated as dead.
pub const READ_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Reconnect schedule: retry forever, 5s doubling up to 60s.
pub const RECONNECT_POLICY: RetryPolicy = RetryPolicy::unbounded_exponential(BACKOFF_FLOOR, BACKOFF_CAP);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Consecutive-failure counter over a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    failures: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, failures: 0 }
    }

    /// Back to the floor; called on every successful connect.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Record a failure and return how long to wait before reconnecting.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.policy.delay_after(self.failures)
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// A decoded websocket frame, as far as the listener cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close,
    /// Binary, ping and pong frames.
    Other,
}

/// An open feed connection.
#[async_trait]
pub trait FeedConnection: Send {
    /// Next frame; `None` when the remote end has gone away.
    async fn next_frame(&mut self) -> Option<Result<Frame>>;
}

/// Opens feed connections.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn FeedConnection>>;
}

/// Websocket connector authenticated with a bearer token.
pub struct WsConnector {
    url: Url,
    api_key: String,
}

impl WsConnector {
    pub fn new(url: Url, api_key: String) -> Self {
        Self { url, api_key }
    }
}

#[async_trait]
impl FeedConnector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn FeedConnection>> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .context("invalid stream url")?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .context("stream api key is not a valid header value")?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (ws, response) = connect_async(request)
            .await
            .with_context(|| format!("handshake with {} failed", self.url))?;
        debug!("Stream handshake status: {}", response.status());

        let (write, read) = ws.split();
        let mut ping = tokio::time::interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Ok(Box::new(WsConnection { write, read, ping }))
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct WsConnection {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    ping: Interval,
}

#[async_trait]
impl FeedConnection for WsConnection {
    async fn next_frame(&mut self) -> Option<Result<Frame>> {
        loop {
            tokio::select! {
                msg = self.read.next() => {
                    let frame = msg?
                        .map(|m| match m {
                            Message::Text(text) => Frame::Text(text.as_str().to_string()),
                            Message::Close(_) => Frame::Close,
                            _ => Frame::Other,
                        })
                        .map_err(anyhow::Error::from);
                    return Some(frame);
                }
                _ = self.ping.tick() => {
                    if let Err(e) = self.write.send(Message::Ping(vec![].into())).await {
                        return Some(Err(anyhow::Error::from(e).context("keepalive ping failed")));
                    }
                }
            }
        }
    }
}

/// Why a connected session ended.
enum SessionEnd {
    Cancelled,
    Fault(String),
}

/// Keeps a feed connection open, decoding frames into structured events and
/// handing matches to the signal pipeline.
///
/// `Disconnected → Connecting → Connected → (fault) Disconnected`, forever,
/// with [`RECONNECT_POLICY`] backoff between attempts. A session silent for
/// longer than the idle timeout is a fault.
pub struct StreamListener<C> {
    connector: C,
    pipeline: SignalPipeline,
    cancel: CancellationToken,
    backoff: Backoff,
    state: watch::Sender<ConnectionState>,
}

impl<C: FeedConnector> StreamListener<C> {
    pub fn new(connector: C, pipeline: SignalPipeline, cancel: CancellationToken) -> Self {
        Self {
            connector,
            pipeline,
            cancel,
            backoff: Backoff::new(RECONNECT_POLICY),
            state: watch::Sender::new(ConnectionState::Disconnected),
        }
    }

    /// Observe connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Run until cancelled.
    pub async fn run(mut self) {
        info!("Stream listener starting");

        loop {
            self.set_state(ConnectionState::Connecting);
            let connected = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                res = self.connector.connect() => res,
            };

            match connected {
                Ok(conn) => {
                    self.set_state(ConnectionState::Connected);
                    self.backoff.reset();
                    match self.read_session(conn).await {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Fault(reason) => warn!("Stream connection lost: {reason}"),
                    }
                }
                Err(e) => warn!("Stream connect failed: {e:#}"),
            }

            self.set_state(ConnectionState::Disconnected);
            let delay = self.backoff.next_delay();
            info!(
                "Reconnecting stream in {}s (failure {})",
                delay.as_secs(),
                self.backoff.failures()
            );
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!("Stream listener stopped");
    }

    async fn read_session(&self, mut conn: Box<dyn FeedConnection>) -> SessionEnd {
        loop {
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
                frame = tokio::time::timeout(READ_IDLE_TIMEOUT, conn.next_frame()) => frame,
            };
            let Ok(frame) = frame else {
                return SessionEnd::Fault(format!(
                    "no frames for {}s",
                    READ_IDLE_TIMEOUT.as_secs()
                ));
            };

            match frame {
                Some(Ok(Frame::Text(text))) => {
                    self.handle_frame(&text);
                }
                Some(Ok(Frame::Other)) => {}
                Some(Ok(Frame::Close)) => return SessionEnd::Fault("remote closed".into()),
                Some(Err(e)) => return SessionEnd::Fault(format!("read error: {e:#}")),
                None => return SessionEnd::Fault("stream ended".into()),
            }
        }
    }

    /// Decode one text frame. Undecodable frames are logged and skipped.
    pub fn handle_frame(&self, text: &str) -> Option<Submission> {
        let event: AlphaEvent = match serde_json::from_str(text) {
            Ok(ev) => ev,
            Err(e) => {
                warn!("Skipping undecodable stream frame ({} bytes): {e}", text.len());
                return None;
            }
        };

        let extraction = extract_from_event(&event)?;
        info!("Stream event: extracted {}", extraction.address);
        let origin = RawOrigin::Stream {
            frame_len: text.len(),
        };
        Some(self.pipeline.submit(Signal::new(extraction, origin)))
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!("Stream state: {prev:?} -> {next:?}");
        }
    }
}
