//! Live event connection to the notification server.
//!
//! Opens `/ws` with the session token, binds to the session's own user and
//! feeds every delivered [`TaskEvent`](crate::events::TaskEvent) into an
//! [`UploadCoordinator`](crate::coordinator::UploadCoordinator) inbox.
//! Events published while the connection is down are lost; callers look up
//! tasks still `processing` whenever [`LiveStatus::Bound`] is reported again.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::coordinator::CoordinatorMessage;
use crate::error::LiveError;
use crate::events::{ClientMessage, ServerMessage};

/// Delay between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// How long the server gets to answer the bind request.
const BIND_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state changes reported by [`LiveClient::spawn`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveStatus {
    /// Connected and bound; events flow from here on.
    Bound,
    /// The connection dropped or could not be opened. A retry follows.
    Disconnected { reason: String },
    /// The server refused the bind. No retry follows.
    Rejected { reason: String },
}

#[derive(Debug, Clone)]
pub struct LiveClient {
    ws_url: String,
    token: String,
    owner_id: String,
    reconnect_delay: Duration,
}

impl LiveClient {
    /// Client for the server at `base_url` (`http`/`https`), binding to `owner_id`.
    pub fn new(base_url: &str, token: &str, owner_id: &str) -> Result<Self, LiveError> {
        Ok(Self {
            ws_url: ws_url(base_url)?,
            token: token.to_string(),
            owner_id: owner_id.to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        })
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Open the socket and bind. Returns once the server answered `Bound`.
    pub async fn connect(&self) -> Result<LiveConnection, LiveError> {
        let mut request = self.ws_url.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|e| LiveError::WebSocket(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (mut stream, _) = connect_async(request).await?;
        let bind = serde_json::to_string(&ClientMessage::Bind {
            owner_id: self.owner_id.clone(),
        })?;
        stream.send(Message::Text(bind.into())).await?;

        while let Some(frame) = stream.next().await {
            let Message::Text(text) = frame? else {
                continue;
            };
            match serde_json::from_str::<ServerMessage>(text.as_str())? {
                ServerMessage::Bound { owner_id } => {
                    info!(owner_id = %owner_id, "Live connection bound");
                    return Ok(LiveConnection { stream });
                }
                ServerMessage::BindRejected { reason } => {
                    return Err(LiveError::BindRejected(reason));
                }
                ServerMessage::Task(event) => {
                    debug!(task_id = %event.task_id, "Task event before bind ignored");
                }
            }
        }
        Err(LiveError::Closed)
    }

    /// Keep a bound connection open, reconnecting after drops, and forward
    /// task events into `inbox`. Stops when the bind is refused or when
    /// `inbox` or `status` is dropped.
    pub fn spawn(
        self,
        inbox: mpsc::UnboundedSender<CoordinatorMessage>,
        status: mpsc::UnboundedSender<LiveStatus>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let reason = match tokio::time::timeout(BIND_TIMEOUT, self.connect()).await {
                    Ok(Ok(connection)) => {
                        if status.send(LiveStatus::Bound).is_err() {
                            break;
                        }
                        match connection.forward(&inbox).await {
                            Ok(()) => break,
                            Err(e) => e.to_string(),
                        }
                    }
                    Ok(Err(LiveError::BindRejected(reason))) => {
                        warn!(reason = %reason, "Live bind rejected");
                        let _ = status.send(LiveStatus::Rejected { reason });
                        break;
                    }
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => "bind timed out".to_string(),
                };

                warn!(reason = %reason, "Live connection lost, reconnecting");
                if status.send(LiveStatus::Disconnected { reason }).is_err() {
                    break;
                }
                tokio::time::sleep(self.reconnect_delay).await;
            }
            debug!("Live client stopped");
        })
    }
}

/// A bound live connection.
pub struct LiveConnection {
    stream: WsStream,
}

impl LiveConnection {
    /// Forward task events into `inbox` until the connection ends.
    ///
    /// Returns `Ok` only when `inbox` has been dropped.
    pub async fn forward(
        mut self,
        inbox: &mpsc::UnboundedSender<CoordinatorMessage>,
    ) -> Result<(), LiveError> {
        while let Some(frame) = self.stream.next().await {
            match frame? {
                Message::Text(text) => match serde_json::from_str::<ServerMessage>(text.as_str()) {
                    Ok(ServerMessage::Task(event)) => {
                        debug!(task_id = %event.task_id, status = %event.status, "Task event");
                        if inbox.send(CoordinatorMessage::Delivered(event)).is_err() {
                            let _ = self.stream.close(None).await;
                            return Ok(());
                        }
                    }
                    Ok(other) => debug!(message = ?other, "Ignoring control frame"),
                    Err(e) => warn!(error = %e, "Ignoring unreadable frame"),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
        Err(LiveError::Closed)
    }
}

/// `http://host:port/prefix` -> `ws://host:port/prefix/ws`.
fn ws_url(base_url: &str) -> Result<String, LiveError> {
    let mut url =
        reqwest::Url::parse(base_url).map_err(|e| LiveError::InvalidUrl(e.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(LiveError::InvalidUrl(format!("unsupported scheme '{}'", other))),
    };
    url.set_scheme(scheme)
        .map_err(|_| LiveError::InvalidUrl(base_url.to_string()))?;
    let path = format!("{}/ws", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_url() {
        assert_eq!(ws_url("http://127.0.0.1:3030").unwrap(), "ws://127.0.0.1:3030/ws");
        assert_eq!(ws_url("https://hire.example.com/").unwrap(), "wss://hire.example.com/ws");
        assert_eq!(
            ws_url("http://localhost:8080/notify/").unwrap(),
            "ws://localhost:8080/notify/ws"
        );
        assert!(matches!(ws_url("ftp://example.com"), Err(LiveError::InvalidUrl(_))));
        assert!(matches!(ws_url("not a url"), Err(LiveError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_reports_disconnect() {
        let client = LiveClient::new("http://127.0.0.1:1", "tok", "u1")
            .unwrap()
            .with_reconnect_delay(Duration::from_millis(10));
        let (inbox, _rx) = mpsc::unbounded_channel();
        let (status_tx, mut status_rx) = mpsc::unbounded_channel();

        let handle = client.spawn(inbox, status_tx);
        let status = tokio::time::timeout(Duration::from_secs(5), status_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(status, LiveStatus::Disconnected { .. }));

        drop(status_rx);
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }
}
