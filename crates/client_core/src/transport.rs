use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::{Deserialize, Serialize};
use shared::protocol::{ClientRequest, RequestAck, ServerEvent};
use tokio::{
    net::TcpStream,
    sync::{broadcast, oneshot, Mutex},
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::warn;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Outgoing side of the server connection as the engine sees it: a
/// fire-and-forget channel plus an awaited request/response call.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ClientRequest) -> Result<()>;
    async fn request(&self, request: ClientRequest) -> Result<RequestAck>;
}

pub struct MissingTransport;

#[async_trait]
impl Transport for MissingTransport {
    async fn send(&self, _request: ClientRequest) -> Result<()> {
        Err(anyhow!("transport is unavailable"))
    }

    async fn request(&self, _request: ClientRequest) -> Result<RequestAck> {
        Err(anyhow!("transport is unavailable"))
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestEnvelope {
    request_id: u64,
    request: ClientRequest,
}

/// Everything the server writes on the socket: acks for awaited requests,
/// or pushed events.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
enum ServerFrame {
    #[serde(rename_all = "camelCase")]
    Ack {
        request_id: u64,
        result: RequestAck,
    },
    Event(ServerEvent),
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// WebSocket transport: JSON request envelopes out, acks correlated back by
/// request id, pushed events fanned out on a broadcast channel.
pub struct WsTransport {
    writer: Mutex<WsSink>,
    pending_acks: Mutex<HashMap<u64, oneshot::Sender<RequestAck>>>,
    next_request_id: AtomicU64,
    events: broadcast::Sender<ServerEvent>,
}

impl WsTransport {
    pub async fn connect(server_url: &str) -> Result<Arc<Self>> {
        let ws_url = ws_url_from_server_url(server_url)?;
        let (ws_stream, _) = connect_async(&ws_url)
            .await
            .with_context(|| format!("failed to connect websocket: {ws_url}"))?;
        let (writer, reader) = ws_stream.split();

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let transport = Arc::new(Self {
            writer: Mutex::new(writer),
            pending_acks: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
            events,
        });
        transport.spawn_reader(reader);
        Ok(transport)
    }

    /// Pushed server events; subscribe before issuing requests to avoid
    /// missing early pushes.
    pub fn subscribe_server_events(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    fn spawn_reader(self: &Arc<Self>, mut reader: WsSource) {
        let transport = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(message) = reader.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(ServerFrame::Ack { request_id, result }) => {
                            let sender =
                                transport.pending_acks.lock().await.remove(&request_id);
                            match sender {
                                Some(sender) => {
                                    let _ = sender.send(result);
                                }
                                None => {
                                    warn!(request_id, "transport: ack for unknown request");
                                }
                            }
                        }
                        Ok(ServerFrame::Event(event)) => {
                            let _ = transport.events.send(event);
                        }
                        Err(err) => {
                            warn!("transport: invalid server frame: {err}");
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!("transport: websocket receive failed: {err}");
                        break;
                    }
                }
            }

            // Dropping the senders wakes every in-flight request with a
            // closed-channel error.
            transport.pending_acks.lock().await.clear();
        });
    }

    async fn write_envelope(&self, envelope: &RequestEnvelope) -> Result<()> {
        let text = serde_json::to_string(envelope).context("failed to serialize request")?;
        self.writer
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .context("websocket send failed")?;
        Ok(())
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, request: ClientRequest) -> Result<()> {
        let envelope = RequestEnvelope {
            request_id: self.next_request_id.fetch_add(1, Ordering::Relaxed),
            request,
        };
        self.write_envelope(&envelope).await
    }

    async fn request(&self, request: ClientRequest) -> Result<RequestAck> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        self.pending_acks.lock().await.insert(request_id, sender);

        let envelope = RequestEnvelope {
            request_id,
            request,
        };
        if let Err(err) = self.write_envelope(&envelope).await {
            self.pending_acks.lock().await.remove(&request_id);
            return Err(err);
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, receiver).await {
            Ok(Ok(ack)) => Ok(ack),
            Ok(Err(_)) => Err(anyhow!("connection closed before the server acknowledged")),
            Err(_) => {
                self.pending_acks.lock().await.remove(&request_id);
                Err(anyhow!("timed out waiting for server acknowledgement"))
            }
        }
    }
}

fn ws_url_from_server_url(server_url: &str) -> Result<String> {
    if server_url.starts_with("ws://") || server_url.starts_with("wss://") {
        Ok(server_url.to_string())
    } else if server_url.starts_with("https://") {
        Ok(server_url.replacen("https://", "wss://", 1))
    } else if server_url.starts_with("http://") {
        Ok(server_url.replacen("http://", "ws://", 1))
    } else {
        Err(anyhow!(
            "server url must start with ws://, wss://, http:// or https://"
        ))
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
