use std::time::Duration;

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use flowdeck_core::config::{AppConfig, BackendConfig, StreamConfig};
use flowdeck_core::error::{FlowdeckError, Result};
use flowdeck_core::traits::{event_channel, ChannelFeed, EventChannel, EventSource};
use flowdeck_core::types::ExecutionEvent;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens `<ws_base>/workflows/{id}/ws` and turns its text frames into
/// `ExecutionEvent`s.
pub struct WsEventSource {
    ws_base: String,
    ping_interval: Option<Duration>,
    buffer: usize,
}

impl WsEventSource {
    pub fn new(backend: &BackendConfig, stream: &StreamConfig) -> Self {
        Self {
            ws_base: backend.ws_base(),
            ping_interval: match stream.ping_interval_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            buffer: stream.buffer,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.backend, &config.stream)
    }

    pub fn url_for(&self, workflow_id: &str) -> String {
        format!(
            "{}/workflows/{}/ws",
            self.ws_base,
            urlencoding::encode(workflow_id)
        )
    }
}

impl EventSource for WsEventSource {
    fn connect(&self, workflow_id: &str) -> BoxFuture<'_, Result<EventChannel>> {
        let url = self.url_for(workflow_id);
        let workflow_id = workflow_id.to_string();
        Box::pin(async move {
            let (socket, _) = tokio_tungstenite::connect_async(&url)
                .await
                .map_err(|e| FlowdeckError::Stream(format!("Failed to connect to {}: {}", url, e)))?;
            info!(workflow_id = %workflow_id, "Execution event channel connected");

            let (feed, channel) = event_channel(self.buffer);
            tokio::spawn(pump(socket, feed, self.ping_interval, workflow_id));
            Ok(channel)
        })
    }
}

/// Forward frames until the server hangs up, the transport fails, or the
/// consumer closes the channel.
async fn pump(socket: Socket, feed: ChannelFeed, ping_every: Option<Duration>, workflow_id: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut ticker = ping_every.map(|every| {
        let mut interval = tokio::time::interval_at(Instant::now() + every, every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            _ = feed.cancel.cancelled() => {
                let _ = ws_tx.send(WsMessage::Close(None)).await;
                debug!(workflow_id = %workflow_id, "Execution event channel closed by editor");
                return;
            }
            _ = next_tick(&mut ticker) => {
                let ping = serde_json::json!({"type": "ping"}).to_string();
                if let Err(e) = ws_tx.send(WsMessage::Text(ping.into())).await {
                    warn!(workflow_id = %workflow_id, error = %e, "Failed to send ping");
                    let _ = feed.tx.send(Err(FlowdeckError::Stream(e.to_string()))).await;
                    return;
                }
            }
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!(workflow_id = %workflow_id, error = %e, "Execution event channel error");
                        let _ = feed.tx.send(Err(FlowdeckError::Stream(e.to_string()))).await;
                        return;
                    }
                    None => {
                        debug!(workflow_id = %workflow_id, "Execution event channel ended");
                        return;
                    }
                };

                let text = match msg {
                    WsMessage::Text(t) => t.to_string(),
                    WsMessage::Ping(data) => {
                        let _ = ws_tx.send(WsMessage::Pong(data)).await;
                        continue;
                    }
                    WsMessage::Close(_) => {
                        debug!(workflow_id = %workflow_id, "Execution event channel close frame");
                        return;
                    }
                    _ => continue,
                };

                let Some(event) = parse_frame(&text) else {
                    continue;
                };
                if feed.tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Decode one text frame. Replies to our pings and undecodable frames
/// yield `None`.
fn parse_frame(text: &str) -> Option<ExecutionEvent> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "Invalid JSON on execution event channel");
            return None;
        }
    };
    if value["type"].as_str() == Some("pong") {
        return None;
    }
    match serde_json::from_value(value) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!(error = %e, "Frame is not an execution event");
            None
        }
    }
}
