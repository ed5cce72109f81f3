use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use tandem_sync::{ApiError, PushSink};
use tandem_types::{ChatEvent, ClientCommand};

use crate::config::ClientConfig;
use crate::error::ClientError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Pongs we may miss in a row before the connection is considered dead.
const MAX_MISSED_PONGS: u8 = 2;

/// Push channel over a WebSocket. Commands are queued and written by a
/// background task that also forwards inbound events and keeps the socket
/// alive with pings.
#[derive(Clone)]
pub struct Gateway {
    commands: mpsc::UnboundedSender<ClientCommand>,
}

impl Gateway {
    /// Connect and authenticate. The returned receiver yields every event
    /// the server pushes until the connection drops.
    pub async fn connect(config: &ClientConfig) -> Result<(Self, mpsc::UnboundedReceiver<ChatEvent>), ClientError> {
        let url = config.gateway_url()?;
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        info!("Connected to gateway at {}", url);

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();

        // Identify goes out before anything the caller queues.
        let _ = commands.send(ClientCommand::Identify {
            token: config.token.clone(),
        });

        tokio::spawn(run_connection(
            socket,
            commands_rx,
            events_tx,
            config.heartbeat_interval,
        ));

        Ok((Self { commands }, events))
    }

    pub fn is_connected(&self) -> bool {
        !self.commands.is_closed()
    }
}

impl PushSink for Gateway {
    fn send_command(&self, cmd: ClientCommand) -> Result<(), ApiError> {
        self.commands
            .send(cmd)
            .map_err(|_| ApiError::Transport("gateway connection closed".into()))
    }
}

async fn run_connection(
    socket: Socket,
    mut commands: mpsc::UnboundedReceiver<ClientCommand>,
    events: mpsc::UnboundedSender<ChatEvent>,
    heartbeat_interval: Duration,
) {
    let (mut sink, mut stream) = socket.split();

    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.tick().await;
    let mut pong_received = true;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                let Some(cmd) = cmd else {
                    // Every handle dropped: leave cleanly.
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                let text = match encode_command(&cmd) {
                    Some(text) => text,
                    None => continue,
                };
                trace!("-> {}", text);
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = decode_event(&text) {
                        trace!("<- {}", event.kind());
                        if events.send(event).is_err() {
                            debug!("Event receiver dropped, closing gateway");
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                    }
                }
                Some(Ok(Message::Pong(_))) => pong_received = true,
                Some(Ok(Message::Close(frame))) => {
                    info!("Gateway closed by server: {:?}", frame);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Gateway read error: {}", e);
                    break;
                }
                None => break,
            },
            _ = heartbeat.tick() => {
                if pong_received {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= MAX_MISSED_PONGS {
                        warn!("Heartbeat timeout (missed {} pongs), dropping gateway connection", missed_heartbeats);
                        break;
                    }
                }
                pong_received = false;
                trace!("Gateway ping");
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    info!("Gateway connection closed");
}

fn encode_command(cmd: &ClientCommand) -> Option<String> {
    match serde_json::to_string(cmd) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("Failed to encode gateway command: {}", e);
            None
        }
    }
}

/// Parse a text frame. Malformed or unknown frames are logged and skipped.
fn decode_event(text: &str) -> Option<ChatEvent> {
    match serde_json::from_str(text) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Ignoring malformed gateway frame: {}", e);
            None
        }
    }
}
