//! WebSocket client side of the agent transport.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

use super::frame_link::FrameLink;
use crate::domain::models::{ClientFrame, ServerFrame};
use crate::domain::ports::LinkError;

/// Agent link over a broker WebSocket.
pub type WsBrokerClient = FrameLink;

/// Endpoint an agent connects to: `{base}/ws/agent/{agent}`.
///
/// `http` and `https` bases are mapped to `ws` and `wss`.
pub fn agent_endpoint(broker_url: &str, agent: &str) -> String {
    let base = broker_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else {
        base.to_string()
    };
    format!("{base}/ws/agent/{agent}")
}

/// Open a WebSocket to the broker and complete the handshake for `agent`.
pub async fn connect_ws(broker_url: &str, agent: &str) -> Result<WsBrokerClient, LinkError> {
    let endpoint = agent_endpoint(broker_url, agent);
    let (socket, _response) = connect_async(endpoint.as_str())
        .await
        .map_err(|err| LinkError::Connect(format!("{endpoint}: {err}")))?;
    debug!(agent, endpoint = %endpoint, "websocket connected");

    let (mut sink, mut stream) = socket.split();
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<ClientFrame>();
    let (server_tx, server_rx) = mpsc::unbounded_channel::<ServerFrame>();

    tokio::spawn(async move {
        while let Some(frame) = client_rx.recv().await {
            let closing = matches!(frame, ClientFrame::Disconnect);
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(err) => {
                    warn!(error = %err, "failed to encode client frame");
                    continue;
                }
            };
            if sink.send(WsMessage::text(text)).await.is_err() || closing {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader_agent = agent.to_string();
    tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            let text = match message {
                Ok(WsMessage::Text(text)) => text,
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => continue,
                Err(err) => {
                    debug!(agent = %reader_agent, error = %err, "websocket read failed");
                    break;
                }
            };
            match serde_json::from_str::<ServerFrame>(text.as_str()) {
                Ok(frame) => {
                    if server_tx.send(frame).is_err() {
                        break;
                    }
                }
                Err(err) => warn!(agent = %reader_agent, error = %err, "undecodable broker frame"),
            }
        }
    });

    FrameLink::establish(agent, client_tx, server_rx).await
}
