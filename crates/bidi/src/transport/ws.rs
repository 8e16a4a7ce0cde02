//! WebSocket wiring for a Connection
//!
//! One writer task draining the outbound channel, one reader task feeding
//! decoded frames back into the connection. All correlation state lives in
//! `Connection`; this module only moves bytes.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::connection::{Connection, ConnectionConfig, Outbound};
use crate::error::Result;

/// Connect to a Bidi websocket endpoint and spawn the socket tasks
pub async fn connect(ws_url: &str, config: ConnectionConfig) -> Result<Arc<Connection>> {
    let (ws_stream, _) = connect_async(ws_url).await?;
    let (mut sink, mut stream) = ws_stream.split();

    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Outbound>();
    let conn = Connection::new(outgoing_tx, config);

    // Writer task
    tokio::spawn(async move {
        while let Some(outbound) = outgoing_rx.recv().await {
            match outbound {
                Outbound::Text(text) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        tracing::error!("[Connection] Write failed: {}", e);
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sink.close().await;
                    break;
                }
            }
        }
    });

    // Reader task
    let reader = conn.clone();
    tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => reader.handle_frame(&text),
                Ok(Message::Close(_)) => {
                    tracing::info!("[Connection] WebSocket closed by remote");
                    break;
                }
                Err(e) => {
                    tracing::error!("[Connection] WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
        reader.handle_close();
    });

    Ok(conn)
}
