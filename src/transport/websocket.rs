//! WebSocket connector
//!
//! Envelopes travel as text frames. Binary frames are ignored; ping/pong
//! is answered by tungstenite itself.

use super::{Connection, Connector, FrameReader, FrameWriter};
use crate::error::{BusError, Result};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials `ws://` (and, with the `tls` feature, `wss://`) endpoints
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn dial(&self, endpoint: &Url) -> Result<Connection> {
        let (stream, response) = connect_async(endpoint.as_str())
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        debug!(endpoint = %endpoint, status = %response.status(), "WebSocket handshake complete");

        let (sink, stream) = stream.split();
        Ok(Connection::new(WsReader { stream }, WsWriter { sink }))
    }
}

struct WsReader {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl FrameReader for WsReader {
    async fn read_frame(&mut self) -> Result<Option<String>> {
        while let Some(message) = self.stream.next().await {
            match message.map_err(|e| BusError::Transport(e.to_string()))? {
                WsMessage::Text(text) => return Ok(Some(text)),
                WsMessage::Binary(data) => {
                    debug!(len = data.len(), "Ignoring binary frame");
                }
                WsMessage::Close(frame) => {
                    debug!(?frame, "Close frame received");
                    return Ok(None);
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
            }
        }
        Ok(None)
    }
}

struct WsWriter {
    sink: SplitSink<WsStream, WsMessage>,
}

#[async_trait]
impl FrameWriter for WsWriter {
    async fn write_frame(&mut self, frame: String) -> Result<()> {
        self.sink
            .send(WsMessage::Text(frame))
            .await
            .map_err(|e| BusError::Transport(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.sink
            .close()
            .await
            .map_err(|e| BusError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_tungstenite::accept_async;

    async fn listen() -> (TcpListener, Url) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, Url::parse(&format!("ws://{}/", addr)).unwrap())
    }

    #[tokio::test]
    async fn test_text_frames_binary_skipped_close_ends() {
        let (listener, endpoint) = listen().await;
        let (written_tx, written_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            ws.send(WsMessage::Binary(vec![1, 2, 3])).await.unwrap();
            ws.send(WsMessage::Text("hello".to_string())).await.unwrap();

            while let Some(Ok(message)) = ws.next().await {
                if let WsMessage::Text(text) = message {
                    let _ = written_tx.send(text);
                    break;
                }
            }

            ws.send(WsMessage::Close(None)).await.unwrap();
            while ws.next().await.is_some() {}
        });

        let mut connection = WebSocketConnector.dial(&endpoint).await.unwrap();

        assert_eq!(connection.reader.read_frame().await.unwrap(), Some("hello".to_string()));

        connection.writer.write_frame("from client".into()).await.unwrap();
        assert_eq!(written_rx.await.unwrap(), "from client");

        assert_eq!(connection.reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dropped_stream_ends_reading() {
        let (listener, endpoint) = listen().await;

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            // Gone without a close handshake
            drop(ws);
        });

        let mut connection = WebSocketConnector.dial(&endpoint).await.unwrap();
        let result = connection.reader.read_frame().await;
        assert!(
            matches!(result, Ok(None) | Err(BusError::Transport(_))),
            "unexpected read result: {:?}",
            result
        );
    }

    #[tokio::test]
    async fn test_dial_refused() {
        // Bind then drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let endpoint = Url::parse(&format!("ws://{}/", addr)).unwrap();
        let result = WebSocketConnector.dial(&endpoint).await;
        assert!(matches!(result, Err(BusError::Connection(_))));
    }
}
