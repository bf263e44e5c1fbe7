//! TCP connection management with line-delimited I/O.
//!
//! Stratum uses newline-delimited JSON over TCP. This module provides a
//! wrapper around tokio's TCP stream that handles buffered reading and
//! writing of complete messages. The [`Transport`] trait abstracts message
//! I/O, allowing channel-based mocks for deterministic testing.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use super::error::{StratumError, StratumResult};
use super::messages::{decode_message, Request, StratumMessage};

/// Message-level I/O for the Stratum protocol.
///
/// Abstracts reading and writing so the client can run over TCP
/// (production) or channels (tests).
#[async_trait]
pub trait Transport: Send {
    /// Read one complete message.
    ///
    /// Returns `None` on clean connection close (EOF). A malformed line
    /// yields [`StratumError::Protocol`]; the connection is still usable.
    async fn read_message(&mut self) -> StratumResult<Option<StratumMessage>>;

    /// Write one request frame.
    async fn write_request(&mut self, request: &Request) -> StratumResult<()>;
}

/// Buffered TCP connection to a pool.
pub struct Connection {
    /// Buffered reader for incoming messages
    reader: BufReader<OwnedReadHalf>,

    /// Buffered writer for outgoing requests
    writer: BufWriter<OwnedWriteHalf>,

    /// Line buffer for reading messages
    line_buf: String,
}

impl Connection {
    /// Create a new connection from a TCP stream.
    pub fn new(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();

        Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            line_buf: String::with_capacity(4096),
        }
    }

    /// Connect to a pool.
    pub async fn connect(host: &str, port: u16) -> StratumResult<Self> {
        debug!(host, port, "Connecting to pool");

        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| StratumError::ConnectionFailed(e.to_string()))?;

        debug!("Connected to pool");

        Ok(Self::new(stream))
    }
}

#[async_trait]
impl Transport for Connection {
    async fn read_message(&mut self) -> StratumResult<Option<StratumMessage>> {
        loop {
            self.line_buf.clear();

            let n = self
                .reader
                .read_line(&mut self.line_buf)
                .await
                .map_err(StratumError::Io)?;

            if n == 0 {
                // EOF, connection closed
                return Ok(None);
            }

            let line = self.line_buf.trim();
            if line.is_empty() {
                continue;
            }

            trace!(rx = %line, "Received message");

            let msg = decode_message(line).map_err(StratumError::Protocol)?;
            return Ok(Some(msg));
        }
    }

    async fn write_request(&mut self, request: &Request) -> StratumResult<()> {
        let bytes = request.encode()?;
        trace!(tx = %String::from_utf8_lossy(&bytes).trim_end(), "Sending message");

        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;

        Ok(())
    }
}

/// In-memory stand-in for a pool connection.
///
/// Messages travel over unbounded channels instead of a socket, letting
/// client tests script exact pool behavior with no timing races. The
/// paired [`MockTransportHandle`] plays the pool's role; dropping it
/// reads as the pool closing the socket.
#[cfg(test)]
pub(crate) struct MockTransport {
    from_pool: tokio::sync::mpsc::UnboundedReceiver<StratumMessage>,
    to_pool: tokio::sync::mpsc::UnboundedSender<Request>,
}

/// The scripted-pool end of a [`MockTransport`].
#[cfg(test)]
pub(crate) struct MockTransportHandle {
    to_client: tokio::sync::mpsc::UnboundedSender<StratumMessage>,
    from_client: tokio::sync::mpsc::UnboundedReceiver<Request>,
}

#[cfg(test)]
impl MockTransport {
    /// Build a linked transport/handle pair.
    pub fn pair() -> (Self, MockTransportHandle) {
        let (to_client, from_pool) = tokio::sync::mpsc::unbounded_channel();
        let (to_pool, from_client) = tokio::sync::mpsc::unbounded_channel();
        (
            MockTransport { from_pool, to_pool },
            MockTransportHandle {
                to_client,
                from_client,
            },
        )
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for MockTransport {
    async fn read_message(&mut self) -> StratumResult<Option<StratumMessage>> {
        // None (channel closed) maps onto clean EOF
        Ok(self.from_pool.recv().await)
    }

    async fn write_request(&mut self, request: &Request) -> StratumResult<()> {
        self.to_pool
            .send(request.clone())
            .map_err(|_| StratumError::Disconnected)
    }
}

#[cfg(test)]
impl MockTransportHandle {
    /// Script one pool message toward the client.
    pub fn send(&self, msg: StratumMessage) {
        self.to_client.send(msg).expect("client side dropped");
    }

    /// Next request the client wrote to the "pool".
    pub async fn recv(&mut self) -> Request {
        self.from_client.recv().await.expect("client side dropped")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_read_write() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Server: read one request, answer it, send a keepalive the codec
        // must reject without killing the connection, then a notification.
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut conn = Connection::new(socket);

            let request = conn.read_message().await.unwrap().unwrap();
            match request {
                StratumMessage::Notification { id, method, .. } => {
                    assert_eq!(id, Some(1));
                    assert_eq!(method, "mining.subscribe");
                }
                other => panic!("unexpected {other:?}"),
            }

            let mut raw = socket_writer(conn);
            raw.write_all(b"{\"id\":1,\"result\":true,\"error\":null}\n")
                .await
                .unwrap();
            raw.write_all(b"not json\n").await.unwrap();
            raw.write_all(b"{\"id\":null,\"method\":\"mining.set_target\",\"params\":[]}\n")
                .await
                .unwrap();
            raw.flush().await.unwrap();

            // Hold the socket open until the client is done reading
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut conn = Connection::new(stream);

        conn.write_request(&Request {
            id: 1,
            method: "mining.subscribe".to_string(),
            params: json!([]),
        })
        .await
        .unwrap();

        // Response comes through
        let msg = conn.read_message().await.unwrap().unwrap();
        assert!(matches!(msg, StratumMessage::Response { id: Some(1), .. }));

        // Garbage line surfaces as a protocol error, not a dead socket
        let err = conn.read_message().await.unwrap_err();
        assert!(matches!(err, StratumError::Protocol(_)));

        // And the next message still arrives
        let msg = conn.read_message().await.unwrap().unwrap();
        assert!(matches!(msg, StratumMessage::Notification { .. }));
    }

    /// Rebuild a write handle from a consumed test connection.
    fn socket_writer(conn: Connection) -> BufWriter<OwnedWriteHalf> {
        conn.writer
    }
}
