//! TCP transport carrying newline-delimited records.
//!
//! The transport passes through three states: disconnected (no value
//! exists), connected, and closed. [`Transport::connect`] splits the stream:
//! the buffered read half goes to the receive loop as a [`LineReader`], the
//! write half stays inside the [`Transport`] behind an async mutex so that
//! concurrent callers serialize their writes. `close` is idempotent and safe
//! to call from either the caller side or the receive loop.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::{ClientError, Result};

/// The write side and lifecycle state of one connection.
pub struct Transport {
    writer: Mutex<Option<OwnedWriteHalf>>,
    peer_addr: SocketAddr,
    closed: AtomicBool,
}

/// The buffered read side of a connection, owned by the receive loop.
pub struct LineReader {
    inner: BufReader<OwnedReadHalf>,
}

impl Transport {
    /// Establishes a TCP connection to the server.
    ///
    /// Returns the transport (write side) and the line reader (read side).
    pub async fn connect(host: &str, port: u16) -> Result<(Arc<Self>, LineReader)> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| ClientError::Connect(format!("{host}:{port}: {e}")))?;
        let peer_addr = stream
            .peer_addr()
            .map_err(|e| ClientError::Connect(e.to_string()))?;

        debug!(peer = %peer_addr, "transport connected");

        let (read_half, write_half) = stream.into_split();
        let transport = Arc::new(Self {
            writer: Mutex::new(Some(write_half)),
            peer_addr,
            closed: AtomicBool::new(false),
        });
        let reader = LineReader {
            inner: BufReader::new(read_half),
        };

        Ok((transport, reader))
    }

    /// Writes one record followed by a newline and flushes.
    pub async fn send_line(&self, line: &str) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| ClientError::ConnectionLost("transport is closed".to_string()))?;

        trace!(bytes = line.len(), "sending record");
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ClientError::ConnectionLost(e.to_string()))?;
        writer
            .write_all(b"\n")
            .await
            .map_err(|e| ClientError::ConnectionLost(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| ClientError::ConnectionLost(e.to_string()))?;
        Ok(())
    }

    /// Releases the write side of the connection. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut guard = self.writer.lock().await;
        if let Some(mut writer) = guard.take() {
            let _ = writer.shutdown().await;
        }
        debug!(peer = %self.peer_addr, "transport closed");
    }

    /// Returns true once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns the address of the connected peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl LineReader {
    /// Reads one record, blocking the task until a full line is available.
    ///
    /// Returns `Ok(None)` on end of stream. The trailing newline is stripped.
    pub async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        let mut line = String::new();
        let bytes_read = self.inner.read_line(&mut line).await?;
        if bytes_read == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }
}
