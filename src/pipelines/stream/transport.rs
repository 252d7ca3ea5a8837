// SPDX-License-Identifier: MPL-2.0

//! Message transports for the stream sink
//!
//! The frame thread never blocks on the network. [`TcpTransport`] hands
//! each message to a writer task through a bounded channel and drops the
//! message when the channel is full.

use crate::constants::stream::TRANSPORT_QUEUE_DEPTH;
use crate::errors::StreamError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Destination for framed stream messages
pub trait Transport: Send {
    /// Hand one complete message over; must not block
    fn send(&mut self, message: Vec<u8>) -> Result<(), StreamError>;

    /// Flush and stop accepting messages
    fn close(&mut self) {}
}

/// Collects messages in memory
#[derive(Debug, Default)]
pub struct VecTransport {
    messages: Vec<Vec<u8>>,
    reject: bool,
    closed: bool,
}

impl VecTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that refuses every message
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Default::default()
        }
    }

    pub fn messages(&self) -> &[Vec<u8>] {
        &self.messages
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Transport for VecTransport {
    fn send(&mut self, message: Vec<u8>) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        if self.reject {
            return Err(StreamError::Transport("message rejected".into()));
        }
        self.messages.push(message);
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// TCP transport backed by a tokio writer task
pub struct TcpTransport {
    tx: Option<mpsc::Sender<Vec<u8>>>,
    writer: Option<JoinHandle<()>>,
    failed: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl TcpTransport {
    /// Connect to `address` and start the writer task
    pub async fn connect(address: &str) -> Result<Self, StreamError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| StreamError::Transport(format!("Failed to connect to {}: {}", address, e)))?;
        stream.set_nodelay(true).ok();
        info!(address, "Stream transport connected");
        Ok(Self::spawn(stream))
    }

    /// Start a writer task for an already connected stream
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(stream: TcpStream) -> Self {
        let (tx, rx) = mpsc::channel(TRANSPORT_QUEUE_DEPTH);
        let failed = Arc::new(AtomicBool::new(false));
        let writer = tokio::spawn(write_loop(rx, BufWriter::new(stream), Arc::clone(&failed)));
        Self {
            tx: Some(tx),
            writer: Some(writer),
            failed,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Detach the writer task so a caller can await it after the transport
    /// has been handed to a session
    pub fn take_writer(&mut self) -> Option<JoinHandle<()>> {
        self.writer.take()
    }

    /// Messages dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Close the channel and wait until the writer has flushed
    pub async fn shutdown(mut self) {
        self.tx = None;
        if let Some(writer) = self.writer.take()
            && let Err(e) = writer.await
        {
            warn!(error = %e, "Stream writer task failed");
        }
    }
}

async fn write_loop(
    mut rx: mpsc::Receiver<Vec<u8>>,
    mut stream: BufWriter<TcpStream>,
    failed: Arc<AtomicBool>,
) {
    while let Some(message) = rx.recv().await {
        tracing::trace!(bytes = message.len(), "Writing stream message");
        let result = match stream.write_all(&message).await {
            Ok(()) => stream.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(error = %e, "Stream connection lost");
            failed.store(true, Ordering::Relaxed);
            return;
        }
    }

    if let Err(e) = stream.shutdown().await {
        debug!(error = %e, "Stream shutdown failed");
    }
    debug!("Stream writer finished");
}

impl Transport for TcpTransport {
    fn send(&mut self, message: Vec<u8>) -> Result<(), StreamError> {
        if self.failed.load(Ordering::Relaxed) {
            return Err(StreamError::Closed);
        }
        let Some(tx) = self.tx.as_ref() else {
            return Err(StreamError::Closed);
        };

        match tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(dropped, "Stream queue full, message dropped");
                Err(StreamError::Transport("send queue full".into()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(StreamError::Closed),
        }
    }

    fn close(&mut self) {
        // Writer drains what is queued, then exits
        self.tx = None;
    }
}
