//! Dedicated writer task for one socket.
//!
//! Senders never touch the socket directly. Each framed request goes through
//! an mpsc channel to a task that owns the write half, batches whatever is
//! queued into one vectored write and acknowledges every frame with the
//! outcome of that write.
//!
//! ```text
//! send 1 ─┐
//! send 2 ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► TCP write half
//! retx   ─┘        ▲                              │
//!                  └───── oneshot ack ◄───────────┘
//! ```
//!
//! After the first failed write the task acknowledges the failing batch with
//! the error and exits. Frames still queued are dropped, so their senders see
//! [`DoozerError::ConnectionClosed`].

use std::io::{self, IoSlice};

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{DoozerError, Result};

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A framed packet waiting to be written.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Length prefix and body.
    pub packet: Bytes,
    /// Told whether the write went through.
    ack: oneshot::Sender<Result<()>>,
}

/// Handle for queueing frames on the writer task.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
}

impl WriterHandle {
    /// Queue a packet and wait until it has been written and flushed.
    pub async fn send(&self, packet: Bytes) -> Result<()> {
        let (ack, written) = oneshot::channel();
        self.tx
            .send(OutboundFrame { packet, ack })
            .await
            .map_err(|_| DoozerError::ConnectionClosed)?;
        written.await.map_err(|_| DoozerError::ConnectionClosed)?
    }

    /// Check if the writer task has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task ends when every handle is dropped or a write fails.
pub fn spawn_writer_task<W>(writer: W, capacity: usize) -> (WriterHandle, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity);
    let task = tokio::spawn(writer_loop(rx, writer));
    (WriterHandle { tx }, task)
}

async fn writer_loop<W>(mut rx: mpsc::Receiver<OutboundFrame>, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(first) = rx.recv().await {
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        trace!(frames = batch.len(), "Writing batch");
        match write_batch(&mut writer, &batch).await {
            Ok(()) => {
                for frame in batch {
                    let _ = frame.ack.send(Ok(()));
                }
            }
            Err(e) => {
                debug!(error = %e, "Write failed, stopping writer");
                for frame in batch {
                    let _ = frame.ack.send(Err(DoozerError::Io(io::Error::new(e.kind(), e.to_string()))));
                }
                return;
            }
        }
    }
}

/// Write a batch of frames using scatter/gather I/O, then flush.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(|f| f.packet.len()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "write_vectored returned 0"));
        }
        total_written += written;
    }

    writer.flush().await
}

/// Build IoSlice array for remaining data after a partial write.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut offset = 0;

    for frame in batch {
        let end = offset + frame.packet.len();
        if skip_bytes < end {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&frame.packet[start..]));
        }
        offset = end;
    }

    slices
}
