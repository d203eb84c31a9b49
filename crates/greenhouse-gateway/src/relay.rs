//! Byte conduit between the advice producer task and the HTTP response body.
//!
//! Exactly one [`ConduitWriter`] and one [`ConduitReader`] exist per conduit
//! and neither is `Clone`, so the single-writer/single-reader discipline is
//! enforced by ownership. The channel is bounded: once `capacity` frames are
//! queued, writes wait for the reader. Dropping the reader (the client went
//! away) makes every pending and future write fail, which is how the producer
//! learns to stop. A writer dropped without `close` or `close_with_error`
//! (the producer task panicked or was aborted) is reported to the reader as
//! an error, never as a clean end of stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use greenhouse_advisor::AdviceSink;
use greenhouse_common::{Error, Result};
use tokio::sync::mpsc;

enum Frame {
    Data(Bytes),
    Failed(Error),
}

/// Create a conduit holding at most `capacity` frames of at most
/// `max_frame` bytes each.
pub fn conduit(capacity: usize, max_frame: usize) -> (ConduitWriter, ConduitReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let finished = Arc::new(AtomicBool::new(false));
    (
        ConduitWriter {
            tx,
            max_frame: max_frame.max(1),
            finished: Arc::clone(&finished),
        },
        ConduitReader {
            rx,
            pending: Bytes::new(),
            finished,
        },
    )
}

pub struct ConduitWriter {
    tx: mpsc::Sender<Frame>,
    max_frame: usize,
    finished: Arc<AtomicBool>,
}

impl ConduitWriter {
    /// Queue `data`, waiting while the conduit is full.
    pub async fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        for piece in data.chunks(self.max_frame) {
            self.tx
                .send(Frame::Data(Bytes::copy_from_slice(piece)))
                .await
                .map_err(|_| Error::ClientDisconnected)?;
        }
        Ok(())
    }

    /// Clean end of input; the reader sees end-of-stream after draining.
    pub fn close(self) {
        self.finished.store(true, Ordering::Release);
    }

    /// End of input with a failure the reader will surface after draining
    /// what was already written.
    pub async fn close_with_error(self, err: Error) {
        // A gone reader has nobody to report to.
        let _ = self.tx.send(Frame::Failed(err)).await;
        self.finished.store(true, Ordering::Release);
    }
}

#[async_trait]
impl AdviceSink for ConduitWriter {
    async fn write(&mut self, fragment: &str) -> Result<()> {
        self.write_bytes(fragment.as_bytes()).await
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}

pub struct ConduitReader {
    rx: mpsc::Receiver<Frame>,
    pending: Bytes,
    finished: Arc<AtomicBool>,
}

impl ConduitReader {
    /// Next chunk of at most `max` bytes.
    ///
    /// Returns `Ok(None)` on clean close and the writer's error on
    /// close-with-error. A writer that was dropped unclosed yields
    /// [`Error::Internal`]. A chunk never spans two writes.
    pub async fn read_chunk(&mut self, max: usize) -> Result<Option<Bytes>> {
        if self.pending.is_empty() {
            match self.rx.recv().await {
                Some(Frame::Data(bytes)) => self.pending = bytes,
                Some(Frame::Failed(err)) => {
                    self.rx.close();
                    return Err(err);
                }
                None if self.finished.load(Ordering::Acquire) => return Ok(None),
                None => {
                    // Report the abandoned stream once; later reads see a plain end.
                    self.finished.store(true, Ordering::Relaxed);
                    return Err(Error::Internal(
                        "advice producer ended without closing the stream".into(),
                    ));
                }
            }
        }
        let n = max.max(1).min(self.pending.len());
        Ok(Some(self.pending.split_to(n)))
    }
}

/// Consumer loop as a body stream: one item per chunk read, each of which
/// the HTTP layer writes and flushes on its own. A writer error ends the
/// stream with that error.
pub fn into_body_stream(
    reader: ConduitReader,
    chunk_size: usize,
) -> impl Stream<Item = Result<Bytes>> + Send + 'static {
    futures::stream::unfold(Some(reader), move |state| async move {
        let mut reader = state?;
        match reader.read_chunk(chunk_size).await {
            Ok(Some(bytes)) => Some((Ok(bytes), Some(reader))),
            Ok(None) => None,
            Err(err) => Some((Err(err), None)),
        }
    })
}
