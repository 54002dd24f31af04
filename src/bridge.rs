//! Feed item → planned dates → upstream patch → slot reconciliation.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono_tz::Tz;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::engine::{Planner, ReconcileReport};
use crate::model::{Tender, TenderPatch};
use crate::observability;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("upstream rejected patch for {tender_id}: status {status}")]
    Rejected { tender_id: String, status: u16 },
    #[error("sink i/o: {0}")]
    Io(#[from] io::Error),
    #[error("encoding patch: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One line read from the tender feed.
#[derive(Debug, PartialEq, Eq)]
pub enum FeedLine {
    Line(String),
    /// Longer than the limit; holds the discarded length in bytes.
    Oversized(usize),
}

/// Newline-delimited reader that never buffers more than `max_len` bytes
/// of a line. Bytes past the limit are consumed and dropped. Not cancel
/// safe: a line interrupted mid-read is lost.
pub struct FeedReader<R> {
    reader: R,
    max_len: usize,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> FeedReader<R> {
    pub fn new(reader: R, max_len: usize) -> Self {
        Self {
            reader,
            max_len,
            buf: Vec::new(),
        }
    }

    /// Next line without its `\n` (or `\r\n`); `None` at end of input.
    pub async fn next_line(&mut self) -> io::Result<Option<FeedLine>> {
        self.buf.clear();
        let mut total = 0usize;
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                if total == 0 {
                    return Ok(None);
                }
                break;
            }
            let newline = available.iter().position(|&b| b == b'\n');
            let chunk = &available[..newline.unwrap_or(available.len())];
            total += chunk.len();
            if total <= self.max_len {
                self.buf.extend_from_slice(chunk);
            }
            let used = chunk.len() + usize::from(newline.is_some());
            self.reader.consume(used);
            if newline.is_some() {
                break;
            }
        }

        if total > self.max_len {
            self.buf.clear();
            return Ok(Some(FeedLine::Oversized(total)));
        }
        if self.buf.last() == Some(&b'\r') {
            self.buf.pop();
        }
        Ok(Some(FeedLine::Line(String::from_utf8_lossy(&self.buf).into_owned())))
    }
}

/// Where planned dates are written back to.
#[async_trait]
pub trait TenderSink: Send + Sync {
    async fn patch(&self, tender_id: &str, patch: &TenderPatch) -> Result<(), SinkError>;
}

#[derive(Serialize)]
struct PatchLine<'a> {
    id: &'a str,
    data: &'a TenderPatch,
}

/// Writes one `{"id": .., "data": <patch>}` JSON line per patch.
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W> TenderSink for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn patch(&self, tender_id: &str, patch: &TenderPatch) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(&PatchLine {
            id: tender_id,
            data: patch,
        })?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    pub patch: Option<TenderPatch>,
    /// The sink accepted the patch.
    pub delivered: bool,
    pub reconcile: ReconcileReport,
}

pub struct Bridge {
    planner: Arc<Planner>,
    sink: Arc<dyn TenderSink>,
}

impl Bridge {
    pub fn new(planner: Arc<Planner>, sink: Arc<dyn TenderSink>) -> Self {
        Self { planner, sink }
    }

    /// Plan the tender, hand the patch to the sink, then free the slots the
    /// tender no longer uses.
    ///
    /// Reconciliation sees the tender with the new dates applied, whether or
    /// not the sink accepted them: the store keeps the slot either way.
    pub async fn process(&self, tender: &Tender, now: DateTime<Tz>) -> ProcessOutcome {
        metrics::counter!(observability::TENDERS_PROCESSED_TOTAL).increment(1);

        let patch = match self.planner.plan_tender(tender, now).await {
            Ok(patch) => patch,
            Err(e) => {
                tracing::error!(tender_id = %tender.id, "planning failed: {e}");
                None
            }
        };

        let mut current = tender.clone();
        let mut delivered = false;
        if let Some(patch) = &patch {
            match self.sink.patch(&tender.id, patch).await {
                Ok(()) => {
                    delivered = true;
                    tracing::info!(tender_id = %tender.id, "successfully updated auction");
                }
                Err(e) => {
                    metrics::counter!(observability::PATCH_FAILURES_TOTAL).increment(1);
                    tracing::error!(
                        message_id = "error_patch_auction",
                        tender_id = %tender.id,
                        "error on updating auction: {e}"
                    );
                }
            }
            patch.apply_to(&mut current);
        }

        let reconcile = match self.planner.reconcile(&current).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(tender_id = %tender.id, "reconcile failed: {e}");
                ReconcileReport::default()
            }
        };

        ProcessOutcome {
            patch,
            delivered,
            reconcile,
        }
    }
}
