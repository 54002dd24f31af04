use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock as SyncRwLock};
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{RwLock, mpsc, oneshot};

use super::{DocumentStore, Revision, SlotRow, StoreError, Versioned};
use crate::dayplan::index_rows;
use crate::model::AuctionRef;
use crate::observability;
use crate::wal::{JournalEntry, Wal};

#[derive(Debug, Default)]
struct Document {
    rev: Revision,
    body: Option<Value>,
}

type SharedDocument = Arc<RwLock<Document>>;

// ── Group-commit journal channel ─────────────────────────

enum JournalCommand {
    Append {
        entry: JournalEntry,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        entries: Vec<JournalEntry>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Batch = Vec<oneshot::Sender<io::Result<()>>>;

/// Owns the journal file. Appends that queue up while a flush is running
/// are written together and share one fsync.
async fn journal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let JournalCommand::Append { entry, response } = cmd else {
            handle_control(&mut wal, cmd);
            continue;
        };

        let mut batch: Batch = Vec::new();
        let mut buffered = wal.append_buffered(&entry);
        batch.push(response);
        let mut deferred = None;

        while buffered.is_ok() {
            match rx.try_recv() {
                Ok(JournalCommand::Append { entry, response }) => {
                    buffered = wal.append_buffered(&entry);
                    batch.push(response);
                }
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(observability::JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = Instant::now();
        // flush even after a failed append so the bytes don't leak into the next batch
        let flushed = wal.flush_sync();
        metrics::histogram!(observability::JOURNAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());

        let result = buffered.and(flushed);
        for tx in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn handle_control(wal: &mut Wal, cmd: JournalCommand) {
    match cmd {
        JournalCommand::Compact { entries, response } => {
            let _ = response.send(wal.compact(&entries));
        }
        JournalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        JournalCommand::Append { entry, response } => {
            let result = wal.append_buffered(&entry).and_then(|()| wal.flush_sync());
            let _ = response.send(result);
        }
    }
}

/// Process-local document store.
///
/// Every document sits behind its own lock, so writes to different day
/// plans never wait on each other. With a journal attached, a write is
/// acknowledged only after its entry is fsynced.
pub struct InMemoryStore {
    docs: DashMap<String, SharedDocument>,
    /// occupant (`tender` or `tender_lot`) → slots it holds. Ordered so a
    /// tender's lots sit in one `tender_` range.
    slots: SyncRwLock<BTreeMap<String, BTreeSet<SlotRow>>>,
    journal: Option<mpsc::Sender<JournalCommand>>,
    /// Writers hold it shared; compaction takes it exclusively so no append
    /// can slip between the snapshot and the file swap.
    journal_gate: RwLock<()>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// A store without persistence.
    pub fn new() -> Self {
        Self {
            docs: DashMap::new(),
            slots: SyncRwLock::new(BTreeMap::new()),
            journal: None,
            journal_gate: RwLock::new(()),
        }
    }

    /// Replay the journal at `path` and keep appending to it.
    /// Must be called inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let entries = Wal::replay(path)?;
        let replayed = entries.len();

        let mut latest: HashMap<String, (Revision, Value)> = HashMap::new();
        for entry in entries {
            let JournalEntry::DocumentWritten { id, rev, body } = entry;
            let value: Value = serde_json::from_str(&body)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{id}: {e}")))?;
            latest.insert(id, (rev, value));
        }

        let mut store = Self::new();
        for (id, (rev, value)) in latest {
            store.reindex(&id, None, Some(&value));
            let doc = Document {
                rev,
                body: Some(value),
            };
            store.docs.insert(id, Arc::new(RwLock::new(doc)));
        }

        let wal = Wal::open(path)?;
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(wal, rx));
        store.journal = Some(tx);

        tracing::info!(
            "opened store at {}: {replayed} journal entries, {} documents",
            path.display(),
            store.docs.len()
        );
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    async fn journal_append(&self, entry: JournalEntry) -> Result<(), StoreError> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        journal
            .send(JournalCommand::Append {
                entry,
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Journal("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Journal("journal writer dropped response".into()))?
            .map_err(|e| StoreError::Journal(e.to_string()))
    }

    /// Swap the slot rows derived from `old` for those derived from `new`.
    /// Occupants left without slots are dropped from the index.
    fn reindex(&self, id: &str, old: Option<&Value>, new: Option<&Value>) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        for row in old.map(|v| index_rows(id, v)).unwrap_or_default() {
            let occupant = row.auction.composite();
            if let Some(rows) = slots.get_mut(&occupant) {
                rows.remove(&row);
                if rows.is_empty() {
                    slots.remove(&occupant);
                }
            }
        }
        for row in new.map(|v| index_rows(id, v)).unwrap_or_default() {
            slots.entry(row.auction.composite()).or_default().insert(row);
        }
    }

    #[cfg(test)]
    fn indexed_occupants(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Journal entries written since the last compaction. Always 0 without a journal.
    pub async fn appends_since_compact(&self) -> u64 {
        let Some(journal) = &self.journal else {
            return 0;
        };
        let (tx, rx) = oneshot::channel();
        if journal
            .send(JournalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Rewrite the journal as one entry per live document.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        let _gate = self.journal_gate.write().await;

        let docs: Vec<(String, SharedDocument)> = self
            .docs
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let mut entries = Vec::with_capacity(docs.len());
        for (id, doc) in docs {
            let guard = doc.read().await;
            if let Some(body) = &guard.body {
                entries.push(JournalEntry::DocumentWritten {
                    id,
                    rev: guard.rev,
                    body: body.to_string(),
                });
            }
        }
        let kept = entries.len();

        let (tx, rx) = oneshot::channel();
        journal
            .send(JournalCommand::Compact {
                entries,
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Journal("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Journal("journal writer dropped response".into()))?
            .map_err(|e| StoreError::Journal(e.to_string()))?;

        tracing::info!("compacted journal to {kept} documents");
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Versioned<Value>>, StoreError> {
        let Some(doc) = self.docs.get(id).map(|e| e.value().clone()) else {
            return Ok(None);
        };
        let guard = doc.read().await;
        Ok(guard.body.as_ref().map(|body| Versioned {
            rev: guard.rev,
            value: body.clone(),
        }))
    }

    async fn put(&self, id: &str, value: Value, expected: Option<Revision>) -> Result<Revision, StoreError> {
        let _gate = self.journal_gate.read().await;
        let doc = self.docs.entry(id.to_string()).or_default().value().clone();
        let mut guard = doc.write().await;

        let actual = guard.body.as_ref().map(|_| guard.rev);
        if actual != expected {
            metrics::counter!(observability::STORE_CONFLICTS_TOTAL).increment(1);
            return Err(StoreError::Conflict {
                id: id.to_string(),
                expected,
                actual,
            });
        }

        let rev = guard.rev + 1;
        self.journal_append(JournalEntry::DocumentWritten {
            id: id.to_string(),
            rev,
            body: value.to_string(),
        })
        .await?;

        self.reindex(id, guard.body.as_ref(), Some(&value));
        guard.rev = rev;
        guard.body = Some(value);
        Ok(rev)
    }

    async fn plan_slots(&self, tender_id: &str) -> Result<Vec<SlotRow>, StoreError> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        let owned_by = |auction: AuctionRef, rows: &BTreeSet<SlotRow>| {
            rows.iter()
                .map(|row| SlotRow {
                    auction: auction.clone(),
                    ..row.clone()
                })
                .collect::<Vec<_>>()
        };

        let mut found = slots
            .get(tender_id)
            .map(|rows| owned_by(AuctionRef::tender(tender_id), rows))
            .unwrap_or_default();
        let prefix = format!("{tender_id}_");
        for (occupant, rows) in slots
            .range(prefix.clone()..)
            .take_while(|(occupant, _)| occupant.starts_with(&prefix))
        {
            let lot = AuctionRef::lot(tender_id, &occupant[prefix.len()..]);
            found.extend(owned_by(lot, rows));
        }
        Ok(found)
    }
}
