//! Document store seam: string-keyed JSON documents with revision-checked
//! writes, plus the slot index the releaser queries.

mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde_json::Value;

use crate::model::{AuctionFamily, AuctionRef};

/// Per-document generation counter. The first write produces revision 1.
pub type Revision = u64;

#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub rev: Revision,
    pub value: T,
}

/// One recorded occupancy, as found by [`DocumentStore::plan_slots`].
/// Ordered by auction, then date.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SlotRow {
    pub auction: AuctionRef,
    pub date: NaiveDate,
    /// Slot start for classic rows; flat rows occupy the whole day.
    pub time: Option<NaiveTime>,
    pub family: AuctionFamily,
    pub lane: Option<u32>,
    pub plan_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("revision conflict on {id}: expected {expected:?}, found {actual:?}")]
    Conflict {
        id: String,
        expected: Option<Revision>,
        actual: Option<Revision>,
    },
    #[error("journal error: {0}")]
    Journal(String),
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Versioned<Value>>, StoreError>;

    /// Compare-and-swap write. `expected` is the revision the caller read;
    /// `None` means the document must not exist yet. Any mismatch is
    /// [`StoreError::Conflict`] and nothing is written.
    async fn put(&self, id: &str, value: Value, expected: Option<Revision>) -> Result<Revision, StoreError>;

    /// Every slot recorded for a tender or any of its lots, across all days.
    async fn plan_slots(&self, tender_id: &str) -> Result<Vec<SlotRow>, StoreError>;
}
