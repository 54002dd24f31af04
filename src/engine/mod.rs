mod allocator;
mod error;
mod manager;
mod planning;
mod releaser;
mod retry;

pub use allocator::Allocation;
pub use error::PlannerError;
pub use manager::{DayState, Manager, SlotFit};
pub use releaser::ReconcileReport;
pub use retry::RetryPolicy;

use std::sync::Arc;

use serde_json::Value;

use crate::calendar::{CALENDAR_ID, Calendar};
use crate::config::PlannerConfig;
use crate::dayplan::MalformedDocument;
use crate::model::{AuctionFamily, StreamLimits, Tender};
use crate::store::DocumentStore;

pub const STREAMS_ID: &str = "streams";

/// Entry point of the planning engine: allocation, release, and tender
/// planning on top of a shared [`DocumentStore`].
pub struct Planner {
    store: Arc<dyn DocumentStore>,
    config: PlannerConfig,
}

impl Planner {
    pub fn new(store: Arc<dyn DocumentStore>, config: PlannerConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn manager(&self, family: AuctionFamily) -> Manager {
        let tz = self.config.tz;
        match family {
            AuctionFamily::Classic => Manager::Classic {
                tz,
                policy: self.config.classic.clone(),
            },
            AuctionFamily::Insider => Manager::Flat {
                tz,
                family,
                policy: self.config.insider.clone(),
            },
            AuctionFamily::Texas => Manager::Flat {
                tz,
                family,
                policy: self.config.texas.clone(),
            },
        }
    }

    pub fn family_for(&self, tender: &Tender) -> AuctionFamily {
        self.config.families.resolve(tender)
    }

    /// Current holiday calendar; empty if none is stored.
    pub async fn calendar(&self) -> Result<Calendar, PlannerError> {
        Ok(self
            .store
            .get(CALENDAR_ID)
            .await?
            .map(|doc| Calendar::from_document(&doc.value))
            .unwrap_or_default())
    }

    /// Current per-family capacities; defaults if none are stored.
    pub async fn stream_limits(&self) -> Result<StreamLimits, PlannerError> {
        let Some(doc) = self.store.get(STREAMS_ID).await? else {
            return Ok(StreamLimits::default());
        };
        serde_json::from_value(doc.value).map_err(|e| {
            PlannerError::MalformedDocument(MalformedDocument {
                id: STREAMS_ID.to_string(),
                reason: e.to_string(),
            })
        })
    }

    /// Replace the stored calendar.
    pub async fn seed_calendar(&self, calendar: &Calendar) -> Result<(), PlannerError> {
        self.replace_document(CALENDAR_ID, calendar.to_document()).await?;
        tracing::info!("calendar seeded");
        Ok(())
    }

    /// Replace the stored capacities.
    pub async fn seed_stream_limits(&self, limits: StreamLimits) -> Result<(), PlannerError> {
        let mut doc = serde_json::to_value(limits).map_err(|e| {
            PlannerError::MalformedDocument(MalformedDocument {
                id: STREAMS_ID.to_string(),
                reason: e.to_string(),
            })
        })?;
        if let Value::Object(obj) = &mut doc {
            obj.insert("_id".into(), Value::from(STREAMS_ID));
        }
        self.replace_document(STREAMS_ID, doc).await?;
        tracing::info!(
            streams = limits.streams,
            dutch_streams = limits.dutch_streams,
            texas_streams = limits.texas_streams,
            "stream limits seeded"
        );
        Ok(())
    }

    async fn replace_document(&self, id: &str, value: Value) -> Result<(), PlannerError> {
        let store = self.store.as_ref();
        retry::retry_on_conflict(&self.config.retry, "seed", || {
            let value = value.clone();
            async move {
                let rev = store.get(id).await?.map(|doc| doc.rev);
                store.put(id, value, rev).await?;
                Ok(())
            }
        })
        .await
    }
}
