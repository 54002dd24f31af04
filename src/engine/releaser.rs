use chrono::{DateTime, FixedOffset};
use chrono_tz::Tz;

use super::{Planner, PlannerError};
use crate::calendar::localize;
use crate::model::{AuctionRef, Tender};
use crate::observability;
use crate::store::SlotRow;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Slot rows found for the tender.
    pub examined: usize,
    pub released: usize,
    pub failed: usize,
}

/// Start date the tender currently declares for `auction`.
fn declared_start(tender: &Tender, auction: &AuctionRef) -> Option<DateTime<FixedOffset>> {
    match &auction.lot_id {
        None => tender.auction_period.as_ref()?.start_date,
        Some(lot_id) => tender
            .lots
            .as_ref()?
            .iter()
            .find(|lot| lot.id.as_deref() == Some(lot_id.as_str()))?
            .auction_period
            .as_ref()?
            .start_date,
    }
}

impl Planner {
    /// Instant a slot row stands for. Flat rows hold a whole session.
    fn slot_instant(&self, row: &SlotRow) -> DateTime<Tz> {
        let time = row
            .time
            .unwrap_or_else(|| self.config.day_start(row.family));
        localize(self.config.tz, row.date, time)
    }

    /// Free every recorded slot of `tender` (and its lots) that the tender
    /// no longer points at: its start date is gone, or is more than the
    /// tolerance away from the slot. A row that fails to release is logged
    /// and counted; the rest are still processed.
    pub async fn reconcile(&self, tender: &Tender) -> Result<ReconcileReport, PlannerError> {
        let rows = self.store.plan_slots(&tender.id).await?;
        let mut report = ReconcileReport::default();

        let has_lots = tender.lots.as_ref().is_some_and(|lots| !lots.is_empty());
        for row in rows {
            // `id_x` of a tender without lots belongs to another tender
            if row.auction.lot_id.is_some() && !has_lots {
                continue;
            }
            report.examined += 1;
            let recorded = self.slot_instant(&row);
            let tolerance = self.config.reconcile_tolerance;
            let keep = declared_start(tender, &row.auction).is_some_and(|declared| {
                let gap = declared - recorded.fixed_offset();
                -tolerance <= gap && gap <= tolerance
            });
            if keep {
                continue;
            }

            let occupant = row.auction.composite();
            let manager = self.manager(row.family);
            match manager
                .release_slot(self.store.as_ref(), &self.config.retry, &row.plan_id, &occupant, row.time)
                .await
            {
                Ok(0) => {}
                Ok(_) => {
                    report.released += 1;
                    metrics::counter!(observability::SLOTS_RELEASED_TOTAL, "family" => row.family.name())
                        .increment(1);
                    tracing::info!(
                        message_id = "free_slot",
                        plan_id = %row.plan_id,
                        lane = ?row.lane,
                        "released slot of {occupant} at {recorded}"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(plan_id = %row.plan_id, "failed to release slot of {occupant}: {e}");
                }
            }
        }

        Ok(report)
    }
}
