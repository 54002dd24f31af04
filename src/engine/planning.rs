use chrono::{DateTime, FixedOffset};
use chrono_tz::Tz;

use super::{Planner, PlannerError};
use crate::calendar::randomize;
use crate::model::{AuctionPeriod, AuctionRef, LotPatch, PlannedPeriod, Tender, TenderPatch};

impl Planner {
    /// Plan the tender, or each of its lots, whose `shouldStartAfter` is
    /// later than the declared start. Returns the patch to send upstream,
    /// or `None` when nothing needed planning.
    ///
    /// A lot that fails to plan is logged and left with an empty patch.
    pub async fn plan_tender(
        &self,
        tender: &Tender,
        now: DateTime<Tz>,
    ) -> Result<Option<TenderPatch>, PlannerError> {
        let quick = self.config.sandbox_mode
            && tender
                .submission_method_details
                .as_deref()
                .is_some_and(|details| details.contains("quick"));

        let Some(lots) = tender.lots.as_ref().filter(|lots| !lots.is_empty()) else {
            let Some(period) = &tender.auction_period else {
                return Ok(None);
            };
            let Some(after) = period.pending_start() else {
                return Ok(None);
            };
            let planned = self
                .plan_one(tender, AuctionRef::tender(&tender.id), period, after, now, quick)
                .await?;
            return Ok(Some(TenderPatch {
                auction_period: Some(planned),
                lots: None,
            }));
        };

        let mut patches = Vec::with_capacity(lots.len());
        let mut any_planned = false;
        for lot in lots {
            let pending = match (&lot.id, &lot.auction_period) {
                (Some(lot_id), Some(period)) if lot.is_active() => {
                    period.pending_start().map(|after| (lot_id, period, after))
                }
                _ => None,
            };
            let Some((lot_id, period, after)) = pending else {
                patches.push(LotPatch::default());
                continue;
            };

            let auction = AuctionRef::lot(&tender.id, lot_id);
            match self.plan_one(tender, auction, period, after, now, quick).await {
                Ok(planned) => {
                    any_planned = true;
                    patches.push(LotPatch {
                        auction_period: Some(planned),
                    });
                }
                Err(e) => {
                    tracing::error!(tender_id = %tender.id, lot_id = %lot_id, "failed to plan lot: {e}");
                    patches.push(LotPatch::default());
                }
            }
        }

        Ok(any_planned.then(|| TenderPatch {
            auction_period: None,
            lots: Some(patches),
        }))
    }

    async fn plan_one(
        &self,
        tender: &Tender,
        auction: AuctionRef,
        period: &AuctionPeriod,
        after: DateTime<FixedOffset>,
        now: DateTime<Tz>,
        quick: bool,
    ) -> Result<PlannedPeriod, PlannerError> {
        let earliest = after.with_timezone(&self.config.tz).max(now);
        let family = self.family_for(tender);
        let allocation = self
            .allocate(&auction, family, &tender.domain(), earliest, quick)
            .await?;
        let start = randomize(allocation.start, self.config.jitter_max_seconds, &mut rand::thread_rng());

        let verb = if period.start_date.is_some() { "replanned" } else { "planned" };
        let subject = if auction.lot_id.is_some() { "lot" } else { "auction" };
        tracing::info!(
            message_id = %format!("{verb}_auction_{subject}"),
            tender_id = %auction.tender_id,
            lot_id = ?auction.lot_id,
            family = %family,
            planned_date = %start.to_rfc3339(),
            planned_stream = allocation.lane,
            planned_days_skipped = allocation.days_skipped,
            "{verb} {subject} {auction} to {start}"
        );

        Ok(PlannedPeriod {
            start_date: start.fixed_offset(),
        })
    }
}
