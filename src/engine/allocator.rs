use chrono::{DateTime, Days, NaiveDate};
use chrono_tz::Tz;

use super::retry::retry_on_conflict;
use super::{Planner, PlannerError};
use crate::limits::MAX_DAY_WALK_DAYS;
use crate::model::{AuctionFamily, AuctionRef};
use crate::observability;

#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
    /// Classic lane, or the flat head count before this allocation. 0 in quick mode.
    pub lane: u32,
    /// Days passed over: holidays, weekends, and days without room.
    pub days_skipped: u32,
    /// Day plan the slot was written to; `None` in quick mode.
    pub plan_id: Option<String>,
}

fn next_day(date: NaiveDate) -> Result<NaiveDate, PlannerError> {
    date.checked_add_days(Days::new(1))
        .ok_or(PlannerError::LimitExceeded("date out of range"))
}

impl Planner {
    /// Reserve the first slot for `auction` at or after `earliest` plus the
    /// start buffer.
    ///
    /// Write conflicts restart the whole walk under the retry policy. In
    /// quick mode nothing is read or written: the start is one classic slot
    /// length after `earliest`.
    pub async fn allocate(
        &self,
        auction: &AuctionRef,
        family: AuctionFamily,
        domain: &str,
        earliest: DateTime<Tz>,
        quick: bool,
    ) -> Result<Allocation, PlannerError> {
        let earliest = earliest.with_timezone(&self.config.tz);
        if quick {
            let start = self.config.classic.slot_end(earliest);
            return Ok(Allocation {
                start,
                end: start,
                lane: 0,
                days_skipped: 0,
                plan_id: None,
            });
        }

        let occupant = auction.composite();
        let occupant = occupant.as_str();
        let allocation = retry_on_conflict(&self.config.retry, "allocate", || async move {
            self.try_allocate(occupant, family, domain, earliest).await
        })
        .await?;

        metrics::counter!(observability::ALLOCATIONS_TOTAL, "family" => family.name()).increment(1);
        metrics::histogram!(observability::DAYS_SKIPPED).record(f64::from(allocation.days_skipped));
        Ok(allocation)
    }

    /// One pass of the day-walk. Fails with [`PlannerError::Conflict`] if the
    /// chosen day plan changed underneath.
    pub async fn try_allocate(
        &self,
        occupant: &str,
        family: AuctionFamily,
        domain: &str,
        earliest: DateTime<Tz>,
    ) -> Result<Allocation, PlannerError> {
        let calendar = self.calendar().await?;
        let capacity = self.stream_limits().await?.capacity(family);
        let manager = self.manager(family);
        let store = self.store.as_ref();

        let buffered = earliest + self.config.start_buffer;
        let mut date = buffered.date_naive();
        if buffered.time() > manager.working_day_start() {
            date = next_day(date)?;
        }

        let mut days_skipped = 0;
        while days_skipped < MAX_DAY_WALK_DAYS {
            if !calendar.is_working_day(date) {
                days_skipped += 1;
                date = next_day(date)?;
                continue;
            }

            let state = manager.day_plan(store, domain, date).await?;
            if let Some(fit) = manager.fit_slot(state.lane, capacity, date, state.day_start, &state.plan) {
                let plan_id = state.plan.id.clone();
                manager.commit_slot(store, state.plan, occupant, &fit).await?;
                tracing::debug!(
                    occupant,
                    plan_id = %plan_id,
                    lane = fit.lane,
                    new_slot = fit.new_slot,
                    "slot committed at {}",
                    fit.start
                );
                return Ok(Allocation {
                    start: fit.start,
                    end: fit.end,
                    lane: fit.lane,
                    days_skipped,
                    plan_id: Some(plan_id),
                });
            }

            days_skipped += 1;
            date = next_day(date)?;
        }

        Err(PlannerError::LimitExceeded("day walk found no free slot"))
    }
}
