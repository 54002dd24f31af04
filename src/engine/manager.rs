use chrono::{DateTime, NaiveDate, NaiveTime};
use chrono_tz::Tz;

use super::PlannerError;
use super::retry::{RetryPolicy, retry_on_conflict};
use crate::calendar::localize;
use crate::config::{ClassicPolicy, FlatPolicy};
use crate::dayplan::{DayPlan, plan_id};
use crate::model::AuctionFamily;
use crate::store::{DocumentStore, Revision};

/// What a day looks like to the family planning on it.
#[derive(Debug, Clone)]
pub struct DayState {
    /// Classic: end of the last appended slot, or the working-day start.
    /// Flat: the family's session start.
    pub day_start: NaiveTime,
    /// Classic: highest lane in use. Flat: occupants so far.
    pub lane: u32,
    pub plan: DayPlan,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotFit {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
    pub day_start: NaiveTime,
    pub lane: u32,
    /// The slot extends a lane rather than reusing a released one.
    pub new_slot: bool,
}

/// Per-family slot rules.
#[derive(Debug, Clone)]
pub enum Manager {
    /// Parallel lanes of grid-aligned slots.
    Classic { tz: Tz, policy: ClassicPolicy },
    /// One session per day; capacity is a head count.
    Flat {
        tz: Tz,
        family: AuctionFamily,
        policy: FlatPolicy,
    },
}

impl Manager {
    fn tz(&self) -> Tz {
        match self {
            Manager::Classic { tz, .. } | Manager::Flat { tz, .. } => *tz,
        }
    }

    /// Working-day start of the family, local time.
    pub fn working_day_start(&self) -> NaiveTime {
        match self {
            Manager::Classic { policy, .. } => policy.day_start,
            Manager::Flat { policy, .. } => policy.day_start,
        }
    }

    /// Load the day plan of `domain` for `date`; an absent plan reads as empty.
    pub async fn day_plan(
        &self,
        store: &dyn DocumentStore,
        domain: &str,
        date: NaiveDate,
    ) -> Result<DayState, PlannerError> {
        let id = plan_id(domain, date);
        let plan = match store.get(&id).await? {
            Some(doc) => DayPlan::from_document(&id, doc)?,
            None => DayPlan::empty(domain, date),
        };
        let state = match self {
            Manager::Classic { policy, .. } => DayState {
                day_start: plan.time.unwrap_or(policy.day_start),
                lane: plan.streams.unwrap_or(1),
                plan,
            },
            Manager::Flat { family, policy, .. } => DayState {
                day_start: policy.day_start,
                lane: plan.queue(*family).len() as u32,
                plan,
            },
        };
        Ok(state)
    }

    /// Find room on `date`, or `None` if the day is full for this family.
    pub fn fit_slot(
        &self,
        lane: u32,
        capacity: u32,
        date: NaiveDate,
        day_start: NaiveTime,
        plan: &DayPlan,
    ) -> Option<SlotFit> {
        let tz = self.tz();
        match self {
            Manager::Classic { policy, .. } => {
                if let Some((free_lane, time)) = plan.first_free_slot()
                    && free_lane <= capacity
                {
                    let start = localize(tz, date, time);
                    return Some(SlotFit {
                        start,
                        end: policy.slot_end(start),
                        day_start: time,
                        lane: free_lane,
                        new_slot: false,
                    });
                }

                let working_start = localize(tz, date, policy.day_start);
                let day_end = localize(tz, date, policy.day_end);
                let mut cursor = localize(tz, date, day_start).max(working_start);
                let mut lane = lane.max(1);
                while lane <= capacity {
                    let latest_end = plan
                        .occupied(lane)
                        .map(|t| policy.slot_end(localize(tz, date, t)))
                        .max();
                    let start = latest_end.map_or(cursor, |end| end.max(cursor));
                    let end = policy.slot_end(start);
                    if end <= day_end {
                        return Some(SlotFit {
                            start,
                            end,
                            day_start: start.time(),
                            lane,
                            new_slot: true,
                        });
                    }
                    lane += 1;
                    cursor = working_start;
                }
                None
            }
            Manager::Flat { family, policy, .. } => {
                let taken = plan.queue(*family).len() as u32;
                if taken >= capacity {
                    return None;
                }
                let (start, end) = policy.session(tz, date);
                Some(SlotFit {
                    start,
                    end,
                    day_start: policy.day_start,
                    lane: taken,
                    new_slot: false,
                })
            }
        }
    }

    /// Record `occupant` in `plan` and write it back at the revision it was
    /// read at. A concurrent writer surfaces as [`PlannerError::Conflict`].
    pub async fn commit_slot(
        &self,
        store: &dyn DocumentStore,
        mut plan: DayPlan,
        occupant: &str,
        fit: &SlotFit,
    ) -> Result<Revision, PlannerError> {
        match self {
            Manager::Classic { .. } => {
                plan.assign(fit.lane, fit.start.time(), occupant);
                if fit.new_slot {
                    plan.time = Some(fit.end.time());
                    plan.streams = Some(plan.streams.unwrap_or(0).max(fit.lane));
                }
            }
            Manager::Flat { family, .. } => plan.enqueue(*family, occupant),
        }
        let rev = store.put(&plan.id, plan.to_document(), plan.rev).await?;
        Ok(rev)
    }

    /// Free whatever `occupant` holds in plan `plan_id` (only the slot at
    /// `at`, if given, for classic plans). Returns how many entries were
    /// freed; nothing is written when that is zero.
    pub async fn release_slot(
        &self,
        store: &dyn DocumentStore,
        retry: &RetryPolicy,
        plan_id: &str,
        occupant: &str,
        at: Option<NaiveTime>,
    ) -> Result<usize, PlannerError> {
        retry_on_conflict(retry, "release slot", || async move {
            let Some(doc) = store.get(plan_id).await? else {
                return Ok(0);
            };
            let mut plan = DayPlan::from_document(plan_id, doc)?;
            let released = match self {
                Manager::Classic { .. } => plan.release_lanes(occupant, at),
                Manager::Flat { family, .. } => plan.dequeue(*family, occupant),
            };
            if released > 0 {
                store.put(plan_id, plan.to_document(), plan.rev).await?;
            }
            Ok(released)
        })
        .await
    }
}
