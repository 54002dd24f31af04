//! Typed view of a day plan document (`<domain>_<YYYY-MM-DD>`).
//!
//! One document per scheduling domain and calendar day, shared by all
//! families:
//!
//! ```json
//! {
//!   "_id": "plan_2018-08-27",
//!   "time": "11:58:00",
//!   "streams": 1,
//!   "stream_1": {"11:00:00": "tender", "11:29:00": null},
//!   "dutch_streams": ["tender_lot"],
//!   "texas_streams": []
//! }
//! ```
//!
//! `null` slots were released and may be handed out again. Keys this module
//! does not understand are carried through untouched.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveTime};
use serde_json::{Map, Value};

use crate::calendar::{parse_slot_key, slot_key};
use crate::model::{AuctionFamily, AuctionRef};
use crate::store::{Revision, SlotRow, Versioned};

const LANE_PREFIX: &str = "stream_";

#[derive(Debug, thiserror::Error)]
#[error("malformed document {id}: {reason}")]
pub struct MalformedDocument {
    pub id: String,
    pub reason: String,
}

impl MalformedDocument {
    fn new(id: &str, reason: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

pub fn plan_id(domain: &str, date: NaiveDate) -> String {
    format!("{domain}_{date}")
}

/// Date part of a plan id (everything after the last `_`).
pub fn plan_date(id: &str) -> Option<NaiveDate> {
    id.rsplit_once('_')?.1.parse().ok()
}

pub type Lane = BTreeMap<NaiveTime, Option<String>>;

#[derive(Debug, Clone, PartialEq)]
pub struct DayPlan {
    pub id: String,
    /// Revision this plan was read at; `None` if it is not stored yet.
    pub rev: Option<Revision>,
    pub date: NaiveDate,
    /// End of the last slot appended to a classic lane.
    pub time: Option<NaiveTime>,
    /// Classic lanes in use.
    pub streams: Option<u32>,
    pub lanes: BTreeMap<u32, Lane>,
    /// Occupant lists of the flat families.
    pub queues: BTreeMap<AuctionFamily, Vec<String>>,
    extra: Map<String, Value>,
}

impl DayPlan {
    pub fn empty(domain: &str, date: NaiveDate) -> Self {
        Self {
            id: plan_id(domain, date),
            rev: None,
            date,
            time: None,
            streams: None,
            lanes: BTreeMap::new(),
            queues: BTreeMap::new(),
            extra: Map::new(),
        }
    }

    pub fn from_document(id: &str, doc: Versioned<Value>) -> Result<Self, MalformedDocument> {
        let date = plan_date(id).ok_or_else(|| MalformedDocument::new(id, "id carries no date"))?;
        let Value::Object(obj) = doc.value else {
            return Err(MalformedDocument::new(id, "not an object"));
        };

        let mut plan = Self {
            id: id.to_string(),
            rev: Some(doc.rev),
            date,
            time: None,
            streams: None,
            lanes: BTreeMap::new(),
            queues: BTreeMap::new(),
            extra: Map::new(),
        };

        for (key, value) in obj {
            if key == "_id" {
                continue;
            }
            if key == "time" {
                let time = value
                    .as_str()
                    .and_then(parse_slot_key)
                    .ok_or_else(|| MalformedDocument::new(id, "bad `time`"))?;
                plan.time = Some(time);
            } else if key == "streams" {
                let n = value
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| MalformedDocument::new(id, "bad `streams`"))?;
                plan.streams = Some(n);
            } else if let Some(family) = AuctionFamily::from_streams_key(&key) {
                plan.queues.insert(family, parse_queue(id, &key, value)?);
            } else if let Some(n) = key.strip_prefix(LANE_PREFIX).and_then(|n| n.parse::<u32>().ok()) {
                plan.lanes.insert(n, parse_lane(id, &key, value)?);
            } else {
                plan.extra.insert(key, value);
            }
        }
        Ok(plan)
    }

    pub fn to_document(&self) -> Value {
        let mut obj = self.extra.clone();
        obj.insert("_id".into(), Value::from(self.id.clone()));
        if let Some(time) = self.time {
            obj.insert("time".into(), Value::from(slot_key(time)));
        }
        if let Some(streams) = self.streams {
            obj.insert("streams".into(), Value::from(streams));
        }
        for (n, lane) in &self.lanes {
            let slots: Map<String, Value> = lane
                .iter()
                .map(|(t, occupant)| {
                    let v = occupant.clone().map_or(Value::Null, Value::from);
                    (slot_key(*t), v)
                })
                .collect();
            obj.insert(format!("{LANE_PREFIX}{n}"), Value::Object(slots));
        }
        for (family, ids) in &self.queues {
            obj.insert(family.streams_key().into(), Value::from(ids.clone()));
        }
        Value::Object(obj)
    }

    /// First released slot among the lanes in use: lowest lane, earliest time.
    pub fn first_free_slot(&self) -> Option<(u32, NaiveTime)> {
        let in_use = self.streams.unwrap_or(0);
        if in_use == 0 {
            return None;
        }
        self.lanes
            .range(1..=in_use)
            .find_map(|(n, lane)| {
                lane.iter()
                    .find(|(_, occupant)| occupant.is_none())
                    .map(|(t, _)| (*n, *t))
            })
    }

    /// Start times of the occupied slots of a lane.
    pub fn occupied(&self, lane: u32) -> impl Iterator<Item = NaiveTime> + '_ {
        self.lanes
            .get(&lane)
            .into_iter()
            .flat_map(|slots| slots.iter().filter(|(_, o)| o.is_some()).map(|(t, _)| *t))
    }

    pub fn queue(&self, family: AuctionFamily) -> &[String] {
        self.queues.get(&family).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Put `occupant` into a classic slot.
    pub fn assign(&mut self, lane: u32, time: NaiveTime, occupant: &str) {
        self.lanes
            .entry(lane)
            .or_default()
            .insert(time, Some(occupant.to_string()));
    }

    /// Null out every classic slot held by `occupant`, optionally only the
    /// one starting at `at`. Returns how many slots were released.
    pub fn release_lanes(&mut self, occupant: &str, at: Option<NaiveTime>) -> usize {
        let mut released = 0;
        for lane in self.lanes.values_mut() {
            for (t, holder) in lane.iter_mut() {
                if at.is_some_and(|at| at != *t) {
                    continue;
                }
                if holder.as_deref() == Some(occupant) {
                    *holder = None;
                    released += 1;
                }
            }
        }
        released
    }

    pub fn enqueue(&mut self, family: AuctionFamily, occupant: &str) {
        self.queues
            .entry(family)
            .or_default()
            .push(occupant.to_string());
    }

    /// Remove every copy of `occupant` from a flat family's list.
    pub fn dequeue(&mut self, family: AuctionFamily, occupant: &str) -> usize {
        let Some(ids) = self.queues.get_mut(&family) else {
            return 0;
        };
        let before = ids.len();
        ids.retain(|id| id != occupant);
        before - ids.len()
    }

    /// Index rows for every occupant recorded in this plan.
    pub fn rows(&self) -> Vec<SlotRow> {
        let mut rows = Vec::new();
        for (n, lane) in &self.lanes {
            for (t, occupant) in lane {
                if let Some(occupant) = occupant {
                    rows.push(SlotRow {
                        auction: AuctionRef::parse(occupant),
                        family: AuctionFamily::Classic,
                        lane: Some(*n),
                        date: self.date,
                        time: Some(*t),
                        plan_id: self.id.clone(),
                    });
                }
            }
        }
        for (family, ids) in &self.queues {
            for occupant in ids {
                rows.push(SlotRow {
                    auction: AuctionRef::parse(occupant),
                    family: *family,
                    lane: None,
                    date: self.date,
                    time: None,
                    plan_id: self.id.clone(),
                });
            }
        }
        rows
    }
}

fn parse_lane(id: &str, key: &str, value: Value) -> Result<Lane, MalformedDocument> {
    let Value::Object(slots) = value else {
        return Err(MalformedDocument::new(id, format!("`{key}` is not an object")));
    };
    slots
        .into_iter()
        .map(|(k, v)| {
            let t = parse_slot_key(&k)
                .ok_or_else(|| MalformedDocument::new(id, format!("bad slot `{k}` in `{key}`")))?;
            let occupant = match v {
                Value::Null => None,
                Value::String(s) => Some(s),
                _ => return Err(MalformedDocument::new(id, format!("bad occupant at `{key}.{k}`"))),
            };
            Ok((t, occupant))
        })
        .collect()
}

fn parse_queue(id: &str, key: &str, value: Value) -> Result<Vec<String>, MalformedDocument> {
    let Value::Array(items) = value else {
        return Err(MalformedDocument::new(id, format!("`{key}` is not a list")));
    };
    items
        .into_iter()
        .map(|v| match v {
            Value::String(s) => Ok(s),
            _ => Err(MalformedDocument::new(id, format!("non-string entry in `{key}`"))),
        })
        .collect()
}

/// Slot index function for the document store: rows for day plans, nothing
/// for any other document.
pub fn index_rows(id: &str, doc: &Value) -> Vec<SlotRow> {
    if plan_date(id).is_none() {
        return Vec::new();
    }
    let versioned = Versioned {
        rev: 0,
        value: doc.clone(),
    };
    match DayPlan::from_document(id, versioned) {
        Ok(plan) => plan.rows(),
        Err(e) => {
            tracing::warn!("not indexing {id}: {e}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2017, 10, 3).unwrap()
    }

    fn stored(doc: Value) -> Versioned<Value> {
        Versioned { rev: 4, value: doc }
    }

    #[test]
    fn plan_ids_carry_domain_and_date() {
        assert_eq!(plan_id("plantest", date()), "plantest_2017-10-03");
        assert_eq!(plan_date("plantest_2017-10-03"), Some(date()));
        assert_eq!(plan_date("plan_2017-10-03"), Some(date()));
        assert_eq!(plan_date("streams"), None);
    }

    #[test]
    fn parses_and_writes_both_shapes() {
        let doc = json!({
            "_id": "plantest_2017-10-03",
            "time": "11:58:00",
            "streams": 2,
            "stream_1": {"11:00:00": "a", "11:29:00": null},
            "stream_2": {"11:00:00": "b_l1"},
            "dutch_streams": ["c", "c"],
            "owner": "ops",
        });
        let plan = DayPlan::from_document("plantest_2017-10-03", stored(doc.clone())).unwrap();
        assert_eq!(plan.rev, Some(4));
        assert_eq!(plan.time, Some(t(11, 58)));
        assert_eq!(plan.streams, Some(2));
        assert_eq!(plan.lanes[&1][&t(11, 29)], None);
        assert_eq!(plan.queue(AuctionFamily::Insider).len(), 2);
        assert!(plan.queue(AuctionFamily::Texas).is_empty());
        assert_eq!(plan.to_document(), doc);
    }

    #[test]
    fn rejects_malformed_lanes() {
        let doc = json!({"stream_1": {"11:00:00": 5}});
        assert!(DayPlan::from_document("plan_2017-10-03", stored(doc)).is_err());
        let doc = json!({"stream_1": {"eleven": "a"}});
        assert!(DayPlan::from_document("plan_2017-10-03", stored(doc)).is_err());
        let doc = json!({"texas_streams": "a"});
        assert!(DayPlan::from_document("plan_2017-10-03", stored(doc)).is_err());
        assert!(DayPlan::from_document("plan", stored(json!({}))).is_err());
    }

    #[test]
    fn free_slot_only_in_lanes_in_use() {
        let mut plan = DayPlan::empty("plantest", date());
        plan.streams = Some(1);
        plan.assign(1, t(11, 0), "a");
        plan.assign(2, t(12, 0), "b");
        assert_eq!(plan.first_free_slot(), None);

        plan.lanes.get_mut(&2).unwrap().insert(t(12, 0), None);
        assert_eq!(plan.first_free_slot(), None);

        plan.lanes.get_mut(&1).unwrap().insert(t(12, 0), None);
        assert_eq!(plan.first_free_slot(), Some((1, t(12, 0))));
    }

    #[test]
    fn release_lanes_matches_occupant_and_time() {
        let mut plan = DayPlan::empty("plan", date());
        plan.assign(1, t(11, 0), "a");
        plan.assign(1, t(11, 29), "a");
        plan.assign(2, t(11, 0), "b");

        assert_eq!(plan.release_lanes("a", Some(t(11, 29))), 1);
        assert_eq!(plan.lanes[&1][&t(11, 0)].as_deref(), Some("a"));
        assert_eq!(plan.release_lanes("x", None), 0);
        assert_eq!(plan.release_lanes("a", None), 1);
        assert_eq!(plan.release_lanes("a", None), 0);
        assert_eq!(plan.lanes[&2][&t(11, 0)].as_deref(), Some("b"));
    }

    #[test]
    fn dequeue_removes_every_copy() {
        let mut plan = DayPlan::empty("plan", date());
        for id in ["1", "2", "3", "1"] {
            plan.enqueue(AuctionFamily::Insider, id);
        }
        assert_eq!(plan.dequeue(AuctionFamily::Insider, "1"), 2);
        assert_eq!(plan.queue(AuctionFamily::Insider), ["2", "3"]);
        assert_eq!(plan.dequeue(AuctionFamily::Insider, "1"), 0);
        assert_eq!(plan.dequeue(AuctionFamily::Texas, "1"), 0);
    }

    #[test]
    fn rows_cover_lanes_and_queues() {
        let mut plan = DayPlan::empty("plan", date());
        plan.assign(1, t(11, 0), "a");
        plan.lanes.get_mut(&1).unwrap().insert(t(11, 29), None);
        plan.enqueue(AuctionFamily::Texas, "b_l2");

        let rows = plan.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].auction, AuctionRef::tender("a"));
        assert_eq!(rows[0].lane, Some(1));
        assert_eq!(rows[0].time, Some(t(11, 0)));
        assert_eq!(rows[1].auction, AuctionRef::lot("b", "l2"));
        assert_eq!(rows[1].family, AuctionFamily::Texas);
        assert_eq!(rows[1].time, None);
    }

    #[test]
    fn index_skips_other_documents() {
        assert!(index_rows("streams", &json!({"streams": 10})).is_empty());
        assert!(index_rows("calendar", &json!({"2018-01-01": true})).is_empty());
        let rows = index_rows("plan_2017-10-03", &json!({"stream_1": {"11:00:00": "a"}}));
        assert_eq!(rows.len(), 1);
    }
}
