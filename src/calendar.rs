use std::collections::BTreeMap;

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Timelike, Weekday,
};
use chrono_tz::Tz;
use rand::Rng;
use serde_json::{Map, Value};

pub const CALENDAR_ID: &str = "calendar";

/// Working-days calendar: ISO date → "is holiday".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Calendar {
    days: BTreeMap<NaiveDate, bool>,
}

impl Calendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_holidays(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            days: holidays.into_iter().map(|d| (d, true)).collect(),
        }
    }

    pub fn set(&mut self, date: NaiveDate, holiday: bool) {
        self.days.insert(date, holiday);
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.days.get(&date).copied().unwrap_or(false)
    }

    /// Saturdays and Sundays are never working days, whatever the calendar says.
    pub fn is_working_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.is_holiday(date)
    }

    /// Read the calendar document. Keys that are not ISO dates (`_id`) and
    /// non-boolean values are ignored.
    pub fn from_document(doc: &Value) -> Self {
        let days = doc
            .as_object()
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| Some((k.parse().ok()?, v.as_bool()?)))
                    .collect()
            })
            .unwrap_or_default();
        Self { days }
    }

    pub fn to_document(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("_id".into(), Value::from(CALENDAR_ID));
        for (date, holiday) in &self.days {
            obj.insert(date.to_string(), Value::Bool(*holiday));
        }
        Value::Object(obj)
    }
}

/// Attach `tz` to a local wall-clock time. DST-ambiguous times take the
/// earlier instant; times inside a DST gap are read as UTC.
pub fn localize(tz: Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Tz> {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt,
        LocalResult::None => tz.from_utc_datetime(&naive),
    }
}

const SECONDS_PER_DAY: i64 = 86_400;

/// Round `instant` up onto the grid of `quantum`-long steps anchored at
/// `anchor` (local time) on the instant's own date. The offset from the
/// anchor is taken modulo one day, so times before the anchor fall on the
/// grid that runs on from the previous day's anchor. Sub-second precision
/// is dropped first.
pub fn round_up_to_grid(instant: DateTime<Tz>, anchor: NaiveTime, quantum: Duration) -> DateTime<Tz> {
    let instant = instant.with_nanosecond(0).unwrap_or(instant);
    let step = quantum.num_seconds();
    if step <= 0 {
        return instant;
    }
    let origin = localize(instant.timezone(), instant.date_naive(), anchor);
    let remainder = (instant - origin).num_seconds().rem_euclid(SECONDS_PER_DAY) % step;
    if remainder == 0 {
        instant
    } else {
        instant + Duration::seconds(step - remainder)
    }
}

/// Push `instant` forward by a random whole number of seconds in `[0, max_seconds]`.
pub fn randomize<T: TimeZone>(instant: DateTime<T>, max_seconds: u32, rng: &mut impl Rng) -> DateTime<T> {
    instant + Duration::seconds(i64::from(rng.gen_range(0..=max_seconds)))
}

/// Format a slot key the way day plans store it.
pub fn slot_key(time: NaiveTime) -> String {
    time.format("%H:%M:%S").to_string()
}

pub fn parse_slot_key(key: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(key, "%H:%M:%S%.f").ok()
}
