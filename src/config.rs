//! Planner settings: built-in defaults, overridable from the environment.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveTime};
use chrono_tz::Tz;

use crate::calendar::{localize, round_up_to_grid};
use crate::engine::RetryPolicy;
use crate::limits;
use crate::model::{AuctionFamily, StreamLimits, Tender};

pub const DEFAULT_TZ: Tz = chrono_tz::Europe::Kyiv;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl ToString) -> Self {
        Self::Invalid {
            var,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Lane and slot rules of classic (english) auctions.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassicPolicy {
    pub day_start: NaiveTime,
    pub day_end: NaiveTime,
    pub bidder_time: Duration,
    pub service_time: Duration,
    pub min_pause: Duration,
    /// Slot ends are rounded up onto this grid, anchored at `day_start`.
    pub rounding: Duration,
    /// Bids a slot is sized for.
    pub required_bids: u32,
}

impl Default for ClassicPolicy {
    fn default() -> Self {
        Self {
            day_start: NaiveTime::from_hms_opt(11, 0, 0).unwrap_or_default(),
            day_end: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default(),
            bidder_time: Duration::minutes(6),
            service_time: Duration::minutes(9),
            min_pause: Duration::minutes(3),
            rounding: Duration::minutes(29),
            required_bids: 0,
        }
    }
}

impl ClassicPolicy {
    /// End of an auction for `bids` bidders starting at `start`.
    pub fn auction_end(&self, bids: u32, start: DateTime<Tz>) -> DateTime<Tz> {
        let raw = start + self.bidder_time * bids as i32 + self.service_time + self.min_pause;
        round_up_to_grid(raw, self.day_start, self.rounding)
    }

    /// End of a slot starting at `start`, sized for `required_bids`.
    pub fn slot_end(&self, start: DateTime<Tz>) -> DateTime<Tz> {
        self.auction_end(self.required_bids, start)
    }

    /// Whether one slot opened at `day_start` ends by `day_end`.
    pub fn fits_working_day(&self) -> bool {
        let date = chrono::NaiveDate::from_ymd_opt(2018, 8, 27).unwrap_or_default();
        let start = localize(Tz::UTC, date, self.day_start);
        self.slot_end(start) <= localize(Tz::UTC, date, self.day_end)
    }
}

/// Single daily session of the insider and texas families.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatPolicy {
    pub day_start: NaiveTime,
    pub duration: Duration,
}

impl FlatPolicy {
    pub fn insider() -> Self {
        Self {
            day_start: NaiveTime::from_hms_opt(9, 30, 0).unwrap_or_default(),
            duration: Duration::minutes(480),
        }
    }

    pub fn texas() -> Self {
        Self {
            day_start: NaiveTime::from_hms_opt(10, 0, 0).unwrap_or_default(),
            duration: Duration::hours(7),
        }
    }

    pub fn session(&self, tz: Tz, date: chrono::NaiveDate) -> (DateTime<Tz>, DateTime<Tz>) {
        let start = localize(tz, date, self.day_start);
        (start, start + self.duration)
    }
}

/// Which family plans a tender: `auctionParameters.type` first, then
/// `procurementMethodType`, else classic.
#[derive(Debug, Clone, PartialEq)]
pub struct FamilyMapping {
    pub types: HashMap<String, AuctionFamily>,
    pub pmts: HashMap<String, AuctionFamily>,
}

impl Default for FamilyMapping {
    fn default() -> Self {
        let types = AuctionFamily::ALL
            .into_iter()
            .map(|f| (f.name().to_string(), f))
            .collect();
        let pmts = ["dgfInsider", "sellout.insider"]
            .into_iter()
            .map(|pmt| (pmt.to_string(), AuctionFamily::Insider))
            .collect();
        Self { types, pmts }
    }
}

impl FamilyMapping {
    pub fn resolve(&self, tender: &Tender) -> AuctionFamily {
        let kind = tender
            .auction_parameters
            .as_ref()
            .and_then(|p| p.kind.as_deref());
        let found = match kind {
            Some(kind) => self.types.get(kind),
            None => tender
                .procurement_method_type
                .as_deref()
                .and_then(|pmt| self.pmts.get(pmt)),
        };
        found.copied().unwrap_or(AuctionFamily::Classic)
    }

    /// Route `pmts` to `family`, dropping whatever they were routed to before.
    pub fn set_pmts(&mut self, family: AuctionFamily, pmts: impl IntoIterator<Item = String>) {
        self.pmts.retain(|_, f| *f != family);
        for pmt in pmts {
            self.pmts.insert(pmt, family);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannerConfig {
    pub tz: Tz,
    /// Honour `quick` in `submissionMethodDetails`.
    pub sandbox_mode: bool,
    pub stream_limits: StreamLimits,
    pub classic: ClassicPolicy,
    pub insider: FlatPolicy,
    pub texas: FlatPolicy,
    pub families: FamilyMapping,
    pub retry: RetryPolicy,
    /// Added to the earliest start before the day-walk begins.
    pub start_buffer: Duration,
    /// Largest gap between a declared start and its slot that keeps the slot.
    pub reconcile_tolerance: Duration,
    /// Upper bound of the random shift applied to planned starts.
    pub jitter_max_seconds: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            tz: DEFAULT_TZ,
            sandbox_mode: false,
            stream_limits: StreamLimits::default(),
            classic: ClassicPolicy::default(),
            insider: FlatPolicy::insider(),
            texas: FlatPolicy::texas(),
            families: FamilyMapping::default(),
            retry: RetryPolicy::default(),
            start_buffer: Duration::hours(1),
            reconcile_tolerance: Duration::minutes(30),
            jitter_max_seconds: 1799,
        }
    }
}

impl PlannerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the known variables.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(tz) = lookup("TZ") {
            config.tz = tz
                .parse::<Tz>()
                .map_err(|e| ConfigError::invalid("TZ", &tz, e))?;
        }
        if let Some(flag) = lookup("PLANNER_SANDBOX_MODE") {
            config.sandbox_mode = parse_flag(&flag);
        }
        if let Some(v) = lookup("PLANNER_STREAMS") {
            config.stream_limits.streams = parse_capped("PLANNER_STREAMS", &v, limits::MAX_STREAMS)?;
        }
        if let Some(v) = lookup("PLANNER_DUTCH_STREAMS") {
            config.stream_limits.dutch_streams =
                parse_capped("PLANNER_DUTCH_STREAMS", &v, limits::MAX_STREAMS)?;
        }
        if let Some(v) = lookup("PLANNER_TEXAS_STREAMS") {
            config.stream_limits.texas_streams =
                parse_capped("PLANNER_TEXAS_STREAMS", &v, limits::MAX_STREAMS)?;
        }
        if let Some(v) = lookup("PLANNER_REQUIRED_BIDS") {
            config.classic.required_bids =
                parse_capped("PLANNER_REQUIRED_BIDS", &v, limits::MAX_REQUIRED_BIDS)?;
            if !config.classic.fits_working_day() {
                return Err(ConfigError::invalid(
                    "PLANNER_REQUIRED_BIDS",
                    &v,
                    "slot does not fit the working day",
                ));
            }
        }
        if let Some(v) = lookup("PLANNER_RETRY_MAX_ATTEMPTS") {
            let attempts = parse_capped("PLANNER_RETRY_MAX_ATTEMPTS", &v, limits::MAX_RETRY_ATTEMPTS)?;
            if attempts == 0 {
                return Err(ConfigError::invalid("PLANNER_RETRY_MAX_ATTEMPTS", &v, "must be at least 1"));
            }
            config.retry.max_attempts = attempts;
        }
        if let Some(v) = lookup("PLANNER_RETRY_INITIAL_DELAY_MS") {
            let ms: u64 = parse("PLANNER_RETRY_INITIAL_DELAY_MS", &v)?;
            config.retry.initial_delay = StdDuration::from_millis(ms);
        }
        if let Some(v) = lookup("PLANNER_INSIDER_PMTS") {
            config.families.set_pmts(AuctionFamily::Insider, parse_list(&v));
        }
        if let Some(v) = lookup("PLANNER_TEXAS_PMTS") {
            config.families.set_pmts(AuctionFamily::Texas, parse_list(&v));
        }

        Ok(config)
    }

    pub fn flat_policy(&self, family: AuctionFamily) -> Option<&FlatPolicy> {
        match family {
            AuctionFamily::Classic => None,
            AuctionFamily::Insider => Some(&self.insider),
            AuctionFamily::Texas => Some(&self.texas),
        }
    }

    /// Local time at which `family`'s working day begins.
    pub fn day_start(&self, family: AuctionFamily) -> NaiveTime {
        self.flat_policy(family)
            .map_or(self.classic.day_start, |p| p.day_start)
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(var, value, e))
}

fn parse_capped(var: &'static str, value: &str, max: u32) -> Result<u32, ConfigError> {
    let n: u32 = parse(var, value)?;
    if n > max {
        return Err(ConfigError::invalid(var, value, format!("exceeds {max}")));
    }
    Ok(n)
}

fn parse_flag(value: &str) -> bool {
    !matches!(value.trim().to_ascii_lowercase().as_str(), "" | "0" | "false" | "no" | "off")
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
