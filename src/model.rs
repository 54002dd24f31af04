use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Auction family: each has its own capacity and duration rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuctionFamily {
    /// English auctions: parallel lanes of fixed-length slots.
    Classic,
    /// Dutch auctions: one session per day, flat capacity.
    Insider,
    Texas,
}

impl AuctionFamily {
    pub const ALL: [AuctionFamily; 3] = [Self::Classic, Self::Insider, Self::Texas];

    /// Key of this family's capacity in the `streams` document, and of its
    /// occupant list in a day plan for the flat families.
    pub fn streams_key(self) -> &'static str {
        match self {
            Self::Classic => "streams",
            Self::Insider => "dutch_streams",
            Self::Texas => "texas_streams",
        }
    }

    pub fn from_streams_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.streams_key() == key)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Classic => "english",
            Self::Insider => "insider",
            Self::Texas => "texas",
        }
    }
}

impl fmt::Display for AuctionFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The unit of scheduling: a whole tender or one of its lots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AuctionRef {
    pub tender_id: String,
    pub lot_id: Option<String>,
}

impl AuctionRef {
    pub fn tender(tender_id: impl Into<String>) -> Self {
        Self {
            tender_id: tender_id.into(),
            lot_id: None,
        }
    }

    pub fn lot(tender_id: impl Into<String>, lot_id: impl Into<String>) -> Self {
        Self {
            tender_id: tender_id.into(),
            lot_id: Some(lot_id.into()),
        }
    }

    /// `tenderId` or `tenderId_lotId`, as stored in day plans.
    pub fn composite(&self) -> String {
        match &self.lot_id {
            Some(lot) => format!("{}_{lot}", self.tender_id),
            None => self.tender_id.clone(),
        }
    }

    /// Inverse of [`composite`](Self::composite). Splits on the first `_`.
    pub fn parse(composite: &str) -> Self {
        match composite.split_once('_') {
            Some((tender, lot)) => Self::lot(tender, lot),
            None => Self::tender(composite),
        }
    }
}

impl fmt::Display for AuctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.composite())
    }
}

/// Per-family capacities, stored as the `streams` document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamLimits {
    pub streams: u32,
    pub dutch_streams: u32,
    pub texas_streams: u32,
}

impl Default for StreamLimits {
    fn default() -> Self {
        Self {
            streams: 10,
            dutch_streams: 15,
            texas_streams: 20,
        }
    }
}

impl StreamLimits {
    pub fn capacity(&self, family: AuctionFamily) -> u32 {
        match family {
            AuctionFamily::Classic => self.streams,
            AuctionFamily::Insider => self.dutch_streams,
            AuctionFamily::Texas => self.texas_streams,
        }
    }
}

// ── Tender feed records ──────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionPeriod {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<FixedOffset>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub should_start_after: Option<DateTime<FixedOffset>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<FixedOffset>>,
}

impl AuctionPeriod {
    /// The instant planning must respect, if the period asks for (re)planning:
    /// `shouldStartAfter` is set and later than the current start date.
    pub fn pending_start(&self) -> Option<DateTime<FixedOffset>> {
        let after = self.should_start_after?;
        match self.start_date {
            Some(start) if after <= start => None,
            _ => Some(after),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuctionParameters {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auction_period: Option<AuctionPeriod>,
}

impl Lot {
    pub fn is_active(&self) -> bool {
        self.status.as_deref() == Some("active")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tender {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procurement_method_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auction_parameters: Option<AuctionParameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_method_details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auction_period: Option<AuctionPeriod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lots: Option<Vec<Lot>>,
}

impl Tender {
    /// Scheduling domain: day plans of test-mode tenders live apart from
    /// production ones.
    pub fn domain(&self) -> String {
        format!("plan{}", self.mode.as_deref().unwrap_or(""))
    }
}

// ── Patches written back upstream ────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedPeriod {
    pub start_date: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auction_period: Option<PlannedPeriod>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenderPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auction_period: Option<PlannedPeriod>,
    /// Positional: one entry per tender lot, empty for lots left alone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lots: Option<Vec<LotPatch>>,
}

impl TenderPatch {
    /// Apply the planned start dates to a local copy of the tender.
    pub fn apply_to(&self, tender: &mut Tender) {
        if let Some(planned) = &self.auction_period {
            tender
                .auction_period
                .get_or_insert_with(AuctionPeriod::default)
                .start_date = Some(planned.start_date);
        }
        if let (Some(patches), Some(lots)) = (&self.lots, tender.lots.as_mut()) {
            for (lot, patch) in lots.iter_mut().zip(patches) {
                if let Some(planned) = &patch.auction_period {
                    lot.auction_period
                        .get_or_insert_with(AuctionPeriod::default)
                        .start_date = Some(planned.start_date);
                }
            }
        }
    }
}
