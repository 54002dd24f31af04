// Hard caps. Values past these are rejected before they can reach the day-walk.

/// Longest day-walk before an allocation gives up (ten years of days).
pub const MAX_DAY_WALK_DAYS: u32 = 3_660;

/// Per-family capacity ceiling accepted from configuration.
pub const MAX_STREAMS: u32 = 1_000;

/// Upper bound for the conflict retry policy.
pub const MAX_RETRY_ATTEMPTS: u32 = 10_000;

/// Bids used to size a classic slot.
pub const MAX_REQUIRED_BIDS: u32 = 100;

/// Longest tender feed line the binary accepts.
pub const MAX_FEED_LINE_BYTES: usize = 1 << 20;
