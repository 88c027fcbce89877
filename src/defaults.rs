/// First status check after polling starts; covers near-immediate completions
pub const POLL_INITIAL_DELAY_SECS: u64 = 2;

/// Cadence of subsequent status checks
pub const POLL_INTERVAL_SECS: u64 = 5;

/// Wall-clock ceiling after which a still-pending job times out
pub const POLL_CEILING_SECS: u64 = 600;

/// Outbound webhook request timeout
pub const WEBHOOK_TIMEOUT_SECS: u64 = 120;
