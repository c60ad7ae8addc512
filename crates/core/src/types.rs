use chrono::{SubsecRound, TimeZone, Utc};

/// Row identifiers. `0` means "not yet persisted".
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Current time truncated to microseconds, the precision both stores keep.
pub fn now() -> Timestamp {
    Utc::now().trunc_subsecs(6)
}

/// Timestamps are stored as microseconds since the Unix epoch.
pub fn to_micros(ts: Timestamp) -> i64 {
    ts.timestamp_micros()
}

/// Inverse of [`to_micros`]. Out-of-range values clamp to the epoch.
pub fn from_micros(micros: i64) -> Timestamp {
    Utc.timestamp_micros(micros).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micros_round_trip_is_exact() {
        let ts = now();
        assert_eq!(from_micros(to_micros(ts)), ts);
    }

    #[test]
    fn now_has_no_sub_microsecond_part() {
        let ts = now();
        assert_eq!(ts.timestamp_subsec_nanos() % 1_000, 0);
    }
}
