use chrono::Utc;

/// Wall-clock time in unix milliseconds, the unit every ledger timestamp uses.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
