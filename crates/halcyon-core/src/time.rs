use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Power-weighted median of `(time, weight)` pairs, where `total_weight` is
/// the sum of the weights. Returns 0 for an empty input.
pub fn weighted_median(mut times: Vec<(u64, i64)>, total_weight: i64) -> u64 {
    times.sort_by_key(|(time, _)| *time);
    let mut median = total_weight / 2;
    for (time, weight) in times {
        if median <= weight {
            return time;
        }
        median -= weight;
    }
    0
}
