//! Per-minute call billing

/// Credits for a call of `seconds`: one per started minute.
pub fn credits_for_duration(seconds: f64) -> i32 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    (seconds / 60.0).ceil() as i32
}
