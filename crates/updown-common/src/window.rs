//! Window-key derivation for per-window trade dedup.

use chrono::{DateTime, Utc};

/// Canonical key for a 15-minute slot: UTC `YYYYMMDD_HHMM` of its end time.
///
/// Two markets ending at the same wall-clock minute share a key, which is
/// exactly the dedup granularity we want for one trade per window.
pub fn window_key(end_time: DateTime<Utc>) -> String {
    end_time.format("%Y%m%d_%H%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_key_format() {
        let t = Utc.with_ymd_and_hms(2026, 3, 7, 14, 45, 0).unwrap();
        assert_eq!(window_key(t), "20260307_1445");
    }

    #[test]
    fn test_window_key_ignores_seconds() {
        let a = Utc.with_ymd_and_hms(2026, 3, 7, 14, 45, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 3, 7, 14, 45, 59).unwrap();
        assert_eq!(window_key(a), window_key(b));
    }

    #[test]
    fn test_window_key_distinct_slots() {
        let a = Utc.with_ymd_and_hms(2026, 3, 7, 14, 45, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 3, 7, 15, 0, 0).unwrap();
        assert_ne!(window_key(a), window_key(b));
    }
}
