//! General utilities shared across the application.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Converts a duration in (possibly fractional) seconds to a [`Duration`].
///
/// Negative and NaN inputs collapse to zero; values too large for a
/// [`Duration`] saturate to [`Duration::MAX`].
#[must_use]
pub fn secs_f64_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Returns `true` if `id` is a safe, generated identifier (ASCII alphanumerics,
/// `-` and `_` only).
///
/// Used before turning client-supplied identifiers into file paths.
#[must_use]
pub fn is_safe_identifier(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_millis_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }

    #[test]
    fn secs_conversion_clamps_invalid_values() {
        assert_eq!(secs_f64_to_duration(-1.0), Duration::ZERO);
        assert_eq!(secs_f64_to_duration(f64::NAN), Duration::ZERO);
        assert_eq!(secs_f64_to_duration(1.5), Duration::from_millis(1500));
    }

    #[test]
    fn secs_conversion_saturates_huge_values() {
        assert_eq!(secs_f64_to_duration(1e20), Duration::MAX);
        assert_eq!(secs_f64_to_duration(f64::INFINITY), Duration::MAX);
    }

    #[test]
    fn safe_identifier_rejects_path_segments() {
        assert!(is_safe_identifier("upload_3f2a-91"));
        assert!(!is_safe_identifier("../etc/passwd"));
        assert!(!is_safe_identifier("a/b"));
        assert!(!is_safe_identifier(""));
    }
}
