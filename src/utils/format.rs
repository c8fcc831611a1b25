//! Human-readable size, speed, and duration rendering for tool output.

use std::time::Duration;

pub fn format_bytes(bytes: f64) -> String {
    const UNIT: f64 = 1024.0;
    if bytes < UNIT {
        return format!("{:.1} B", bytes);
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let suffix = ['K', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {}B", bytes / div, suffix)
}

/// Transfer speed; only meaningful when the duration is positive.
pub fn format_speed(bytes: u64, duration: Duration) -> Option<String> {
    let secs = duration.as_secs_f64();
    if secs <= 0.0 {
        return None;
    }
    Some(format!("{}/s", format_bytes(bytes as f64 / secs)))
}

/// Compact duration: at most two of days/hours/minutes/seconds.
pub fn format_duration(duration: Duration) -> String {
    let mut seconds = duration.as_secs();
    let days = seconds / 86_400;
    seconds %= 86_400;
    let hours = seconds / 3_600;
    seconds %= 3_600;
    let minutes = seconds / 60;
    seconds %= 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{}d", days));
    }
    if hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if minutes > 0 {
        parts.push(format!("{}m", minutes));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(format!("{}s", seconds));
    }
    parts.truncate(2);
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_scale_through_units() {
        assert_eq!(format_bytes(512.0), "512.0 B");
        assert_eq!(format_bytes(2048.0), "2.0 KB");
        assert_eq!(format_bytes(1024.0 * 1024.0 * 1.5), "1.5 MB");
    }

    #[test]
    fn speed_is_none_for_zero_duration() {
        assert!(format_speed(1024, Duration::from_secs(0)).is_none());
        assert_eq!(
            format_speed(2048, Duration::from_secs(2)).as_deref(),
            Some("1.0 KB/s")
        );
    }

    #[test]
    fn duration_keeps_two_largest_components() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
        assert_eq!(format_duration(Duration::from_secs(90_061)), "1d 1h");
    }
}
