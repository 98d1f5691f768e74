//! Human-readable renderings for status output.

use crate::sample::Sample;
use crate::statistics::Statistics;
use chrono::{DateTime, Local};

const NOT_AVAILABLE: &str = "n/a";

/// Format meters as `m` or `km`.
///
/// `precision_hint` is the number of decimals; values of 100 m / 100 km and
/// above get one decimal less to keep the string short.
pub fn human_readable_distance(meters: f64, precision_hint: usize) -> String {
    let reduced = precision_hint.saturating_sub(1);
    if meters >= 100_000.0 {
        format!("{:.*} km", reduced, meters / 1000.0)
    } else if meters >= 1000.0 {
        format!("{:.*} km", precision_hint, meters / 1000.0)
    } else if meters >= 100.0 {
        format!("{:.*} m", reduced, meters)
    } else {
        format!("{:.*} m", precision_hint, meters)
    }
}

/// `HH:MM:SS`, prefixed with a day count once a day has passed
pub fn human_readable_duration(millis: i64) -> String {
    let total_secs = millis.max(0) / 1000;
    let seconds = total_secs % 60;
    let minutes = (total_secs / 60) % 60;
    let hours = (total_secs / 3600) % 24;
    let days = total_secs / 86_400;

    if days == 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{} days, {:02}:{:02}:{:02}", days, hours, minutes, seconds)
    }
}

/// One-line backlog summary: count, distance, current/average/max speed
pub fn status_line(count: usize, stats: &Statistics) -> String {
    format!(
        "# {} dist {} {:.0} km/h | avg {:.0} km/h max {:.0} km/h | {}",
        count,
        human_readable_distance(stats.total_distance_meters, 0),
        stats.last_speed_kmh,
        stats.average_speed_kmh,
        stats.max_speed_kmh,
        human_readable_duration(stats.duration_millis),
    )
}

/// Newest position with optional fields shown as `n/a`
pub fn position_line(last: Option<&Sample>) -> String {
    let Some(sample) = last else {
        return format!("lat {0} lon {0} at {0}", NOT_AVAILABLE);
    };

    let time = DateTime::from_timestamp_millis(sample.timestamp_millis())
        .map(|t| t.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());
    let speed = sample
        .speed_kmh()
        .map(|kmh| format!("{:.1} km/h", kmh))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());
    let accuracy = sample
        .accuracy()
        .map(|a| human_readable_distance(a as f64, 0))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());

    format!(
        "lat {:.5} lon {:.5} at {} speed {} accuracy {}",
        sample.latitude(),
        sample.longitude(),
        time,
        speed,
        accuracy
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_units() {
        assert_eq!(human_readable_distance(12.345, 1), "12.3 m");
        assert_eq!(human_readable_distance(123.45, 1), "123 m");
        assert_eq!(human_readable_distance(1234.5, 1), "1.2 km");
        assert_eq!(human_readable_distance(123_456.0, 1), "123 km");
        assert_eq!(human_readable_distance(50.0, 0), "50 m");
    }

    #[test]
    fn test_duration() {
        assert_eq!(human_readable_duration(0), "00:00:00");
        assert_eq!(human_readable_duration(3_723_000), "01:02:03");
        assert_eq!(human_readable_duration(90_000_000), "1 days, 01:00:00");
        assert_eq!(human_readable_duration(-5), "00:00:00");
    }

    #[test]
    fn test_status_line() {
        let stats = Statistics {
            total_distance_meters: 2400.0,
            last_speed_kmh: 25.2,
            average_speed_kmh: 14.4,
            max_speed_kmh: 30.0,
            duration_millis: 65_000,
            ..Statistics::default()
        };
        let line = status_line(3, &stats);
        assert!(line.starts_with("# 3 dist 2 km 25 km/h"));
        assert!(line.contains("max 30 km/h"));
        assert!(line.ends_with("00:01:05"));
    }

    #[test]
    fn test_position_line_not_available() {
        assert!(position_line(None).contains("n/a"));

        let bare = Sample::new(1.0, 2.0, 0);
        let line = position_line(Some(&bare));
        assert!(line.starts_with("lat 1.00000 lon 2.00000"));
        assert!(line.contains("speed n/a accuracy n/a"));
    }
}
