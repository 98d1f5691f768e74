use crate::sample::Sample;
use geo::{GeodesicDistance, Point};
use serde::{Deserialize, Serialize};

const MS_TO_KMH: f64 = 3.6;

/// Trip metrics derived from an ordered run of samples.
///
/// Never persisted; a fresh value is computed whenever the backlog changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_distance_meters: f64,
    /// Distance between the two newest samples
    pub last_segment_distance_meters: f64,
    pub average_speed_kmh: f64,
    pub max_speed_kmh: f64,
    /// Reported speed of the newest sample, 0 if it has none
    pub last_speed_kmh: f64,
    /// Newest minus oldest timestamp, clamped to 0
    pub duration_millis: i64,
}

/// Geodesic (WGS-84 ellipsoid) distance in meters between two samples
pub fn distance_meters(a: &Sample, b: &Sample) -> f64 {
    let pa = Point::new(a.longitude(), a.latitude());
    let pb = Point::new(b.longitude(), b.latitude());
    pa.geodesic_distance(&pb)
}

pub struct StatisticsEngine;

impl StatisticsEngine {
    /// Compute statistics over samples ordered oldest first.
    ///
    /// Average speed is taken over every sample's reported speed, including the
    /// first one, with missing speeds counted as 0. It is not derived from
    /// distance over time.
    pub fn compute<'a, I>(samples: I) -> Statistics
    where
        I: IntoIterator<Item = &'a Sample>,
    {
        let mut stats = Statistics::default();
        let mut iter = samples.into_iter();

        let first = match iter.next() {
            Some(first) => first,
            None => return stats,
        };

        let mut prev = first;
        let mut count = 1usize;
        let mut speed_sum = speed_of(first);
        let mut speed_max = speed_of(first);

        for cur in iter {
            let segment = distance_meters(prev, cur);
            stats.total_distance_meters += segment;
            stats.last_segment_distance_meters = segment;

            let speed = speed_of(cur);
            speed_sum += speed;
            speed_max = speed_max.max(speed);

            count += 1;
            prev = cur;
        }

        let last = prev;
        stats.last_speed_kmh = last.speed_kmh().unwrap_or(0.0);

        if count < 2 {
            return stats;
        }

        stats.average_speed_kmh = speed_sum / count as f64 * MS_TO_KMH;
        stats.max_speed_kmh = speed_max * MS_TO_KMH;
        stats.duration_millis = last
            .timestamp_millis()
            .saturating_sub(first.timestamp_millis())
            .max(0);

        stats
    }
}

fn speed_of(sample: &Sample) -> f64 {
    sample.speed().map(f64::from).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    // 0.001 degrees of longitude on the WGS-84 equator
    const EQUATOR_MILLIDEGREE_M: f64 = 111.319;

    fn trip() -> Vec<Sample> {
        vec![
            Sample::new(0.0, 0.0, 0),
            Sample::new(0.0, 0.001, 10_000).with_speed(5.0),
            Sample::new(0.0, 0.002, 20_000).with_speed(7.0),
        ]
    }

    #[test]
    fn test_empty_is_all_zero() {
        let empty: Vec<Sample> = Vec::new();
        let stats = StatisticsEngine::compute(&empty);
        assert_eq!(stats, Statistics::default());
    }

    #[test]
    fn test_single_sample_only_reports_last_speed() {
        let samples = [Sample::new(10.0, 10.0, 5_000).with_speed(2.0)];
        let stats = StatisticsEngine::compute(&samples);

        assert_abs_diff_eq!(stats.last_speed_kmh, 7.2, epsilon = 1e-9);
        assert_eq!(stats.total_distance_meters, 0.0);
        assert_eq!(stats.average_speed_kmh, 0.0);
        assert_eq!(stats.max_speed_kmh, 0.0);
        assert_eq!(stats.duration_millis, 0);
    }

    #[test]
    fn test_single_sample_without_speed() {
        let stats = StatisticsEngine::compute(&[Sample::new(10.0, 10.0, 5_000)]);
        assert_eq!(stats, Statistics::default());
    }

    #[test]
    fn test_three_sample_trip() {
        let samples = trip();
        let stats = StatisticsEngine::compute(&samples);

        assert_abs_diff_eq!(
            stats.total_distance_meters,
            2.0 * EQUATOR_MILLIDEGREE_M,
            epsilon = 0.5
        );
        assert_abs_diff_eq!(
            stats.last_segment_distance_meters,
            EQUATOR_MILLIDEGREE_M,
            epsilon = 0.25
        );
        assert_abs_diff_eq!(stats.average_speed_kmh, 12.0 / 3.0 * 3.6, epsilon = 1e-9);
        assert_abs_diff_eq!(stats.max_speed_kmh, 7.0 * 3.6, epsilon = 1e-9);
        assert_abs_diff_eq!(stats.last_speed_kmh, 7.0 * 3.6, epsilon = 1e-9);
        assert_eq!(stats.duration_millis, 20_000);
    }

    #[test]
    fn test_out_of_order_timestamps_clamp_duration() {
        let samples = [Sample::new(0.0, 0.0, 50_000), Sample::new(0.0, 0.0, 10_000)];
        let stats = StatisticsEngine::compute(&samples);
        assert_eq!(stats.duration_millis, 0);
        assert_eq!(stats.total_distance_meters, 0.0);
    }

    #[test]
    fn test_extreme_timestamps_saturate() {
        let forward = [Sample::new(0.0, 0.0, i64::MIN), Sample::new(0.0, 0.0, i64::MAX)];
        assert_eq!(StatisticsEngine::compute(&forward).duration_millis, i64::MAX);

        let backward = [Sample::new(0.0, 0.0, i64::MAX), Sample::new(0.0, 0.0, i64::MIN)];
        assert_eq!(StatisticsEngine::compute(&backward).duration_millis, 0);
    }

    #[test]
    fn test_max_speed_includes_first_sample() {
        let samples = [
            Sample::new(0.0, 0.0, 0).with_speed(9.0),
            Sample::new(0.0, 0.0, 1_000).with_speed(1.0),
        ];
        let stats = StatisticsEngine::compute(&samples);
        assert_abs_diff_eq!(stats.max_speed_kmh, 9.0 * 3.6, epsilon = 1e-9);
        assert_abs_diff_eq!(stats.average_speed_kmh, 5.0 * 3.6, epsilon = 1e-9);
    }
}
