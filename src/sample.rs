use serde::{Deserialize, Serialize};

/// One position fix as delivered by the position source.
///
/// Fields are private so a sample cannot change after construction; the
/// optional values are `None` when the provider did not report them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    latitude: f64,
    longitude: f64,
    timestamp_millis: i64,
    speed: Option<f32>,
    accuracy: Option<f32>,
}

impl Sample {
    pub fn new(latitude: f64, longitude: f64, timestamp_millis: i64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp_millis,
            speed: None,
            accuracy: None,
        }
    }

    /// Attach a speed in m/s. Negative or non-finite values are dropped.
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = (speed.is_finite() && speed >= 0.0).then_some(speed);
        self
    }

    /// Attach a horizontal accuracy in meters. Negative or non-finite values are dropped.
    pub fn with_accuracy(mut self, accuracy: f32) -> Self {
        self.accuracy = (accuracy.is_finite() && accuracy >= 0.0).then_some(accuracy);
        self
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp_millis
    }

    pub fn speed(&self) -> Option<f32> {
        self.speed
    }

    pub fn accuracy(&self) -> Option<f32> {
        self.accuracy
    }

    pub fn has_speed(&self) -> bool {
        self.speed.is_some()
    }

    pub fn has_accuracy(&self) -> bool {
        self.accuracy.is_some()
    }

    /// Reported speed in km/h, if any
    pub fn speed_kmh(&self) -> Option<f64> {
        self.speed.map(|s| s as f64 * 3.6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_fields_default_to_none() {
        let s = Sample::new(52.5, 13.4, 1_000);
        assert!(!s.has_speed());
        assert!(!s.has_accuracy());
        assert_eq!(s.speed_kmh(), None);
    }

    #[test]
    fn test_builder_sets_speed_and_accuracy() {
        let s = Sample::new(52.5, 13.4, 1_000).with_speed(10.0).with_accuracy(4.5);
        assert_eq!(s.speed(), Some(10.0));
        assert_eq!(s.accuracy(), Some(4.5));
        assert_eq!(s.speed_kmh(), Some(36.0));
    }

    #[test]
    fn test_invalid_speed_is_dropped() {
        let s = Sample::new(0.0, 0.0, 0).with_speed(-1.0).with_accuracy(f32::NAN);
        assert!(!s.has_speed());
        assert!(!s.has_accuracy());
    }
}
