use crate::error::{Result, TrackerError};
use crate::source::UpdateParams;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Upload target settings. Credentials are passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// HTTP base URL; `None` disables HTTP upload
    pub endpoint: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub remote_dir: String,
    pub remote_name: String,
    pub timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            username: None,
            password: None,
            remote_dir: String::new(),
            remote_name: "locations.txt".to_string(),
            timeout_secs: 5,
        }
    }
}

/// Recording, persistence and upload settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Minimum time between position updates (0 = distance only)
    pub min_time_secs: u64,
    /// Minimum distance between position updates (0 = time only)
    pub min_distance_m: f32,
    /// Backlog capacity (0 = unbounded)
    pub max_locations: usize,
    pub save_interval_mins: u64,
    pub upload_interval_secs: u64,
    /// Keep fixes that arrive while not recording
    pub accept_idle_fixes: bool,
    pub upload: UploadConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_time_secs: 5,
            min_distance_m: 0.0,
            max_locations: 0,
            save_interval_mins: 2,
            upload_interval_secs: 60,
            accept_idle_fixes: false,
            upload: UploadConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Load from a JSON file. A missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::info!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        let config: Self = serde_json::from_str(&text).map_err(|e| {
            TrackerError::InvalidConfig(format!("{}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.min_distance_m.is_finite() || self.min_distance_m < 0.0 {
            return Err(TrackerError::InvalidConfig(format!(
                "min_distance_m must be a non-negative number, got {}",
                self.min_distance_m
            )));
        }
        if self.upload.timeout_secs == 0 {
            return Err(TrackerError::InvalidConfig(
                "upload.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.upload.remote_name.trim().is_empty() {
            return Err(TrackerError::InvalidConfig(
                "upload.remote_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn save_interval_millis(&self) -> i64 {
        (self.save_interval_mins as i64).saturating_mul(60_000)
    }

    pub fn upload_interval_millis(&self) -> i64 {
        (self.upload_interval_secs as i64).saturating_mul(1_000)
    }

    pub fn update_params(&self) -> UpdateParams {
        UpdateParams {
            min_time_ms: self.min_time_secs.saturating_mul(1_000),
            min_distance_m: self.min_distance_m,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_file(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "trackme_config_{}_{}_{}.json",
            tag,
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ))
    }

    #[test]
    fn test_defaults() {
        let config = TrackerConfig::default();
        assert_eq!(config.save_interval_millis(), 120_000);
        assert_eq!(config.upload_interval_millis(), 60_000);
        assert_eq!(config.update_params().min_time_ms, 5_000);
        assert_eq!(config.upload.remote_name, "locations.txt");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = TrackerConfig::load(scratch_file("missing")).unwrap();
        assert_eq!(config, TrackerConfig::default());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let path = scratch_file("partial");
        fs::write(&path, r#"{ "max_locations": 500, "upload": { "remote_dir": "trips" } }"#)
            .unwrap();

        let config = TrackerConfig::load(&path).unwrap();
        assert_eq!(config.max_locations, 500);
        assert_eq!(config.upload.remote_dir, "trips");
        assert_eq!(config.upload.remote_name, "locations.txt");
        assert_eq!(config.save_interval_mins, 2);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_save_then_load() {
        let path = scratch_file("save");
        let config = TrackerConfig {
            min_time_secs: 1,
            min_distance_m: 2.5,
            upload_interval_secs: 30,
            ..TrackerConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(TrackerConfig::load(&path).unwrap(), config);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let negative = TrackerConfig {
            min_distance_m: -1.0,
            ..TrackerConfig::default()
        };
        assert!(matches!(
            negative.validate(),
            Err(TrackerError::InvalidConfig(_))
        ));

        let path = scratch_file("garbage");
        fs::write(&path, r#"{ "max_locations": "many" }"#).unwrap();
        assert!(matches!(
            TrackerConfig::load(&path),
            Err(TrackerError::InvalidConfig(_))
        ));
        let _ = fs::remove_file(&path);
    }
}
