use crate::config::UploadConfig;
use crate::error::{Result, TrackerError};
use crate::sample::Sample;
use async_trait::async_trait;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Remote bulk-write target. `store` replaces whatever `remote_name` held.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn store(&self, remote_name: &str, payload: &str) -> Result<()>;
}

/// One `"<lat> <lon>\n"` line per sample, five decimals (about a meter).
pub fn format_payload<'a, I>(samples: I) -> String
where
    I: IntoIterator<Item = &'a Sample>,
{
    let mut out = String::new();
    for sample in samples {
        let _ = writeln!(out, "{:.5} {:.5}", sample.latitude(), sample.longitude());
    }
    out
}

/// HTTP `PUT` uploader
///
/// The object URL is `{endpoint}/{remote_dir}/{remote_name}`; basic auth is
/// sent when a username is configured.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    remote_dir: String,
    username: Option<String>,
    password: Option<String>,
}

impl HttpTransport {
    pub fn new(endpoint: &str, config: &UploadConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("trackme_rs/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TrackerError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            remote_dir: config.remote_dir.trim_matches('/').to_string(),
            username: config.username.clone().filter(|u| !u.is_empty()),
            password: config.password.clone(),
        })
    }

    fn object_url(&self, remote_name: &str) -> String {
        if self.remote_dir.is_empty() {
            format!("{}/{}", self.endpoint, remote_name)
        } else {
            format!("{}/{}/{}", self.endpoint, self.remote_dir, remote_name)
        }
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn store(&self, remote_name: &str, payload: &str) -> Result<()> {
        let url = self.object_url(remote_name);
        let mut request = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(payload.to_string());

        if let Some(user) = &self.username {
            request = request.basic_auth(user, self.password.as_deref());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TrackerError::Transport(format!(
                "PUT {} returned HTTP {}",
                url,
                status.as_u16()
            )));
        }

        log::debug!("Uploaded {} bytes to {}", payload.len(), url);
        Ok(())
    }
}

/// Writes uploads into a local directory, replacing the previous file
#[derive(Debug, Clone)]
pub struct DirectoryTransport {
    dir: PathBuf,
}

impl DirectoryTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl UploadTransport for DirectoryTransport {
    async fn store(&self, remote_name: &str, payload: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            TrackerError::Transport(format!("Failed to create {}: {}", self.dir.display(), e))
        })?;

        let target = self.dir.join(remote_name);
        let tmp = self.dir.join(format!(".{}.part", remote_name));
        tokio::fs::write(&tmp, payload.as_bytes()).await.map_err(|e| {
            TrackerError::Transport(format!("Failed to write {}: {}", tmp.display(), e))
        })?;
        tokio::fs::rename(&tmp, &target).await.map_err(|e| {
            TrackerError::Transport(format!("Failed to replace {}: {}", target.display(), e))
        })?;
        Ok(())
    }
}

/// Used when no upload target is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

#[async_trait]
impl UploadTransport for NullTransport {
    async fn store(&self, remote_name: &str, payload: &str) -> Result<()> {
        log::debug!(
            "No upload target configured, dropping {} ({} bytes)",
            remote_name,
            payload.len()
        );
        Ok(())
    }
}

/// Builds the transport for an upload configuration, so a settings reload can
/// swap the target
pub type TransportBuilder =
    Arc<dyn Fn(&UploadConfig) -> Result<Arc<dyn UploadTransport>> + Send + Sync>;

/// A mirror directory wins over the HTTP endpoint; neither means uploads are
/// discarded.
pub fn transport_for(
    upload: &UploadConfig,
    mirror_dir: Option<&Path>,
) -> Result<Arc<dyn UploadTransport>> {
    if let Some(dir) = mirror_dir {
        log::info!("Uploading to directory {}", dir.display());
        return Ok(Arc::new(DirectoryTransport::new(dir)));
    }

    match &upload.endpoint {
        Some(endpoint) => {
            log::info!("Uploading to {}", endpoint);
            Ok(Arc::new(HttpTransport::new(endpoint, upload)?))
        }
        None => {
            log::info!("No upload endpoint configured, uploads are discarded");
            Ok(Arc::new(NullTransport))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_format() {
        let samples = vec![
            Sample::new(48.1371539, 11.5761249, 0),
            Sample::new(-33.868801, 0.5, 1).with_speed(3.0),
        ];
        assert_eq!(
            format_payload(&samples),
            "48.13715 11.57612\n-33.86880 0.50000\n"
        );
    }

    #[test]
    fn test_empty_payload() {
        let empty: Vec<Sample> = Vec::new();
        assert_eq!(format_payload(&empty), "");
    }

    #[test]
    fn test_http_object_url() {
        let config = UploadConfig {
            remote_dir: "/tracks/".to_string(),
            ..UploadConfig::default()
        };
        let transport = HttpTransport::new("https://example.org/dav/", &config).unwrap();
        assert_eq!(
            transport.object_url("locations.txt"),
            "https://example.org/dav/tracks/locations.txt"
        );

        let flat = HttpTransport::new("https://example.org", &UploadConfig::default()).unwrap();
        assert_eq!(flat.object_url("x.txt"), "https://example.org/x.txt");
    }

    #[tokio::test]
    async fn test_directory_transport_overwrites() {
        let dir = std::env::temp_dir().join(format!(
            "trackme_upload_{}_{}",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let transport = DirectoryTransport::new(&dir);

        transport.store("locations.txt", "1.00000 2.00000\n").await.unwrap();
        transport.store("locations.txt", "").await.unwrap();

        let content = std::fs::read_to_string(dir.join("locations.txt")).unwrap();
        assert_eq!(content, "");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_transport_for_picks_target() {
        let dir = std::env::temp_dir().join(format!(
            "trackme_mirror_{}_{}",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let upload = UploadConfig {
            endpoint: Some("http://example.invalid/dav".to_string()),
            ..UploadConfig::default()
        };

        let mirror = transport_for(&upload, Some(dir.as_path())).unwrap();
        mirror.store("locations.txt", "1.00000 2.00000\n").await.unwrap();
        assert!(dir.join("locations.txt").exists());

        assert!(transport_for(&upload, None).is_ok());
        let discard = transport_for(&UploadConfig::default(), None).unwrap();
        assert!(discard.store("locations.txt", "").await.is_ok());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
