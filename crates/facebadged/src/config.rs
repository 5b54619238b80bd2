use crate::kiosk::KioskSettings;
use facebadge_core::DetectionConfig;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{key}: cannot parse {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("{key} must be {requirement}, got {value}")]
    OutOfRange {
        key: &'static str,
        requirement: &'static str,
        value: String,
    },
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Report attendance to the remote endpoint. Forced off without an endpoint.
    pub remote_logging: bool,
    pub endpoint_url: Option<String>,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// LCD framebuffer device (default: /dev/fb1).
    pub framebuffer: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    pub roster_dir: PathBuf,
    pub avatar_dir: PathBuf,
    pub asset_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub sample_stride: u32,
    pub downscale: f32,
    pub stability_threshold: u32,
    pub match_tolerance: f32,
    pub session_timeout: Duration,
    pub frame_interval: Duration,
    pub badge_dwell: Duration,
    pub rejection_dwell: Duration,
    /// Concurrent background deliveries.
    pub max_in_flight: usize,
}

impl Config {
    /// Load configuration from `FACEBADGE_*` and reporting variables with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let path = |key: &str, default: &str| var(key).map(PathBuf::from).unwrap_or_else(|| PathBuf::from(default));

        let endpoint_url = var("REMOTE_ENDPOINT_URL");
        let mut remote_logging = parse_or(&var, "ENABLE_REMOTE_LOGGING", true, parse_bool)?;
        if remote_logging && endpoint_url.is_none() {
            tracing::warn!("REMOTE_ENDPOINT_URL not set; remote attendance logging disabled");
            remote_logging = false;
        }

        let config = Self {
            remote_logging,
            endpoint_url,
            camera_device: var("FACEBADGE_CAMERA_DEVICE").unwrap_or_else(|| "/dev/video0".to_string()),
            framebuffer: path("FACEBADGE_FRAMEBUFFER", "/dev/fb1"),
            model_dir: var("FACEBADGE_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(facebadge_core::onnx::default_model_dir),
            roster_dir: path("FACEBADGE_ROSTER_DIR", "known_faces"),
            avatar_dir: path("FACEBADGE_AVATAR_DIR", "avatars"),
            asset_dir: path("FACEBADGE_ASSET_DIR", "assets"),
            backup_dir: path("FACEBADGE_BACKUP_DIR", "failed_uploads"),
            sample_stride: parse_or(&var, "FACEBADGE_SAMPLE_STRIDE", 3, str::parse)?,
            downscale: parse_or(&var, "FACEBADGE_DOWNSCALE", 1.0, str::parse)?,
            stability_threshold: parse_or(&var, "FACEBADGE_STABILITY_THRESHOLD", 3, str::parse)?,
            match_tolerance: parse_or(&var, "FACEBADGE_MATCH_TOLERANCE", 1.0, str::parse)?,
            session_timeout: Duration::from_secs(parse_or(&var, "FACEBADGE_SESSION_TIMEOUT_SECS", 3600, str::parse)?),
            frame_interval: Duration::from_millis(parse_or(&var, "FACEBADGE_FRAME_INTERVAL_MS", 30, str::parse)?),
            badge_dwell: Duration::from_millis(parse_or(&var, "FACEBADGE_BADGE_DWELL_MS", 2000, str::parse)?),
            rejection_dwell: Duration::from_millis(parse_or(&var, "FACEBADGE_REJECTION_DWELL_MS", 3000, str::parse)?),
            max_in_flight: parse_or(&var, "FACEBADGE_MAX_IN_FLIGHT", 4, str::parse)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let out_of_range = |key, requirement, value: String| ConfigError::OutOfRange { key, requirement, value };
        if self.sample_stride == 0 {
            return Err(out_of_range("FACEBADGE_SAMPLE_STRIDE", "at least 1", "0".into()));
        }
        if self.stability_threshold == 0 {
            return Err(out_of_range("FACEBADGE_STABILITY_THRESHOLD", "at least 1", "0".into()));
        }
        if !(self.downscale > 0.0 && self.downscale <= 1.0) {
            return Err(out_of_range("FACEBADGE_DOWNSCALE", "in (0, 1]", self.downscale.to_string()));
        }
        if self.match_tolerance.is_nan() || self.match_tolerance <= 0.0 {
            return Err(out_of_range("FACEBADGE_MATCH_TOLERANCE", "positive", self.match_tolerance.to_string()));
        }
        if self.max_in_flight == 0 {
            return Err(out_of_range("FACEBADGE_MAX_IN_FLIGHT", "at least 1", "0".into()));
        }
        Ok(())
    }

    pub fn detection_config(&self) -> DetectionConfig {
        DetectionConfig {
            sample_stride: self.sample_stride,
            stability_threshold: self.stability_threshold,
            tolerance: self.match_tolerance,
            downscale: self.downscale,
            ..DetectionConfig::default()
        }
    }

    pub fn kiosk_settings(&self) -> KioskSettings {
        KioskSettings {
            detection: self.detection_config(),
            session_timeout: chrono::Duration::from_std(self.session_timeout)
                .unwrap_or_else(|_| chrono::Duration::hours(1)),
            frame_interval: self.frame_interval,
            badge_dwell: self.badge_dwell,
            rejection_dwell: self.rejection_dwell,
            ..KioskSettings::default()
        }
    }
}

fn parse_or<T, E>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
    parse: impl Fn(&str) -> Result<T, E>,
) -> Result<T, ConfigError> {
    match var(key) {
        None => Ok(default),
        Some(value) => parse(value.trim()).map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn parse_bool(value: &str) -> Result<bool, ()> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(()),
    }
}
