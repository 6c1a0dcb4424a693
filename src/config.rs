//! Agent configuration: YAML file plus CLI/environment overrides.
//!
//! Every option has a default; a missing config file or a missing key never
//! prevents startup. Overrides are applied by the binary in the order
//! CLI > environment > file > defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;

use crate::dispatch::{DatastoreTransportConfig, HttpTransportConfig, RetryPolicy};
use crate::predict::CategoryMap;

/// Default local sampling interval.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);
/// Default dispatch interval for the health profile.
pub const DEFAULT_DISPATCH_INTERVAL: Duration = Duration::from_secs(600);
/// Default cadence for the camera profiles (single-interval deployments run
/// both cadences at this rate).
pub const DEFAULT_CAMERA_INTERVAL: Duration = Duration::from_secs(30);
/// Default per-attempt transport timeout.
pub const DEFAULT_TRANSPORT_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_DEVICE_ID: &str = "rpi-main";
pub const DEFAULT_CAMERA_DEVICE_ID: &str = "rpi-camera-1";
pub const DEFAULT_LOCATION: &str = "Main Collection Point - IIT Mandi";
pub const DEFAULT_PERIPHERAL_PORT: &str = "/dev/ttyUSB0";
pub const DEFAULT_PERIPHERAL_BAUD: u32 = 115_200;
pub const DEFAULT_FRAME_PATH: &str = "latest.jpg";

fn default_location() -> String {
    DEFAULT_LOCATION.to_string()
}

fn default_timeout() -> Duration {
    DEFAULT_TRANSPORT_TIMEOUT
}

fn default_peripheral_port() -> String {
    DEFAULT_PERIPHERAL_PORT.to_string()
}

fn default_peripheral_baud() -> u32 {
    DEFAULT_PERIPHERAL_BAUD
}

fn default_frame_path() -> String {
    DEFAULT_FRAME_PATH.to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_retry_base_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_retry_max_delay() -> Duration {
    Duration::from_secs(5)
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Which capability set the agent runs with.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum Profile {
    /// Sensor health readings only.
    #[default]
    Health,
    /// Image capture with the stub predictor.
    Camera,
    /// Image capture, on-device inference and peripheral notification.
    CameraInference,
}

impl Profile {
    /// Whether the profile reads the health sensors by default.
    pub fn wants_sensors(&self) -> bool {
        matches!(self, Profile::Health)
    }

    /// Whether the profile captures frames.
    pub fn wants_camera(&self) -> bool {
        matches!(self, Profile::Camera | Profile::CameraInference)
    }

    /// Whether the profile notifies the peripheral.
    pub fn wants_broadcast(&self) -> bool {
        matches!(self, Profile::CameraInference)
    }

    fn default_device_id(&self) -> &'static str {
        if self.wants_camera() {
            DEFAULT_CAMERA_DEVICE_ID
        } else {
            DEFAULT_DEVICE_ID
        }
    }

    fn default_sample_interval(&self) -> Duration {
        if self.wants_camera() {
            DEFAULT_CAMERA_INTERVAL
        } else {
            DEFAULT_SAMPLE_INTERVAL
        }
    }

    fn default_dispatch_interval(&self) -> Duration {
        if self.wants_camera() {
            DEFAULT_CAMERA_INTERVAL
        } else {
            DEFAULT_DISPATCH_INTERVAL
        }
    }
}

/// Which transport backend the dispatcher uses.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum TransportKind {
    #[default]
    Http,
    Datastore,
}

/// Transport selection plus backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Backend to dispatch through (default: http).
    #[serde(default)]
    pub kind: TransportKind,

    /// Per-attempt timeout (default: 30s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Extra in-cycle attempts after the first (default: 0).
    #[serde(default)]
    pub max_retries: u32,

    /// Base delay between in-cycle attempts (default: 500ms).
    #[serde(default = "default_retry_base_delay", with = "humantime_serde")]
    pub retry_base_delay: Duration,

    /// Cap on the backoff delay (default: 5s).
    #[serde(default = "default_retry_max_delay", with = "humantime_serde")]
    pub retry_max_delay: Duration,

    #[serde(default)]
    pub http: HttpTransportConfig,

    #[serde(default)]
    pub datastore: DatastoreTransportConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            timeout: default_timeout(),
            max_retries: 0,
            retry_base_delay: default_retry_base_delay(),
            retry_max_delay: default_retry_max_delay(),
            http: HttpTransportConfig::default(),
            datastore: DatastoreTransportConfig::default(),
        }
    }
}

impl TransportConfig {
    /// Retry policy for the dispatcher.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.retry_base_delay,
            max_delay: self.retry_max_delay,
            jitter: true,
        }
    }
}

/// Camera capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Capture device index, recorded for out-of-process capture pipelines.
    #[serde(default)]
    pub device_index: u32,

    /// Path the capture pipeline drops its latest frame at.
    #[serde(default = "default_frame_path")]
    pub frame_path: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            frame_path: default_frame_path(),
        }
    }
}

/// Peripheral (side-channel) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeripheralConfig {
    /// Attempt to connect the peripheral at startup (default: true). The
    /// agent runs with broadcasting disabled when the connect fails.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Character-device port path.
    #[serde(default = "default_peripheral_port")]
    pub port: String,

    /// Line speed, carried as a collaborator parameter.
    #[serde(default = "default_peripheral_baud")]
    pub baud: u32,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_peripheral_port(),
            baud: default_peripheral_baud(),
        }
    }
}

/// Top-level agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Capability profile (default: health).
    #[serde(default)]
    pub profile: Profile,

    /// Device identifier; defaults per profile.
    #[serde(default)]
    pub device_id: Option<String>,

    /// Deployment location label attached to camera uploads.
    #[serde(default = "default_location")]
    pub location: String,

    /// Local sampling interval; defaults per profile.
    #[serde(default, with = "humantime_serde")]
    pub sample_interval: Option<Duration>,

    /// Dispatch interval; defaults per profile.
    #[serde(default, with = "humantime_serde")]
    pub dispatch_interval: Option<Duration>,

    /// Force the health sensors on or off, overriding the profile default.
    #[serde(default)]
    pub sensors: Option<bool>,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub camera: CameraConfig,

    #[serde(default)]
    pub peripheral: PeripheralConfig,

    /// Fine-to-coarse category table; defaults to the deployment's 10-class
    /// map.
    #[serde(default)]
    pub categories: CategoryMap,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            profile: Profile::default(),
            device_id: None,
            location: default_location(),
            sample_interval: None,
            dispatch_interval: None,
            sensors: None,
            transport: TransportConfig::default(),
            camera: CameraConfig::default(),
            peripheral: PeripheralConfig::default(),
            categories: CategoryMap::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or
    /// validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_interval() == Duration::ZERO {
            return Err(ConfigError::Validation(
                "sample_interval must be positive".to_string(),
            ));
        }
        if self.dispatch_interval() == Duration::ZERO {
            return Err(ConfigError::Validation(
                "dispatch_interval must be positive".to_string(),
            ));
        }
        if self.transport.timeout == Duration::ZERO {
            return Err(ConfigError::Validation(
                "transport timeout must be positive".to_string(),
            ));
        }

        reqwest::Url::parse(&self.transport.http.base_url).map_err(|_| {
            ConfigError::Validation(format!(
                "invalid backend base url: '{}'",
                self.transport.http.base_url
            ))
        })?;

        if self.peripheral.enabled && self.peripheral.baud == 0 {
            return Err(ConfigError::Validation(
                "peripheral baud must be non-zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Effective device identifier.
    pub fn device_id(&self) -> String {
        self.device_id
            .clone()
            .unwrap_or_else(|| self.profile.default_device_id().to_string())
    }

    /// Effective local sampling interval.
    pub fn sample_interval(&self) -> Duration {
        self.sample_interval
            .unwrap_or_else(|| self.profile.default_sample_interval())
    }

    /// Effective dispatch interval.
    pub fn dispatch_interval(&self) -> Duration {
        self.dispatch_interval
            .unwrap_or_else(|| self.profile.default_dispatch_interval())
    }

    /// Whether this agent reads the health sensors.
    pub fn sensors_enabled(&self) -> bool {
        self.sensors.unwrap_or_else(|| self.profile.wants_sensors())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_for_health_profile() {
        let config = AgentConfig::default();
        assert_eq!(config.profile, Profile::Health);
        assert_eq!(config.device_id(), "rpi-main");
        assert_eq!(config.sample_interval(), Duration::from_secs(5));
        assert_eq!(config.dispatch_interval(), Duration::from_secs(600));
        assert!(config.sensors_enabled());
        assert_eq!(config.transport.kind, TransportKind::Http);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn defaults_for_camera_profile_use_single_interval() {
        let config = AgentConfig {
            profile: Profile::Camera,
            ..AgentConfig::default()
        };
        assert_eq!(config.device_id(), "rpi-camera-1");
        // the single-interval variant: both cadences configured equal
        assert_eq!(config.sample_interval(), Duration::from_secs(30));
        assert_eq!(config.dispatch_interval(), Duration::from_secs(30));
        assert!(!config.sensors_enabled());
    }

    #[test]
    fn sensors_override_beats_profile_default() {
        let config = AgentConfig {
            profile: Profile::CameraInference,
            sensors: Some(true),
            ..AgentConfig::default()
        };
        assert!(config.sensors_enabled());
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let config: AgentConfig = serde_yaml::from_str(
            r#"
profile: camera-inference
dispatch_interval: 2m
transport:
  kind: http
  http:
    base_url: "http://collector.local:5000"
"#,
        )
        .unwrap();

        assert_eq!(config.profile, Profile::CameraInference);
        assert_eq!(config.dispatch_interval(), Duration::from_secs(120));
        // sample interval falls back to the profile default
        assert_eq!(config.sample_interval(), Duration::from_secs(30));
        assert_eq!(
            config.transport.http.base_url,
            "http://collector.local:5000"
        );
        assert_eq!(config.peripheral.port, "/dev/ttyUSB0");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_yaml_is_a_full_default_config() {
        let config: AgentConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.location, DEFAULT_LOCATION);
    }

    #[test]
    fn validation_rejects_zero_interval() {
        let config = AgentConfig {
            sample_interval: Some(Duration::ZERO),
            ..AgentConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sample_interval"));
    }

    #[test]
    fn validation_rejects_bad_base_url() {
        let mut config = AgentConfig::default();
        config.transport.http.base_url = "not a url".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("invalid backend base url"));
    }

    #[test]
    fn profile_parses_from_kebab_case() {
        assert_eq!(
            "camera-inference".parse::<Profile>().unwrap(),
            Profile::CameraInference
        );
        assert_eq!("HEALTH".parse::<Profile>().unwrap(), Profile::Health);
        assert!("warehouse".parse::<Profile>().is_err());
    }

    #[test]
    fn retry_policy_mirrors_transport_config() {
        let transport = TransportConfig {
            max_retries: 2,
            ..TransportConfig::default()
        };
        let policy = transport.retry_policy();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(5));
    }
}
