//! Pipeline configuration.
//!
//! The configuration is one YAML document. Every field has an explicit
//! default so a minimal file only lists cameras. Durations are written as
//! fractional seconds. The flat keys used by older deployments
//! (`supervisor_heartbeat_timeout`, `alert_debounce_seconds`, ...) are
//! accepted at the top level and override the sectioned values.
//!
//! Loading always ends in [`PipelineConfig::validate`], so an invalid file
//! fails at startup rather than mid-run.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::secs;
use crate::error::{PpewatchError, PpewatchResult};

/// Serde adapter storing a [`Duration`] as fractional seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let value = f64::deserialize(deserializer)?;
        crate::clock::secs(value).map_err(serde::de::Error::custom)
    }
}

/// Complete configuration consumed by the supervisor and its workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Heartbeat, restart budget and shutdown settings.
    pub supervisor: SupervisorConfig,

    /// Request queue between camera workers and the GPU worker.
    pub dispatch: DispatchConfig,

    /// Alert confirmation, suppression and delivery.
    pub alerts: AlertConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Configured cameras, one camera worker each.
    pub cameras: Vec<CameraConfig>,

    /// Equipment required for every camera that does not override it.
    pub required_ppe: Vec<String>,

    /// Equipment prompt file (positive/negative prompts and labels).
    pub prompts: Option<PathBuf>,

    /// Detector collaborator settings.
    pub detector: DetectorConfig,

    /// JSONL file receiving alert records from the built-in sink.
    pub alert_log: PathBuf,
}

/// Supervisor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// A worker silent for longer than this is lapsed.
    #[serde(with = "duration_secs")]
    pub heartbeat_timeout: Duration,

    /// How often each worker signals liveness.
    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,

    /// Restarts allowed per worker inside `restart_window`.
    pub max_restarts: u32,

    /// Sliding window for the restart budget.
    #[serde(with = "duration_secs")]
    pub restart_window: Duration,

    /// Period of the supervisor's health check.
    #[serde(with = "duration_secs")]
    pub tick_interval: Duration,

    /// How long shutdown waits for workers before force-terminating them.
    #[serde(with = "duration_secs")]
    pub shutdown_grace: Duration,
}

/// What a camera worker does when the inference queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureMode {
    /// Wait up to `submit_timeout` for queue space, then drop the frame.
    Block,
    /// Drop the frame immediately.
    Drop,
}

/// Frame dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum queued inference requests across all cameras.
    pub queue_capacity: usize,

    /// Full-queue behaviour.
    pub backpressure: BackpressureMode,

    /// Upper bound on waiting for queue space in `block` mode.
    #[serde(with = "duration_secs")]
    pub submit_timeout: Duration,

    /// Upper bound on waiting for an inference result.
    #[serde(with = "duration_secs")]
    pub inference_timeout: Duration,

    /// Consecutive detector failures after which the GPU worker exits for restart.
    pub max_consecutive_failures: u32,
}

/// Alert engine and delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Emit alert records and notifications. The engine runs either way.
    pub enable_alerts: bool,

    /// Minimum real time a violation streak must last.
    #[serde(rename = "debounce_seconds", with = "duration_secs")]
    pub debounce: Duration,

    /// Minimum consecutive frames a violation streak must last.
    pub min_consecutive_frames: u32,

    /// Idle time after which a suppressed grid cell re-arms.
    #[serde(rename = "suppression_reset_seconds", with = "duration_secs")]
    pub suppression_reset: Duration,

    /// Lifetime of a violation hash.
    #[serde(rename = "hash_ttl_seconds", with = "duration_secs")]
    pub hash_ttl: Duration,

    /// The frame is divided into `grid_size` x `grid_size` cells.
    pub grid_size: u32,

    /// Attach an image to alerts.
    pub save_alert_images: bool,

    /// Attach only the padded person crop instead of the full frame.
    pub save_crop_only: bool,

    /// Padding around the person box when cropping.
    pub crop_padding_px: u32,

    /// Offset applied to UTC timestamps in notification text.
    pub timezone_offset_hours: f64,

    /// Upper bound on a single persistence or notification call.
    #[serde(with = "duration_secs")]
    pub side_effect_timeout: Duration,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "ppewatch_runtime=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

/// One camera feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Unique camera identifier (e.g., "CAM063").
    pub id: String,

    /// Stream URI or file path handed to the capture collaborator.
    pub uri: String,

    /// Disabled cameras are skipped at startup.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum grab rate; zero grabs as fast as the source delivers.
    #[serde(default = "default_target_fps")]
    pub target_fps: u32,

    /// Frame width reported by sources that cannot detect it.
    #[serde(default = "default_width")]
    pub width: u32,

    /// Frame height reported by sources that cannot detect it.
    #[serde(default = "default_height")]
    pub height: u32,

    /// ROI definition file. Must exist when set.
    #[serde(default)]
    pub roi_path: Option<PathBuf>,

    /// Selected ROI polygon names.
    #[serde(default)]
    pub roi_polys: Vec<String>,

    /// Per-camera override of the required equipment.
    #[serde(default)]
    pub required_ppe: Option<Vec<String>>,
}

/// Detector collaborator settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Recorded detections served by the replay detector.
    pub replay: Option<PathBuf>,
}

/// Flat keys accepted at the top level of the document.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FlatOverrides {
    supervisor_heartbeat_timeout: Option<f64>,
    supervisor_max_restarts: Option<u32>,
    supervisor_restart_window: Option<f64>,
    alert_debounce_seconds: Option<f64>,
    alert_min_consecutive_frames: Option<u32>,
    alert_suppression_reset_seconds: Option<f64>,
    alert_hash_ttl_seconds: Option<f64>,
    alert_grid_size: Option<u32>,
    enable_alerts: Option<bool>,
    save_alert_images: Option<bool>,
    save_crop_only: Option<bool>,
    timezone_offset_hours: Option<f64>,
    log_file: Option<PathBuf>,
    log_level: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_target_fps() -> u32 {
    10
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            supervisor: SupervisorConfig::default(),
            dispatch: DispatchConfig::default(),
            alerts: AlertConfig::default(),
            logging: LoggingConfig::default(),
            cameras: Vec::new(),
            required_ppe: vec!["helmet".to_string(), "vest".to_string()],
            prompts: None,
            detector: DetectorConfig::default(),
            alert_log: PathBuf::from("alerts.jsonl"),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(5),
            max_restarts: 5,
            restart_window: Duration::from_secs(3600),
            tick_interval: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 8,
            backpressure: BackpressureMode::Block,
            submit_timeout: Duration::from_millis(500),
            inference_timeout: Duration::from_secs(5),
            max_consecutive_failures: 3,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enable_alerts: false,
            debounce: Duration::from_secs(15),
            min_consecutive_frames: 20,
            suppression_reset: Duration::from_secs(20),
            hash_ttl: Duration::from_secs(60),
            grid_size: 8,
            save_alert_images: true,
            save_crop_only: true,
            crop_padding_px: 20,
            timezone_offset_hours: -3.0,
            side_effect_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl CameraConfig {
    /// A camera with defaults for everything but identity and source.
    pub fn new(id: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uri: uri.into(),
            enabled: true,
            target_fps: default_target_fps(),
            width: default_width(),
            height: default_height(),
            roi_path: None,
            roi_polys: Vec::new(),
            required_ppe: None,
        }
    }
}

impl PipelineConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> PpewatchResult<Self> {
        if !path.exists() {
            return Err(PpewatchError::file_not_found(path));
        }
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml_str(&content)?;
        tracing::debug!(
            path = %path.display(),
            cameras = config.cameras.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Parse, apply flat overrides, and validate a YAML document.
    pub fn from_yaml_str(content: &str) -> PpewatchResult<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(content)?;
        let value = if value.is_null() {
            serde_yaml::Value::Mapping(Default::default())
        } else {
            value
        };
        let mut config: PipelineConfig = serde_yaml::from_value(value.clone())?;
        let flat: FlatOverrides = serde_yaml::from_value(value)?;
        config.apply_flat(flat)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_flat(&mut self, flat: FlatOverrides) -> PpewatchResult<()> {
        if let Some(v) = flat.supervisor_heartbeat_timeout {
            self.supervisor.heartbeat_timeout = secs(v)?;
        }
        if let Some(v) = flat.supervisor_max_restarts {
            self.supervisor.max_restarts = v;
        }
        if let Some(v) = flat.supervisor_restart_window {
            self.supervisor.restart_window = secs(v)?;
        }
        if let Some(v) = flat.alert_debounce_seconds {
            self.alerts.debounce = secs(v)?;
        }
        if let Some(v) = flat.alert_min_consecutive_frames {
            self.alerts.min_consecutive_frames = v;
        }
        if let Some(v) = flat.alert_suppression_reset_seconds {
            self.alerts.suppression_reset = secs(v)?;
        }
        if let Some(v) = flat.alert_hash_ttl_seconds {
            self.alerts.hash_ttl = secs(v)?;
        }
        if let Some(v) = flat.alert_grid_size {
            self.alerts.grid_size = v;
        }
        if let Some(v) = flat.enable_alerts {
            self.alerts.enable_alerts = v;
        }
        if let Some(v) = flat.save_alert_images {
            self.alerts.save_alert_images = v;
        }
        if let Some(v) = flat.save_crop_only {
            self.alerts.save_crop_only = v;
        }
        if let Some(v) = flat.timezone_offset_hours {
            self.alerts.timezone_offset_hours = v;
        }
        if let Some(v) = flat.log_file {
            self.logging.file = Some(v);
        }
        if let Some(v) = flat.log_level {
            self.logging.level = v;
        }
        Ok(())
    }

    /// Reject configurations the runtime cannot honour.
    pub fn validate(&self) -> PpewatchResult<()> {
        let sup = &self.supervisor;
        if sup.heartbeat_timeout.is_zero() {
            return Err(PpewatchError::config("supervisor.heartbeat_timeout must be positive"));
        }
        if sup.heartbeat_interval.is_zero() || sup.heartbeat_interval >= sup.heartbeat_timeout {
            return Err(PpewatchError::config(format!(
                "supervisor.heartbeat_interval ({:?}) must be positive and shorter than \
                 heartbeat_timeout ({:?})",
                sup.heartbeat_interval, sup.heartbeat_timeout
            )));
        }
        if sup.restart_window.is_zero() {
            return Err(PpewatchError::config("supervisor.restart_window must be positive"));
        }
        if sup.tick_interval.is_zero() {
            return Err(PpewatchError::config("supervisor.tick_interval must be positive"));
        }

        if self.dispatch.queue_capacity == 0 {
            return Err(PpewatchError::config("dispatch.queue_capacity must be at least 1"));
        }
        if self.dispatch.inference_timeout.is_zero() {
            return Err(PpewatchError::config("dispatch.inference_timeout must be positive"));
        }
        if self.dispatch.max_consecutive_failures == 0 {
            return Err(PpewatchError::config(
                "dispatch.max_consecutive_failures must be at least 1",
            ));
        }

        if self.alerts.grid_size == 0 {
            return Err(PpewatchError::config("alerts.grid_size must be at least 1"));
        }
        if self.alerts.min_consecutive_frames == 0 {
            return Err(PpewatchError::config(
                "alerts.min_consecutive_frames must be at least 1",
            ));
        }
        if !self.alerts.timezone_offset_hours.is_finite()
            || self.alerts.timezone_offset_hours.abs() > 24.0
        {
            return Err(PpewatchError::config(
                "alerts.timezone_offset_hours must be within [-24, 24]",
            ));
        }

        let mut seen = HashSet::new();
        for camera in &self.cameras {
            if camera.id.trim().is_empty() {
                return Err(PpewatchError::config("camera id must not be empty"));
            }
            if camera.uri.trim().is_empty() {
                return Err(PpewatchError::config(format!(
                    "camera {} has an empty uri",
                    camera.id
                )));
            }
            if !seen.insert(camera.id.as_str()) {
                return Err(PpewatchError::config(format!(
                    "duplicate camera id: {}",
                    camera.id
                )));
            }
        }
        if self.enabled_cameras().next().is_none() {
            return Err(PpewatchError::config("no enabled cameras configured"));
        }

        Ok(())
    }

    /// Cameras that should get a worker.
    pub fn enabled_cameras(&self) -> impl Iterator<Item = &CameraConfig> {
        self.cameras.iter().filter(|c| c.enabled)
    }

    /// Equipment required on the given camera.
    pub fn required_ppe_for<'a>(&'a self, camera: &'a CameraConfig) -> &'a [String] {
        camera
            .required_ppe
            .as_deref()
            .unwrap_or(self.required_ppe.as_slice())
    }
}
