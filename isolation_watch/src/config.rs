// THEORY:
// Configuration is split in two layers. `EngineConfig` is the static, typed
// description of an engine session, loaded once from TOML. `SharedSettings` holds
// the two knobs an operator can turn while a stream is live (distance threshold
// and isolation time). Each knob is a single atomic word: the control surface
// writes it, and the frame loop reads it exactly once per frame through
// `SharedSettings::snapshot`, so a change always lands on a frame boundary.

use crate::error::{Result, WatchError};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

pub const DEFAULT_DISTANCE_THRESHOLD: u32 = 200;
pub const DEFAULT_ISOLATION_TIME_SECS: f64 = 20.0;
/// Detections whose center lies this close to the left/right border are dropped.
pub const DEFAULT_EDGE_MARGIN: u32 = 40;
pub const DEFAULT_BIN_SIZE: u32 = 20;
pub const DEFAULT_RECORD_TTL_SECS: f64 = 10.0;
pub const TASKS_PER_PERSON: usize = 3;
pub const MAX_DISTANCE_THRESHOLD: u32 = 10_000;
/// Upper bound for the isolation time and the record TTL: one day.
pub const MAX_ISOLATION_TIME_SECS: f64 = 86_400.0;

const DEFAULT_TASK_POOL: [&str; 6] = [
    "Say hello to someone nearby",
    "Join a group conversation",
    "Ask someone what they are working on",
    "Introduce yourself to a new face",
    "Invite a neighbour to grab a drink",
    "Share something fun with the closest table",
];

/// Typed configuration for one engine session.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Nearest-neighbour cutoff in pixels. At or below it a person counts as engaged.
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: u32,
    /// How long a person must stay apart before `watching` escalates to `isolated`.
    #[serde(default = "default_isolation_time_secs")]
    pub isolation_time_secs: f64,
    #[serde(default = "default_edge_margin")]
    pub edge_margin: u32,
    /// Side of the square bins used to derive coarse identities.
    #[serde(default = "default_bin_size")]
    pub bin_size: u32,
    /// Records not refreshed for this long are evicted from the isolation store.
    #[serde(default = "default_record_ttl_secs")]
    pub record_ttl_secs: f64,
    #[serde(default = "default_task_pool")]
    pub task_pool: Vec<String>,
}

fn default_distance_threshold() -> u32 {
    DEFAULT_DISTANCE_THRESHOLD
}

fn default_isolation_time_secs() -> f64 {
    DEFAULT_ISOLATION_TIME_SECS
}

fn default_edge_margin() -> u32 {
    DEFAULT_EDGE_MARGIN
}

fn default_bin_size() -> u32 {
    DEFAULT_BIN_SIZE
}

fn default_record_ttl_secs() -> f64 {
    DEFAULT_RECORD_TTL_SECS
}

fn default_task_pool() -> Vec<String> {
    DEFAULT_TASK_POOL.iter().map(|t| t.to_string()).collect()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            distance_threshold: default_distance_threshold(),
            isolation_time_secs: default_isolation_time_secs(),
            edge_margin: default_edge_margin(),
            bin_size: default_bin_size(),
            record_ttl_secs: default_record_ttl_secs(),
            task_pool: default_task_pool(),
        }
    }
}

impl EngineConfig {
    /// Checks every field and returns the first problem found.
    pub fn validate(&self) -> Result<()> {
        check_distance_threshold(u64::from(self.distance_threshold))?;
        isolation_duration(self.isolation_time_secs)?;
        bounded_secs(self.record_ttl_secs).ok_or(WatchError::InvalidRecordTtl(self.record_ttl_secs))?;
        if self.bin_size == 0 {
            return Err(WatchError::InvalidBinSize);
        }

        let mut distinct = self.task_pool.clone();
        distinct.sort();
        distinct.dedup();
        if distinct.len() < TASKS_PER_PERSON {
            return Err(WatchError::TaskPoolTooSmall {
                needed: TASKS_PER_PERSON,
                found: distinct.len(),
            });
        }
        Ok(())
    }

    pub fn isolation_time(&self) -> Duration {
        Duration::try_from_secs_f64(self.isolation_time_secs).unwrap_or_default()
    }

    pub fn record_ttl(&self) -> Duration {
        Duration::try_from_secs_f64(self.record_ttl_secs).unwrap_or_default()
    }
}

fn check_distance_threshold(pixels: u64) -> Result<u32> {
    match u32::try_from(pixels) {
        Ok(px) if px <= MAX_DISTANCE_THRESHOLD => Ok(px),
        _ => Err(WatchError::InvalidDistanceThreshold(pixels)),
    }
}

/// `None` unless `seconds` is finite and within `0..=MAX_ISOLATION_TIME_SECS`.
fn bounded_secs(seconds: f64) -> Option<Duration> {
    if !(0.0..=MAX_ISOLATION_TIME_SECS).contains(&seconds) {
        return None;
    }
    Duration::try_from_secs_f64(seconds).ok()
}

fn isolation_duration(seconds: f64) -> Result<Duration> {
    bounded_secs(seconds).ok_or(WatchError::InvalidIsolationTime(seconds))
}

/// Whole nanoseconds of a bounded duration, as stored in `SharedSettings`.
fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// The values the frame loop works with for the duration of a single frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSettings {
    pub distance_threshold: u32,
    pub isolation_time: Duration,
}

/// Runtime-adjustable settings shared between the control surface and the frame loop.
#[derive(Debug)]
pub struct SharedSettings {
    distance_threshold: AtomicU32,
    isolation_time_nanos: AtomicU64,
}

impl SharedSettings {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            distance_threshold: AtomicU32::new(config.distance_threshold),
            isolation_time_nanos: AtomicU64::new(duration_nanos(config.isolation_time())),
        }
    }

    pub fn distance_threshold(&self) -> u32 {
        self.distance_threshold.load(Ordering::Acquire)
    }

    pub fn isolation_time(&self) -> Duration {
        Duration::from_nanos(self.isolation_time_nanos.load(Ordering::Acquire))
    }

    /// Validates and stores a new distance threshold, returning the stored value.
    pub fn set_distance_threshold(&self, pixels: u64) -> Result<u32> {
        let px = check_distance_threshold(pixels)?;
        self.distance_threshold.store(px, Ordering::Release);
        Ok(px)
    }

    /// Validates and stores a new isolation time, returning the stored value.
    pub fn set_isolation_time(&self, seconds: f64) -> Result<Duration> {
        let duration = isolation_duration(seconds)?;
        self.isolation_time_nanos.store(duration_nanos(duration), Ordering::Release);
        Ok(self.isolation_time())
    }

    pub fn snapshot(&self) -> FrameSettings {
        FrameSettings {
            distance_threshold: self.distance_threshold(),
            isolation_time: self.isolation_time(),
        }
    }
}

/// Camera section of the application config file.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// Device index used when no file is given.
    #[serde(default)]
    pub index: i32,
    /// Optional video file to replay instead of a live camera.
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self { index: 0, file: None, width: None, height: None }
    }
}

/// Person detector section of the application config file.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_model_path")]
    pub model_path: String,
    #[serde(default = "default_input_size")]
    pub input_size: i32,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    #[serde(default = "default_nms_iou")]
    pub nms_iou: f32,
}

fn default_model_path() -> String {
    "models/yolov8n.onnx".to_string()
}

fn default_input_size() -> i32 {
    640
}

fn default_score_threshold() -> f32 {
    0.25
}

fn default_nms_iou() -> f32 {
    0.45
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            input_size: default_input_size(),
            score_threshold: default_score_threshold(),
            nms_iou: default_nms_iou(),
        }
    }
}

/// Web server section of the application config file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_bind_addr() -> String {
    "127.0.0.1:5000".to_string()
}

fn default_jpeg_quality() -> u8 {
    80
}

impl Default for ServerSection {
    fn default() -> Self {
        Self { bind_addr: default_bind_addr(), jpeg_quality: default_jpeg_quality() }
    }
}

/// The complete on-disk configuration of the application.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub server: ServerSection,
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.engine.validate()?;
        Ok(config)
    }
}
