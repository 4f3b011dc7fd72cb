use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::annotate::DEFAULT_JPEG_QUALITY;
use crate::classify::{ChannelOrder, InputLayout, InputSpec};
use crate::frame::DEFAULT_HUB_CAPACITY;
use crate::ingest::CameraConfig;

const DEFAULT_DB_PATH: &str = "products.db";
const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_CAMERA: &str = "/dev/video0";
const DEFAULT_CAMERA_FPS: u32 = 10;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
/// The tract backend always loads this file from the working directory.
pub const MODEL_PATH: &str = "model.onnx";
const DEFAULT_INPUT_SIZE: u32 = 224;

#[derive(Debug, Deserialize, Default)]
struct ScannerConfigFile {
    db_path: Option<String>,
    http_addr: Option<String>,
    camera: Option<CameraConfigFile>,
    model: Option<ModelConfigFile>,
    detection: Option<DetectionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    backend: Option<BackendKind>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    layout: Option<InputLayout>,
    channel_order: Option<ChannelOrder>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    jpeg_quality: Option<u8>,
    frame_interval_ms: Option<u64>,
    hub_capacity: Option<usize>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// ONNX model through tract (feature: backend-tract, on by default).
    #[default]
    Tract,
    /// Color-prototype classifier; needs no model file. Only used when
    /// selected explicitly.
    Cpu,
}

impl std::str::FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(BackendKind::Cpu),
            "tract" => Ok(BackendKind::Tract),
            other => Err(anyhow!("unknown model backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub db_path: String,
    pub http_addr: String,
    pub camera: CameraConfig,
    pub model: ModelSettings,
    pub detection: DetectionSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub backend: BackendKind,
    /// Always `MODEL_PATH`; not settable from the file or environment.
    pub path: PathBuf,
    pub input_width: u32,
    pub input_height: u32,
    pub layout: InputLayout,
    pub channel_order: ChannelOrder,
}

impl ModelSettings {
    pub fn input_spec(&self) -> InputSpec {
        InputSpec {
            width: self.input_width,
            height: self.input_height,
            layout: self.layout,
            channel_order: self.channel_order,
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            path: PathBuf::from(MODEL_PATH),
            input_width: DEFAULT_INPUT_SIZE,
            input_height: DEFAULT_INPUT_SIZE,
            layout: InputLayout::default(),
            channel_order: ChannelOrder::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSettings {
    pub jpeg_quality: u8,
    /// Minimum spacing between frames; zero reads as fast as the source allows.
    pub frame_interval: Duration,
    pub hub_capacity: usize,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            frame_interval: Duration::ZERO,
            hub_capacity: DEFAULT_HUB_CAPACITY,
        }
    }
}

impl ScannerConfig {
    /// Loads the file named by `SCANNER_CONFIG` (if set), then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SCANNER_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ScannerConfigFile) -> Result<Self> {
        let camera = file.camera.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let defaults = DetectionSettings::default();

        Ok(Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            http_addr: file
                .http_addr
                .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string()),
            camera: CameraConfig {
                device: camera.device.unwrap_or_else(|| DEFAULT_CAMERA.to_string()),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
            },
            model: ModelSettings {
                backend: model.backend.unwrap_or_default(),
                path: PathBuf::from(MODEL_PATH),
                input_width: model.input_width.unwrap_or(DEFAULT_INPUT_SIZE),
                input_height: model.input_height.unwrap_or(DEFAULT_INPUT_SIZE),
                layout: model.layout.unwrap_or_default(),
                channel_order: model.channel_order.unwrap_or_default(),
            },
            detection: DetectionSettings {
                jpeg_quality: detection.jpeg_quality.unwrap_or(defaults.jpeg_quality),
                frame_interval: detection
                    .frame_interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.frame_interval),
                hub_capacity: detection.hub_capacity.unwrap_or(defaults.hub_capacity),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = non_empty_env("SCANNER_DB_PATH") {
            self.db_path = path;
        }
        if let Some(addr) = non_empty_env("SCANNER_HTTP_ADDR") {
            self.http_addr = addr;
        }
        if let Some(device) = non_empty_env("SCANNER_CAMERA") {
            self.camera.device = device;
        }
        if let Some(backend) = non_empty_env("SCANNER_BACKEND") {
            self.model.backend = backend.parse()?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.detection.jpeg_quality == 0 || self.detection.jpeg_quality > 100 {
            return Err(anyhow!("jpeg_quality must be between 1 and 100"));
        }
        if self.detection.hub_capacity == 0 {
            return Err(anyhow!("hub_capacity must be greater than zero"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera frame size must be non-zero"));
        }
        if self.model.input_width == 0 || self.model.input_height == 0 {
            return Err(anyhow!("model input size must be non-zero"));
        }
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<ScannerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
