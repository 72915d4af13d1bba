use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_OUTPUT_DIR: &str = "edgeview-out";
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_CAMERA_DEVICE: &str = "stub://camera";
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 15;

#[derive(Debug, Deserialize, Default)]
struct EdgeviewConfigFile {
    output_dir: Option<PathBuf>,
    log_filter: Option<String>,
    camera: Option<CameraConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

/// Runtime configuration for the `edgeview` binary.
///
/// Processing thresholds and video sampling are fixed and do not appear here.
#[derive(Debug, Clone)]
pub struct EdgeviewConfig {
    pub output_dir: PathBuf,
    pub log_filter: String,
    pub camera: CameraConfig,
}

#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl EdgeviewConfig {
    /// File named by `EDGEVIEW_CONFIG` (if any), then `EDGEVIEW_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("EDGEVIEW_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: EdgeviewConfigFile) -> Self {
        let camera = file.camera.unwrap_or_default();
        Self {
            output_dir: file
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            log_filter: file
                .log_filter
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            camera: CameraConfig {
                device: camera
                    .device
                    .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("EDGEVIEW_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(filter) = std::env::var("EDGEVIEW_LOG") {
            if !filter.trim().is_empty() {
                self.log_filter = filter;
            }
        }
        if let Ok(device) = std::env::var("EDGEVIEW_CAMERA_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Some(width) = env_u32("EDGEVIEW_CAMERA_WIDTH")? {
            self.camera.width = width;
        }
        if let Some(height) = env_u32("EDGEVIEW_CAMERA_HEIGHT")? {
            self.camera.height = height;
        }
        if let Some(fps) = env_u32("EDGEVIEW_CAMERA_FPS")? {
            self.camera.target_fps = fps;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.camera.device.trim().is_empty() {
            return Err(anyhow!("camera device must not be empty"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!(
                "camera size must be positive, got {}x{}",
                self.camera.width,
                self.camera.height
            ));
        }
        if self.camera.target_fps == 0 {
            return Err(anyhow!("camera target_fps must be greater than zero"));
        }
        Ok(())
    }
}

fn env_u32(key: &str) -> Result<Option<u32>> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{key} must be a non-negative integer")),
        _ => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<EdgeviewConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
