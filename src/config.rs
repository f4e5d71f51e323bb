use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dedup::DEFAULT_IOU_THRESHOLD;
use crate::pipeline::{
    PipelineSettings, DEFAULT_FRAME_SKIP, IMAGE_SIZE, VIDEO_HEIGHT, VIDEO_WIDTH,
};

const DEFAULT_API_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_PUBLIC_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;
const DEFAULT_OUTPUT_SUBDIR: &str = "roadscan-output";
const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_CLASS_NAMES: [&str; 3] = ["pothole", "plastic", "otherlitter"];

#[derive(Debug, Deserialize, Default)]
struct ServiceConfigFile {
    output_dir: Option<PathBuf>,
    font_path: Option<PathBuf>,
    api: Option<ApiConfigFile>,
    model: Option<ModelConfigFile>,
    detection: Option<DetectionConfigFile>,
    video: Option<VideoConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    public_url: Option<String>,
    max_upload_bytes: Option<usize>,
    read_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    class_names: Option<Vec<String>>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    default_confidence: Option<f32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct VideoConfigFile {
    frame_skip: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub api_addr: String,
    pub public_url: String,
    pub max_upload_bytes: usize,
    pub read_timeout: Duration,
    pub output_dir: PathBuf,
    pub font_path: Option<PathBuf>,
    pub model: ModelSettings,
    pub default_confidence: f32,
    pub iou_threshold: f32,
    pub video: VideoSettings,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub path: Option<PathBuf>,
    pub class_names: Vec<String>,
    pub input_size: u32,
}

#[derive(Debug, Clone)]
pub struct VideoSettings {
    pub frame_skip: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_file(ServiceConfigFile::default())
    }
}

impl ServiceConfig {
    /// Load from `ROADSCAN_CONFIG` (JSON, or TOML by extension), then apply
    /// `ROADSCAN_*` env overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ROADSCAN_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServiceConfigFile) -> Self {
        let api = file.api.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let video = file.video.unwrap_or_default();
        Self {
            api_addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            public_url: api
                .public_url
                .unwrap_or_else(|| DEFAULT_PUBLIC_URL.to_string()),
            max_upload_bytes: api.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            read_timeout: Duration::from_secs(
                api.read_timeout_secs.unwrap_or(DEFAULT_READ_TIMEOUT_SECS),
            ),
            output_dir: file
                .output_dir
                .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_OUTPUT_SUBDIR)),
            font_path: file.font_path,
            model: ModelSettings {
                path: model.path,
                class_names: model.class_names.unwrap_or_else(|| {
                    DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect()
                }),
                input_size: model.input_size.unwrap_or(IMAGE_SIZE),
            },
            default_confidence: detection.default_confidence.unwrap_or(DEFAULT_CONFIDENCE),
            iou_threshold: detection.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
            video: VideoSettings {
                frame_skip: video.frame_skip.unwrap_or(DEFAULT_FRAME_SKIP),
                width: video.width.unwrap_or(VIDEO_WIDTH),
                height: video.height.unwrap_or(VIDEO_HEIGHT),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("ROADSCAN_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(url) = std::env::var("ROADSCAN_PUBLIC_URL") {
            if !url.trim().is_empty() {
                self.public_url = url;
            }
        }
        if let Ok(dir) = std::env::var("ROADSCAN_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(path) = std::env::var("ROADSCAN_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.model.path = Some(PathBuf::from(path));
            }
        }
        if let Ok(path) = std::env::var("ROADSCAN_FONT_PATH") {
            if !path.trim().is_empty() {
                self.font_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(bytes) = std::env::var("ROADSCAN_MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = bytes
                .trim()
                .parse()
                .map_err(|_| anyhow!("ROADSCAN_MAX_UPLOAD_BYTES must be an integer byte count"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.default_confidence) {
            return Err(anyhow!("detection.default_confidence must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(anyhow!("detection.iou_threshold must be within [0, 1]"));
        }
        if self.video.frame_skip == 0 {
            return Err(anyhow!("video.frame_skip must be >= 1"));
        }
        for (name, value) in [("width", self.video.width), ("height", self.video.height)] {
            if value == 0 || value % 2 != 0 {
                return Err(anyhow!("video.{} must be a positive even number", name));
            }
        }
        if self.model.class_names.is_empty() {
            return Err(anyhow!("model.class_names must not be empty"));
        }
        if self.model.input_size == 0 {
            return Err(anyhow!("model.input_size must be > 0"));
        }
        if self.max_upload_bytes == 0 {
            return Err(anyhow!("api.max_upload_bytes must be > 0"));
        }
        Ok(())
    }

    /// Pipeline settings for a request at `confidence`.
    pub fn pipeline_settings(&self, confidence: f32) -> PipelineSettings {
        PipelineSettings {
            confidence,
            iou_threshold: self.iou_threshold,
            image_size: IMAGE_SIZE,
            video_width: self.video.width,
            video_height: self.video.height,
            frame_skip: self.video.frame_skip,
        }
    }
}

fn read_config_file(path: &Path) -> Result<ServiceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ServiceConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.api_addr, "127.0.0.1:8000");
        assert_eq!(cfg.iou_threshold, 0.4);
        assert_eq!(cfg.video.frame_skip, 2);
        assert_eq!((cfg.video.width, cfg.video.height), (640, 368));
        assert_eq!(cfg.model.class_names, vec!["pothole", "plastic", "otherlitter"]);
    }

    #[test]
    fn rejects_bad_values() {
        let mut cfg = ServiceConfig::default();
        cfg.iou_threshold = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = ServiceConfig::default();
        cfg.video.frame_skip = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = ServiceConfig::default();
        cfg.video.height = 367;
        assert!(cfg.validate().is_err());

        let mut cfg = ServiceConfig::default();
        cfg.model.class_names.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn pipeline_settings_follow_config() {
        let mut cfg = ServiceConfig::default();
        cfg.video.frame_skip = 3;
        let settings = cfg.pipeline_settings(0.25);
        assert_eq!(settings.confidence, 0.25);
        assert_eq!(settings.frame_skip, 3);
        assert_eq!(settings.iou_threshold, DEFAULT_IOU_THRESHOLD);
    }
}
