use serde::Deserialize;
use std::fs;

use crate::pool::TrackerKind;

fn default_redetect_interval() -> u32 {
    30
}

fn default_tracker() -> TrackerKind {
    TrackerKind::Kcf
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub model_path: String,
    pub device: String,
    pub input_size: [i32; 2],
    pub conf_threshold: f32,
    pub nms_threshold: f32,
    /// Frames between forced redetection passes.
    #[serde(default = "default_redetect_interval")]
    pub redetect_interval: u32,
    /// Algorithm bound to objects found on cold start.
    #[serde(default = "default_tracker")]
    pub default_tracker: TrackerKind,
}

impl Config {
    /// Load from a JSON file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let cfg: Config = serde_json::from_str(&data)?;
        Ok(cfg)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            model_path: String::from("weights/face_detector.torchscript"),
            device: String::from("cpu"),
            input_size: [640, 640],
            conf_threshold: 0.5,
            nms_threshold: 0.45,
            redetect_interval: default_redetect_interval(),
            default_tracker: default_tracker(),
        }
    }
}
