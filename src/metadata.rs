use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    pub window: u32,
    pub width: u32,
    pub height: u32,
    pub frames_requested: u32,
    pub frames_captured: u32,
    pub temporary_errors: u32,
    pub permanent_errors: u32,
    /// Wall time of all capture calls
    pub elapsed_ms: u64,
}

impl CaptureMetadata {
    pub fn new(window: u32, frames_requested: u32) -> Self {
        Self {
            window,
            frames_requested,
            ..Self::default()
        }
    }

    pub fn average_frame_ms(&self) -> Option<f64> {
        (self.frames_captured > 0).then(|| self.elapsed_ms as f64 / self.frames_captured as f64)
    }

    pub fn save(&self, image_path: &Path) -> Result<()> {
        let metadata_path = metadata_path_for_image(image_path);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&metadata_path, json)
            .with_context(|| format!("Failed to write metadata to {:?}", metadata_path))?;
        Ok(())
    }
}

/// Same name as the image with a .json extension
pub fn metadata_path_for_image(image_path: &Path) -> PathBuf {
    image_path.with_extension("json")
}
