use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::executor::{BatchOptions, DEFAULT_JPEG_QUALITY, default_enhance_workers};
use crate::gpu::BackendPreference;
use crate::processing::enhance::FxFlags;
use crate::processor::PREVIEW_MAX;
use crate::thumbnail::{THUMB_SIZE, THUMB_WORKERS};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
/// Persisted pipeline settings for photofx. Every field is optional.
pub struct PipelineConfig {
    pub backend: Option<String>,
    pub fx_flags: Option<String>,
    pub jpeg_quality: Option<u8>,
    pub enhance_workers: Option<usize>,
    pub save_workers: Option<usize>,
    pub thumbnail_workers: Option<usize>,
    pub thumbnail_max_size: Option<u32>,
    pub preview_max: Option<[u32; 2]>,
}

impl PipelineConfig {
    /// Returns the user config file path, if a config directory is available.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("photofx").join("config.toml"))
    }

    /// Loads config from disk, falling back to defaults on any error.
    pub fn load() -> Self {
        Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Self {
        let Ok(contents) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match toml::from_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(path = %path.display(), "ignoring invalid config: {err}");
                Self::default()
            }
        }
    }

    /// Writes config to disk, ignoring filesystem/serialization errors.
    pub fn save(&self) {
        if let Some(path) = Self::config_path() {
            self.save_to(&path);
        }
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(s) = toml::to_string_pretty(self) {
            let _ = std::fs::write(path, s);
        }
    }

    pub fn backend(&self) -> BackendPreference {
        self.backend
            .as_deref()
            .map(BackendPreference::parse)
            .unwrap_or_default()
    }

    pub fn fx_flags(&self) -> FxFlags {
        let Some(raw) = self.fx_flags.as_deref() else {
            return FxFlags::default();
        };
        FxFlags::parse(raw).unwrap_or_else(|| {
            tracing::warn!(fx_flags = raw, "unknown auto-enhance flags; using defaults");
            FxFlags::default()
        })
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            enhance_workers: self
                .enhance_workers
                .unwrap_or_else(default_enhance_workers)
                .max(1),
            save_workers: self.save_workers.unwrap_or(2).max(1),
            jpeg_quality: self.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY).clamp(1, 100),
        }
    }

    pub fn thumbnail_workers(&self) -> usize {
        self.thumbnail_workers.unwrap_or(THUMB_WORKERS).max(1)
    }

    pub fn thumbnail_max_size(&self) -> u32 {
        self.thumbnail_max_size.unwrap_or(THUMB_SIZE).max(1)
    }

    pub fn preview_max(&self) -> (u32, u32) {
        self.preview_max.map_or(PREVIEW_MAX, |[w, h]| (w.max(1), h.max(1)))
    }
}
