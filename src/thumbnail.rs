use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::codec::has_extension;
use crate::config::PipelineConfig;
use crate::gpu::{GpuContext, GpuTexture};
use crate::processor::{ProcessError, ProcessResult};
use crate::raster::RasterImage;
use crate::task::{TaskError, TaskHandle, TaskPool, TaskResult};

pub const THUMB_SIZE: u32 = 512;
pub const THUMB_WORKERS: usize = 2;

static THUMB_EXTS: &[&str] = &["jpg", "jpeg", "png"];

/// Returns `true` for files the thumbnail strip accepts.
pub fn is_thumbnail_source(path: &Path) -> bool {
    has_extension(path, THUMB_EXTS)
}

/// Decodes `source` and shrinks it so the longer edge is at most `max_size`.
pub fn generate(source: &Path, max_size: u32) -> ProcessResult<RasterImage> {
    let img = RasterImage::open(source)?;
    let longer = img.width().max(img.height());
    if longer <= max_size {
        return Ok(img);
    }
    Ok(img.resize_scale(max_size as f32 / longer as f32))
}

/// One entry in the strip. `to_edit` marks it for the next batch.
#[derive(Debug)]
pub struct Thumbnail {
    path: PathBuf,
    pub to_edit: bool,
    texture: Option<GpuTexture>,
    failed: bool,
    task: Option<TaskHandle<ProcessResult<RasterImage>>>,
}

impl Thumbnail {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn texture(&self) -> Option<&GpuTexture> {
        self.texture.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.task.is_some()
    }

    pub fn failed(&self) -> bool {
        self.failed
    }
}

/// Outcome of [`ThumbnailLoader::clear`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClearReport {
    pub removed: usize,
    pub cancelled: usize,
    pub failed: usize,
}

/// Loads bounded previews on a small pool and uploads them on the owning
/// thread, one [`ThumbnailLoader::update`] at a time.
pub struct ThumbnailLoader {
    context: GpuContext,
    pool: TaskPool,
    max_size: u32,
    items: BTreeMap<PathBuf, Thumbnail>,
}

impl ThumbnailLoader {
    pub fn new(context: GpuContext) -> TaskResult<Self> {
        Self::with_limits(context, THUMB_WORKERS, THUMB_SIZE)
    }

    pub fn with_limits(context: GpuContext, workers: usize, max_size: u32) -> TaskResult<Self> {
        Ok(Self {
            context,
            pool: TaskPool::new("thumbnail", workers)?,
            max_size: max_size.max(1),
            items: BTreeMap::new(),
        })
    }

    /// Worker count and size bound from `thumbnail_workers` and
    /// `thumbnail_max_size`.
    pub fn from_config(context: GpuContext, config: &PipelineConfig) -> TaskResult<Self> {
        Self::with_limits(context, config.thumbnail_workers(), config.thumbnail_max_size())
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    pub fn workers(&self) -> usize {
        self.pool.threads()
    }

    /// Queues every accepted file; directories contribute their direct
    /// children. Paths already present are skipped. Returns how many were
    /// queued.
    pub fn enqueue<P: AsRef<Path>>(&mut self, paths: impl IntoIterator<Item = P>) -> usize {
        let mut queued = 0;
        for path in paths {
            let path = path.as_ref();
            if path.is_dir() {
                for file in list_dir(path) {
                    queued += usize::from(self.enqueue_file(file));
                }
            } else if is_thumbnail_source(path) {
                queued += usize::from(self.enqueue_file(path.to_path_buf()));
            }
        }
        queued
    }

    fn enqueue_file(&mut self, path: PathBuf) -> bool {
        if self.items.contains_key(&path) {
            return false;
        }
        let source = path.clone();
        let max_size = self.max_size;
        let task = self
            .pool
            .spawn(move |token| -> ProcessResult<RasterImage> {
                token.check()?;
                generate(&source, max_size)
            });
        self.items.insert(
            path.clone(),
            Thumbnail {
                path,
                to_edit: true,
                texture: None,
                failed: false,
                task: Some(task),
            },
        );
        true
    }

    /// Uploads every finished thumbnail. Returns how many became visible.
    pub fn update(&mut self) -> usize {
        let mut uploaded = 0;
        for item in self.items.values_mut() {
            let Some(task) = item.task.take_if(|t| t.is_ready()) else {
                continue;
            };
            let texture = task
                .get()
                .map_err(ProcessError::from)
                .and_then(|img| img)
                .and_then(|img| Ok(self.context.create_texture(&img)?));
            match texture {
                Ok(texture) => {
                    item.texture = Some(texture);
                    uploaded += 1;
                }
                Err(err) => {
                    tracing::warn!(path = %item.path.display(), "thumbnail failed: {err}");
                    item.failed = true;
                }
            }
        }
        uploaded
    }

    /// Cancels every outstanding load, waits for all of them and drops all
    /// entries.
    pub fn clear(&mut self) -> ClearReport {
        for task in self.items.values().filter_map(|item| item.task.as_ref()) {
            task.cancel();
        }
        let mut report = ClearReport {
            removed: self.items.len(),
            ..ClearReport::default()
        };
        for (path, item) in std::mem::take(&mut self.items) {
            let Some(task) = item.task else {
                continue;
            };
            match task.get() {
                Ok(Ok(_)) => {}
                Err(TaskError::Cancelled) | Ok(Err(ProcessError::Task(TaskError::Cancelled))) => {
                    report.cancelled += 1;
                }
                Ok(Err(err)) => {
                    tracing::warn!(path = %path.display(), "thumbnail failed during clear: {err}");
                    report.failed += 1;
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), "thumbnail failed during clear: {err}");
                    report.failed += 1;
                }
            }
        }
        tracing::debug!(?report, "thumbnails cleared");
        report
    }

    pub fn get(&self, path: &Path) -> Option<&Thumbnail> {
        self.items.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Thumbnail> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Loads still running.
    pub fn pending(&self) -> usize {
        self.items.values().filter(|i| i.task.is_some()).count()
    }

    pub fn set_to_edit(&mut self, path: &Path, to_edit: bool) -> bool {
        match self.items.get_mut(path) {
            Some(item) => {
                item.to_edit = to_edit;
                true
            }
            None => false,
        }
    }

    pub fn selected_files(&self) -> Vec<PathBuf> {
        self.items
            .values()
            .filter(|i| i.to_edit)
            .map(|i| i.path.clone())
            .collect()
    }
}

impl Drop for ThumbnailLoader {
    fn drop(&mut self) {
        for task in self.items.values().filter_map(|item| item.task.as_ref()) {
            task.cancel();
        }
    }
}

fn list_dir(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(dir = %dir.display(), "cannot list directory: {err}");
            return Vec::new();
        }
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_thumbnail_source(p))
        .collect();
    files.sort();
    files
}
