use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::codec::{is_raw_image, save_image};
use crate::filter::{FilterChain, apply_chains};
use crate::gpu::GpuContext;
use crate::processing::enhance::auto_enhance_checked;
use crate::processor::{ImageProcessor, ProcessError, ProcessResult};
use crate::raster::RasterImage;
use crate::task::{TaskError, TaskHandle, TaskPool};

pub const DEFAULT_JPEG_QUALITY: u8 = 95;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchOptions {
    pub enhance_workers: usize,
    pub save_workers: usize,
    pub jpeg_quality: u8,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            enhance_workers: default_enhance_workers(),
            save_workers: 2,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// A quarter of the cores, but never fewer than three workers.
pub fn default_enhance_workers() -> usize {
    let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
    (cores / 4).max(3)
}

struct Pending {
    output: PathBuf,
    task: TaskHandle<ProcessResult<RasterImage>>,
}

/// Applies one processor's configuration to many files at full resolution
/// and writes the results into a directory.
///
/// Drive it by calling [`BatchExecutor::update`] once per tick until
/// [`BatchExecutor::completed`]. Items finish in no particular order.
pub struct BatchExecutor {
    context: GpuContext,
    chains: Vec<FilterChain>,
    jpeg_quality: u8,
    save_pool: TaskPool,
    enhancing: BTreeMap<String, Pending>,
    saving: Vec<(PathBuf, TaskHandle<ProcessResult<()>>)>,
    total: usize,
    completed: usize,
    failed: usize,
}

impl BatchExecutor {
    pub fn run(
        processor: &ImageProcessor,
        files: &[PathBuf],
        save_dir: &Path,
    ) -> ProcessResult<Self> {
        Self::run_with(processor, files, save_dir, &BatchOptions::default())
    }

    /// Creates `save_dir`, snapshots the processor's chains and starts
    /// enhancing every existing file. Files sharing a name are enqueued once.
    pub fn run_with(
        processor: &ImageProcessor,
        files: &[PathBuf],
        save_dir: &Path,
        options: &BatchOptions,
    ) -> ProcessResult<Self> {
        std::fs::create_dir_all(save_dir)?;
        let enhance_pool = TaskPool::new("batch-enhance", options.enhance_workers)?;
        let save_pool = TaskPool::new("batch-save", options.save_workers)?;
        let flags = processor.fx_flags();

        let mut enhancing = BTreeMap::new();
        for file in files {
            let Some(name) = file.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            if enhancing.contains_key(&name) {
                tracing::debug!(file = %file.display(), "duplicate file name skipped");
                continue;
            }
            if !file.is_file() {
                tracing::warn!(file = %file.display(), "skipping missing file");
                continue;
            }
            let source = file.clone();
            let task = enhance_pool.spawn(move |token| -> ProcessResult<RasterImage> {
                let image = RasterImage::open(&source)?;
                token.check()?;
                Ok(auto_enhance_checked(&image, flags, token)?)
            });
            let output = output_path(save_dir, file, &name);
            enhancing.insert(name, Pending { output, task });
        }

        let total = enhancing.len();
        tracing::info!(total, dir = %save_dir.display(), "batch started");
        Ok(Self {
            context: processor.context().clone(),
            chains: processor.export_filter_snapshot(),
            jpeg_quality: options.jpeg_quality,
            save_pool,
            enhancing,
            saving: Vec::new(),
            total,
            completed: 0,
            failed: 0,
        })
    }

    /// Renders at most one finished enhancement, then collects every
    /// finished save. Never blocks on unfinished work.
    pub fn update(&mut self) {
        let ready = self
            .enhancing
            .iter_mut()
            .find_map(|(name, pending)| pending.task.is_ready().then(|| name.clone()));
        if let Some(pending) = ready.and_then(|name| self.enhancing.remove(&name)) {
            let output = pending.output;
            let rendered = pending
                .task
                .get()
                .map_err(ProcessError::from)
                .and_then(|enhanced| enhanced)
                .and_then(|enhanced| self.render(&enhanced));
            match rendered {
                Ok(image) => {
                    let quality = self.jpeg_quality;
                    let path = output.clone();
                    let task = self.save_pool.spawn(move |_| -> ProcessResult<()> {
                        Ok(save_image(&image, &path, quality)?)
                    });
                    self.saving.push((output, task));
                }
                Err(err) => {
                    tracing::error!(output = %output.display(), "batch item failed: {err}");
                    self.finish(false);
                }
            }
        }

        let mut i = 0;
        while i < self.saving.len() {
            if !self.saving[i].1.is_ready() {
                i += 1;
                continue;
            }
            let (output, task) = self.saving.swap_remove(i);
            match task.get().map_err(ProcessError::from).and_then(|saved| saved) {
                Ok(()) => {
                    tracing::debug!(output = %output.display(), "saved");
                    self.finish(true);
                }
                Err(err) => {
                    tracing::error!(output = %output.display(), "failed to save: {err}");
                    self.finish(false);
                }
            }
        }
    }

    fn render(&mut self, image: &RasterImage) -> ProcessResult<RasterImage> {
        let input = self.context.create_texture(image)?;
        let output = apply_chains(self.chains.iter_mut(), &input)?;
        Ok(self.context.read_raster(&output)?)
    }

    fn finish(&mut self, ok: bool) {
        self.completed += 1;
        if !ok {
            self.failed += 1;
        }
    }

    pub fn completed(&self) -> bool {
        self.completed == self.total
    }

    /// 100 for an empty batch.
    pub fn percentage_completed(&self) -> f32 {
        if self.total == 0 {
            return 100.0;
        }
        100.0 * self.completed as f32 / self.total as f32
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed_count(&self) -> usize {
        self.completed
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Items still waiting for enhancement.
    pub fn pending(&self) -> usize {
        self.enhancing.len()
    }

    /// Stops the batch. Items still enhancing are cancelled and counted as
    /// failed; saves already started are waited for so no output is left
    /// half written. Returns how many items were cancelled.
    pub fn cancel(&mut self) -> usize {
        for pending in self.enhancing.values() {
            pending.task.cancel();
        }
        let cancelled = self.enhancing.len();
        for (name, pending) in std::mem::take(&mut self.enhancing) {
            if let Ok(Err(err)) = pending.task.get() {
                if !matches!(err, ProcessError::Task(TaskError::Cancelled)) {
                    tracing::debug!(file = %name, "enhancement failed while cancelling: {err}");
                }
            }
            self.finish(false);
        }
        for (output, task) in std::mem::take(&mut self.saving) {
            match task.get().map_err(ProcessError::from).and_then(|saved| saved) {
                Ok(()) => self.finish(true),
                Err(err) => {
                    tracing::error!(output = %output.display(), "failed to save: {err}");
                    self.finish(false);
                }
            }
        }
        if cancelled > 0 {
            tracing::info!(cancelled, "batch cancelled");
        }
        cancelled
    }
}

impl Drop for BatchExecutor {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for BatchExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchExecutor")
            .field("total", &self.total)
            .field("completed", &self.completed)
            .field("failed", &self.failed)
            .field("enhancing", &self.enhancing.len())
            .field("saving", &self.saving.len())
            .finish()
    }
}

/// RAW sources are written as JPEG; everything else keeps its name.
fn output_path(save_dir: &Path, source: &Path, name: &str) -> PathBuf {
    let out = save_dir.join(name);
    if is_raw_image(source) {
        out.with_extension("jpg")
    } else {
        out
    }
}
