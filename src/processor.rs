use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::filter::{FilterChain, FilterData, FilterId, apply_chains};
use crate::gpu::{GpuContext, GpuError, GpuResult, GpuTexture};
use crate::processing::enhance::{FxFlags, auto_enhance_checked};
use crate::raster::{ImageError, RasterImage};
use crate::settings::{ImageSetting, SettingChains};
use crate::task::{TaskError, TaskHandle, TaskPool};

/// Largest preview the processor enhances; bigger sources are reduced first.
pub const PREVIEW_MAX: (u32, u32) = (1920, 1080);

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ProcessResult<T> = Result<T, ProcessError>;

struct Loaded {
    original: Arc<RasterImage>,
    enhanced: RasterImage,
}

/// Editing state for one photo: background decode and auto-enhance, then
/// settings followed by the active effects on the GPU context.
///
/// Every GPU operation happens on the thread that owns the processor; pooled
/// jobs only ever see CPU images.
pub struct ImageProcessor {
    context: GpuContext,
    pool: TaskPool,
    preview_max: (u32, u32),
    fx_flags: FxFlags,
    settings: SettingChains,
    effects: Vec<FilterData>,
    task: Option<TaskHandle<ProcessResult<Loaded>>>,
    source_path: Option<PathBuf>,
    original: Option<Arc<RasterImage>>,
    enhanced: Option<Arc<RasterImage>>,
    original_texture: Option<GpuTexture>,
    pre_filter: Option<GpuTexture>,
    processed: Option<GpuTexture>,
    load_error: Option<ProcessError>,
}

impl ImageProcessor {
    pub fn new(context: GpuContext, pool: TaskPool) -> GpuResult<Self> {
        let settings = SettingChains::new(&context)?;
        Ok(Self {
            context,
            pool,
            preview_max: PREVIEW_MAX,
            fx_flags: FxFlags::default(),
            settings,
            effects: Vec::new(),
            task: None,
            source_path: None,
            original: None,
            enhanced: None,
            original_texture: None,
            pre_filter: None,
            processed: None,
            load_error: None,
        })
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    /// Applies to loads started after this call.
    pub fn set_preview_bound(&mut self, max_width: u32, max_height: u32) {
        self.preview_max = (max_width.max(1), max_height.max(1));
    }

    /// Starts decoding `path` in the background. Returns `false`, leaving the
    /// current image untouched, when the path does not exist.
    pub fn load_image(&mut self, path: &Path) -> bool {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "image does not exist");
            return false;
        }
        self.source_path = Some(path.to_path_buf());
        self.original = None;
        self.spawn_load();
        true
    }

    /// Polls the background task. The first poll that sees it finish uploads
    /// the result and renders the filters. Returns `true` once nothing is in
    /// flight.
    pub fn is_load_image_completed(&mut self) -> bool {
        if let Some(handle) = self.task.take_if(|t| t.is_ready()) {
            let outcome = handle
                .get()
                .map_err(ProcessError::from)
                .and_then(|loaded| loaded)
                .and_then(|loaded| self.install(loaded));
            if let Err(err) = outcome {
                tracing::error!(
                    path = ?self.source_path,
                    "failed to load image: {err}"
                );
                self.clear_textures();
                self.load_error = Some(err);
            }
        }
        self.task.is_none()
    }

    pub fn is_loading(&self) -> bool {
        self.task.is_some()
    }

    pub fn load_error(&self) -> Option<&ProcessError> {
        self.load_error.as_ref()
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    pub fn fx_flags(&self) -> FxFlags {
        self.fx_flags
    }

    /// Re-runs auto-enhance with `flags` against the decoded original.
    /// Returns `false` when the flags are unchanged.
    pub fn set_fx_flags(&mut self, flags: FxFlags) -> bool {
        if flags == self.fx_flags {
            return false;
        }
        self.fx_flags = flags;
        if self.source_path.is_some() {
            self.spawn_load();
        }
        true
    }

    /// Stores the clamped value and, when an image is loaded, re-renders.
    /// Returns whether a re-render happened.
    pub fn set_image_setting(&mut self, setting: ImageSetting, value: f32) -> GpuResult<bool> {
        self.settings.set(setting, value);
        self.reprocess()
    }

    pub fn image_setting(&self, setting: ImageSetting) -> f32 {
        self.settings.get(setting)
    }

    /// Inclusive `(min, max)` that [`set_image_setting`](Self::set_image_setting)
    /// clamps to.
    pub fn image_setting_range(&self, setting: ImageSetting) -> (f32, f32) {
        setting.range()
    }

    pub fn reset_settings(&mut self) -> GpuResult<bool> {
        self.settings.reset();
        self.reprocess()
    }

    pub fn settings(&self) -> &SettingChains {
        &self.settings
    }

    /// Appends an effect after the existing ones.
    pub fn add_image_filter(&mut self, filter: FilterData) -> GpuResult<FilterId> {
        let id = filter.id();
        self.effects.push(filter);
        self.reprocess()?;
        Ok(id)
    }

    /// Removes the first entry with `id`. A cloned entry added twice shares
    /// its id, so each call removes one of them.
    pub fn remove_image_filter(&mut self, id: FilterId) -> GpuResult<bool> {
        let Some(index) = self.effects.iter().position(|f| f.id() == id) else {
            return Ok(false);
        };
        self.effects.remove(index);
        self.reprocess()?;
        Ok(true)
    }

    /// Replaces the whole effect list, keeping the given order.
    pub fn set_image_filters(&mut self, filters: Vec<FilterData>) -> GpuResult<()> {
        self.effects = filters;
        self.reprocess().map(|_| ())
    }

    pub fn image_filters(&self) -> &[FilterData] {
        &self.effects
    }

    /// Edits one effect in place (parameters or `active`) and re-renders.
    pub fn update_image_filter(
        &mut self,
        id: FilterId,
        edit: impl FnOnce(&mut FilterData),
    ) -> GpuResult<bool> {
        let Some(filter) = self.effects.iter_mut().find(|f| f.id() == id) else {
            return Ok(false);
        };
        edit(filter);
        self.reprocess()?;
        Ok(true)
    }

    /// Width of the full-resolution decode, 0 until it is known.
    pub fn image_width(&self) -> u32 {
        self.original.as_ref().map_or(0, |img| img.width())
    }

    pub fn image_height(&self) -> u32 {
        self.original.as_ref().map_or(0, |img| img.height())
    }

    pub fn processed_texture(&self) -> Option<&GpuTexture> {
        self.processed.as_ref()
    }

    /// Unenhanced source at the preview size, for before/after views.
    pub fn original_texture(&self) -> Option<&GpuTexture> {
        self.original_texture.as_ref()
    }

    /// Setting chains then active effect chains, in render order.
    pub fn export_filter_snapshot(&self) -> Vec<FilterChain> {
        self.settings
            .chains()
            .iter()
            .cloned()
            .chain(
                self.effects
                    .iter()
                    .filter(|f| f.active)
                    .map(|f| f.chain.clone()),
            )
            .collect()
    }

    /// Independent copy with its own chains and textures. An in-flight load
    /// is restarted for the copy.
    pub fn try_clone(&self) -> ProcessResult<Self> {
        let mut out = Self {
            context: self.context.clone(),
            pool: self.pool.clone(),
            preview_max: self.preview_max,
            fx_flags: self.fx_flags,
            settings: self.settings.clone(),
            effects: self.effects.clone(),
            task: None,
            source_path: self.source_path.clone(),
            original: self.original.clone(),
            enhanced: None,
            original_texture: None,
            pre_filter: None,
            processed: None,
            load_error: None,
        };
        if self.task.is_some() {
            out.spawn_load();
        } else if let (Some(original), Some(enhanced)) = (&self.original, &self.enhanced) {
            out.upload(original, enhanced.clone())?;
        }
        Ok(out)
    }

    fn spawn_load(&mut self) {
        if let Some(previous) = self.task.take() {
            previous.cancel();
        }
        self.clear_textures();
        self.load_error = None;

        let flags = self.fx_flags;
        let (max_w, max_h) = self.preview_max;
        let original = self.original.clone();
        let path = self.source_path.clone();
        tracing::debug!(?path, flags = ?flags.names(), "scheduling image load");
        self.task = Some(self.pool.spawn(move |token| -> ProcessResult<Loaded> {
            let original = match (original, path) {
                (Some(original), _) => original,
                (None, Some(path)) => Arc::new(RasterImage::open(&path)?),
                (None, None) => return Err(TaskError::Cancelled.into()),
            };
            token.check()?;
            let reduced = original.reduce_to_bound(max_w, max_h);
            let enhanced = auto_enhance_checked(&reduced, flags, token)?;
            Ok(Loaded { original, enhanced })
        }));
    }

    fn install(&mut self, loaded: Loaded) -> ProcessResult<()> {
        self.original = Some(loaded.original.clone());
        self.upload(&loaded.original, Arc::new(loaded.enhanced))?;
        tracing::debug!(
            width = self.image_width(),
            height = self.image_height(),
            "image ready"
        );
        Ok(())
    }

    fn upload(&mut self, original: &RasterImage, enhanced: Arc<RasterImage>) -> ProcessResult<()> {
        let preview = original.resize_to(enhanced.width(), enhanced.height())?;
        self.original_texture = Some(self.context.create_texture(&preview)?);
        self.pre_filter = Some(self.context.create_texture(&enhanced)?);
        self.enhanced = Some(enhanced);
        self.process()?;
        Ok(())
    }

    fn reprocess(&mut self) -> GpuResult<bool> {
        if self.pre_filter.is_none() {
            return Ok(false);
        }
        self.process()?;
        Ok(true)
    }

    fn process(&mut self) -> GpuResult<()> {
        let Some(input) = self.pre_filter.as_ref() else {
            return Ok(());
        };
        let adjusted = apply_chains(self.settings.chains_mut(), input)?;
        let active = self
            .effects
            .iter_mut()
            .filter(|f| f.active)
            .map(|f| &mut f.chain);
        self.processed = Some(apply_chains(active, &adjusted)?);
        Ok(())
    }

    fn clear_textures(&mut self) {
        self.enhanced = None;
        self.original_texture = None;
        self.pre_filter = None;
        self.processed = None;
    }
}

impl Drop for ImageProcessor {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.cancel();
        }
    }
}

impl std::fmt::Debug for ImageProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageProcessor")
            .field("source_path", &self.source_path)
            .field("fx_flags", &self.fx_flags)
            .field("loading", &self.task.is_some())
            .field("effects", &self.effects.len())
            .field("processed", &self.processed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use image::{ImageBuffer, Rgb};

    use super::*;
    use crate::catalog::FilterCatalog;

    fn processor() -> ImageProcessor {
        let pool = TaskPool::new("test-load", 2).unwrap();
        let mut p = ImageProcessor::new(GpuContext::software(), pool).unwrap();
        p.set_fx_flags(FxFlags::NONE);
        p
    }

    fn write_png(dir: &Path, name: &str, w: u32, h: u32, px: [u8; 3]) -> PathBuf {
        let path = dir.join(name);
        ImageBuffer::from_pixel(w, h, Rgb(px)).save(&path).unwrap();
        path
    }

    fn wait_loaded(p: &mut ImageProcessor) {
        let deadline = Instant::now() + Duration::from_secs(20);
        while !p.is_load_image_completed() {
            assert!(Instant::now() < deadline, "load did not finish in time");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn missing_path_is_rejected() {
        let mut p = processor();
        assert!(!p.load_image(Path::new("/definitely/not/here.png")));
        assert!(!p.is_loading());
        assert!(p.is_load_image_completed());
        assert!(p.processed_texture().is_none());
    }

    #[test]
    fn load_then_poll_uploads_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "a.png", 8, 6, [10, 20, 30]);
        let mut p = processor();
        assert!(p.load_image(&path));
        assert!(p.processed_texture().is_none());
        wait_loaded(&mut p);

        let processed = p.processed_texture().unwrap().clone();
        assert_eq!(processed.dimensions(), (8, 6));
        assert_eq!(p.original_texture().unwrap().dimensions(), (8, 6));
        assert!(p.load_error().is_none());
        // Later polls do not re-render.
        assert!(p.is_load_image_completed());
        assert_eq!(p.processed_texture().unwrap().handle(), processed.handle());
    }

    #[test]
    fn setting_ranges_match_the_clamp() {
        let mut p = processor();
        for setting in [ImageSetting::Hue, ImageSetting::Gamma, ImageSetting::Lightness] {
            let (min, max) = p.image_setting_range(setting);
            assert!(min < max);
            p.set_image_setting(setting, max + 100.0).unwrap();
            assert_eq!(p.image_setting(setting), max);
            p.set_image_setting(setting, min - 100.0).unwrap();
            assert_eq!(p.image_setting(setting), min);
        }
        assert_eq!(p.image_setting_range(ImageSetting::Brightness), (-1.0, 1.0));
    }

    #[test]
    fn removing_a_twice_added_filter_drops_one_entry() {
        let mut p = processor();
        let catalog = FilterCatalog::build(p.context());
        let sepia = catalog.instantiate("Sepia").unwrap();
        let invert = catalog.instantiate("Invert").unwrap();
        let id = p.add_image_filter(sepia.clone()).unwrap();
        p.add_image_filter(invert).unwrap();
        assert_eq!(p.add_image_filter(sepia).unwrap(), id);

        assert!(p.remove_image_filter(id).unwrap());
        let names: Vec<_> = p.image_filters().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Invert", "Sepia"]);
        assert!(p.remove_image_filter(id).unwrap());
        assert_eq!(p.image_filters().len(), 1);
        assert!(!p.remove_image_filter(id).unwrap());
    }

    #[test]
    fn large_sources_are_reduced_but_report_full_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "big.png", 64, 48, [90, 90, 90]);
        let mut p = processor();
        p.set_preview_bound(32, 32);
        p.load_image(&path);
        wait_loaded(&mut p);
        assert_eq!((p.image_width(), p.image_height()), (64, 48));
        assert_eq!(p.processed_texture().unwrap().dimensions(), (32, 24));
    }

    #[test]
    fn settings_run_before_effects() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "red.png", 4, 4, [200, 50, 50]);
        let mut p = processor();
        p.load_image(&path);
        wait_loaded(&mut p);

        let catalog = FilterCatalog::build(p.context());
        assert!(p.set_image_setting(ImageSetting::Brightness, 0.5).unwrap());
        p.add_image_filter(catalog.instantiate("Grayscale").unwrap())
            .unwrap();
        let out = p.context().read_pixels(p.processed_texture().unwrap()).unwrap();

        let ctx = p.context().clone();
        let source = RasterImage::open(&path).unwrap();
        let input = ctx.create_texture(&source).unwrap();
        let mut expected_chains = SettingChains::new(&ctx).unwrap();
        expected_chains.set(ImageSetting::Brightness, 0.5);
        let mut gray = catalog.get("Grayscale").unwrap().clone();
        let adjusted = apply_chains(expected_chains.chains_mut(), &input).unwrap();
        let expected = ctx.read_pixels(&gray.apply(&adjusted).unwrap()).unwrap();

        assert_eq!(out.as_raw(), expected.as_raw());
        let px = out.get_pixel(0, 0).0;
        assert_eq!(px[0], px[1]);
        assert_eq!(px[1], px[2]);
    }

    #[test]
    fn fx_change_clears_textures_until_reenhanced() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "fx.png", 8, 8, [60, 80, 100]);
        let mut p = processor();
        p.load_image(&path);
        wait_loaded(&mut p);

        assert!(!p.set_fx_flags(FxFlags::NONE));
        assert!(p.processed_texture().is_some());

        assert!(p.set_fx_flags(FxFlags::GAMMA));
        assert!(p.processed_texture().is_none());
        assert!(p.original_texture().is_none());
        assert!(p.is_loading());
        wait_loaded(&mut p);
        assert!(p.processed_texture().is_some());
        assert_eq!(p.fx_flags(), FxFlags::GAMMA);
    }

    #[test]
    fn setters_before_load_store_without_rendering() {
        let mut p = processor();
        assert!(!p.set_image_setting(ImageSetting::Contrast, 5.0).unwrap());
        assert_eq!(p.image_setting(ImageSetting::Contrast), 2.0);
        assert!(!p.reset_settings().unwrap());
        assert_eq!(p.image_setting(ImageSetting::Contrast), 1.0);
        assert!(p.processed_texture().is_none());
    }

    #[test]
    fn removed_and_inactive_effects_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "fx.png", 4, 4, [30, 60, 90]);
        let mut p = processor();
        p.load_image(&path);
        wait_loaded(&mut p);
        let ctx = p.context().clone();
        let baseline = ctx.read_pixels(p.processed_texture().unwrap()).unwrap();

        let catalog = FilterCatalog::build(&ctx);
        let id = p.add_image_filter(catalog.instantiate("Invert").unwrap()).unwrap();
        let inverted = ctx.read_pixels(p.processed_texture().unwrap()).unwrap();
        assert_ne!(inverted.as_raw(), baseline.as_raw());

        assert!(p.update_image_filter(id, |f| f.active = false).unwrap());
        let skipped = ctx.read_pixels(p.processed_texture().unwrap()).unwrap();
        assert_eq!(skipped.as_raw(), baseline.as_raw());
        assert_eq!(p.export_filter_snapshot().len(), 6);

        assert!(p.remove_image_filter(id).unwrap());
        assert!(!p.remove_image_filter(id).unwrap());
        assert!(p.image_filters().is_empty());
    }

    #[test]
    fn clones_do_not_share_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "c.png", 4, 4, [120, 120, 120]);
        let mut p = processor();
        p.load_image(&path);
        wait_loaded(&mut p);
        let catalog = FilterCatalog::build(p.context());
        p.add_image_filter(catalog.instantiate("Sepia").unwrap()).unwrap();

        let mut copy = p.try_clone().unwrap();
        assert_ne!(
            copy.processed_texture().unwrap().handle(),
            p.processed_texture().unwrap().handle()
        );
        copy.set_image_setting(ImageSetting::Brightness, -1.0).unwrap();
        assert_eq!(p.image_setting(ImageSetting::Brightness), 0.0);
        assert_eq!(copy.image_filters().len(), 1);
        assert_eq!(p.export_filter_snapshot().len(), 7);
    }

    #[test]
    fn clone_during_load_loads_on_its_own() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "l.png", 4, 4, [1, 2, 3]);
        let mut p = processor();
        p.load_image(&path);
        let mut copy = p.try_clone().unwrap();
        wait_loaded(&mut copy);
        wait_loaded(&mut p);
        assert!(copy.processed_texture().is_some());
        assert!(p.processed_texture().is_some());
    }

    #[test]
    fn corrupt_file_reports_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not an image").unwrap();
        let mut p = processor();
        assert!(p.load_image(&path));
        wait_loaded(&mut p);
        assert!(p.load_error().is_some());
        assert!(p.processed_texture().is_none());
        assert_eq!(p.image_width(), 0);
    }
}
