mod software;
mod wgpu_backend;

pub use software::{Sampler, Uniforms};

use std::sync::{
    Arc, OnceLock, RwLock,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};

use crate::raster::RasterImage;

pub const DEBUG_ALLOW_CPU_FALLBACK_ENV: &str = "PHOTOFX_DEBUG_ALLOW_CPU_FALLBACK";

/// Reserved uniform slot carrying the texture size in pixels.
pub const RESOLUTION_UNIFORM: &str = "resolution";

const SOFTWARE_MAX_DIMENSION: u32 = 32_768;

#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("no compatible GPU adapter found")]
    NoAdapter,

    #[error("failed to create GPU device: {0}")]
    DeviceCreation(String),

    #[error("program `{label}` failed to compile: {message}")]
    ShaderCompilation { label: String, message: String },

    #[error("invalid uniform name `{0}`")]
    InvalidUniformName(String),

    #[error("expected {expected} bytes of pixel data, got {actual}")]
    DataSizeMismatch { expected: usize, actual: usize },

    #[error("{width}x{height} exceeds the maximum texture dimension {max}")]
    ImageTooLarge { width: u32, height: u32, max: u32 },

    #[error("invalid texture dimensions {0}x{1}")]
    InvalidDimensions(u32, u32),

    #[error("pixel readback failed: {0}")]
    Readback(String),

    #[error("resource belongs to a different GPU context")]
    ContextMismatch,

    #[error("render target must differ from the input texture")]
    TargetAliasesInput,

    #[error("texture storage lock poisoned")]
    LockPoisoned,
}

pub type GpuResult<T> = Result<T, GpuError>;

/// Pixel layout a texture was created from. Storage is always RGBA8; the
/// format decides how uploads are expanded and how readbacks are packed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Gray8,
    Rgb8,
    Bgr8,
    Rgba8,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            TextureFormat::Gray8 => 1,
            TextureFormat::Rgb8 | TextureFormat::Bgr8 => 3,
            TextureFormat::Rgba8 => 4,
        }
    }

    pub fn for_channels(channels: u8) -> Self {
        match channels {
            1 => TextureFormat::Gray8,
            4 => TextureFormat::Rgba8,
            _ => TextureFormat::Rgb8,
        }
    }

    fn expand(self, data: &[u8], width: u32, height: u32) -> GpuResult<RgbaImage> {
        let expected = width as usize * height as usize * self.bytes_per_pixel();
        if data.len() != expected {
            return Err(GpuError::DataSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        let rgba: Vec<u8> = match self {
            TextureFormat::Rgba8 => data.to_vec(),
            TextureFormat::Rgb8 => data
                .chunks_exact(3)
                .flat_map(|p| [p[0], p[1], p[2], 255])
                .collect(),
            TextureFormat::Bgr8 => data
                .chunks_exact(3)
                .flat_map(|p| [p[2], p[1], p[0], 255])
                .collect(),
            TextureFormat::Gray8 => data.iter().flat_map(|&v| [v, v, v, 255]).collect(),
        };
        RgbaImage::from_raw(width, height, rgba).ok_or(GpuError::DataSizeMismatch {
            expected,
            actual: data.len(),
        })
    }
}

/// Which implementation services a [`GpuContext`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Wgpu,
    Software,
}

/// Requested backend. `Auto` prefers wgpu and falls back to software.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendPreference {
    #[default]
    Auto,
    Gpu,
    Cpu,
}

impl BackendPreference {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "cpu" | "software" => BackendPreference::Cpu,
            "gpu" | "wgpu" => BackendPreference::Gpu,
            _ => BackendPreference::Auto,
        }
    }
}

/// Opaque, process-unique texture identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(u64);

impl TextureHandle {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TextureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tex#{}", self.0)
    }
}

pub type Kernel = fn(&Sampler<'_>, [f32; 2], &Uniforms<'_>) -> [f32; 4];

/// One filter pass: a WGSL body defining `fn effect(uv: vec2<f32>) -> vec4<f32>`
/// plus a CPU kernel with the same semantics for the software backend.
///
/// Bodies read the input through `sample_src(uv)` / `texel(pixel)` and their
/// uniforms through `params.<name>` (one `vec4<f32>` slot each, scalars in
/// `.x`, vec2 in `.xy`). `params.resolution.xy` is the texture size.
#[derive(Clone, Copy)]
pub struct ProgramSource {
    pub label: &'static str,
    pub uniforms: &'static [&'static str],
    pub body: &'static str,
    pub kernel: Kernel,
}

impl ProgramSource {
    pub fn validate(&self) -> GpuResult<()> {
        for (i, name) in self.uniforms.iter().enumerate() {
            if !is_identifier(name) || *name == RESOLUTION_UNIFORM {
                return Err(GpuError::InvalidUniformName(name.to_string()));
            }
            if self.uniforms[..i].contains(name) {
                return Err(GpuError::InvalidUniformName(name.to_string()));
            }
        }
        if !self.body.contains("fn effect(") {
            return Err(GpuError::ShaderCompilation {
                label: self.label.to_string(),
                message: "program body does not define `fn effect(uv: vec2<f32>) -> vec4<f32>`"
                    .to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for ProgramSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramSource")
            .field("label", &self.label)
            .field("uniforms", &self.uniforms)
            .finish()
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Compiled, immutable program. Cheap to clone; clones share the pipeline.
#[derive(Clone)]
pub struct GpuProgram {
    inner: Arc<ProgramInner>,
}

struct ProgramInner {
    source: ProgramSource,
    context_id: u64,
    pipeline: Option<wgpu::ComputePipeline>,
}

impl GpuProgram {
    pub fn label(&self) -> &'static str {
        self.inner.source.label
    }

    pub fn uniforms(&self) -> &'static [&'static str] {
        self.inner.source.uniforms
    }

    pub fn source(&self) -> &ProgramSource {
        &self.inner.source
    }

    pub fn shares_pipeline_with(&self, other: &GpuProgram) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for GpuProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuProgram")
            .field("label", &self.label())
            .field("context", &self.inner.context_id)
            .finish()
    }
}

/// Image resident on the rendering device. Clones share the same storage.
#[derive(Clone)]
pub struct GpuTexture {
    inner: Arc<TextureInner>,
}

struct TextureInner {
    handle: TextureHandle,
    context_id: u64,
    width: u32,
    height: u32,
    format: TextureFormat,
    storage: TextureStorage,
}

enum TextureStorage {
    Wgpu(wgpu::Texture),
    Software(RwLock<RgbaImage>),
}

impl GpuTexture {
    pub fn handle(&self) -> TextureHandle {
        self.inner.handle
    }

    pub fn width(&self) -> u32 {
        self.inner.width
    }

    pub fn height(&self) -> u32 {
        self.inner.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.inner.width, self.inner.height)
    }

    pub fn format(&self) -> TextureFormat {
        self.inner.format
    }
}

impl std::fmt::Debug for GpuTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuTexture")
            .field("handle", &self.inner.handle)
            .field("width", &self.inner.width)
            .field("height", &self.inner.height)
            .field("format", &self.inner.format)
            .finish()
    }
}

/// Snapshot of GPU runtime availability and adapter details.
#[derive(Clone, Debug, Default)]
pub struct RuntimeStatus {
    pub available: bool,
    pub adapter_vendor_id: Option<u32>,
    pub adapter_name: Option<String>,
    pub adapter_backend: Option<String>,
    pub adapter_driver: Option<String>,
}

static WGPU_CONTEXT: OnceLock<Option<GpuContext>> = OnceLock::new();
static SOFTWARE_CONTEXT: OnceLock<GpuContext> = OnceLock::new();
static GPU_FALLBACK_REPORTED: AtomicBool = AtomicBool::new(false);

/// Handle to a rendering device. All texture and program operations go
/// through the context that created the resource.
#[derive(Clone)]
pub struct GpuContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: u64,
    backend: Backend,
}

enum Backend {
    Wgpu(wgpu_backend::WgpuDevice),
    Software,
}

impl GpuContext {
    fn new(backend: Backend) -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self {
            inner: Arc::new(ContextInner {
                id: NEXT.fetch_add(1, Ordering::Relaxed),
                backend,
            }),
        }
    }

    /// Process-wide wgpu context, initialised on first use.
    pub fn wgpu() -> GpuResult<Self> {
        WGPU_CONTEXT
            .get_or_init(|| match wgpu_backend::WgpuDevice::new() {
                Ok(device) => Some(Self::new(Backend::Wgpu(device))),
                Err(err) => {
                    tracing::debug!("wgpu initialisation failed: {err}");
                    None
                }
            })
            .clone()
            .ok_or(GpuError::NoAdapter)
    }

    /// Process-wide CPU rasteriser.
    pub fn software() -> Self {
        SOFTWARE_CONTEXT
            .get_or_init(|| Self::new(Backend::Software))
            .clone()
    }

    pub fn with_preference(preference: BackendPreference) -> GpuResult<Self> {
        match preference {
            BackendPreference::Gpu => Self::wgpu(),
            BackendPreference::Cpu => Ok(Self::software()),
            BackendPreference::Auto => Self::wgpu().or_else(|_| {
                report_gpu_fallback_once();
                Ok(Self::software())
            }),
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self.inner.backend {
            Backend::Wgpu(_) => BackendKind::Wgpu,
            Backend::Software => BackendKind::Software,
        }
    }

    pub fn max_texture_dimension(&self) -> u32 {
        match &self.inner.backend {
            Backend::Wgpu(dev) => dev.max_texture_dimension(),
            Backend::Software => SOFTWARE_MAX_DIMENSION,
        }
    }

    pub fn create_texture(&self, image: &RasterImage) -> GpuResult<GpuTexture> {
        let format = TextureFormat::for_channels(image.channels());
        self.texture_from_rgba(image.to_rgba8(), format)
    }

    /// Uploads tightly packed `data` laid out as `format`.
    pub fn create_texture_from_data(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> GpuResult<GpuTexture> {
        self.check_dimensions(width, height)?;
        let rgba = format.expand(data, width, height)?;
        self.texture_from_rgba(rgba, format)
    }

    /// Allocates an uninitialised texture for rendering into.
    pub fn create_render_target(
        &self,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> GpuResult<GpuTexture> {
        self.check_dimensions(width, height)?;
        let storage = match &self.inner.backend {
            Backend::Wgpu(dev) => TextureStorage::Wgpu(dev.create_texture(width, height)),
            Backend::Software => TextureStorage::Software(RwLock::new(RgbaImage::new(width, height))),
        };
        Ok(self.wrap(width, height, format, storage))
    }

    /// Rewrites every texel of `texture`; `data` must match its size and format.
    pub fn update_texture(&self, texture: &GpuTexture, data: &[u8]) -> GpuResult<()> {
        self.check_owner(texture.inner.context_id)?;
        let rgba = texture.format().expand(data, texture.width(), texture.height())?;
        match (&self.inner.backend, &texture.inner.storage) {
            (Backend::Wgpu(dev), TextureStorage::Wgpu(tex)) => {
                dev.write_texture(tex, &rgba);
                Ok(())
            }
            (Backend::Software, TextureStorage::Software(lock)) => {
                *lock.write().map_err(|_| GpuError::LockPoisoned)? = rgba;
                Ok(())
            }
            _ => Err(GpuError::ContextMismatch),
        }
    }

    pub fn read_pixels(&self, texture: &GpuTexture) -> GpuResult<RgbaImage> {
        self.check_owner(texture.inner.context_id)?;
        match (&self.inner.backend, &texture.inner.storage) {
            (Backend::Wgpu(dev), TextureStorage::Wgpu(tex)) => {
                dev.read_texture(tex, texture.width(), texture.height())
            }
            (Backend::Software, TextureStorage::Software(lock)) => {
                Ok(lock.read().map_err(|_| GpuError::LockPoisoned)?.clone())
            }
            _ => Err(GpuError::ContextMismatch),
        }
    }

    /// Reads the texture back into a raster with the channel count of its
    /// creation format.
    pub fn read_raster(&self, texture: &GpuTexture) -> GpuResult<RasterImage> {
        let rgba = self.read_pixels(texture)?;
        let (w, h) = rgba.dimensions();
        let image = match texture.format() {
            TextureFormat::Rgba8 => DynamicImage::ImageRgba8(rgba),
            TextureFormat::Rgb8 | TextureFormat::Bgr8 => {
                DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
                    let p = rgba.get_pixel(x, y);
                    image::Rgb([p[0], p[1], p[2]])
                }))
            }
            TextureFormat::Gray8 => DynamicImage::ImageLuma8(GrayImage::from_fn(w, h, |x, y| {
                image::Luma([rgba.get_pixel(x, y)[0]])
            })),
        };
        RasterImage::from_dynamic(image).map_err(|e| GpuError::Readback(e.to_string()))
    }

    pub fn compile(&self, source: &ProgramSource) -> GpuResult<GpuProgram> {
        source.validate()?;
        let pipeline = match &self.inner.backend {
            Backend::Wgpu(dev) => Some(dev.compile(source)?),
            Backend::Software => {
                wgpu_backend::check_wgsl(source)?;
                None
            }
        };
        Ok(GpuProgram {
            inner: Arc::new(ProgramInner {
                source: *source,
                context_id: self.inner.id,
                pipeline,
            }),
        })
    }

    /// Runs one pass of `program` from `input` into `target`. `uniforms[0]` is
    /// the resolution slot, followed by one slot per program uniform.
    pub fn render(
        &self,
        program: &GpuProgram,
        input: &GpuTexture,
        target: &GpuTexture,
        uniforms: &[[f32; 4]],
    ) -> GpuResult<()> {
        self.check_owner(program.inner.context_id)?;
        self.check_owner(input.inner.context_id)?;
        self.check_owner(target.inner.context_id)?;
        if input.handle() == target.handle() {
            return Err(GpuError::TargetAliasesInput);
        }
        if input.dimensions() != target.dimensions() {
            return Err(GpuError::InvalidDimensions(target.width(), target.height()));
        }
        let expected = program.uniforms().len() + 1;
        if uniforms.len() != expected {
            return Err(GpuError::DataSizeMismatch {
                expected,
                actual: uniforms.len(),
            });
        }
        match (
            &self.inner.backend,
            &program.inner.pipeline,
            &input.inner.storage,
            &target.inner.storage,
        ) {
            (Backend::Wgpu(dev), Some(pipeline), TextureStorage::Wgpu(src), TextureStorage::Wgpu(dst)) => {
                dev.dispatch(pipeline, src, dst, uniforms, input.width(), input.height());
                Ok(())
            }
            (Backend::Software, None, TextureStorage::Software(src), TextureStorage::Software(dst)) => {
                let src = src.read().map_err(|_| GpuError::LockPoisoned)?;
                let mut dst = dst.write().map_err(|_| GpuError::LockPoisoned)?;
                software::render(program.source(), &src, &mut dst, uniforms);
                Ok(())
            }
            _ => Err(GpuError::ContextMismatch),
        }
    }

    fn texture_from_rgba(&self, rgba: RgbaImage, format: TextureFormat) -> GpuResult<GpuTexture> {
        let (width, height) = rgba.dimensions();
        self.check_dimensions(width, height)?;
        let storage = match &self.inner.backend {
            Backend::Wgpu(dev) => {
                let tex = dev.create_texture(width, height);
                dev.write_texture(&tex, &rgba);
                TextureStorage::Wgpu(tex)
            }
            Backend::Software => TextureStorage::Software(RwLock::new(rgba)),
        };
        Ok(self.wrap(width, height, format, storage))
    }

    fn wrap(&self, width: u32, height: u32, format: TextureFormat, storage: TextureStorage) -> GpuTexture {
        GpuTexture {
            inner: Arc::new(TextureInner {
                handle: TextureHandle::next(),
                context_id: self.inner.id,
                width,
                height,
                format,
                storage,
            }),
        }
    }

    fn check_dimensions(&self, width: u32, height: u32) -> GpuResult<()> {
        if width == 0 || height == 0 {
            return Err(GpuError::InvalidDimensions(width, height));
        }
        let max = self.max_texture_dimension();
        if width > max || height > max {
            return Err(GpuError::ImageTooLarge { width, height, max });
        }
        Ok(())
    }

    fn check_owner(&self, context_id: u64) -> GpuResult<()> {
        if context_id == self.inner.id {
            Ok(())
        } else {
            Err(GpuError::ContextMismatch)
        }
    }
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext")
            .field("id", &self.inner.id)
            .field("kind", &self.kind())
            .finish()
    }
}

/// Returns whether a wgpu adapter could be initialised.
pub fn is_available() -> bool {
    GpuContext::wgpu().is_ok()
}

/// Returns detailed GPU runtime status for diagnostics.
pub fn runtime_status() -> RuntimeStatus {
    match GpuContext::wgpu() {
        Ok(ctx) => match &ctx.inner.backend {
            Backend::Wgpu(dev) => dev.runtime_status(),
            Backend::Software => RuntimeStatus::default(),
        },
        Err(_) => RuntimeStatus::default(),
    }
}

pub fn allow_debug_cpu_fallback() -> bool {
    std::env::var(DEBUG_ALLOW_CPU_FALLBACK_ENV)
        .ok()
        .map(|raw| debug_fallback_truthy(&raw))
        .unwrap_or(false)
}

pub(crate) fn debug_fallback_truthy(raw: &str) -> bool {
    let norm = raw.trim().to_ascii_lowercase();
    norm == "1" || norm == "true" || norm == "yes" || norm == "on"
}

pub(crate) fn report_gpu_fallback_once() {
    if !GPU_FALLBACK_REPORTED.swap(true, Ordering::Relaxed) {
        tracing::warn!(
            "wgpu unavailable; rendering with the software backend ({}=1 silences the policy check)",
            DEBUG_ALLOW_CPU_FALLBACK_ENV
        );
    }
}
