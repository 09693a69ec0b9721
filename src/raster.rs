use std::path::Path;

use image::{DynamicImage, GrayImage, RgbImage, RgbaImage, imageops::FilterType};

use crate::codec;
use crate::processing::{color, enhance, exposure, sharpness};

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid dimensions: {0}x{1}")]
    InvalidDimensions(u32, u32),

    #[error("pixel ({x}, {y}) is outside the {width}x{height} image")]
    OutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },

    #[error("raw development failed: {0}")]
    Raw(String),

    #[error(transparent)]
    Codec(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type ImageResult<T> = Result<T, ImageError>;

/// Storage class of a single channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelDepth {
    U8,
    U16,
    F32,
}

/// Result of an automatic linear histogram stretch: `out = alpha * in + beta`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinearStretch {
    pub alpha: f64,
    pub beta: f64,
}

impl LinearStretch {
    pub const IDENTITY: Self = Self {
        alpha: 1.0,
        beta: 0.0,
    };
}

/// CPU-resident decoded bitmap. Transforms return new images.
#[derive(Clone, Debug)]
pub struct RasterImage {
    image: DynamicImage,
}

impl RasterImage {
    /// Wraps a decoded image, rejecting empty and two-channel layouts.
    pub fn from_dynamic(image: DynamicImage) -> ImageResult<Self> {
        if image.width() == 0 || image.height() == 0 {
            return Err(ImageError::InvalidDimensions(image.width(), image.height()));
        }
        match image {
            DynamicImage::ImageLuma8(_)
            | DynamicImage::ImageRgb8(_)
            | DynamicImage::ImageRgba8(_)
            | DynamicImage::ImageLuma16(_)
            | DynamicImage::ImageRgb16(_)
            | DynamicImage::ImageRgba16(_)
            | DynamicImage::ImageRgb32F(_)
            | DynamicImage::ImageRgba32F(_) => Ok(Self { image }),
            other => Err(ImageError::UnsupportedFormat(format!("{:?}", other.color()))),
        }
    }

    pub fn open(path: &Path) -> ImageResult<Self> {
        Self::from_dynamic(codec::open_image(path)?)
    }

    pub fn from_memory(bytes: &[u8]) -> ImageResult<Self> {
        Self::from_dynamic(codec::decode_memory(bytes)?)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn channels(&self) -> u8 {
        self.image.color().channel_count()
    }

    pub fn depth(&self) -> PixelDepth {
        match self.image {
            DynamicImage::ImageLuma16(_)
            | DynamicImage::ImageRgb16(_)
            | DynamicImage::ImageRgba16(_) => PixelDepth::U16,
            DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => PixelDepth::F32,
            _ => PixelDepth::U8,
        }
    }

    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.image
    }

    pub fn into_dynamic(self) -> DynamicImage {
        self.image
    }

    pub fn to_rgba8(&self) -> RgbaImage {
        self.image.to_rgba8()
    }

    /// Samples one pixel as normalized RGBA, filling alpha with full opacity.
    pub fn pixel(&self, x: u32, y: u32) -> ImageResult<[f32; 4]> {
        if x >= self.width() || y >= self.height() {
            return Err(ImageError::OutOfBounds {
                x,
                y,
                width: self.width(),
                height: self.height(),
            });
        }
        const U8: f32 = 1.0 / 255.0;
        const U16: f32 = 1.0 / 65535.0;
        let px = match &self.image {
            DynamicImage::ImageLuma8(img) => {
                let v = img.get_pixel(x, y)[0] as f32 * U8;
                [v, v, v, 1.0]
            }
            DynamicImage::ImageRgb8(img) => {
                let p = img.get_pixel(x, y).0;
                [p[0] as f32 * U8, p[1] as f32 * U8, p[2] as f32 * U8, 1.0]
            }
            DynamicImage::ImageRgba8(img) => img.get_pixel(x, y).0.map(|c| c as f32 * U8),
            DynamicImage::ImageLuma16(img) => {
                let v = img.get_pixel(x, y)[0] as f32 * U16;
                [v, v, v, 1.0]
            }
            DynamicImage::ImageRgb16(img) => {
                let p = img.get_pixel(x, y).0;
                [p[0] as f32 * U16, p[1] as f32 * U16, p[2] as f32 * U16, 1.0]
            }
            DynamicImage::ImageRgba16(img) => img.get_pixel(x, y).0.map(|c| c as f32 * U16),
            DynamicImage::ImageRgb32F(img) => {
                let p = img.get_pixel(x, y).0;
                [p[0], p[1], p[2], 1.0]
            }
            DynamicImage::ImageRgba32F(img) => img.get_pixel(x, y).0,
            other => {
                return Err(ImageError::UnsupportedFormat(format!(
                    "{:?}",
                    other.color()
                )));
            }
        };
        Ok(px)
    }

    /// Resizes by a uniform factor, rounding each dimension.
    pub fn resize_scale(&self, scale: f32) -> Self {
        let w = ((self.width() as f32 * scale).round() as u32).max(1);
        let h = ((self.height() as f32 * scale).round() as u32).max(1);
        self.resized(w, h)
    }

    /// Resizes to explicit dimensions without preserving aspect.
    pub fn resize_to(&self, width: u32, height: u32) -> ImageResult<Self> {
        if width == 0 || height == 0 {
            return Err(ImageError::InvalidDimensions(width, height));
        }
        Ok(self.resized(width, height))
    }

    fn resized(&self, width: u32, height: u32) -> Self {
        if width == self.width() && height == self.height() {
            return self.clone();
        }
        Self {
            image: self.image.resize_exact(width, height, FilterType::Triangle),
        }
    }

    /// Downscales so the image fits `max_width` x `max_height` (judged on the
    /// longer edge), never shrinking below half size and never upsampling.
    pub fn reduce_to_bound(&self, max_width: u32, max_height: u32) -> Self {
        let (w, h) = (self.width() as f32, self.height() as f32);
        let fit = if self.width() > max_width || self.height() > max_height {
            if w > h {
                max_width as f32 / w
            } else {
                max_height as f32 / h
            }
        } else {
            1.0
        };
        let scale = fit.max(0.5);
        if scale >= 1.0 {
            return self.clone();
        }
        self.resize_scale(scale)
    }

    pub fn adjust_gamma(&self, gamma: f64) -> Self {
        exposure::adjust_gamma(self, gamma)
    }

    pub fn auto_brightness_contrast(&self, clip_percent: f64) -> (Self, LinearStretch) {
        exposure::auto_brightness_contrast(self, clip_percent)
    }

    pub fn adjust_color_temperature(&self, shift: i32) -> Self {
        color::adjust_color_temperature(self, shift)
    }

    pub fn adjust_sharpen(&self) -> Self {
        sharpness::adaptive_sharpen(self)
    }

    pub fn adjust_hsl(&self) -> Self {
        color::auto_hsl(self)
    }

    pub fn auto_enhance(&self, flags: enhance::FxFlags) -> Self {
        enhance::auto_enhance(self, flags)
    }

    /// Mean of BT.601 luma on the 8-bit scale.
    pub fn mean_gray(&self) -> f64 {
        let gray = self.gray8();
        let sum: u64 = gray.as_raw().iter().map(|&v| v as u64).sum();
        sum as f64 / gray.as_raw().len().max(1) as f64
    }

    /// Per-channel RGB means on the 8-bit scale.
    pub fn mean_rgb(&self) -> [f64; 3] {
        let rgb = self.image.to_rgb8();
        let mut sums = [0u64; 3];
        for px in rgb.pixels() {
            for c in 0..3 {
                sums[c] += px[c] as u64;
            }
        }
        let n = (rgb.width() as u64 * rgb.height() as u64).max(1) as f64;
        sums.map(|s| s as f64 / n)
    }

    pub(crate) fn gray8(&self) -> GrayImage {
        match &self.image {
            DynamicImage::ImageLuma8(img) => img.clone(),
            _ => {
                let rgb = self.image.to_rgb8();
                GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                    let p = rgb.get_pixel(x, y);
                    image::Luma([luma601(p[0], p[1], p[2])])
                })
            }
        }
    }

    /// Same channel count, 8-bit storage.
    pub(crate) fn to_8bit(&self) -> Eight {
        match self.channels() {
            1 => Eight::Gray(self.image.to_luma8()),
            4 => Eight::Rgba(self.image.to_rgba8()),
            _ => Eight::Rgb(self.image.to_rgb8()),
        }
    }

    pub(crate) fn from_8bit(eight: Eight) -> Self {
        let image = match eight {
            Eight::Gray(img) => DynamicImage::ImageLuma8(img),
            Eight::Rgb(img) => DynamicImage::ImageRgb8(img),
            Eight::Rgba(img) => DynamicImage::ImageRgba8(img),
        };
        Self { image }
    }

    /// Applies `f` to every colour sample of the 8-bit form, leaving alpha untouched.
    pub(crate) fn map_color_samples(&self, f: impl Fn(u8) -> u8) -> Self {
        let mut eight = self.to_8bit();
        let stride = eight.channels();
        let colour = if stride == 4 { 3 } else { stride };
        for px in eight.samples_mut().chunks_exact_mut(stride) {
            for v in &mut px[..colour] {
                *v = f(*v);
            }
        }
        Self::from_8bit(eight)
    }
}

/// 8-bit working form used by the enhancement transforms.
pub(crate) enum Eight {
    Gray(GrayImage),
    Rgb(RgbImage),
    Rgba(RgbaImage),
}

impl Eight {
    pub(crate) fn channels(&self) -> usize {
        match self {
            Eight::Gray(_) => 1,
            Eight::Rgb(_) => 3,
            Eight::Rgba(_) => 4,
        }
    }

    pub(crate) fn samples_mut(&mut self) -> &mut [u8] {
        match self {
            Eight::Gray(img) => &mut **img,
            Eight::Rgb(img) => &mut **img,
            Eight::Rgba(img) => &mut **img,
        }
    }
}

pub(crate) fn luma601(r: u8, g: u8, b: u8) -> u8 {
    (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32)
        .round()
        .clamp(0.0, 255.0) as u8
}
