use std::ops::{BitAnd, BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::processing::{color, exposure, filters, sharpness};
use crate::raster::RasterImage;
use crate::task::{CancelToken, TaskResult};

/// Bitmask selecting the automatic enhancement steps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FxFlags(u32);

impl FxFlags {
    pub const NONE: Self = Self(0);
    pub const BRIGHTNESS_CONTRAST: Self = Self(1 << 0);
    pub const GAMMA: Self = Self(1 << 1);
    pub const COLOR_TEMP: Self = Self(1 << 2);
    pub const CLAHE: Self = Self(1 << 3);
    pub const DETAIL: Self = Self(1 << 4);
    pub const DENOISE: Self = Self(1 << 5);
    pub const SHARPEN: Self = Self(1 << 6);
    pub const HSL: Self = Self(1 << 7);
    pub const ALL: Self = Self(0xff);

    const NAMES: [(&'static str, Self); 8] = [
        ("brightness-contrast", Self::BRIGHTNESS_CONTRAST),
        ("gamma", Self::GAMMA),
        ("color-temp", Self::COLOR_TEMP),
        ("clahe", Self::CLAHE),
        ("detail", Self::DETAIL),
        ("denoise", Self::DENOISE),
        ("sharpen", Self::SHARPEN),
        ("hsl", Self::HSL),
    ];

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Parses a comma separated list of step names (`gamma,clahe`), `all`,
    /// `none`, or a raw integer mask.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Ok(bits) = text.parse::<u32>() {
            return Some(Self::from_bits(bits));
        }
        let mut flags = Self::NONE;
        for part in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.to_ascii_lowercase().as_str() {
                "all" => flags |= Self::ALL,
                "none" => {}
                name => {
                    let (_, flag) = Self::NAMES.iter().find(|(n, _)| *n == name)?;
                    flags |= *flag;
                }
            }
        }
        Some(flags)
    }

    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect()
    }
}

impl Default for FxFlags {
    fn default() -> Self {
        Self::BRIGHTNESS_CONTRAST | Self::GAMMA | Self::COLOR_TEMP
    }
}

impl BitOr for FxFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for FxFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for FxFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

pub const AUTO_CLIP_PERCENT: f64 = 1.0;

/// Gamma picked from the mean grey level of the current image.
pub fn auto_gamma_for(mean_gray: f64) -> f64 {
    if mean_gray < 90.0 {
        1.2
    } else if mean_gray > 180.0 {
        0.8
    } else {
        1.0
    }
}

/// Lab `b` shift picked from the blue/red balance: blue casts are warmed,
/// red casts are cooled.
pub fn auto_temperature_shift(mean_rgb: [f64; 3]) -> i32 {
    let blue_ratio = mean_rgb[2] / (mean_rgb[0] + 1e-5);
    if blue_ratio > 1.05 {
        10
    } else if blue_ratio < 0.95 {
        -10
    } else {
        0
    }
}

/// Runs every step selected by `flags` in fixed order. Each data-driven step
/// measures the output of the step before it.
pub fn auto_enhance(img: &RasterImage, flags: FxFlags) -> RasterImage {
    match auto_enhance_checked(img, flags, &CancelToken::new()) {
        Ok(out) => out,
        // A fresh token is never cancelled.
        Err(_) => img.clone(),
    }
}

/// Same as [`auto_enhance`] but gives up between steps once `token` is
/// cancelled.
pub fn auto_enhance_checked(
    img: &RasterImage,
    flags: FxFlags,
    token: &CancelToken,
) -> TaskResult<RasterImage> {
    let mut out = img.clone();

    if flags.contains(FxFlags::BRIGHTNESS_CONTRAST) {
        token.check()?;
        let (stretched, stretch) = exposure::auto_brightness_contrast(&out, AUTO_CLIP_PERCENT);
        tracing::trace!(alpha = stretch.alpha, beta = stretch.beta, "auto brightness/contrast");
        out = stretched;
    }
    if flags.contains(FxFlags::GAMMA) {
        token.check()?;
        let gamma = auto_gamma_for(out.mean_gray());
        tracing::trace!(gamma, "auto gamma");
        out = exposure::adjust_gamma(&out, gamma);
    }
    if flags.contains(FxFlags::COLOR_TEMP) {
        token.check()?;
        let shift = auto_temperature_shift(out.mean_rgb());
        tracing::trace!(shift, "auto colour temperature");
        out = color::adjust_color_temperature(&out, shift);
    }
    if flags.contains(FxFlags::CLAHE) {
        token.check()?;
        out = filters::apply_clahe(&out);
    }
    if flags.contains(FxFlags::DETAIL) {
        token.check()?;
        out = filters::enhance_details(&out);
    }
    if flags.contains(FxFlags::DENOISE) {
        token.check()?;
        out = filters::denoise(&out);
    }
    if flags.contains(FxFlags::SHARPEN) {
        token.check()?;
        out = sharpness::adaptive_sharpen(&out);
    }
    if flags.contains(FxFlags::HSL) {
        token.check()?;
        out = color::auto_hsl(&out);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, ImageBuffer, Rgb};

    use super::*;
    use crate::task::TaskError;

    fn scene() -> RasterImage {
        RasterImage::from_dynamic(DynamicImage::ImageRgb8(ImageBuffer::from_fn(48, 32, |x, y| {
            Rgb([
                (40 + x * 2) as u8,
                (30 + y * 3) as u8,
                (90 + (x + y) % 40) as u8,
            ])
        })))
        .unwrap()
    }

    #[test]
    fn same_input_same_output() {
        let img = scene();
        for flags in [FxFlags::default(), FxFlags::ALL, FxFlags::GAMMA | FxFlags::HSL] {
            let a = img.auto_enhance(flags);
            let b = img.auto_enhance(flags);
            assert_eq!(a.as_dynamic().as_bytes(), b.as_dynamic().as_bytes(), "{:?}", flags.names());
        }
    }

    #[test]
    fn no_flags_is_identity() {
        let img = scene();
        let out = img.auto_enhance(FxFlags::NONE);
        assert_eq!(out.as_dynamic().as_bytes(), img.as_dynamic().as_bytes());
    }

    #[test]
    fn gamma_and_temperature_thresholds() {
        assert_eq!(auto_gamma_for(89.9), 1.2);
        assert_eq!(auto_gamma_for(90.0), 1.0);
        assert_eq!(auto_gamma_for(180.0), 1.0);
        assert_eq!(auto_gamma_for(180.1), 0.8);

        assert_eq!(auto_temperature_shift([100.0, 0.0, 110.0]), 10);
        assert_eq!(auto_temperature_shift([100.0, 0.0, 90.0]), -10);
        assert_eq!(auto_temperature_shift([100.0, 0.0, 100.0]), 0);
        // Black reads as ratio 0, which is below the warm threshold.
        assert_eq!(auto_temperature_shift([0.0, 0.0, 0.0]), -10);
    }

    #[test]
    fn steps_measure_the_previous_result() {
        // A dark image: the stretch lifts it so gamma measures the brighter
        // intermediate rather than the source.
        let dark = RasterImage::from_dynamic(DynamicImage::ImageRgb8(ImageBuffer::from_fn(
            64,
            1,
            |x, _| Rgb([x as u8, x as u8, x as u8]),
        )))
        .unwrap();
        assert_eq!(auto_gamma_for(dark.mean_gray()), 1.2);
        let stretched = dark.auto_brightness_contrast(AUTO_CLIP_PERCENT).0;
        assert_eq!(auto_gamma_for(stretched.mean_gray()), 1.0);

        let chained = dark.auto_enhance(FxFlags::BRIGHTNESS_CONTRAST | FxFlags::GAMMA);
        assert_eq!(chained.as_dynamic().as_bytes(), stretched.as_dynamic().as_bytes());
    }

    #[test]
    fn cancelled_token_stops_enhancement() {
        let token = CancelToken::new();
        token.cancel();
        let out = auto_enhance_checked(&scene(), FxFlags::default(), &token);
        assert!(matches!(out, Err(TaskError::Cancelled)));
    }

    #[test]
    fn parse_flag_lists() {
        assert_eq!(FxFlags::parse("gamma, clahe"), Some(FxFlags::GAMMA | FxFlags::CLAHE));
        assert_eq!(FxFlags::parse("all"), Some(FxFlags::ALL));
        assert_eq!(FxFlags::parse("none"), Some(FxFlags::NONE));
        assert_eq!(FxFlags::parse("7"), Some(FxFlags::default()));
        assert_eq!(FxFlags::parse("sparkle"), None);
        assert_eq!(FxFlags::default().names(), vec!["brightness-contrast", "gamma", "color-temp"]);
    }
}
