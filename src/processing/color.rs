use rayon::prelude::*;

use crate::raster::{Eight, RasterImage};

// D65 reference white.
const WHITE_X: f32 = 0.950_456;
const WHITE_Z: f32 = 1.088_754;

const TARGET_LIGHTNESS: f32 = 130.0;
const HUE_NUDGE_DEG: f32 = 2.0;

/// Shifts the Lab `b` (blue/yellow) channel by `shift` on the 8-bit scale.
/// Positive values warm the image. Greyscale images have no chroma and are
/// returned unchanged.
pub fn adjust_color_temperature(img: &RasterImage, shift: i32) -> RasterImage {
    if shift == 0 || img.channels() == 1 {
        return img.clone();
    }
    let shift = shift as f32;
    let mut eight = img.to_8bit();
    let stride = eight.channels();
    eight
        .samples_mut()
        .par_chunks_exact_mut(stride)
        .for_each(|px| {
            let mut lab = rgb_to_lab8([px[0], px[1], px[2]]);
            lab[2] = (lab[2] + shift).clamp(0.0, 255.0);
            let rgb = lab8_to_rgb(lab);
            px[..3].copy_from_slice(&rgb);
        });
    RasterImage::from_8bit(eight)
}

/// Statistics-driven HSL correction: pulls mean lightness toward the middle,
/// lifts flat saturation, tames oversaturation, and nudges hue by a couple of
/// degrees away from a strong cool or warm cast.
pub fn auto_hsl(img: &RasterImage) -> RasterImage {
    if img.channels() == 1 {
        return img.clone();
    }
    let mut eight = img.to_8bit();
    let stride = eight.channels();
    let stats = HslStats::measure(eight.samples_mut(), stride);
    let adjust = stats.adjustment();
    if adjust.is_identity() {
        return img.clone();
    }

    let hue_shift = adjust.hue_deg / 360.0;
    eight
        .samples_mut()
        .par_chunks_exact_mut(stride)
        .for_each(|px| {
            let (h, s, l) = rgb_to_hsl(
                px[0] as f32 / 255.0,
                px[1] as f32 / 255.0,
                px[2] as f32 / 255.0,
            );
            let h = wrap_unit(h + hue_shift);
            let s = (s * adjust.saturation).clamp(0.0, 1.0);
            let l = (l * adjust.lightness).clamp(0.0, 1.0);
            let (r, g, b) = hsl_to_rgb(h, s, l);
            px[0] = to_u8(r);
            px[1] = to_u8(g);
            px[2] = to_u8(b);
        });
    RasterImage::from_8bit(eight)
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct HslAdjust {
    lightness: f32,
    saturation: f32,
    hue_deg: f32,
}

impl HslAdjust {
    fn is_identity(&self) -> bool {
        self.lightness == 1.0 && self.saturation == 1.0 && self.hue_deg == 0.0
    }
}

/// Means on the 8-bit scale; `hue_deg` is `None` for achromatic images.
#[derive(Debug, Clone, Copy)]
struct HslStats {
    lightness: f32,
    saturation: f32,
    hue_deg: Option<f32>,
}

impl HslStats {
    fn measure(samples: &[u8], stride: usize) -> Self {
        let mut sum_l = 0f64;
        let mut sum_s = 0f64;
        let (mut hue_x, mut hue_y) = (0f64, 0f64);
        let mut n = 0u64;
        for px in samples.chunks_exact(stride) {
            let (h, s, l) = rgb_to_hsl(
                px[0] as f32 / 255.0,
                px[1] as f32 / 255.0,
                px[2] as f32 / 255.0,
            );
            sum_l += l as f64;
            sum_s += s as f64;
            // Weight by saturation so near-grey pixels don't vote.
            let angle = h as f64 * std::f64::consts::TAU;
            hue_x += angle.cos() * s as f64;
            hue_y += angle.sin() * s as f64;
            n += 1;
        }
        let n = n.max(1) as f64;
        let hue_deg = if (hue_x * hue_x + hue_y * hue_y).sqrt() / n < 1e-3 {
            None
        } else {
            Some(wrap_unit((hue_y.atan2(hue_x) / std::f64::consts::TAU) as f32) * 360.0)
        };
        Self {
            lightness: (sum_l / n * 255.0) as f32,
            saturation: (sum_s / n * 255.0) as f32,
            hue_deg,
        }
    }

    fn adjustment(&self) -> HslAdjust {
        let lightness = if self.lightness < 100.0 || self.lightness > 160.0 {
            (TARGET_LIGHTNESS / self.lightness.max(1.0)).clamp(0.7, 1.4)
        } else {
            1.0
        };
        let saturation = if self.saturation < 90.0 {
            1.3
        } else if self.saturation < 128.0 {
            1.15
        } else if self.saturation > 200.0 {
            0.9
        } else {
            1.0
        };
        let hue_deg = match self.hue_deg {
            Some(h) if (150.0..270.0).contains(&h) => -HUE_NUDGE_DEG,
            Some(h) if !(60.0..330.0).contains(&h) => HUE_NUDGE_DEG,
            _ => 0.0,
        };
        HslAdjust {
            lightness,
            saturation,
            hue_deg,
        }
    }
}

fn to_u8(v: f32) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

fn lab_f(t: f32) -> f32 {
    if t > 0.008_856 {
        t.cbrt()
    } else {
        7.787 * t + 16.0 / 116.0
    }
}

fn lab_f_inv(f: f32) -> f32 {
    let t = f * f * f;
    if t > 0.008_856 {
        t
    } else {
        (f - 16.0 / 116.0) / 7.787
    }
}

/// sRGB to Lab with every channel on the 0..255 scale: `L * 255 / 100`,
/// `a + 128`, `b + 128`.
pub(crate) fn rgb_to_lab8(rgb: [u8; 3]) -> [f32; 3] {
    let [r, g, b] = rgb.map(|c| srgb_to_linear(c as f32 / 255.0));
    let x = (0.412_453 * r + 0.357_580 * g + 0.180_423 * b) / WHITE_X;
    let y = 0.212_671 * r + 0.715_160 * g + 0.072_169 * b;
    let z = (0.019_334 * r + 0.119_193 * g + 0.950_227 * b) / WHITE_Z;
    let (fx, fy, fz) = (lab_f(x), lab_f(y), lab_f(z));
    let l = 116.0 * fy - 16.0;
    [
        (l * 255.0 / 100.0).clamp(0.0, 255.0),
        (500.0 * (fx - fy) + 128.0).clamp(0.0, 255.0),
        (200.0 * (fy - fz) + 128.0).clamp(0.0, 255.0),
    ]
}

pub(crate) fn lab8_to_rgb(lab: [f32; 3]) -> [u8; 3] {
    let l = lab[0] * 100.0 / 255.0;
    let a = lab[1] - 128.0;
    let b = lab[2] - 128.0;
    let fy = (l + 16.0) / 116.0;
    let fx = fy + a / 500.0;
    let fz = fy - b / 200.0;
    let x = lab_f_inv(fx) * WHITE_X;
    let y = lab_f_inv(fy);
    let z = lab_f_inv(fz) * WHITE_Z;
    let r = 3.240_479 * x - 1.537_150 * y - 0.498_535 * z;
    let g = -0.969_256 * x + 1.875_992 * y + 0.041_556 * z;
    let b = 0.055_648 * x - 0.204_043 * y + 1.057_311 * z;
    [r, g, b].map(|c| to_u8(linear_to_srgb(c.clamp(0.0, 1.0))))
}

fn wrap_unit(v: f32) -> f32 {
    let w = v.rem_euclid(1.0);
    if w >= 1.0 { 0.0 } else { w }
}

pub(crate) fn rgb_to_hsl(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g.max(b));
    let min = r.min(g.min(b));
    let l = (max + min) * 0.5;
    let d = max - min;

    if d <= 1e-6 {
        return (0.0, 0.0, l);
    }

    let s = d / (1.0 - (2.0 * l - 1.0).abs());
    let h = if max == r {
        ((g - b) / d).rem_euclid(6.0)
    } else if max == g {
        (b - r) / d + 2.0
    } else {
        (r - g) / d + 4.0
    };
    (wrap_unit(h / 6.0), s.clamp(0.0, 1.0), l.clamp(0.0, 1.0))
}

pub(crate) fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s <= 1e-6 {
        return (l, l, l);
    }

    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;

    let channel = |t: f32| {
        let t = wrap_unit(t);
        if t < 1.0 / 6.0 {
            p + (q - p) * 6.0 * t
        } else if t < 0.5 {
            q
        } else if t < 2.0 / 3.0 {
            p + (q - p) * (2.0 / 3.0 - t) * 6.0
        } else {
            p
        }
    };
    (
        channel(h + 1.0 / 3.0).clamp(0.0, 1.0),
        channel(h).clamp(0.0, 1.0),
        channel(h - 1.0 / 3.0).clamp(0.0, 1.0),
    )
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, ImageBuffer, Luma, Rgb, Rgba};

    use super::*;

    fn rgb(px: [u8; 3]) -> RasterImage {
        RasterImage::from_dynamic(DynamicImage::ImageRgb8(ImageBuffer::from_pixel(4, 4, Rgb(px))))
            .unwrap()
    }

    #[test]
    fn lab_round_trip_is_close() {
        for px in [[0u8, 0, 0], [255, 255, 255], [200, 40, 90], [12, 180, 240], [128, 128, 128]] {
            let back = lab8_to_rgb(rgb_to_lab8(px));
            for c in 0..3 {
                assert!(px[c].abs_diff(back[c]) <= 2, "{px:?} -> {back:?}");
            }
        }
    }

    #[test]
    fn neutral_grey_has_centred_chroma() {
        let lab = rgb_to_lab8([128, 128, 128]);
        assert!((lab[1] - 128.0).abs() < 0.5);
        assert!((lab[2] - 128.0).abs() < 0.5);
    }

    #[test]
    fn positive_shift_warms() {
        let img = rgb([120, 120, 120]);
        let out = img.adjust_color_temperature(10).as_dynamic().to_rgb8();
        let p = out.get_pixel(0, 0);
        assert!(p[0] > p[2], "expected warmer pixel, got {:?}", p.0);

        let out = img.adjust_color_temperature(-10).as_dynamic().to_rgb8();
        let p = out.get_pixel(0, 0);
        assert!(p[2] > p[0], "expected cooler pixel, got {:?}", p.0);
    }

    #[test]
    fn temperature_keeps_alpha_and_skips_grey() {
        let rgba = RasterImage::from_dynamic(DynamicImage::ImageRgba8(ImageBuffer::from_pixel(
            2,
            2,
            Rgba([100u8, 110, 120, 77]),
        )))
        .unwrap();
        let out = rgba.adjust_color_temperature(10);
        assert_eq!(out.channels(), 4);
        assert_eq!(out.to_rgba8().get_pixel(1, 1)[3], 77);

        let gray = RasterImage::from_dynamic(DynamicImage::ImageLuma8(ImageBuffer::from_pixel(
            2,
            2,
            Luma([90u8]),
        )))
        .unwrap();
        let out = gray.adjust_color_temperature(10);
        assert_eq!(out.as_dynamic().to_luma8().as_raw(), gray.as_dynamic().to_luma8().as_raw());
    }

    #[test]
    fn hsl_helpers_round_trip() {
        for (r, g, b) in [(1.0, 0.0, 0.0), (0.2, 0.6, 0.4), (0.9, 0.9, 0.1), (0.3, 0.3, 0.3)] {
            let (h, s, l) = rgb_to_hsl(r, g, b);
            let (r2, g2, b2) = hsl_to_rgb(h, s, l);
            assert!((r - r2).abs() < 1e-4 && (g - g2).abs() < 1e-4 && (b - b2).abs() < 1e-4);
        }
    }

    #[test]
    fn dark_flat_image_is_brightened_and_saturated() {
        let img = rgb([60, 50, 40]);
        let before = HslStats::measure(img.as_dynamic().to_rgb8().as_raw(), 3);
        let out = img.adjust_hsl();
        let after = HslStats::measure(out.as_dynamic().to_rgb8().as_raw(), 3);
        assert!(after.lightness > before.lightness);
        assert!(after.saturation > before.saturation);
    }

    #[test]
    fn balanced_image_is_left_alone() {
        let adjust = HslStats {
            lightness: 130.0,
            saturation: 150.0,
            hue_deg: Some(100.0),
        }
        .adjustment();
        assert!(adjust.is_identity());
    }

    #[test]
    fn hue_nudge_follows_cast() {
        let stats = |h| HslStats {
            lightness: 130.0,
            saturation: 150.0,
            hue_deg: Some(h),
        };
        assert_eq!(stats(220.0).adjustment().hue_deg, -HUE_NUDGE_DEG);
        assert_eq!(stats(20.0).adjustment().hue_deg, HUE_NUDGE_DEG);
        assert_eq!(stats(340.0).adjustment().hue_deg, HUE_NUDGE_DEG);
        assert_eq!(stats(100.0).adjustment().hue_deg, 0.0);
    }
}
