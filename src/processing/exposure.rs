use crate::raster::{LinearStretch, RasterImage};

/// Applies `255 * (v / 255)^(1 / gamma)` through a 256-entry lookup table.
pub fn adjust_gamma(img: &RasterImage, gamma: f64) -> RasterImage {
    if !gamma.is_finite() || gamma <= 0.0 {
        return img.clone();
    }
    let lut = gamma_lut(gamma);
    img.map_color_samples(|v| lut[v as usize])
}

fn gamma_lut(gamma: f64) -> [u8; 256] {
    let inv = 1.0 / gamma;
    let mut lut = [0u8; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        *slot = ((i as f64 / 255.0).powf(inv) * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Stretches contrast so that `clip_percent` of the grey histogram mass is
/// clipped, half from each tail. Degenerate histograms leave the image as is.
pub fn auto_brightness_contrast(img: &RasterImage, clip_percent: f64) -> (RasterImage, LinearStretch) {
    let gray = img.gray8();
    let mut hist = [0f64; 256];
    for &v in gray.as_raw() {
        hist[v as usize] += 1.0;
    }
    let stretch = stretch_from_histogram(&hist, clip_percent);
    if stretch == LinearStretch::IDENTITY {
        return (img.clone(), stretch);
    }
    let LinearStretch { alpha, beta } = stretch;
    let out = img.map_color_samples(|v| (alpha * v as f64 + beta).round().clamp(0.0, 255.0) as u8);
    (out, stretch)
}

fn stretch_from_histogram(hist: &[f64; 256], clip_percent: f64) -> LinearStretch {
    let mut acc = [0f64; 256];
    acc[0] = hist[0];
    for i in 1..256 {
        acc[i] = acc[i - 1] + hist[i];
    }
    let total = acc[255];
    let clip = clip_percent.max(0.0) * (total / 100.0) / 2.0;

    let mut min_gray = 0usize;
    while min_gray < 255 && acc[min_gray] < clip {
        min_gray += 1;
    }
    let mut max_gray = 255usize;
    while max_gray > 0 && acc[max_gray] >= total - clip {
        max_gray -= 1;
    }

    if max_gray <= min_gray {
        return LinearStretch::IDENTITY;
    }
    let alpha = 255.0 / (max_gray - min_gray) as f64;
    LinearStretch {
        alpha,
        beta: -(min_gray as f64) * alpha,
    }
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, ImageBuffer, Luma};

    use super::*;

    fn gradient() -> RasterImage {
        RasterImage::from_dynamic(DynamicImage::ImageLuma8(ImageBuffer::from_fn(256, 4, |x, _| {
            Luma([x as u8])
        })))
        .unwrap()
    }

    /// Worst round-trip error of `gamma` then `1 / gamma` per source level.
    fn round_trip_errors(gamma: f64) -> Vec<u8> {
        let back = gradient().adjust_gamma(gamma).adjust_gamma(1.0 / gamma);
        let back = back.as_dynamic().to_luma8();
        (0..=255u32)
            .map(|x| (x as u8).abs_diff(back.get_pixel(x, 0)[0]))
            .collect()
    }

    #[test]
    fn gamma_round_trip_error_is_bounded() {
        assert!(round_trip_errors(1.0).iter().all(|&e| e == 0));

        // Brightening first spreads the levels out, so nothing is lost.
        let brighten_first = round_trip_errors(2.0);
        assert!(brighten_first.iter().all(|&e| e <= 1), "{brighten_first:?}");

        // Darkening first merges the shadows into few 8-bit codes; the error
        // peaks at 11 levels and drops to one above level 64.
        let darken_first = round_trip_errors(0.5);
        assert_eq!(darken_first.iter().max(), Some(&11));
        assert!(darken_first[64..].iter().all(|&e| e <= 1), "{darken_first:?}");
    }

    #[test]
    fn gamma_above_one_brightens_midtones() {
        let img = RasterImage::from_dynamic(DynamicImage::ImageLuma8(ImageBuffer::from_pixel(
            1,
            1,
            Luma([64u8]),
        )))
        .unwrap();
        let out = img.adjust_gamma(2.0);
        assert_eq!(out.as_dynamic().to_luma8().get_pixel(0, 0)[0], 128);
    }

    #[test]
    fn wider_clip_never_decreases_alpha() {
        let img = gradient();
        let mut last = 0.0;
        for clip in 0..=10 {
            let (_, stretch) = img.auto_brightness_contrast(clip as f64);
            assert!(stretch.alpha >= last, "clip {clip}: {} < {last}", stretch.alpha);
            last = stretch.alpha;
        }
        assert!(last > 1.0);
    }

    #[test]
    fn flat_black_image_falls_back_to_identity() {
        let img = RasterImage::from_dynamic(DynamicImage::ImageLuma8(ImageBuffer::from_pixel(
            4,
            4,
            Luma([0u8]),
        )))
        .unwrap();
        let (out, stretch) = img.auto_brightness_contrast(1.0);
        assert_eq!(stretch, LinearStretch::IDENTITY);
        assert_eq!(out.as_dynamic().to_luma8().as_raw(), img.as_dynamic().to_luma8().as_raw());
    }

    #[test]
    fn stretch_maps_clip_points_to_full_range() {
        let img = RasterImage::from_dynamic(DynamicImage::ImageLuma8(ImageBuffer::from_fn(
            100,
            1,
            |x, _| Luma([100 + x as u8]),
        )))
        .unwrap();
        let (out, stretch) = img.auto_brightness_contrast(1.0);
        let LinearStretch { alpha, beta } = stretch;
        assert!((alpha * 100.0 + beta).abs() < 1e-9);
        assert!((alpha - 255.0 / 98.0).abs() < 1e-9);
        let out = out.as_dynamic().to_luma8();
        assert_eq!(out.get_pixel(0, 0)[0], 0);
        assert_eq!(out.get_pixel(98, 0)[0], 255);
        assert_eq!(out.get_pixel(99, 0)[0], 255);
    }
}
