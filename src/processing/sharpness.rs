use imageproc::filter::{gaussian_blur_f32, laplacian_filter};

use crate::raster::{Eight, RasterImage};

const BLUR_SIGMA: f32 = 1.5;
const MIN_STRENGTH: f32 = 0.05;

/// Variance of the 4-neighbour Laplacian of the grey image. Low values mean a
/// soft image.
pub fn laplacian_variance(img: &RasterImage) -> f64 {
    let lap = laplacian_filter(&img.gray8());
    let values = lap.as_raw();
    let n = values.len().max(1) as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    values
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n
}

/// Maps Laplacian variance to an unsharp-mask amount.
pub fn sharpen_strength(variance: f64) -> f32 {
    if variance < 50.0 {
        2.0
    } else if variance < 150.0 {
        1.0 + ((150.0 - variance) / 100.0) as f32
    } else if variance < 300.0 {
        0.5
    } else {
        0.0
    }
}

/// Sharpens soft images more than crisp ones; already sharp images come back
/// as an identical copy.
pub fn adaptive_sharpen(img: &RasterImage) -> RasterImage {
    let strength = sharpen_strength(laplacian_variance(img));
    if strength <= MIN_STRENGTH {
        return img.clone();
    }
    unsharp_mask(img, strength)
}

/// `out = img * (1 + amount) - blur(img) * amount`, alpha untouched.
pub fn unsharp_mask(img: &RasterImage, amount: f32) -> RasterImage {
    let mut eight = img.to_8bit();
    let blurred = match &eight {
        Eight::Gray(buf) => gaussian_blur_f32(buf, BLUR_SIGMA).into_raw(),
        Eight::Rgb(buf) => gaussian_blur_f32(buf, BLUR_SIGMA).into_raw(),
        Eight::Rgba(buf) => gaussian_blur_f32(buf, BLUR_SIGMA).into_raw(),
    };
    let stride = eight.channels();
    let colour = if stride == 4 { 3 } else { stride };
    for (px, blur) in eight
        .samples_mut()
        .chunks_exact_mut(stride)
        .zip(blurred.chunks_exact(stride))
    {
        for c in 0..colour {
            let sharp = px[c] as f32 * (1.0 + amount) - blur[c] as f32 * amount;
            px[c] = sharp.round().clamp(0.0, 255.0) as u8;
        }
    }
    RasterImage::from_8bit(eight)
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, ImageBuffer, Luma, Rgba};

    use super::*;

    fn rgba(buf: ImageBuffer<Rgba<u8>, Vec<u8>>) -> RasterImage {
        RasterImage::from_dynamic(DynamicImage::ImageRgba8(buf)).unwrap()
    }

    #[test]
    fn strength_breakpoints() {
        assert_eq!(sharpen_strength(0.0), 2.0);
        assert_eq!(sharpen_strength(49.9), 2.0);
        assert_eq!(sharpen_strength(50.0), 2.0);
        assert!((sharpen_strength(100.0) - 1.5).abs() < 1e-6);
        assert_eq!(sharpen_strength(150.0), 0.5);
        assert_eq!(sharpen_strength(299.0), 0.5);
        assert_eq!(sharpen_strength(300.0), 0.0);
    }

    #[test]
    fn flat_image_is_unchanged() {
        let img = rgba(ImageBuffer::from_pixel(6, 6, Rgba([128, 128, 128, 255])));
        assert_eq!(laplacian_variance(&img), 0.0);
        let out = img.adjust_sharpen();
        assert_eq!(img.to_rgba8(), out.to_rgba8());
    }

    #[test]
    fn soft_edge_is_sharpened() {
        // Gentle ramp with flat shoulders: the Laplacian is only non-zero at
        // the two bends.
        let level = |x: u32| (60 + 4 * x.saturating_sub(8).min(30)) as u8;
        let img = rgba(ImageBuffer::from_fn(64, 8, |x, _| {
            let v = level(x);
            Rgba([v, v, v, 255])
        }));
        let variance = laplacian_variance(&img);
        assert!(variance < 50.0, "variance {variance}");

        let out = img.adjust_sharpen().to_rgba8();
        assert_ne!(img.to_rgba8(), out);
        // Overshoot: darker where the ramp leaves the dark shoulder, brighter
        // where it reaches the light one.
        let low = out.get_pixel(8, 4)[0];
        let high = out.get_pixel(38, 4)[0];
        assert!(low < level(8), "low bend {low}");
        assert!(high > level(38), "high bend {high}");
        assert_eq!(out.get_pixel(0, 0)[3], 255);
    }

    #[test]
    fn busy_image_is_skipped() {
        let img = RasterImage::from_dynamic(DynamicImage::ImageLuma8(ImageBuffer::from_fn(
            16,
            16,
            |x, y| Luma([if (x + y) % 2 == 0 { 0u8 } else { 255 }]),
        )))
        .unwrap();
        assert!(laplacian_variance(&img) >= 300.0);
        let out = img.adjust_sharpen();
        assert_eq!(out.as_dynamic().to_luma8().as_raw(), img.as_dynamic().to_luma8().as_raw());
    }
}
