use image::{GrayImage, Luma};
use imageproc::filter::{gaussian_blur_f32, median_filter};
use rayon::prelude::*;

use crate::processing::color::{lab8_to_rgb, rgb_to_lab8};
use crate::raster::{Eight, RasterImage};

pub const CLAHE_CLIP_LIMIT: f32 = 2.0;
pub const CLAHE_GRID: usize = 8;

const DETAIL_SIGMA: f32 = 2.0;
// Range sigma on the 0..255 lightness scale (0.3 of full range).
const DETAIL_RANGE: f32 = 0.3 * 255.0;
const DETAIL_GAIN: f32 = 3.0;

/// Contrast-limited adaptive histogram equalization of Lab lightness.
pub fn apply_clahe(img: &RasterImage) -> RasterImage {
    with_lightness(img, |plane| {
        let (w, h) = (plane.width() as usize, plane.height() as usize);
        clahe_plane(plane, w, h, CLAHE_CLIP_LIMIT, CLAHE_GRID);
    })
}

/// Boosts fine detail in lightness: the image is split into a smooth base and
/// a detail layer, and detail is amplified except across strong edges.
pub fn enhance_details(img: &RasterImage) -> RasterImage {
    with_lightness(img, |plane| {
        let base = gaussian_blur_f32(plane, DETAIL_SIGMA);
        for (v, b) in plane.iter_mut().zip(base.iter()) {
            let detail = *v as f32 - *b as f32;
            let edge = (-(detail / DETAIL_RANGE).powi(2)).exp();
            let gain = 1.0 + (DETAIL_GAIN - 1.0) * edge;
            *v = (*b as f32 + detail * gain).round().clamp(0.0, 255.0) as u8;
        }
    })
}

/// 3x3 median over colour channels; alpha is kept from the input.
pub fn denoise(img: &RasterImage) -> RasterImage {
    let eight = match img.to_8bit() {
        Eight::Gray(buf) => Eight::Gray(median_filter(&buf, 1, 1)),
        Eight::Rgb(buf) => Eight::Rgb(median_filter(&buf, 1, 1)),
        Eight::Rgba(buf) => {
            let mut out = median_filter(&buf, 1, 1);
            for (o, src) in out.pixels_mut().zip(buf.pixels()) {
                o[3] = src[3];
            }
            Eight::Rgba(out)
        }
    };
    RasterImage::from_8bit(eight)
}

/// Runs `op` on the lightness plane: the luma itself for grey images, Lab L
/// (0..255) otherwise. Chroma is carried through unquantized.
fn with_lightness(img: &RasterImage, op: impl FnOnce(&mut GrayImage)) -> RasterImage {
    let (w, h) = (img.width(), img.height());
    let eight = match img.to_8bit() {
        Eight::Gray(mut buf) => {
            op(&mut buf);
            Eight::Gray(buf)
        }
        mut colour => {
            let stride = colour.channels();
            let lab: Vec<[f32; 3]> = colour
                .samples_mut()
                .par_chunks_exact(stride)
                .map(|px| rgb_to_lab8([px[0], px[1], px[2]]))
                .collect();
            let mut plane = GrayImage::from_fn(w, h, |x, y| {
                Luma([lab[(y * w + x) as usize][0].round().clamp(0.0, 255.0) as u8])
            });
            op(&mut plane);
            colour
                .samples_mut()
                .par_chunks_exact_mut(stride)
                .zip(lab.par_iter())
                .zip(plane.as_raw().par_iter())
                .for_each(|((px, lab), &l)| {
                    let rgb = lab8_to_rgb([l as f32, lab[1], lab[2]]);
                    px[..3].copy_from_slice(&rgb);
                });
            colour
        }
    };
    RasterImage::from_8bit(eight)
}

/// In-place CLAHE over a `width` x `height` 8-bit plane split into a
/// `grid` x `grid` tile layout. Tile lookup tables are blended bilinearly
/// between tile centres.
pub fn clahe_plane(plane: &mut [u8], width: usize, height: usize, clip_limit: f32, grid: usize) {
    if width == 0 || height == 0 || plane.len() < width * height {
        return;
    }
    let gx = grid.clamp(1, width);
    let gy = grid.clamp(1, height);
    let xb: Vec<usize> = (0..=gx).map(|i| i * width / gx).collect();
    let yb: Vec<usize> = (0..=gy).map(|i| i * height / gy).collect();

    let mut luts = vec![[0u8; 256]; gx * gy];
    for ty in 0..gy {
        for tx in 0..gx {
            let mut hist = [0u32; 256];
            for y in yb[ty]..yb[ty + 1] {
                for &v in &plane[y * width + xb[tx]..y * width + xb[tx + 1]] {
                    hist[v as usize] += 1;
                }
            }
            let area = ((xb[tx + 1] - xb[tx]) * (yb[ty + 1] - yb[ty])) as u32;
            luts[ty * gx + tx] = tile_lut(&mut hist, area, clip_limit);
        }
    }

    let luts = &luts;
    plane[..width * height]
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            let fy = (y as f32 + 0.5) * gy as f32 / height as f32 - 0.5;
            let (y0, y1, wy) = blend_coords(fy, gy);
            for (x, v) in row.iter_mut().enumerate() {
                let fx = (x as f32 + 0.5) * gx as f32 / width as f32 - 0.5;
                let (x0, x1, wx) = blend_coords(fx, gx);
                let i = *v as usize;
                let top = luts[y0 * gx + x0][i] as f32 * (1.0 - wx) + luts[y0 * gx + x1][i] as f32 * wx;
                let bot = luts[y1 * gx + x0][i] as f32 * (1.0 - wx) + luts[y1 * gx + x1][i] as f32 * wx;
                *v = (top * (1.0 - wy) + bot * wy).round().clamp(0.0, 255.0) as u8;
            }
        });
}

fn blend_coords(f: f32, tiles: usize) -> (usize, usize, f32) {
    let last = tiles - 1;
    let lo = f.floor();
    let i0 = (lo.max(0.0) as usize).min(last);
    let i1 = (i0 + 1).min(last);
    let w = if f <= 0.0 || i0 == last { 0.0 } else { f - lo };
    (i0, i1, w)
}

fn tile_lut(hist: &mut [u32; 256], area: u32, clip_limit: f32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    if area == 0 {
        return lut;
    }
    if clip_limit > 0.0 {
        let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
        let mut excess = 0u32;
        for h in hist.iter_mut() {
            if *h > limit {
                excess += *h - limit;
                *h = limit;
            }
        }
        let bonus = excess / 256;
        let residual = (excess % 256) as usize;
        for h in hist.iter_mut() {
            *h += bonus;
        }
        if residual > 0 {
            let step = (256 / residual).max(1);
            for h in hist.iter_mut().step_by(step).take(residual) {
                *h += 1;
            }
        }
    }
    let scale = 255.0 / area as f32;
    let mut cdf = 0u32;
    for (slot, &h) in lut.iter_mut().zip(hist.iter()) {
        cdf += h;
        *slot = (cdf as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}
