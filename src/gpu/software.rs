use image::RgbaImage;
use rayon::prelude::*;

use super::ProgramSource;

/// Clamp-to-edge view over an input texture, mirroring `texel` and
/// `sample_src` in the WGSL prelude.
pub struct Sampler<'a> {
    image: &'a RgbaImage,
    width: i32,
    height: i32,
}

impl<'a> Sampler<'a> {
    pub fn new(image: &'a RgbaImage) -> Self {
        Self {
            image,
            width: image.width() as i32,
            height: image.height() as i32,
        }
    }

    pub fn size(&self) -> [f32; 2] {
        [self.width as f32, self.height as f32]
    }

    /// Normalised texel at integer coordinates, clamped to the edge.
    pub fn texel(&self, x: i32, y: i32) -> [f32; 4] {
        let x = x.clamp(0, self.width - 1) as u32;
        let y = y.clamp(0, self.height - 1) as u32;
        self.image.get_pixel(x, y).0.map(|c| c as f32 / 255.0)
    }

    /// Bilinear sample at `uv`, texel centres at `(i + 0.5) / size`.
    pub fn sample(&self, uv: [f32; 2]) -> [f32; 4] {
        let px = uv[0] * self.width as f32 - 0.5;
        let py = uv[1] * self.height as f32 - 0.5;
        let (bx, by) = (px.floor(), py.floor());
        let (fx, fy) = (px - bx, py - by);
        let (ix, iy) = (bx as i32, by as i32);
        let top = mix4(self.texel(ix, iy), self.texel(ix + 1, iy), fx);
        let bot = mix4(self.texel(ix, iy + 1), self.texel(ix + 1, iy + 1), fx);
        mix4(top, bot, fy)
    }
}

/// Named uniform slots for one pass. Unknown names read as zero, the same as
/// an unset uniform on the device.
pub struct Uniforms<'a> {
    names: &'a [&'static str],
    slots: &'a [[f32; 4]],
}

impl<'a> Uniforms<'a> {
    pub fn new(names: &'a [&'static str], slots: &'a [[f32; 4]]) -> Self {
        Self { names, slots }
    }

    pub fn resolution(&self) -> [f32; 2] {
        let s = self.slots.first().copied().unwrap_or_default();
        [s[0], s[1]]
    }

    pub fn vec4(&self, name: &str) -> [f32; 4] {
        self.names
            .iter()
            .position(|n| *n == name)
            .and_then(|i| self.slots.get(i + 1))
            .copied()
            .unwrap_or_default()
    }

    pub fn vec2(&self, name: &str) -> [f32; 2] {
        let v = self.vec4(name);
        [v[0], v[1]]
    }

    pub fn float(&self, name: &str) -> f32 {
        self.vec4(name)[0]
    }

    pub fn int(&self, name: &str) -> i32 {
        self.float(name).round() as i32
    }
}

pub(crate) fn mix4(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
        a[3] + (b[3] - a[3]) * t,
    ]
}

/// Evaluates `source.kernel` at every texel centre of `target`.
pub(super) fn render(source: &ProgramSource, input: &RgbaImage, target: &mut RgbaImage, slots: &[[f32; 4]]) {
    let sampler = Sampler::new(input);
    let uniforms = Uniforms::new(source.uniforms, slots);
    let kernel = source.kernel;
    let (w, h) = target.dimensions();
    let row_len = w as usize * 4;
    target
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| {
            let v = (y as f32 + 0.5) / h as f32;
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let uv = [(x as f32 + 0.5) / w as f32, v];
                let out = kernel(&sampler, uv, &uniforms);
                for (dst, c) in px.iter_mut().zip(out) {
                    *dst = (c.clamp(0.0, 1.0) * 255.0).round() as u8;
                }
            }
        });
}

#[cfg(test)]
mod tests {
    use image::{ImageBuffer, Rgba};

    use super::*;

    #[test]
    fn sample_at_texel_centre_is_exact() {
        let img = ImageBuffer::from_fn(4, 2, |x, y| Rgba([(x * 60) as u8, (y * 255) as u8, 0, 255]));
        let s = Sampler::new(&img);
        let px = s.sample([2.5 / 4.0, 1.5 / 2.0]);
        assert!((px[0] - 120.0 / 255.0).abs() < 1e-5);
        assert!((px[1] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn sample_between_texels_blends_and_clamps() {
        let img = ImageBuffer::from_fn(2, 1, |x, _| Rgba([(x * 200) as u8, 0, 0, 255]));
        let s = Sampler::new(&img);
        assert!((s.sample([0.5, 0.5])[0] - 100.0 / 255.0).abs() < 1e-5);
        assert_eq!(s.sample([-1.0, 0.5])[0], 0.0);
        assert!((s.sample([2.0, 0.5])[0] - 200.0 / 255.0).abs() < 1e-5);
        assert_eq!(s.texel(-5, 9), s.texel(0, 0));
    }

    #[test]
    fn uniforms_resolve_by_name() {
        let slots = [[8.0, 6.0, 0.0, 0.0], [0.25, 0.0, 0.0, 0.0], [0.3, 0.7, 0.0, 0.0]];
        let u = Uniforms::new(&["uAmount", "uCentre"], &slots);
        assert_eq!(u.resolution(), [8.0, 6.0]);
        assert_eq!(u.float("uAmount"), 0.25);
        assert_eq!(u.vec2("uCentre"), [0.3, 0.7]);
        assert_eq!(u.float("uMissing"), 0.0);
    }
}
