use crate::gpu::{ProgramSource, Sampler, Uniforms};
use crate::processing::color::{hsl_to_rgb, rgb_to_hsl};

use super::{add2, sub2, texel_step};

pub const BRIGHTNESS: ProgramSource = ProgramSource {
    label: "brightness",
    uniforms: &["uBrightness"],
    body: r#"
fn effect(uv: vec2<f32>) -> vec4<f32> {
    let c = sample_src(uv);
    return vec4<f32>(c.rgb + vec3<f32>(params.uBrightness.x), c.a);
}
"#,
    kernel: brightness,
};

fn brightness(s: &Sampler<'_>, uv: [f32; 2], u: &Uniforms<'_>) -> [f32; 4] {
    let c = s.sample(uv);
    let b = u.float("uBrightness");
    [c[0] + b, c[1] + b, c[2] + b, c[3]]
}

pub const CONTRAST: ProgramSource = ProgramSource {
    label: "contrast",
    uniforms: &["uContrast"],
    body: r#"
fn effect(uv: vec2<f32>) -> vec4<f32> {
    let c = sample_src(uv);
    return vec4<f32>((c.rgb - vec3<f32>(0.5)) * params.uContrast.x + vec3<f32>(0.5), c.a);
}
"#,
    kernel: contrast,
};

fn contrast(s: &Sampler<'_>, uv: [f32; 2], u: &Uniforms<'_>) -> [f32; 4] {
    let c = s.sample(uv);
    let k = u.float("uContrast");
    let f = |v: f32| (v - 0.5) * k + 0.5;
    [f(c[0]), f(c[1]), f(c[2]), c[3]]
}

/// Cross-shaped 3x3 sharpen, blended with the source by `uSharpness`.
pub const SHARPNESS: ProgramSource = ProgramSource {
    label: "sharpness",
    uniforms: &["uSharpness"],
    body: r#"
fn effect(uv: vec2<f32>) -> vec4<f32> {
    let px = vec2<f32>(1.0) / max(params.resolution.xy, vec2<f32>(1.0));
    let c = sample_src(uv);
    let conv = 5.0 * c
        - sample_src(uv + vec2<f32>(px.x, 0.0))
        - sample_src(uv - vec2<f32>(px.x, 0.0))
        - sample_src(uv + vec2<f32>(0.0, px.y))
        - sample_src(uv - vec2<f32>(0.0, px.y));
    return mix(c, conv, params.uSharpness.x);
}
"#,
    kernel: sharpness,
};

fn sharpness(s: &Sampler<'_>, uv: [f32; 2], u: &Uniforms<'_>) -> [f32; 4] {
    let [dx, dy] = texel_step(u.resolution());
    let c = s.sample(uv);
    let l = s.sample(sub2(uv, [dx, 0.0]));
    let r = s.sample(add2(uv, [dx, 0.0]));
    let t = s.sample(sub2(uv, [0.0, dy]));
    let b = s.sample(add2(uv, [0.0, dy]));
    let amount = u.float("uSharpness");
    let mut out = [0.0; 4];
    for i in 0..4 {
        let conv = 5.0 * c[i] - l[i] - r[i] - t[i] - b[i];
        out[i] = c[i] + (conv - c[i]) * amount;
    }
    out
}

/// Hue rotation in degrees, saturation scale, and a lightness offset centred
/// on 0.5.
pub const HSL: ProgramSource = ProgramSource {
    label: "hsl",
    uniforms: &["uHue", "uSaturation", "uLightness"],
    body: r#"
fn rgb_to_hsl(c: vec3<f32>) -> vec3<f32> {
    let mx = max(c.r, max(c.g, c.b));
    let mn = min(c.r, min(c.g, c.b));
    let l = (mx + mn) * 0.5;
    let d = mx - mn;
    if (d <= 1e-6) {
        return vec3<f32>(0.0, 0.0, l);
    }
    let s = d / (1.0 - abs(2.0 * l - 1.0));
    var h: f32;
    if (mx == c.r) {
        h = (c.g - c.b) / d;
        h = h - 6.0 * floor(h / 6.0);
    } else if (mx == c.g) {
        h = (c.b - c.r) / d + 2.0;
    } else {
        h = (c.r - c.g) / d + 4.0;
    }
    return vec3<f32>(fract(h / 6.0), clamp(s, 0.0, 1.0), clamp(l, 0.0, 1.0));
}

fn hue_channel(p: f32, q: f32, t_in: f32) -> f32 {
    let t = fract(t_in);
    if (t < 1.0 / 6.0) {
        return p + (q - p) * 6.0 * t;
    }
    if (t < 0.5) {
        return q;
    }
    if (t < 2.0 / 3.0) {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    return p;
}

fn hsl_to_rgb(hsl: vec3<f32>) -> vec3<f32> {
    let h = hsl.x;
    let s = hsl.y;
    let l = hsl.z;
    if (s <= 1e-6) {
        return vec3<f32>(l);
    }
    let q = select(l + s - l * s, l * (1.0 + s), l < 0.5);
    let p = 2.0 * l - q;
    let rgb = vec3<f32>(
        hue_channel(p, q, h + 1.0 / 3.0),
        hue_channel(p, q, h),
        hue_channel(p, q, h - 1.0 / 3.0),
    );
    return clamp(rgb, vec3<f32>(0.0), vec3<f32>(1.0));
}

fn effect(uv: vec2<f32>) -> vec4<f32> {
    let c = sample_src(uv);
    var hsl = rgb_to_hsl(c.rgb);
    hsl.x = fract(hsl.x + params.uHue.x / 360.0);
    hsl.y = clamp(hsl.y * params.uSaturation.x, 0.0, 1.0);
    hsl.z = clamp(hsl.z + params.uLightness.x - 0.5, 0.0, 1.0);
    return vec4<f32>(hsl_to_rgb(hsl), c.a);
}
"#,
    kernel: hsl,
};

fn hsl(s: &Sampler<'_>, uv: [f32; 2], u: &Uniforms<'_>) -> [f32; 4] {
    let c = s.sample(uv);
    let (h, sat, l) = rgb_to_hsl(c[0], c[1], c[2]);
    let h = (h + u.float("uHue") / 360.0).rem_euclid(1.0);
    let sat = (sat * u.float("uSaturation")).clamp(0.0, 1.0);
    let l = (l + u.float("uLightness") - 0.5).clamp(0.0, 1.0);
    let (r, g, b) = hsl_to_rgb(h, sat, l);
    [r, g, b, c[3]]
}

pub const TEMPERATURE: ProgramSource = ProgramSource {
    label: "temperature",
    uniforms: &["uTemperature"],
    body: r#"
fn effect(uv: vec2<f32>) -> vec4<f32> {
    let c = sample_src(uv);
    let t = params.uTemperature.x * 0.1;
    return vec4<f32>(c.r + t, c.g, c.b - t, c.a);
}
"#,
    kernel: temperature,
};

fn temperature(s: &Sampler<'_>, uv: [f32; 2], u: &Uniforms<'_>) -> [f32; 4] {
    let c = s.sample(uv);
    let t = u.float("uTemperature") * 0.1;
    [c[0] + t, c[1], c[2] - t, c[3]]
}

// Gamma 0 would divide by zero; clamp to a tiny positive value instead.
pub const GAMMA: ProgramSource = ProgramSource {
    label: "gamma",
    uniforms: &["uGamma"],
    body: r#"
fn effect(uv: vec2<f32>) -> vec4<f32> {
    let c = sample_src(uv);
    let g = max(params.uGamma.x, 0.001);
    return vec4<f32>(pow(c.rgb, vec3<f32>(1.0 / g)), c.a);
}
"#,
    kernel: gamma,
};

fn gamma(s: &Sampler<'_>, uv: [f32; 2], u: &Uniforms<'_>) -> [f32; 4] {
    let c = s.sample(uv);
    let inv = 1.0 / u.float("uGamma").max(0.001);
    [c[0].powf(inv), c[1].powf(inv), c[2].powf(inv), c[3]]
}

#[cfg(test)]
mod tests {
    use image::{ImageBuffer, Rgba};

    use super::*;
    use crate::shaders::testing::{assert_backends_agree, gradient, run};

    #[test]
    fn brightness_shifts_and_clamps() {
        let input = ImageBuffer::from_pixel(2, 2, Rgba([100u8, 200, 250, 77]));
        let out = run(&BRIGHTNESS, &input, &[[0.2, 0.0, 0.0, 0.0]]);
        assert_eq!(out.get_pixel(1, 1).0, [151, 251, 255, 77]);
    }

    #[test]
    fn neutral_settings_leave_pixels_alone() {
        let input = gradient(9, 7);
        let cases: [(&ProgramSource, [f32; 4]); 5] = [
            (&BRIGHTNESS, [0.0; 4]),
            (&CONTRAST, [1.0, 0.0, 0.0, 0.0]),
            (&SHARPNESS, [0.0; 4]),
            (&TEMPERATURE, [0.0; 4]),
            (&GAMMA, [1.0, 0.0, 0.0, 0.0]),
        ];
        for (program, param) in cases {
            let out = run(program, &input, &[param]);
            assert_eq!(out, input, "{}", program.label);
        }
        let out = run(&HSL, &input, &[[0.0; 4], [1.0, 0.0, 0.0, 0.0], [0.5, 0.0, 0.0, 0.0]]);
        for (a, b) in out.as_raw().iter().zip(input.as_raw()) {
            assert!(a.abs_diff(*b) <= 1);
        }
    }

    #[test]
    fn contrast_zero_flattens_to_mid_grey() {
        let out = run(&CONTRAST, &gradient(4, 4), &[[0.0; 4]]);
        assert!(out.pixels().all(|p| p.0[..3] == [128, 128, 128]));
    }

    #[test]
    fn sharpen_boosts_an_isolated_dot() {
        let mut input = ImageBuffer::from_pixel(5, 5, Rgba([100u8, 100, 100, 255]));
        input.put_pixel(2, 2, Rgba([140, 140, 140, 255]));
        let out = run(&SHARPNESS, &input, &[[1.0, 0.0, 0.0, 0.0]]);
        assert_eq!(out.get_pixel(2, 2)[0], 255);
        assert_eq!(out.get_pixel(1, 2)[0], 60);
        assert_eq!(out.get_pixel(0, 0)[0], 100);
    }

    #[test]
    fn hue_rotation_moves_red_to_green() {
        let input = ImageBuffer::from_pixel(1, 1, Rgba([255u8, 0, 0, 255]));
        let out = run(&HSL, &input, &[[120.0, 0.0, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0], [0.5, 0.0, 0.0, 0.0]]);
        assert_eq!(out.get_pixel(0, 0).0, [0, 255, 0, 255]);
    }

    #[test]
    fn temperature_warms_red_and_cools_blue() {
        let input = ImageBuffer::from_pixel(1, 1, Rgba([100u8, 100, 100, 255]));
        let out = run(&TEMPERATURE, &input, &[[1.0, 0.0, 0.0, 0.0]]);
        let p = out.get_pixel(0, 0).0;
        assert!(p[0] > 100 && p[2] < 100 && p[1] == 100);
    }

    #[test]
    fn gamma_above_one_lifts_midtones() {
        let input = ImageBuffer::from_pixel(1, 1, Rgba([64u8, 128, 192, 255]));
        let out = run(&GAMMA, &input, &[[2.0, 0.0, 0.0, 0.0]]);
        let p = out.get_pixel(0, 0).0;
        assert!(p[0] > 64 && p[1] > 128 && p[2] > 192);
        let zero = run(&GAMMA, &input, &[[0.0; 4]]);
        assert!(zero.pixels().all(|p| p.0[..3] == [0, 0, 0]));
    }

    #[test]
    fn wgpu_matches_software() {
        assert_backends_agree(&BRIGHTNESS, &[[0.2, 0.0, 0.0, 0.0]]);
        assert_backends_agree(&CONTRAST, &[[1.4, 0.0, 0.0, 0.0]]);
        assert_backends_agree(&SHARPNESS, &[[0.7, 0.0, 0.0, 0.0]]);
        assert_backends_agree(
            &HSL,
            &[[45.0, 0.0, 0.0, 0.0], [1.3, 0.0, 0.0, 0.0], [0.6, 0.0, 0.0, 0.0]],
        );
        assert_backends_agree(&TEMPERATURE, &[[-0.5, 0.0, 0.0, 0.0]]);
        assert_backends_agree(&GAMMA, &[[1.6, 0.0, 0.0, 0.0]]);
    }
}
