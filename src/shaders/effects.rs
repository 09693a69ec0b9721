use crate::gpu::{ProgramSource, Sampler, Uniforms};

use super::{add2, luma, smoothstep, sub2, texel_step};

pub const BLOOM: ProgramSource = ProgramSource {
    label: "bloom",
    uniforms: &["uThreshold"],
    body: r#"
fn effect(uv: vec2<f32>) -> vec4<f32> {
    let c = sample_src(uv);
    let glow = max(c.rgb - vec3<f32>(params.uThreshold.x), vec3<f32>(0.0));
    return vec4<f32>(c.rgb + glow, c.a);
}
"#,
    kernel: bloom,
};

fn bloom(s: &Sampler<'_>, uv: [f32; 2], u: &Uniforms<'_>) -> [f32; 4] {
    let c = s.sample(uv);
    let t = u.float("uThreshold");
    let f = |v: f32| v + (v - t).max(0.0);
    [f(c[0]), f(c[1]), f(c[2]), c[3]]
}

pub const GAUSSIAN_BLUR_H: ProgramSource = ProgramSource {
    label: "gaussian_blur_h",
    uniforms: &["uBlurScale"],
    body: r#"
fn effect(uv: vec2<f32>) -> vec4<f32> {
    let d = vec2<f32>(params.uBlurScale.x / max(params.resolution.x, 1.0), 0.0);
    let c = 0.25 * sample_src(uv - d) + 0.5 * sample_src(uv) + 0.25 * sample_src(uv + d);
    return vec4<f32>(c.rgb, 1.0);
}
"#,
    kernel: gaussian_blur_h,
};

pub const GAUSSIAN_BLUR_V: ProgramSource = ProgramSource {
    label: "gaussian_blur_v",
    uniforms: &["uBlurScale"],
    body: r#"
fn effect(uv: vec2<f32>) -> vec4<f32> {
    let d = vec2<f32>(0.0, params.uBlurScale.x / max(params.resolution.y, 1.0));
    let c = 0.25 * sample_src(uv - d) + 0.5 * sample_src(uv) + 0.25 * sample_src(uv + d);
    return vec4<f32>(c.rgb, 1.0);
}
"#,
    kernel: gaussian_blur_v,
};

fn gaussian_blur_h(s: &Sampler<'_>, uv: [f32; 2], u: &Uniforms<'_>) -> [f32; 4] {
    let [dx, _] = texel_step(u.resolution());
    blur_1d(s, uv, [dx * u.float("uBlurScale"), 0.0])
}

fn gaussian_blur_v(s: &Sampler<'_>, uv: [f32; 2], u: &Uniforms<'_>) -> [f32; 4] {
    let [_, dy] = texel_step(u.resolution());
    blur_1d(s, uv, [0.0, dy * u.float("uBlurScale")])
}

fn blur_1d(s: &Sampler<'_>, uv: [f32; 2], d: [f32; 2]) -> [f32; 4] {
    let a = s.sample(sub2(uv, d));
    let b = s.sample(uv);
    let c = s.sample(add2(uv, d));
    let f = |i: usize| 0.25 * a[i] + 0.5 * b[i] + 0.25 * c[i];
    [f(0), f(1), f(2), 1.0]
}

/// Zoom blur: averages `uSteps` samples along the ray from `uCenter`.
pub const RADIAL_BLUR: ProgramSource = ProgramSource {
    label: "radial_blur",
    uniforms: &["uSteps", "uStrength", "uCenter"],
    body: r#"
fn effect(uv: vec2<f32>) -> vec4<f32> {
    let steps = max(i32(round(params.uSteps.x)), 2);
    let dir = uv - params.uCenter.xy;
    var acc = vec4<f32>(0.0);
    for (var i = 0; i < steps; i = i + 1) {
        let t = f32(i) / f32(steps - 1);
        acc = acc + sample_src(uv + dir * t * params.uStrength.x);
    }
    return acc / f32(steps);
}
"#,
    kernel: radial_blur,
};

fn radial_blur(s: &Sampler<'_>, uv: [f32; 2], u: &Uniforms<'_>) -> [f32; 4] {
    let steps = u.int("uSteps").max(2);
    let strength = u.float("uStrength");
    let dir = sub2(uv, u.vec2("uCenter"));
    let mut acc = [0.0f32; 4];
    for i in 0..steps {
        let t = i as f32 / (steps - 1) as f32;
        let px = s.sample([uv[0] + dir[0] * t * strength, uv[1] + dir[1] * t * strength]);
        for (a, v) in acc.iter_mut().zip(px) {
            *a += v;
        }
    }
    acc.map(|a| a / steps as f32)
}

/// Red and blue are sampled `uIntensity` apart horizontally (in texture
/// space).
pub const CHROMATIC_ABERRATION: ProgramSource = ProgramSource {
    label: "chromatic_aberration",
    uniforms: &["uIntensity"],
    body: r#"
fn effect(uv: vec2<f32>) -> vec4<f32> {
    let o = vec2<f32>(params.uIntensity.x, 0.0);
    return vec4<f32>(sample_src(uv + o).r, sample_src(uv).g, sample_src(uv - o).b, 1.0);
}
"#,
    kernel: chromatic_aberration,
};

fn chromatic_aberration(s: &Sampler<'_>, uv: [f32; 2], u: &Uniforms<'_>) -> [f32; 4] {
    let o = [u.float("uIntensity"), 0.0];
    [
        s.sample(add2(uv, o))[0],
        s.sample(uv)[1],
        s.sample(sub2(uv, o))[2],
        1.0,
    ]
}

pub const GRAYSCALE: ProgramSource = ProgramSource {
    label: "grayscale",
    uniforms: &[],
    body: r#"
fn effect(uv: vec2<f32>) -> vec4<f32> {
    let g = dot(sample_src(uv).rgb, vec3<f32>(0.299, 0.587, 0.114));
    return vec4<f32>(vec3<f32>(g), 1.0);
}
"#,
    kernel: grayscale,
};

fn grayscale(s: &Sampler<'_>, uv: [f32; 2], _: &Uniforms<'_>) -> [f32; 4] {
    let g = luma(s.sample(uv));
    [g, g, g, 1.0]
}

pub const SEPIA: ProgramSource = ProgramSource {
    label: "sepia",
    uniforms: &[],
    body: r#"
fn effect(uv: vec2<f32>) -> vec4<f32> {
    let c = sample_src(uv).rgb;
    return vec4<f32>(
        dot(c, vec3<f32>(0.393, 0.769, 0.189)),
        dot(c, vec3<f32>(0.349, 0.686, 0.168)),
        dot(c, vec3<f32>(0.272, 0.534, 0.131)),
        1.0,
    );
}
"#,
    kernel: sepia,
};

fn sepia(s: &Sampler<'_>, uv: [f32; 2], _: &Uniforms<'_>) -> [f32; 4] {
    let c = s.sample(uv);
    let row = |k: [f32; 3]| c[0] * k[0] + c[1] * k[1] + c[2] * k[2];
    [
        row([0.393, 0.769, 0.189]),
        row([0.349, 0.686, 0.168]),
        row([0.272, 0.534, 0.131]),
        1.0,
    ]
}

/// Binary Sobel edge map of the red channel.
pub const EDGE_DETECT: ProgramSource = ProgramSource {
    label: "edge_detect",
    uniforms: &["uThreshold"],
    body: r#"
fn red_at(uv: vec2<f32>, dx: f32, dy: f32) -> f32 {
    return sample_src(uv + vec2<f32>(dx, dy)).r;
}

fn effect(uv: vec2<f32>) -> vec4<f32> {
    let px = vec2<f32>(1.0) / max(params.resolution.xy, vec2<f32>(1.0));
    let tl = red_at(uv, -px.x, -px.y);
    let t = red_at(uv, 0.0, -px.y);
    let tr = red_at(uv, px.x, -px.y);
    let l = red_at(uv, -px.x, 0.0);
    let r = red_at(uv, px.x, 0.0);
    let bl = red_at(uv, -px.x, px.y);
    let b = red_at(uv, 0.0, px.y);
    let br = red_at(uv, px.x, px.y);
    let gx = -tl - 2.0 * l - bl + tr + 2.0 * r + br;
    let gy = -tl - 2.0 * t - tr + bl + 2.0 * b + br;
    let edge = select(0.0, 1.0, sqrt(gx * gx + gy * gy) > params.uThreshold.x);
    return vec4<f32>(vec3<f32>(edge), 1.0);
}
"#,
    kernel: edge_detect,
};

fn edge_detect(s: &Sampler<'_>, uv: [f32; 2], u: &Uniforms<'_>) -> [f32; 4] {
    let [px, py] = texel_step(u.resolution());
    let red = |dx: f32, dy: f32| s.sample([uv[0] + dx, uv[1] + dy])[0];
    let (tl, t, tr) = (red(-px, -py), red(0.0, -py), red(px, -py));
    let (l, r) = (red(-px, 0.0), red(px, 0.0));
    let (bl, b, br) = (red(-px, py), red(0.0, py), red(px, py));
    let gx = -tl - 2.0 * l - bl + tr + 2.0 * r + br;
    let gy = -tl - 2.0 * t - tr + bl + 2.0 * b + br;
    let edge = if (gx * gx + gy * gy).sqrt() > u.float("uThreshold") {
        1.0
    } else {
        0.0
    };
    [edge, edge, edge, 1.0]
}

/// Darkens pixels whose colour differs strongly from their four neighbours.
pub const OUTLINE: ProgramSource = ProgramSource {
    label: "outline",
    uniforms: &["uThreshold"],
    body: r#"
fn effect(uv: vec2<f32>) -> vec4<f32> {
    let px = vec2<f32>(1.0) / max(params.resolution.xy, vec2<f32>(1.0));
    let c = sample_src(uv).rgb;
    let edge = length(c - sample_src(uv - vec2<f32>(px.x, 0.0)).rgb)
        + length(c - sample_src(uv + vec2<f32>(px.x, 0.0)).rgb)
        + length(c - sample_src(uv - vec2<f32>(0.0, px.y)).rgb)
        + length(c - sample_src(uv + vec2<f32>(0.0, px.y)).rgb);
    if (edge > params.uThreshold.x) {
        return vec4<f32>(0.0, 0.0, 0.0, 1.0);
    }
    return vec4<f32>(c, 1.0);
}
"#,
    kernel: outline,
};

fn outline(s: &Sampler<'_>, uv: [f32; 2], u: &Uniforms<'_>) -> [f32; 4] {
    let [px, py] = texel_step(u.resolution());
    let c = s.sample(uv);
    let dist = |n: [f32; 4]| {
        ((c[0] - n[0]).powi(2) + (c[1] - n[1]).powi(2) + (c[2] - n[2]).powi(2)).sqrt()
    };
    let edge = dist(s.sample(sub2(uv, [px, 0.0])))
        + dist(s.sample(add2(uv, [px, 0.0])))
        + dist(s.sample(sub2(uv, [0.0, py])))
        + dist(s.sample(add2(uv, [0.0, py])));
    if edge > u.float("uThreshold") {
        [0.0, 0.0, 0.0, 1.0]
    } else {
        [c[0], c[1], c[2], 1.0]
    }
}

pub const POSTERIZE: ProgramSource = ProgramSource {
    label: "posterize",
    uniforms: &["uLevels"],
    body: r#"
fn effect(uv: vec2<f32>) -> vec4<f32> {
    let levels = f32(max(i32(round(params.uLevels.x)), 1));
    let c = sample_src(uv);
    return vec4<f32>(floor(c.rgb * levels) / levels, 1.0);
}
"#,
    kernel: posterize,
};

fn posterize(s: &Sampler<'_>, uv: [f32; 2], u: &Uniforms<'_>) -> [f32; 4] {
    let levels = u.int("uLevels").max(1) as f32;
    let c = s.sample(uv);
    let f = |v: f32| (v * levels).floor() / levels;
    [f(c[0]), f(c[1]), f(c[2]), 1.0]
}

/// Samples the centre of the first texel of each `uMosaicSize` cell.
pub const MOSAIC: ProgramSource = ProgramSource {
    label: "mosaic",
    uniforms: &["uMosaicSize"],
    body: r#"
fn effect(uv: vec2<f32>) -> vec4<f32> {
    let size = max(params.uMosaicSize.x, 1.0);
    let res = max(params.resolution.xy, vec2<f32>(1.0));
    let cell = (floor(uv * res / size) * size + vec2<f32>(0.5)) / res;
    return sample_src(cell);
}
"#,
    kernel: mosaic,
};

fn mosaic(s: &Sampler<'_>, uv: [f32; 2], u: &Uniforms<'_>) -> [f32; 4] {
    let size = u.float("uMosaicSize").max(1.0);
    let res = u.resolution().map(|r| r.max(1.0));
    let cell = |i: usize| ((uv[i] * res[i] / size).floor() * size + 0.5) / res[i];
    s.sample([cell(0), cell(1)])
}

pub const VIGNETTE: ProgramSource = ProgramSource {
    label: "vignette",
    uniforms: &["uVignetteStrength"],
    body: r#"
fn effect(uv: vec2<f32>) -> vec4<f32> {
    let c = sample_src(uv);
    let d = length(uv - vec2<f32>(0.5));
    let v = smoothstep(0.5, 0.9, 1.0 - params.uVignetteStrength.x * d);
    return vec4<f32>(c.rgb * v, c.a);
}
"#,
    kernel: vignette,
};

fn vignette(s: &Sampler<'_>, uv: [f32; 2], u: &Uniforms<'_>) -> [f32; 4] {
    let c = s.sample(uv);
    let d = ((uv[0] - 0.5).powi(2) + (uv[1] - 0.5).powi(2)).sqrt();
    let v = smoothstep(0.5, 0.9, 1.0 - u.float("uVignetteStrength") * d);
    [c[0] * v, c[1] * v, c[2] * v, c[3]]
}

pub const INVERT: ProgramSource = ProgramSource {
    label: "invert",
    uniforms: &[],
    body: r#"
fn effect(uv: vec2<f32>) -> vec4<f32> {
    let c = sample_src(uv);
    return vec4<f32>(vec3<f32>(1.0) - c.rgb, c.a);
}
"#,
    kernel: invert,
};

fn invert(s: &Sampler<'_>, uv: [f32; 2], _: &Uniforms<'_>) -> [f32; 4] {
    let c = s.sample(uv);
    [1.0 - c[0], 1.0 - c[1], 1.0 - c[2], c[3]]
}
