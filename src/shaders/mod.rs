//! Filter programs. Each pass is a WGSL `effect` body paired with a CPU
//! kernel that computes the same thing for the software backend.

pub mod effects;
pub mod settings;

const LUMA: [f32; 3] = [0.299, 0.587, 0.114];

fn luma(c: [f32; 4]) -> f32 {
    c[0] * LUMA[0] + c[1] * LUMA[1] + c[2] * LUMA[2]
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn add2(a: [f32; 2], b: [f32; 2]) -> [f32; 2] {
    [a[0] + b[0], a[1] + b[1]]
}

fn sub2(a: [f32; 2], b: [f32; 2]) -> [f32; 2] {
    [a[0] - b[0], a[1] - b[1]]
}

fn texel_step(resolution: [f32; 2]) -> [f32; 2] {
    [1.0 / resolution[0].max(1.0), 1.0 / resolution[1].max(1.0)]
}
