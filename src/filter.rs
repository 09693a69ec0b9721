use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::gpu::{GpuContext, GpuProgram, GpuResult, GpuTexture, ProgramSource};

/// A named uniform value. Every variant is packed into one `vec4<f32>` slot.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Int(i32),
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
}

impl ParamValue {
    fn slot(self) -> [f32; 4] {
        match self {
            ParamValue::Int(v) => [v as f32, 0.0, 0.0, 0.0],
            ParamValue::Float(v) => [v, 0.0, 0.0, 0.0],
            ParamValue::Vec2([x, y]) => [x, y, 0.0, 0.0],
            ParamValue::Vec3([x, y, z]) => [x, y, z, 0.0],
            ParamValue::Vec4(v) => v,
        }
    }
}

/// Ordered GPU passes sharing one parameter map.
///
/// Parameters are chain-global: a value set under `name` is bound to every
/// pass that declares a uniform of that name. Unset uniforms read as zero.
/// The texture returned by [`FilterChain::apply`] is one of the chain's own
/// render targets and is rewritten by the next `apply`.
pub struct FilterChain {
    context: GpuContext,
    programs: Vec<GpuProgram>,
    params: BTreeMap<String, ParamValue>,
    targets: [Option<GpuTexture>; 2],
}

impl FilterChain {
    /// A chain with no passes. Applying it returns the input unchanged.
    pub fn new(context: GpuContext) -> Self {
        Self::from_programs(context, Vec::new())
    }

    pub fn from_programs(context: GpuContext, programs: Vec<GpuProgram>) -> Self {
        Self {
            context,
            programs,
            params: BTreeMap::new(),
            targets: [None, None],
        }
    }

    /// Compiles every source; any failure fails the whole chain.
    pub fn from_sources(context: &GpuContext, sources: &[ProgramSource]) -> GpuResult<Self> {
        let programs = sources
            .iter()
            .map(|source| context.compile(source))
            .collect::<GpuResult<Vec<_>>>()?;
        Ok(Self::from_programs(context.clone(), programs))
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    pub fn programs(&self) -> &[GpuProgram] {
        &self.programs
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Uniform names declared by any pass, first declaration order.
    pub fn uniform_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = Vec::new();
        for name in self.programs.iter().flat_map(|p| p.uniforms().iter()) {
            if !names.contains(name) {
                names.push(name);
            }
        }
        names
    }

    pub fn declares(&self, name: &str) -> bool {
        self.programs
            .iter()
            .any(|p| p.uniforms().iter().any(|u| *u == name))
    }

    /// Size of the cached render targets, if any are allocated.
    pub fn render_target_size(&self) -> Option<(u32, u32)> {
        self.targets.iter().flatten().next().map(GpuTexture::dimensions)
    }

    pub fn set(&mut self, name: &str, value: ParamValue) {
        self.params.insert(name.to_string(), value);
    }

    pub fn set_int(&mut self, name: &str, value: i32) {
        self.set(name, ParamValue::Int(value));
    }

    pub fn set_float(&mut self, name: &str, value: f32) {
        self.set(name, ParamValue::Float(value));
    }

    pub fn set_vec2(&mut self, name: &str, value: [f32; 2]) {
        self.set(name, ParamValue::Vec2(value));
    }

    pub fn set_vec3(&mut self, name: &str, value: [f32; 3]) {
        self.set(name, ParamValue::Vec3(value));
    }

    pub fn set_vec4(&mut self, name: &str, value: [f32; 4]) {
        self.set(name, ParamValue::Vec4(value));
    }

    /// `None` when `name` was never set.
    pub fn get(&self, name: &str) -> Option<ParamValue> {
        self.params.get(name).copied()
    }

    pub fn get_int(&self, name: &str) -> Option<i32> {
        match self.get(name)? {
            ParamValue::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_float(&self, name: &str) -> Option<f32> {
        match self.get(name)? {
            ParamValue::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_vec2(&self, name: &str) -> Option<[f32; 2]> {
        match self.get(name)? {
            ParamValue::Vec2(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_vec3(&self, name: &str) -> Option<[f32; 3]> {
        match self.get(name)? {
            ParamValue::Vec3(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_vec4(&self, name: &str) -> Option<[f32; 4]> {
        match self.get(name)? {
            ParamValue::Vec4(v) => Some(v),
            _ => None,
        }
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, ParamValue)> {
        self.params.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Runs every pass in order, each reading the previous pass's output.
    pub fn apply(&mut self, input: &GpuTexture) -> GpuResult<GpuTexture> {
        if self.programs.is_empty() {
            return Ok(input.clone());
        }
        for slot in &mut self.targets {
            if slot
                .as_ref()
                .is_some_and(|t| t.dimensions() != input.dimensions() || t.format() != input.format())
            {
                *slot = None;
            }
        }

        // Never render into the texture being read.
        let mut slot = match &self.targets[0] {
            Some(t) if t.handle() == input.handle() => 1,
            _ => 0,
        };
        let resolution = [input.width() as f32, input.height() as f32, 0.0, 0.0];
        let mut current = input.clone();
        for i in 0..self.programs.len() {
            let program = self.programs[i].clone();
            let target = self.target(slot, input)?;
            let mut uniforms = Vec::with_capacity(program.uniforms().len() + 1);
            uniforms.push(resolution);
            uniforms.extend(
                program
                    .uniforms()
                    .iter()
                    .map(|name| self.params.get(*name).map_or([0.0; 4], |v| v.slot())),
            );
            self.context.render(&program, &current, &target, &uniforms)?;
            current = target;
            slot ^= 1;
        }
        Ok(current)
    }

    fn target(&mut self, slot: usize, like: &GpuTexture) -> GpuResult<GpuTexture> {
        if let Some(t) = &self.targets[slot] {
            return Ok(t.clone());
        }
        let t = self
            .context
            .create_render_target(like.width(), like.height(), like.format())?;
        self.targets[slot] = Some(t.clone());
        Ok(t)
    }
}

/// Copies the program list and parameters. Render targets are not shared.
impl Clone for FilterChain {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            programs: self.programs.clone(),
            params: self.params.clone(),
            targets: [None, None],
        }
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("programs", &self.programs.iter().map(GpuProgram::label).collect::<Vec<_>>())
            .field("params", &self.params)
            .field("target", &self.render_target_size())
            .finish()
    }
}

/// Applies `chains` back to back, feeding each chain the previous output.
pub fn apply_chains<'a>(
    chains: impl IntoIterator<Item = &'a mut FilterChain>,
    input: &GpuTexture,
) -> GpuResult<GpuTexture> {
    let mut current = input.clone();
    for chain in chains {
        current = chain.apply(&current)?;
    }
    Ok(current)
}

/// Stable identity of a user-added effect filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterId(u64);

impl FilterId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// An entry in the user-ordered effect list. Inactive entries keep their
/// position but are skipped when rendering.
#[derive(Clone, Debug)]
pub struct FilterData {
    id: FilterId,
    pub name: String,
    pub active: bool,
    pub chain: FilterChain,
}

impl FilterData {
    pub fn new(name: impl Into<String>, chain: FilterChain) -> Self {
        Self {
            id: FilterId::next(),
            name: name.into(),
            active: true,
            chain,
        }
    }

    pub fn id(&self) -> FilterId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, ImageBuffer, Rgba};

    use super::*;
    use crate::gpu::TextureFormat;
    use crate::raster::RasterImage;
    use crate::shaders::{effects, settings};

    fn texture(ctx: &GpuContext, w: u32, h: u32) -> GpuTexture {
        let img = RasterImage::from_dynamic(DynamicImage::ImageRgba8(ImageBuffer::from_fn(w, h, |x, y| {
            Rgba([(x * 20) as u8, (y * 30) as u8, 90, 255])
        })))
        .unwrap();
        ctx.create_texture(&img).unwrap()
    }

    #[test]
    fn empty_chain_is_identity() {
        let ctx = GpuContext::software();
        let input = texture(&ctx, 6, 5);
        let mut chain = FilterChain::new(ctx.clone());
        let out = chain.apply(&input).unwrap();
        assert_eq!(ctx.read_pixels(&out).unwrap(), ctx.read_pixels(&input).unwrap());
    }

    #[test]
    fn neutral_program_is_identity() {
        let ctx = GpuContext::software();
        let input = texture(&ctx, 6, 5);
        let mut chain = FilterChain::from_sources(&ctx, &[settings::BRIGHTNESS]).unwrap();
        chain.set_float("uBrightness", 0.0);
        let out = chain.apply(&input).unwrap();
        assert_ne!(out.handle(), input.handle());
        assert_eq!(ctx.read_pixels(&out).unwrap(), ctx.read_pixels(&input).unwrap());
    }

    #[test]
    fn unset_parameters_are_not_found() {
        let ctx = GpuContext::software();
        let mut chain = FilterChain::from_sources(&ctx, &[settings::BRIGHTNESS]).unwrap();
        assert_eq!(chain.get_float("uBrightness"), None);
        chain.set_float("uBrightness", 0.0);
        assert_eq!(chain.get_float("uBrightness"), Some(0.0));
        assert_eq!(chain.get_int("uBrightness"), None);
        assert_eq!(chain.get_vec2("uCenter"), None);
        chain.set_vec2("uCenter", [0.25, 0.75]);
        assert_eq!(chain.get_vec2("uCenter"), Some([0.25, 0.75]));
    }

    #[test]
    fn clone_has_independent_parameters_and_no_target() {
        let ctx = GpuContext::software();
        let input = texture(&ctx, 4, 4);
        let mut original = FilterChain::from_sources(&ctx, &[settings::BRIGHTNESS]).unwrap();
        original.set_float("uBrightness", 0.1);
        original.apply(&input).unwrap();
        assert_eq!(original.render_target_size(), Some((4, 4)));

        let mut copy = original.clone();
        assert_eq!(copy.render_target_size(), None);
        assert!(copy.programs()[0].shares_pipeline_with(&original.programs()[0]));
        copy.set_float("uBrightness", 0.9);
        assert_eq!(original.get_float("uBrightness"), Some(0.1));
        assert_eq!(copy.get_float("uBrightness"), Some(0.9));
    }

    #[test]
    fn parameters_reach_every_pass_declaring_them() {
        let ctx = GpuContext::software();
        let input = ctx
            .create_texture_from_data(&[100, 100, 100, 255], 1, 1, TextureFormat::Rgba8)
            .unwrap();
        let mut chain =
            FilterChain::from_sources(&ctx, &[settings::BRIGHTNESS, settings::BRIGHTNESS]).unwrap();
        chain.set_float("uBrightness", 0.2);
        let out = chain.apply(&input).unwrap();
        assert_eq!(ctx.read_pixels(&out).unwrap().get_pixel(0, 0).0, [202, 202, 202, 255]);
        assert_eq!(chain.uniform_names(), vec!["uBrightness"]);
    }

    #[test]
    fn passes_run_in_order() {
        let ctx = GpuContext::software();
        let input = ctx
            .create_texture_from_data(&[100, 100, 100, 255], 1, 1, TextureFormat::Rgba8)
            .unwrap();
        let mut chain =
            FilterChain::from_sources(&ctx, &[settings::BRIGHTNESS, effects::INVERT]).unwrap();
        chain.set_float("uBrightness", 0.2);
        let out = chain.apply(&input).unwrap();
        // invert(100 + 51), not invert(100) + 51
        assert_eq!(ctx.read_pixels(&out).unwrap().get_pixel(0, 0).0, [104, 104, 104, 255]);
    }

    #[test]
    fn targets_follow_input_size() {
        let ctx = GpuContext::software();
        let mut chain = FilterChain::from_sources(&ctx, &[effects::INVERT]).unwrap();
        chain.apply(&texture(&ctx, 4, 4)).unwrap();
        assert_eq!(chain.render_target_size(), Some((4, 4)));
        let out = chain.apply(&texture(&ctx, 7, 3)).unwrap();
        assert_eq!(out.dimensions(), (7, 3));
        assert_eq!(chain.render_target_size(), Some((7, 3)));
    }

    #[test]
    fn chain_can_refilter_its_own_output() {
        let ctx = GpuContext::software();
        let input = texture(&ctx, 3, 3);
        let mut chain = FilterChain::from_sources(&ctx, &[effects::INVERT]).unwrap();
        let once = chain.apply(&input).unwrap();
        let twice = chain.apply(&once).unwrap();
        assert_eq!(ctx.read_pixels(&twice).unwrap(), ctx.read_pixels(&input).unwrap());
    }

    #[test]
    fn compile_failure_fails_the_chain() {
        let ctx = GpuContext::software();
        let missing = ProgramSource {
            body: "fn nope() {}",
            ..effects::INVERT
        };
        assert!(FilterChain::from_sources(&ctx, &[effects::INVERT, missing]).is_err());
        // Defines `effect` but does not type-check.
        let mistyped = ProgramSource {
            body: "fn effect(uv: vec2<f32>) -> vec4<f32> { return sample_src(uv).rgb; }",
            ..effects::INVERT
        };
        assert!(FilterChain::from_sources(&ctx, &[mistyped]).is_err());
    }

    #[test]
    fn apply_chains_feeds_outputs_forward() {
        let ctx = GpuContext::software();
        let input = ctx
            .create_texture_from_data(&[100, 100, 100, 255], 1, 1, TextureFormat::Rgba8)
            .unwrap();
        let mut a = FilterChain::from_sources(&ctx, &[settings::BRIGHTNESS]).unwrap();
        a.set_float("uBrightness", 0.2);
        let mut b = FilterChain::from_sources(&ctx, &[effects::INVERT]).unwrap();
        let out = apply_chains([&mut a, &mut b], &input).unwrap();
        assert_eq!(ctx.read_pixels(&out).unwrap().get_pixel(0, 0).0, [104, 104, 104, 255]);
    }
}
