use serde::{Deserialize, Serialize};

use crate::filter::FilterChain;
use crate::gpu::{GpuContext, GpuResult, ProgramSource};
use crate::shaders::settings as programs;

/// Tonal adjustments backed by the fixed setting chains.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSetting {
    Brightness,
    Contrast,
    Sharpness,
    Hue,
    Saturation,
    Lightness,
    Temperature,
    Gamma,
}

impl ImageSetting {
    pub const ALL: [ImageSetting; 8] = [
        ImageSetting::Brightness,
        ImageSetting::Contrast,
        ImageSetting::Sharpness,
        ImageSetting::Hue,
        ImageSetting::Saturation,
        ImageSetting::Lightness,
        ImageSetting::Temperature,
        ImageSetting::Gamma,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ImageSetting::Brightness => "brightness",
            ImageSetting::Contrast => "contrast",
            ImageSetting::Sharpness => "sharpness",
            ImageSetting::Hue => "hue",
            ImageSetting::Saturation => "saturation",
            ImageSetting::Lightness => "lightness",
            ImageSetting::Temperature => "temperature",
            ImageSetting::Gamma => "gamma",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|s| s.name().eq_ignore_ascii_case(name))
    }

    pub fn uniform(self) -> &'static str {
        match self {
            ImageSetting::Brightness => "uBrightness",
            ImageSetting::Contrast => "uContrast",
            ImageSetting::Sharpness => "uSharpness",
            ImageSetting::Hue => "uHue",
            ImageSetting::Saturation => "uSaturation",
            ImageSetting::Lightness => "uLightness",
            ImageSetting::Temperature => "uTemperature",
            ImageSetting::Gamma => "uGamma",
        }
    }

    pub fn default_value(self) -> f32 {
        match self {
            ImageSetting::Contrast | ImageSetting::Saturation | ImageSetting::Gamma => 1.0,
            ImageSetting::Lightness => 0.5,
            _ => 0.0,
        }
    }

    /// Inclusive `(min, max)` accepted by [`SettingChains::set`].
    pub fn range(self) -> (f32, f32) {
        match self {
            ImageSetting::Brightness | ImageSetting::Temperature => (-1.0, 1.0),
            ImageSetting::Contrast | ImageSetting::Saturation | ImageSetting::Gamma => (0.0, 2.0),
            ImageSetting::Sharpness => (-2.0, 2.0),
            ImageSetting::Hue => (-360.0, 360.0),
            ImageSetting::Lightness => (0.0, 1.0),
        }
    }

    pub fn slot(self) -> SettingSlot {
        match self {
            ImageSetting::Brightness => SettingSlot::Brightness,
            ImageSetting::Contrast => SettingSlot::Contrast,
            ImageSetting::Sharpness => SettingSlot::Sharpness,
            ImageSetting::Hue | ImageSetting::Saturation | ImageSetting::Lightness => SettingSlot::Hsl,
            ImageSetting::Temperature => SettingSlot::Temperature,
            ImageSetting::Gamma => SettingSlot::Gamma,
        }
    }

    /// Clamps to [`ImageSetting::range`]; non-finite values fall back to the default.
    pub fn clamp(self, value: f32) -> f32 {
        if !value.is_finite() {
            return self.default_value();
        }
        let (min, max) = self.range();
        value.clamp(min, max)
    }
}

impl std::fmt::Display for ImageSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The six setting chains, in the order they are applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SettingSlot {
    Brightness,
    Contrast,
    Sharpness,
    Hsl,
    Temperature,
    Gamma,
}

impl SettingSlot {
    pub const ALL: [SettingSlot; 6] = [
        SettingSlot::Brightness,
        SettingSlot::Contrast,
        SettingSlot::Sharpness,
        SettingSlot::Hsl,
        SettingSlot::Temperature,
        SettingSlot::Gamma,
    ];

    pub fn program(self) -> ProgramSource {
        match self {
            SettingSlot::Brightness => programs::BRIGHTNESS,
            SettingSlot::Contrast => programs::CONTRAST,
            SettingSlot::Sharpness => programs::SHARPNESS,
            SettingSlot::Hsl => programs::HSL,
            SettingSlot::Temperature => programs::TEMPERATURE,
            SettingSlot::Gamma => programs::GAMMA,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Owns one chain per [`SettingSlot`], each holding its setting uniforms.
#[derive(Clone, Debug)]
pub struct SettingChains {
    chains: Vec<FilterChain>,
}

impl SettingChains {
    /// Compiles the setting programs and loads every default.
    pub fn new(context: &GpuContext) -> GpuResult<Self> {
        let chains = SettingSlot::ALL
            .iter()
            .map(|slot| FilterChain::from_sources(context, &[slot.program()]))
            .collect::<GpuResult<Vec<_>>>()?;
        let mut out = Self { chains };
        out.reset();
        Ok(out)
    }

    pub fn get(&self, setting: ImageSetting) -> f32 {
        self.chains[setting.slot().index()]
            .get_float(setting.uniform())
            .unwrap_or_else(|| setting.default_value())
    }

    /// Stores the clamped value and returns it.
    pub fn set(&mut self, setting: ImageSetting, value: f32) -> f32 {
        let value = setting.clamp(value);
        self.chains[setting.slot().index()].set_float(setting.uniform(), value);
        value
    }

    pub fn reset(&mut self) {
        for setting in ImageSetting::ALL {
            self.set(setting, setting.default_value());
        }
    }

    pub fn is_default(&self) -> bool {
        ImageSetting::ALL
            .iter()
            .all(|s| self.get(*s) == s.default_value())
    }

    pub fn chain(&self, slot: SettingSlot) -> &FilterChain {
        &self.chains[slot.index()]
    }

    pub fn chains(&self) -> &[FilterChain] {
        &self.chains
    }

    pub fn chains_mut(&mut self) -> impl Iterator<Item = &mut FilterChain> {
        self.chains.iter_mut()
    }
}
