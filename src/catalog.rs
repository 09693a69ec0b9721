use std::mem::discriminant;

use crate::filter::{FilterChain, FilterData, ParamValue};
use crate::gpu::{GpuContext, ProgramSource};
use crate::shaders::effects;

/// Schema of one effect parameter. `min`/`max` bound every component.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub default: ParamValue,
    pub min: f32,
    pub max: f32,
}

impl ParamSpec {
    const fn float(name: &'static str, default: f32, min: f32, max: f32) -> Self {
        Self {
            name,
            default: ParamValue::Float(default),
            min,
            max,
        }
    }

    const fn int(name: &'static str, default: i32, min: f32, max: f32) -> Self {
        Self {
            name,
            default: ParamValue::Int(default),
            min,
            max,
        }
    }

    /// Clamps every component of `value` to `min..=max`.
    pub fn clamp(&self, value: ParamValue) -> ParamValue {
        let c = |v: f32| v.clamp(self.min, self.max);
        match value {
            ParamValue::Int(v) => ParamValue::Int(c(v as f32).round() as i32),
            ParamValue::Float(v) => ParamValue::Float(c(v)),
            ParamValue::Vec2(v) => ParamValue::Vec2(v.map(c)),
            ParamValue::Vec3(v) => ParamValue::Vec3(v.map(c)),
            ParamValue::Vec4(v) => ParamValue::Vec4(v.map(c)),
        }
    }

    /// Parses `raw` in the shape of the default (`x,y` for a vec2) and
    /// clamps it.
    pub fn parse(&self, raw: &str) -> Option<ParamValue> {
        let parts = raw
            .split(',')
            .map(|p| p.trim().parse::<f32>().ok().filter(|v| v.is_finite()))
            .collect::<Option<Vec<_>>>()?;
        let value = match (self.default, parts.as_slice()) {
            (ParamValue::Int(_), &[v]) => ParamValue::Int(v.round() as i32),
            (ParamValue::Float(_), &[v]) => ParamValue::Float(v),
            (ParamValue::Vec2(_), &[x, y]) => ParamValue::Vec2([x, y]),
            (ParamValue::Vec3(_), &[x, y, z]) => ParamValue::Vec3([x, y, z]),
            (ParamValue::Vec4(_), &[x, y, z, w]) => ParamValue::Vec4([x, y, z, w]),
            _ => return None,
        };
        Some(self.clamp(value))
    }
}

/// An effect filter: its passes and the parameters a UI should expose.
#[derive(Clone, Copy, Debug)]
pub struct FilterSpec {
    pub name: &'static str,
    pub programs: &'static [ProgramSource],
    pub params: &'static [ParamSpec],
}

impl FilterSpec {
    pub fn param(&self, name: &str) -> Option<&'static ParamSpec> {
        let name = name.trim();
        self.params.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }
}

pub static EFFECTS: &[FilterSpec] = &[
    FilterSpec {
        name: "Bloom",
        programs: &[effects::BLOOM],
        params: &[ParamSpec::float("uThreshold", 0.05, 0.0, 1.0)],
    },
    FilterSpec {
        name: "Blur (Gaussian)",
        programs: &[effects::GAUSSIAN_BLUR_H, effects::GAUSSIAN_BLUR_V],
        params: &[ParamSpec::float("uBlurScale", 1.0, 1.0, 10.0)],
    },
    FilterSpec {
        name: "Radial Blur",
        programs: &[effects::RADIAL_BLUR],
        params: &[
            ParamSpec::int("uSteps", 10, 5.0, 50.0),
            ParamSpec::float("uStrength", 0.05, 0.0, 1.0),
            ParamSpec {
                name: "uCenter",
                default: ParamValue::Vec2([0.5, 0.5]),
                min: 0.0,
                max: 1.0,
            },
        ],
    },
    FilterSpec {
        name: "Chromatic Aberration",
        programs: &[effects::CHROMATIC_ABERRATION],
        params: &[ParamSpec::float("uIntensity", 0.01, 0.0, 0.25)],
    },
    FilterSpec {
        name: "Grayscale",
        programs: &[effects::GRAYSCALE],
        params: &[],
    },
    FilterSpec {
        name: "Sepia",
        programs: &[effects::SEPIA],
        params: &[],
    },
    FilterSpec {
        name: "Edge Detect",
        programs: &[effects::EDGE_DETECT],
        params: &[ParamSpec::float("uThreshold", 0.5, 0.0, 4.0)],
    },
    FilterSpec {
        name: "Outline",
        programs: &[effects::OUTLINE],
        params: &[ParamSpec::float("uThreshold", 0.05, 0.0, 2.0)],
    },
    FilterSpec {
        name: "Posterize",
        programs: &[effects::POSTERIZE],
        params: &[ParamSpec::int("uLevels", 5, 1.0, 10.0)],
    },
    FilterSpec {
        name: "Mosaic",
        programs: &[effects::MOSAIC],
        params: &[ParamSpec::float("uMosaicSize", 5.0, 1.0, 100.0)],
    },
    FilterSpec {
        name: "Vignette",
        programs: &[effects::VIGNETTE],
        params: &[ParamSpec::float("uVignetteStrength", 0.5, 0.0, 1.0)],
    },
    FilterSpec {
        name: "Invert",
        programs: &[effects::INVERT],
        params: &[],
    },
];

struct Entry {
    spec: &'static FilterSpec,
    template: FilterChain,
}

/// Compiled effect templates, built once per context.
pub struct FilterCatalog {
    entries: Vec<Entry>,
}

impl FilterCatalog {
    pub fn build(context: &GpuContext) -> Self {
        Self::build_from(context, EFFECTS)
    }

    /// Compiles each spec; entries that fail to compile are left out.
    pub fn build_from(context: &GpuContext, specs: &'static [FilterSpec]) -> Self {
        let mut entries = Vec::with_capacity(specs.len());
        for spec in specs {
            match FilterChain::from_sources(context, spec.programs) {
                Ok(mut template) => {
                    for param in spec.params {
                        template.set(param.name, param.default);
                    }
                    entries.push(Entry { spec, template });
                }
                Err(err) => {
                    tracing::warn!(filter = spec.name, "skipping unavailable filter: {err}");
                }
            }
        }
        tracing::debug!(count = entries.len(), "filter catalog ready");
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.spec.name).collect()
    }

    fn entry(&self, name: &str) -> Option<&Entry> {
        let name = name.trim();
        self.entries
            .iter()
            .find(|e| e.spec.name.eq_ignore_ascii_case(name))
    }

    pub fn spec(&self, name: &str) -> Option<&'static FilterSpec> {
        self.entry(name).map(|e| e.spec)
    }

    /// Template chain for `name` (case-insensitive). Clone before mutating.
    pub fn get(&self, name: &str) -> Option<&FilterChain> {
        self.entry(name).map(|e| &e.template)
    }

    /// A fresh, active effect entry with default parameters.
    pub fn instantiate(&self, name: &str) -> Option<FilterData> {
        self.entry(name)
            .map(|e| FilterData::new(e.spec.name, e.template.clone()))
    }

    /// Stores `value` clamped to the parameter's bounds and returns what was
    /// stored. `None` if the effect has no such parameter or the value has
    /// a different shape; the filter is left untouched then.
    pub fn set_param(&self, filter: &mut FilterData, key: &str, value: ParamValue) -> Option<ParamValue> {
        let param = self.spec(&filter.name)?.param(key)?;
        if discriminant(&param.default) != discriminant(&value) {
            return None;
        }
        let value = param.clamp(value);
        filter.chain.set(param.name, value);
        Some(value)
    }

    /// Like [`set_param`](Self::set_param) with the value given as text.
    pub fn set_param_str(&self, filter: &mut FilterData, key: &str, raw: &str) -> Option<ParamValue> {
        let value = self.spec(&filter.name)?.param(key)?.parse(raw)?;
        self.set_param(filter, key, value)
    }
}
