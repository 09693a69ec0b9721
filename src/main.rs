use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;

use photofx::catalog::FilterCatalog;
use photofx::config::PipelineConfig;
use photofx::executor::BatchExecutor;
use photofx::filter::FilterData;
use photofx::gpu::{self, BackendKind, BackendPreference, GpuContext};
use photofx::processing::enhance::FxFlags;
use photofx::processor::ImageProcessor;
use photofx::settings::ImageSetting;
use photofx::task::TaskPool;

const BACKEND_ENV: &str = "PHOTOFX_BACKEND";
const TICK: Duration = Duration::from_millis(5);

#[derive(Debug, Parser)]
#[command(name = "photofx", version, about = "Auto-enhance and filter photos in batch")]
struct Cli {
    /// Source images.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Directory the edited images are written to.
    #[arg(short, long)]
    out: PathBuf,

    /// Auto-enhance steps, e.g. `gamma,clahe`, `all`, `none` or a bitmask.
    #[arg(long)]
    fx: Option<String>,

    /// Tonal setting as `name=value`, e.g. `contrast=1.2`. Repeatable.
    #[arg(long = "setting", value_parser = parse_setting)]
    settings: Vec<(ImageSetting, f32)>,

    /// Effect filter applied after the settings, in order. Repeatable.
    #[arg(long = "effect")]
    effects: Vec<String>,

    /// Effect parameter as `effect.uniform=value`, e.g. `vignette.uVignetteStrength=0.8`
    /// or `radial blur.uCenter=0.4,0.6`. Clamped to the parameter's range. Repeatable.
    #[arg(long = "effect-param", value_parser = parse_effect_param)]
    effect_params: Vec<EffectParam>,

    /// `auto`, `gpu` or `cpu`. Overrides PHOTOFX_BACKEND and the config file.
    #[arg(long)]
    backend: Option<String>,
}

fn parse_setting(raw: &str) -> Result<(ImageSetting, f32), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got `{raw}`"))?;
    let setting =
        ImageSetting::parse(name).ok_or_else(|| format!("unknown setting `{}`", name.trim()))?;
    let value = value
        .trim()
        .parse::<f32>()
        .map_err(|e| format!("invalid value for {setting}: {e}"))?;
    Ok((setting, value))
}

#[derive(Debug, Clone, PartialEq)]
struct EffectParam {
    effect: String,
    key: String,
    value: String,
}

fn parse_effect_param(raw: &str) -> Result<EffectParam, String> {
    let (target, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected effect.uniform=value, got `{raw}`"))?;
    let (effect, key) = target
        .rsplit_once('.')
        .ok_or_else(|| format!("expected effect.uniform before `=`, got `{target}`"))?;
    if effect.trim().is_empty() || key.trim().is_empty() {
        return Err(format!("expected effect.uniform=value, got `{raw}`"));
    }
    Ok(EffectParam {
        effect: effect.trim().to_string(),
        key: key.trim().to_string(),
        value: value.trim().to_string(),
    })
}

/// Instantiates `names` in order, writing every matching `params` entry into
/// each instance of its effect.
fn build_effects(
    catalog: &FilterCatalog,
    names: &[String],
    params: &[EffectParam],
) -> anyhow::Result<Vec<FilterData>> {
    let mut filters = Vec::with_capacity(names.len());
    for name in names {
        let Some(filter) = catalog.instantiate(name) else {
            bail!("unknown effect `{name}`; available: {}", catalog.names().join(", "));
        };
        filters.push(filter);
    }
    for param in params {
        let mut matched = false;
        for filter in filters
            .iter_mut()
            .filter(|f| f.name.eq_ignore_ascii_case(&param.effect))
        {
            matched = true;
            let Some(stored) = catalog.set_param_str(filter, &param.key, &param.value) else {
                bail!(
                    "invalid parameter `{}={}` for {}",
                    param.key,
                    param.value,
                    filter.name
                );
            };
            tracing::debug!(effect = %filter.name, key = %param.key, value = ?stored, "effect parameter set");
        }
        if !matched {
            bail!("parameter for `{}` but no such --effect was given", param.effect);
        }
    }
    Ok(filters)
}

fn resolve_backend(
    cli: Option<&str>,
    env: Option<&str>,
    config: &PipelineConfig,
) -> BackendPreference {
    match cli.or(env) {
        Some(raw) => BackendPreference::parse(raw),
        None => config.backend(),
    }
}

fn effective_backend(requested: BackendPreference, allow_debug_cpu_fallback: bool) -> BackendPreference {
    if requested == BackendPreference::Cpu && !allow_debug_cpu_fallback {
        BackendPreference::Gpu
    } else {
        requested
    }
}

fn open_context(
    backend: BackendPreference,
    allow_debug_cpu_fallback: bool,
) -> Option<GpuContext> {
    match GpuContext::with_preference(backend) {
        Ok(ctx) => Some(ctx),
        Err(err) if allow_debug_cpu_fallback => {
            tracing::warn!("gpu unavailable ({err}); using software backend");
            Some(GpuContext::software())
        }
        Err(err) => {
            tracing::error!(
                "gpu unavailable ({err}). Set {}=1 for debug CPU fallback.",
                gpu::DEBUG_ALLOW_CPU_FALLBACK_ENV
            );
            None
        }
    }
}

fn report_backend(ctx: &GpuContext) {
    match ctx.kind() {
        BackendKind::Software => tracing::info!("rendering backend = software"),
        BackendKind::Wgpu => {
            let status = gpu::runtime_status();
            let adapter = match (status.adapter_name.as_deref(), status.adapter_backend.as_deref()) {
                (Some(name), Some(api)) => format!("{name} ({api})"),
                (Some(name), None) => name.to_string(),
                _ => "n/a".to_string(),
            };
            tracing::info!("rendering backend = wgpu on {adapter}");
        }
    }
}

fn run(cli: Cli, config: &PipelineConfig, ctx: GpuContext) -> anyhow::Result<ExitCode> {
    let fx = match cli.fx.as_deref() {
        Some(raw) => FxFlags::parse(raw).with_context(|| format!("unknown auto-enhance flags `{raw}`"))?,
        None => config.fx_flags(),
    };

    let pool = TaskPool::new("preview", 1)?;
    let mut processor = ImageProcessor::new(ctx.clone(), pool)?;
    processor.set_preview_bound(config.preview_max().0, config.preview_max().1);
    processor.set_fx_flags(fx);
    for (setting, value) in &cli.settings {
        processor.set_image_setting(*setting, *value)?;
    }

    let catalog = FilterCatalog::build(&ctx);
    for filter in build_effects(&catalog, &cli.effects, &cli.effect_params)? {
        processor.add_image_filter(filter)?;
    }

    let mut batch = BatchExecutor::run_with(&processor, &cli.files, &cli.out, &config.batch_options())
        .with_context(|| format!("failed to start batch into {}", cli.out.display()))?;

    let mut reported = -1.0;
    while !batch.completed() {
        batch.update();
        let pct = batch.percentage_completed();
        if pct != reported {
            tracing::info!(
                "{:.0}% ({}/{})",
                pct,
                batch.completed_count(),
                batch.total()
            );
            reported = pct;
        }
        std::thread::sleep(TICK);
    }

    tracing::info!(
        total = batch.total(),
        failed = batch.failed(),
        out = %cli.out.display(),
        "batch finished"
    );
    Ok(if batch.failed() > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::load();
    let env_backend = std::env::var(BACKEND_ENV).ok();
    let requested = resolve_backend(cli.backend.as_deref(), env_backend.as_deref(), &config);
    let allow_debug_cpu_fallback = gpu::allow_debug_cpu_fallback();
    let backend = effective_backend(requested, allow_debug_cpu_fallback);
    if requested == BackendPreference::Cpu && backend != BackendPreference::Cpu {
        tracing::warn!(
            "cpu backend requires {}=1; using gpu policy",
            gpu::DEBUG_ALLOW_CPU_FALLBACK_ENV
        );
    }
    let Some(ctx) = open_context(backend, allow_debug_cpu_fallback) else {
        return ExitCode::from(2);
    };
    report_backend(&ctx);

    match run(cli, &config, ctx) {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cli_collects_repeated_options() {
        let cli = Cli::try_parse_from([
            "photofx",
            "a.jpg",
            "b.png",
            "--out",
            "edited",
            "--setting",
            "contrast=1.5",
            "--setting",
            "hue=-30",
            "--effect",
            "Sepia",
            "--effect",
            "vignette",
        ])
        .unwrap();
        assert_eq!(cli.files.len(), 2);
        assert_eq!(
            cli.settings,
            vec![(ImageSetting::Contrast, 1.5), (ImageSetting::Hue, -30.0)]
        );
        assert_eq!(cli.effects, vec!["Sepia", "vignette"]);
    }

    #[test]
    fn parse_setting_rejects_bad_input() {
        assert_eq!(parse_setting("gamma=0.8"), Ok((ImageSetting::Gamma, 0.8)));
        assert!(parse_setting("gamma").is_err());
        assert!(parse_setting("exposure=1").is_err());
        assert!(parse_setting("gamma=bright").is_err());
    }

    #[test]
    fn effect_params_split_on_the_last_dot() {
        assert_eq!(
            parse_effect_param("Blur (Gaussian).uBlurScale = 3"),
            Ok(EffectParam {
                effect: "Blur (Gaussian)".into(),
                key: "uBlurScale".into(),
                value: "3".into(),
            })
        );
        assert!(parse_effect_param("vignette=0.5").is_err());
        assert!(parse_effect_param(".uSteps=4").is_err());
        assert!(parse_effect_param("vignette.uVignetteStrength").is_err());
    }

    #[test]
    fn effect_params_are_clamped_into_instances() {
        let catalog = FilterCatalog::build(&GpuContext::software());
        let names = vec!["Vignette".to_string(), "posterize".to_string()];
        let params = vec![
            parse_effect_param("vignette.uVignetteStrength=4").unwrap(),
            parse_effect_param("Posterize.uLevels=3").unwrap(),
        ];
        let filters = build_effects(&catalog, &names, &params).unwrap();
        assert_eq!(filters[0].chain.get_float("uVignetteStrength"), Some(1.0));
        assert_eq!(filters[1].chain.get_int("uLevels"), Some(3));

        let orphan = vec![parse_effect_param("sepia.uAmount=1").unwrap()];
        assert!(build_effects(&catalog, &names, &orphan).is_err());
        let unknown_key = vec![parse_effect_param("vignette.uRadius=1").unwrap()];
        assert!(build_effects(&catalog, &names, &unknown_key).is_err());
        assert!(build_effects(&catalog, &["Swirl".to_string()], &[]).is_err());
    }

    #[test]
    fn cli_flag_beats_env_beats_config() {
        let config = PipelineConfig {
            backend: Some("cpu".into()),
            ..Default::default()
        };
        assert_eq!(resolve_backend(None, None, &config), BackendPreference::Cpu);
        assert_eq!(resolve_backend(None, Some("gpu"), &config), BackendPreference::Gpu);
        assert_eq!(
            resolve_backend(Some("auto"), Some("gpu"), &config),
            BackendPreference::Auto
        );
    }

    #[test]
    fn cpu_backend_requires_debug_fallback_flag() {
        assert_eq!(
            effective_backend(BackendPreference::Cpu, false),
            BackendPreference::Gpu
        );
        assert_eq!(
            effective_backend(BackendPreference::Cpu, true),
            BackendPreference::Cpu
        );
        assert_eq!(
            effective_backend(BackendPreference::Auto, false),
            BackendPreference::Auto
        );
    }

    #[test]
    fn software_context_is_always_available_with_fallback() {
        let ctx = open_context(BackendPreference::Cpu, true).unwrap();
        assert_eq!(ctx.kind(), BackendKind::Software);
    }
}
