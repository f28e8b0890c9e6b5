use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use volreg_core::consts::{DEFAULT_POLL_INTERVAL_MS, PROGRESS_TOTAL};
use volreg_core::io::{load_volume, save_mapping, save_volume, LoadedVolume};
use volreg_core::pipeline::{JobState, RegistrationConfig, RegistrationEngine, RegistrationInputs};
use volreg_core::transform::RegType;

use super::{BarReporter, CostArg, InterpolationArg};
use crate::summary::{print_registration_summary, print_result_summary};

#[derive(Args)]
pub struct RegisterArgs {
    /// Template volume
    #[arg(short, long)]
    pub template: PathBuf,

    /// Subject volume
    #[arg(short, long)]
    pub subject: PathBuf,

    /// Secondary template channel
    #[arg(long)]
    pub template2: Option<PathBuf>,

    /// Secondary subject channel
    #[arg(long)]
    pub subject2: Option<PathBuf>,

    /// Registration config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Linear cost function
    #[arg(long, value_enum)]
    pub cost: Option<CostArg>,

    /// Rigid instead of affine linear registration
    #[arg(long)]
    pub rigid: bool,

    /// Force edge-based nonlinear registration
    #[arg(long)]
    pub edge: bool,

    /// Interpolation for the warped output
    #[arg(long, value_enum)]
    pub interpolation: Option<InterpolationArg>,

    /// Worker thread count
    #[arg(long)]
    pub threads: Option<usize>,

    /// Status poll interval in milliseconds
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    pub poll_ms: u64,

    /// Warped subject output path
    #[arg(short, long, default_value = "warped.nii.gz")]
    pub output: PathBuf,

    /// Mapping output path
    #[arg(short, long)]
    pub mapping: Option<PathBuf>,
}

fn load(path: &Path) -> Result<LoadedVolume> {
    load_volume(path).with_context(|| format!("Failed to load {}", path.display()))
}

fn build_config(args: &RegisterArgs) -> Result<RegistrationConfig> {
    let mut config = match args.config {
        Some(ref path) => RegistrationConfig::load(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?,
        None => RegistrationConfig::default(),
    };
    if let Some(cost) = args.cost {
        config.cost = cost.into();
    }
    if args.rigid {
        config.reg_type = RegType::Rigid;
    }
    if args.edge {
        config.edge = Some(true);
    }
    if let Some(interpolation) = args.interpolation {
        config.interpolation = interpolation.into();
    }
    if args.threads.is_some() {
        config.threads = args.threads;
    }
    Ok(config)
}

pub fn run(args: &RegisterArgs) -> Result<()> {
    let config = build_config(args)?;
    let template = load(&args.template)?;
    let subject = load(&args.subject)?;

    let mut inputs = RegistrationInputs::new(template.volume.clone(), subject.volume.clone());
    inputs.template_world = Some(template.world);
    inputs.template2 = args
        .template2
        .as_deref()
        .map(load)
        .transpose()?
        .map(|l| l.volume);
    inputs.subject2 = args
        .subject2
        .as_deref()
        .map(load)
        .transpose()?
        .map(|l| l.volume);

    print_registration_summary(&config, &args.template, &template.volume, &args.subject, &subject.volume);

    let pb = ProgressBar::new(PROGRESS_TOTAL as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner} {msg} [{bar:40}] {percent}% [{elapsed}]")?
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    let mut engine = RegistrationEngine::with_reporter(Arc::new(BarReporter(pb.clone())));
    engine.start(inputs, config.clone())?;

    let poll = Duration::from_millis(args.poll_ms.max(1));
    while engine.is_running() {
        pb.set_message(engine.status());
        thread::sleep(poll);
    }
    let state = engine.wait()?;

    match state {
        JobState::Done => pb.finish_with_message("Done"),
        JobState::Failed => {
            pb.abandon_with_message("Failed");
            let error = engine.snapshot().error.clone().unwrap_or_default();
            bail!("Registration failed: {error}");
        }
        other => {
            pb.abandon_with_message(other.to_string());
            bail!("Registration ended in state {other}");
        }
    }

    let result = engine.result()?;
    let warped = engine.warp(&subject.volume, config.interpolation)?;
    save_volume(&args.output, &warped, &template.world)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    if let Some(ref path) = args.mapping {
        save_mapping(path, &result.mapping)
            .with_context(|| format!("Failed to write mapping {}", path.display()))?;
    }

    print_result_summary(&result, &args.output, args.mapping.as_deref());
    Ok(())
}
