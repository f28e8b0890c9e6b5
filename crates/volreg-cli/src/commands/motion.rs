use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use volreg_core::io::{load_volume, save_volume};
use volreg_core::pipeline::{CancelToken, JobContext};
use volreg_core::register::motion_correct;

use super::BarReporter;

#[derive(Args)]
pub struct MotionArgs {
    /// Volumes of the series, reference first
    #[arg(required = true)]
    pub volumes: Vec<PathBuf>,

    /// Directory for the corrected volumes
    #[arg(short, long, default_value = "motion_corrected")]
    pub output_dir: PathBuf,
}

pub fn run(args: &MotionArgs) -> Result<()> {
    let mut series = Vec::with_capacity(args.volumes.len());
    let mut worlds = Vec::with_capacity(args.volumes.len());
    for path in &args.volumes {
        let loaded = load_volume(path).with_context(|| format!("Failed to load {}", path.display()))?;
        series.push(loaded.volume);
        worlds.push(loaded.world);
    }
    if series.len() < 2 {
        bail!("Motion correction needs at least two volumes");
    }

    let pb = ProgressBar::new(series.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40}] {pos}/{len}")?
            .progress_chars("=> "),
    );
    pb.set_message("Registering volumes");
    pb.enable_steady_tick(Duration::from_millis(100));

    let ctx = JobContext::new(CancelToken::new(), Arc::new(BarReporter(pb.clone())));
    let result = motion_correct(&series, &ctx)?;
    pb.finish_with_message("Done");

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed to create {}", args.output_dir.display()))?;
    for ((path, volume), world) in args.volumes.iter().zip(&result.corrected).zip(&worlds) {
        let name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "volume.nii.gz".into());
        let out = args.output_dir.join(name);
        save_volume(&out, volume, world).with_context(|| format!("Failed to write {}", out.display()))?;
    }

    for (i, transform) in result.transforms.iter().enumerate() {
        let t = transform.params.translation;
        println!(
            "  {:>4}  shift {:>8.3} {:>8.3} {:>8.3} mm",
            i, t[0], t[1], t[2]
        );
    }
    println!(
        "\n{} volumes saved to {}",
        result.corrected.len(),
        args.output_dir.display()
    );
    Ok(())
}
