use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use volreg_core::io::{apply_mapping_file, NiftiIo};

use super::InterpolationArg;

#[derive(Args)]
pub struct ApplyArgs {
    /// Mapping file written by `register --mapping`
    #[arg(short, long)]
    pub mapping: PathBuf,

    /// Volume in subject space
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output volume in template space
    #[arg(short, long)]
    pub output: PathBuf,

    /// Interpolation (label images always use nearest)
    #[arg(long, value_enum, default_value = "cubic")]
    pub interpolation: InterpolationArg,
}

pub fn run(args: &ApplyArgs) -> Result<()> {
    let warped = apply_mapping_file(
        &NiftiIo,
        &args.mapping,
        &args.input,
        &args.output,
        args.interpolation.into(),
    )
    .with_context(|| {
        format!(
            "Failed to apply {} to {}",
            args.mapping.display(),
            args.input.display()
        )
    })?;

    println!(
        "Warped {} ({}) saved to {}",
        args.input.display(),
        warped.geometry(),
        args.output.display()
    );
    Ok(())
}
