use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use volreg_core::filters::is_label_image;
use volreg_core::io::load_volume;

#[derive(Args)]
pub struct InfoArgs {
    /// Input NIfTI volume
    pub file: PathBuf,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let loaded = load_volume(&args.file)
        .with_context(|| format!("Failed to load {}", args.file.display()))?;
    let volume = &loaded.volume;

    println!("File:        {}", args.file.display());
    println!("Dimensions:  {}", volume.geometry());
    println!("Voxel size:  {}", volume.voxel_size);
    if let Some((min, max)) = volume.value_range() {
        println!("Range:       {min} .. {max}");
    }
    println!(
        "Label image: {}",
        if is_label_image(&volume.data) { "yes" } else { "no" }
    );

    let w = &loaded.world;
    println!("World:");
    for row in 0..3 {
        println!(
            "  {:>10.4} {:>10.4} {:>10.4} {:>10.4}",
            w[(row, 0)],
            w[(row, 1)],
            w[(row, 2)],
            w[(row, 3)]
        );
    }

    let total_mb = (volume.data.len() * 4) as f64 / (1024.0 * 1024.0);
    println!("Data size:   {:.1} MB", total_mb);

    Ok(())
}
