pub mod mapping;
pub mod nifti;

use std::path::Path;

use nalgebra::Matrix4;
use tracing::info;

use crate::error::Result;
use crate::field::CompositeMapping;
use crate::interpolation::Interpolation;
use crate::volume::Volume;

pub use mapping::{load_mapping, save_mapping};

/// A volume with its voxel-to-world matrix.
#[derive(Clone, Debug)]
pub struct LoadedVolume {
    pub volume: Volume,
    pub world: Matrix4<f32>,
}

/// Load/save capability the engine's callers plug in.
pub trait VolumeIo: Send + Sync {
    fn load(&self, path: &Path) -> Result<LoadedVolume>;
    fn save(&self, path: &Path, volume: &Volume, world: &Matrix4<f32>) -> Result<()>;
}

/// NIfTI-1 `.nii` / `.nii.gz` files.
#[derive(Clone, Copy, Debug, Default)]
pub struct NiftiIo;

impl VolumeIo for NiftiIo {
    fn load(&self, path: &Path) -> Result<LoadedVolume> {
        nifti::read_nifti(path)
    }

    fn save(&self, path: &Path, volume: &Volume, world: &Matrix4<f32>) -> Result<()> {
        nifti::write_nifti(path, volume, world)
    }
}

pub fn load_volume(path: &Path) -> Result<LoadedVolume> {
    NiftiIo.load(path)
}

pub fn save_volume(path: &Path, volume: &Volume, world: &Matrix4<f32>) -> Result<()> {
    NiftiIo.save(path, volume, world)
}

/// Warp the volume at `input` through a saved mapping and write it in
/// template space. Label images are sampled with nearest neighbor.
pub fn apply_mapping_file(
    io: &dyn VolumeIo,
    mapping_path: &Path,
    input: &Path,
    output: &Path,
    interpolation: Interpolation,
) -> Result<Volume> {
    let mapping: CompositeMapping = load_mapping(mapping_path)?;
    let loaded = io.load(input)?;
    let warped = mapping.warp(&loaded.volume, interpolation);
    io.save(output, &warped, mapping.world())?;
    info!(
        input = %input.display(),
        output = %output.display(),
        geometry = %warped.geometry(),
        "Applied mapping"
    );
    Ok(warped)
}
