//! NIfTI-1 volume reading and writing.
//!
//! Reading goes through the `nifti` crate, which handles data types and
//! intensity scaling. Writing emits a single-file float32 image with the
//! world matrix stored as an sform.

use std::fs::File;
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use nalgebra::Matrix4;
use ndarray::{Axis, Ix3};
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};

use crate::error::{Result, VolregError};
use crate::volume::{Volume, VoxelSize};

use super::LoadedVolume;

const HEADER_SIZE: usize = 348;
const VOX_OFFSET: usize = 352;
const DT_FLOAT32: i16 = 16;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[..2] == GZIP_MAGIC
}

/// Voxel-to-world matrix from the quaternion form of the header.
fn qform_world(header: &NiftiHeader, voxel_size: &VoxelSize) -> Matrix4<f32> {
    let (b, c, d) = (header.quatern_b, header.quatern_c, header.quatern_d);
    let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
    let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
    let [sx, sy, sz] = voxel_size.as_array();
    let scale = [sx, sy, qfac * sz];
    let rotation = [
        [a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c)],
        [2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b)],
        [2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - b * b - c * c],
    ];
    let offset = [header.quatern_x, header.quatern_y, header.quatern_z];

    let mut m = Matrix4::identity();
    for row in 0..3 {
        for col in 0..3 {
            m[(row, col)] = rotation[row][col] * scale[col];
        }
        m[(row, 3)] = offset[row];
    }
    m
}

/// Parse a `.nii` or `.nii.gz` image from memory. Only the first volume of a
/// 4D series (or the first component of a vector image) is kept.
pub fn read_nifti_bytes(bytes: &[u8]) -> Result<LoadedVolume> {
    let obj = if is_gzip(bytes) {
        InMemNiftiObject::from_reader(GzDecoder::new(Cursor::new(bytes)))
    } else {
        InMemNiftiObject::from_reader(Cursor::new(bytes))
    }
    .map_err(|e| VolregError::InvalidNifti(e.to_string()))?;

    let header = obj.header().clone();
    if header.dim[0] < 3 {
        return Err(VolregError::InvalidNifti(format!(
            "expected a 3D volume, got {} dimensions",
            header.dim[0]
        )));
    }
    let voxel_size = VoxelSize::new(
        header.pixdim[1].abs(),
        header.pixdim[2].abs(),
        header.pixdim[3].abs(),
    )
    .map_err(|e| VolregError::InvalidNifti(e.to_string()))?;

    let world = if header.sform_code > 0 {
        let mut m = Matrix4::identity();
        for (row, srow) in [header.srow_x, header.srow_y, header.srow_z].iter().enumerate() {
            for (col, &v) in srow.iter().enumerate() {
                m[(row, col)] = v;
            }
        }
        m
    } else if header.qform_code > 0 {
        qform_world(&header, &voxel_size)
    } else {
        voxel_size.to_world()
    };

    let mut array = obj
        .into_volume()
        .into_ndarray::<f32>()
        .map_err(|e| VolregError::InvalidNifti(e.to_string()))?;
    if array.ndim() < 3 {
        return Err(VolregError::InvalidNifti(format!(
            "expected a 3D array, got shape {:?}",
            array.shape()
        )));
    }
    // Series and vector images: keep index 0 along every axis past z.
    while array.ndim() > 3 {
        array = array.index_axis_move(Axis(3), 0);
    }
    let data = array
        .into_dimensionality::<Ix3>()
        .map_err(|e| VolregError::InvalidNifti(e.to_string()))?
        .as_standard_layout()
        .into_owned();

    Ok(LoadedVolume {
        volume: Volume::new(data, voxel_size),
        world,
    })
}

pub fn read_nifti(path: &Path) -> Result<LoadedVolume> {
    let bytes = std::fs::read(path)?;
    read_nifti_bytes(&bytes)
}

fn encode_header(volume: &Volume, world: &Matrix4<f32>) -> Result<Vec<u8>> {
    let mut h = vec![0u8; HEADER_SIZE];
    LittleEndian::write_i32(&mut h[0..4], HEADER_SIZE as i32);

    let dims = volume.geometry().dims();
    let mut dim = [3i16, 1, 1, 1, 1, 1, 1, 1];
    for (i, &n) in dims.iter().enumerate() {
        dim[i + 1] = i16::try_from(n).map_err(|_| {
            VolregError::InvalidNifti(format!("dimension {n} exceeds the NIfTI-1 limit"))
        })?;
    }
    for (i, &d) in dim.iter().enumerate() {
        LittleEndian::write_i16(&mut h[40 + 2 * i..42 + 2 * i], d);
    }

    LittleEndian::write_i16(&mut h[70..72], DT_FLOAT32);
    LittleEndian::write_i16(&mut h[72..74], 32);

    let vs = volume.voxel_size.as_array();
    let pixdim = [1.0f32, vs[0], vs[1], vs[2], 1.0, 1.0, 1.0, 1.0];
    for (i, &p) in pixdim.iter().enumerate() {
        LittleEndian::write_f32(&mut h[76 + 4 * i..80 + 4 * i], p);
    }

    LittleEndian::write_f32(&mut h[108..112], VOX_OFFSET as f32);
    LittleEndian::write_f32(&mut h[112..116], 1.0);
    // xyzt_units: millimeters
    h[123] = 2;
    LittleEndian::write_i16(&mut h[254..256], 1);

    for row in 0..3 {
        for col in 0..4 {
            let offset = 280 + row * 16 + col * 4;
            LittleEndian::write_f32(&mut h[offset..offset + 4], world[(row, col)]);
        }
    }
    h[344..348].copy_from_slice(b"n+1\0");
    Ok(h)
}

/// Serialize a volume as NIfTI-1 bytes, x varying fastest.
pub fn encode_nifti(volume: &Volume, world: &Matrix4<f32>) -> Result<Vec<u8>> {
    let mut out = encode_header(volume, world)?;
    out.reserve(VOX_OFFSET - HEADER_SIZE + volume.data.len() * 4);
    out.extend_from_slice(&[0u8; 4]);
    // Fortran order: transpose the view so logical iteration runs x fastest.
    for &v in volume.data.t().iter() {
        out.write_f32::<LittleEndian>(v)?;
    }
    Ok(out)
}

/// Write a volume; paths ending in `.gz` are gzip-compressed.
pub fn write_nifti(path: &Path, volume: &Volume, world: &Matrix4<f32>) -> Result<()> {
    let bytes = encode_nifti(volume, world)?;
    let file = BufWriter::new(File::create(path)?);
    if path.extension().is_some_and(|e| e == "gz") {
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&bytes)?;
        encoder.finish()?.flush()?;
    } else {
        let mut file = file;
        file.write_all(&bytes)?;
        file.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let volume = Volume::zeros(
            crate::volume::Geometry::new(3, 4, 5),
            VoxelSize::new(1.0, 2.0, 3.0).unwrap(),
        );
        let bytes = encode_nifti(&volume, &volume.voxel_size.to_world()).unwrap();
        assert_eq!(bytes.len(), VOX_OFFSET + 60 * 4);
        assert_eq!(LittleEndian::read_i32(&bytes[0..4]), 348);
        assert_eq!(LittleEndian::read_i16(&bytes[42..44]), 3);
        assert_eq!(LittleEndian::read_i16(&bytes[46..48]), 5);
        assert_eq!(LittleEndian::read_f32(&bytes[84..88]), 2.0);
        assert_eq!(&bytes[344..348], b"n+1\0");
    }

    #[test]
    fn test_data_is_x_fastest() {
        let mut volume = Volume::zeros(crate::volume::Geometry::new(2, 2, 1), VoxelSize::default());
        volume.data[[1, 0, 0]] = 7.0;
        volume.data[[0, 1, 0]] = 9.0;
        let bytes = encode_nifti(&volume, &Matrix4::identity()).unwrap();
        let data = &bytes[VOX_OFFSET..];
        assert_eq!(LittleEndian::read_f32(&data[4..8]), 7.0);
        assert_eq!(LittleEndian::read_f32(&data[8..12]), 9.0);
    }

    fn write_i16_at(bytes: &mut [u8], offset: usize, value: i16) {
        LittleEndian::write_i16(&mut bytes[offset..offset + 2], value);
    }

    fn write_f32_at(bytes: &mut [u8], offset: usize, value: f32) {
        LittleEndian::write_f32(&mut bytes[offset..offset + 4], value);
    }

    #[test]
    fn test_five_dimensional_keeps_first_component() {
        let mut volume = Volume::zeros(crate::volume::Geometry::new(2, 2, 2), VoxelSize::default());
        volume.data[[1, 0, 1]] = 5.0;
        let mut bytes = encode_nifti(&volume, &Matrix4::identity()).unwrap();
        // dim = [5, 2, 2, 2, 1, 2]: a two-component vector image
        write_i16_at(&mut bytes, 40, 5);
        write_i16_at(&mut bytes, 48, 1);
        write_i16_at(&mut bytes, 50, 2);
        for _ in 0..8 {
            bytes.write_f32::<LittleEndian>(-1.0).unwrap();
        }

        let loaded = read_nifti_bytes(&bytes).unwrap();
        assert_eq!(loaded.volume.geometry().dims(), [2, 2, 2]);
        assert_eq!(loaded.volume.data[[1, 0, 1]], 5.0);
        assert!(loaded.volume.data.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_qform_used_without_sform() {
        let volume = Volume::zeros(
            crate::volume::Geometry::new(2, 2, 2),
            VoxelSize::new(1.0, 2.0, 3.0).unwrap(),
        );
        let mut bytes = encode_nifti(&volume, &Matrix4::identity()).unwrap();
        write_i16_at(&mut bytes, 252, 1);
        write_i16_at(&mut bytes, 254, 0);
        // 90 degrees about z
        write_f32_at(&mut bytes, 256, 0.0);
        write_f32_at(&mut bytes, 260, 0.0);
        write_f32_at(&mut bytes, 264, std::f32::consts::FRAC_1_SQRT_2);
        write_f32_at(&mut bytes, 268, 10.0);
        write_f32_at(&mut bytes, 272, 20.0);
        write_f32_at(&mut bytes, 276, 30.0);

        let world = read_nifti_bytes(&bytes).unwrap().world;
        let expected = Matrix4::new(
            0.0, -2.0, 0.0, 10.0, //
            1.0, 0.0, 0.0, 20.0, //
            0.0, 0.0, 3.0, 30.0, //
            0.0, 0.0, 0.0, 1.0,
        );
        assert!((world - expected).abs().max() < 1e-5, "{world}");
    }

    #[test]
    fn test_invalid_bytes() {
        assert!(matches!(
            read_nifti_bytes(&[0u8; 10]),
            Err(VolregError::InvalidNifti(_))
        ));
    }
}
