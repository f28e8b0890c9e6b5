//! Composite mapping container.
//!
//! A gzip stream of MATLAB v4 style records. Each record is a 20-byte
//! little-endian header `(type, rows, cols, imagf, name_len)`, the
//! NUL-terminated name, then `rows * cols` column-major values.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use nalgebra::Matrix4;
use ndarray::Array3;

use crate::error::{Result, VolregError};
use crate::field::CompositeMapping;
use crate::volume::{Geometry, VoxelSize};

/// Record type code for little-endian float32.
const TYPE_F32: i32 = 10;
/// Record type code for little-endian int32.
const TYPE_I32: i32 = 20;

enum Values {
    F32(Vec<f32>),
    I32(Vec<i32>),
}

struct Record {
    rows: usize,
    cols: usize,
    values: Values,
}

fn write_header(w: &mut impl Write, name: &str, type_code: i32, rows: usize, cols: usize) -> Result<()> {
    w.write_i32::<LittleEndian>(type_code)?;
    w.write_i32::<LittleEndian>(rows as i32)?;
    w.write_i32::<LittleEndian>(cols as i32)?;
    w.write_i32::<LittleEndian>(0)?;
    w.write_i32::<LittleEndian>(name.len() as i32 + 1)?;
    w.write_all(name.as_bytes())?;
    w.write_u8(0)?;
    Ok(())
}

fn write_f32_record(w: &mut impl Write, name: &str, rows: usize, cols: usize, values: &[f32]) -> Result<()> {
    write_header(w, name, TYPE_F32, rows, cols)?;
    for &v in values {
        w.write_f32::<LittleEndian>(v)?;
    }
    Ok(())
}

fn write_i32_record(w: &mut impl Write, name: &str, rows: usize, cols: usize, values: &[i32]) -> Result<()> {
    write_header(w, name, TYPE_I32, rows, cols)?;
    for &v in values {
        w.write_i32::<LittleEndian>(v)?;
    }
    Ok(())
}

/// Serialize a mapping to an uncompressed record stream.
pub fn encode_mapping(mapping: &CompositeMapping) -> Result<Vec<u8>> {
    let geometry = mapping.geometry();
    let mut out = Vec::with_capacity(geometry.size() * 12 + 256);

    // One column per template voxel, x varying fastest.
    let coords: Vec<f32> = mapping.data().t().iter().flat_map(|v| *v).collect();
    write_f32_record(&mut out, "mapping", 3, geometry.size(), &coords)?;

    let dims = geometry.dims().map(|n| n as i32);
    write_i32_record(&mut out, "dimension", 1, 3, &dims)?;
    write_f32_record(&mut out, "voxel_size", 1, 3, &mapping.voxel_size().as_array())?;
    write_f32_record(&mut out, "trans", 4, 4, mapping.world().as_slice())?;
    Ok(out)
}

pub fn save_mapping(path: &Path, mapping: &CompositeMapping) -> Result<()> {
    let bytes = encode_mapping(mapping)?;
    let mut encoder = GzEncoder::new(BufWriter::new(File::create(path)?), Compression::default());
    encoder.write_all(&bytes)?;
    encoder.finish()?.flush()?;
    Ok(())
}

fn invalid(msg: impl Into<String>) -> VolregError {
    VolregError::InvalidMapping(msg.into())
}

fn read_record(r: &mut Cursor<&[u8]>) -> Result<(String, Record)> {
    let type_code = r.read_i32::<LittleEndian>()?;
    let rows = r.read_i32::<LittleEndian>()?;
    let cols = r.read_i32::<LittleEndian>()?;
    let imagf = r.read_i32::<LittleEndian>()?;
    let name_len = r.read_i32::<LittleEndian>()?;
    if rows < 0 || cols < 0 || name_len <= 0 || imagf != 0 {
        return Err(invalid("malformed record header"));
    }
    let mut name = vec![0u8; name_len as usize];
    r.read_exact(&mut name)?;
    let name = String::from_utf8_lossy(&name)
        .trim_end_matches('\0')
        .to_string();

    let (rows, cols) = (rows as usize, cols as usize);
    let count = rows
        .checked_mul(cols)
        .ok_or_else(|| invalid(format!("record {name} is too large")))?;
    let remaining = r.get_ref().len() as u64 - r.position();
    if (count as u64).checked_mul(4).map_or(true, |bytes| bytes > remaining) {
        return Err(invalid(format!("record {name} is truncated")));
    }
    let values = match type_code {
        TYPE_F32 => {
            let mut v = vec![0f32; count];
            r.read_f32_into::<LittleEndian>(&mut v)?;
            Values::F32(v)
        }
        TYPE_I32 => {
            let mut v = vec![0i32; count];
            r.read_i32_into::<LittleEndian>(&mut v)?;
            Values::I32(v)
        }
        other => return Err(invalid(format!("unsupported record type {other}"))),
    };
    Ok((name, Record { rows, cols, values }))
}

fn f32_values<'a>(records: &'a HashMap<String, Record>, name: &str, rows: usize, cols: usize) -> Result<&'a [f32]> {
    let record = records
        .get(name)
        .ok_or_else(|| invalid(format!("missing record {name}")))?;
    if record.rows != rows || record.cols != cols {
        return Err(invalid(format!(
            "record {name} is {}x{}, expected {rows}x{cols}",
            record.rows, record.cols
        )));
    }
    match &record.values {
        Values::F32(v) => Ok(v),
        Values::I32(_) => Err(invalid(format!("record {name} must be float32"))),
    }
}

/// Parse an uncompressed record stream.
pub fn decode_mapping(bytes: &[u8]) -> Result<CompositeMapping> {
    let mut cursor = Cursor::new(bytes);
    let mut records = HashMap::new();
    while (cursor.position() as usize) < bytes.len() {
        let (name, record) = read_record(&mut cursor).map_err(|e| match e {
            VolregError::Io(_) => invalid("unexpected end of file"),
            e => e,
        })?;
        records.insert(name, record);
    }

    let dims = match records.get("dimension") {
        Some(Record {
            values: Values::I32(v),
            ..
        }) if v.len() == 3 && v.iter().all(|&n| n > 0) => [v[0] as usize, v[1] as usize, v[2] as usize],
        Some(_) => return Err(invalid("dimension must hold three positive int32 values")),
        None => return Err(invalid("missing record dimension")),
    };
    let voxels = dims
        .iter()
        .try_fold(1usize, |acc, &n| acc.checked_mul(n))
        .filter(|n| n.checked_mul(3).is_some())
        .ok_or_else(|| invalid(format!("dimension {dims:?} is too large")))?;
    let geometry = Geometry::new(dims[0], dims[1], dims[2]);

    let vs = f32_values(&records, "voxel_size", 1, 3)?;
    let voxel_size = VoxelSize::new(vs[0], vs[1], vs[2]).map_err(|e| invalid(e.to_string()))?;
    let trans = f32_values(&records, "trans", 4, 4)?;
    let world = Matrix4::from_column_slice(trans);
    let coords = f32_values(&records, "mapping", 3, voxels)?;

    // Stored x fastest; build the reversed-axis array and transpose back.
    let (nx, ny, nz) = geometry.shape();
    let data = Array3::from_shape_fn((nx, ny, nz), |(x, y, z)| {
        let i = 3 * (x + nx * (y + ny * z));
        [coords[i], coords[i + 1], coords[i + 2]]
    });
    Ok(CompositeMapping::new(data, voxel_size, world))
}

pub fn load_mapping(path: &Path) -> Result<CompositeMapping> {
    let mut bytes = Vec::new();
    GzDecoder::new(BufReader::new(File::open(path)?))
        .read_to_end(&mut bytes)
        .map_err(|e| invalid(format!("cannot decompress: {e}")))?;
    decode_mapping(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_mapping() -> CompositeMapping {
        let data = Array3::from_shape_fn((3, 2, 2), |(x, y, z)| [x as f32 + 0.5, y as f32 * 2.0, z as f32 - 1.0]);
        let mut world = Matrix4::identity();
        world[(0, 3)] = -90.0;
        CompositeMapping::new(data, VoxelSize::new(1.0, 1.5, 2.0).unwrap(), world)
    }

    #[test]
    fn test_encode_decode() {
        let mapping = sample_mapping();
        let decoded = decode_mapping(&encode_mapping(&mapping).unwrap()).unwrap();
        assert_eq!(decoded, mapping);
        assert_eq!(decoded.world()[(0, 3)], -90.0);
    }

    #[test]
    fn test_mapping_record_is_x_fastest() {
        let bytes = encode_mapping(&sample_mapping()).unwrap();
        // Header (20) + "mapping\0" (8), then the first two columns.
        let mut r = Cursor::new(&bytes[28..]);
        let first: Vec<f32> = (0..6).map(|_| r.read_f32::<LittleEndian>().unwrap()).collect();
        assert_eq!(first, vec![0.5, 0.0, -1.0, 1.5, 0.0, -1.0]);
    }

    #[test]
    fn test_truncated_stream_rejected() {
        let bytes = encode_mapping(&sample_mapping()).unwrap();
        assert!(matches!(
            decode_mapping(&bytes[..bytes.len() - 10]),
            Err(VolregError::InvalidMapping(_))
        ));
    }

    #[test]
    fn test_missing_record_rejected() {
        let mut out = Vec::new();
        write_i32_record(&mut out, "dimension", 1, 3, &[1, 1, 1]).unwrap();
        assert!(matches!(decode_mapping(&out), Err(VolregError::InvalidMapping(_))));
    }

    #[test]
    fn test_oversized_dimension_rejected() {
        let mut out = Vec::new();
        write_i32_record(&mut out, "dimension", 1, 3, &[i32::MAX; 3]).unwrap();
        write_f32_record(&mut out, "voxel_size", 1, 3, &[1.0; 3]).unwrap();
        match decode_mapping(&out) {
            Err(VolregError::InvalidMapping(msg)) => assert!(msg.contains("too large"), "{msg}"),
            other => panic!("expected InvalidMapping, got {other:?}"),
        }
    }
}
