//! Serialization of the packed form to and from the SPZ container layout:
//! a 16-byte little-endian header followed by the six data sections in
//! fixed order.

use crate::common::dim_for_degree;
use crate::error::SpzError;
use crate::structures::{
    PackedGaussians, PackedGaussiansView, FLAG_ANTIALIASED, MAGIC, MAX_POINTS, SPZ_VERSION,
};

const HEADER_SIZE: usize = 16;

struct SpzHeader {
    version: u32,
    num_points: u32,
    sh_degree: u8,
    fractional_bits: u8,
    flags: u8,
}

impl SpzHeader {
    fn parse(data: &[u8]) -> Result<SpzHeader, SpzError> {
        if data.len() < HEADER_SIZE {
            return Err(SpzError::InvalidHeader(format!(
                "buffer too short for header: {} bytes",
                data.len()
            )));
        }
        let magic = u32::from_le_bytes(data[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(SpzError::InvalidHeader(format!(
                "bad magic: {:#010x}",
                magic
            )));
        }
        let version = u32::from_le_bytes(data[4..8].try_into().unwrap());
        if !(1..=SPZ_VERSION).contains(&version) {
            return Err(SpzError::UnsupportedVersion(version));
        }
        let num_points = u32::from_le_bytes(data[8..12].try_into().unwrap());
        if num_points > MAX_POINTS {
            return Err(SpzError::TooManyPoints(num_points));
        }
        let sh_degree = data[12];
        if sh_degree > 3 {
            return Err(SpzError::UnsupportedShDegree(sh_degree));
        }
        // data[15] is reserved; readers ignore it.
        Ok(SpzHeader {
            version,
            num_points,
            sh_degree,
            fractional_bits: data[13],
            flags: data[14],
        })
    }

    fn emit(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.num_points.to_le_bytes());
        out.push(self.sh_degree);
        out.push(self.fractional_bits);
        out.push(self.flags);
        out.push(0); // reserved
    }
}

/// Emits the container bytes for a packed cloud. The version is derived from
/// the packed encoding flags; the quantizer's output always serializes as
/// version 3.
pub fn serialize_packed_gaussians(pg: &PackedGaussians) -> Result<Vec<u8>, SpzError> {
    pg.check_sizes()?;
    let version = if pg.uses_float16 {
        1
    } else if pg.uses_smallest_three {
        SPZ_VERSION
    } else {
        2
    };

    let data_size = pg.positions.len()
        + pg.alphas.len()
        + pg.colors.len()
        + pg.scales.len()
        + pg.rotations.len()
        + pg.sh.len();
    let mut out = Vec::with_capacity(HEADER_SIZE + data_size);

    SpzHeader {
        version,
        num_points: pg.num_points,
        sh_degree: pg.sh_degree,
        fractional_bits: pg.fractional_bits,
        flags: if pg.antialiased { FLAG_ANTIALIASED } else { 0 },
    }
    .emit(&mut out);

    out.extend_from_slice(&pg.positions);
    out.extend_from_slice(&pg.alphas);
    out.extend_from_slice(&pg.colors);
    out.extend_from_slice(&pg.scales);
    out.extend_from_slice(&pg.rotations);
    out.extend_from_slice(&pg.sh);
    Ok(out)
}

/// Parses the container header and slices out the six sections without
/// copying. Trailing bytes beyond the last section are ignored.
pub fn deserialize_packed_gaussians(data: &[u8]) -> Result<PackedGaussiansView<'_>, SpzError> {
    let hdr = SpzHeader::parse(data)?;
    let uses_float16 = hdr.version == 1;
    let uses_smallest_three = hdr.version >= 3;

    let np = hdr.num_points as usize;
    let positions_len = np * 3 * if uses_float16 { 2 } else { 3 };
    let alphas_len = np;
    let colors_len = np * 3;
    let scales_len = np * 3;
    let rotations_len = np * if uses_smallest_three { 4 } else { 3 };
    let sh_len = np * dim_for_degree(hdr.sh_degree) * 3;

    let needed =
        HEADER_SIZE + positions_len + alphas_len + colors_len + scales_len + rotations_len + sh_len;
    if data.len() < needed {
        return Err(SpzError::InvalidData(format!(
            "container too short, need {} bytes, have {}",
            needed,
            data.len()
        )));
    }

    let mut offset = HEADER_SIZE;
    let positions = &data[offset..offset + positions_len];
    offset += positions_len;
    let alphas = &data[offset..offset + alphas_len];
    offset += alphas_len;
    let colors = &data[offset..offset + colors_len];
    offset += colors_len;
    let scales = &data[offset..offset + scales_len];
    offset += scales_len;
    let rotations = &data[offset..offset + rotations_len];
    offset += rotations_len;
    let sh = &data[offset..offset + sh_len];

    Ok(PackedGaussiansView {
        num_points: hdr.num_points,
        sh_degree: hdr.sh_degree,
        fractional_bits: hdr.fractional_bits,
        antialiased: (hdr.flags & FLAG_ANTIALIASED) != 0,
        uses_float16,
        uses_smallest_three,
        positions,
        scales,
        rotations,
        alphas,
        colors,
        sh,
    })
}
