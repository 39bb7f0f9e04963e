//! Quantizer: converts between the float cloud and the byte-packed form.

use crate::common::{
    clamp_u8, dim_for_degree, half_to_float, inv_sigmoid, normalize_quat, quantize_sh, sigmoid,
    unquantize_sh, COLOR_SCALE,
};
use crate::error::SpzError;
use crate::structures::{
    GaussianCloud, PackedGaussians, PackedGaussiansView, DEFAULT_FRACTIONAL_BITS,
};

/// 10-bit signed quantization range for smallest-three components.
const ROTATION_RANGE: f32 = 511.0;

#[inline]
fn finite_or(val: f32, default: f32) -> f32 {
    if val.is_finite() {
        val
    } else {
        default
    }
}

/// Encodes a (x, y, z, w) quaternion as smallest-three: the three components
/// with smallest magnitude quantized to 10 bits each, the index of the
/// largest in the top two bits. The largest component is made non-negative by
/// negating the whole quaternion, so it never needs a sign.
fn pack_rotation(quat: &[f32]) -> [u8; 4] {
    let q = normalize_quat((
        finite_or(quat[0], 0.0),
        finite_or(quat[1], 0.0),
        finite_or(quat[2], 0.0),
        finite_or(quat[3], 1.0),
    ));
    let comps = [q.0, q.1, q.2, q.3];

    let mut largest = 0;
    for i in 1..4 {
        if comps[i].abs() >= comps[largest].abs() {
            largest = i;
        }
    }
    let sign = if comps[largest] < 0.0 { -1.0 } else { 1.0 };

    // The remaining components lie in [-1/sqrt(2), 1/sqrt(2)]; map that
    // interval onto [-511, 511] and keep the low 10 bits of each.
    let mut packed = (largest as u32) << 30;
    let mut shift = 0;
    for (i, &c) in comps.iter().enumerate() {
        if i == largest {
            continue;
        }
        let v = (sign * c * std::f32::consts::SQRT_2 * ROTATION_RANGE)
            .round()
            .clamp(-ROTATION_RANGE, ROTATION_RANGE) as i32;
        packed |= ((v as u32) & 0x3FF) << shift;
        shift += 10;
    }
    packed.to_le_bytes()
}

/// Inverse of [`pack_rotation`]: sign-extends each 10-bit field from bit 9
/// and reconstructs the largest component from the unit norm.
fn unpack_rotation(bytes: &[u8]) -> [f32; 4] {
    let packed = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let largest = (packed >> 30) as usize;

    let mut quat = [0.0f32; 4];
    let mut sum_squares = 0.0f32;
    let mut shift = 0;
    for (i, slot) in quat.iter_mut().enumerate() {
        if i == largest {
            continue;
        }
        let mut v = ((packed >> shift) & 0x3FF) as i32;
        if v & 0x200 != 0 {
            v -= 0x400;
        }
        shift += 10;
        let c = v as f32 / ROTATION_RANGE * std::f32::consts::FRAC_1_SQRT_2;
        sum_squares += c * c;
        *slot = c;
    }
    quat[largest] = (1.0 - sum_squares).max(0.0).sqrt();
    quat
}

#[inline]
fn parse_3bytes(bytes: &[u8]) -> f32 {
    let b0 = bytes[0] as u32;
    let b1 = bytes[1] as u32;
    let b2 = bytes[2] as u32;
    let mut fixed = b0 | (b1 << 8) | (b2 << 16);
    if (fixed & 0x0080_0000) != 0 {
        fixed |= 0xFF00_0000; // Sign extend
    }
    fixed as i32 as f32
}

/// Quantizes a cloud into the byte-packed form. Positions use 24-bit fixed
/// point with 12 fractional bits, rotations the smallest-three encoding; the
/// result always serializes as container version 3.
pub fn pack_gaussians(gc: &GaussianCloud) -> Result<PackedGaussians, SpzError> {
    gc.check_sizes()?;
    let sh_dim = dim_for_degree(gc.sh_degree);
    let sf = (1u32 << DEFAULT_FRACTIONAL_BITS) as f32;
    let color_factor = COLOR_SCALE * 255.0;
    let color_offset = 127.5; // 0.5 * 255.0

    let positions: Vec<u8> = gc
        .positions
        .iter()
        .flat_map(|&val| {
            let fixed = (finite_or(val, 0.0) * sf).round() as i32;
            [
                (fixed & 0xFF) as u8,
                ((fixed >> 8) & 0xFF) as u8,
                ((fixed >> 16) & 0xFF) as u8,
            ]
        })
        .collect();

    let scales: Vec<u8> = gc
        .scales
        .iter()
        .map(|&s| clamp_u8((finite_or(s, 0.0) + 10.0) * 16.0))
        .collect();

    let rotations: Vec<u8> = gc
        .rotations
        .chunks_exact(4)
        .flat_map(|quat| pack_rotation(quat))
        .collect();

    let alphas: Vec<u8> = gc
        .alphas
        .iter()
        .map(|&a| clamp_u8(sigmoid(a) * 255.0))
        .collect();

    let colors: Vec<u8> = gc
        .colors
        .iter()
        .map(|&c| clamp_u8(c * color_factor + color_offset))
        .collect();

    let sh = if gc.sh_degree > 0 {
        let sh_per_point = sh_dim * 3;
        gc.sh
            .chunks_exact(sh_per_point)
            .flat_map(|chunk| {
                chunk.iter().enumerate().map(|(j, &x)| {
                    let bucket = if j < 9 { 8 } else { 16 };
                    quantize_sh(x, bucket)
                })
            })
            .collect()
    } else {
        Vec::new()
    };

    Ok(PackedGaussians {
        num_points: gc.num_points,
        sh_degree: gc.sh_degree,
        fractional_bits: DEFAULT_FRACTIONAL_BITS,
        antialiased: gc.antialiased,
        uses_float16: false,
        uses_smallest_three: true,
        positions,
        scales,
        rotations,
        alphas,
        colors,
        sh,
    })
}

/// Dequantizes a packed view back into a float cloud, dispatching on the
/// version-derived position and rotation encodings.
pub fn unpack_gaussians(pg: &PackedGaussiansView) -> Result<GaussianCloud, SpzError> {
    pg.check_sizes()?;
    let np = pg.num_points as usize;
    let sh_dim = dim_for_degree(pg.sh_degree);
    let mut cloud = GaussianCloud {
        num_points: pg.num_points,
        sh_degree: pg.sh_degree,
        antialiased: pg.antialiased,
        positions: vec![0.0; np * 3],
        scales: vec![0.0; np * 3],
        rotations: vec![0.0; np * 4],
        alphas: vec![0.0; np],
        colors: vec![0.0; np * 3],
        sh: vec![0.0; np * sh_dim * 3],
    };

    if pg.uses_float16 {
        // Version 1: three little-endian binary16 components per point.
        for (chunk, out) in pg
            .positions
            .chunks_exact(6)
            .zip(cloud.positions.chunks_exact_mut(3))
        {
            out[0] = half_to_float(u16::from_le_bytes([chunk[0], chunk[1]]));
            out[1] = half_to_float(u16::from_le_bytes([chunk[2], chunk[3]]));
            out[2] = half_to_float(u16::from_le_bytes([chunk[4], chunk[5]]));
        }
    } else {
        // 24-bit fixed point. Only the low 6 bits of the header field count.
        let scale = 1.0 / (1u64 << (pg.fractional_bits & 0x3F)) as f32;
        for (chunk, out) in pg
            .positions
            .chunks_exact(9)
            .zip(cloud.positions.chunks_exact_mut(3))
        {
            out[0] = parse_3bytes(&chunk[0..3]) * scale;
            out[1] = parse_3bytes(&chunk[3..6]) * scale;
            out[2] = parse_3bytes(&chunk[6..9]) * scale;
        }
    }

    cloud
        .scales
        .iter_mut()
        .zip(pg.scales.iter())
        .for_each(|(s, &pg_s)| {
            *s = pg_s as f32 / 16.0 - 10.0;
        });

    if pg.uses_smallest_three {
        pg.rotations
            .chunks_exact(4)
            .zip(cloud.rotations.chunks_exact_mut(4))
            .for_each(|(r_chunk, rot_chunk)| {
                rot_chunk.copy_from_slice(&unpack_rotation(r_chunk));
            });
    } else {
        // Versions 1 and 2: first-three encoding, w reconstructed and
        // implicitly non-negative.
        let rotation_scale = 1.0 / 127.5;
        pg.rotations
            .chunks_exact(3)
            .zip(cloud.rotations.chunks_exact_mut(4))
            .for_each(|(r_chunk, rot_chunk)| {
                let x = r_chunk[0] as f32 * rotation_scale - 1.0;
                let y = r_chunk[1] as f32 * rotation_scale - 1.0;
                let z = r_chunk[2] as f32 * rotation_scale - 1.0;

                let rr = 1.0 - (x * x + y * y + z * z);
                let w = if rr < 0.0 { 0.0 } else { rr.sqrt() };

                rot_chunk[0] = x;
                rot_chunk[1] = y;
                rot_chunk[2] = z;
                rot_chunk[3] = w;
            });
    }

    cloud
        .alphas
        .iter_mut()
        .zip(pg.alphas.iter())
        .for_each(|(a, &pg_a)| {
            *a = inv_sigmoid(pg_a as f32 / 255.0);
        });

    cloud
        .colors
        .iter_mut()
        .zip(pg.colors.iter())
        .for_each(|(c, &pg_c)| {
            *c = (pg_c as f32 / 255.0 - 0.5) / COLOR_SCALE;
        });

    cloud
        .sh
        .iter_mut()
        .zip(pg.sh.iter())
        .for_each(|(sh, &pg_sh)| {
            *sh = unquantize_sh(pg_sh);
        });

    Ok(cloud)
}
