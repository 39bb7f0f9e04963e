//! Bridge to the `binary_little_endian 1.0` PLY dialect used by splat
//! training pipelines. Properties are mapped by name, so any declaration
//! order is accepted on read; the writer always emits the canonical order.

use crate::common::{degree_for_dim, dim_for_degree};
use crate::error::SpzError;
use crate::structures::GaussianCloud;
use foldhash::{HashMap, HashMapExt};
use std::io::Write;

/// PLY vertex counts are capped independently of the container cap.
const MAX_PLY_POINTS: usize = 10 * 1024 * 1024;

#[inline]
fn next_line<'b>(buffer: &'b [u8], offset: &mut usize) -> Option<&'b [u8]> {
    if *offset >= buffer.len() {
        return None;
    }
    let start = *offset;

    match memchr::memchr(b'\n', &buffer[*offset..]) {
        Some(pos) => {
            *offset = start + pos + 1;
            Some(&buffer[start..start + pos])
        }
        None => {
            *offset = buffer.len();
            Some(&buffer[start..])
        }
    }
}

/// Next header line that is not a comment.
#[inline]
fn next_content_line<'b>(buffer: &'b [u8], offset: &mut usize) -> Option<&'b [u8]> {
    loop {
        let line = next_line(buffer, offset)?;
        if !line.starts_with(b"comment") {
            return Some(line);
        }
    }
}

#[inline(always)]
fn idx_of(hm: &HashMap<&str, usize>, name: &str) -> Result<usize, SpzError> {
    hm.get(name)
        .cloned()
        .ok_or_else(|| SpzError::InvalidFormat(format!("Missing required field: {}", name)))
}

#[inline(always)]
fn bytes_to_f32(data: &[u8], field_name: &str) -> Result<f32, SpzError> {
    Ok(f32::from_le_bytes(data.try_into().map_err(|e| {
        SpzError::InvalidFormat(format!("Byte conversion error for {}: {}", field_name, e))
    })?))
}

#[inline(never)]
pub(crate) fn parse_ply(raw_data: &[u8]) -> Result<GaussianCloud, SpzError> {
    let mut offset = 0;

    let line1 = next_line(raw_data, &mut offset)
        .ok_or_else(|| SpzError::InvalidFormat("No 'ply' line".to_string()))?;
    if line1 != b"ply" {
        return Err(SpzError::InvalidFormat(
            "Not a .ply file (missing 'ply' header)".to_string(),
        ));
    }

    let line2 = next_content_line(raw_data, &mut offset)
        .ok_or_else(|| SpzError::InvalidFormat("Missing format line".to_string()))?;
    if line2 != b"format binary_little_endian 1.0" {
        return Err(SpzError::InvalidFormat(
            "Unsupported .ply format (only binary_little_endian 1.0 is supported)".to_string(),
        ));
    }

    let line3 = next_content_line(raw_data, &mut offset)
        .ok_or_else(|| SpzError::InvalidFormat("Missing 'element vertex' line".to_string()))?;
    if !line3.starts_with(b"element vertex ") {
        return Err(SpzError::InvalidFormat(
            "Missing 'element vertex' definition".to_string(),
        ));
    }
    let num_str = &line3[b"element vertex ".len()..];
    let num_points: usize = {
        let s = std::str::from_utf8(num_str)
            .map_err(|e| SpzError::InvalidFormat(format!("UTF-8 error: {}", e)))?
            .trim();
        s.parse()
            .map_err(|e| SpzError::InvalidFormat(format!("Bad vertex count: {}", e)))?
    };
    if num_points == 0 || num_points > MAX_PLY_POINTS {
        return Err(SpzError::InvalidFormat(format!(
            "Invalid vertex count: {}",
            num_points
        )));
    }

    let mut field_names = Vec::new();
    loop {
        let line = match next_content_line(raw_data, &mut offset) {
            Some(l) => l,
            None => {
                return Err(SpzError::InvalidFormat(
                    "No 'end_header' found before EOF".to_string(),
                ))
            }
        };

        if line.starts_with(b"end_header") {
            break;
        }

        // Only "property float <name>" is supported.
        if !line.starts_with(b"property float ") {
            return Err(SpzError::InvalidFormat(format!(
                "Unsupported property line: {:?}",
                String::from_utf8_lossy(line)
            )));
        }

        let raw_name = &line[b"property float ".len()..];
        field_names.push(raw_name);
    }

    let mut field_map: HashMap<&str, usize> = HashMap::with_capacity(field_names.len());
    for (i, &f_bytes) in field_names.iter().enumerate() {
        let s = std::str::from_utf8(f_bytes)
            .map_err(|e| SpzError::InvalidFormat(format!("UTF-8 error in field name: {}", e)))?;
        field_map.insert(s, i);
    }

    let ix = idx_of(&field_map, "x")?;
    let iy = idx_of(&field_map, "y")?;
    let iz = idx_of(&field_map, "z")?;
    let is0 = idx_of(&field_map, "scale_0")?;
    let is1 = idx_of(&field_map, "scale_1")?;
    let is2 = idx_of(&field_map, "scale_2")?;
    let ir0 = idx_of(&field_map, "rot_0")?;
    let ir1 = idx_of(&field_map, "rot_1")?;
    let ir2 = idx_of(&field_map, "rot_2")?;
    let ir3 = idx_of(&field_map, "rot_3")?;
    let iop = idx_of(&field_map, "opacity")?;
    let ic0 = idx_of(&field_map, "f_dc_0")?;
    let ic1 = idx_of(&field_map, "f_dc_1")?;
    let ic2 = idx_of(&field_map, "f_dc_2")?;
    // nx/ny/nz may be declared; they are skipped by never being indexed.

    // Optional spherical harmonics: consecutive f_rest_* from 0, up to 45.
    let mut sh_idx = Vec::new();
    for i in 0..45 {
        let nm = format!("f_rest_{}", i);
        if let Some(&found) = field_map.get(nm.as_str()) {
            sh_idx.push(found);
        } else {
            break;
        }
    }
    if sh_idx.len() % 3 != 0 {
        return Err(SpzError::InvalidFormat(
            "Incomplete spherical harmonics fields".to_string(),
        ));
    }
    let sh_dim = sh_idx.len() / 3;
    let sh_degree = degree_for_dim(sh_dim);
    if dim_for_degree(sh_degree) != sh_dim {
        return Err(SpzError::InvalidFormat(format!(
            "Unsupported spherical harmonics layout: {} coefficients per channel",
            sh_dim
        )));
    }

    let fields_per_vertex = field_names.len();
    let expected_bytes = num_points
        .checked_mul(fields_per_vertex)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| SpzError::InvalidFormat("Overflow in byte calculation".to_string()))?;

    if raw_data.len() < offset + expected_bytes {
        return Err(SpzError::InvalidFormat(format!(
            "Binary data is too short, need {} bytes, have {}",
            expected_bytes,
            raw_data.len() - offset
        )));
    }

    let data = &raw_data[offset..offset + expected_bytes];
    let mut cursor = 0;

    let mut cloud = GaussianCloud {
        num_points: num_points as u32,
        sh_degree,
        antialiased: false,
        positions: Vec::with_capacity(num_points * 3),
        scales: Vec::with_capacity(num_points * 3),
        rotations: Vec::with_capacity(num_points * 4),
        alphas: Vec::with_capacity(num_points),
        colors: Vec::with_capacity(num_points * 3),
        sh: Vec::with_capacity(num_points * sh_dim * 3),
    };

    // The file stores all R coefficients, then G, then B; internally the
    // channel is the inner axis. Precompute one (r,g,b) index triple per
    // coefficient.
    let sh_indices: Vec<_> = (0..sh_dim)
        .map(|j| (sh_idx[j], sh_idx[j + sh_dim], sh_idx[j + 2 * sh_dim]))
        .collect();

    for _ in 0..num_points {
        let vertex_data = &data[cursor..cursor + fields_per_vertex * 4];

        let x = bytes_to_f32(&vertex_data[ix * 4..(ix + 1) * 4], "x")?;
        let y = bytes_to_f32(&vertex_data[iy * 4..(iy + 1) * 4], "y")?;
        let z = bytes_to_f32(&vertex_data[iz * 4..(iz + 1) * 4], "z")?;
        cloud.positions.extend_from_slice(&[x, y, z]);

        let s0 = bytes_to_f32(&vertex_data[is0 * 4..(is0 + 1) * 4], "scale_0")?;
        let s1 = bytes_to_f32(&vertex_data[is1 * 4..(is1 + 1) * 4], "scale_1")?;
        let s2 = bytes_to_f32(&vertex_data[is2 * 4..(is2 + 1) * 4], "scale_2")?;
        cloud.scales.extend_from_slice(&[s0, s1, s2]);

        // PLY stores rot_0 = w; internally the layout is (x, y, z, w).
        let r0 = bytes_to_f32(&vertex_data[ir0 * 4..(ir0 + 1) * 4], "rot_0")?;
        let r1 = bytes_to_f32(&vertex_data[ir1 * 4..(ir1 + 1) * 4], "rot_1")?;
        let r2 = bytes_to_f32(&vertex_data[ir2 * 4..(ir2 + 1) * 4], "rot_2")?;
        let r3 = bytes_to_f32(&vertex_data[ir3 * 4..(ir3 + 1) * 4], "rot_3")?;
        cloud.rotations.extend_from_slice(&[r1, r2, r3, r0]);

        let opacity = bytes_to_f32(&vertex_data[iop * 4..(iop + 1) * 4], "opacity")?;
        cloud.alphas.push(opacity);

        let c0 = bytes_to_f32(&vertex_data[ic0 * 4..(ic0 + 1) * 4], "f_dc_0")?;
        let c1 = bytes_to_f32(&vertex_data[ic1 * 4..(ic1 + 1) * 4], "f_dc_1")?;
        let c2 = bytes_to_f32(&vertex_data[ic2 * 4..(ic2 + 1) * 4], "f_dc_2")?;
        cloud.colors.extend_from_slice(&[c0, c1, c2]);

        for &(r_idx, g_idx, b_idx) in &sh_indices {
            let r = bytes_to_f32(&vertex_data[r_idx * 4..(r_idx + 1) * 4], "sh_r")?;
            let g = bytes_to_f32(&vertex_data[g_idx * 4..(g_idx + 1) * 4], "sh_g")?;
            let b = bytes_to_f32(&vertex_data[b_idx * 4..(b_idx + 1) * 4], "sh_b")?;
            cloud.sh.extend_from_slice(&[r, g, b]);
        }

        cursor += fields_per_vertex * 4;
    }

    Ok(cloud)
}

/// Serializes a cloud in the canonical property order with zeroed normals.
pub(crate) fn write_ply(cloud: &GaussianCloud) -> Result<Vec<u8>, SpzError> {
    cloud.check_sizes()?;
    let num_points = cloud.num_points as usize;
    let sh_dim = dim_for_degree(cloud.sh_degree);

    let mut output = Vec::new();
    output.extend_from_slice(b"ply\nformat binary_little_endian 1.0\n");
    writeln!(output, "element vertex {}", num_points)?;
    output.extend_from_slice(b"property float x\nproperty float y\nproperty float z\n");
    output.extend_from_slice(b"property float nx\nproperty float ny\nproperty float nz\n");
    output.extend_from_slice(
        b"property float f_dc_0\nproperty float f_dc_1\nproperty float f_dc_2\n",
    );
    for i in 0..(sh_dim * 3) {
        writeln!(output, "property float f_rest_{}", i)?;
    }
    output.extend_from_slice(
        b"property float opacity\n\
          property float scale_0\nproperty float scale_1\nproperty float scale_2\n\
          property float rot_0\nproperty float rot_1\nproperty float rot_2\nproperty float rot_3\n\
          end_header\n",
    );

    // 17 floats per splat plus the SH block.
    let point_size = (17 + sh_dim * 3) * 4;
    output.reserve(num_points * point_size);

    let normals: &[u8] = bytemuck::bytes_of(&[0.0f32; 3]);
    let mut sh_coeffs = Vec::with_capacity(3 * sh_dim);
    for i in 0..num_points {
        let pos_slice = &cloud.positions[i * 3..i * 3 + 3];
        output.extend_from_slice(bytemuck::cast_slice(pos_slice));

        output.extend_from_slice(normals);

        let color_slice = &cloud.colors[i * 3..i * 3 + 3];
        output.extend_from_slice(bytemuck::cast_slice(color_slice));

        // Transpose back to channel-major f_rest order.
        sh_coeffs.clear();
        for color_channel in 0..3 {
            for j in 0..sh_dim {
                let idx = (i * sh_dim + j) * 3 + color_channel;
                sh_coeffs.push(cloud.sh[idx]);
            }
        }
        output.extend_from_slice(bytemuck::cast_slice(&sh_coeffs));

        output.extend_from_slice(bytemuck::bytes_of(&cloud.alphas[i]));

        let scale_slice = &cloud.scales[i * 3..i * 3 + 3];
        output.extend_from_slice(bytemuck::cast_slice(scale_slice));

        // rot_0 = w comes first on disk.
        let rot_slice = &[
            cloud.rotations[i * 4 + 3],
            cloud.rotations[i * 4],
            cloud.rotations[i * 4 + 1],
            cloud.rotations[i * 4 + 2],
        ];
        output.extend_from_slice(bytemuck::cast_slice(rot_slice));
    }
    Ok(output)
}
