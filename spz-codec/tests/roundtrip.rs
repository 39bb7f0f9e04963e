use flate2::write::GzEncoder;
use flate2::Compression;
use spz_codec::{
    decode_spz, encode_spz, pack_gaussians, serialize_packed_gaussians, unpack_gaussians,
    CoordinateSystem, GaussianCloud, SpzError, MAX_POINTS,
};
use std::io::Write;

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn gzip_wrap(payload: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).unwrap();
    encoder.finish().unwrap()
}

/// Deterministic cloud with values that avoid quantization-bucket midpoints.
fn make_cloud(num_points: u32, sh_degree: u8, antialiased: bool) -> GaussianCloud {
    let np = num_points as usize;
    let sh_dim = match sh_degree {
        0 => 0,
        1 => 3,
        2 => 8,
        _ => 15,
    };
    let mut cloud = GaussianCloud {
        num_points,
        sh_degree,
        antialiased,
        ..Default::default()
    };
    for i in 0..np {
        let f = i as f32;
        cloud
            .positions
            .extend_from_slice(&[f * 0.25 - 1.0, f * -0.5, 2.0 + f * 0.0625]);
        cloud
            .scales
            .extend_from_slice(&[-4.0 + f * 0.0625, -5.0, -6.0 + f * 0.125]);
        let quat = [0.1 * f, -0.2, 0.3, 1.0 + 0.05 * f];
        let norm: f32 = quat.iter().map(|c| c * c).sum::<f32>().sqrt();
        cloud
            .rotations
            .extend(quat.iter().map(|c| c / norm));
        cloud.alphas.push(f * 0.5 - 1.0);
        cloud
            .colors
            .extend_from_slice(&[0.25, -0.5 + f * 0.125, 1.0]);
        for j in 0..sh_dim * 3 {
            // Multiples of 1/8 sit on both SH bucket grids.
            let v = ((i + j) % 5) as f32 * 0.125 - 0.25;
            cloud.sh.push(v);
        }
    }
    cloud
}

#[test]
fn e1_single_splat_round_trip() {
    let cloud = GaussianCloud {
        num_points: 1,
        sh_degree: 1,
        antialiased: false,
        positions: vec![0.0, 0.0, 0.0],
        scales: vec![0.1, 0.1, 0.1],
        rotations: vec![0.0, 0.0, 0.0, 1.0],
        alphas: vec![1.0],
        colors: vec![0.5, 0.5, 0.5],
        sh: vec![0.0; 9],
    };
    let bytes = encode_spz(&cloud, CoordinateSystem::Unspecified).unwrap();
    assert_eq!(&bytes[0..4], &[0x1F, 0x8B, 0x08, 0x00]);

    let decoded = decode_spz(&bytes, CoordinateSystem::Unspecified).unwrap();
    assert_eq!(decoded.num_points, 1);
    assert_eq!(decoded.sh_degree, 1);
    for (a, b) in cloud.positions.iter().zip(&decoded.positions) {
        assert!((a - b).abs() <= 1.0 / 8192.0);
    }
    assert!((sigmoid(decoded.alphas[0]) - sigmoid(1.0)).abs() <= 1.0 / 255.0);
    for (a, b) in cloud.colors.iter().zip(&decoded.colors) {
        assert!((a - b).abs() <= 0.015);
    }
}

#[test]
fn e2_empty_version3_container() {
    let header: [u8; 16] = [
        0x4E, 0x47, 0x53, 0x50, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00,
    ];
    let cloud = decode_spz(&gzip_wrap(&header), CoordinateSystem::Unspecified).unwrap();
    assert_eq!(cloud.num_points, 0);
    assert_eq!(cloud.sh_degree, 0);
    assert!(!cloud.antialiased);
    assert!(cloud.positions.is_empty());
}

#[test]
fn e3_rejects_version_4() {
    let mut header = [0u8; 16];
    header[0..4].copy_from_slice(&0x5053474Eu32.to_le_bytes());
    header[4..8].copy_from_slice(&4u32.to_le_bytes());
    let err = decode_spz(&gzip_wrap(&header), CoordinateSystem::Unspecified).unwrap_err();
    assert!(matches!(err, SpzError::UnsupportedVersion(4)));
}

#[test]
fn e5_rotation_layout_w_largest() {
    let inv_sqrt2 = std::f32::consts::FRAC_1_SQRT_2;
    let cloud = GaussianCloud {
        num_points: 1,
        sh_degree: 0,
        antialiased: false,
        positions: vec![0.0; 3],
        scales: vec![0.0; 3],
        rotations: vec![0.0, 0.0, inv_sqrt2, inv_sqrt2],
        alphas: vec![0.0],
        colors: vec![0.0; 3],
        sh: vec![],
    };
    let packed = pack_gaussians(&cloud).unwrap();
    assert_eq!(packed.rotations.len(), 4);
    // Top two bits of the last byte hold the largest-component index: w.
    assert_eq!(packed.rotations[3] >> 6, 3);

    let decoded = unpack_gaussians(&packed.as_view()).unwrap();
    for (a, b) in cloud.rotations.iter().zip(&decoded.rotations) {
        assert!((a - b).abs() < 1e-2, "{:?}", decoded.rotations);
    }
}

#[test]
fn property1_requantize_is_idempotent() {
    for sh_degree in 0..=3u8 {
        let cloud = make_cloud(7, sh_degree, sh_degree % 2 == 0);
        let packed = pack_gaussians(&cloud).unwrap();
        let repacked = pack_gaussians(&unpack_gaussians(&packed.as_view()).unwrap()).unwrap();
        assert_eq!(packed, repacked, "degree {}", sh_degree);
    }
}

#[test]
fn property2_bounded_round_trip_error() {
    let cloud = make_cloud(16, 3, true);
    let bytes = encode_spz(&cloud, CoordinateSystem::Unspecified).unwrap();
    let decoded = decode_spz(&bytes, CoordinateSystem::Unspecified).unwrap();

    assert_eq!(decoded.num_points, cloud.num_points);
    assert_eq!(decoded.sh_degree, cloud.sh_degree);
    assert_eq!(decoded.antialiased, cloud.antialiased);

    for (a, b) in cloud.positions.iter().zip(&decoded.positions) {
        assert!((a - b).abs() <= 1.0 / 8192.0);
    }
    for (a, b) in cloud.scales.iter().zip(&decoded.scales) {
        assert!((a - b).abs() <= 1.0 / 32.0);
    }
    for (a, b) in cloud.alphas.iter().zip(&decoded.alphas) {
        assert!((sigmoid(*a) - sigmoid(*b)).abs() <= 1.0 / 255.0);
    }
    for (a, b) in cloud.colors.iter().zip(&decoded.colors) {
        assert!((a - b).abs() <= 1.0 / (2.0 * 255.0 * 0.15) + 1e-5);
    }
    let sh_per_point = 45;
    for (j, (a, b)) in cloud.sh.iter().zip(&decoded.sh).enumerate() {
        let tol = if j % sh_per_point < 9 {
            1.0 / 32.0
        } else {
            1.0 / 16.0
        };
        assert!((a - b).abs() <= tol + 1e-5);
    }
}

#[test]
fn property4_coordinate_involution() {
    const FRAMES: [CoordinateSystem; 8] = [
        CoordinateSystem::Ldb,
        CoordinateSystem::Rdb,
        CoordinateSystem::Lub,
        CoordinateSystem::Rub,
        CoordinateSystem::Ldf,
        CoordinateSystem::Rdf,
        CoordinateSystem::Luf,
        CoordinateSystem::Ruf,
    ];
    let original = make_cloud(5, 3, false);
    for &a in &FRAMES {
        for &b in &FRAMES {
            let mut cloud = original.clone();
            cloud.convert_coordinates(a, b);
            cloud.convert_coordinates(b, a);
            assert_eq!(cloud, original, "{:?} -> {:?}", a, b);
        }
    }
}

#[test]
fn property5_double_flip_is_identity() {
    let original = make_cloud(4, 2, true);
    let mut cloud = original.clone();
    cloud.rotate_180_deg_about_x();
    cloud.rotate_180_deg_about_x();
    assert_eq!(cloud, original);
}

#[test]
fn property6_size_violations_are_rejected() {
    // Truncated container: sections shorter than the header promises.
    let packed = pack_gaussians(&make_cloud(3, 1, false)).unwrap();
    let serialized = serialize_packed_gaussians(&packed).unwrap();
    let truncated = gzip_wrap(&serialized[..serialized.len() - 2]);
    assert!(matches!(
        decode_spz(&truncated, CoordinateSystem::Unspecified),
        Err(SpzError::InvalidData(_))
    ));

    // A cloud violating its own length invariants refuses to encode.
    let mut bad = make_cloud(2, 0, false);
    bad.colors.push(0.0);
    assert!(matches!(
        encode_spz(&bad, CoordinateSystem::Unspecified),
        Err(SpzError::InvalidData(_))
    ));

    // Header point count beyond the cap.
    let mut header = [0u8; 16];
    header[0..4].copy_from_slice(&0x5053474Eu32.to_le_bytes());
    header[4..8].copy_from_slice(&3u32.to_le_bytes());
    header[8..12].copy_from_slice(&(MAX_POINTS + 1).to_le_bytes());
    assert!(matches!(
        decode_spz(&gzip_wrap(&header), CoordinateSystem::Unspecified),
        Err(SpzError::TooManyPoints(_))
    ));
}

#[test]
fn decode_rejects_non_gzip_input() {
    assert!(matches!(
        decode_spz(b"not a gzip stream at all", CoordinateSystem::Unspecified),
        Err(SpzError::DecompressionError(_))
    ));
}

/// Builds a legacy container by hand: header, then positions, alphas,
/// colors, scales, rotations in the fixed section order.
fn legacy_container(version: u32, positions: &[u8], rotations: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0x5053474Eu32.to_le_bytes());
    out.extend_from_slice(&version.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    out.push(0); // sh_degree
    out.push(12); // fractional_bits
    out.push(0); // flags
    out.push(0); // reserved
    out.extend_from_slice(positions);
    out.push(191); // alpha byte: sigma(a) = 0.749
    out.extend_from_slice(&[128, 153, 102]); // colors
    out.extend_from_slice(&[160, 144, 128]); // scales 0, -1, -2
    out.extend_from_slice(rotations);
    out
}

#[test]
fn decodes_version1_float16_positions() {
    // 1.0, -0.5, 0.25 as binary16, little-endian.
    let positions: Vec<u8> = [0x3C00u16, 0xB800, 0x3400]
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect();
    let container = legacy_container(1, &positions, &[127, 127, 255]);
    let cloud = decode_spz(&gzip_wrap(&container), CoordinateSystem::Unspecified).unwrap();
    assert_eq!(cloud.num_points, 1);
    assert_eq!(&cloud.positions, &[1.0, -0.5, 0.25]);
    assert_eq!(cloud.scales, vec![0.0, -1.0, -2.0]);
    // Rotation z byte 255 -> z = 1.0, w reconstructed near 0.
    assert!((cloud.rotations[2] - 1.0).abs() < 1e-2);
}

#[test]
fn decodes_version2_fixed_point_positions() {
    // 24-bit fixed point, 12 fractional bits: 1.5 -> 6144, -0.25 -> -1024.
    let mut positions = Vec::new();
    for v in [6144i32, -1024, 0] {
        positions.extend_from_slice(&v.to_le_bytes()[0..3]);
    }
    let container = legacy_container(2, &positions, &[255, 127, 127]);
    let cloud = decode_spz(&gzip_wrap(&container), CoordinateSystem::Unspecified).unwrap();
    assert_eq!(&cloud.positions, &[1.5, -0.25, 0.0]);
    assert!((cloud.rotations[0] - 1.0).abs() < 1e-6);
    assert!(cloud.rotations[3] >= 0.0);
}

#[test]
fn version2_rotations_get_coordinate_flips_too() {
    let mut positions = Vec::new();
    for _ in 0..3 {
        positions.extend_from_slice(&[0, 0, 0]);
    }
    let container = legacy_container(2, &positions, &[255, 127, 127]);
    let rub = decode_spz(&gzip_wrap(&container), CoordinateSystem::Rub).unwrap();
    let rdf = decode_spz(&gzip_wrap(&container), CoordinateSystem::Rdf).unwrap();
    // RUB is the stored frame; converting to RDF flips the quaternion's
    // y and z components on the legacy path exactly like on version 3.
    assert_eq!(rub.rotations[0], rdf.rotations[0]);
    assert_eq!(rub.rotations[1], -rdf.rotations[1]);
    assert_eq!(rub.rotations[2], -rdf.rotations[2]);
    assert_eq!(rub.rotations[3], rdf.rotations[3]);
}

#[test]
fn decode_honors_header_fractional_bits() {
    // Same 24-bit payload, interpreted with 8 fractional bits: the fixed
    // value 256 decodes to 1.0 instead of 1/16.
    let mut positions = Vec::new();
    for v in [256i32, -256, 512] {
        positions.extend_from_slice(&v.to_le_bytes()[0..3]);
    }
    let mut container = legacy_container(2, &positions, &[127, 127, 127]);
    container[13] = 8;
    let cloud = decode_spz(&gzip_wrap(&container), CoordinateSystem::Unspecified).unwrap();
    assert_eq!(&cloud.positions, &[1.0, -1.0, 2.0]);
}

#[test]
fn antialiased_flag_survives_the_container() {
    let cloud = make_cloud(2, 0, true);
    let bytes = encode_spz(&cloud, CoordinateSystem::Unspecified).unwrap();
    assert!(decode_spz(&bytes, CoordinateSystem::Unspecified)
        .unwrap()
        .antialiased);
}
