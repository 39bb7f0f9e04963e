use crate::common::dim_for_degree;
use crate::coord::{coordinate_converter, CoordinateConverter, CoordinateSystem};
use crate::error::SpzError;

pub const MAGIC: u32 = 0x5053474E; // 'NGSP'
/// Container version emitted by the packer.
pub const SPZ_VERSION: u32 = 3;
pub const FLAG_ANTIALIASED: u8 = 0x1;
pub const MAX_POINTS: u32 = 10_000_000;
pub const DEFAULT_FRACTIONAL_BITS: u8 = 12;

/// A decoded Gaussian splat cloud.
///
/// Rotations are laid out (x, y, z, w) per splat. SH coefficients are stored
/// coefficient-major with the color channel as the inner axis.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct GaussianCloud {
    pub num_points: u32,
    pub sh_degree: u8,
    pub antialiased: bool,
    pub positions: Vec<f32>,
    pub scales: Vec<f32>,
    pub rotations: Vec<f32>,
    pub alphas: Vec<f32>,
    pub colors: Vec<f32>,
    pub sh: Vec<f32>,
}

impl GaussianCloud {
    /// Verifies the per-array length invariants and the point/degree caps.
    pub fn check_sizes(&self) -> Result<(), SpzError> {
        if self.num_points > MAX_POINTS {
            return Err(SpzError::TooManyPoints(self.num_points));
        }
        if self.sh_degree > 3 {
            return Err(SpzError::UnsupportedShDegree(self.sh_degree));
        }
        let np = self.num_points as usize;
        let sh_dim = dim_for_degree(self.sh_degree);
        let expected = [
            ("positions", self.positions.len(), np * 3),
            ("scales", self.scales.len(), np * 3),
            ("rotations", self.rotations.len(), np * 4),
            ("alphas", self.alphas.len(), np),
            ("colors", self.colors.len(), np * 3),
            ("sh", self.sh.len(), np * sh_dim * 3),
        ];
        for (name, have, want) in expected {
            if have != want {
                return Err(SpzError::InvalidData(format!(
                    "{} length mismatch: have {}, want {}",
                    name, have, want
                )));
            }
        }
        Ok(())
    }

    /// Applies per-axis sign flips in place. Positions take `flip_p`, the
    /// quaternion vector part takes `flip_q` (w untouched), and each SH
    /// coefficient triple takes its basis-function parity.
    pub fn apply_converter(&mut self, c: &CoordinateConverter) {
        if c.is_identity() {
            return;
        }
        for p in self.positions.chunks_exact_mut(3) {
            p[0] *= c.flip_p[0];
            p[1] *= c.flip_p[1];
            p[2] *= c.flip_p[2];
        }
        for q in self.rotations.chunks_exact_mut(4) {
            q[0] *= c.flip_q[0];
            q[1] *= c.flip_q[1];
            q[2] *= c.flip_q[2];
        }
        let sh_dim = dim_for_degree(self.sh_degree);
        if sh_dim > 0 {
            for splat in self.sh.chunks_exact_mut(sh_dim * 3) {
                for (j, triple) in splat.chunks_exact_mut(3).enumerate() {
                    let s = c.flip_sh[j];
                    triple[0] *= s;
                    triple[1] *= s;
                    triple[2] *= s;
                }
            }
        }
    }

    /// Re-expresses the cloud in a different coordinate frame.
    pub fn convert_coordinates(&mut self, from: CoordinateSystem, to: CoordinateSystem) {
        self.apply_converter(&coordinate_converter(from, to));
    }

    /// Rotates the cloud 180° about the X axis; equivalent to converting
    /// between RUB and RDF.
    pub fn rotate_180_deg_about_x(&mut self) {
        self.convert_coordinates(CoordinateSystem::Rub, CoordinateSystem::Rdf);
    }

    /// Volume of the median-sized splat: (4π/3)·exp(s0+s1+s2) of the middle
    /// element of the ascending per-splat log-volume sort. 0.01 for an empty
    /// cloud.
    pub fn median_volume(&self) -> f32 {
        if self.num_points == 0 {
            return 0.01;
        }
        let mut log_volumes: Vec<f32> = self
            .scales
            .chunks_exact(3)
            .map(|s| s[0] + s[1] + s[2])
            .collect();
        log_volumes.sort_by(f32::total_cmp);
        let median = log_volumes[log_volumes.len() / 2];
        (4.0 / 3.0) * std::f32::consts::PI * median.exp()
    }
}

/// Byte-level form of a cloud, mirroring the on-disk section layout.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PackedGaussians {
    pub num_points: u32,
    pub sh_degree: u8,
    pub fractional_bits: u8,
    pub antialiased: bool,
    pub uses_float16: bool,
    pub uses_smallest_three: bool,
    pub positions: Vec<u8>,
    pub scales: Vec<u8>,
    pub rotations: Vec<u8>,
    pub alphas: Vec<u8>,
    pub colors: Vec<u8>,
    pub sh: Vec<u8>,
}

impl PackedGaussians {
    pub fn as_view(&self) -> PackedGaussiansView<'_> {
        PackedGaussiansView {
            num_points: self.num_points,
            sh_degree: self.sh_degree,
            fractional_bits: self.fractional_bits,
            antialiased: self.antialiased,
            uses_float16: self.uses_float16,
            uses_smallest_three: self.uses_smallest_three,
            positions: &self.positions,
            scales: &self.scales,
            rotations: &self.rotations,
            alphas: &self.alphas,
            colors: &self.colors,
            sh: &self.sh,
        }
    }

    pub fn check_sizes(&self) -> Result<(), SpzError> {
        self.as_view().check_sizes()
    }
}

/// Borrowed counterpart of [`PackedGaussians`], sliced out of a deserialized
/// buffer without copying.
#[derive(Debug, Clone)]
pub struct PackedGaussiansView<'a> {
    pub num_points: u32,
    pub sh_degree: u8,
    pub fractional_bits: u8,
    pub antialiased: bool,
    pub uses_float16: bool,
    pub uses_smallest_three: bool,
    pub positions: &'a [u8],
    pub scales: &'a [u8],
    pub rotations: &'a [u8],
    pub alphas: &'a [u8],
    pub colors: &'a [u8],
    pub sh: &'a [u8],
}

impl PackedGaussiansView<'_> {
    pub(crate) fn position_bytes_per_component(&self) -> usize {
        if self.uses_float16 {
            2
        } else {
            3
        }
    }

    pub(crate) fn rotation_bytes_per_splat(&self) -> usize {
        if self.uses_smallest_three {
            4
        } else {
            3
        }
    }

    pub fn check_sizes(&self) -> Result<(), SpzError> {
        if self.num_points > MAX_POINTS {
            return Err(SpzError::TooManyPoints(self.num_points));
        }
        if self.sh_degree > 3 {
            return Err(SpzError::UnsupportedShDegree(self.sh_degree));
        }
        if self.uses_float16 && self.uses_smallest_three {
            return Err(SpzError::InvalidData(
                "float16 positions and smallest-three rotations are mutually exclusive"
                    .to_string(),
            ));
        }
        let np = self.num_points as usize;
        let sh_dim = dim_for_degree(self.sh_degree);
        let expected = [
            (
                "positions",
                self.positions.len(),
                np * 3 * self.position_bytes_per_component(),
            ),
            ("scales", self.scales.len(), np * 3),
            (
                "rotations",
                self.rotations.len(),
                np * self.rotation_bytes_per_splat(),
            ),
            ("alphas", self.alphas.len(), np),
            ("colors", self.colors.len(), np * 3),
            ("sh", self.sh.len(), np * sh_dim * 3),
        ];
        for (name, have, want) in expected {
            if have != want {
                return Err(SpzError::InvalidData(format!(
                    "packed {} length mismatch: have {}, want {}",
                    name, have, want
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_splat_cloud(sh_degree: u8) -> GaussianCloud {
        let sh_dim = dim_for_degree(sh_degree);
        GaussianCloud {
            num_points: 1,
            sh_degree,
            antialiased: false,
            positions: vec![1.0, 2.0, 3.0],
            scales: vec![-1.0, -2.0, -3.0],
            rotations: vec![0.1, 0.2, 0.3, 0.9],
            alphas: vec![0.5],
            colors: vec![0.1, 0.2, 0.3],
            sh: (0..sh_dim * 3).map(|i| i as f32 * 0.01).collect(),
        }
    }

    #[test]
    fn check_sizes_accepts_valid_cloud() {
        for deg in 0..=3 {
            assert!(single_splat_cloud(deg).check_sizes().is_ok());
        }
    }

    #[test]
    fn check_sizes_rejects_bad_lengths() {
        let mut cloud = single_splat_cloud(1);
        cloud.positions.pop();
        assert!(matches!(
            cloud.check_sizes(),
            Err(SpzError::InvalidData(_))
        ));

        let mut cloud = single_splat_cloud(0);
        cloud.sh_degree = 4;
        assert!(matches!(
            cloud.check_sizes(),
            Err(SpzError::UnsupportedShDegree(4))
        ));
    }

    #[test]
    fn rotate_180_twice_is_identity() {
        let original = single_splat_cloud(3);
        let mut cloud = original.clone();
        cloud.rotate_180_deg_about_x();
        assert_ne!(cloud, original);
        cloud.rotate_180_deg_about_x();
        assert_eq!(cloud, original);
    }

    #[test]
    fn rotate_180_matches_hand_flip() {
        let mut cloud = single_splat_cloud(3);
        let original = cloud.clone();
        cloud.rotate_180_deg_about_x();

        // Positions: y and z negate.
        assert_eq!(cloud.positions[0], original.positions[0]);
        assert_eq!(cloud.positions[1], -original.positions[1]);
        assert_eq!(cloud.positions[2], -original.positions[2]);
        // Quaternion: y and z components negate, x and w survive.
        assert_eq!(cloud.rotations[0], original.rotations[0]);
        assert_eq!(cloud.rotations[1], -original.rotations[1]);
        assert_eq!(cloud.rotations[2], -original.rotations[2]);
        assert_eq!(cloud.rotations[3], original.rotations[3]);
        // SH triples at these coefficient indices change sign.
        let flipped = [0usize, 1, 3, 6, 8, 10, 11, 13];
        for j in 0..15 {
            let sign = if flipped.contains(&j) { -1.0 } else { 1.0 };
            for ch in 0..3 {
                assert_eq!(cloud.sh[j * 3 + ch], sign * original.sh[j * 3 + ch]);
            }
        }
    }

    #[test]
    fn conversion_preserves_sizes() {
        let mut cloud = single_splat_cloud(2);
        cloud.convert_coordinates(CoordinateSystem::Ruf, CoordinateSystem::Ldb);
        assert!(cloud.check_sizes().is_ok());
    }

    #[test]
    fn median_volume_empty_cloud() {
        assert_eq!(GaussianCloud::default().median_volume(), 0.01);
    }

    #[test]
    fn median_volume_picks_middle_element() {
        let mut cloud = GaussianCloud {
            num_points: 3,
            positions: vec![0.0; 9],
            scales: vec![
                0.0, 0.0, 0.0, // log volume 0
                -1.0, -1.0, -1.0, // log volume -3
                1.0, 1.0, 1.0, // log volume 3
            ],
            rotations: vec![0.0; 12],
            alphas: vec![0.0; 3],
            colors: vec![0.0; 9],
            ..Default::default()
        };
        let expected = (4.0 / 3.0) * std::f32::consts::PI;
        assert!((cloud.median_volume() - expected).abs() < 1e-6);

        // Even count: element at index N/2 (upper median).
        cloud.num_points = 4;
        cloud.positions = vec![0.0; 12];
        cloud.scales.extend_from_slice(&[2.0, 0.0, 0.0]);
        cloud.rotations = vec![0.0; 16];
        cloud.alphas = vec![0.0; 4];
        cloud.colors = vec![0.0; 12];
        let expected = (4.0 / 3.0) * std::f32::consts::PI * 2.0f32.exp();
        assert!((cloud.median_volume() - expected).abs() < 1e-5);
    }

    #[test]
    fn packed_view_checks_section_lengths() {
        let packed = PackedGaussians {
            num_points: 2,
            sh_degree: 0,
            fractional_bits: 12,
            uses_smallest_three: true,
            positions: vec![0; 18],
            scales: vec![0; 6],
            rotations: vec![0; 8],
            alphas: vec![0; 2],
            colors: vec![0; 6],
            ..Default::default()
        };
        assert!(packed.check_sizes().is_ok());

        let mut bad = packed.clone();
        bad.rotations.truncate(6);
        assert!(matches!(bad.check_sizes(), Err(SpzError::InvalidData(_))));

        let mut bad = packed;
        bad.uses_float16 = true;
        assert!(matches!(bad.check_sizes(), Err(SpzError::InvalidData(_))));
    }
}
