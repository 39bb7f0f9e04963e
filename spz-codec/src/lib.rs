//! Codec for the SPZ container: a gzip-framed, quantized representation of
//! 3D Gaussian splat clouds, roughly 10x smaller than the PLY files emitted
//! by training pipelines.
//!
//! The container stores clouds in the RUB frame; PLY files use RDF. Every
//! entry point takes a [`CoordinateSystem`] naming the caller's frame, with
//! [`CoordinateSystem::Unspecified`] meaning "no conversion".

mod common;
mod container;
pub mod coord;
pub mod error;
mod gzip;
mod pack;
mod ply;
mod structures;

pub use container::{deserialize_packed_gaussians, serialize_packed_gaussians};
pub use coord::{coordinate_converter, CoordinateConverter, CoordinateSystem};
pub use error::SpzError;
pub use pack::{pack_gaussians, unpack_gaussians};
pub use structures::{
    GaussianCloud, PackedGaussians, PackedGaussiansView, DEFAULT_FRACTIONAL_BITS,
    FLAG_ANTIALIASED, MAGIC, MAX_POINTS, SPZ_VERSION,
};

use coord::coordinate_converter as converter;

fn in_frame(
    cloud: &GaussianCloud,
    from: CoordinateSystem,
    to: CoordinateSystem,
    f: impl FnOnce(&GaussianCloud) -> Result<Vec<u8>, SpzError>,
) -> Result<Vec<u8>, SpzError> {
    let c = converter(from, to);
    if c.is_identity() {
        f(cloud)
    } else {
        let mut converted = cloud.clone();
        converted.apply_converter(&c);
        f(&converted)
    }
}

/// Encodes a cloud into a gzip-framed SPZ buffer (container version 3).
/// `source` names the cloud's coordinate frame; data is converted to RUB
/// before quantization.
pub fn encode_spz(
    cloud: &GaussianCloud,
    source: CoordinateSystem,
) -> Result<Vec<u8>, SpzError> {
    in_frame(cloud, source, CoordinateSystem::Rub, |c| {
        let packed = pack_gaussians(c)?;
        let serialized = serialize_packed_gaussians(&packed)?;
        gzip::gzip_compress(&serialized)
    })
}

/// Decodes a gzip-framed SPZ buffer. The result is converted from RUB to
/// `target` unless `target` is `Unspecified`.
pub fn decode_spz(data: &[u8], target: CoordinateSystem) -> Result<GaussianCloud, SpzError> {
    let raw = gzip::gzip_decompress(data)?;
    let packed = deserialize_packed_gaussians(&raw)?;
    let mut cloud = unpack_gaussians(&packed)?;
    cloud.apply_converter(&converter(CoordinateSystem::Rub, target));
    Ok(cloud)
}

/// Encodes a cloud as a `binary_little_endian 1.0` PLY buffer. `source`
/// names the cloud's frame; PLY files are written in RDF.
pub fn encode_ply(
    cloud: &GaussianCloud,
    source: CoordinateSystem,
) -> Result<Vec<u8>, SpzError> {
    in_frame(cloud, source, CoordinateSystem::Rdf, ply::write_ply)
}

/// Parses a `binary_little_endian 1.0` PLY buffer, converting from RDF to
/// `target` unless `target` is `Unspecified`.
pub fn decode_ply(data: &[u8], target: CoordinateSystem) -> Result<GaussianCloud, SpzError> {
    let mut cloud = ply::parse_ply(data)?;
    cloud.apply_converter(&converter(CoordinateSystem::Rdf, target));
    Ok(cloud)
}

cfg_if::cfg_if! {
if #[cfg(feature = "async")] {
    /// Async twin of [`encode_spz`]; quantization stays synchronous and only
    /// the gzip framing is driven by async I/O. Output bytes are identical.
    pub async fn encode_spz_async(
        cloud: &GaussianCloud,
        source: CoordinateSystem,
    ) -> Result<Vec<u8>, SpzError> {
        let c = converter(source, CoordinateSystem::Rub);
        let packed = if c.is_identity() {
            pack_gaussians(cloud)?
        } else {
            let mut converted = cloud.clone();
            converted.apply_converter(&c);
            pack_gaussians(&converted)?
        };
        let serialized = serialize_packed_gaussians(&packed)?;
        gzip::gzip_compress_async(&serialized).await
    }

    /// Async twin of [`decode_spz`].
    pub async fn decode_spz_async(
        data: &[u8],
        target: CoordinateSystem,
    ) -> Result<GaussianCloud, SpzError> {
        let raw = gzip::gzip_decompress_async(data).await?;
        let packed = deserialize_packed_gaussians(&raw)?;
        let mut cloud = unpack_gaussians(&packed)?;
        cloud.apply_converter(&converter(CoordinateSystem::Rub, target));
        Ok(cloud)
    }
}
}
