//! Gzip framing for the container: a fixed 10-byte header, a raw deflate
//! body, and the CRC32 + ISIZE trailer. The header is written by hand so
//! MTIME, XFL and OS are pinned to zero regardless of the deflate backend.

use crate::error::SpzError;
use flate2::read::GzDecoder;
use flate2::write::DeflateEncoder;
use flate2::{Compression, Crc};
use std::io::{Read, Write};

/// CM=8 (deflate), no flags, MTIME=0, XFL=0, OS=0.
const GZIP_HEADER: [u8; 10] = [0x1F, 0x8B, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

#[inline(never)]
pub(crate) fn gzip_compress(data: &[u8]) -> Result<Vec<u8>, SpzError> {
    let mut out = Vec::with_capacity(GZIP_HEADER.len() + data.len() / 2 + 8);
    out.extend_from_slice(&GZIP_HEADER);

    let mut encoder = DeflateEncoder::new(&mut out, Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| SpzError::CompressionError(format!("writing deflate body failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| SpzError::CompressionError(format!("finalizing deflate failed: {}", e)))?;

    let mut crc = Crc::new();
    crc.update(data);
    out.extend_from_slice(&crc.sum().to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    Ok(out)
}

/// Inflates any valid gzip stream, including ones with FNAME/FEXTRA/FCOMMENT
/// fields from other writers. The decoder validates the CRC32 trailer.
#[inline(never)]
pub(crate) fn gzip_decompress(data: &[u8]) -> Result<Vec<u8>, SpzError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| SpzError::DecompressionError(format!("inflate failed: {}", e)))?;
    Ok(out)
}

cfg_if::cfg_if! {
if #[cfg(feature = "async")] {
    use async_compression::tokio::bufread::GzipDecoder;
    use async_compression::tokio::write::DeflateEncoder as AsyncDeflateEncoder;
    use std::io::Cursor;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};

    #[inline(never)]
    pub(crate) async fn gzip_compress_async(data: &[u8]) -> Result<Vec<u8>, SpzError> {
        let mut out = Vec::with_capacity(GZIP_HEADER.len() + data.len() / 2 + 8);
        out.extend_from_slice(&GZIP_HEADER);

        let mut encoder = AsyncDeflateEncoder::new(&mut out);
        encoder.write_all(data)
            .await
            .map_err(|e| SpzError::CompressionError(e.to_string()))?;
        encoder.shutdown()
            .await
            .map_err(|e| SpzError::CompressionError(e.to_string()))?;

        let mut crc = Crc::new();
        crc.update(data);
        out.extend_from_slice(&crc.sum().to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        Ok(out)
    }

    #[inline(never)]
    pub(crate) async fn gzip_decompress_async(data: &[u8]) -> Result<Vec<u8>, SpzError> {
        let reader = BufReader::new(Cursor::new(data));
        let mut decoder = GzipDecoder::new(reader);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)
            .await
            .map_err(|e| SpzError::DecompressionError(e.to_string()))?;
        Ok(out)
    }
}
}
