use std::{fmt, io};

#[derive(Debug)]
pub enum SpzError {
    InvalidHeader(String),
    UnsupportedVersion(u32),
    TooManyPoints(u32),
    UnsupportedShDegree(u8),
    InvalidData(String),
    CompressionError(String),
    DecompressionError(String),
    InvalidFormat(String),
    IoError(io::Error),
}

impl fmt::Display for SpzError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpzError::InvalidHeader(e) => {
                write!(f, "Invalid SPZ header: {}", e)
            }
            SpzError::UnsupportedVersion(v) => {
                write!(f, "Unsupported SPZ version: {}", v)
            }
            SpzError::TooManyPoints(n) => {
                write!(f, "Too many points in the cloud: {}", n)
            }
            SpzError::UnsupportedShDegree(d) => {
                write!(f, "Unsupported spherical harmonics degree: {}", d)
            }
            SpzError::InvalidData(e) => {
                write!(f, "Invalid splat data: {}", e)
            }
            SpzError::CompressionError(e) => {
                write!(f, "Gzip compression failed: {}", e)
            }
            SpzError::DecompressionError(e) => {
                write!(f, "Gzip decompression failed: {}", e)
            }
            SpzError::InvalidFormat(e) => {
                write!(f, "Failed to parse the .ply buffer: {}", e)
            }
            SpzError::IoError(e) => {
                write!(f, "An I/O error occurred: {}", e)
            }
        }
    }
}

impl std::error::Error for SpzError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SpzError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SpzError {
    fn from(e: io::Error) -> Self {
        SpzError::IoError(e)
    }
}
