//! Per-chunk transforms
//!
//! Each chunk becomes one complete gzip member, so any chunk can be inflated
//! without the others (and a concatenation of members is itself a valid
//! multi-member gzip stream).

use std::io::{Read, Write};

use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Pure block → block function, shared by every worker thread.
///
/// Errors are plain messages; the pipeline attaches the chunk index.
pub trait Transform: Send + Sync {
    fn transform(&self, block: Vec<u8>) -> Result<Vec<u8>, String>;
}

/// Wrap a block as one self-contained gzip member
#[derive(Debug, Clone, Copy)]
pub struct GzipCompress {
    level: u32,
}

impl GzipCompress {
    pub fn new(level: u32) -> Self {
        Self { level }
    }
}

impl Default for GzipCompress {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_COMPRESSION_LEVEL)
    }
}

impl Transform for GzipCompress {
    fn transform(&self, block: Vec<u8>) -> Result<Vec<u8>, String> {
        let mut encoder = GzEncoder::new(
            Vec::with_capacity(block.len() / 2 + 64),
            Compression::new(self.level),
        );
        encoder.write_all(&block).map_err(|e| e.to_string())?;
        encoder.finish().map_err(|e| e.to_string())
    }
}

/// Inflate exactly one gzip member.
///
/// Trailing bytes after the member are rejected; a chunk must be a single
/// unit.
#[derive(Debug, Default, Clone, Copy)]
pub struct GzipDecompress;

impl Transform for GzipDecompress {
    fn transform(&self, block: Vec<u8>) -> Result<Vec<u8>, String> {
        // Typical ratios land well under 4x; larger output just grows
        let mut out = Vec::with_capacity(block.len().saturating_mul(4));

        let mut decoder = GzDecoder::new(block.as_slice());
        decoder
            .read_to_end(&mut out)
            .map_err(|e| format!("invalid gzip member: {}", e))?;

        if decoder.header().is_none() {
            return Err("invalid gzip member: missing header".to_string());
        }

        let rest = decoder.into_inner();
        if !rest.is_empty() {
            return Err(format!(
                "invalid gzip member: {} trailing bytes after member",
                rest.len()
            ));
        }

        Ok(out)
    }
}
