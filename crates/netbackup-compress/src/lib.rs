// SPDX-License-Identifier: MIT OR Apache-2.0
//! Decompression for file-set payloads fetched from devices.
//!
//! A [`FileEntry`](netbackup_model::FileEntry) may carry a `gzip`
//! decompression hint; this crate applies it to the raw bytes an
//! executor session fetched before they are handed to scrubbers.

use std::io::Read;

use flate2::read::GzDecoder;

/// Errors decompressing a fetched file.
#[derive(Debug, thiserror::Error)]
pub enum CompressError {
    /// The gzip stream was truncated or malformed.
    #[error("gzip decompression failed: {0}")]
    Gzip(#[source] std::io::Error),
}

/// Decompress a gzip-encoded byte buffer.
pub fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>, CompressError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(CompressError::Gzip)?;
    Ok(out)
}

/// Running totals of bytes decompressed, kept for telemetry.
#[derive(Clone, Debug, Default)]
pub struct CompressionStats {
    /// Total compressed bytes received over the wire.
    pub total_compressed: u64,
    /// Total bytes after decompression.
    pub total_decompressed: u64,
}

impl CompressionStats {
    /// Create a new, zeroed stats tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one decompression operation.
    pub fn record(&mut self, compressed: usize, decompressed: usize) {
        self.total_compressed += compressed as u64;
        self.total_decompressed += decompressed as u64;
    }

    /// Ratio of compressed to decompressed bytes seen so far.
    pub fn compression_ratio(&self) -> f64 {
        if self.total_decompressed == 0 {
            return 0.0;
        }
        self.total_compressed as f64 / self.total_decompressed as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn round_trips_through_gzip() {
        let original = b"interface GigabitEthernet0/1\n shutdown\n";
        let compressed = gzip(original);
        let decompressed = decompress_gzip(&compressed).unwrap();
        assert_eq!(decompressed, original);
    }

    #[test]
    fn rejects_truncated_stream() {
        let compressed = gzip(b"some config contents");
        let truncated = &compressed[..compressed.len() - 4];
        assert!(decompress_gzip(truncated).is_err());
    }

    #[test]
    fn stats_track_ratio() {
        let mut stats = CompressionStats::new();
        stats.record(40, 100);
        assert_eq!(stats.total_compressed, 40);
        assert_eq!(stats.total_decompressed, 100);
        assert!((stats.compression_ratio() - 0.4).abs() < f64::EPSILON);
    }
}
