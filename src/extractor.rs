//! Component extraction.
//!
//! Copies validated byte ranges out of the image into standalone
//! artifacts, with optional transparent gzip decompression. Extraction is
//! idempotent and overwrite-safe: re-running produces byte-identical
//! artifacts, and nothing is written on a failed extraction — there are no
//! partial output files.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::image::FirmwareImage;

/// Magic bytes opening a gzip stream.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Returns true if the data opens with the gzip magic.
#[inline]
pub fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[..2] == GZIP_MAGIC
}

/// An extracted component, immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedComponent {
    /// Artifact name (role stem plus slot suffix)
    pub name: String,
    /// Absolute offset the bytes were read from
    pub absolute_offset: u64,
    /// Size of the extracted bytes
    pub size: u64,
    /// The extracted (possibly decompressed) bytes
    pub bytes: Vec<u8>,
    /// True if a gzip stream was transparently decompressed
    pub decompressed: bool,
}

/// Extracts components from a shared read-only image.
#[derive(Debug)]
pub struct ComponentExtractor<'a> {
    image: &'a FirmwareImage,
    config: &'a Config,
}

impl<'a> ComponentExtractor<'a> {
    /// Creates an extractor over an image.
    pub fn new(image: &'a FirmwareImage, config: &'a Config) -> Self {
        Self { image, config }
    }

    /// Copies exactly `size` bytes from `absolute_offset`.
    ///
    /// Fails with `SizeOutOfBounds` before any allocation if `size` is
    /// zero or exceeds the configured ceiling, and with `TruncatedRead`
    /// if fewer bytes remain than requested.
    pub fn extract(
        &self,
        name: impl Into<String>,
        absolute_offset: u64,
        size: u64,
    ) -> Result<ExtractedComponent> {
        self.check_size(absolute_offset, size)?;
        let bytes = self.image.read_at(absolute_offset, size)?.to_vec();
        debug!(offset = format_args!("{absolute_offset:#x}"), size, "extracted byte range");
        Ok(ExtractedComponent {
            name: name.into(),
            absolute_offset,
            size,
            bytes,
            decompressed: false,
        })
    }

    /// Reads up to `max_scan_size` bytes from `absolute_offset` and gzip
    /// decompresses them.
    ///
    /// The true compressed-stream length is unknown a priori, so the read
    /// window is everything up to the scan ceiling (or the end of the
    /// image). A malformed stream fails with `DecompressionError`; the
    /// decompressed output is still bounded by `max_container_size`.
    pub fn extract_and_decompress(
        &self,
        name: impl Into<String>,
        absolute_offset: u64,
    ) -> Result<ExtractedComponent> {
        if absolute_offset >= self.image.len() {
            return Err(Error::TruncatedRead {
                offset: absolute_offset,
                requested: 1,
                available: 0,
            });
        }
        let available = self.image.len() - absolute_offset;
        let window = available.min(self.config.max_scan_size);
        let raw = self.image.read_at(absolute_offset, window)?;

        let bytes = self.gunzip(raw, absolute_offset)?;
        Ok(ExtractedComponent {
            name: name.into(),
            absolute_offset,
            size: bytes.len() as u64,
            bytes,
            decompressed: true,
        })
    }

    /// Decompresses a gzip stream already in memory.
    ///
    /// `offset` is only used for error reporting.
    pub fn gunzip(&self, data: &[u8], offset: u64) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .by_ref()
            .take(self.config.max_container_size + 1)
            .read_to_end(&mut out)
            .map_err(|e| Error::Decompression { offset, source: e })?;

        if out.len() as u64 > self.config.max_container_size {
            return Err(Error::SizeOutOfBounds {
                offset,
                size: out.len() as u64,
                max: self.config.max_container_size,
            });
        }
        Ok(out)
    }

    /// Writes a component to `dir`, overwriting any previous artifact.
    pub fn write_component(
        &self,
        dir: &Path,
        component: &ExtractedComponent,
    ) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(&component.name);
        fs::write(&path, &component.bytes).map_err(|e| Error::FileWrite {
            path: path.clone(),
            source: e,
        })?;
        info!(
            artifact = %path.display(),
            size = component.size,
            decompressed = component.decompressed,
            "wrote component"
        );
        Ok(path)
    }

    fn check_size(&self, offset: u64, size: u64) -> Result<()> {
        if size == 0 || size > self.config.max_container_size {
            return Err(Error::SizeOutOfBounds {
                offset,
                size,
                max: self.config.max_container_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_extract_exact() {
        let mut raw = vec![0u8; 256];
        raw[64..96].fill(0xab);
        let image = FirmwareImage::from_bytes(&raw).unwrap();
        let config = Config::default();
        let extractor = ComponentExtractor::new(&image, &config);

        let component = extractor.extract("kernel_fit.bin", 64, 32).unwrap();
        assert_eq!(component.size, 32);
        assert_eq!(component.bytes, vec![0xab; 32]);
        assert!(!component.decompressed);
    }

    #[test]
    fn test_extract_idempotent() {
        let image = FirmwareImage::from_bytes(&[7u8; 128]).unwrap();
        let config = Config::default();
        let extractor = ComponentExtractor::new(&image, &config);

        let first = extractor.extract("x.bin", 8, 16).unwrap();
        let second = extractor.extract("x.bin", 8, 16).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_size_cap_rejected_without_output() {
        let image = FirmwareImage::from_bytes(&[0u8; 64]).unwrap();
        let config = Config::default();
        let extractor = ComponentExtractor::new(&image, &config);

        // 100 MiB request against the 50 MiB default ceiling.
        let err = extractor
            .extract("too_big.bin", 0, 100 * 1024 * 1024)
            .unwrap_err();
        match err {
            Error::SizeOutOfBounds { size, max, .. } => {
                assert_eq!(size, 100 * 1024 * 1024);
                assert_eq!(max, 50 * 1024 * 1024);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_truncated_read() {
        let image = FirmwareImage::from_bytes(&[0u8; 100]).unwrap();
        let config = Config::default();
        let extractor = ComponentExtractor::new(&image, &config);

        match extractor.extract("x.bin", 90, 32).unwrap_err() {
            Error::TruncatedRead { available, .. } => assert_eq!(available, 10),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_gzip_roundtrip() {
        let plaintext = b"cpio archive payload: the quick brown fox".to_vec();
        let compressed = gzip(&plaintext);

        let mut raw = vec![0u8; 4096];
        raw[0x200..0x200 + compressed.len()].copy_from_slice(&compressed);
        let image = FirmwareImage::from_bytes(&raw).unwrap();
        let config = Config::default();
        let extractor = ComponentExtractor::new(&image, &config);

        let component = extractor
            .extract_and_decompress("rootfs_cpio.bin", 0x200)
            .unwrap();
        assert!(component.decompressed);
        assert_eq!(component.bytes, plaintext);
    }

    #[test]
    fn test_malformed_gzip() {
        let mut raw = vec![0u8; 256];
        raw[0] = 0x1f;
        raw[1] = 0x8b;
        // Header magic followed by garbage.
        let image = FirmwareImage::from_bytes(&raw).unwrap();
        let config = Config::default();
        let extractor = ComponentExtractor::new(&image, &config);

        match extractor.extract_and_decompress("x.bin", 0).unwrap_err() {
            Error::Decompression { offset, .. } => assert_eq!(offset, 0),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_is_gzip() {
        assert!(is_gzip(&[0x1f, 0x8b, 0x08]));
        assert!(!is_gzip(&[0x1f]));
        assert!(!is_gzip(b"ELF"));
    }

    #[test]
    fn test_write_component_overwrites() {
        let dir = std::env::temp_dir().join(format!("fitex-test-{}", std::process::id()));
        let image = FirmwareImage::from_bytes(&[3u8; 64]).unwrap();
        let config = Config::default();
        let extractor = ComponentExtractor::new(&image, &config);

        let component = extractor.extract("blob.bin", 0, 16).unwrap();
        let path = extractor.write_component(&dir, &component).unwrap();
        let again = extractor.write_component(&dir, &component).unwrap();
        assert_eq!(path, again);
        assert_eq!(fs::read(&path).unwrap(), vec![3u8; 16]);

        fs::remove_dir_all(&dir).unwrap();
    }
}
