//! Container resolution.
//!
//! Reads and validates container headers at candidate offsets, derives
//! authoritative sizes, and resolves nested node offsets. All node offsets
//! inside a container (`data-position`) are relative to the container's own
//! start, not the outer image; [`absolute_offset`] performs the rebase.
//!
//! # Nested kernel resolution
//!
//! The kernel-bearing region is doubly indirect: the outer FIT found by the
//! signature scan wraps a small wrapper FIT that itself points at the true
//! kernel bytes. The wrapper is located by sweeping for container magic at
//! or after a configured start offset and structurally verifying each
//! candidate; the first candidate that decodes and carries an `images` node
//! with a `kernel` child wins. The two hops are modeled explicitly in
//! [`KernelResolution`] rather than hidden inside a single offset lookup.

use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fdt::{ContainerNode, FdtHeader, FdtReader, NodePropertyReader, FDT_MAGIC_BYTES};
use crate::image::FirmwareImage;
use crate::util::find_magic;

/// Rebases a node's container-relative payload position to an absolute
/// image offset.
#[inline]
pub fn absolute_offset(container_offset: u64, data_position: u64) -> u64 {
    container_offset + data_position
}

/// The fully resolved two-hop kernel location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelResolution {
    /// Offset of the outer FIT (from the signature scan)
    pub outer_offset: u64,
    /// Offset of the wrapper FIT found by the structural sweep
    pub wrapper_offset: u64,
    /// Absolute offset of the kernel payload
    pub kernel_offset: u64,
    /// Kernel payload size from the wrapper's `data-size`
    pub kernel_size: u64,
}

/// Resolves containers within a firmware image.
#[derive(Debug)]
pub struct ContainerResolver<'a> {
    image: &'a FirmwareImage,
    config: &'a Config,
}

impl<'a> ContainerResolver<'a> {
    /// Creates a resolver over an image.
    pub fn new(image: &'a FirmwareImage, config: &'a Config) -> Self {
        Self { image, config }
    }

    /// Reads and validates the container header at `offset`.
    ///
    /// Fails with `BadMagic` on a magic mismatch, and with
    /// `SizeOutOfBounds` unless the declared total size lies in
    /// `(0, max_container_size]` — a header-shaped value at a misaligned
    /// offset routinely claims a nonsensical size.
    pub fn read_header(&self, offset: u64) -> Result<FdtHeader> {
        let data = self.image.read_at(offset, FdtHeader::SIZE as u64)?;
        let header = FdtHeader::parse(data, offset)?;

        let size = header.total_size();
        if size == 0 || size > self.config.max_container_size {
            return Err(Error::SizeOutOfBounds {
                offset,
                size,
                max: self.config.max_container_size,
            });
        }
        Ok(header)
    }

    /// Returns the full container bytes at `offset`, sized by the
    /// authoritative header field (never a scanner estimate).
    pub fn container_bytes(&self, offset: u64) -> Result<&'a [u8]> {
        let header = self.read_header(offset)?;
        self.image.read_at(offset, header.total_size())
    }

    /// Resolves a node path within a container blob using the native
    /// decoder.
    pub fn resolve_node(&self, container: &[u8], path: &str) -> Result<ContainerNode> {
        let reader = FdtReader::parse(container)?;
        reader.node(path)
    }

    /// Resolves the kernel payload behind the outer FIT at `outer_offset`.
    ///
    /// Sweeps for wrapper candidates starting at the configured search
    /// offset (or the outer FIT itself, whichever is later); the first
    /// structurally valid candidate wins.
    pub fn resolve_kernel(&self, outer_offset: u64) -> Result<KernelResolution> {
        let search_start = self.config.kernel_search_start.max(outer_offset);
        let window = self.image.read_from(search_start)?;

        for pos in find_magic(window, &FDT_MAGIC_BYTES) {
            let candidate = search_start + pos as u64;
            match self.verify_wrapper(candidate) {
                Ok(node) => {
                    let data_position = node.data_position()?;
                    let kernel_size = node.data_size()?;
                    let resolution = KernelResolution {
                        outer_offset,
                        wrapper_offset: candidate,
                        kernel_offset: absolute_offset(candidate, data_position),
                        kernel_size,
                    };
                    info!(
                        wrapper = format_args!("{:#x}", candidate),
                        kernel = format_args!("{:#x}", resolution.kernel_offset),
                        size = kernel_size,
                        "kernel resolved through wrapper container"
                    );
                    return Ok(resolution);
                }
                Err(e) => {
                    debug!(
                        candidate = format_args!("{:#x}", candidate),
                        reason = %e,
                        "rejected wrapper candidate"
                    );
                }
            }
        }

        Err(Error::WrapperNotFound { search_start })
    }

    /// Structurally verifies a wrapper candidate, returning its kernel
    /// node on success.
    fn verify_wrapper(&self, offset: u64) -> Result<ContainerNode> {
        let header = self.read_header(offset)?;
        if header.total_size() > self.config.wrapper_max_size {
            return Err(Error::SizeOutOfBounds {
                offset,
                size: header.total_size(),
                max: self.config.wrapper_max_size,
            });
        }

        let bytes = self.image.read_at(offset, header.total_size())?;
        let reader = FdtReader::parse(bytes)?;

        let kernel_child = reader
            .children("images")?
            .into_iter()
            .find(|name| name == "kernel" || name.starts_with("kernel@"))
            .ok_or_else(|| Error::NodeNotFound {
                path: "images/kernel".into(),
            })?;

        reader.node(&format!("images/{kernel_child}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fdt::FdtBuilder;

    fn wrapper_blob(data_position: u32, data_size: u32) -> Vec<u8> {
        let mut builder = FdtBuilder::new();
        builder
            .begin_node("images")
            .begin_node("kernel@1")
            .prop_str("type", "kernel")
            .prop_u32("data-position", data_position)
            .prop_u32("data-size", data_size)
            .end_node()
            .end_node();
        builder.build()
    }

    fn test_config() -> Config {
        Config {
            kernel_search_start: 0x1000,
            wrapper_max_size: 4096,
            ..Config::default()
        }
    }

    #[test]
    fn test_absolute_offset_arithmetic() {
        assert_eq!(absolute_offset(1000, 16), 1016);
        assert_eq!(absolute_offset(0, 0), 0);
        assert_eq!(absolute_offset(0, u32::MAX as u64), 4294967295);
        assert_eq!(
            absolute_offset(u32::MAX as u64, u32::MAX as u64),
            8589934590
        );
    }

    #[test]
    fn test_read_header_validates_magic_and_size() {
        let blob = wrapper_blob(64, 32);
        let mut raw = vec![0u8; 0x2000];
        raw[0x100..0x100 + blob.len()].copy_from_slice(&blob);
        let image = FirmwareImage::from_bytes(&raw).unwrap();
        let config = Config::default();
        let resolver = ContainerResolver::new(&image, &config);

        let header = resolver.read_header(0x100).unwrap();
        assert_eq!(header.total_size(), blob.len() as u64);

        // Zeroed bytes at offset 0 are not a container.
        match resolver.read_header(0).unwrap_err() {
            Error::BadMagic { offset, found } => {
                assert_eq!(offset, 0);
                assert_eq!(found, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_read_header_size_cap() {
        let blob = wrapper_blob(64, 32);
        let mut raw = vec![0u8; 0x1000];
        raw[..blob.len()].copy_from_slice(&blob);
        let image = FirmwareImage::from_bytes(&raw).unwrap();
        let config = Config {
            max_container_size: 16,
            ..Config::default()
        };
        let resolver = ContainerResolver::new(&image, &config);

        match resolver.read_header(0).unwrap_err() {
            Error::SizeOutOfBounds { size, max, .. } => {
                assert_eq!(size, blob.len() as u64);
                assert_eq!(max, 16);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_resolve_node() {
        let blob = wrapper_blob(0x40, 0x20);
        let image = FirmwareImage::from_bytes(&blob).unwrap();
        let config = Config::default();
        let resolver = ContainerResolver::new(&image, &config);

        let container = resolver.container_bytes(0).unwrap();
        let node = resolver.resolve_node(container, "images/kernel").unwrap();
        assert_eq!(node.data_position().unwrap(), 0x40);
        assert_eq!(node.data_size().unwrap(), 0x20);
    }

    #[test]
    fn test_resolve_kernel_two_hop() {
        let mut raw = vec![0u8; 0x4000];

        // Decoy: bare magic with a garbage (zero-size) header at 0x1200.
        raw[0x1200..0x1204].copy_from_slice(&FDT_MAGIC_BYTES);

        // Wrapper at 0x2000 pointing 0x800 past itself.
        let wrapper = wrapper_blob(0x800, 16);
        raw[0x2000..0x2000 + wrapper.len()].copy_from_slice(&wrapper);
        raw[0x2800..0x2810].copy_from_slice(b"KERNELKERNELKERN");

        let image = FirmwareImage::from_bytes(&raw).unwrap();
        let config = test_config();
        let resolver = ContainerResolver::new(&image, &config);

        let resolution = resolver.resolve_kernel(0x1000).unwrap();
        assert_eq!(resolution.outer_offset, 0x1000);
        assert_eq!(resolution.wrapper_offset, 0x2000);
        assert_eq!(resolution.kernel_offset, 0x2800);
        assert_eq!(resolution.kernel_size, 16);
    }

    #[test]
    fn test_resolve_kernel_skips_structurally_invalid() {
        let mut raw = vec![0u8; 0x4000];

        // Valid FDT at 0x1800 but with no images/kernel node.
        let mut builder = FdtBuilder::new();
        builder.begin_node("configurations").end_node();
        let decoy = builder.build();
        raw[0x1800..0x1800 + decoy.len()].copy_from_slice(&decoy);

        let wrapper = wrapper_blob(0x100, 8);
        raw[0x3000..0x3000 + wrapper.len()].copy_from_slice(&wrapper);

        let image = FirmwareImage::from_bytes(&raw).unwrap();
        let config = test_config();
        let resolver = ContainerResolver::new(&image, &config);

        let resolution = resolver.resolve_kernel(0x1000).unwrap();
        assert_eq!(resolution.wrapper_offset, 0x3000);
        assert_eq!(resolution.kernel_offset, 0x3100);
    }

    #[test]
    fn test_wrapper_not_found() {
        let image = FirmwareImage::from_bytes(&vec![0u8; 0x3000]).unwrap();
        let config = test_config();
        let resolver = ContainerResolver::new(&image, &config);

        match resolver.resolve_kernel(0x1000).unwrap_err() {
            Error::WrapperNotFound { search_start } => assert_eq!(search_start, 0x1000),
            other => panic!("unexpected error: {other}"),
        }
    }
}
