//! Shared fixtures for integration tests: synthetic firmware images with
//! embedded FIT containers.

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;

use fitex::FdtBuilder;

/// Builds a wrapper FIT whose `images/kernel@1` node points at
/// `data_position`/`data_size` relative to the container start.
pub fn wrapper_fit(data_position: u32, data_size: u32) -> Vec<u8> {
    let mut builder = FdtBuilder::new();
    builder
        .prop_str("description", "kernel wrapper")
        .begin_node("images")
        .begin_node("kernel@1")
        .prop_str("type", "kernel")
        .prop_u32("data-position", data_position)
        .prop_u32("data-size", data_size)
        .end_node()
        .end_node();
    builder.build()
}

/// Builds a bootloader-style FIT carrying `uboot` and `tee` image nodes.
pub fn bootloader_fit(
    uboot_position: u32,
    uboot_size: u32,
    tee_position: u32,
    tee_size: u32,
) -> Vec<u8> {
    let mut builder = FdtBuilder::new();
    builder
        .prop_str("description", "bootloader")
        .begin_node("images")
        .begin_node("uboot")
        .prop_str("type", "firmware")
        .prop_u32("data-position", uboot_position)
        .prop_u32("data-size", uboot_size)
        .end_node()
        .begin_node("tee")
        .prop_str("type", "tee")
        .prop_u32("data-position", tee_position)
        .prop_u32("data-size", tee_size)
        .end_node()
        .end_node();
    builder.build()
}

/// Overrides the header's declared total size, padding an oversized claim
/// is the caller's responsibility.
pub fn patch_total_size(blob: &mut [u8], total_size: u32) {
    blob[4..8].copy_from_slice(&total_size.to_be_bytes());
}

/// Gzip compresses `data` at the default level.
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// A flat byte canvas for laying out synthetic firmware images.
pub struct ImageBuilder {
    bytes: Vec<u8>,
}

impl ImageBuilder {
    pub fn new(len: usize) -> Self {
        Self {
            bytes: vec![0u8; len],
        }
    }

    /// Copies `blob` into the image at `offset`.
    pub fn place(mut self, offset: usize, blob: &[u8]) -> Self {
        self.bytes[offset..offset + blob.len()].copy_from_slice(blob);
        self
    }

    /// Fills `len` bytes at `offset` with `value`.
    pub fn fill(mut self, offset: usize, len: usize, value: u8) -> Self {
        self.bytes[offset..offset + len].fill(value);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

/// A unique scratch directory under the system temp dir.
pub fn scratch_dir(tag: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("fitex-it-{tag}-{}", std::process::id()))
}
