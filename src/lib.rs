//! fitex - firmware FIT/FDT container resolution and extraction.
//!
//! This library locates, validates, and extracts the nested binary
//! components embedded in a monolithic firmware image built on the FDT/FIT
//! container format: bootloader, OP-TEE, kernel, device tree, ramdisk and
//! root filesystem regions.
//!
//! # Features
//!
//! - Memory-mapped, read-only image access shared by all stages
//! - Signature-scan discovery behind a pluggable scanner interface
//! - Semantic offset registry with first-class A/B slot redundancy
//! - Native structured parser over the FDT token stream (no external
//!   decompiler required)
//! - Two-hop nested kernel resolution (outer FIT → wrapper FIT → payload)
//! - Bounds-checked extraction with transparent gzip decompression
//! - Parallel per-role extraction on a rayon worker pool
//!
//! # Example
//!
//! ```no_run
//! use fitex::{extract_firmware, BinwalkScanner, Config};
//!
//! fn main() -> fitex::Result<()> {
//!     let report = extract_firmware(
//!         "firmware.img",
//!         "extracted",
//!         &Config::default(),
//!         &BinwalkScanner::default(),
//!     )?;
//!     print!("{}", report.render());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod extractor;
pub mod fdt;
pub mod image;
pub mod pipeline;
pub mod registry;
pub mod resolver;
pub mod scanner;
pub mod util;

// Re-export main types
pub use config::Config;
pub use error::{Error, Result};
pub use extractor::{ComponentExtractor, ExtractedComponent};
pub use fdt::{ContainerNode, FdtBuilder, FdtHeader, FdtReader, NodePropertyReader};
pub use image::FirmwareImage;
pub use pipeline::{ExtractionReport, RoleOutcome, RoleStatus};
pub use registry::{OffsetEntry, OffsetRegistry, SemanticRole};
pub use resolver::{absolute_offset, ContainerResolver, KernelResolution};
pub use scanner::{BinwalkScanner, SignatureHit, SignatureKind, SignatureScanner};

use std::path::Path;

/// Runs the whole pipeline: scan, classify, resolve, extract.
///
/// # Arguments
///
/// * `image_path` - The firmware image to extract from
/// * `out_dir` - Directory receiving one artifact per extracted role slot
/// * `config` - Size ceilings and classification thresholds
/// * `scanner` - The signature scanner implementation to discover with
///
/// # Returns
///
/// The per-role status report. Only fatal errors (an unusable scanner
/// tool) propagate; per-role failures are folded into the report.
pub fn extract_firmware<P: AsRef<Path>, Q: AsRef<Path>>(
    image_path: P,
    out_dir: Q,
    config: &Config,
    scanner: &dyn SignatureScanner,
) -> Result<ExtractionReport> {
    let image = FirmwareImage::open(image_path.as_ref())?;
    let hits = scanner.scan(image_path.as_ref())?;
    let registry = OffsetRegistry::build(&hits, config);
    pipeline::run(&image, &registry, config, out_dir.as_ref(), || {})
}
