//! End-to-end extraction pipeline.
//!
//! Drives registry roles through resolution and extraction. Per-role
//! failures never cross role boundaries: each is logged, the artifact is
//! skipped, and the run continues. Extractions are mutually independent
//! (shared read-only image, per-role output files), so they fan out on the
//! rayon worker pool.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::extractor::{is_gzip, ComponentExtractor, ExtractedComponent};
use crate::image::FirmwareImage;
use crate::registry::{OffsetEntry, OffsetRegistry, SemanticRole};
use crate::resolver::{absolute_offset, ContainerResolver};

// =============================================================================
// Status Reporting
// =============================================================================

/// What happened to one role slot during the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleOutcome {
    /// Discovered, but extraction was not attempted (no resolvable size)
    Found,
    /// Extracted and written cleanly
    Extracted {
        /// Artifact size in bytes
        size: u64,
        /// Path of the written artifact
        path: PathBuf,
    },
    /// Extraction was attempted and failed; the error kind is recorded
    Failed {
        /// Error kind, as reported by `Error::kind_str`
        kind: &'static str,
    },
}

/// Per-role, per-slot status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleStatus {
    /// The role this status describes
    pub role: SemanticRole,
    /// Slot index within the role (0 = primary)
    pub slot: usize,
    /// Offset the slot was discovered at
    pub offset: u64,
    /// Outcome of the run for this slot
    pub outcome: RoleOutcome,
}

impl RoleStatus {
    /// Status column text: `found`, `extracted` or `failed:<kind>`.
    pub fn status_str(&self) -> String {
        match &self.outcome {
            RoleOutcome::Found => "found".into(),
            RoleOutcome::Extracted { .. } => "extracted".into(),
            RoleOutcome::Failed { kind } => format!("failed:{kind}"),
        }
    }
}

/// The outcome of a whole pipeline run.
#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    /// One status per role slot, in stable role order
    pub statuses: Vec<RoleStatus>,
}

impl ExtractionReport {
    /// Number of slots that extracted cleanly.
    pub fn extracted_count(&self) -> usize {
        self.statuses
            .iter()
            .filter(|s| matches!(s.outcome, RoleOutcome::Extracted { .. }))
            .count()
    }

    /// Number of slots that failed extraction.
    pub fn failed_count(&self) -> usize {
        self.statuses
            .iter()
            .filter(|s| matches!(s.outcome, RoleOutcome::Failed { .. }))
            .count()
    }

    /// True if no attempted slot failed.
    pub fn all_clean(&self) -> bool {
        self.failed_count() == 0
    }

    /// Renders the per-role status table.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{:<22} {:<5} {:>12}  {}\n",
            "ROLE", "SLOT", "OFFSET", "STATUS"
        ));
        for status in &self.statuses {
            out.push_str(&format!(
                "{:<22} {:<5} {:#12x}  {}\n",
                status.role.name(),
                slot_letter(status.slot),
                status.offset,
                status.status_str()
            ));
        }
        out
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Extracts every registry slot into `out_dir`.
///
/// `on_progress` is invoked once per finished slot (from worker threads).
/// Only fatal errors propagate; per-role failures are folded into the
/// report.
pub fn run<F>(
    image: &FirmwareImage,
    registry: &OffsetRegistry,
    config: &Config,
    out_dir: &Path,
    on_progress: F,
) -> Result<ExtractionReport>
where
    F: Fn() + Sync,
{
    let work: Vec<(SemanticRole, usize, OffsetEntry)> = registry
        .iter()
        .flat_map(|(role, entries)| {
            entries
                .entries()
                .iter()
                .enumerate()
                .map(move |(slot, entry)| (role, slot, *entry))
        })
        .collect();

    let statuses: Vec<RoleStatus> = work
        .par_iter()
        .map(|(role, slot, entry)| {
            let status = process_entry(image, registry, config, out_dir, *role, *slot, entry);
            on_progress();
            status
        })
        .collect();

    info!(
        roles = registry.role_count(),
        extracted = statuses
            .iter()
            .filter(|s| matches!(s.outcome, RoleOutcome::Extracted { .. }))
            .count(),
        "extraction run complete"
    );
    Ok(ExtractionReport { statuses })
}

/// Runs one slot through its role strategy and folds the result into a
/// status line.
fn process_entry(
    image: &FirmwareImage,
    registry: &OffsetRegistry,
    config: &Config,
    out_dir: &Path,
    role: SemanticRole,
    slot: usize,
    entry: &OffsetEntry,
) -> RoleStatus {
    let extractor = ComponentExtractor::new(image, config);
    let outcome = match extract_entry(image, registry, config, role, slot, entry) {
        Ok(Some(component)) => match extractor.write_component(out_dir, &component) {
            Ok(path) => RoleOutcome::Extracted {
                size: component.size,
                path,
            },
            Err(e) => {
                warn!(role = %role, error = %e, "failed to write artifact");
                RoleOutcome::Failed { kind: e.kind_str() }
            }
        },
        Ok(None) => {
            warn!(
                role = %role,
                offset = format_args!("{:#x}", entry.offset),
                "no resolvable size, leaving role unextracted"
            );
            RoleOutcome::Found
        }
        Err(e) => {
            warn!(role = %role, offset = format_args!("{:#x}", entry.offset), error = %e, "extraction failed, skipping artifact");
            RoleOutcome::Failed { kind: e.kind_str() }
        }
    };

    RoleStatus {
        role,
        slot,
        offset: entry.offset,
        outcome,
    }
}

/// Role strategy dispatch. `Ok(None)` means the slot was discovered but
/// carries nothing extractable (no authoritative or declared size).
fn extract_entry(
    image: &FirmwareImage,
    registry: &OffsetRegistry,
    config: &Config,
    role: SemanticRole,
    slot: usize,
    entry: &OffsetEntry,
) -> Result<Option<ExtractedComponent>> {
    let resolver = ContainerResolver::new(image, config);
    let extractor = ComponentExtractor::new(image, config);
    let name = artifact_name(role, slot);

    match role {
        // The outer container is extracted whole, sized by its header.
        SemanticRole::BootloaderFit => {
            let header = resolver.read_header(entry.offset)?;
            extractor
                .extract(name, entry.offset, header.total_size())
                .map(Some)
        }

        // Two-hop resolution, then the payload itself; a gzip payload is
        // transparently decompressed.
        SemanticRole::KernelFit => {
            let resolution = resolver.resolve_kernel(entry.offset)?;
            let component =
                extractor.extract(name, resolution.kernel_offset, resolution.kernel_size)?;
            if is_gzip(&component.bytes) {
                let bytes = extractor.gunzip(&component.bytes, resolution.kernel_offset)?;
                return Ok(Some(ExtractedComponent {
                    size: bytes.len() as u64,
                    bytes,
                    decompressed: true,
                    ..component
                }));
            }
            Ok(Some(component))
        }

        // Component blobs live inside the bootloader FIT; fall back to the
        // scanner's declared size when the node is absent.
        SemanticRole::UbootBlob | SemanticRole::OpteeBlob => {
            if let Some(bootloader) = registry.get(SemanticRole::BootloaderFit) {
                let fit_offset = bootloader.primary().offset;
                match resolve_blob_in_fit(&resolver, fit_offset, role) {
                    Ok((offset, size)) => return extractor.extract(name, offset, size).map(Some),
                    Err(e) => warn!(
                        role = %role,
                        error = %e,
                        "could not resolve blob inside bootloader FIT, falling back to declared size"
                    ),
                }
            }
            match entry.size {
                Some(size) => extractor.extract(name, entry.offset, size).map(Some),
                None => Ok(None),
            }
        }

        // A gzip-compressed cpio stream of unknown compressed length.
        SemanticRole::RootfsCpio => {
            let head = image.read_at(entry.offset, 2)?;
            if is_gzip(head) {
                return extractor
                    .extract_and_decompress(name, entry.offset)
                    .map(Some);
            }
            match entry.size {
                Some(size) => extractor.extract(name, entry.offset, size).map(Some),
                None => Ok(None),
            }
        }

        // Filesystem regions extract by declared superblock size.
        SemanticRole::SquashfsRoot | SemanticRole::ExtPartition(_) => match entry.size {
            Some(size) => extractor.extract(name, entry.offset, size).map(Some),
            None => Ok(None),
        },
    }
}

/// Resolves a component blob node inside the bootloader FIT.
fn resolve_blob_in_fit(
    resolver: &ContainerResolver<'_>,
    fit_offset: u64,
    role: SemanticRole,
) -> Result<(u64, u64)> {
    let container = resolver.container_bytes(fit_offset)?;
    let node_names: &[&str] = match role {
        SemanticRole::UbootBlob => &["uboot", "u-boot"],
        SemanticRole::OpteeBlob => &["tee", "optee"],
        _ => &[],
    };

    let mut last_err = Error::NodeNotFound {
        path: "images".into(),
    };
    for candidate in node_names {
        match resolver.resolve_node(container, &format!("images/{candidate}")) {
            Ok(node) => {
                let position = node.data_position()?;
                let size = node.data_size()?;
                return Ok((absolute_offset(fit_offset, position), size));
            }
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

/// Artifact file name for a role slot: primaries are `<stem>.bin`,
/// secondaries `<stem>.slot_b.bin` and onward.
pub fn artifact_name(role: SemanticRole, slot: usize) -> String {
    let stem = role.artifact_stem();
    if slot == 0 {
        format!("{stem}.bin")
    } else {
        format!("{stem}.slot_{}.bin", slot_letter(slot).to_ascii_lowercase())
    }
}

fn slot_letter(slot: usize) -> String {
    if slot < 26 {
        ((b'A' + slot as u8) as char).to_string()
    } else {
        slot.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_names() {
        assert_eq!(
            artifact_name(SemanticRole::BootloaderFit, 0),
            "bootloader_fit.bin"
        );
        assert_eq!(
            artifact_name(SemanticRole::KernelFit, 1),
            "kernel_fit.slot_b.bin"
        );
        assert_eq!(
            artifact_name(SemanticRole::ExtPartition(2), 0),
            "ext_partition_2.bin"
        );
    }

    #[test]
    fn test_status_strings() {
        let status = RoleStatus {
            role: SemanticRole::KernelFit,
            slot: 0,
            offset: 0x500000,
            outcome: RoleOutcome::Failed { kind: "bad-magic" },
        };
        assert_eq!(status.status_str(), "failed:bad-magic");

        let report = ExtractionReport {
            statuses: vec![status],
        };
        assert_eq!(report.failed_count(), 1);
        assert!(!report.all_clean());
        assert!(report.render().contains("failed:bad-magic"));
    }
}
