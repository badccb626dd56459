//! Signature scanning over raw firmware images.
//!
//! Discovery starts with a byte-pattern detector run over the whole image.
//! The detector is an external tool behind the [`SignatureScanner`] trait;
//! its hits are ephemeral and consumed once to build the offset registry.

mod binwalk;

pub use binwalk::*;

use std::path::Path;

use crate::error::Result;

/// The format family a signature hit was recognized as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureKind {
    /// Flattened device tree blob (FIT containers included)
    DeviceTreeBlob,
    /// Gzip compressed stream
    Gzip,
    /// SquashFS filesystem superblock
    SquashFs,
    /// Ext2/3/4 filesystem superblock
    Ext4,
    /// Recognized by the tool but not by the classifier
    Unknown,
}

impl SignatureKind {
    /// Classifies a scanner description line.
    pub fn classify(description: &str) -> Self {
        let lower = description.to_ascii_lowercase();
        if lower.contains("device tree") || lower.contains("flattened image tree") {
            SignatureKind::DeviceTreeBlob
        } else if lower.contains("gzip") {
            SignatureKind::Gzip
        } else if lower.contains("squashfs") {
            SignatureKind::SquashFs
        } else if lower.contains("ext2 filesystem")
            || lower.contains("ext3 filesystem")
            || lower.contains("ext4 filesystem")
        {
            SignatureKind::Ext4
        } else {
            SignatureKind::Unknown
        }
    }
}

/// A single hit from the signature scan, ordered by ascending offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHit {
    /// Absolute offset of the signature within the image
    pub offset: u64,
    /// Size the scanner believes the region spans, when its signature
    /// grammar recovered one. Never authoritative for containers.
    pub declared_size: Option<u64>,
    /// The tool's description line for this hit
    pub description: String,
    /// Classified format family
    pub kind: SignatureKind,
}

impl SignatureHit {
    /// Builds a hit from an offset and description, classifying the kind
    /// and recovering a declared size when the description carries one.
    pub fn new(offset: u64, description: impl Into<String>) -> Self {
        let description = description.into();
        Self {
            offset,
            declared_size: parse_declared_size(&description),
            kind: SignatureKind::classify(&description),
            description,
        }
    }
}

/// Capability interface for the external byte-pattern detector.
pub trait SignatureScanner {
    /// Scans the image file, returning hits ordered by ascending offset.
    ///
    /// Never mutates the image. Zero hits is a valid result; only a tool
    /// that cannot run at all is an error (`ToolUnavailable`).
    fn scan(&self, image_path: &Path) -> Result<Vec<SignatureHit>>;
}

/// Recovers a `size: N bytes` / `total size: N bytes` fragment from a
/// description, if present.
fn parse_declared_size(description: &str) -> Option<u64> {
    for (idx, _) in description.match_indices("size: ") {
        let rest = &description[idx + "size: ".len()..];
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(size) = digits.parse::<u64>() {
            return Some(size);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(
            SignatureKind::classify("device tree blob (dtb)"),
            SignatureKind::DeviceTreeBlob
        );
        assert_eq!(
            SignatureKind::classify("Flattened Image Tree, header size: 392 bytes"),
            SignatureKind::DeviceTreeBlob
        );
        assert_eq!(
            SignatureKind::classify("gzip compressed data, from Unix"),
            SignatureKind::Gzip
        );
        assert_eq!(
            SignatureKind::classify("Squashfs filesystem, little endian"),
            SignatureKind::SquashFs
        );
        assert_eq!(
            SignatureKind::classify("Linux EXT4 filesystem, rev 1.0"),
            SignatureKind::Ext4
        );
        assert_eq!(
            SignatureKind::classify("JPEG image data"),
            SignatureKind::Unknown
        );
    }

    #[test]
    fn test_declared_size() {
        assert_eq!(
            parse_declared_size("Squashfs filesystem, size: 4194304 bytes"),
            Some(4194304)
        );
        assert_eq!(
            parse_declared_size("device tree blob (dtb), total size: 65536 bytes"),
            Some(65536)
        );
        assert_eq!(parse_declared_size("gzip compressed data"), None);
        assert_eq!(parse_declared_size("size: not-a-number"), None);
    }

    #[test]
    fn test_hit_construction() {
        let hit = SignatureHit::new(0x100000, "device tree blob (dtb), total size: 256 bytes");
        assert_eq!(hit.offset, 0x100000);
        assert_eq!(hit.declared_size, Some(256));
        assert_eq!(hit.kind, SignatureKind::DeviceTreeBlob);
    }
}
