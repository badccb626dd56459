//! Semantic offset registry.
//!
//! Classifies raw signature hits into semantic roles and persists a stable
//! offset table. The registry artifact is the contract boundary between
//! discovery and extraction: rebuilding it from the same hit list always
//! reproduces byte-identical output, and it is the only interface the
//! resolver and extractor consume.
//!
//! # Classification
//!
//! A prioritized pattern table, first match wins per hit: component
//! filenames first, then device-tree hits (earliest is the bootloader FIT;
//! a later one is the kernel FIT when its declared size matches the
//! configured hint, or — as a logged fallback — when it is the first hit
//! at or past the offset threshold), then filesystem superblocks.
//!
//! # A/B redundancy
//!
//! A role may own several entries: redundant firmware copies show up as
//! repeated hits for the same role. All of them are retained; the entry
//! with the lowest offset is the primary slot.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::scanner::{SignatureHit, SignatureKind};

// =============================================================================
// Roles
// =============================================================================

/// The semantic role of a discovered offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SemanticRole {
    /// Outer FIT carrying the bootloader components
    BootloaderFit,
    /// Outer FIT carrying the kernel
    KernelFit,
    /// Raw U-Boot binary (no appended device tree)
    UbootBlob,
    /// OP-TEE trusted OS binary
    OpteeBlob,
    /// Ramdisk cpio archive (gzip compressed)
    RootfsCpio,
    /// SquashFS root filesystem
    SquashfsRoot,
    /// The nth ext2/3/4 partition in the image (1-based)
    ExtPartition(u32),
}

impl SemanticRole {
    /// Roles whose absence from a scan is worth a warning.
    pub const EXPECTED: [SemanticRole; 6] = [
        SemanticRole::BootloaderFit,
        SemanticRole::KernelFit,
        SemanticRole::UbootBlob,
        SemanticRole::OpteeBlob,
        SemanticRole::RootfsCpio,
        SemanticRole::SquashfsRoot,
    ];

    /// Stable uppercase name used in the offset table.
    pub fn name(&self) -> String {
        match self {
            SemanticRole::BootloaderFit => "BOOTLOADER_FIT".into(),
            SemanticRole::KernelFit => "KERNEL_FIT".into(),
            SemanticRole::UbootBlob => "UBOOT_BLOB".into(),
            SemanticRole::OpteeBlob => "OPTEE_BLOB".into(),
            SemanticRole::RootfsCpio => "ROOTFS_CPIO".into(),
            SemanticRole::SquashfsRoot => "SQUASHFS_ROOT".into(),
            SemanticRole::ExtPartition(n) => format!("EXT_PARTITION_{n}"),
        }
    }

    /// Parses a name produced by [`SemanticRole::name`].
    pub fn parse_name(name: &str) -> Option<Self> {
        match name {
            "BOOTLOADER_FIT" => Some(SemanticRole::BootloaderFit),
            "KERNEL_FIT" => Some(SemanticRole::KernelFit),
            "UBOOT_BLOB" => Some(SemanticRole::UbootBlob),
            "OPTEE_BLOB" => Some(SemanticRole::OpteeBlob),
            "ROOTFS_CPIO" => Some(SemanticRole::RootfsCpio),
            "SQUASHFS_ROOT" => Some(SemanticRole::SquashfsRoot),
            _ => name
                .strip_prefix("EXT_PARTITION_")
                .and_then(|n| n.parse().ok())
                .map(SemanticRole::ExtPartition),
        }
    }

    /// Lowercase stem for artifact file names.
    pub fn artifact_stem(&self) -> String {
        self.name().to_ascii_lowercase()
    }
}

impl std::fmt::Display for SemanticRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}

// =============================================================================
// Entries
// =============================================================================

/// A classified offset within the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetEntry {
    /// Role this offset was classified as
    pub role: SemanticRole,
    /// Absolute offset within the image
    pub offset: u64,
    /// Scanner-declared size, when one was recovered. Advisory only for
    /// containers; authoritative sizes come from container headers.
    pub size: Option<u64>,
}

/// All entries for one role, redundant copies included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleEntries {
    entries: Vec<OffsetEntry>,
    primary: usize,
}

impl RoleEntries {
    fn new(entry: OffsetEntry) -> Self {
        Self {
            entries: vec![entry],
            primary: 0,
        }
    }

    /// Inserts keeping entries sorted by ascending offset; the primary is
    /// always the first (lowest-offset) slot.
    fn push(&mut self, entry: OffsetEntry) {
        let at = self
            .entries
            .partition_point(|e| e.offset <= entry.offset);
        self.entries.insert(at, entry);
        self.primary = 0;
    }

    /// The primary (lowest-offset) slot.
    #[inline]
    pub fn primary(&self) -> &OffsetEntry {
        &self.entries[self.primary]
    }

    /// Index of the primary slot within [`RoleEntries::entries`].
    #[inline]
    pub fn primary_index(&self) -> usize {
        self.primary
    }

    /// All slots, ascending by offset.
    #[inline]
    pub fn entries(&self) -> &[OffsetEntry] {
        &self.entries
    }
}

// =============================================================================
// Registry
// =============================================================================

/// The classified offset table for one firmware image.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OffsetRegistry {
    roles: BTreeMap<SemanticRole, RoleEntries>,
}

impl OffsetRegistry {
    /// Builds the registry from a hit list.
    ///
    /// This is a pure function of the hits and configuration: input order
    /// does not matter (hits are sorted first) and identical inputs always
    /// yield identical registries.
    pub fn build(hits: &[SignatureHit], config: &Config) -> Self {
        let mut sorted: Vec<&SignatureHit> = hits.iter().collect();
        sorted.sort_by(|a, b| {
            a.offset
                .cmp(&b.offset)
                .then_with(|| a.description.cmp(&b.description))
        });
        sorted.dedup_by(|a, b| a.offset == b.offset && a.description == b.description);

        let mut registry = OffsetRegistry::default();
        let mut saw_dtb = false;
        let mut ext_count = 0u32;

        for hit in sorted {
            let Some(role) = classify(hit, config, &mut saw_dtb, &mut ext_count) else {
                continue;
            };
            debug!(role = %role, offset = hit.offset, "classified signature hit");
            registry.insert(OffsetEntry {
                role,
                offset: hit.offset,
                size: hit.declared_size,
            });
        }

        for role in SemanticRole::EXPECTED {
            if !registry.roles.contains_key(&role) {
                warn!(role = %role, "role not found in scan results");
            }
        }

        registry
    }

    fn insert(&mut self, entry: OffsetEntry) {
        match self.roles.get_mut(&entry.role) {
            Some(existing) => existing.push(entry),
            None => {
                self.roles.insert(entry.role, RoleEntries::new(entry));
            }
        }
    }

    /// Returns the entries for a role.
    pub fn get(&self, role: SemanticRole) -> Option<&RoleEntries> {
        self.roles.get(&role)
    }

    /// Iterates over roles in stable order.
    pub fn iter(&self) -> impl Iterator<Item = (SemanticRole, &RoleEntries)> {
        self.roles.iter().map(|(role, entries)| (*role, entries))
    }

    /// Returns the number of classified roles.
    pub fn role_count(&self) -> usize {
        self.roles.len()
    }

    /// Returns true if no hit was classified.
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Keeps only roles for which the predicate holds.
    pub fn retain(&mut self, mut keep: impl FnMut(SemanticRole) -> bool) {
        self.roles.retain(|role, _| keep(*role));
    }

    /// Total number of slots across all roles.
    pub fn slot_count(&self) -> usize {
        self.roles.values().map(|e| e.entries.len()).sum()
    }

    /// Serializes the registry to the stable line-oriented offset table.
    ///
    /// Each slot produces a `NAME_OFFSET=0x…` / `NAME_OFFSET_DEC=…` pair
    /// (plus `NAME_SIZE=…` when a size is known); secondary A/B slots get a
    /// `_SLOT_<letter>` infix. Byte-identical across rebuilds from the
    /// same hit list.
    pub fn to_table(&self) -> String {
        let mut out = String::new();
        for (role, entries) in &self.roles {
            for (i, entry) in entries.entries().iter().enumerate() {
                let key = slot_key(role, i);
                out.push_str(&format!("{key}_OFFSET={:#x}\n", entry.offset));
                out.push_str(&format!("{key}_OFFSET_DEC={}\n", entry.offset));
                if let Some(size) = entry.size {
                    out.push_str(&format!("{key}_SIZE={size}\n"));
                }
            }
        }
        out
    }

    /// Parses a table produced by [`OffsetRegistry::to_table`].
    ///
    /// Unknown or malformed lines are skipped.
    pub fn parse(text: &str) -> Result<Self> {
        let mut offsets: BTreeMap<(SemanticRole, String), OffsetEntry> = BTreeMap::new();

        for line in text.lines() {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            // _OFFSET_DEC is redundant with _OFFSET; _SIZE attaches to an
            // already-seen slot.
            if key.ends_with("_OFFSET_DEC") {
                continue;
            }
            if let Some(slot) = key.strip_suffix("_OFFSET") {
                let Some((role, slot_id)) = parse_slot_key(slot) else {
                    debug!(key, "skipping unknown role key");
                    continue;
                };
                let Some(offset) = parse_int(value) else {
                    debug!(key, value, "skipping malformed offset value");
                    continue;
                };
                offsets.insert(
                    (role, slot_id),
                    OffsetEntry {
                        role,
                        offset,
                        size: None,
                    },
                );
            } else if let Some(slot) = key.strip_suffix("_SIZE") {
                if let Some((role, slot_id)) = parse_slot_key(slot) {
                    if let (Some(entry), Some(size)) =
                        (offsets.get_mut(&(role, slot_id)), parse_int(value))
                    {
                        entry.size = Some(size);
                    }
                }
            }
        }

        let mut registry = OffsetRegistry::default();
        for entry in offsets.into_values() {
            registry.insert(entry);
        }
        Ok(registry)
    }
}

/// Classifies one hit; first matching pattern wins.
fn classify(
    hit: &SignatureHit,
    config: &Config,
    saw_dtb: &mut bool,
    ext_count: &mut u32,
) -> Option<SemanticRole> {
    // Component filenames take precedence over format families.
    if hit.description.contains("u-boot-nodtb.bin") {
        return Some(SemanticRole::UbootBlob);
    }
    if hit.description.contains("tee.bin") {
        return Some(SemanticRole::OpteeBlob);
    }
    if hit.description.contains("rootfs.cpio") {
        return Some(SemanticRole::RootfsCpio);
    }

    match hit.kind {
        SignatureKind::DeviceTreeBlob => {
            let first = !*saw_dtb;
            *saw_dtb = true;

            if first {
                return Some(SemanticRole::BootloaderFit);
            }
            if let Some(hint) = config.kernel_fit_size_hint {
                if hit.declared_size == Some(hint) {
                    debug!(offset = hit.offset, "kernel FIT matched by declared size");
                    return Some(SemanticRole::KernelFit);
                }
            }
            if hit.offset >= config.kernel_offset_threshold {
                info!(
                    offset = format_args!("{:#x}", hit.offset),
                    threshold = format_args!("{:#x}", config.kernel_offset_threshold),
                    "kernel FIT selected by offset-threshold fallback heuristic"
                );
                return Some(SemanticRole::KernelFit);
            }
            Some(SemanticRole::BootloaderFit)
        }
        SignatureKind::SquashFs => Some(SemanticRole::SquashfsRoot),
        SignatureKind::Ext4 => {
            *ext_count += 1;
            Some(SemanticRole::ExtPartition(*ext_count))
        }
        SignatureKind::Gzip | SignatureKind::Unknown => None,
    }
}

/// Table key for slot `i` of a role: the primary slot is the bare role
/// name, secondaries get `_SLOT_B`, `_SLOT_C`, …
fn slot_key(role: &SemanticRole, i: usize) -> String {
    if i == 0 {
        role.name()
    } else if i < 26 {
        format!("{}_SLOT_{}", role.name(), (b'A' + i as u8) as char)
    } else {
        format!("{}_SLOT_{}", role.name(), i)
    }
}

fn parse_slot_key(key: &str) -> Option<(SemanticRole, String)> {
    if let Some((role_name, slot)) = key.split_once("_SLOT_") {
        return SemanticRole::parse_name(role_name).map(|r| (r, slot.to_string()));
    }
    SemanticRole::parse_name(key).map(|r| (r, String::new()))
}

fn parse_int(value: &str) -> Option<u64> {
    if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        value.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(offset: u64, description: &str) -> SignatureHit {
        SignatureHit::new(offset, description)
    }

    fn sample_hits() -> Vec<SignatureHit> {
        vec![
            hit(0x1000, "device tree blob (dtb)"),
            hit(0x490000, "device tree blob (dtb)"),
            hit(0x500000, "gzip compressed data, has original file name: \"rootfs.cpio\""),
            hit(0x600000, "Squashfs filesystem, little endian, size: 4194304 bytes"),
            hit(0x700000, "Linux EXT4 filesystem, rev 1.0"),
            hit(0x800000, "Linux EXT4 filesystem, rev 1.0"),
        ]
    }

    #[test]
    fn test_classification() {
        let registry = OffsetRegistry::build(&sample_hits(), &Config::default());

        assert_eq!(
            registry.get(SemanticRole::BootloaderFit).unwrap().primary().offset,
            0x1000
        );
        assert_eq!(
            registry.get(SemanticRole::KernelFit).unwrap().primary().offset,
            0x490000
        );
        assert_eq!(
            registry.get(SemanticRole::RootfsCpio).unwrap().primary().offset,
            0x500000
        );
        assert_eq!(
            registry.get(SemanticRole::SquashfsRoot).unwrap().primary().size,
            Some(4194304)
        );
        assert_eq!(
            registry.get(SemanticRole::ExtPartition(1)).unwrap().primary().offset,
            0x700000
        );
        assert_eq!(
            registry.get(SemanticRole::ExtPartition(2)).unwrap().primary().offset,
            0x800000
        );
    }

    #[test]
    fn test_size_hint_beats_threshold() {
        let mut config = Config::default();
        config.kernel_fit_size_hint = Some(0x9000);
        // Second DTB sits below the offset threshold but matches the hint.
        let hits = vec![
            hit(0x1000, "device tree blob (dtb)"),
            hit(0x90000, "device tree blob (dtb), total size: 36864 bytes"),
        ];
        let registry = OffsetRegistry::build(&hits, &config);
        assert_eq!(
            registry.get(SemanticRole::KernelFit).unwrap().primary().offset,
            0x90000
        );
    }

    #[test]
    fn test_ab_slots_retained() {
        let hits = vec![
            hit(0x1000, "device tree blob (dtb)"),
            hit(0x500000, "device tree blob (dtb)"),
            hit(0x900000, "device tree blob (dtb)"),
        ];
        let registry = OffsetRegistry::build(&hits, &Config::default());
        let kernel = registry.get(SemanticRole::KernelFit).unwrap();
        assert_eq!(kernel.entries().len(), 2);
        assert_eq!(kernel.primary().offset, 0x500000);
        assert_eq!(kernel.primary_index(), 0);
        assert_eq!(kernel.entries()[1].offset, 0x900000);
    }

    #[test]
    fn test_build_is_pure() {
        let hits = sample_hits();
        let mut shuffled = hits.clone();
        shuffled.reverse();
        // Adversarial exact duplicates collapse instead of shifting slots.
        shuffled.push(hit(0x1000, "device tree blob (dtb)"));

        let a = OffsetRegistry::build(&hits, &Config::default());
        let b = OffsetRegistry::build(&shuffled, &Config::default());
        assert_eq!(a, b);
        assert_eq!(a.to_table(), b.to_table());
    }

    #[test]
    fn test_table_roundtrip() {
        let registry = OffsetRegistry::build(&sample_hits(), &Config::default());
        let table = registry.to_table();

        assert!(table.contains("BOOTLOADER_FIT_OFFSET=0x1000\n"));
        assert!(table.contains("BOOTLOADER_FIT_OFFSET_DEC=4096\n"));
        assert!(table.contains("SQUASHFS_ROOT_SIZE=4194304\n"));

        let parsed = OffsetRegistry::parse(&table).unwrap();
        assert_eq!(parsed, registry);
        assert_eq!(parsed.to_table(), table);
    }

    #[test]
    fn test_slot_suffix_roundtrip() {
        let hits = vec![
            hit(0x1000, "device tree blob (dtb)"),
            hit(0x500000, "device tree blob (dtb)"),
            hit(0x900000, "device tree blob (dtb)"),
        ];
        let registry = OffsetRegistry::build(&hits, &Config::default());
        let table = registry.to_table();
        assert!(table.contains("KERNEL_FIT_SLOT_B_OFFSET=0x900000\n"));

        let parsed = OffsetRegistry::parse(&table).unwrap();
        assert_eq!(parsed, registry);
    }

    #[test]
    fn test_empty_hits() {
        let registry = OffsetRegistry::build(&[], &Config::default());
        assert!(registry.is_empty());
        assert_eq!(registry.to_table(), "");
    }

    #[test]
    fn test_role_names_roundtrip() {
        for role in [
            SemanticRole::BootloaderFit,
            SemanticRole::KernelFit,
            SemanticRole::UbootBlob,
            SemanticRole::OpteeBlob,
            SemanticRole::RootfsCpio,
            SemanticRole::SquashfsRoot,
            SemanticRole::ExtPartition(3),
        ] {
            assert_eq!(SemanticRole::parse_name(&role.name()), Some(role));
        }
        assert_eq!(SemanticRole::parse_name("NOT_A_ROLE"), None);
    }
}
