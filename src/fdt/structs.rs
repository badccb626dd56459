//! Flattened device tree binary structures.
//!
//! These structures match the on-disk FDT format used by U-Boot FIT images.
//! All integers are big-endian; the fixed header is parsed zero-copy with
//! the `zerocopy` crate.
//!
//! # Layout
//!
//! An FDT blob consists of a fixed 40-byte header, a memory reservation
//! block, the structure block (a token stream describing nodes and
//! properties), and a strings block holding property names.

use std::fmt;

use zerocopy::byteorder::big_endian::U32;
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};

/// FDT magic number, stored big-endian at the start of every container.
pub const FDT_MAGIC: u32 = 0xd00dfeed;

/// The magic as raw bytes, for sweeping an image for candidate containers.
pub const FDT_MAGIC_BYTES: [u8; 4] = [0xd0, 0x0d, 0xfe, 0xed];

/// FDT format version emitted by modern mkimage/dtc.
pub const FDT_VERSION: u32 = 17;

// =============================================================================
// Structure Block Tokens
// =============================================================================

/// Begins a node; followed by the NUL-terminated node name, padded to 4.
pub const FDT_BEGIN_NODE: u32 = 0x1;
/// Ends the current node.
pub const FDT_END_NODE: u32 = 0x2;
/// A property; followed by value length, name offset, and the padded value.
pub const FDT_PROP: u32 = 0x3;
/// No-op filler token.
pub const FDT_NOP: u32 = 0x4;
/// Ends the structure block.
pub const FDT_END: u32 = 0x9;

// =============================================================================
// FIT Property Names
// =============================================================================

/// FIT property: payload offset relative to the container's own start.
pub const PROP_DATA_POSITION: &str = "data-position";
/// FIT property: payload length in bytes.
pub const PROP_DATA_SIZE: &str = "data-size";

// =============================================================================
// Header
// =============================================================================

/// The fixed 40-byte FDT header.
///
/// `total_size` is the authoritative container size: signature scanners
/// routinely mis-estimate container boundaries, so downstream extraction
/// always trusts this field (after bounds validation) over any scanner
/// estimate.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct FdtHeader {
    /// Magic identifier, must equal `FDT_MAGIC`
    pub magic: U32,
    /// Total container size in bytes, including all blocks
    pub total_size: U32,
    /// Offset to the structure block
    pub off_dt_struct: U32,
    /// Offset to the strings block
    pub off_dt_strings: U32,
    /// Offset to the memory reservation block
    pub off_mem_rsvmap: U32,
    /// Format version
    pub version: U32,
    /// Last compatible format version
    pub last_comp_version: U32,
    /// Physical CPU ID of the boot processor
    pub boot_cpuid_phys: U32,
    /// Size of the strings block
    pub size_dt_strings: U32,
    /// Size of the structure block
    pub size_dt_struct: U32,
}

impl FdtHeader {
    /// Size of the fixed header in bytes.
    pub const SIZE: usize = 40;

    /// Parses and validates a header from the start of `data`.
    ///
    /// `base_offset` is only used for error reporting: it is where `data`
    /// begins within the outer image.
    pub fn parse(data: &[u8], base_offset: u64) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::TruncatedRead {
                offset: base_offset,
                requested: Self::SIZE as u64,
                available: data.len() as u64,
            });
        }

        let header = FdtHeader::read_from_prefix(data)
            .map_err(|_| Error::parse(base_offset as usize, "failed to parse FDT header"))?
            .0;

        if header.magic.get() != FDT_MAGIC {
            return Err(Error::BadMagic {
                offset: base_offset,
                found: header.magic.get(),
            });
        }

        Ok(header)
    }

    /// Returns the authoritative container size declared by the header.
    #[inline]
    pub fn total_size(&self) -> u64 {
        self.total_size.get() as u64
    }

    /// Returns true if the structure and strings blocks both lie within the
    /// declared total size.
    pub fn blocks_in_bounds(&self) -> bool {
        let total = self.total_size.get() as u64;
        let struct_end = self.off_dt_struct.get() as u64 + self.size_dt_struct.get() as u64;
        let strings_end = self.off_dt_strings.get() as u64 + self.size_dt_strings.get() as u64;
        struct_end <= total && strings_end <= total
    }
}

impl fmt::Display for FdtHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FDT v{} total_size={:#x} struct={:#x}+{:#x} strings={:#x}+{:#x}",
            self.version.get(),
            self.total_size.get(),
            self.off_dt_struct.get(),
            self.size_dt_struct.get(),
            self.off_dt_strings.get(),
            self.size_dt_strings.get(),
        )
    }
}
