//! Synthetic FDT container construction.
//!
//! A minimal writer for the same token stream the reader consumes. Used to
//! build wrapper containers and fixture images for tests and tooling; real
//! firmware containers come from mkimage.

use std::collections::HashMap;

use super::structs::{
    FdtHeader, FDT_BEGIN_NODE, FDT_END, FDT_END_NODE, FDT_MAGIC, FDT_PROP, FDT_VERSION,
};
use crate::util::align_up;

/// Builds an FDT blob node by node.
///
/// The root node is implicit: callers only emit their own nodes and
/// properties. `begin_node`/`end_node` calls must balance.
#[derive(Debug, Default)]
pub struct FdtBuilder {
    structure: Vec<u8>,
    strings: Vec<u8>,
    string_offsets: HashMap<String, u32>,
    depth: usize,
}

impl FdtBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a child node.
    pub fn begin_node(&mut self, name: &str) -> &mut Self {
        self.push_token(FDT_BEGIN_NODE);
        self.structure.extend_from_slice(name.as_bytes());
        self.structure.push(0);
        self.pad_structure();
        self.depth += 1;
        self
    }

    /// Closes the most recently opened node.
    ///
    /// # Panics
    ///
    /// Panics if no node is open.
    pub fn end_node(&mut self) -> &mut Self {
        assert!(self.depth > 0, "end_node without matching begin_node");
        self.push_token(FDT_END_NODE);
        self.depth -= 1;
        self
    }

    /// Emits a single-cell u32 property.
    pub fn prop_u32(&mut self, name: &str, value: u32) -> &mut Self {
        self.prop_bytes(name, &value.to_be_bytes())
    }

    /// Emits a NUL-terminated string property.
    pub fn prop_str(&mut self, name: &str, value: &str) -> &mut Self {
        let mut bytes = value.as_bytes().to_vec();
        bytes.push(0);
        self.prop_bytes(name, &bytes)
    }

    /// Emits a raw byte property.
    pub fn prop_bytes(&mut self, name: &str, value: &[u8]) -> &mut Self {
        let name_off = self.string_offset(name);
        self.push_token(FDT_PROP);
        self.structure.extend_from_slice(&(value.len() as u32).to_be_bytes());
        self.structure.extend_from_slice(&name_off.to_be_bytes());
        self.structure.extend_from_slice(value);
        self.pad_structure();
        self
    }

    /// Assembles the final blob: header, empty memory reservation block,
    /// structure block, strings block.
    ///
    /// # Panics
    ///
    /// Panics if any node is still open.
    pub fn build(mut self) -> Vec<u8> {
        assert_eq!(self.depth, 0, "unbalanced begin_node/end_node");

        // Wrap the user's nodes in the implicit root node.
        let mut structure = Vec::with_capacity(self.structure.len() + 16);
        structure.extend_from_slice(&FDT_BEGIN_NODE.to_be_bytes());
        structure.extend_from_slice(&[0, 0, 0, 0]); // empty root name, padded
        structure.extend_from_slice(&self.structure);
        structure.extend_from_slice(&FDT_END_NODE.to_be_bytes());
        structure.extend_from_slice(&FDT_END.to_be_bytes());

        // Two zero u64s terminate the (empty) memory reservation block.
        let rsvmap = [0u8; 16];

        let off_rsvmap = FdtHeader::SIZE;
        let off_struct = off_rsvmap + rsvmap.len();
        let off_strings = off_struct + structure.len();
        let total_size = off_strings + self.strings.len();

        let mut blob = Vec::with_capacity(total_size);
        for field in [
            FDT_MAGIC,
            total_size as u32,
            off_struct as u32,
            off_strings as u32,
            off_rsvmap as u32,
            FDT_VERSION,
            16, // last compatible version
            0,  // boot cpu
            self.strings.len() as u32,
            structure.len() as u32,
        ] {
            blob.extend_from_slice(&field.to_be_bytes());
        }
        blob.extend_from_slice(&rsvmap);
        blob.extend_from_slice(&structure);
        blob.append(&mut self.strings);
        blob
    }

    fn push_token(&mut self, token: u32) {
        self.structure.extend_from_slice(&token.to_be_bytes());
    }

    fn pad_structure(&mut self) {
        self.structure.resize(align_up(self.structure.len(), 4), 0);
    }

    fn string_offset(&mut self, name: &str) -> u32 {
        if let Some(&off) = self.string_offsets.get(name) {
            return off;
        }
        let off = self.strings.len() as u32;
        self.strings.extend_from_slice(name.as_bytes());
        self.strings.push(0);
        self.string_offsets.insert(name.to_string(), off);
        off
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fdt::structs::FdtHeader;

    #[test]
    fn test_build_minimal() {
        let blob = FdtBuilder::new().build();
        let header = FdtHeader::parse(&blob, 0).unwrap();
        assert_eq!(header.total_size(), blob.len() as u64);
        assert!(header.blocks_in_bounds());
    }

    #[test]
    fn test_string_table_dedup() {
        let mut builder = FdtBuilder::new();
        builder
            .begin_node("a")
            .prop_u32("data-size", 1)
            .end_node()
            .begin_node("b")
            .prop_u32("data-size", 2)
            .end_node();
        let blob = builder.build();
        let header = FdtHeader::parse(&blob, 0).unwrap();
        // "data-size\0" stored once.
        assert_eq!(header.size_dt_strings.get(), 10);
    }

    #[test]
    #[should_panic(expected = "unbalanced")]
    fn test_unbalanced_panics() {
        let mut builder = FdtBuilder::new();
        builder.begin_node("open");
        builder.build();
    }
}
