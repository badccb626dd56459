//! Resolved container nodes and the decoder capability interface.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::util::read_u32_be;

use super::structs::{PROP_DATA_POSITION, PROP_DATA_SIZE};

/// A node resolved from a container, with its properties materialized.
///
/// Property values are raw bytes as stored in the container; typed
/// accessors decode the integer-cell and string encodings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerNode {
    /// Full path of the node within its container (e.g. `/images/kernel@1`)
    pub path: String,
    /// Property name → raw value bytes
    pub properties: BTreeMap<String, Vec<u8>>,
}

impl ContainerNode {
    /// Returns the raw bytes of a property, if present.
    #[inline]
    pub fn prop(&self, name: &str) -> Option<&[u8]> {
        self.properties.get(name).map(|v| v.as_slice())
    }

    /// Decodes a property as a single big-endian u32 cell.
    pub fn prop_u32(&self, name: &str) -> Option<u32> {
        let value = self.prop(name)?;
        if value.len() < 4 {
            return None;
        }
        Some(read_u32_be(value))
    }

    /// Decodes a property as a NUL-terminated string.
    pub fn prop_str(&self, name: &str) -> Option<&str> {
        let value = self.prop(name)?;
        let value = value.strip_suffix(&[0]).unwrap_or(value);
        std::str::from_utf8(value).ok()
    }

    /// Returns the payload offset relative to the container's own start.
    pub fn data_position(&self) -> Result<u64> {
        self.prop_u32(PROP_DATA_POSITION)
            .map(u64::from)
            .ok_or_else(|| Error::MissingProperty {
                node: self.path.clone(),
                name: PROP_DATA_POSITION.into(),
            })
    }

    /// Returns the payload length in bytes.
    pub fn data_size(&self) -> Result<u64> {
        self.prop_u32(PROP_DATA_SIZE)
            .map(u64::from)
            .ok_or_else(|| Error::MissingProperty {
                node: self.path.clone(),
                name: PROP_DATA_SIZE.into(),
            })
    }
}

/// Capability interface for reading nodes out of a decoded container.
///
/// The resolver only ever talks to this trait, so the native token-stream
/// parser and any external decompiler adapter are interchangeable.
pub trait NodePropertyReader {
    /// Resolves a slash-separated path to a node.
    ///
    /// A path segment matches a node either exactly or by its name before
    /// the `@` unit-address (so `images/kernel` resolves `kernel@1`).
    /// Fails with `NodeNotFound` if any segment is absent.
    fn node(&self, path: &str) -> Result<ContainerNode>;

    /// Lists the child node names of the node at `path`.
    fn children(&self, path: &str) -> Result<Vec<String>>;

    /// Returns true if `path` resolves to a node.
    fn has_node(&self, path: &str) -> bool {
        self.node(path).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_with(props: &[(&str, &[u8])]) -> ContainerNode {
        ContainerNode {
            path: "/images/kernel@1".into(),
            properties: props
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_vec()))
                .collect(),
        }
    }

    #[test]
    fn test_prop_u32() {
        let node = node_with(&[("data-position", &[0x00, 0x00, 0x00, 0x40])]);
        assert_eq!(node.prop_u32("data-position"), Some(0x40));
        assert_eq!(node.prop_u32("data-size"), None);
    }

    #[test]
    fn test_prop_str_trims_nul() {
        let node = node_with(&[("type", b"kernel\0")]);
        assert_eq!(node.prop_str("type"), Some("kernel"));
    }

    #[test]
    fn test_data_pair_missing() {
        let node = node_with(&[]);
        match node.data_position().unwrap_err() {
            Error::MissingProperty { node, name } => {
                assert_eq!(node, "/images/kernel@1");
                assert_eq!(name, "data-position");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_short_cell_rejected() {
        let node = node_with(&[("data-size", &[0x01, 0x02])]);
        assert!(node.data_size().is_err());
    }
}
