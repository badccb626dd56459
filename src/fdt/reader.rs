//! Structured parser over the FDT token stream.
//!
//! Parses a container blob into a borrowed node tree by walking the
//! structure block tokens directly (`FDT_BEGIN_NODE` / `FDT_PROP` /
//! `FDT_END_NODE`). No external decompiler is involved; the tree borrows
//! from the input slice, so a multi-megabyte embedded payload property is
//! never copied during parsing.

use crate::error::{Error, Result};
use crate::util::{align_up, memchr_null, read_u32_be_at};

use super::node::{ContainerNode, NodePropertyReader};
use super::structs::{
    FdtHeader, FDT_BEGIN_NODE, FDT_END, FDT_END_NODE, FDT_NOP, FDT_PROP,
};

/// A parsed node in the container tree, borrowing from the input blob.
#[derive(Debug, Clone)]
pub struct FdtNode<'a> {
    /// Node name as written (unit address included, e.g. `kernel@1`)
    pub name: &'a str,
    /// Properties in stream order
    pub properties: Vec<(&'a str, &'a [u8])>,
    /// Child nodes in stream order
    pub children: Vec<FdtNode<'a>>,
}

impl<'a> FdtNode<'a> {
    fn new(name: &'a str) -> Self {
        Self {
            name,
            properties: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Finds a direct child matching `segment` exactly or by its name
    /// before the `@` unit-address.
    fn child(&self, segment: &str) -> Option<&FdtNode<'a>> {
        self.children
            .iter()
            .find(|c| c.name == segment)
            .or_else(|| {
                self.children
                    .iter()
                    .find(|c| c.name.split('@').next() == Some(segment))
            })
    }
}

/// A fully parsed FDT container.
///
/// Parsing is deterministic: identical input bytes always produce an
/// identical tree, and repeated `node()` calls return identical values.
#[derive(Debug)]
pub struct FdtReader<'a> {
    header: FdtHeader,
    root: FdtNode<'a>,
}

impl<'a> FdtReader<'a> {
    /// Parses a container blob.
    ///
    /// `data` must start with the FDT header; it may extend past the
    /// declared total size (the caller often hands over the rest of the
    /// image), but the structure and strings blocks must be in bounds.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let header = FdtHeader::parse(data, 0)?;

        let struct_start = header.off_dt_struct.get() as usize;
        let struct_end = struct_start + header.size_dt_struct.get() as usize;
        let strings_start = header.off_dt_strings.get() as usize;
        let strings_end = strings_start + header.size_dt_strings.get() as usize;

        if struct_end > data.len() || strings_end > data.len() {
            return Err(Error::parse(
                0,
                format!(
                    "container blocks exceed available data ({} bytes)",
                    data.len()
                ),
            ));
        }

        let strings = &data[strings_start..strings_end];
        let root = Self::parse_structure(data, struct_start, struct_end, strings)?;

        Ok(Self { header, root })
    }

    /// Returns the parsed header.
    #[inline]
    pub fn header(&self) -> &FdtHeader {
        &self.header
    }

    /// Returns the root node.
    #[inline]
    pub fn root(&self) -> &FdtNode<'a> {
        &self.root
    }

    /// Walks the token stream into a node tree.
    fn parse_structure(
        data: &'a [u8],
        start: usize,
        end: usize,
        strings: &'a [u8],
    ) -> Result<FdtNode<'a>> {
        let mut stack: Vec<FdtNode<'a>> = Vec::new();
        let mut root: Option<FdtNode<'a>> = None;
        let mut pos = start;

        loop {
            if pos + 4 > end {
                return Err(Error::parse(pos, "token stream ran past structure block"));
            }
            let token = read_u32_be_at(data, pos);
            pos += 4;

            match token {
                FDT_BEGIN_NODE => {
                    if root.is_some() {
                        return Err(Error::parse(pos - 4, "multiple root nodes"));
                    }
                    let name_bytes = &data[pos..end];
                    let name_len = memchr_null(name_bytes);
                    let name = std::str::from_utf8(&name_bytes[..name_len])
                        .map_err(|_| Error::parse(pos, "node name is not UTF-8"))?;
                    pos += align_up(name_len + 1, 4);
                    stack.push(FdtNode::new(name));
                }
                FDT_PROP => {
                    if pos + 8 > end {
                        return Err(Error::parse(pos, "truncated property token"));
                    }
                    let len = read_u32_be_at(data, pos) as usize;
                    let name_off = read_u32_be_at(data, pos + 4) as usize;
                    pos += 8;
                    if pos + len > end {
                        return Err(Error::parse(pos, "property value exceeds structure block"));
                    }
                    let value = &data[pos..pos + len];
                    pos += align_up(len, 4);

                    let name = Self::string_at(strings, name_off)?;
                    let node = stack
                        .last_mut()
                        .ok_or_else(|| Error::parse(pos, "property outside any node"))?;
                    node.properties.push((name, value));
                }
                FDT_END_NODE => {
                    let node = stack
                        .pop()
                        .ok_or_else(|| Error::parse(pos - 4, "unbalanced FDT_END_NODE"))?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => root = Some(node),
                    }
                }
                FDT_NOP => {}
                FDT_END => break,
                other => {
                    return Err(Error::parse(
                        pos - 4,
                        format!("unknown structure token {other:#x}"),
                    ));
                }
            }
        }

        if !stack.is_empty() {
            return Err(Error::parse(pos, "unterminated node at end of stream"));
        }
        root.ok_or_else(|| Error::parse(start, "structure block has no root node"))
    }

    /// Reads a NUL-terminated property name from the strings block.
    fn string_at(strings: &'a [u8], offset: usize) -> Result<&'a str> {
        if offset >= strings.len() {
            return Err(Error::parse(offset, "property name offset out of bounds"));
        }
        let bytes = &strings[offset..];
        let len = memchr_null(bytes);
        std::str::from_utf8(&bytes[..len])
            .map_err(|_| Error::parse(offset, "property name is not UTF-8"))
    }

    /// Descends the tree along `path`, returning the node and its actual
    /// full path (unit addresses included).
    fn find(&self, path: &str) -> Option<(String, &FdtNode<'a>)> {
        let mut node = &self.root;
        let mut actual = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            node = node.child(segment)?;
            actual.push('/');
            actual.push_str(node.name);
        }
        if actual.is_empty() {
            actual.push('/');
        }
        Some((actual, node))
    }
}

impl NodePropertyReader for FdtReader<'_> {
    fn node(&self, path: &str) -> Result<ContainerNode> {
        let (actual, node) = self.find(path).ok_or_else(|| Error::NodeNotFound {
            path: path.to_string(),
        })?;
        Ok(ContainerNode {
            path: actual,
            properties: node
                .properties
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_vec()))
                .collect(),
        })
    }

    fn children(&self, path: &str) -> Result<Vec<String>> {
        let (_, node) = self.find(path).ok_or_else(|| Error::NodeNotFound {
            path: path.to_string(),
        })?;
        Ok(node.children.iter().map(|c| c.name.to_string()).collect())
    }
}
