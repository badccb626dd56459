//! External decompiler adapter.
//!
//! An alternate `NodePropertyReader` backed by the textual output of an
//! external device-tree decompiler (`dtc -I dtb -O dts`). Properties are
//! recovered from a fixed grammar: `name = <0xHEX>;` for integer cells,
//! `name = "text";` for strings, `name = [aa bb];` for byte lists and a
//! bare `name;` for boolean markers. Anything else on a line is skipped,
//! never fatal.
//!
//! The native token-stream parser in [`super::reader`] is the default
//! decoder; this adapter exists so the resolver can run against an external
//! decompiler when cross-checking its output.

use std::io::Write;
use std::process::{Command, Stdio};

use tracing::warn;

use crate::error::{Error, Result};

use super::node::{ContainerNode, NodePropertyReader};

/// A node parsed from decompiled source text.
#[derive(Debug, Clone)]
struct DtsNode {
    name: String,
    properties: Vec<(String, Vec<u8>)>,
    children: Vec<DtsNode>,
}

impl DtsNode {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            properties: Vec::new(),
            children: Vec::new(),
        }
    }

    fn child(&self, segment: &str) -> Option<&DtsNode> {
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

/// Reads nodes out of decompiled device-tree source text.
#[derive(Debug)]
pub struct DtsTextReader {
    root: DtsNode,
}

impl DtsTextReader {
    /// Parses decompiled source text.
    ///
    /// Parsing is line-oriented and defensive: lines that do not match the
    /// node/property grammar are skipped.
    pub fn parse(text: &str) -> Result<Self> {
        let mut stack: Vec<DtsNode> = Vec::new();
        let mut root: Option<DtsNode> = None;

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty()
                || line.starts_with("/dts-v1/")
                || line.starts_with("//")
                || line.starts_with("/*")
            {
                continue;
            }

            if let Some(name) = line.strip_suffix('{') {
                let name = name.trim();
                let name = if name == "/" { "" } else { name };
                stack.push(DtsNode::new(name));
            } else if line == "};" {
                let node = stack
                    .pop()
                    .ok_or_else(|| Error::parse(lineno, "unbalanced closing brace"))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            } else if let Some(stmt) = line.strip_suffix(';') {
                let Some(node) = stack.last_mut() else {
                    continue;
                };
                match stmt.split_once('=') {
                    Some((name, value)) => {
                        if let Some(bytes) = parse_value(value.trim()) {
                            node.properties.push((name.trim().to_string(), bytes));
                        }
                    }
                    None => node.properties.push((stmt.trim().to_string(), Vec::new())),
                }
            }
        }

        let root = root.ok_or_else(|| Error::parse(0, "decompiled source has no root node"))?;
        Ok(Self { root })
    }

    fn find(&self, path: &str) -> Option<(String, &DtsNode)> {
        let mut node = &self.root;
        let mut actual = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            node = node.child(segment)?;
            actual.push('/');
            actual.push_str(&node.name);
        }
        if actual.is_empty() {
            actual.push('/');
        }
        Some((actual, node))
    }
}

impl NodePropertyReader for DtsTextReader {
    fn node(&self, path: &str) -> Result<ContainerNode> {
        let (actual, node) = self.find(path).ok_or_else(|| Error::NodeNotFound {
            path: path.to_string(),
        })?;
        Ok(ContainerNode {
            path: actual,
            properties: node.properties.iter().cloned().collect(),
        })
    }

    fn children(&self, path: &str) -> Result<Vec<String>> {
        let (_, node) = self.find(path).ok_or_else(|| Error::NodeNotFound {
            path: path.to_string(),
        })?;
        Ok(node.children.iter().map(|c| c.name.clone()).collect())
    }
}

/// Decodes a property value expression to the bytes the container stored.
fn parse_value(value: &str) -> Option<Vec<u8>> {
    if let Some(cells) = value.strip_prefix('<').and_then(|v| v.strip_suffix('>')) {
        let mut bytes = Vec::new();
        for cell in cells.split_whitespace() {
            let parsed = match cell.strip_prefix("0x") {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => cell.parse::<u32>().ok()?,
            };
            bytes.extend_from_slice(&parsed.to_be_bytes());
        }
        return Some(bytes);
    }
    if let Some(text) = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        return Some(bytes);
    }
    if let Some(list) = value.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
        let mut bytes = Vec::new();
        for pair in list.split_whitespace() {
            bytes.push(u8::from_str_radix(pair, 16).ok()?);
        }
        return Some(bytes);
    }
    None
}

/// Runs an external decompiler over a container blob.
#[derive(Debug, Clone)]
pub struct DtcDecompiler {
    tool: String,
}

impl Default for DtcDecompiler {
    fn default() -> Self {
        Self { tool: "dtc".into() }
    }
}

impl DtcDecompiler {
    /// Uses a specific decompiler binary.
    pub fn with_tool(tool: impl Into<String>) -> Self {
        Self { tool: tool.into() }
    }

    /// Decompiles a raw container blob into an inspectable reader.
    ///
    /// Fails with `ToolUnavailable` only if the tool cannot run at all. A
    /// non-zero exit with partial output is downgraded to a warning and
    /// whatever was emitted is parsed.
    pub fn decompile(&self, blob: &[u8]) -> Result<DtsTextReader> {
        let mut child = Command::new(&self.tool)
            .args(["-I", "dtb", "-O", "dts", "-o", "-", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::ToolUnavailable {
                tool: self.tool.clone(),
                source: e,
            })?;

        child
            .stdin
            .take()
            .expect("stdin was piped")
            .write_all(blob)?;
        let output = child.wait_with_output()?;

        if !output.status.success() {
            warn!(
                tool = %self.tool,
                status = ?output.status.code(),
                "decompiler exited non-zero, using partial output"
            );
        }

        let text = String::from_utf8_lossy(&output.stdout);
        DtsTextReader::parse(&text)
    }
}
