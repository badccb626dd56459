//! Binwalk-backed signature scanner.
//!
//! Runs `binwalk` over the image and parses its line-oriented table
//! output:
//!
//! ```text
//! DECIMAL       HEXADECIMAL     DESCRIPTION
//! --------------------------------------------------------------------
//! 1994752       0x1E7000        device tree blob (dtb)
//! ```
//!
//! Parsing is defensive: any line whose first column is not a decimal
//! offset is skipped. A non-zero exit status with partial output is a
//! warning, not fatal — whatever was parsed is returned.

use std::path::Path;
use std::process::Command;

use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::{SignatureHit, SignatureScanner};

/// Scanner implementation shelling out to binwalk.
#[derive(Debug, Clone)]
pub struct BinwalkScanner {
    tool: String,
}

impl Default for BinwalkScanner {
    fn default() -> Self {
        Self {
            tool: "binwalk".into(),
        }
    }
}

impl BinwalkScanner {
    /// Uses a specific scanner binary.
    pub fn with_tool(tool: impl Into<String>) -> Self {
        Self { tool: tool.into() }
    }
}

impl SignatureScanner for BinwalkScanner {
    fn scan(&self, image_path: &Path) -> Result<Vec<SignatureHit>> {
        let output = Command::new(&self.tool)
            .arg(image_path)
            .output()
            .map_err(|e| Error::ToolUnavailable {
                tool: self.tool.clone(),
                source: e,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let hits = parse_scan_output(&stdout);

        if !output.status.success() {
            warn!(
                tool = %self.tool,
                status = ?output.status.code(),
                hits = hits.len(),
                "scanner exited non-zero, keeping partial output"
            );
        }
        debug!(hits = hits.len(), image = %image_path.display(), "signature scan complete");

        Ok(hits)
    }
}

/// Parses scanner table output into hits, ordered by ascending offset.
///
/// Lines not matching the numeric-offset-prefixed pattern (headers,
/// separators, diagnostics) are skipped.
pub fn parse_scan_output(text: &str) -> Vec<SignatureHit> {
    let mut hits: Vec<SignatureHit> = text.lines().filter_map(parse_scan_line).collect();
    hits.sort_by_key(|h| h.offset);
    hits
}

fn parse_scan_line(line: &str) -> Option<SignatureHit> {
    let mut fields = line.split_whitespace();
    let offset: u64 = fields.next()?.parse().ok()?;

    // Second column is the same offset in hex; tolerate its absence.
    let second = fields.next()?;
    let description = if second.starts_with("0x") || second.starts_with("0X") {
        fields.collect::<Vec<_>>().join(" ")
    } else {
        let mut rest = vec![second];
        rest.extend(fields);
        rest.join(" ")
    };

    if description.is_empty() {
        return None;
    }
    Some(SignatureHit::new(offset, description))
}
