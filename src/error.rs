//! Error types for the firmware extraction engine.
//!
//! Failures are split into two classes: fatal errors that abort the whole
//! run (the signature tool being unavailable), and component-scoped errors
//! that skip a single role/artifact while the pipeline continues.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for firmware container operations.
#[derive(Error, Debug)]
pub enum Error {
    // ==================== I/O Errors ====================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open file '{path}': {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to memory map file '{path}': {source}")]
    MemoryMap {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write output file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ==================== Scanner Errors ====================
    #[error("signature scanner '{tool}' cannot run: {source}")]
    ToolUnavailable {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    // ==================== Container Format Errors ====================
    #[error("bad container magic at offset {offset:#x}: expected 0xd00dfeed, got {found:#010x}")]
    BadMagic { offset: u64, found: u32 },

    #[error("container size {size:#x} at offset {offset:#x} out of bounds (max: {max:#x})")]
    SizeOutOfBounds { offset: u64, size: u64, max: u64 },

    #[error("node not found in container: {path}")]
    NodeNotFound { path: String },

    #[error("node '{node}' is missing required property '{name}'")]
    MissingProperty { node: String, name: String },

    #[error("no structurally valid wrapper container found at or after {search_start:#x}")]
    WrapperNotFound { search_start: u64 },

    // ==================== Extraction Errors ====================
    #[error(
        "truncated read at offset {offset:#x}: requested {requested} bytes, {available} available"
    )]
    TruncatedRead {
        offset: u64,
        requested: u64,
        available: u64,
    },

    #[error("gzip stream at offset {offset:#x} failed to decompress: {source}")]
    Decompression {
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    // ==================== Parse Errors ====================
    #[error("parse error at offset {offset:#x}: {reason}")]
    Parse { offset: usize, reason: String },
}

/// A specialized Result type for firmware container operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns true if this error must abort the whole run.
    ///
    /// Everything except a missing scanner tool is scoped to the single
    /// role/component that triggered it: the pipeline logs it, skips the
    /// artifact, and continues.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ToolUnavailable { .. })
    }

    /// Short machine-readable kind, used in the per-role status table
    /// (`failed:<kind>`).
    pub fn kind_str(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::FileOpen { .. } => "file-open",
            Error::MemoryMap { .. } => "memory-map",
            Error::FileWrite { .. } => "file-write",
            Error::ToolUnavailable { .. } => "tool-unavailable",
            Error::BadMagic { .. } => "bad-magic",
            Error::SizeOutOfBounds { .. } => "size-out-of-bounds",
            Error::NodeNotFound { .. } => "node-not-found",
            Error::MissingProperty { .. } => "missing-property",
            Error::WrapperNotFound { .. } => "wrapper-not-found",
            Error::TruncatedRead { .. } => "truncated-read",
            Error::Decompression { .. } => "decompression",
            Error::Parse { .. } => "parse",
        }
    }

    /// Creates a parse error with a formatted message.
    #[inline]
    pub fn parse(offset: usize, reason: impl Into<String>) -> Self {
        Error::Parse {
            offset,
            reason: reason.into(),
        }
    }
}
