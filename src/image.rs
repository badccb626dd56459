//! Read-only firmware image handling.
//!
//! The image is memory-mapped once and shared read-only by every stage of
//! the pipeline. All access goes through bounds-checked slice reads; a read
//! that runs past the end of the file is a hard `TruncatedRead` error, never
//! a silent short read.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::error::{Error, Result};

/// An immutable, memory-mapped firmware image.
///
/// Safe for concurrent readers: every read is positional (offset + length),
/// so there is no shared cursor state to race on.
#[derive(Debug)]
pub struct FirmwareImage {
    /// Memory-mapped file data
    mmap: Mmap,
    /// Logical image length (the anonymous mapping backing an in-memory
    /// image may be padded to a non-zero allocation size)
    len: u64,
    /// Path to the image file
    path: PathBuf,
}

impl FirmwareImage {
    /// Opens a firmware image read-only and maps it into memory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = File::open(&path).map_err(|e| Error::FileOpen {
            path: path.clone(),
            source: e,
        })?;

        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::MemoryMap {
            path: path.clone(),
            source: e,
        })?;

        let len = mmap.len() as u64;
        Ok(Self { mmap, len, path })
    }

    /// Creates an image backed by an anonymous mapping over the given bytes.
    ///
    /// Intended for synthetic images in tests and for callers that already
    /// hold the firmware in memory.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut mmap = memmap2::MmapOptions::new()
            .len(bytes.len().max(1))
            .map_anon()?;
        mmap[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            mmap: mmap.make_read_only()?,
            len: bytes.len() as u64,
            path: PathBuf::from("<memory>"),
        })
    }

    /// Returns the total length of the image in bytes.
    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if the image is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the path the image was opened from.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns exactly `len` bytes starting at `offset`.
    ///
    /// Fails with `TruncatedRead` if fewer bytes remain than requested.
    pub fn read_at(&self, offset: u64, len: u64) -> Result<&[u8]> {
        let end = offset.checked_add(len).ok_or(Error::TruncatedRead {
            offset,
            requested: len,
            available: 0,
        })?;
        if end > self.len() {
            return Err(Error::TruncatedRead {
                offset,
                requested: len,
                available: self.len().saturating_sub(offset),
            });
        }
        Ok(&self.mmap[offset as usize..end as usize])
    }

    /// Returns all bytes from `offset` to the end of the image.
    pub fn read_from(&self, offset: u64) -> Result<&[u8]> {
        if offset > self.len() {
            return Err(Error::TruncatedRead {
                offset,
                requested: 0,
                available: 0,
            });
        }
        Ok(&self.mmap[offset as usize..self.len as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_at_exact() {
        let image = FirmwareImage::from_bytes(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(image.len(), 8);
        assert_eq!(image.read_at(2, 4).unwrap(), &[3, 4, 5, 6]);
        assert_eq!(image.read_at(0, 8).unwrap().len(), 8);
    }

    #[test]
    fn test_read_at_truncated() {
        let image = FirmwareImage::from_bytes(&[0u8; 16]).unwrap();
        let err = image.read_at(8, 16).unwrap_err();
        match err {
            Error::TruncatedRead {
                offset,
                requested,
                available,
            } => {
                assert_eq!(offset, 8);
                assert_eq!(requested, 16);
                assert_eq!(available, 8);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_read_at_offset_past_end() {
        let image = FirmwareImage::from_bytes(&[0u8; 4]).unwrap();
        assert!(image.read_at(100, 1).is_err());
        assert!(image.read_at(u64::MAX, 1).is_err());
    }

    #[test]
    fn test_read_from() {
        let image = FirmwareImage::from_bytes(&[9, 8, 7, 6]).unwrap();
        assert_eq!(image.read_from(2).unwrap(), &[7, 6]);
        assert_eq!(image.read_from(4).unwrap().len(), 0);
        assert!(image.read_from(5).is_err());
    }
}
