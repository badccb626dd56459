//! FDT/FIT container format handling.
//!
//! This module provides parsing for the flattened device tree binary
//! format that U-Boot FIT images are built on. A FIT container is an FDT
//! whose `images` node carries payload entries; each entry's
//! `data-position`/`data-size` property pair locates the payload relative
//! to the container's own start.
//!
//! Decoding goes through the [`NodePropertyReader`] capability trait with
//! two implementations: the native token-stream parser ([`FdtReader`],
//! the default) and an adapter over an external decompiler's textual
//! output ([`DtsTextReader`]).

mod builder;
mod dts;
mod node;
mod reader;
mod structs;

pub use builder::*;
pub use dts::*;
pub use node::*;
pub use reader::*;
pub use structs::*;
