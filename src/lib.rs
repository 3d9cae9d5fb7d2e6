// Copyright © 2015-2018, Peter Atashian
//! A high performance Rust library used to read NX files with minimal memory usage.
//!
//! An NX archive is memory-mapped once via [`Archive::open`]; every lookup
//! after that walks the mapped bytes directly with no further allocation or
//! decoding, aside from on-demand LZ4 decompression of bitmap payloads via
//! [`Bitmap::data`].
//!
//! ```no_run
//! # fn main() -> Result<(), nx_archive::Error> {
//! let archive = unsafe { nx_archive::Archive::open("Map.nx")? };
//! let root = archive.root();
//! let info = root.child(b"info");
//! println!("{}", info.get_string());
//! # Ok(())
//! # }
//! ```

mod audio;
mod bitmap;
mod file;
mod node;
mod repr;

pub use audio::Audio;
pub use bitmap::Bitmap;
pub use file::{Archive, Error};
pub use node::{Children, Node, Type};
