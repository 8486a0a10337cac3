//! [pewalk](https://crates.io/crates/pewalk) walks the tables of a Portable Executable image
//! without copying or allocating anything.
//!
//! The bytes are borrowed from the caller, either as a raw file read from disk
//! ([`PEType::Disk`](PEType::Disk)) or as an image already mapped by the loader
//! ([`PEType::Memory`](PEType::Memory)), in either the 32-bit or the 64-bit variant of
//! the format. Every accessor on [`Image`](Image) returns a lazy view that can be asked
//! whether its directory is present before being iterated.
//!
//! ```rust
//! use pewalk::{Arch, Image, PEType};
//!
//! fn dump(bytes: &[u8]) {
//!     let image = Image::open(bytes, PEType::Disk, Arch::X64);
//!
//!     if !image.is_valid() {
//!         return;
//!     }
//!
//!     for module in image.imports() {
//!         for function in module.functions() {
//!             println!("{:?}", function.thunk());
//!         }
//!     }
//! }
//! ```

pub mod exceptions;
pub mod exports;
pub mod headers;
pub mod image;
pub mod imports;
pub mod pe;
pub mod relocations;
pub mod section;
pub mod tls;
pub mod types;

pub use crate::exceptions::*;
pub use crate::exports::*;
pub use crate::headers::*;
pub use crate::image::*;
pub use crate::imports::*;
pub use crate::pe::*;
pub use crate::relocations::*;
pub use crate::section::*;
pub use crate::tls::*;
pub use crate::types::*;

#[cfg(test)]
mod tests;

use pkbuffer::Error as PKError;

use std::str::Utf8Error;

/// Errors produced while reading headers.
///
/// Absent directories and unresolvable addresses are not errors: the directory views report
/// them as `None` or as an empty sequence.
#[derive(Debug)]
pub enum Error {
    /// An error raised by the underlying [`pkbuffer`](pkbuffer) object, typically a read past its end.
    BufferError(PKError),
    /// The offset or size requested is out of bounds of the buffer. Contains the buffer
    /// length and the offending position.
    OutOfBounds(usize, usize),
    /// The DOS header does not start with `MZ`. Contains the signature found.
    InvalidDOSSignature(u16),
    /// The NT headers do not start with `PE\0\0`. Contains the signature found.
    InvalidPESignature(u32),
    /// The optional header magic is neither the 32-bit nor the 64-bit magic. Contains the magic found.
    InvalidNTSignature(u16),
    /// The [`RVA`](RVA) does not map into the buffer.
    InvalidRVA(RVA),
    /// The data directory table is too short to contain the requested entry.
    BadDirectory(ImageDirectoryEntry),
    /// No section contains the requested address.
    SectionNotFound,
    /// A string read from the image is not valid UTF-8.
    Utf8Error(Utf8Error),
}
impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BufferError(e) => write!(f, "buffer error: {:?}", e),
            Self::OutOfBounds(expected, got) => write!(f, "out of bounds: boundary is {:#x}, got {:#x}", expected, got),
            Self::InvalidDOSSignature(sig) => write!(f, "invalid DOS signature: {:#x}", sig),
            Self::InvalidPESignature(sig) => write!(f, "invalid PE signature: {:#x}", sig),
            Self::InvalidNTSignature(sig) => write!(f, "invalid NT signature: {:#x}", sig),
            Self::InvalidRVA(rva) => write!(f, "invalid RVA: {}", rva),
            Self::BadDirectory(dir) => write!(f, "bad directory: {:?}", dir),
            Self::SectionNotFound => write!(f, "section not found"),
            Self::Utf8Error(e) => write!(f, "UTF8 error: {}", e),
        }
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Utf8Error(ref e) => Some(e),
            _ => None,
        }
    }
}
impl From<PKError> for Error {
    fn from(err: PKError) -> Self {
        Self::BufferError(err)
    }
}
impl From<Utf8Error> for Error {
    fn from(err: Utf8Error) -> Self {
        Self::Utf8Error(err)
    }
}

/// Aligns a given `value` up to the boundary specified by `boundary`. A zero boundary leaves
/// the value untouched.
pub fn align(value: u64, boundary: u64) -> u64 {
    if boundary == 0 || value % boundary == 0 {
        value
    }
    else {
        value + (boundary - (value % boundary))
    }
}
