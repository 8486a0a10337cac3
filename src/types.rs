//! This module contains Rust types to help with the parsing of PE files.

use std::slice;

use crate::Error;
use crate::headers::*;
use crate::pe::Castable;

/// Represents the architecture of the PE image.
///
/// The architecture decides the width of every pointer-sized field: thunks, TLS directory
/// addresses and TLS callback slots. It is chosen once per image and never mixed.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Arch {
    X86,
    X64,
}
impl Arch {
    /// Select the architecture matching an optional header magic value.
    pub fn from_magic(magic: u16) -> Result<Self, Error> {
        match magic {
            HDR32_MAGIC => Ok(Arch::X86),
            HDR64_MAGIC => Ok(Arch::X64),
            _ => Err(Error::InvalidNTSignature(magic)),
        }
    }
    /// The width in bytes of a pointer-sized field.
    pub fn pointer_size(&self) -> usize {
        match self {
            Arch::X86 => 4,
            Arch::X64 => 8,
        }
    }
    /// The bit marking a thunk as an import by ordinal.
    pub fn ordinal_flag(&self) -> u64 {
        match self {
            Arch::X86 => 0x80000000,
            Arch::X64 => 0x8000000000000000,
        }
    }
    /// The size of the NT headers for this architecture, not counting the data directory table.
    pub fn nt_headers_size(&self) -> usize {
        match self {
            Arch::X86 => std::mem::size_of::<ImageNTHeaders32>(),
            Arch::X64 => std::mem::size_of::<ImageNTHeaders64>(),
        }
    }
    /// The size of the TLS directory for this architecture.
    pub fn tls_directory_size(&self) -> usize {
        match self {
            Arch::X86 => std::mem::size_of::<ImageTLSDirectory32>(),
            Arch::X64 => std::mem::size_of::<ImageTLSDirectory64>(),
        }
    }
}

/// Represents a C-style character unit. Basically a wrapper for ```u8```.
#[repr(packed)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Debug, Castable)]
pub struct CChar(pub u8);

/// Syntactic sugar to get functionality out of C-char referenced slices.
pub trait CCharString {
    /// Get the zero-terminated representation of this string, or ```None``` if it is not zero-terminated.
    fn zero_terminated(&self) -> Option<&Self>;
    /// Get the raw bytes of the string, up to the first zero if there is one.
    fn as_bytes(&self) -> &[u8];
    /// Get the string slice as a ```&str```.
    fn as_str(&self) -> Result<&str, Error>;
}
impl CCharString for [CChar] {
    fn zero_terminated(&self) -> Option<&Self> {
        self.iter()
            .position(|&CChar(x)| x == 0)
            .map(|p| &self[..p])
    }
    fn as_bytes(&self) -> &[u8] {
        let cstr = self.zero_terminated().unwrap_or(self);

        // SAFETY: CChar is a packed single-byte wrapper, so the layouts match.
        unsafe { slice::from_raw_parts(cstr.as_ptr() as *const u8, cstr.len()) }
    }
    fn as_str(&self) -> Result<&str, Error> {
        let result = std::str::from_utf8(self.as_bytes())?;
        Ok(result)
    }
}

/// Represents a file offset in the image. This typically represents an address of the file on disk versus the file in memory.
#[repr(packed)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Debug, Castable)]
pub struct Offset(pub u32);
impl From<Offset> for usize {
    fn from(offset: Offset) -> usize {
        offset.0 as usize
    }
}

/// Represents a relative virtual address (i.e., RVA). This address is relative to the image base
/// and typically points to data in memory versus data on disk.
#[repr(packed)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Debug, Castable)]
pub struct RVA(pub u32);
impl From<RVA> for usize {
    fn from(rva: RVA) -> usize {
        rva.0 as usize
    }
}
impl std::fmt::Display for RVA {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = self.0;
        write!(f, "{:#x}", value)
    }
}

/// Represents either a 32-bit or 64-bit NT header.
#[derive(Copy, Clone, Debug)]
pub enum NTHeaders<'data> {
    NTHeaders32(&'data ImageNTHeaders32),
    NTHeaders64(&'data ImageNTHeaders64),
}
impl<'data> NTHeaders<'data> {
    pub fn signature(&self) -> u32 {
        match self {
            Self::NTHeaders32(h) => h.signature,
            Self::NTHeaders64(h) => h.signature,
        }
    }
    pub fn file_header(&self) -> &'data ImageFileHeader {
        match *self {
            Self::NTHeaders32(h) => &h.file_header,
            Self::NTHeaders64(h) => &h.file_header,
        }
    }
    pub fn image_base(&self) -> u64 {
        match self {
            Self::NTHeaders32(h) => h.optional_header.image_base as u64,
            Self::NTHeaders64(h) => h.optional_header.image_base,
        }
    }
    pub fn entry_point(&self) -> RVA {
        match self {
            Self::NTHeaders32(h) => h.optional_header.address_of_entry_point,
            Self::NTHeaders64(h) => h.optional_header.address_of_entry_point,
        }
    }
    pub fn file_alignment(&self) -> u32 {
        match self {
            Self::NTHeaders32(h) => h.optional_header.file_alignment,
            Self::NTHeaders64(h) => h.optional_header.file_alignment,
        }
    }
    pub fn number_of_rva_and_sizes(&self) -> u32 {
        match self {
            Self::NTHeaders32(h) => h.optional_header.number_of_rva_and_sizes,
            Self::NTHeaders64(h) => h.optional_header.number_of_rva_and_sizes,
        }
    }
}

/// An enum representing thunk data for imports and exports.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ThunkData {
    /// An export whose address points back into the export directory, i.e. a `module.function` string.
    ForwarderString(RVA),
    /// An export pointing at code or data in the module.
    Function(RVA),
    /// An import pointing at an [`ImageImportByName`](ImageImportByName) record.
    ImportByName(RVA),
    /// An import by ordinal.
    Ordinal(u16),
}
impl ThunkData {
    /// Decode a raw lookup-table entry as an import thunk.
    ///
    /// The top bit of the pointer-sized value marks an ordinal import, in which case the
    /// ordinal is the low 16 bits. Otherwise the low 31 bits are the RVA of the name record.
    pub fn parse_import(raw: u64, arch: Arch) -> Self {
        if raw & arch.ordinal_flag() != 0 {
            ThunkData::Ordinal((raw & 0xFFFF) as u16)
        }
        else {
            ThunkData::ImportByName(RVA((raw & 0x7FFFFFFF) as u32))
        }
    }
    /// Decode an entry of the export address table. `directory` is the export data directory:
    /// an address strictly inside its range is a forwarder string rather than a function.
    pub fn parse_export(rva: RVA, directory: &ImageDataDirectory) -> Self {
        if directory.strictly_contains(rva) {
            ThunkData::ForwarderString(rva)
        }
        else {
            ThunkData::Function(rva)
        }
    }
    pub fn is_ordinal(&self) -> bool {
        matches!(self, ThunkData::Ordinal(_))
    }
}

/// A hint/name record referenced by an import thunk.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct ImageImportByName<'data> {
    pub hint: u16,
    pub name: &'data [CChar],
}

/// Represents a unit of a relocation, which contains a type and an offset in a ```u16``` value.
#[repr(packed)]
#[derive(Copy, Clone, Eq, PartialEq, Debug, Castable)]
pub struct Relocation(pub u16);
impl Relocation {
    /// Get the type of this relocation from the top four bits.
    pub fn get_type(&self) -> ImageRelBased {
        match self.0 >> 12 {
            0 => ImageRelBased::Absolute,
            1 => ImageRelBased::High,
            2 => ImageRelBased::Low,
            3 => ImageRelBased::HighLow,
            4 => ImageRelBased::HighAdj,
            5 => ImageRelBased::MachineSpecific5,
            6 => ImageRelBased::Reserved,
            7 => ImageRelBased::MachineSpecific7,
            8 => ImageRelBased::MachineSpecific8,
            9 => ImageRelBased::MachineSpecific9,
            10 => ImageRelBased::Dir64,
            _ => ImageRelBased::Unknown,
        }
    }
    /// Get the page-relative offset of this relocation from the low twelve bits.
    pub fn get_offset(&self) -> u16 {
        self.0 & 0xFFF
    }
    /// Get the address that this relocation points to.
    pub fn get_address(&self, base: RVA) -> RVA {
        RVA(base.0.wrapping_add(self.get_offset() as u32))
    }
}
