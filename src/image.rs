//! The [`Image`](Image) facade.

use std::slice;

use crate::Error;
use crate::exceptions::ExceptionTable;
use crate::exports::ExportDirectory;
use crate::headers::*;
use crate::imports::{DelayImportDirectory, ImportDirectory};
use crate::pe::{AddressSpace, PEType};
use crate::relocations::RelocationDirectory;
use crate::section::SectionTable;
use crate::tls::TLSCallbacks;
use crate::types::*;

/// A PE image borrowed from the caller.
///
/// Opening an image parses nothing. Call [`is_valid`](Image::is_valid) (or
/// [`validate`](Image::validate) for the reason) once before trusting the other accessors;
/// they do not repeat the signature checks.
#[derive(Clone, Debug)]
pub struct Image<'data> {
    space: AddressSpace<'data>,
}
impl<'data> Image<'data> {
    /// Wrap `data`, laid out as `pe_type`, with pointer-sized fields as wide as `arch` says.
    pub fn open(data: &'data [u8], pe_type: PEType, arch: Arch) -> Self {
        Self { space: AddressSpace::new(data, pe_type, arch) }
    }
    /// Wrap `data`, choosing the architecture from the optional header magic.
    pub fn detect(data: &'data [u8], pe_type: PEType) -> Result<Self, Error> {
        let probe = AddressSpace::new(data, pe_type, Arch::X86);
        probe.validate()?;

        let arch = Arch::from_magic(probe.get_nt_magic()?)?;

        Ok(Self::open(data, pe_type, arch))
    }
    /// Wrap a module the loader has mapped into the current process.
    ///
    /// # Safety
    ///
    /// `ptr` must point at `size` readable bytes that stay mapped and unmodified for `'data`.
    pub unsafe fn from_ptr(ptr: *const u8, size: usize, arch: Arch) -> Self {
        Self::open(slice::from_raw_parts(ptr, size), PEType::Memory, arch)
    }

    pub fn validate(&self) -> Result<(), Error> { self.space.validate() }
    pub fn is_valid(&self) -> bool { self.space.is_valid() }

    /// The address space every view of this image resolves through.
    pub fn address_space(&self) -> &AddressSpace<'data> { &self.space }
    pub fn get_type(&self) -> PEType { self.space.get_type() }
    pub fn get_arch(&self) -> Arch { self.space.get_arch() }

    pub fn dos_header(&self) -> Result<&ImageDOSHeader, Error> {
        self.space.get_dos_header()
    }
    pub fn nt_headers(&self) -> Result<NTHeaders, Error> {
        self.space.get_nt_headers()
    }
    pub fn image_base(&self) -> Result<u64, Error> {
        self.space.get_image_base()
    }
    pub fn data_directory(&self, dir: ImageDirectoryEntry) -> Result<&ImageDataDirectory, Error> {
        self.space.get_data_directory(dir)
    }
    /// The buffer offset of the entry point.
    pub fn entry_point(&self) -> Result<usize, Error> {
        let rva = self.space.get_entrypoint()?;
        self.space.translate(rva).ok_or(Error::InvalidRVA(rva))
    }

    pub fn sections(&self) -> SectionTable {
        SectionTable::parse(&self.space)
    }
    pub fn imports(&self) -> ImportDirectory {
        ImportDirectory::parse(&self.space)
    }
    pub fn delayed_imports(&self) -> DelayImportDirectory {
        DelayImportDirectory::parse(&self.space)
    }
    pub fn exports(&self) -> ExportDirectory {
        ExportDirectory::parse(&self.space)
    }
    pub fn relocations(&self) -> RelocationDirectory {
        RelocationDirectory::parse(&self.space)
    }
    pub fn exceptions(&self) -> ExceptionTable {
        ExceptionTable::parse(&self.space)
    }
    pub fn tls_callbacks(&self) -> TLSCallbacks {
        TLSCallbacks::parse(&self.space)
    }
}
