//! This module contains the address space every directory decoder reads through.
//!
//! An [`AddressSpace`](AddressSpace) borrows the caller's bytes together with two tags fixed
//! at construction: the [`PEType`](PEType) describing how the bytes are laid out and the
//! [`Arch`](Arch) deciding the width of pointer-sized fields. Nothing is parsed eagerly and
//! nothing is cached; every header and table is read on demand.

use byteorder::{ByteOrder, LittleEndian};

use log::{debug, trace};

use pkbuffer::PtrBuffer;
pub use pkbuffer::{Buffer, Castable};

use std::marker::PhantomData;
use std::mem;

use crate::{Error, headers::*, types::*};

/// An enum to tag the PE image with what its memory map looks like.
///
/// When a PE is loaded by Windows, its sections are moved to their virtual addresses before
/// being placed into memory. This means the image in memory is different from the disk. On a
/// [`Memory`](PEType::Memory) image an [`RVA`](RVA) is already a buffer offset, whereas on a
/// [`Disk`](PEType::Disk) image it must be translated through the section table.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PEType {
    /// A raw file, laid out the way it sits on disk.
    Disk,
    /// An image mapped by the loader, laid out the way it sits in memory.
    Memory,
}

/// A borrowed view of PE bytes that resolves [`RVA`](RVA)s into buffer offsets.
///
/// Every read is bounds-checked against the buffer, so a hostile or truncated image yields
/// `None` or an [`Error`](Error) instead of reading out of bounds. Header signatures are only
/// checked by [`validate`](AddressSpace::validate); the other accessors trust them.
#[derive(Clone, Debug)]
pub struct AddressSpace<'data> {
    pe_type: PEType,
    arch: Arch,
    buffer: PtrBuffer,
    _data: PhantomData<&'data [u8]>,
}

// SAFETY: the buffer only ever points at an immutable borrow and is never handed out mutably.
unsafe impl Send for AddressSpace<'_> {}
unsafe impl Sync for AddressSpace<'_> {}

impl<'data> AddressSpace<'data> {
    /// Create an address space over `data`. No parsing is performed.
    pub fn new(data: &'data [u8], pe_type: PEType, arch: Arch) -> Self {
        Self {
            pe_type,
            arch,
            buffer: PtrBuffer::new(data.as_ptr(), data.len()),
            _data: PhantomData,
        }
    }

    /// Get the [`PEType`](PEType) this address space was created with.
    pub fn get_type(&self) -> PEType { self.pe_type }
    /// Get the [`Arch`](Arch) this address space was created with.
    pub fn get_arch(&self) -> Arch { self.arch }

    pub fn len(&self) -> usize { self.buffer.len() }
    pub fn is_empty(&self) -> bool { self.buffer.len() == 0 }
    pub fn as_slice(&self) -> &[u8] { self.buffer.as_slice() }

    /// Get a reference to a [`Castable`](Castable) object at the given buffer offset.
    pub fn get_ref<T: Castable>(&self, offset: usize) -> Result<&T, Error> {
        let result = self.buffer.get_ref::<T>(offset)?;
        Ok(result)
    }
    /// Get a slice of `count` [`Castable`](Castable) objects at the given buffer offset.
    pub fn get_slice_ref<T: Castable>(&self, offset: usize, count: usize) -> Result<&[T], Error> {
        let result = self.buffer.get_slice_ref::<T>(offset, count)?;
        Ok(result)
    }
    /// Read `size` bytes at the given buffer offset.
    pub fn read(&self, offset: usize, size: usize) -> Result<&[u8], Error> {
        let result = self.buffer.read(offset, size)?;
        Ok(result)
    }
    /// Read a pointer-sized little-endian value at the given buffer offset. The width is
    /// decided by the [`Arch`](Arch) of this address space.
    pub fn get_pointer(&self, offset: usize) -> Result<u64, Error> {
        let bytes = self.read(offset, self.arch.pointer_size())?;

        match self.arch {
            Arch::X86 => Ok(LittleEndian::read_u32(bytes) as u64),
            Arch::X64 => Ok(LittleEndian::read_u64(bytes)),
        }
    }
    /// Get the zero-terminated C string at the given buffer offset, without its terminator.
    ///
    /// A string running off the end of the buffer is an error rather than a truncated result.
    pub fn get_cstring(&self, offset: usize) -> Result<&[CChar], Error> {
        let data = self.buffer.as_slice();

        if offset >= data.len() {
            return Err(Error::OutOfBounds(data.len(), offset));
        }

        let size = match data[offset..].iter().position(|&b| b == 0) {
            Some(s) => s,
            None => return Err(Error::OutOfBounds(data.len(), data.len() + 1)),
        };

        self.get_slice_ref::<CChar>(offset, size)
    }

    /// Get the DOS header without verifying its contents.
    pub fn get_dos_header(&self) -> Result<&ImageDOSHeader, Error> {
        self.get_ref::<ImageDOSHeader>(0)
    }
    /// Get the offset to the NT headers.
    pub fn e_lfanew(&self) -> Result<Offset, Error> {
        let header = self.get_dos_header()?;
        Ok(header.e_lfanew)
    }
    /// Get the NT headers matching the [`Arch`](Arch) of this address space, without
    /// verifying the signature or the optional header magic.
    pub fn get_nt_headers(&self) -> Result<NTHeaders, Error> {
        let offset: usize = self.e_lfanew()?.into();

        match self.arch {
            Arch::X86 => Ok(NTHeaders::NTHeaders32(self.get_ref::<ImageNTHeaders32>(offset)?)),
            Arch::X64 => Ok(NTHeaders::NTHeaders64(self.get_ref::<ImageNTHeaders64>(offset)?)),
        }
    }
    /// Read the optional header magic, regardless of the [`Arch`](Arch) of this address space.
    pub fn get_nt_magic(&self) -> Result<u16, Error> {
        let offset: usize = self.e_lfanew()?.into();
        let headers = self.get_ref::<ImageNTHeaders32>(offset)?;

        Ok(headers.optional_header.magic)
    }

    /// Check the DOS signature, then the NT signature at the offset the DOS header declares.
    ///
    /// Nothing else is verified: in particular the optional header magic is not compared
    /// against the [`Arch`](Arch) of this address space.
    pub fn validate(&self) -> Result<(), Error> {
        let dos_header = self.get_dos_header()?;
        let e_magic = dos_header.e_magic;

        if e_magic != DOS_SIGNATURE {
            return Err(Error::InvalidDOSSignature(e_magic));
        }

        let offset: usize = dos_header.e_lfanew.into();
        let signature = LittleEndian::read_u32(self.read(offset, mem::size_of::<u32>())?);

        if signature != NT_SIGNATURE {
            return Err(Error::InvalidPESignature(signature));
        }

        Ok(())
    }
    /// Check whether the headers carry valid DOS and NT signatures. See [`validate`](AddressSpace::validate).
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn get_image_base(&self) -> Result<u64, Error> {
        Ok(self.get_nt_headers()?.image_base())
    }
    pub fn get_entrypoint(&self) -> Result<RVA, Error> {
        Ok(self.get_nt_headers()?.entry_point())
    }
    pub fn get_file_alignment(&self) -> Result<u32, Error> {
        Ok(self.get_nt_headers()?.file_alignment())
    }

    /// The address virtual addresses in this image are relative to.
    ///
    /// For a [`Memory`](PEType::Memory) image this is the runtime address of the buffer itself,
    /// since the loader has already placed the image there. For a [`Disk`](PEType::Disk) image
    /// it is the preferred image base from the optional header.
    pub fn base_address(&self) -> Result<u64, Error> {
        match self.pe_type {
            PEType::Memory => Ok(self.buffer.as_ptr() as u64),
            PEType::Disk => self.get_image_base(),
        }
    }
    /// Reduce a virtual address to an [`RVA`](RVA) by subtracting [`base_address`](AddressSpace::base_address).
    pub fn va_to_rva(&self, va: u64) -> Option<RVA> {
        let base = self.base_address().ok()?;
        let rva = va.checked_sub(base)?;

        if rva > u32::MAX as u64 {
            trace!("virtual address {:#x} is too far from base {:#x}", va, base);
            return None;
        }

        Some(RVA(rva as u32))
    }

    /// Get the offset to the data directory table, which immediately follows the NT headers.
    pub fn get_data_directory_offset(&self) -> Result<usize, Error> {
        let e_lfanew: usize = self.e_lfanew()?.into();
        Ok(e_lfanew + self.arch.nt_headers_size())
    }
    /// Get the data directory table. Its length is
    /// [`number_of_rva_and_sizes`](ImageOptionalHeader32::number_of_rva_and_sizes), capped at
    /// sixteen entries, which is what the Windows loader does.
    pub fn get_data_directory_table(&self) -> Result<&[ImageDataDirectory], Error> {
        let offset = self.get_data_directory_offset()?;
        let sizes = self.get_nt_headers()?.number_of_rva_and_sizes() as usize;
        let count = sizes.min(DIRECTORY_ENTRIES);

        self.get_slice_ref::<ImageDataDirectory>(offset, count)
    }
    /// Get the data directory entry represented by the [`ImageDirectoryEntry`](ImageDirectoryEntry) enum.
    /// Returns [`Error::BadDirectory`](Error::BadDirectory) if the table is too short to contain it.
    pub fn get_data_directory(&self, dir: ImageDirectoryEntry) -> Result<&ImageDataDirectory, Error> {
        let directory_table = self.get_data_directory_table()?;
        let index = dir as usize;

        if index >= directory_table.len() {
            return Err(Error::BadDirectory(dir));
        }

        Ok(&directory_table[index])
    }
    /// Check whether the given data directory has a nonzero address and size.
    pub fn has_data_directory(&self, dir: ImageDirectoryEntry) -> bool {
        match self.get_data_directory(dir) {
            Ok(d) => d.is_present(),
            Err(_) => false,
        }
    }
    /// Get a data directory entry only if it is present, i.e. both its address and its size are nonzero.
    pub fn get_present_directory(&self, dir: ImageDirectoryEntry) -> Option<&ImageDataDirectory> {
        let directory = match self.get_data_directory(dir) {
            Ok(d) => d,
            Err(e) => {
                debug!("{:?} directory unavailable: {}", dir, e);
                return None;
            }
        };

        if !directory.is_present() {
            debug!("{:?} directory is absent", dir);
            return None;
        }

        Some(directory)
    }
    /// Translate the address of a present data directory into a buffer offset.
    pub fn directory_offset(&self, dir: ImageDirectoryEntry) -> Option<usize> {
        let directory = self.get_present_directory(dir)?;
        self.translate(directory.virtual_address)
    }
    /// Reinterpret the start of a data directory as `T`.
    ///
    /// Yields `None` when the directory is absent, when its address cannot be resolved, or
    /// when `T` would not fit in the buffer at the resolved location.
    pub fn cast_directory<T: Castable>(&self, dir: ImageDirectoryEntry) -> Option<&T> {
        let directory = self.get_present_directory(dir)?;
        self.cast_rva::<T>(directory.virtual_address)
    }

    /// Get the offset to the section table: past the signature, the file header and
    /// however many bytes the file header says the optional header occupies.
    pub fn get_section_table_offset(&self) -> Result<usize, Error> {
        let e_lfanew: usize = self.e_lfanew()?.into();
        let nt_headers = self.get_nt_headers()?;
        let size_of_optional = nt_headers.file_header().size_of_optional_header as usize;

        Ok(e_lfanew + mem::size_of::<u32>() + mem::size_of::<ImageFileHeader>() + size_of_optional)
    }
    /// Get the section table. Its length is the section count declared by the file header.
    pub fn get_section_table(&self) -> Result<&[ImageSectionHeader], Error> {
        let offset = self.get_section_table_offset()?;
        let sections = self.get_nt_headers()?.file_header().number_of_sections as usize;

        self.get_slice_ref::<ImageSectionHeader>(offset, sections)
    }
    /// Find the section whose raw data backs the given [`RVA`](RVA). See [`ImageSectionHeader::has_rva`].
    pub fn get_section_by_rva(&self, rva: RVA) -> Result<&ImageSectionHeader, Error> {
        let file_alignment = self.get_file_alignment()?;
        let section_table = self.get_section_table()?;

        section_table.iter()
            .find(|s| s.has_rva(rva, file_alignment))
            .ok_or(Error::SectionNotFound)
    }

    /// Translate an [`RVA`](RVA) into an offset into the buffer.
    ///
    /// On a [`Memory`](PEType::Memory) image the RVA is the offset, unconditionally. On a
    /// [`Disk`](PEType::Disk) image the section table is scanned for a section whose
    /// file-aligned raw range covers the RVA, and the RVA is rebased onto that section's
    /// raw data. `None` means no section covers it. The result is not checked against the
    /// buffer length; the typed reads do that.
    pub fn translate(&self, rva: RVA) -> Option<usize> {
        match self.pe_type {
            PEType::Memory => Some(rva.into()),
            PEType::Disk => match self.get_section_by_rva(rva) {
                Ok(section) => Some(section.rva_to_offset(rva) as usize),
                Err(e) => {
                    trace!("cannot translate rva {}: {}", rva, e);
                    None
                }
            },
        }
    }
    /// Translate an [`RVA`](RVA) and return the bytes from there to the end of the buffer.
    pub fn resolve(&self, rva: RVA) -> Option<&[u8]> {
        let offset = self.translate(rva)?;
        self.as_slice().get(offset..)
    }
    /// Translate an [`RVA`](RVA) and reinterpret the location as `T`.
    pub fn cast_rva<T: Castable>(&self, rva: RVA) -> Option<&T> {
        let offset = self.translate(rva)?;

        match self.get_ref::<T>(offset) {
            Ok(r) => Some(r),
            Err(e) => {
                trace!("rva {} resolved to {:#x}, which cannot be read: {}", rva, offset, e);
                None
            }
        }
    }
    /// Translate an [`RVA`](RVA) and reinterpret the location as `count` objects of type `T`.
    pub fn cast_rva_slice<T: Castable>(&self, rva: RVA, count: usize) -> Option<&[T]> {
        let offset = self.translate(rva)?;

        match self.get_slice_ref::<T>(offset, count) {
            Ok(r) => Some(r),
            Err(e) => {
                trace!("rva {} resolved to {:#x}, which cannot hold {} entries: {}", rva, offset, count, e);
                None
            }
        }
    }
    /// Translate an [`RVA`](RVA) and read the zero-terminated C string there.
    pub fn get_cstring_at(&self, rva: RVA) -> Option<&[CChar]> {
        let offset = self.translate(rva)?;

        match self.get_cstring(offset) {
            Ok(s) => Some(s),
            Err(e) => {
                trace!("no string at rva {}: {}", rva, e);
                None
            }
        }
    }
}
