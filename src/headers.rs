//! This module contains the raw structures consumed when walking a PE image.
//!
//! Objects taken directly from C are typically prefixed with "Image" and closely
//! resemble the names of their C counterparts, but are named to conform to Rust standards.
//! For example, ```IMAGE_DIRECTORY_ENTRY``` is known as [ImageDirectoryEntry](ImageDirectoryEntry) in
//! this library. Every structure is `#[repr(packed)]`, so fields must be copied out before
//! being borrowed.

use bitflags::bitflags;

use chrono::{DateTime, TimeZone, Utc};

use crate::types::*;
use crate::pe::Castable;

pub const DOS_SIGNATURE: u16 = 0x5A4D;
pub const NT_SIGNATURE: u32  = 0x00004550;

pub const HDR32_MAGIC: u16 = 0x010B;
pub const HDR64_MAGIC: u16 = 0x020B;

/// The number of slots in the data directory table.
pub const DIRECTORY_ENTRIES: usize = 16;

fn timestamp_to_utc(stamp: u32) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(stamp as i64, 0).single()
}

#[repr(packed)]
#[derive(Copy, Clone, Eq, PartialEq, Debug, Castable)]
pub struct ImageDOSHeader {
    pub e_magic: u16,
    pub e_cblp: u16,
    pub e_cp: u16,
    pub e_crlc: u16,
    pub e_cparhdr: u16,
    pub e_minalloc: u16,
    pub e_maxalloc: u16,
    pub e_ss: u16,
    pub e_sp: u16,
    pub e_csum: u16,
    pub e_ip: u16,
    pub e_cs: u16,
    pub e_lfarlc: u16,
    pub e_ovno: u16,
    pub e_res: [u16; 4],
    pub e_oemid: u16,
    pub e_oeminfo: u16,
    pub e_res2: [u16; 10],
    pub e_lfanew: Offset,
}

bitflags! {
    /// A bitflag structure representing file characteristics in the file header.
    pub struct FileCharacteristics: u16 {
        const RELOCS_STRIPPED         = 0x0001;
        const EXECUTABLE_IMAGE        = 0x0002;
        const LINE_NUMS_STRIPPED      = 0x0004;
        const LOCAL_SYMS_STRIPPED     = 0x0008;
        const AGGRESSIVE_WS_TRIM      = 0x0010;
        const LARGE_ADDRESS_AWARE     = 0x0020;
        const BYTES_REVERSED_LO       = 0x0080;
        const MACHINE_32BIT           = 0x0100;
        const DEBUG_STRIPPED          = 0x0200;
        const REMOVABLE_RUN_FROM_SWAP = 0x0400;
        const NET_RUN_FROM_SWAP       = 0x0800;
        const SYSTEM                  = 0x1000;
        const DLL                     = 0x2000;
        const UP_SYSTEM_ONLY          = 0x4000;
        const BYTES_REVERSED_HI       = 0x8000;
    }
}

#[repr(packed)]
#[derive(Copy, Clone, Eq, PartialEq, Debug, Castable)]
pub struct ImageFileHeader {
    pub machine: u16,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: Offset,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}
impl ImageFileHeader {
    /// Interpret [`time_date_stamp`](ImageFileHeader::time_date_stamp) as a UTC timestamp.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        timestamp_to_utc(self.time_date_stamp)
    }
    /// Get the file characteristics as bitflags. Unknown bits are dropped.
    pub fn flags(&self) -> FileCharacteristics {
        FileCharacteristics::from_bits_truncate(self.characteristics)
    }
}

#[repr(packed)]
#[derive(Copy, Clone, Eq, PartialEq, Debug, Castable)]
pub struct ImageOptionalHeader32 {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: RVA,
    pub base_of_code: RVA,
    pub base_of_data: RVA,
    pub image_base: u32,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub checksum: u32,
    pub subsystem: u16,
    pub dll_characteristics: u16,
    pub size_of_stack_reserve: u32,
    pub size_of_stack_commit: u32,
    pub size_of_heap_reserve: u32,
    pub size_of_heap_commit: u32,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
}

#[repr(packed)]
#[derive(Copy, Clone, Eq, PartialEq, Debug, Castable)]
pub struct ImageOptionalHeader64 {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: RVA,
    pub base_of_code: RVA,
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub checksum: u32,
    pub subsystem: u16,
    pub dll_characteristics: u16,
    pub size_of_stack_reserve: u64,
    pub size_of_stack_commit: u64,
    pub size_of_heap_reserve: u64,
    pub size_of_heap_commit: u64,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
}

/// The 32-bit NT headers. The data directory table follows immediately after.
#[repr(packed)]
#[derive(Copy, Clone, Eq, PartialEq, Debug, Castable)]
pub struct ImageNTHeaders32 {
    pub signature: u32,
    pub file_header: ImageFileHeader,
    pub optional_header: ImageOptionalHeader32,
}

/// The 64-bit NT headers. The data directory table follows immediately after.
#[repr(packed)]
#[derive(Copy, Clone, Eq, PartialEq, Debug, Castable)]
pub struct ImageNTHeaders64 {
    pub signature: u32,
    pub file_header: ImageFileHeader,
    pub optional_header: ImageOptionalHeader64,
}

bitflags! {
    /// A series of bitflags representing section characteristics.
    pub struct SectionCharacteristics: u32 {
        const TYPE_NO_PAD            = 0x00000008;
        const CNT_CODE               = 0x00000020;
        const CNT_INITIALIZED_DATA   = 0x00000040;
        const CNT_UNINITIALIZED_DATA = 0x00000080;
        const LNK_OTHER              = 0x00000100;
        const LNK_INFO               = 0x00000200;
        const LNK_REMOVE             = 0x00000800;
        const LNK_COMDAT             = 0x00001000;
        const GPREL                  = 0x00008000;
        const ALIGN_MASK             = 0x00F00000;
        const LNK_NRELOC_OVFL        = 0x01000000;
        const MEM_DISCARDABLE        = 0x02000000;
        const MEM_NOT_CACHED         = 0x04000000;
        const MEM_NOT_PAGED          = 0x08000000;
        const MEM_SHARED             = 0x10000000;
        const MEM_EXECUTE            = 0x20000000;
        const MEM_READ               = 0x40000000;
        const MEM_WRITE              = 0x80000000;
    }
}

#[repr(packed)]
#[derive(Copy, Clone, Eq, PartialEq, Debug, Castable)]
pub struct ImageSectionHeader {
    pub name: [CChar; 8],
    pub virtual_size: u32,
    pub virtual_address: RVA,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: Offset,
    pub pointer_to_relocations: Offset,
    pub pointer_to_linenumbers: Offset,
    pub number_of_relocations: u16,
    pub number_of_linenumbers: u16,
    pub characteristics: u32,
}
impl ImageSectionHeader {
    /// Get the name of this section as raw bytes. The name field is not required to be
    /// zero-terminated, so this stops at the first zero or after eight bytes.
    pub fn name_bytes(&self) -> &[u8] {
        let name = self.name.as_bytes();
        let end = name.iter().position(|&c| c == 0).unwrap_or(name.len());

        &name[..end]
    }
    /// Get the name of this section as a string. Names which are not UTF-8 yield an error.
    pub fn name(&self) -> Result<&str, crate::Error> {
        let name = std::str::from_utf8(self.name_bytes())?;
        Ok(name)
    }
    /// Get the section characteristics as bitflags.
    pub fn flags(&self) -> SectionCharacteristics {
        SectionCharacteristics::from_bits_truncate(self.characteristics)
    }
    pub fn is_readable(&self) -> bool {
        self.flags().contains(SectionCharacteristics::MEM_READ)
    }
    pub fn is_writable(&self) -> bool {
        self.flags().contains(SectionCharacteristics::MEM_WRITE)
    }
    pub fn is_executable(&self) -> bool {
        self.flags().contains(SectionCharacteristics::MEM_EXECUTE)
    }

    /// The size this section occupies on disk, rounded up to `file_alignment`.
    pub fn aligned_raw_size(&self, file_alignment: u32) -> u64 {
        crate::align(self.size_of_raw_data as u64, file_alignment as u64)
    }
    /// Check whether the given [`RVA`](RVA) is backed by this section's raw data.
    ///
    /// The range checked is `[virtual_address, virtual_address + align(size_of_raw_data, file_alignment))`,
    /// which is the range the raw file layout can actually resolve.
    pub fn has_rva(&self, rva: RVA, file_alignment: u32) -> bool {
        let start = self.virtual_address.0 as u64;
        let end = start + self.aligned_raw_size(file_alignment);
        let rva = rva.0 as u64;

        start <= rva && rva < end
    }
    /// Convert an [`RVA`](RVA) inside this section into a file [`Offset`](Offset). The RVA
    /// is not checked against the section bounds; see [`has_rva`](ImageSectionHeader::has_rva).
    pub fn rva_to_offset(&self, rva: RVA) -> u64 {
        (rva.0 as u64 - self.virtual_address.0 as u64) + self.pointer_to_raw_data.0 as u64
    }
}

/// The index of each slot in the data directory table.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ImageDirectoryEntry {
    Export         = 0,
    Import         = 1,
    Resource       = 2,
    Exception      = 3,
    Security       = 4,
    BaseReloc      = 5,
    Debug          = 6,
    Architecture   = 7,
    GlobalPTR      = 8,
    TLS            = 9,
    LoadConfig     = 10,
    BoundImport    = 11,
    IAT            = 12,
    DelayImport    = 13,
    COMDescriptor  = 14,
    Reserved       = 15,
}

#[repr(packed)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Debug, Castable)]
pub struct ImageDataDirectory {
    pub virtual_address: RVA,
    pub size: u32,
}
impl ImageDataDirectory {
    /// A directory is present only when both its address and its size are nonzero.
    pub fn is_present(&self) -> bool {
        self.virtual_address.0 != 0 && self.size != 0
    }
    /// Check whether `rva` lies strictly between the start and the end of this directory.
    pub fn strictly_contains(&self, rva: RVA) -> bool {
        let start = self.virtual_address.0 as u64;
        let end = start + self.size as u64;
        let rva = rva.0 as u64;

        start < rva && rva < end
    }
}

#[repr(packed)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Debug, Castable)]
pub struct ImageImportDescriptor {
    pub original_first_thunk: RVA,
    pub time_date_stamp: u32,
    pub forwarder_chain: u32,
    pub name: RVA,
    pub first_thunk: RVA,
}

#[repr(packed)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Debug, Castable)]
pub struct ImageDelayloadDescriptor {
    pub attributes: u32,
    pub dll_name_rva: RVA,
    pub module_handle_rva: RVA,
    pub import_address_table_rva: RVA,
    pub import_name_table_rva: RVA,
    pub bound_import_address_table_rva: RVA,
    pub unload_information_table_rva: RVA,
    pub time_date_stamp: u32,
}

#[repr(packed)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Debug, Castable)]
pub struct ImageExportDirectory {
    pub characteristics: u32,
    pub time_date_stamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub name: RVA,
    pub base: u32,
    pub number_of_functions: u32,
    pub number_of_names: u32,
    pub address_of_functions: RVA,
    pub address_of_names: RVA,
    pub address_of_name_ordinals: RVA,
}
impl ImageExportDirectory {
    /// Interpret [`time_date_stamp`](ImageExportDirectory::time_date_stamp) as a UTC timestamp.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        timestamp_to_utc(self.time_date_stamp)
    }
}

/// The header of one base relocation block. The packed [`Relocation`](Relocation) entries follow it.
#[repr(packed)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Debug, Castable)]
pub struct ImageBaseRelocation {
    pub virtual_address: RVA,
    pub size_of_block: u32,
}

/// The relocation type stored in the top four bits of a [`Relocation`](Relocation).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ImageRelBased {
    Absolute = 0,
    High = 1,
    Low = 2,
    HighLow = 3,
    HighAdj = 4,
    MachineSpecific5 = 5,
    Reserved = 6,
    MachineSpecific7 = 7,
    MachineSpecific8 = 8,
    MachineSpecific9 = 9,
    Dir64 = 10,
    Unknown,
}
impl ImageRelBased {
    /// The name used for this type by the platform headers, e.g. `IMAGE_REL_BASED_HIGHLOW`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Absolute => "IMAGE_REL_BASED_ABSOLUTE",
            Self::High => "IMAGE_REL_BASED_HIGH",
            Self::Low => "IMAGE_REL_BASED_LOW",
            Self::HighLow => "IMAGE_REL_BASED_HIGHLOW",
            Self::HighAdj => "IMAGE_REL_BASED_HIGHADJ",
            Self::MachineSpecific5 => "IMAGE_REL_BASED_MACHINE_SPECIFIC_5",
            Self::Reserved => "IMAGE_REL_BASED_RESERVED",
            Self::MachineSpecific7 => "IMAGE_REL_BASED_MACHINE_SPECIFIC_7",
            Self::MachineSpecific8 => "IMAGE_REL_BASED_MACHINE_SPECIFIC_8",
            Self::MachineSpecific9 => "IMAGE_REL_BASED_MACHINE_SPECIFIC_9",
            Self::Dir64 => "IMAGE_REL_BASED_DIR64",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// An x64 `RUNTIME_FUNCTION` record from the exception directory.
#[repr(packed)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Debug, Castable)]
pub struct ImageRuntimeFunction {
    pub begin_address: RVA,
    pub end_address: RVA,
    pub unwind_info: RVA,
}

#[repr(packed)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Debug, Castable)]
pub struct ImageTLSDirectory32 {
    pub start_address_of_raw_data: u32,
    pub end_address_of_raw_data: u32,
    pub address_of_index: u32,
    pub address_of_callbacks: u32,
    pub size_of_zero_fill: u32,
    pub characteristics: u32,
}

#[repr(packed)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Debug, Castable)]
pub struct ImageTLSDirectory64 {
    pub start_address_of_raw_data: u64,
    pub end_address_of_raw_data: u64,
    pub address_of_index: u64,
    pub address_of_callbacks: u64,
    pub size_of_zero_fill: u32,
    pub characteristics: u32,
}
