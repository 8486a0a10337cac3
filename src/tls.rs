//! Thread-local storage callbacks.
//!
//! The TLS directory stores absolute virtual addresses rather than RVAs. They are reduced to
//! RVAs against [`AddressSpace::base_address`](AddressSpace::base_address) and then go through
//! the usual [`translate`](AddressSpace::translate), so a mapped image reads the pointers
//! as-is while a raw file rebases them from the preferred image base.

use log::trace;

use crate::headers::*;
use crate::pe::AddressSpace;
use crate::types::*;

/// Either a 32-bit or a 64-bit TLS directory.
#[derive(Copy, Clone, Debug)]
pub enum TLSDirectory<'a> {
    TLS32(&'a ImageTLSDirectory32),
    TLS64(&'a ImageTLSDirectory64),
}
impl<'a> TLSDirectory<'a> {
    fn parse(space: &'a AddressSpace<'a>) -> Option<Self> {
        match space.get_arch() {
            Arch::X86 => space.cast_directory::<ImageTLSDirectory32>(ImageDirectoryEntry::TLS).map(Self::TLS32),
            Arch::X64 => space.cast_directory::<ImageTLSDirectory64>(ImageDirectoryEntry::TLS).map(Self::TLS64),
        }
    }

    /// The virtual address of the null-terminated callback array.
    pub fn address_of_callbacks(&self) -> u64 {
        match self {
            Self::TLS32(t) => t.address_of_callbacks as u64,
            Self::TLS64(t) => t.address_of_callbacks,
        }
    }
    /// The virtual address of the slot receiving the TLS index.
    pub fn address_of_index(&self) -> u64 {
        match self {
            Self::TLS32(t) => t.address_of_index as u64,
            Self::TLS64(t) => t.address_of_index,
        }
    }
    /// The virtual address range of the TLS template data.
    pub fn raw_data(&self) -> (u64, u64) {
        match self {
            Self::TLS32(t) => (t.start_address_of_raw_data as u64, t.end_address_of_raw_data as u64),
            Self::TLS64(t) => (t.start_address_of_raw_data, t.end_address_of_raw_data),
        }
    }
    pub fn size_of_zero_fill(&self) -> u32 {
        match self {
            Self::TLS32(t) => t.size_of_zero_fill,
            Self::TLS64(t) => t.size_of_zero_fill,
        }
    }
}

/// The TLS callbacks of an image.
#[derive(Copy, Clone, Debug)]
pub struct TLSCallbacks<'a> {
    space: &'a AddressSpace<'a>,
    directory: Option<TLSDirectory<'a>>,
}
impl<'a> TLSCallbacks<'a> {
    pub fn parse(space: &'a AddressSpace<'a>) -> Self {
        Self { space, directory: TLSDirectory::parse(space) }
    }

    /// Whether the image has a TLS directory at a resolvable address.
    pub fn is_present(&self) -> bool {
        self.directory.is_some()
    }
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
    pub fn directory(&self) -> Option<TLSDirectory<'a>> {
        self.directory
    }

    pub fn iter(&self) -> TLSCallbackIter<'a> {
        let offset = self.directory
            .map(|d| d.address_of_callbacks())
            .filter(|&va| va != 0)
            .and_then(|va| self.space.va_to_rva(va))
            .and_then(|rva| self.space.translate(rva));

        TLSCallbackIter { space: self.space, offset }
    }
}
impl<'a> IntoIterator for TLSCallbacks<'a> {
    type Item = TLSCallback;
    type IntoIter = TLSCallbackIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Walks the callback array until its null entry.
pub struct TLSCallbackIter<'a> {
    space: &'a AddressSpace<'a>,
    offset: Option<usize>,
}
impl<'a> Iterator for TLSCallbackIter<'a> {
    type Item = TLSCallback;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.offset.take()?;

        let va = match self.space.get_pointer(offset) {
            Ok(0) => return None,
            Ok(v) => v,
            Err(e) => {
                trace!("tls callback slot at {:#x} cannot be read: {}", offset, e);
                return None;
            }
        };

        self.offset = Some(offset + self.space.get_arch().pointer_size());

        let rva = self.space.va_to_rva(va);
        let location = rva.and_then(|r| self.space.translate(r));

        Some(TLSCallback { va, rva, offset: location })
    }
}

/// One TLS callback.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct TLSCallback {
    /// The raw function pointer stored in the array.
    pub va: u64,
    /// The pointer reduced to an RVA, if it lies above the base address.
    pub rva: Option<RVA>,
    /// The buffer offset of the callback code, if it resolves.
    pub offset: Option<usize>,
}
