//! The base relocation table.
//!
//! Relocation blocks are not linked by pointer: each block starts where the previous one
//! ends, as given by its `size_of_block`. A block whose size or page address is zero ends
//! the chain.

use log::debug;

use std::mem;

use crate::headers::*;
use crate::pe::AddressSpace;
use crate::types::*;

/// The base relocation blocks of an image.
#[derive(Copy, Clone, Debug)]
pub struct RelocationDirectory<'a> {
    space: &'a AddressSpace<'a>,
    offset: Option<usize>,
}
impl<'a> RelocationDirectory<'a> {
    pub fn parse(space: &'a AddressSpace<'a>) -> Self {
        Self {
            space,
            offset: space.directory_offset(ImageDirectoryEntry::BaseReloc),
        }
    }

    pub fn is_present(&self) -> bool {
        self.offset.is_some()
    }
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
    pub fn iter(&self) -> RelocationBlockIter<'a> {
        RelocationBlockIter { space: self.space, offset: self.offset }
    }
}
impl<'a> IntoIterator for RelocationDirectory<'a> {
    type Item = RelocationBlock<'a>;
    type IntoIter = RelocationBlockIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct RelocationBlockIter<'a> {
    space: &'a AddressSpace<'a>,
    offset: Option<usize>,
}
impl<'a> RelocationBlockIter<'a> {
    fn parse_block(&self, offset: usize) -> Option<RelocationBlock<'a>> {
        let header_size = mem::size_of::<ImageBaseRelocation>();
        let base_relocation = self.space.get_ref::<ImageBaseRelocation>(offset).ok()?;
        let size = base_relocation.size_of_block as usize;

        if size == 0 || base_relocation.virtual_address.0 == 0 {
            return None;
        }

        if size < header_size {
            debug!("relocation block at {:#x} is smaller than its header", offset);
            return None;
        }

        let count = (size - header_size) / mem::size_of::<Relocation>();
        let relocations = match self.space.get_slice_ref::<Relocation>(offset + header_size, count) {
            Ok(r) => r,
            Err(e) => {
                debug!("relocation block at {:#x} runs past the buffer: {}", offset, e);
                return None;
            }
        };

        Some(RelocationBlock { base_relocation, relocations })
    }
}
impl<'a> Iterator for RelocationBlockIter<'a> {
    type Item = RelocationBlock<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.offset.take()?;
        let block = self.parse_block(offset)?;

        self.offset = offset.checked_add(block.size());

        Some(block)
    }
}

/// One page worth of fixups.
#[derive(Copy, Clone, Debug)]
pub struct RelocationBlock<'a> {
    pub base_relocation: &'a ImageBaseRelocation,
    pub relocations: &'a [Relocation],
}
impl<'a> RelocationBlock<'a> {
    /// The RVA of the page the fixups in this block apply to.
    pub fn page(&self) -> RVA {
        self.base_relocation.virtual_address
    }
    /// The size this block declares, header included.
    pub fn size(&self) -> usize {
        self.base_relocation.size_of_block as usize
    }
    /// The number of packed entries in this block.
    pub fn len(&self) -> usize {
        self.relocations.len()
    }
    pub fn is_empty(&self) -> bool {
        self.relocations.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = Fixup> + 'a {
        let page = self.page();
        let relocations = self.relocations;

        relocations.iter().map(move |&relocation| Fixup { page, relocation })
    }
}

/// One relocation entry, paired with the page it belongs to.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Fixup {
    pub page: RVA,
    pub relocation: Relocation,
}
impl Fixup {
    pub fn relocation_type(&self) -> ImageRelBased {
        self.relocation.get_type()
    }
    /// The offset of the fixup within its page.
    pub fn offset(&self) -> u16 {
        self.relocation.get_offset()
    }
    /// The RVA to patch: the page address plus the offset.
    pub fn rva(&self) -> RVA {
        self.relocation.get_address(self.page)
    }
    pub fn type_name(&self) -> &'static str {
        self.relocation_type().name()
    }
}
