//! Import and delay-load import tables.
//!
//! Both tables are arrays of module descriptors ended by a sentinel row, where every module
//! points at a lookup table (ILT) and an address table (IAT) of pointer-sized thunks. The
//! tables differ only in descriptor layout and sentinel test, which the
//! [`ImportDescriptor`](ImportDescriptor) trait abstracts so a single walker serves both.

use byteorder::{ByteOrder, LittleEndian};

use log::trace;

use std::marker::PhantomData;
use std::mem;

use crate::headers::*;
use crate::pe::{AddressSpace, Castable};
use crate::types::*;

/// A module descriptor in an import-style table.
pub trait ImportDescriptor: Castable {
    /// The data directory holding the table of these descriptors.
    const DIRECTORY: ImageDirectoryEntry;

    /// Whether this descriptor is the row terminating the table.
    fn is_sentinel(&self) -> bool;
    /// The RVA of the module name.
    fn name_rva(&self) -> RVA;
    /// The RVA of the import lookup table (ILT).
    fn lookup_table_rva(&self) -> RVA;
    /// The RVA of the import address table (IAT).
    fn address_table_rva(&self) -> RVA;
}
impl ImportDescriptor for ImageImportDescriptor {
    const DIRECTORY: ImageDirectoryEntry = ImageDirectoryEntry::Import;

    /// The import table ends with a row of zeroes.
    fn is_sentinel(&self) -> bool {
        *self == Self::default()
    }
    fn name_rva(&self) -> RVA { self.name }
    fn lookup_table_rva(&self) -> RVA { self.original_first_thunk }
    fn address_table_rva(&self) -> RVA { self.first_thunk }
}
impl ImportDescriptor for ImageDelayloadDescriptor {
    const DIRECTORY: ImageDirectoryEntry = ImageDirectoryEntry::DelayImport;

    /// The delay-load table ends with a row whose DLL name is zero.
    fn is_sentinel(&self) -> bool {
        self.dll_name_rva.0 == 0
    }
    fn name_rva(&self) -> RVA { self.dll_name_rva }
    fn lookup_table_rva(&self) -> RVA { self.import_name_table_rva }
    fn address_table_rva(&self) -> RVA { self.import_address_table_rva }
}

/// The table of modules imported by an image, generic over the descriptor layout.
pub struct ImportTable<'a, D: ImportDescriptor> {
    space: &'a AddressSpace<'a>,
    offset: Option<usize>,
    _descriptor: PhantomData<&'a D>,
}

/// The ordinary import table.
pub type ImportDirectory<'a> = ImportTable<'a, ImageImportDescriptor>;
/// The delay-load import table.
pub type DelayImportDirectory<'a> = ImportTable<'a, ImageDelayloadDescriptor>;

impl<'a, D: ImportDescriptor> ImportTable<'a, D> {
    pub fn parse(space: &'a AddressSpace<'a>) -> Self {
        Self {
            space,
            offset: space.directory_offset(D::DIRECTORY),
            _descriptor: PhantomData,
        }
    }

    /// Whether the image has this directory at a resolvable address.
    pub fn is_present(&self) -> bool {
        self.offset.is_some()
    }
    /// Whether the table yields no modules, either because it is absent or because
    /// its first row is already the sentinel.
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn iter(&self) -> ImportModuleIter<'a, D> {
        ImportModuleIter {
            space: self.space,
            offset: self.offset,
            _descriptor: PhantomData,
        }
    }
    /// Find the first module whose name matches `name`, ignoring ASCII case as the loader does.
    pub fn by_name(&self, name: &str) -> Option<ImportModule<'a, D>> {
        self.iter().find(|m| match m.name() {
            Some(n) => n.as_bytes().eq_ignore_ascii_case(name.as_bytes()),
            None => false,
        })
    }
}
impl<'a, D: ImportDescriptor> Clone for ImportTable<'a, D> {
    fn clone(&self) -> Self { *self }
}
impl<'a, D: ImportDescriptor> Copy for ImportTable<'a, D> {}
impl<'a, D: ImportDescriptor> IntoIterator for ImportTable<'a, D> {
    type Item = ImportModule<'a, D>;
    type IntoIter = ImportModuleIter<'a, D>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Walks the module descriptors until the sentinel row, or until a descriptor cannot be read.
pub struct ImportModuleIter<'a, D: ImportDescriptor> {
    space: &'a AddressSpace<'a>,
    offset: Option<usize>,
    _descriptor: PhantomData<&'a D>,
}
impl<'a, D: ImportDescriptor> Iterator for ImportModuleIter<'a, D> {
    type Item = ImportModule<'a, D>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.offset?;

        let descriptor = match self.space.get_ref::<D>(offset) {
            Ok(d) => d,
            Err(e) => {
                trace!("import descriptor at {:#x} cannot be read: {}", offset, e);
                self.offset = None;
                return None;
            }
        };

        if descriptor.is_sentinel() {
            self.offset = None;
            return None;
        }

        self.offset = Some(offset + mem::size_of::<D>());

        Some(ImportModule { space: self.space, descriptor })
    }
}

/// One imported module.
pub struct ImportModule<'a, D: ImportDescriptor> {
    space: &'a AddressSpace<'a>,
    descriptor: &'a D,
}
impl<'a, D: ImportDescriptor> ImportModule<'a, D> {
    /// The raw descriptor of this module.
    pub fn descriptor(&self) -> &'a D {
        self.descriptor
    }
    /// The name of the module, or `None` if its RVA cannot be resolved.
    pub fn name(&self) -> Option<&'a [CChar]> {
        self.space.get_cstring_at(self.descriptor.name_rva())
    }
    /// The functions imported from this module.
    ///
    /// The lookup table drives the walk. Images whose lookup table RVA is zero are walked
    /// through the address table instead, which holds the same thunks before binding.
    pub fn functions(&self) -> ImportFunctionIter<'a> {
        let iat = self.descriptor.address_table_rva();
        let mut ilt = self.descriptor.lookup_table_rva();

        if ilt.0 == 0 {
            ilt = iat;
        }

        ImportFunctionIter {
            space: self.space,
            lookup: self.space.translate(ilt),
            address_table: iat,
            index: 0,
        }
    }
}
impl<'a, D: ImportDescriptor> Clone for ImportModule<'a, D> {
    fn clone(&self) -> Self { *self }
}
impl<'a, D: ImportDescriptor> Copy for ImportModule<'a, D> {}

/// Walks a module's lookup and address tables in lock-step until the lookup entry is zero.
pub struct ImportFunctionIter<'a> {
    space: &'a AddressSpace<'a>,
    lookup: Option<usize>,
    address_table: RVA,
    index: usize,
}
impl<'a> Iterator for ImportFunctionIter<'a> {
    type Item = ImportedFunction<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let lookup = self.lookup?;
        let pointer_size = self.space.get_arch().pointer_size();
        let offset = lookup + self.index * pointer_size;

        let raw = match self.space.get_pointer(offset) {
            Ok(0) => { self.lookup = None; return None; },
            Ok(v) => v,
            Err(e) => {
                trace!("thunk at {:#x} cannot be read: {}", offset, e);
                self.lookup = None;
                return None;
            }
        };

        let base = self.address_table.0;
        let slot = match base {
            0 => None,
            _ => Some(RVA(base.wrapping_add((self.index * pointer_size) as u32))),
        };

        let function = ImportedFunction {
            space: self.space,
            index: self.index,
            thunk: ThunkData::parse_import(raw, self.space.get_arch()),
            slot,
        };

        self.index += 1;

        Some(function)
    }
}

/// One imported function.
#[derive(Copy, Clone, Debug)]
pub struct ImportedFunction<'a> {
    space: &'a AddressSpace<'a>,
    index: usize,
    thunk: ThunkData,
    slot: Option<RVA>,
}
impl<'a> ImportedFunction<'a> {
    /// The position of this function within its module's tables.
    pub fn index(&self) -> usize { self.index }
    /// The decoded lookup table entry.
    pub fn thunk(&self) -> ThunkData { self.thunk }
    pub fn is_ordinal(&self) -> bool { self.thunk.is_ordinal() }

    /// The ordinal this function is imported by, if it is imported by ordinal.
    pub fn ordinal(&self) -> Option<u16> {
        match self.thunk {
            ThunkData::Ordinal(o) => Some(o),
            _ => None,
        }
    }
    /// The hint/name record this function is imported by. `None` for ordinal imports and
    /// for names whose RVA cannot be resolved.
    pub fn import_by_name(&self) -> Option<ImageImportByName<'a>> {
        let rva = match self.thunk {
            ThunkData::ImportByName(r) => r,
            _ => return None,
        };

        let offset = self.space.translate(rva)?;
        let hint = match self.space.read(offset, mem::size_of::<u16>()) {
            Ok(h) => LittleEndian::read_u16(h),
            Err(e) => {
                trace!("hint at rva {} cannot be read: {}", rva, e);
                return None;
            }
        };
        let name = self.space.get_cstring(offset + mem::size_of::<u16>()).ok()?;

        Some(ImageImportByName { hint, name })
    }
    pub fn name(&self) -> Option<&'a [CChar]> {
        self.import_by_name().map(|n| n.name)
    }
    pub fn hint(&self) -> Option<u16> {
        self.import_by_name().map(|n| n.hint)
    }

    /// The RVA of this function's slot in the import address table.
    pub fn iat_rva(&self) -> Option<RVA> {
        self.slot
    }
    /// The current contents of this function's import address table slot: the same thunk as
    /// the lookup table on disk, the resolved address once the loader has bound it.
    pub fn iat_value(&self) -> Option<u64> {
        let offset = self.space.translate(self.slot?)?;
        self.space.get_pointer(offset).ok()
    }
}
