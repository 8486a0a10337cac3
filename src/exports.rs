//! The export table.
//!
//! An export directory carries three tables: `Functions` holds one RVA per ordinal slot,
//! `Names` holds the RVAs of the exported names sorted ascending, and `NameOrdinals` holds,
//! for every name, the index into `Functions` it refers to. That index is a *hint*, not an
//! ordinal; the public ordinal is the directory's base plus the hint.

use byteorder::{ByteOrder, LittleEndian};

use log::trace;

use std::cmp::Ordering;
use std::mem;

use crate::headers::*;
use crate::pe::{AddressSpace, Castable};
use crate::types::*;

/// The exports of an image.
#[derive(Copy, Clone, Debug)]
pub struct ExportDirectory<'a> {
    space: &'a AddressSpace<'a>,
    directory: Option<&'a ImageDataDirectory>,
    export: Option<&'a ImageExportDirectory>,
}
impl<'a> ExportDirectory<'a> {
    pub fn parse(space: &'a AddressSpace<'a>) -> Self {
        let directory = space.get_present_directory(ImageDirectoryEntry::Export);
        let export = match directory {
            Some(d) => space.cast_rva::<ImageExportDirectory>(d.virtual_address),
            None => None,
        };

        Self { space, directory, export }
    }

    /// Whether the image has an export directory at a resolvable address.
    pub fn is_present(&self) -> bool {
        self.export.is_some()
    }
    /// Whether there are no function slots to enumerate.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// The number of function slots, which is also the number of ordinals spanned.
    pub fn len(&self) -> usize {
        self.export.map_or(0, |e| e.number_of_functions as usize)
    }
    /// The number of named exports.
    pub fn names_len(&self) -> usize {
        self.export.map_or(0, |e| e.number_of_names as usize)
    }
    /// The raw export directory.
    pub fn descriptor(&self) -> Option<&'a ImageExportDirectory> {
        self.export
    }
    /// The ordinal of the first function slot.
    pub fn base(&self) -> Option<u32> {
        self.export.map(|e| e.base)
    }
    /// The name this module was linked as.
    pub fn name(&self) -> Option<&'a [CChar]> {
        self.space.get_cstring_at(self.export?.name)
    }

    fn table_offset(&self, table: RVA, index: usize, width: usize) -> Option<usize> {
        let start = self.space.translate(table)?;
        Some(start + index * width)
    }
    fn table_entry<T: Castable>(&self, table: RVA, index: usize) -> Option<&'a T> {
        let offset = self.table_offset(table, index, mem::size_of::<T>())?;

        match self.space.get_ref::<T>(offset) {
            Ok(r) => Some(r),
            Err(e) => {
                trace!("export table entry {} at rva {} cannot be read: {}", index, table, e);
                None
            }
        }
    }

    /// Get the function in slot `index` of the `Functions` table. Its ordinal is the
    /// directory base plus `index`.
    pub fn function_at(&self, index: usize) -> Option<ExportedFunction<'a>> {
        let export = self.export?;
        let directory = self.directory?;

        if index >= export.number_of_functions as usize {
            return None;
        }

        let rva = *self.table_entry::<RVA>(export.address_of_functions, index)?;

        Some(ExportedFunction {
            space: self.space,
            ordinal: export.base.wrapping_add(index as u32),
            thunk: ThunkData::parse_export(rva, directory),
        })
    }
    /// Get the name in slot `index` of the `Names` table.
    pub fn name_at(&self, index: usize) -> Option<&'a [CChar]> {
        let export = self.export?;

        if index >= export.number_of_names as usize {
            return None;
        }

        let rva = *self.table_entry::<RVA>(export.address_of_names, index)?;
        self.space.get_cstring_at(rva)
    }
    /// Get the hint in slot `index` of the `NameOrdinals` table, i.e. the `Functions`
    /// index paired with the name in the same slot of `Names`.
    pub fn hint_at(&self, index: usize) -> Option<u16> {
        let export = self.export?;

        if index >= export.number_of_names as usize {
            return None;
        }

        let offset = self.table_offset(export.address_of_name_ordinals, index, mem::size_of::<u16>())?;
        let bytes = self.space.read(offset, mem::size_of::<u16>()).ok()?;

        Some(LittleEndian::read_u16(bytes))
    }

    /// Look up a function by name with a binary search over the sorted `Names` table.
    ///
    /// Only indices within the declared name count are read. If `Names` is not sorted the
    /// result is unspecified, and a name whose RVA cannot be resolved ends the search.
    pub fn find_by_name(&self, name: &str) -> Option<ExportedFunction<'a>> {
        let mut left = 0usize;
        let mut right = self.names_len();
        let needle = name.as_bytes();

        while left < right {
            let mid = left + (right - left) / 2;
            let candidate = self.name_at(mid)?;

            match candidate.as_bytes().cmp(needle) {
                Ordering::Equal => {
                    let hint = self.hint_at(mid)?;
                    return self.function_at(hint as usize);
                },
                Ordering::Less => left = mid + 1,
                Ordering::Greater => right = mid,
            }
        }

        None
    }
    /// Look up a function by its public ordinal. Ordinal 0 and ordinals outside
    /// `[base, base + number_of_functions)` are rejected.
    pub fn find_by_ordinal(&self, ordinal: u32) -> Option<ExportedFunction<'a>> {
        if ordinal == 0 {
            return None;
        }

        let hint = ordinal.checked_sub(self.base()?)?;
        self.function_at(hint as usize)
    }

    /// Enumerate every function slot in ordinal order. Slots left unused by the linker
    /// show up with an RVA of zero.
    pub fn functions(&self) -> ExportFunctionIter<'a> {
        ExportFunctionIter { exports: *self, index: 0 }
    }
    /// Enumerate the named exports in `Names` order.
    pub fn names(&self) -> ExportNameIter<'a> {
        ExportNameIter { exports: *self, index: 0 }
    }
}
impl<'a> IntoIterator for ExportDirectory<'a> {
    type Item = ExportedFunction<'a>;
    type IntoIter = ExportFunctionIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.functions()
    }
}

/// One exported function.
#[derive(Copy, Clone, Debug)]
pub struct ExportedFunction<'a> {
    space: &'a AddressSpace<'a>,
    ordinal: u32,
    thunk: ThunkData,
}
impl<'a> ExportedFunction<'a> {
    pub fn ordinal(&self) -> u32 { self.ordinal }
    /// Either [`ThunkData::Function`] or [`ThunkData::ForwarderString`].
    pub fn thunk(&self) -> ThunkData { self.thunk }

    pub fn rva(&self) -> RVA {
        match self.thunk {
            ThunkData::Function(r) | ThunkData::ForwarderString(r) | ThunkData::ImportByName(r) => r,
            ThunkData::Ordinal(_) => RVA(0),
        }
    }
    /// Whether this export forwards to a function in another module.
    pub fn is_forwarded(&self) -> bool {
        matches!(self.thunk, ThunkData::ForwarderString(_))
    }
    /// The buffer offset of the exported code or data. `None` for forwarded exports and
    /// for RVAs that cannot be resolved.
    pub fn address(&self) -> Option<usize> {
        match self.thunk {
            ThunkData::Function(r) => self.space.translate(r),
            _ => None,
        }
    }
    /// The `module.function` target of a forwarded export. `None` otherwise.
    pub fn forwarded_name(&self) -> Option<&'a [CChar]> {
        match self.thunk {
            ThunkData::ForwarderString(r) => self.space.get_cstring_at(r),
            _ => None,
        }
    }
}

/// A named export: the name, its `NameOrdinals` hint and the function it designates.
#[derive(Copy, Clone, Debug)]
pub struct ExportedName<'a> {
    pub name: &'a [CChar],
    pub hint: u16,
    pub function: ExportedFunction<'a>,
}

pub struct ExportFunctionIter<'a> {
    exports: ExportDirectory<'a>,
    index: usize,
}
impl<'a> Iterator for ExportFunctionIter<'a> {
    type Item = ExportedFunction<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.exports.len() {
            return None;
        }

        let function = self.exports.function_at(self.index);

        match function {
            Some(_) => self.index += 1,
            None => self.index = self.exports.len(),
        }

        function
    }
}

/// Walks the `Names` table. A name or hint that cannot be read ends the walk.
pub struct ExportNameIter<'a> {
    exports: ExportDirectory<'a>,
    index: usize,
}
impl<'a> Iterator for ExportNameIter<'a> {
    type Item = ExportedName<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.index;

        if index >= self.exports.names_len() {
            return None;
        }

        self.index = self.exports.names_len();

        let name = self.exports.name_at(index)?;
        let hint = self.exports.hint_at(index)?;
        let function = self.exports.function_at(hint as usize)?;

        self.index = index + 1;

        Some(ExportedName { name, hint, function })
    }
}
