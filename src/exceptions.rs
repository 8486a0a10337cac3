//! The exception directory: a flat array of runtime function records.

use log::trace;

use std::mem;

use crate::headers::*;
use crate::pe::AddressSpace;

/// The runtime function records of an image.
///
/// The array ends at the first record whose begin address is zero, or at the end of the
/// directory's declared size, whichever comes first.
#[derive(Copy, Clone, Debug)]
pub struct ExceptionTable<'a> {
    space: &'a AddressSpace<'a>,
    range: Option<(usize, usize)>,
}
impl<'a> ExceptionTable<'a> {
    pub fn parse(space: &'a AddressSpace<'a>) -> Self {
        let range = space.get_present_directory(ImageDirectoryEntry::Exception)
            .and_then(|dir| {
                let start = space.translate(dir.virtual_address)?;
                Some((start, start + dir.size as usize))
            });

        Self { space, range }
    }

    pub fn is_present(&self) -> bool {
        self.range.is_some()
    }
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
    pub fn iter(&self) -> ExceptionIter<'a> {
        let (offset, end) = self.range.unwrap_or((0, 0));
        ExceptionIter { space: self.space, offset, end }
    }
}
impl<'a> IntoIterator for ExceptionTable<'a> {
    type Item = &'a ImageRuntimeFunction;
    type IntoIter = ExceptionIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct ExceptionIter<'a> {
    space: &'a AddressSpace<'a>,
    offset: usize,
    end: usize,
}
impl<'a> Iterator for ExceptionIter<'a> {
    type Item = &'a ImageRuntimeFunction;

    fn next(&mut self) -> Option<Self::Item> {
        let size = mem::size_of::<ImageRuntimeFunction>();

        if self.offset + size > self.end {
            return None;
        }

        let function = match self.space.get_ref::<ImageRuntimeFunction>(self.offset) {
            Ok(f) => f,
            Err(e) => {
                trace!("runtime function at {:#x} cannot be read: {}", self.offset, e);
                self.end = 0;
                return None;
            }
        };

        if function.begin_address.0 == 0 {
            self.end = 0;
            return None;
        }

        self.offset += size;

        Some(function)
    }
}
