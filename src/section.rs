//! The section table.

use crate::headers::ImageSectionHeader;
use crate::pe::AddressSpace;

/// The section headers that follow the optional header.
///
/// The table is exactly as long as the section count in the file header; no sentinel is
/// involved. If the table cannot be read the view is simply empty.
#[derive(Copy, Clone, Debug)]
pub struct SectionTable<'a> {
    sections: &'a [ImageSectionHeader],
}
impl<'a> SectionTable<'a> {
    pub fn parse(space: &'a AddressSpace<'a>) -> Self {
        let sections = match space.get_section_table() {
            Ok(s) => s,
            Err(e) => {
                log::debug!("section table unavailable: {}", e);
                &[]
            }
        };

        Self { sections }
    }

    /// Whether the table could be read and declares at least one section.
    pub fn is_present(&self) -> bool { !self.sections.is_empty() }
    pub fn is_empty(&self) -> bool { self.sections.is_empty() }
    pub fn len(&self) -> usize { self.sections.len() }
    pub fn as_slice(&self) -> &'a [ImageSectionHeader] { self.sections }

    pub fn get(&self, index: usize) -> Option<&'a ImageSectionHeader> {
        self.sections.get(index)
    }
    /// Find the first section named `name`. Section names are at most eight bytes.
    pub fn by_name(&self, name: &str) -> Option<&'a ImageSectionHeader> {
        self.sections.iter().find(|s| s.name_bytes() == name.as_bytes())
    }
    pub fn iter(&self) -> std::slice::Iter<'a, ImageSectionHeader> {
        self.sections.iter()
    }
}
impl<'a> IntoIterator for SectionTable<'a> {
    type Item = &'a ImageSectionHeader;
    type IntoIter = std::slice::Iter<'a, ImageSectionHeader>;

    fn into_iter(self) -> Self::IntoIter {
        self.sections.iter()
    }
}
