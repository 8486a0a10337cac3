use super::*;

const E_LFANEW: usize = 0x40;
const FILE_HEADER: usize = E_LFANEW + 4;
const OPTIONAL_HEADER: usize = FILE_HEADER + 20;
const IMAGE_SIZE: usize = 0x4000;

/// Writes a synthetic image with three sections. Content is addressed by RVA and lands at
/// the matching raw offset for disk images, or at the RVA itself for memory images.
struct ImageBuilder {
    pe_type: PEType,
    arch: Arch,
    data: Vec<u8>,
    sections: Vec<(u32, u32, u32)>,
}
impl ImageBuilder {
    fn new(pe_type: PEType, arch: Arch) -> Self {
        let mut builder = Self {
            pe_type,
            arch,
            data: vec![0u8; IMAGE_SIZE],
            sections: Vec::new(),
        };

        builder.put_u16(0, DOS_SIGNATURE);
        builder.put_u32(0x3C, E_LFANEW as u32);
        builder.put_u32(E_LFANEW, NT_SIGNATURE);

        let (machine, magic) = match arch {
            Arch::X86 => (0x014Cu16, HDR32_MAGIC),
            Arch::X64 => (0x8664u16, HDR64_MAGIC),
        };

        builder.put_u16(FILE_HEADER, machine);
        builder.put_u16(FILE_HEADER + 16, builder.optional_size() as u16);
        builder.put_u16(FILE_HEADER + 18, 0x0102);

        builder.put_u16(OPTIONAL_HEADER, magic);
        builder.put_u32(OPTIONAL_HEADER + 32, 0x1000);
        builder.put_u32(OPTIONAL_HEADER + 36, 0x200);
        builder.put_u32(OPTIONAL_HEADER + 56, IMAGE_SIZE as u32);
        builder.put_u32(OPTIONAL_HEADER + 60, 0x400);

        match arch {
            Arch::X86 => {
                builder.put_u32(OPTIONAL_HEADER + 28, 0x400000);
                builder.put_u32(OPTIONAL_HEADER + 92, 16);
            },
            Arch::X64 => {
                builder.put_u64(OPTIONAL_HEADER + 24, 0x140000000);
                builder.put_u32(OPTIONAL_HEADER + 108, 16);
            },
        }

        builder.add_section(".text", 0x1000, 0x400, 0x60000020);
        builder.add_section(".rdata", 0x2000, 0x1400, 0x40000040);
        builder.add_section(".data", 0x3000, 0x2400, 0xC0000040);

        builder
    }

    fn image_base(&self) -> u64 {
        match self.arch {
            Arch::X86 => 0x400000,
            Arch::X64 => 0x140000000,
        }
    }
    fn optional_size(&self) -> usize {
        self.directory_table() - OPTIONAL_HEADER + 16 * 8
    }
    fn directory_table(&self) -> usize {
        match self.arch {
            Arch::X86 => OPTIONAL_HEADER + 96,
            Arch::X64 => OPTIONAL_HEADER + 112,
        }
    }
    fn add_section(&mut self, name: &str, va: u32, raw: u32, characteristics: u32) {
        let index = self.sections.len();
        let offset = OPTIONAL_HEADER + self.optional_size() + index * 40;

        self.data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        self.put_u32(offset + 8, 0x1000);
        self.put_u32(offset + 12, va);
        self.put_u32(offset + 16, 0x1000);
        self.put_u32(offset + 20, raw);
        self.put_u32(offset + 36, characteristics);

        self.sections.push((va, raw, 0x1000));
        self.put_u16(FILE_HEADER + 2, self.sections.len() as u16);
    }
    fn set_directory(&mut self, entry: ImageDirectoryEntry, rva: u32, size: u32) {
        let offset = self.directory_table() + (entry as usize) * 8;

        self.put_u32(offset, rva);
        self.put_u32(offset + 4, size);
    }
    fn offset(&self, rva: u32) -> usize {
        match self.pe_type {
            PEType::Memory => rva as usize,
            PEType::Disk => {
                let &(va, raw, _) = self.sections.iter()
                    .find(|&&(va, _, size)| va <= rva && rva < va + size)
                    .expect("rva outside every section");

                (rva - va + raw) as usize
            }
        }
    }
    fn va(&self, rva: u32) -> u64 {
        self.image_base() + rva as u64
    }

    fn put_u16(&mut self, offset: usize, value: u16) {
        self.data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }
    fn put_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
    fn put_u64(&mut self, offset: usize, value: u64) {
        self.data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    fn write_u16(&mut self, rva: u32, value: u16) {
        let offset = self.offset(rva);
        self.put_u16(offset, value);
    }
    fn write_u32(&mut self, rva: u32, value: u32) {
        let offset = self.offset(rva);
        self.put_u32(offset, value);
    }
    fn write_ptr(&mut self, rva: u32, value: u64) {
        let offset = self.offset(rva);
        put_ptr(&mut self.data, self.arch, offset, value);
    }
    fn write_str(&mut self, rva: u32, value: &str) {
        let offset = self.offset(rva);

        self.data[offset..offset + value.len()].copy_from_slice(value.as_bytes());
        self.data[offset + value.len()] = 0;
    }
    fn write_hint_name(&mut self, rva: u32, hint: u16, name: &str) {
        self.write_u16(rva, hint);
        self.write_str(rva + 2, name);
    }

    fn build(self) -> Vec<u8> {
        self.data
    }
}

fn put_ptr(data: &mut [u8], arch: Arch, offset: usize, value: u64) {
    match arch {
        Arch::X86 => data[offset..offset + 4].copy_from_slice(&(value as u32).to_le_bytes()),
        Arch::X64 => data[offset..offset + 8].copy_from_slice(&value.to_le_bytes()),
    }
}

const LAYOUTS: [(PEType, Arch); 4] = [
    (PEType::Disk, Arch::X86),
    (PEType::Disk, Arch::X64),
    (PEType::Memory, Arch::X86),
    (PEType::Memory, Arch::X64),
];

fn with_imports(builder: &mut ImageBuilder) {
    let ptr = builder.arch.pointer_size() as u32;

    builder.set_directory(ImageDirectoryEntry::Import, 0x2000, 0x3C);

    // KERNEL32.dll: one import by name, one by ordinal
    builder.write_u32(0x2000, 0x2200);
    builder.write_u32(0x2000 + 12, 0x2100);
    builder.write_u32(0x2000 + 16, 0x2240);
    // USER32.dll: one import by name
    builder.write_u32(0x2014, 0x2280);
    builder.write_u32(0x2014 + 12, 0x2110);
    builder.write_u32(0x2014 + 16, 0x22C0);

    builder.write_str(0x2100, "KERNEL32.dll");
    builder.write_str(0x2110, "USER32.dll");

    let ordinal = builder.arch.ordinal_flag() | 5;

    for table in [0x2200, 0x2240] {
        builder.write_ptr(table, 0x2300);
        builder.write_ptr(table + ptr, ordinal);
    }
    for table in [0x2280, 0x22C0] {
        builder.write_ptr(table, 0x2320);
    }

    builder.write_hint_name(0x2300, 0x11, "ExitProcess");
    builder.write_hint_name(0x2320, 0x07, "MessageBoxA");
}

fn with_delayed_imports(builder: &mut ImageBuilder) {
    builder.set_directory(ImageDirectoryEntry::DelayImport, 0x2400, 0x40);

    builder.write_u32(0x2400, 1);
    builder.write_u32(0x2400 + 4, 0x2440);
    builder.write_u32(0x2400 + 12, 0x24A0);
    builder.write_u32(0x2400 + 16, 0x2480);
    // the terminating row only needs a zero name
    builder.write_u32(0x2420, 1);
    builder.write_u32(0x2420 + 12, 0x24A0);

    builder.write_str(0x2440, "COMCTL32.dll");
    builder.write_ptr(0x2480, 0x24C0);
    builder.write_ptr(0x24A0, 0x24C0);
    builder.write_hint_name(0x24C0, 0, "InitCommonControls");
}

fn with_exports(builder: &mut ImageBuilder) {
    builder.set_directory(ImageDirectoryEntry::Export, 0x2800, 0x200);

    builder.write_u32(0x2800 + 12, 0x2840);
    builder.write_u32(0x2800 + 16, 1);
    builder.write_u32(0x2800 + 20, 4);
    builder.write_u32(0x2800 + 24, 3);
    builder.write_u32(0x2800 + 28, 0x2860);
    builder.write_u32(0x2800 + 32, 0x2880);
    builder.write_u32(0x2800 + 36, 0x2890);

    builder.write_str(0x2840, "sample.dll");

    for (index, rva) in [0x1000, 0x1010, 0x2900, 0x1020].iter().enumerate() {
        builder.write_u32(0x2860 + (index as u32) * 4, *rva);
    }
    for (index, (rva, name)) in [(0x28A0, "Alpha"), (0x28B0, "Beta"), (0x28C0, "Gamma")].iter().enumerate() {
        builder.write_u32(0x2880 + (index as u32) * 4, *rva);
        builder.write_u16(0x2890 + (index as u32) * 2, index as u16);
        builder.write_str(*rva, name);
    }

    builder.write_str(0x2900, "OTHER.Function");
}

fn with_relocations(builder: &mut ImageBuilder) {
    builder.set_directory(ImageDirectoryEntry::BaseReloc, 0x3000, 0x22);

    builder.write_u32(0x3000, 0x1000);
    builder.write_u32(0x3004, 8 + 4);
    builder.write_u16(0x3008, 0x3010);
    builder.write_u16(0x300A, 0x0000);

    builder.write_u32(0x300C, 0x2000);
    builder.write_u32(0x3010, 8 + 6);
    builder.write_u16(0x3014, 0xA008);
    builder.write_u16(0x3016, 0x1FFF);
    builder.write_u16(0x3018, 0x4004);
}

fn with_exceptions(builder: &mut ImageBuilder, size: u32) {
    builder.set_directory(ImageDirectoryEntry::Exception, 0x3100, size);

    for (index, (begin, end)) in [(0x1000, 0x1010), (0x1010, 0x1040), (0x1040, 0x1100)].iter().enumerate() {
        let record = 0x3100 + (index as u32) * 12;

        builder.write_u32(record, *begin);
        builder.write_u32(record + 4, *end);
        builder.write_u32(record + 8, 0x3180);
    }
}

/// Writes a TLS directory with two callbacks. `base` is what virtual addresses are relative to.
fn with_tls(builder: &mut ImageBuilder, base: u64) {
    let size = builder.arch.tls_directory_size() as u32;
    let callbacks_field = match builder.arch {
        Arch::X86 => 0x3200 + 12,
        Arch::X64 => 0x3200 + 24,
    };

    builder.set_directory(ImageDirectoryEntry::TLS, 0x3200, size);
    builder.write_ptr(callbacks_field, base + 0x3240);

    let ptr = builder.arch.pointer_size() as u32;

    builder.write_ptr(0x3240, base + 0x1100);
    builder.write_ptr(0x3240 + ptr, base + 0x1200);
    builder.write_ptr(0x3240 + 2 * ptr, 0);
}

fn name_of(name: Option<&[CChar]>) -> Option<&str> {
    name.map(|n| n.as_str().unwrap())
}

#[test]
fn test_validate() {
    for (pe_type, arch) in LAYOUTS {
        let data = ImageBuilder::new(pe_type, arch).build();
        let image = Image::open(&data, pe_type, arch);

        assert_eq!(image.is_valid(), true);
        assert_eq!(image.validate().is_ok(), true);
    }

    let mut data = ImageBuilder::new(PEType::Disk, Arch::X86).build();
    data[0] = b'Z';
    let image = Image::open(&data, PEType::Disk, Arch::X86);
    assert_eq!(image.is_valid(), false);
    assert!(matches!(image.validate(), Err(Error::InvalidDOSSignature(0x5A5A))));

    let mut data = ImageBuilder::new(PEType::Disk, Arch::X86).build();
    data[E_LFANEW + 1] = b'X';
    let image = Image::open(&data, PEType::Disk, Arch::X86);
    assert_eq!(image.is_valid(), false);
    assert!(matches!(image.validate(), Err(Error::InvalidPESignature(0x5850))));

    let data = ImageBuilder::new(PEType::Disk, Arch::X86).build();
    let image = Image::open(&data[..0x20], PEType::Disk, Arch::X86);
    assert_eq!(image.is_valid(), false);
    assert!(matches!(image.validate(), Err(Error::BufferError(_))));

    let image = Image::open(&[], PEType::Memory, Arch::X64);
    assert_eq!(image.is_valid(), false);
}

#[test]
fn test_detect() {
    let data = ImageBuilder::new(PEType::Disk, Arch::X64).build();
    let image = Image::detect(&data, PEType::Disk);
    assert_eq!(image.is_ok(), true);
    assert_eq!(image.unwrap().get_arch(), Arch::X64);

    let data = ImageBuilder::new(PEType::Memory, Arch::X86).build();
    assert_eq!(Image::detect(&data, PEType::Memory).unwrap().get_arch(), Arch::X86);

    let mut builder = ImageBuilder::new(PEType::Disk, Arch::X86);
    builder.put_u16(OPTIONAL_HEADER, 0x0107);
    let data = builder.build();
    assert!(matches!(Image::detect(&data, PEType::Disk), Err(Error::InvalidNTSignature(0x0107))));
}

#[test]
fn test_headers() {
    for (pe_type, arch) in LAYOUTS {
        let mut builder = ImageBuilder::new(pe_type, arch);
        builder.put_u32(OPTIONAL_HEADER + 16, 0x1008);
        let expected_base = builder.image_base();
        let data = builder.build();
        let image = Image::open(&data, pe_type, arch);

        assert_eq!(image.image_base().unwrap(), expected_base);

        let entry = image.entry_point().unwrap();
        match pe_type {
            PEType::Disk => assert_eq!(entry, 0x408),
            PEType::Memory => assert_eq!(entry, 0x1008),
        }

        let headers = image.nt_headers().unwrap();
        let file_header = headers.file_header();
        let sections = file_header.number_of_sections;
        assert_eq!(sections, 3);
        assert_eq!(headers.signature(), NT_SIGNATURE);
        assert!(file_header.flags().contains(FileCharacteristics::EXECUTABLE_IMAGE));
        assert!(file_header.flags().contains(FileCharacteristics::MACHINE_32BIT));
        assert_eq!(file_header.timestamp().map(|t| t.timestamp()), Some(0));

        let e_lfanew = image.dos_header().unwrap().e_lfanew;
        assert_eq!(usize::from(e_lfanew), E_LFANEW);
    }
}

#[test]
fn test_memory_translation() {
    for arch in [Arch::X86, Arch::X64] {
        let data = ImageBuilder::new(PEType::Memory, arch).build();
        let image = Image::open(&data, PEType::Memory, arch);
        let space = image.address_space();

        for rva in (0..data.len() as u32).step_by(0x7F) {
            assert_eq!(space.translate(RVA(rva)), Some(rva as usize));
        }

        assert_eq!(space.translate(RVA(0x3FFF)), Some(0x3FFF));
        assert_eq!(space.resolve(RVA(0x3FFF)).map(|s| s.len()), Some(1));
        assert_eq!(space.resolve(RVA(0x8000)), None);
    }
}

#[test]
fn test_disk_translation() {
    for arch in [Arch::X86, Arch::X64] {
        let data = ImageBuilder::new(PEType::Disk, arch).build();
        let image = Image::open(&data, PEType::Disk, arch);
        let space = image.address_space();

        assert_eq!(space.translate(RVA(0x1000)), Some(0x400));
        assert_eq!(space.translate(RVA(0x2010)), Some(0x1410));
        assert_eq!(space.translate(RVA(0x3FFF)), Some(0x33FF));
        assert_eq!(space.translate(RVA(0x0)), None);
        assert_eq!(space.translate(RVA(0x0FFF)), None);
        assert_eq!(space.translate(RVA(0x4000)), None);
        assert_eq!(space.translate(RVA(0xFFFFFFFF)), None);
    }
}

#[test]
fn test_disk_translation_rounds_raw_size() {
    let mut builder = ImageBuilder::new(PEType::Disk, Arch::X86);
    let text = OPTIONAL_HEADER + builder.optional_size();

    // 0x123 bytes of raw data round up to one 0x200 file-aligned block
    builder.put_u32(text + 16, 0x123);
    let data = builder.build();
    let image = Image::open(&data, PEType::Disk, Arch::X86);
    let space = image.address_space();

    assert_eq!(space.translate(RVA(0x11FF)), Some(0x5FF));
    assert_eq!(space.translate(RVA(0x1200)), None);
}

#[test]
fn test_sections() {
    for (pe_type, arch) in LAYOUTS {
        let data = ImageBuilder::new(pe_type, arch).build();
        let image = Image::open(&data, pe_type, arch);
        let sections = image.sections();

        assert_eq!(sections.is_present(), true);
        assert_eq!(sections.len(), 3);

        let names = sections.iter().map(|s| s.name().unwrap()).collect::<Vec<_>>();
        assert_eq!(names, vec![".text", ".rdata", ".data"]);

        let text = sections.by_name(".text").unwrap();
        assert!(text.is_executable() && text.is_readable() && !text.is_writable());
        assert!(text.flags().contains(SectionCharacteristics::CNT_CODE));

        let data_section = sections.get(2).unwrap();
        assert!(data_section.is_readable() && data_section.is_writable() && !data_section.is_executable());
        let va = data_section.virtual_address;
        assert_eq!(va, RVA(0x3000));

        assert!(sections.by_name(".reloc").is_none());
        assert_eq!(sections.into_iter().count(), 3);
    }
}

#[test]
fn test_section_table_out_of_bounds() {
    let mut builder = ImageBuilder::new(PEType::Disk, Arch::X64);
    builder.put_u16(FILE_HEADER + 2, 0xFFFF);
    let data = builder.build();
    let image = Image::open(&data, PEType::Disk, Arch::X64);

    assert_eq!(image.sections().is_empty(), true);
    assert_eq!(image.sections().iter().count(), 0);
    assert_eq!(image.address_space().translate(RVA(0x1000)), None);
}

#[test]
fn test_imports() {
    for (pe_type, arch) in LAYOUTS {
        let mut builder = ImageBuilder::new(pe_type, arch);
        with_imports(&mut builder);
        let data = builder.build();
        let image = Image::open(&data, pe_type, arch);
        let imports = image.imports();

        assert_eq!(imports.is_present(), true);
        assert_eq!(imports.is_empty(), false);

        let modules = imports.iter().collect::<Vec<_>>();
        assert_eq!(modules.len(), 2);
        assert_eq!(name_of(modules[0].name()), Some("KERNEL32.dll"));
        assert_eq!(name_of(modules[1].name()), Some("USER32.dll"));

        let kernel32 = modules[0].functions().collect::<Vec<_>>();
        assert_eq!(kernel32.len(), 2);

        assert_eq!(kernel32[0].index(), 0);
        assert_eq!(kernel32[0].thunk(), ThunkData::ImportByName(RVA(0x2300)));
        assert_eq!(name_of(kernel32[0].name()), Some("ExitProcess"));
        assert_eq!(kernel32[0].hint(), Some(0x11));
        assert_eq!(kernel32[0].ordinal(), None);
        assert_eq!(kernel32[0].iat_rva(), Some(RVA(0x2240)));
        assert_eq!(kernel32[0].iat_value(), Some(0x2300));

        let ptr = arch.pointer_size() as u32;
        assert_eq!(kernel32[1].is_ordinal(), true);
        assert_eq!(kernel32[1].ordinal(), Some(5));
        assert_eq!(kernel32[1].name(), None);
        assert_eq!(kernel32[1].iat_rva(), Some(RVA(0x2240 + ptr)));

        let user32 = modules[1].functions().collect::<Vec<_>>();
        assert_eq!(user32.len(), 1);
        assert_eq!(name_of(user32[0].name()), Some("MessageBoxA"));
        assert_eq!(user32[0].hint(), Some(7));

        assert!(imports.by_name("user32.DLL").is_some());
        assert!(imports.by_name("ntdll.dll").is_none());
    }
}

#[test]
fn test_imports_absent() {
    let data = ImageBuilder::new(PEType::Disk, Arch::X86).build();
    let image = Image::open(&data, PEType::Disk, Arch::X86);

    assert_eq!(image.imports().is_present(), false);
    assert_eq!(image.imports().is_empty(), true);
    assert_eq!(image.imports().iter().count(), 0);
    assert_eq!(image.delayed_imports().is_present(), false);
    assert_eq!(image.delayed_imports().into_iter().count(), 0);

    // a present directory whose first row is the sentinel is present but empty
    let mut builder = ImageBuilder::new(PEType::Disk, Arch::X86);
    builder.set_directory(ImageDirectoryEntry::Import, 0x2000, 0x14);
    let data = builder.build();
    let image = Image::open(&data, PEType::Disk, Arch::X86);

    assert_eq!(image.imports().is_present(), true);
    assert_eq!(image.imports().is_empty(), true);

    // an address with a zero size is absent
    let mut builder = ImageBuilder::new(PEType::Disk, Arch::X86);
    with_imports(&mut builder);
    builder.set_directory(ImageDirectoryEntry::Import, 0x2000, 0);
    let data = builder.build();
    let image = Image::open(&data, PEType::Disk, Arch::X86);

    assert_eq!(image.imports().is_present(), false);
    assert_eq!(image.imports().iter().count(), 0);
}

#[test]
fn test_imports_unresolved_name() {
    let mut builder = ImageBuilder::new(PEType::Disk, Arch::X64);
    with_imports(&mut builder);
    // points past every section
    builder.write_ptr(0x2200, 0x9000);
    let data = builder.build();
    let image = Image::open(&data, PEType::Disk, Arch::X64);

    let module = image.imports().iter().next().unwrap();
    let functions = module.functions().collect::<Vec<_>>();

    assert_eq!(functions.len(), 2);
    assert_eq!(functions[0].thunk(), ThunkData::ImportByName(RVA(0x9000)));
    assert_eq!(functions[0].name(), None);
    assert_eq!(functions[0].import_by_name(), None);
    assert_eq!(functions[1].ordinal(), Some(5));
}

#[test]
fn test_imports_without_lookup_table() {
    let mut builder = ImageBuilder::new(PEType::Memory, Arch::X86);
    with_imports(&mut builder);
    builder.write_u32(0x2014, 0);
    let data = builder.build();
    let image = Image::open(&data, PEType::Memory, Arch::X86);

    let user32 = image.imports().iter().nth(1).unwrap();
    let functions = user32.functions().collect::<Vec<_>>();

    assert_eq!(functions.len(), 1);
    assert_eq!(name_of(functions[0].name()), Some("MessageBoxA"));
    assert_eq!(functions[0].iat_rva(), Some(RVA(0x22C0)));
}

#[test]
fn test_delayed_imports() {
    for (pe_type, arch) in LAYOUTS {
        let mut builder = ImageBuilder::new(pe_type, arch);
        with_delayed_imports(&mut builder);
        let data = builder.build();
        let image = Image::open(&data, pe_type, arch);
        let delayed = image.delayed_imports();

        assert_eq!(delayed.is_present(), true);
        assert_eq!(image.imports().is_present(), false);

        let modules = delayed.iter().collect::<Vec<_>>();
        assert_eq!(modules.len(), 1);
        assert_eq!(name_of(modules[0].name()), Some("COMCTL32.dll"));

        let attributes = modules[0].descriptor().attributes;
        assert_eq!(attributes, 1);

        let functions = modules[0].functions().collect::<Vec<_>>();
        assert_eq!(functions.len(), 1);
        assert_eq!(name_of(functions[0].name()), Some("InitCommonControls"));
        assert_eq!(functions[0].iat_rva(), Some(RVA(0x24A0)));
    }
}

#[test]
fn test_exports() {
    for (pe_type, arch) in LAYOUTS {
        let mut builder = ImageBuilder::new(pe_type, arch);
        with_exports(&mut builder);
        let data = builder.build();
        let image = Image::open(&data, pe_type, arch);
        let space = image.address_space();
        let exports = image.exports();

        assert_eq!(exports.is_present(), true);
        assert_eq!(exports.len(), 4);
        assert_eq!(exports.names_len(), 3);
        assert_eq!(exports.base(), Some(1));
        assert_eq!(name_of(exports.name()), Some("sample.dll"));

        let beta = exports.find_by_name("Beta").unwrap();
        assert_eq!(beta.ordinal(), 2);
        assert_eq!(beta.rva(), RVA(0x1010));
        assert_eq!(beta.is_forwarded(), false);
        assert_eq!(beta.forwarded_name(), None);
        assert_eq!(beta.address(), space.translate(RVA(0x1010)));
        assert!(beta.address().is_some());

        let by_ordinal = exports.find_by_ordinal(2).unwrap();
        assert_eq!(by_ordinal.address(), beta.address());

        let alpha = exports.find_by_name("Alpha").unwrap();
        assert_eq!(alpha.ordinal(), 1);
        assert_eq!(alpha.rva(), RVA(0x1000));

        let gamma = exports.find_by_name("Gamma").unwrap();
        assert_eq!(gamma.ordinal(), 3);
        assert_eq!(gamma.is_forwarded(), true);
        assert_eq!(gamma.address(), None);
        assert_eq!(name_of(gamma.forwarded_name()), Some("OTHER.Function"));

        for missing in ["", "Aardvark", "Alph", "Betamax", "Delta", "Zeta"] {
            assert!(exports.find_by_name(missing).is_none(), "{} should not be found", missing);
        }

        assert!(exports.find_by_ordinal(0).is_none());
        assert!(exports.find_by_ordinal(5).is_none());
        assert_eq!(exports.find_by_ordinal(4).unwrap().rva(), RVA(0x1020));

        let ordinals = exports.functions().map(|f| f.ordinal()).collect::<Vec<_>>();
        assert_eq!(ordinals, vec![1, 2, 3, 4]);

        let named = exports.names()
            .map(|n| (n.name.as_str().unwrap(), n.hint, n.function.ordinal()))
            .collect::<Vec<_>>();
        assert_eq!(named, vec![("Alpha", 0, 1), ("Beta", 1, 2), ("Gamma", 2, 3)]);
    }
}

#[test]
fn test_exports_base_ordinal() {
    let mut builder = ImageBuilder::new(PEType::Disk, Arch::X64);
    with_exports(&mut builder);
    builder.write_u32(0x2800 + 16, 10);
    let data = builder.build();
    let image = Image::open(&data, PEType::Disk, Arch::X64);
    let exports = image.exports();

    assert_eq!(exports.find_by_name("Beta").unwrap().ordinal(), 11);
    assert_eq!(exports.find_by_ordinal(11).unwrap().rva(), RVA(0x1010));
    assert!(exports.find_by_ordinal(1).is_none());
    assert!(exports.find_by_ordinal(9).is_none());
    assert!(exports.find_by_ordinal(14).is_none());
}

#[test]
fn test_exports_absent() {
    let data = ImageBuilder::new(PEType::Memory, Arch::X64).build();
    let image = Image::open(&data, PEType::Memory, Arch::X64);
    let exports = image.exports();

    assert_eq!(exports.is_present(), false);
    assert_eq!(exports.is_empty(), true);
    assert!(exports.name().is_none());
    assert!(exports.find_by_name("Beta").is_none());
    assert!(exports.find_by_ordinal(1).is_none());
    assert!(exports.function_at(0).is_none());
    assert_eq!(exports.functions().count(), 0);
    assert_eq!(exports.names().count(), 0);
}

#[test]
fn test_forwarded_range() {
    let directory = ImageDataDirectory { virtual_address: RVA(0x2800), size: 0x200 };

    assert_eq!(ThunkData::parse_export(RVA(0x2800), &directory), ThunkData::Function(RVA(0x2800)));
    assert_eq!(ThunkData::parse_export(RVA(0x2801), &directory), ThunkData::ForwarderString(RVA(0x2801)));
    assert_eq!(ThunkData::parse_export(RVA(0x29FF), &directory), ThunkData::ForwarderString(RVA(0x29FF)));
    assert_eq!(ThunkData::parse_export(RVA(0x2A00), &directory), ThunkData::Function(RVA(0x2A00)));
    assert_eq!(ThunkData::parse_export(RVA(0x1000), &directory), ThunkData::Function(RVA(0x1000)));
}

#[test]
fn test_import_thunks() {
    assert_eq!(ThunkData::parse_import(0x80000010, Arch::X86), ThunkData::Ordinal(0x10));
    assert_eq!(ThunkData::parse_import(0x00002300, Arch::X86), ThunkData::ImportByName(RVA(0x2300)));
    assert_eq!(ThunkData::parse_import(0x8000000000000010, Arch::X64), ThunkData::Ordinal(0x10));
    assert_eq!(ThunkData::parse_import(0x80000010, Arch::X64), ThunkData::ImportByName(RVA(0x10)));
}

#[test]
fn test_relocations() {
    for (pe_type, arch) in LAYOUTS {
        let mut builder = ImageBuilder::new(pe_type, arch);
        with_relocations(&mut builder);
        let data = builder.build();
        let image = Image::open(&data, pe_type, arch);
        let relocations = image.relocations();

        assert_eq!(relocations.is_present(), true);

        let blocks = relocations.iter().collect::<Vec<_>>();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].page(), RVA(0x1000));
        assert_eq!(blocks[0].len(), 2);
        assert_eq!(blocks[1].page(), RVA(0x2000));
        assert_eq!(blocks[1].len(), 3);

        let fixups = blocks[0].iter().collect::<Vec<_>>();
        assert_eq!(fixups[0].relocation_type(), ImageRelBased::HighLow);
        assert_eq!(fixups[0].offset(), 0x10);
        assert_eq!(fixups[0].rva(), RVA(0x1010));
        assert_eq!(fixups[0].type_name(), "IMAGE_REL_BASED_HIGHLOW");
        assert_eq!(fixups[1].relocation_type(), ImageRelBased::Absolute);

        let fixups = blocks[1].iter().collect::<Vec<_>>();
        assert_eq!(fixups[0].relocation_type(), ImageRelBased::Dir64);
        assert_eq!(fixups[0].rva(), RVA(0x2008));
        assert_eq!(fixups[1].relocation_type(), ImageRelBased::High);
        assert_eq!(fixups[1].offset(), 0xFFF);
        assert_eq!(fixups[2].relocation_type(), ImageRelBased::HighAdj);
        assert_eq!(fixups[2].rva(), RVA(0x2004));
    }
}

#[test]
fn test_relocation_malformed_block() {
    let mut builder = ImageBuilder::new(PEType::Disk, Arch::X86);
    with_relocations(&mut builder);
    // a block too small to hold its own header ends the chain
    builder.write_u32(0x3010, 4);
    let data = builder.build();
    let image = Image::open(&data, PEType::Disk, Arch::X86);

    assert_eq!(image.relocations().iter().count(), 1);
}

#[test]
fn test_relocation_words() {
    let relocation = Relocation(0xA123);

    assert_eq!(relocation.get_type(), ImageRelBased::Dir64);
    assert_eq!(relocation.get_offset(), 0x123);
    assert_eq!(relocation.get_address(RVA(0x5000)), RVA(0x5123));
    assert_eq!(Relocation(0xF000).get_type(), ImageRelBased::Unknown);
    assert_eq!(Relocation(0x5000).get_type(), ImageRelBased::MachineSpecific5);
}

#[test]
fn test_exceptions() {
    for (pe_type, arch) in LAYOUTS {
        let mut builder = ImageBuilder::new(pe_type, arch);
        with_exceptions(&mut builder, 0x30);
        let data = builder.build();
        let image = Image::open(&data, pe_type, arch);
        let exceptions = image.exceptions();

        assert_eq!(exceptions.is_present(), true);

        let ranges = exceptions.iter()
            .map(|f| (f.begin_address, f.end_address))
            .collect::<Vec<_>>();

        assert_eq!(ranges, vec![
            (RVA(0x1000), RVA(0x1010)),
            (RVA(0x1010), RVA(0x1040)),
            (RVA(0x1040), RVA(0x1100)),
        ]);

        let unwind = exceptions.iter().next().unwrap().unwind_info;
        assert_eq!(unwind, RVA(0x3180));
    }
}

#[test]
fn test_exceptions_bounded_by_directory() {
    let mut builder = ImageBuilder::new(PEType::Disk, Arch::X64);
    with_exceptions(&mut builder, 0x18);
    let data = builder.build();
    let image = Image::open(&data, PEType::Disk, Arch::X64);

    assert_eq!(image.exceptions().iter().count(), 2);

    let data = ImageBuilder::new(PEType::Disk, Arch::X64).build();
    let image = Image::open(&data, PEType::Disk, Arch::X64);

    assert_eq!(image.exceptions().is_present(), false);
    assert_eq!(image.exceptions().is_empty(), true);
}

#[test]
fn test_tls_callbacks_disk() {
    for arch in [Arch::X86, Arch::X64] {
        let mut builder = ImageBuilder::new(PEType::Disk, arch);
        let base = builder.image_base();
        with_tls(&mut builder, base);
        let expected = [builder.va(0x1100), builder.va(0x1200)];
        let data = builder.build();
        let image = Image::open(&data, PEType::Disk, arch);
        let tls = image.tls_callbacks();

        assert_eq!(tls.is_present(), true);
        assert_eq!(tls.directory().unwrap().address_of_callbacks(), base + 0x3240);

        let callbacks = tls.iter().collect::<Vec<_>>();
        assert_eq!(callbacks.iter().map(|c| c.va).collect::<Vec<_>>(), expected);
        assert_eq!(callbacks[0].rva, Some(RVA(0x1100)));
        assert_eq!(callbacks[0].offset, Some(0x500));
        assert_eq!(callbacks[1].offset, Some(0x600));
    }
}

#[test]
fn test_tls_callbacks_memory() {
    for arch in [Arch::X86, Arch::X64] {
        let mut builder = ImageBuilder::new(PEType::Memory, arch);
        with_tls(&mut builder, 0);
        let mut data = builder.build();

        // a mapped image stores absolute pointers, so rebase them onto the buffer
        let base = data.as_ptr() as u64;

        if arch == Arch::X86 && base > u32::MAX as u64 {
            continue;
        }

        let ptr = arch.pointer_size();
        let callbacks_field = match arch {
            Arch::X86 => 0x3200 + 12,
            Arch::X64 => 0x3200 + 24,
        };

        put_ptr(&mut data, arch, callbacks_field, base + 0x3240);
        put_ptr(&mut data, arch, 0x3240, base + 0x1100);
        put_ptr(&mut data, arch, 0x3240 + ptr, base + 0x1200);

        let image = Image::open(&data, PEType::Memory, arch);
        let callbacks = image.tls_callbacks().iter().collect::<Vec<_>>();

        assert_eq!(callbacks.len(), 2);
        assert_eq!(callbacks[0].va, base + 0x1100);
        assert_eq!(callbacks[0].rva, Some(RVA(0x1100)));
        assert_eq!(callbacks[0].offset, Some(0x1100));
        assert_eq!(callbacks[1].offset, Some(0x1200));
    }
}

#[test]
fn test_tls_absent_or_empty() {
    let data = ImageBuilder::new(PEType::Disk, Arch::X86).build();
    let image = Image::open(&data, PEType::Disk, Arch::X86);

    assert_eq!(image.tls_callbacks().is_present(), false);
    assert_eq!(image.tls_callbacks().iter().count(), 0);

    let mut builder = ImageBuilder::new(PEType::Disk, Arch::X86);
    builder.set_directory(ImageDirectoryEntry::TLS, 0x3200, 24);
    let data = builder.build();
    let image = Image::open(&data, PEType::Disk, Arch::X86);

    assert_eq!(image.tls_callbacks().is_present(), true);
    assert_eq!(image.tls_callbacks().is_empty(), true);
}

#[test]
fn test_directory_count() {
    let mut builder = ImageBuilder::new(PEType::Disk, Arch::X86);
    with_exports(&mut builder);
    with_tls(&mut builder, 0x400000);
    builder.put_u32(OPTIONAL_HEADER + 92, 2);
    let data = builder.build();
    let image = Image::open(&data, PEType::Disk, Arch::X86);

    assert_eq!(image.exports().is_present(), true);
    assert_eq!(image.tls_callbacks().is_present(), false);
    assert!(matches!(image.data_directory(ImageDirectoryEntry::TLS), Err(Error::BadDirectory(ImageDirectoryEntry::TLS))));
}

#[test]
fn test_idempotence() {
    for (pe_type, arch) in LAYOUTS {
        let mut builder = ImageBuilder::new(pe_type, arch);
        with_imports(&mut builder);
        with_exports(&mut builder);
        with_relocations(&mut builder);
        let data = builder.build();
        let image = Image::open(&data, pe_type, arch);

        let first = image.exports().find_by_name("Gamma").map(|f| (f.ordinal(), f.rva(), f.address()));
        let second = image.exports().find_by_name("Gamma").map(|f| (f.ordinal(), f.rva(), f.address()));
        assert_eq!(first, second);

        let collect_imports = || image.imports().iter()
            .flat_map(|m| m.functions().map(|f| f.thunk()).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        assert_eq!(collect_imports(), collect_imports());

        let collect_fixups = || image.relocations().iter()
            .flat_map(|b| b.iter().collect::<Vec<_>>())
            .collect::<Vec<_>>();
        assert_eq!(collect_fixups(), collect_fixups());
    }
}

#[test]
fn test_truncated_directories() {
    let mut builder = ImageBuilder::new(PEType::Memory, Arch::X64);
    with_imports(&mut builder);
    with_exports(&mut builder);
    let data = builder.build();

    // cut the buffer in the middle of the import lookup tables
    let image = Image::open(&data[..0x2204], PEType::Memory, Arch::X64);
    let module = image.imports().iter().next().unwrap();

    assert_eq!(module.functions().count(), 0);
    assert!(image.exports().find_by_name("Beta").is_none());
}

#[test]
fn test_cstrings() {
    let data = [b'a', b'b', 0, b'c'];
    let space = AddressSpace::new(&data, PEType::Memory, Arch::X86);

    assert_eq!(space.get_cstring(0).unwrap().as_str().unwrap(), "ab");
    assert_eq!(space.get_cstring(2).unwrap().as_str().unwrap(), "");
    assert!(matches!(space.get_cstring(3), Err(Error::OutOfBounds(4, 5))));
    assert!(matches!(space.get_cstring(9), Err(Error::OutOfBounds(4, 9))));
    assert_eq!(space.get_cstring_at(RVA(9)), None);
}

#[test]
fn test_align() {
    assert_eq!(align(0x123, 0x200), 0x200);
    assert_eq!(align(0x200, 0x200), 0x200);
    assert_eq!(align(0, 0x200), 0);
    assert_eq!(align(0x123, 0), 0x123);
}
