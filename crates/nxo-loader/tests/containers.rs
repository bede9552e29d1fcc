use nxo_loader::{load, load_file, ContainerKind, NxoError, SegmentKind};

fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_i32(bytes: &mut [u8], offset: usize, value: i32) {
    write_u32(bytes, offset, value as u32);
}

fn put(bytes: &mut [u8], offset: usize, data: &[u8]) {
    bytes[offset..offset + data.len()].copy_from_slice(data);
}

const TEXT_SIZE: usize = 0x200;
const RO_VADDR: usize = 0x1000;
const RO_SIZE: usize = 0x1000;
const DATA_VADDR: usize = 0x2000;
const DATA_SIZE: usize = 0x800;
const BSS_START: usize = 0x2800;
const BSS_END: usize = 0x2900;
const MOD_OFFSET: usize = 0x80;
const UNWIND_START: usize = 0x1080;
const UNWIND_END: usize = 0x1090;

// Smallest well-formed module: a MOD header, a dynamic table holding
// only DT_NULL, and an eh_frame_hdr that opts out of every encoding.
fn module_text() -> Vec<u8> {
    let mut text = vec![0u8; TEXT_SIZE];
    write_u32(&mut text, 4, MOD_OFFSET as u32);
    put(&mut text, MOD_OFFSET, b"MOD0");
    let rel = |target: usize| (target as i32) - (MOD_OFFSET as i32);
    write_i32(&mut text, MOD_OFFSET + 0x4, rel(DATA_VADDR));
    write_i32(&mut text, MOD_OFFSET + 0x8, rel(BSS_START));
    write_i32(&mut text, MOD_OFFSET + 0xC, rel(BSS_END));
    write_i32(&mut text, MOD_OFFSET + 0x10, rel(UNWIND_START));
    write_i32(&mut text, MOD_OFFSET + 0x14, rel(UNWIND_END));
    write_i32(&mut text, MOD_OFFSET + 0x18, 0);
    text
}

fn module_ro() -> Vec<u8> {
    let mut ro = vec![0u8; RO_SIZE];
    // eh_frame_hdr: version 1, all encodings DW_EH_PE_omit
    put(&mut ro, UNWIND_START - RO_VADDR, &[0x01, 0xFF, 0xFF, 0xFF]);
    ro
}

fn module_data() -> Vec<u8> {
    vec![0u8; DATA_SIZE]
}

fn build_nro() -> Vec<u8> {
    let mut file = vec![0u8; DATA_VADDR + DATA_SIZE];
    put(&mut file, 0, &module_text());
    put(&mut file, RO_VADDR, &module_ro());
    put(&mut file, DATA_VADDR, &module_data());

    put(&mut file, 0x10, b"NRO0");
    let total = file.len() as u32;
    write_u32(&mut file, 0x18, total);
    write_u32(&mut file, 0x20, 0);
    write_u32(&mut file, 0x24, TEXT_SIZE as u32);
    write_u32(&mut file, 0x28, RO_VADDR as u32);
    write_u32(&mut file, 0x2C, RO_SIZE as u32);
    write_u32(&mut file, 0x30, DATA_VADDR as u32);
    write_u32(&mut file, 0x34, DATA_SIZE as u32);
    write_u32(&mut file, 0x38, (BSS_END - BSS_START) as u32);
    put(&mut file, 0x40, &[0xAB; 0x20]);
    file
}

fn build_nso(compressed: bool) -> Vec<u8> {
    let text = module_text();
    let ro = module_ro();
    let data = module_data();
    let stored: Vec<Vec<u8>> = [&text, &ro, &data]
        .iter()
        .map(|segment| {
            if compressed {
                lz4_flex::block::compress(segment.as_slice())
            } else {
                segment.to_vec()
            }
        })
        .collect();

    let mut file = vec![0u8; 0x100];
    put(&mut file, 0, b"NSO0");
    write_u32(&mut file, 0xC, if compressed { 0x7 } else { 0x0 });

    let vaddrs = [0usize, RO_VADDR, DATA_VADDR];
    let vsizes = [TEXT_SIZE, RO_SIZE, DATA_SIZE];
    let mut file_offset = 0x100u32;
    for (index, blob) in stored.iter().enumerate() {
        let descriptor = 0x10 + index * 0x10;
        write_u32(&mut file, descriptor, file_offset);
        write_u32(&mut file, descriptor + 4, vaddrs[index] as u32);
        write_u32(&mut file, descriptor + 8, vsizes[index] as u32);
        write_u32(&mut file, 0x60 + index * 4, blob.len() as u32);
        file_offset += blob.len() as u32;
    }
    write_u32(&mut file, 0x3C, (BSS_END - BSS_START) as u32);
    put(&mut file, 0x40, &[0xAB; 0x20]);
    for blob in &stored {
        file.extend_from_slice(blob);
    }
    file
}

fn build_kip() -> Vec<u8> {
    let text = module_text();
    let ro = module_ro();
    let data = module_data();

    let mut file = vec![0u8; 0x100];
    put(&mut file, 0, b"KIP1");
    file[0x1F] = 0; // nothing compressed

    let vaddrs = [0usize, RO_VADDR, DATA_VADDR];
    for (index, blob) in [&text, &ro, &data].iter().enumerate() {
        let descriptor = 0x20 + index * 0x10;
        write_u32(&mut file, descriptor, vaddrs[index] as u32);
        write_u32(&mut file, descriptor + 4, blob.len() as u32);
        write_u32(&mut file, descriptor + 8, blob.len() as u32);
    }
    write_u32(&mut file, 0x54, (BSS_END - BSS_START) as u32);
    file.extend_from_slice(&text);
    file.extend_from_slice(&ro);
    file.extend_from_slice(&data);
    file
}

fn expected_minimal_sections() -> Vec<(u64, u64, &'static str, SegmentKind)> {
    vec![
        (0x0, 0x200, ".text", SegmentKind::Code),
        (0x1000, 0x1080, ".rodata", SegmentKind::Const),
        (0x1080, 0x1090, ".eh_frame_hdr", SegmentKind::Const),
        (0x1090, 0x2000, ".rodata.1", SegmentKind::Const),
        (0x2000, 0x2010, ".dynamic", SegmentKind::Data),
        (0x2010, 0x2800, ".data", SegmentKind::Data),
        (0x2800, 0x2900, ".bss", SegmentKind::Bss),
    ]
}

fn section_tuples(file: &nxo_loader::NxoFile) -> Vec<(u64, u64, String, SegmentKind)> {
    file.sections
        .iter()
        .map(|part| (part.start, part.end, part.name.clone(), part.kind))
        .collect()
}

fn assert_minimal_sections(file: &nxo_loader::NxoFile) {
    let expected: Vec<(u64, u64, String, SegmentKind)> = expected_minimal_sections()
        .into_iter()
        .map(|(start, end, name, kind)| (start, end, name.to_string(), kind))
        .collect();
    assert_eq!(section_tuples(file), expected);
}

#[test]
fn unknown_magic_is_rejected() {
    let mut bytes = vec![0u8; 0x40];
    put(&mut bytes, 0, b"XYZ0");
    assert!(matches!(load(&bytes), Err(NxoError::BadMagic)));
    assert!(matches!(load(&[]), Err(NxoError::BadMagic)));
    assert!(matches!(load(&[0u8; 0x14]), Err(NxoError::BadMagic)));
}

#[test]
fn magic_selects_the_container_path() {
    // headers too short to parse, but long enough to dispatch
    let mut nso = vec![0u8; 0x14];
    put(&mut nso, 0, b"NSO0");
    assert!(matches!(load(&nso), Err(NxoError::Truncated(_))));

    let mut kip = vec![0u8; 0x14];
    put(&mut kip, 0, b"KIP1");
    assert!(matches!(load(&kip), Err(NxoError::Truncated(_))));

    let mut nro = vec![0u8; 0x14];
    put(&mut nro, 0x10, b"NRO0");
    assert!(matches!(load(&nro), Err(NxoError::Truncated(_))));
}

#[test]
fn minimal_nro_end_to_end() {
    let file = load(&build_nro()).unwrap();
    assert_eq!(file.kind, ContainerKind::Nro);
    assert!(!file.armv7);

    assert_eq!(file.text.vaddr, 0);
    assert_eq!(file.text.vsize, 0x200);
    assert_eq!(file.text.file_offset, Some(0));
    assert_eq!(file.ro.vaddr, 0x1000);
    assert_eq!(file.ro.file_offset, Some(0x1000));
    assert_eq!(file.data.vaddr, 0x2000);
    assert_eq!(file.data.file_offset, Some(0x2000));

    assert_eq!(file.mod_offset, 0x80);
    assert_eq!(file.dynamic_offset, 0x2000);
    assert_eq!(file.dynamic_size, 0x10);
    assert_eq!(file.data_size, 0x800);
    assert_eq!(file.bss_offset, 0x2800);
    assert_eq!(file.bss_size, 0x100);
    assert_eq!(file.header_bss_size, 0x100);
    assert!(!file.is_libnx);

    assert!(file.symbols.is_empty());
    assert!(file.relocations.is_empty());
    assert!(file.plt_entries.is_empty());
    assert!(file.eh_table.is_empty());
    assert!(file.needed.is_empty());
    assert_eq!(file.got, None);
    assert_eq!(file.name(), None);
    assert_eq!(file.build_id_hex().as_deref(), Some("ab".repeat(32).as_str()));
    assert!(file.warnings.iter().any(|warning| warning.contains("no dynstr")));

    assert_minimal_sections(&file);
}

#[test]
fn compressed_nso_matches_the_nro_model() {
    let nro = load(&build_nro()).unwrap();
    let nso = load(&build_nso(true)).unwrap();

    assert_eq!(nso.kind, ContainerKind::Nso);
    assert_eq!(nso.armv7, nro.armv7);
    assert_eq!(nso.text.file_offset, None);
    assert_eq!(nso.ro.file_offset, None);
    assert_eq!(nso.data.file_offset, None);
    assert_minimal_sections(&nso);

    // decompressed segments reproduce the source bytes
    assert_eq!(nso.image().len(), nro.image().len());
    assert_eq!(&nso.image()[RO_VADDR..], &nro.image()[RO_VADDR..]);
    assert_eq!(&nso.image()[MOD_OFFSET..0x100], &nro.image()[MOD_OFFSET..0x100]);
}

#[test]
fn uncompressed_nso_keeps_file_offsets() {
    let nso = load(&build_nso(false)).unwrap();
    assert_eq!(nso.text.file_offset, Some(0x100));
    assert_eq!(nso.ro.file_offset, Some(0x100 + TEXT_SIZE as u64));
    assert_eq!(
        nso.data.file_offset,
        Some(0x100 + TEXT_SIZE as u64 + RO_SIZE as u64)
    );
    assert_minimal_sections(&nso);
}

#[test]
fn kip_segments_follow_the_header() {
    let kip = load(&build_kip()).unwrap();
    assert_eq!(kip.kind, ContainerKind::Kip);
    assert_eq!(kip.text.file_offset, Some(0x100));
    assert_eq!(kip.ro.file_offset, Some(0x300));
    assert_eq!(kip.data.file_offset, Some(0x1300));
    assert_eq!(kip.build_id, None);
    assert_minimal_sections(&kip);
}

#[test]
fn libnx_extension_pins_the_got() {
    let mut image = build_nro();
    let rel = |target: usize| (target as i32) - (MOD_OFFSET as i32);
    put(&mut image, MOD_OFFSET + 0x1C, b"LNY0");
    write_i32(&mut image, MOD_OFFSET + 0x20, rel(0x2100));
    write_i32(&mut image, MOD_OFFSET + 0x24, rel(0x2110));

    let file = load(&image).unwrap();
    assert!(file.is_libnx);
    assert_eq!(file.got, Some((0x2100, 0x2110)));
    let got = file
        .sections
        .iter()
        .find(|part| part.name == ".got")
        .expect("libnx .got section");
    assert_eq!((got.start, got.end), (0x2100, 0x2110));
    assert_eq!(got.kind, SegmentKind::Data);
}

#[test]
fn nro_asset_header_is_parsed() {
    let mut image = build_nro();
    let aset_offset = image.len();
    let mut aset = vec![0u8; 0x38];
    put(&mut aset, 0, b"ASET");
    aset[0x8..0x10].copy_from_slice(&0x38u64.to_le_bytes()); // icon offset
    aset[0x10..0x18].copy_from_slice(&0x10u64.to_le_bytes()); // icon size
    aset[0x18..0x20].copy_from_slice(&0x48u64.to_le_bytes()); // nacp offset
    aset[0x20..0x28].copy_from_slice(&0x4000u64.to_le_bytes()); // nacp size
    image.extend_from_slice(&aset);

    let file = load(&image).unwrap();
    let assets = file.assets.expect("asset header");
    assert_eq!(assets.base_offset, aset_offset as u64);
    assert_eq!(assets.icon.offset, 0x38);
    assert_eq!(assets.icon.size, 0x10);
    assert_eq!(assets.nacp.size, 0x4000);
    assert_eq!(assets.romfs.size, 0);
}

#[test]
fn load_file_reads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("minimal.nro");
    std::fs::write(&path, build_nro()).unwrap();
    let file = load_file(&path).unwrap();
    assert_eq!(file.kind, ContainerKind::Nro);
    assert_minimal_sections(&file);
}
