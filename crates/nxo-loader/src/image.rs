use std::collections::{BTreeSet, HashMap};

use regex::bytes::Regex;

use crate::consts::{dt, r_aarch64, r_arm, R_FAKE_RELR};
use crate::containers::{ContainerImage, ContainerKind, NroAssetHeader};
use crate::error::NxoError;
use crate::memory::{SectionPart, SegmentBuilder, SegmentKind};
use crate::symbols::ElfSym;
use crate::util::{find_word, hex_bytes, read_bytes, read_u32, read_u64, Reader};

const AARCH64_RET_X17: u32 = 0xD61F_0220;

// file_offset is None when the segment came out of a decompressor
// and has no offset in the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentInfo {
    pub file_offset: Option<u64>,
    pub vaddr: u64,
    pub vsize: u64,
}

// DT_NEEDED accumulates; every other tag keeps a single value.
// Unknown tags are stored and otherwise ignored.
#[derive(Debug, Clone, Default)]
pub struct DynamicTable {
    entries: HashMap<u64, u64>,
    pub needed: Vec<u64>,
}

impl DynamicTable {
    fn insert(&mut self, tag: u64, value: u64) {
        if tag == dt::NEEDED {
            self.needed.push(value);
        } else {
            self.entries.insert(tag, value);
        }
    }

    pub fn get(&self, tag: u64) -> Option<u64> {
        self.entries.get(&tag).copied()
    }

    pub fn has(&self, tag: u64) -> bool {
        self.entries.contains_key(&tag)
    }
}

// sym indexes into NxoFile::symbols; addend is absent on ARM32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    pub offset: u64,
    pub r_type: u32,
    pub sym: Option<usize>,
    pub addend: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PltEntry {
    pub stub_offset: u64,
    pub got_target: u64,
}

/// The parsed structural model of an NSO/NRO/KIP module.
pub struct NxoFile {
    pub kind: ContainerKind,
    pub armv7: bool,
    full: Vec<u8>,
    pub text: SegmentInfo,
    pub ro: SegmentInfo,
    pub data: SegmentInfo,
    pub data_size: u64,
    pub header_bss_size: u64,
    pub bss_offset: u64,
    pub bss_size: u64,
    pub mod_offset: u64,
    pub dynamic_offset: u64,
    pub dynamic_size: u64,
    pub unwind_offset: u64,
    pub unwind_end: u64,
    pub module_offset: u64,
    pub is_libnx: bool,
    pub dynamic: DynamicTable,
    dynstr: Vec<u8>,
    pub needed: Vec<String>,
    pub symbols: Vec<ElfSym>,
    pub relocations: Vec<Relocation>,
    pub plt_entries: Vec<PltEntry>,
    pub got: Option<(u64, u64)>,
    pub eh_table: Vec<(u64, u64)>,
    pub sections: Vec<SectionPart>,
    pub build_id: Option<[u8; 32]>,
    pub assets: Option<NroAssetHeader>,
    pub warnings: Vec<String>,
}

struct ModHeader {
    mod_offset: u64,
    dynamic_offset: u64,
    bss_start: u64,
    bss_end: u64,
    unwind_offset: u64,
    unwind_end: u64,
    module_offset: u64,
    libnx_got: Option<(u64, u64)>,
}

impl NxoFile {
    pub(crate) fn assemble(image: ContainerImage) -> Result<NxoFile, NxoError> {
        let ContainerImage {
            kind,
            text,
            ro,
            data,
            bss_size: header_bss_size,
            build_id,
            assets,
        } = image;

        let text_info = SegmentInfo {
            file_offset: text.file_offset,
            vaddr: text.vaddr,
            vsize: text.vsize,
        };
        let ro_info = SegmentInfo {
            file_offset: ro.file_offset,
            vaddr: ro.vaddr,
            vsize: ro.vsize,
        };
        let data_info = SegmentInfo {
            file_offset: data.file_offset,
            vaddr: data.vaddr,
            vsize: data.vsize,
        };
        let flat_size = data.vaddr + data.vsize;

        let mut warnings = Vec::new();
        let full = build_flat_image(
            text.bytes,
            &ro.bytes,
            ro.vaddr,
            &data.bytes,
            data.vaddr,
            &mut warnings,
        );

        let header = parse_mod_header(&full)?;
        let data_size = header.bss_start.saturating_sub(data_info.vaddr);
        let bss_size = header.bss_end.saturating_sub(header.bss_start);

        let mut builder = SegmentBuilder::new();
        for (start, size, name, seg_kind) in [
            (text_info.vaddr, text_info.vsize, ".text", SegmentKind::Code),
            (ro_info.vaddr, ro_info.vsize, ".rodata", SegmentKind::Const),
            (data_info.vaddr, data_size, ".data", SegmentKind::Data),
            (header.bss_start, bss_size, ".bss", SegmentKind::Bss),
        ] {
            builder
                .add_segment(start, size, name, seg_kind)
                .map_err(NxoError::Truncated)?;
        }

        // 32-bit dynamic entries pack (tag, value) pairs into each
        // 8-byte slot, so a u64 read of a populated entry overflows u32.
        let dynamic_offset = header.dynamic_offset;
        let armv7 = read_u64(&full, dynamic_offset as usize)? > 0xFFFF_FFFF
            || read_u64(&full, (dynamic_offset as usize).saturating_add(0x10))? > 0xFFFF_FFFF;
        let offsize: u64 = if armv7 { 4 } else { 8 };

        let mut dynamic = DynamicTable::default();
        let mut reader = Reader::at(&full, dynamic_offset as usize);
        for _ in 0..(flat_size.saturating_sub(dynamic_offset) / 0x10) {
            let (tag, value) = if armv7 {
                (reader.u32()? as u64, reader.u32()? as u64)
            } else {
                (reader.u64()?, reader.u64()?)
            };
            if tag == dt::NULL {
                break;
            }
            dynamic.insert(tag, value);
        }
        let dynamic_size = reader.pos() as u64 - dynamic_offset;

        add_section_or_warn(
            &mut builder,
            &mut warnings,
            ".dynamic",
            dynamic_offset,
            dynamic_offset + dynamic_size,
        );
        add_section_or_warn(
            &mut builder,
            &mut warnings,
            ".eh_frame_hdr",
            header.unwind_offset,
            header.unwind_end,
        );

        let dynstr = match (dynamic.get(dt::STRTAB), dynamic.get(dt::STRSZ)) {
            (Some(strtab), Some(strsz)) => {
                let start = (strtab as usize).min(full.len());
                let end = (strtab.saturating_add(strsz) as usize).min(full.len());
                full[start..end.max(start)].to_vec()
            }
            _ => {
                warnings.push("no dynstr".to_string());
                vec![0]
            }
        };

        let plt_reloc_section = if armv7 { ".rel.plt" } else { ".rela.plt" };
        for (start_tag, size_tag, name) in [
            (dt::STRTAB, dt::STRSZ, ".dynstr"),
            (dt::INIT_ARRAY, dt::INIT_ARRAYSZ, ".init_array"),
            (dt::FINI_ARRAY, dt::FINI_ARRAYSZ, ".fini_array"),
            (dt::RELA, dt::RELASZ, ".rela.dyn"),
            (dt::REL, dt::RELSZ, ".rel.dyn"),
            (dt::RELR, dt::RELRSZ, ".relr.dyn"),
            (dt::JMPREL, dt::PLTRELSZ, plt_reloc_section),
        ] {
            if let (Some(start), Some(size)) = (dynamic.get(start_tag), dynamic.get(size_tag)) {
                add_section_or_warn(
                    &mut builder,
                    &mut warnings,
                    name,
                    start,
                    start.saturating_add(size),
                );
            }
        }

        if let Some(hash_start) = dynamic.get(dt::HASH) {
            let mut reader = Reader::at(&full, hash_start as usize);
            let nbucket = reader.u32()?;
            let nchain = reader.u32()?;
            reader.skip(nbucket as usize * 4);
            reader.skip(nchain as usize * 4);
            add_section_or_warn(
                &mut builder,
                &mut warnings,
                ".hash",
                hash_start,
                reader.pos() as u64,
            );
        }

        if let Some(gnuhash_start) = dynamic.get(dt::GNU_HASH) {
            let mut reader = Reader::at(&full, gnuhash_start as usize);
            let nbuckets = reader.u32()?;
            let symoffset = reader.u32()?;
            let bloom_size = reader.u32()?;
            let _bloom_shift = reader.u32()?;
            reader.skip(bloom_size as usize * offsize as usize);
            let mut max_symix = 0u32;
            for _ in 0..nbuckets {
                max_symix = max_symix.max(reader.u32()?);
            }
            // the chain ends at the first entry with the stop bit set
            if max_symix >= symoffset {
                reader.skip((max_symix - symoffset) as usize * 4);
                while reader.u32()? & 1 == 0 {}
            }
            add_section_or_warn(
                &mut builder,
                &mut warnings,
                ".gnu.hash",
                gnuhash_start,
                reader.pos() as u64,
            );
        }

        let needed = dynamic
            .needed
            .iter()
            .map(|&offset| dynstr_string(&dynstr, offset))
            .collect::<Vec<_>>();

        let mut symbols = Vec::new();
        if let (Some(symtab), Some(strtab)) = (dynamic.get(dt::SYMTAB), dynamic.get(dt::STRTAB)) {
            let mut reader = Reader::at(&full, symtab as usize);
            loop {
                if symtab < strtab && strtab <= reader.pos() as u64 {
                    break;
                }
                let (st_name, st_info, st_other, st_shndx, st_value, st_size) = if armv7 {
                    let name = reader.u32()?;
                    let value = reader.u32()? as u64;
                    let size = reader.u32()? as u64;
                    (name, reader.u8()?, reader.u8()?, reader.u16()?, value, size)
                } else {
                    let name = reader.u32()?;
                    let info = reader.u8()?;
                    let other = reader.u8()?;
                    let shndx = reader.u16()?;
                    (name, info, other, shndx, reader.u64()?, reader.u64()?)
                };
                if st_name as usize > dynstr.len() {
                    break;
                }
                symbols.push(ElfSym::new(
                    dynstr_string(&dynstr, st_name as u64),
                    st_info,
                    st_other,
                    st_shndx,
                    st_value,
                    st_size,
                ));
            }
            add_section_or_warn(
                &mut builder,
                &mut warnings,
                ".dynsym",
                symtab,
                reader.pos() as u64,
            );
        }

        let mut relocations = Vec::new();
        let mut locations = BTreeSet::new();

        if let (Some(offset), Some(size)) = (dynamic.get(dt::REL), dynamic.get(dt::RELSZ)) {
            let found =
                process_relocations(&full, armv7, symbols.len(), &mut relocations, offset, size)?;
            locations.extend(found);
        }
        if let (Some(offset), Some(size)) = (dynamic.get(dt::RELA), dynamic.get(dt::RELASZ)) {
            let found =
                process_relocations(&full, armv7, symbols.len(), &mut relocations, offset, size)?;
            locations.extend(found);
        }
        if let (Some(offset), Some(size)) = (dynamic.get(dt::RELR), dynamic.get(dt::RELRSZ)) {
            let found = process_relocations_relr(&full, &mut relocations, offset, size)?;
            locations.extend(found);
        }

        let mut plt_entries = Vec::new();
        let mut plt_got = None;
        if let (Some(jmprel), Some(pltrelsz)) =
            (dynamic.get(dt::JMPREL), dynamic.get(dt::PLTRELSZ))
        {
            let plt_locations = process_relocations(
                &full,
                armv7,
                symbols.len(),
                &mut relocations,
                jmprel,
                pltrelsz,
            )?;
            locations.extend(&plt_locations);

            if let (Some(&first), Some(&last)) = (plt_locations.first(), plt_locations.last()) {
                let plt_got_start = first;
                let plt_got_end = last.saturating_add(offsize);
                if let Some(pltgot) = dynamic.get(dt::PLTGOT) {
                    add_section_or_warn(
                        &mut builder,
                        &mut warnings,
                        ".got.plt",
                        pltgot,
                        plt_got_end,
                    );
                }
                if !armv7 {
                    plt_entries =
                        scan_plt_stubs(&full, text_info.vsize, plt_got_start, plt_got_end);
                    let stubs = plt_entries.iter().map(|entry| entry.stub_offset);
                    if let (Some(first_stub), Some(last_stub)) =
                        (stubs.clone().min(), stubs.max())
                    {
                        add_section_or_warn(
                            &mut builder,
                            &mut warnings,
                            ".plt",
                            first_stub,
                            last_stub + 0x10,
                        );
                    }
                }
                plt_got = Some((plt_got_start, plt_got_end));
            }
        }

        let got = if let Some((libnx_start, libnx_end)) = header.libnx_got {
            add_section_or_warn(&mut builder, &mut warnings, ".got", libnx_start, libnx_end);
            Some((libnx_start, libnx_end))
        } else {
            let inferred = infer_got_range(
                &locations,
                plt_got.map(|(_, end)| end),
                dynamic_offset + dynamic_size,
                dynamic.get(dt::INIT_ARRAY),
                offsize,
            );
            if let Some((start, end)) = inferred {
                add_section_or_warn(&mut builder, &mut warnings, ".got", start, end);
            }
            inferred
        };

        let mut eh_table = Vec::new();
        if !armv7 {
            let (table, eh_frame) =
                parse_eh_frame_hdr(&full, header.unwind_offset, header.unwind_end)?;
            eh_table = table;
            if let Some((start, end)) = eh_frame {
                add_section_or_warn(&mut builder, &mut warnings, ".eh_frame", start, end);
            }
        }

        let sections = builder.flatten();

        Ok(NxoFile {
            kind,
            armv7,
            full,
            text: text_info,
            ro: ro_info,
            data: data_info,
            data_size,
            header_bss_size,
            bss_offset: header.bss_start,
            bss_size,
            mod_offset: header.mod_offset,
            dynamic_offset,
            dynamic_size,
            unwind_offset: header.unwind_offset,
            unwind_end: header.unwind_end,
            module_offset: header.module_offset,
            is_libnx: header.libnx_got.is_some(),
            dynamic,
            dynstr,
            needed,
            symbols,
            relocations,
            plt_entries,
            got,
            eh_table,
            sections,
            build_id,
            assets,
            warnings,
        })
    }

    /// The reassembled flat image; all model offsets index into it.
    pub fn image(&self) -> &[u8] {
        &self.full
    }

    pub fn dynstr_at(&self, offset: u64) -> String {
        dynstr_string(&self.dynstr, offset)
    }

    pub fn relocation_symbol(&self, relocation: &Relocation) -> Option<&ElfSym> {
        relocation.sym.and_then(|index| self.symbols.get(index))
    }

    pub fn build_id_hex(&self) -> Option<String> {
        self.build_id.as_ref().map(|id| hex_bytes(id))
    }

    /// Recovers the module's build path from `.rodata`: either a
    /// length-framed blob in a small rodata remainder, or the last
    /// path-looking string ending in `.nss`/`.nrs`.
    pub fn path_or_name(&self) -> Option<Vec<u8>> {
        for part in &self.sections {
            if part.name != ".rodata" {
                continue;
            }
            let size = part.end - part.start;
            if size <= 8 || size >= 0x1000 {
                continue;
            }
            let Ok(slice) = read_bytes(&self.full, part.start as usize, size as usize) else {
                continue;
            };
            let Some(first_nonzero) = slice.iter().position(|&byte| byte != 0) else {
                continue;
            };
            let blob = &slice[first_nonzero..];
            if blob.len() < 4 {
                continue;
            }
            let length = u32::from_le_bytes([blob[0], blob[1], blob[2], blob[3]]) as usize;
            if let Some(end) = length.checked_add(4) {
                if end <= blob.len() {
                    return Some(blob[4..end].to_vec());
                }
            }
        }

        let start = (self.ro.vaddr as usize).min(self.full.len());
        let end = ((self.ro.vaddr + self.ro.vsize) as usize).min(self.full.len());
        let rodata = &self.full[start..end];
        let pattern = Regex::new(r"(?i-u)[a-z]:[\\/][ -~]{5,}\.n[rs]s").ok()?;
        pattern
            .find_iter(rodata)
            .last()
            .map(|found| found.as_bytes().to_vec())
    }

    pub fn name(&self) -> Option<String> {
        let raw = self.path_or_name()?;
        let mut name: &[u8] = &raw;
        if let Some(pos) = name.iter().rposition(|&byte| byte == b'/') {
            name = &name[pos + 1..];
        }
        if let Some(pos) = name.iter().rposition(|&byte| byte == b'\\') {
            name = &name[pos + 1..];
        }
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(b".nss") || lower.ends_with(b".nrs") {
            name = &name[..name.len() - 4];
        }
        Some(String::from_utf8_lossy(name).into_owned())
    }
}

fn build_flat_image(
    text: Vec<u8>,
    ro: &[u8],
    ro_vaddr: u64,
    data: &[u8],
    data_vaddr: u64,
    warnings: &mut Vec<String>,
) -> Vec<u8> {
    let mut full = text;
    let ro_vaddr = ro_vaddr as usize;
    if ro_vaddr >= full.len() {
        full.resize(ro_vaddr, 0);
    } else {
        warnings.push("truncating .text to the start of .rodata".to_string());
        full.truncate(ro_vaddr);
    }
    full.extend_from_slice(ro);

    let data_vaddr = data_vaddr as usize;
    if data_vaddr >= full.len() {
        full.resize(data_vaddr, 0);
    } else {
        warnings.push("truncating .rodata to the start of .data".to_string());
        full.truncate(data_vaddr);
    }
    full.extend_from_slice(data);
    full
}

fn parse_mod_header(full: &[u8]) -> Result<ModHeader, NxoError> {
    let mod_offset = read_u32(full, 4)? as u64;
    let mut reader = Reader::at(full, mod_offset as usize);
    if reader.take(4)? != b"MOD0" {
        return Err(NxoError::BadMod);
    }
    let dynamic_offset = add_signed(mod_offset, reader.i32()?);
    let bss_start = add_signed(mod_offset, reader.i32()?);
    let bss_end = add_signed(mod_offset, reader.i32()?);
    let unwind_offset = add_signed(mod_offset, reader.i32()?);
    let unwind_end = add_signed(mod_offset, reader.i32()?);
    let module_offset = add_signed(mod_offset, reader.i32()?);

    let mut libnx_got = None;
    if let Ok(magic) = reader.take(4) {
        if magic == b"LNY0" {
            let start = add_signed(mod_offset, reader.i32()?);
            let end = add_signed(mod_offset, reader.i32()?);
            libnx_got = Some((start, end));
        }
    }

    Ok(ModHeader {
        mod_offset,
        dynamic_offset,
        bss_start,
        bss_end,
        unwind_offset,
        unwind_end,
        module_offset,
        libnx_got,
    })
}

// MOD0 offsets are signed and relative to the MOD header itself.
fn add_signed(base: u64, offset: i32) -> u64 {
    (base as i64).wrapping_add(offset as i64) as u64
}

fn add_section_or_warn(
    builder: &mut SegmentBuilder,
    warnings: &mut Vec<String>,
    name: &str,
    start: u64,
    end: u64,
) {
    if let Err(error) = builder.add_section(name, start, end) {
        warnings.push(error);
    }
}

fn dynstr_string(dynstr: &[u8], offset: u64) -> String {
    let start = (offset as usize).min(dynstr.len());
    let tail = &dynstr[start..];
    let end = tail.iter().position(|&byte| byte == 0).unwrap_or(tail.len());
    String::from_utf8_lossy(&tail[..end]).into_owned()
}

fn process_relocations(
    full: &[u8],
    armv7: bool,
    symbol_count: usize,
    relocations: &mut Vec<Relocation>,
    offset: u64,
    size: u64,
) -> Result<BTreeSet<u64>, NxoError> {
    let record_size = if armv7 { 8 } else { 0x18 };
    let mut locations = BTreeSet::new();
    let mut reader = Reader::at(full, offset as usize);
    for _ in 0..(size / record_size) {
        let (target, r_type, r_sym, addend) = if armv7 {
            let target = reader.u32()? as u64;
            let info = reader.u32()?;
            (target, info & 0xFF, (info >> 8) as usize, None)
        } else {
            let target = reader.u64()?;
            let info = reader.u64()?;
            let addend = reader.i64()?;
            (
                target,
                (info & 0xFFFF_FFFF) as u32,
                (info >> 32) as usize,
                Some(addend),
            )
        };
        let sym = if r_sym != 0 && r_sym < symbol_count {
            Some(r_sym)
        } else {
            None
        };
        // TLS descriptor slots are not GOT entries
        if r_type != r_aarch64::TLSDESC && r_type != r_arm::TLS_DESC {
            locations.insert(target);
        }
        relocations.push(Relocation {
            offset: target,
            r_type,
            sym,
            addend,
        });
    }
    Ok(locations)
}

fn process_relocations_relr(
    full: &[u8],
    relocations: &mut Vec<Relocation>,
    offset: u64,
    size: u64,
) -> Result<BTreeSet<u64>, NxoError> {
    let mut locations = BTreeSet::new();
    let mut reader = Reader::at(full, offset as usize);
    let mut position: Option<u64> = None;
    let mut record = |locations: &mut BTreeSet<u64>, target: u64| {
        locations.insert(target);
        relocations.push(Relocation {
            offset: target,
            r_type: R_FAKE_RELR,
            sym: None,
            addend: Some(0),
        });
    };
    for _ in 0..(size / 8) {
        let entry = reader.u64()?;
        if entry & 1 != 0 {
            let base = position.ok_or_else(|| {
                NxoError::Truncated("RELR stream begins with a bitmap entry".to_string())
            })?;
            let bitmap = entry >> 1;
            for bit in 0..63 {
                if bitmap & (1 << bit) != 0 {
                    record(&mut locations, base.saturating_add(bit * 8));
                }
            }
            position = Some(base.saturating_add(63 * 8));
        } else {
            record(&mut locations, entry);
            position = Some(entry.saturating_add(8));
        }
    }
    Ok(locations)
}

/// Scans executable bytes for the four-instruction AArch64 PLT stub
/// pattern `ADRP x16; LDR x17, [x16, #off]; ADD x16, ...; BR x17`
/// and keeps matches whose decoded target lands in the PLT GOT.
fn scan_plt_stubs(
    full: &[u8],
    text_size: u64,
    plt_got_start: u64,
    plt_got_end: u64,
) -> Vec<PltEntry> {
    let text = &full[..(text_size as usize).min(full.len())];
    let needle = AARCH64_RET_X17.to_le_bytes();
    let mut entries = Vec::new();
    let mut from = 12;
    while let Some(pos) = find_word(text, &needle, from) {
        from = pos + 1;
        if pos % 4 != 0 {
            continue;
        }
        let stub = pos - 12;
        let adrp = word_at(text, stub);
        let ldr = word_at(text, stub + 4);
        if adrp & 0x9F00_001F != 0x9000_0010 || ldr & 0xFFE0_03FF != 0xF940_0211 {
            continue;
        }
        let page = (stub as u64) & !0xFFF;
        let immlo = ((adrp >> 29) & 0x3) as u64;
        let immhi = ((adrp >> 5) & 0x7_FFFF) as u64;
        let page_addr = page + ((immlo << 12) | (immhi << 14));
        let slot = (((ldr >> 10) & 0xFFF) as u64) << 3;
        let target = page_addr + slot;
        if (plt_got_start..plt_got_end).contains(&target) {
            entries.push(PltEntry {
                stub_offset: stub as u64,
                got_target: target,
            });
        }
    }
    entries
}

fn word_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Walks GOT slots upward from the end of the PLT GOT (or the end of
/// `.dynamic` when there was no PLT) while each next slot is known to
/// be relocated, stopping at the init array.
fn infer_got_range(
    locations: &BTreeSet<u64>,
    plt_got_end: Option<u64>,
    dynamic_end: u64,
    init_array: Option<u64>,
    offsize: u64,
) -> Option<(u64, u64)> {
    let got_start = plt_got_end.unwrap_or(dynamic_end);
    let mut got_end = got_start.saturating_add(offsize);
    let mut extended = false;
    loop {
        let next_is_slot = locations.contains(&got_end)
            || (plt_got_end.is_none() && init_array.is_some_and(|array| got_end < array));
        let within_bounds = match init_array {
            None => true,
            Some(array) => got_end < array || array < got_start,
        };
        if !(next_is_slot && within_bounds) {
            break;
        }
        extended = true;
        got_end = match got_end.checked_add(offsize) {
            Some(next) => next,
            None => break,
        };
    }
    extended.then_some((got_start, got_end))
}

fn parse_eh_frame_hdr(
    full: &[u8],
    unwind_offset: u64,
    unwind_end: u64,
) -> Result<(Vec<(u64, u64)>, Option<(u64, u64)>), NxoError> {
    const DW_EH_PE_OMIT: u8 = 0xFF;
    const DW_EH_PE_PCREL_SDATA4: u8 = 0x1B;
    const DW_EH_PE_ABSPTR_UDATA4: u8 = 0x03;
    const DW_EH_PE_DATAREL_SDATA4: u8 = 0x3B;

    let mut reader = Reader::at(full, unwind_offset as usize);
    let _version = reader.u8()?;
    let eh_frame_ptr_enc = reader.u8()?;
    let fde_count_enc = reader.u8()?;
    let table_enc = reader.u8()?;
    if eh_frame_ptr_enc == DW_EH_PE_OMIT
        || fde_count_enc == DW_EH_PE_OMIT
        || table_enc == DW_EH_PE_OMIT
    {
        return Ok((Vec::new(), None));
    }
    if eh_frame_ptr_enc != DW_EH_PE_PCREL_SDATA4
        || fde_count_enc != DW_EH_PE_ABSPTR_UDATA4
        || table_enc != DW_EH_PE_DATAREL_SDATA4
    {
        return Ok((Vec::new(), None));
    }

    let base = reader.pos() as u64;
    let eh_frame = add_signed(base, reader.i32()?);
    let fde_count = reader.u32()? as u64;

    let mut table = Vec::new();
    if 8 * fde_count <= unwind_end.saturating_sub(reader.pos() as u64) {
        for _ in 0..fde_count {
            let pc = add_signed(unwind_offset, reader.i32()?);
            let fde = add_signed(unwind_offset, reader.i32()?);
            table.push((pc, fde));
        }
    }

    let section = table
        .iter()
        .map(|&(_, fde)| fde)
        .max()
        .map(|last| (eh_frame, last));
    Ok((table, section))
}
