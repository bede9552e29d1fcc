use crate::blz::kip1_blz_decompress;
use crate::containers::{ContainerImage, ContainerKind, SegmentData};
use crate::error::NxoError;
use crate::util::{read_bytes, read_u32};

const FLAG_TEXT_COMPRESSED: u8 = 0x1;
const FLAG_RO_COMPRESSED: u8 = 0x2;
const FLAG_DATA_COMPRESSED: u8 = 0x4;

// KIP1 stores segments back to back starting right after the header.
const KIP_BODY_OFFSET: u32 = 0x100;

pub(crate) fn parse(bytes: &[u8]) -> Result<ContainerImage, NxoError> {
    let flags = read_bytes(bytes, 0x1F, 1)?[0];

    let (tloc, tsize, tfilesize) = read_descriptor(bytes, 0x20)?;
    let (rloc, rsize, rfilesize) = read_descriptor(bytes, 0x30)?;
    let (dloc, dsize, dfilesize) = read_descriptor(bytes, 0x40)?;

    let toff = KIP_BODY_OFFSET;
    let roff = toff + tfilesize;
    let doff = roff + rfilesize;

    let bss_size = read_u32(bytes, 0x54)?;

    let text = decode_segment(
        bytes,
        toff,
        tfilesize,
        tloc,
        tsize,
        flags & FLAG_TEXT_COMPRESSED != 0,
    )?;
    let ro = decode_segment(
        bytes,
        roff,
        rfilesize,
        rloc,
        rsize,
        flags & FLAG_RO_COMPRESSED != 0,
    )?;
    let data = decode_segment(
        bytes,
        doff,
        dfilesize,
        dloc,
        dsize,
        flags & FLAG_DATA_COMPRESSED != 0,
    )?;

    Ok(ContainerImage {
        kind: ContainerKind::Kip,
        text,
        ro,
        data,
        bss_size: bss_size as u64,
        build_id: None,
        assets: None,
    })
}

fn read_descriptor(bytes: &[u8], offset: usize) -> Result<(u32, u32, u32), NxoError> {
    Ok((
        read_u32(bytes, offset)?,
        read_u32(bytes, offset + 4)?,
        read_u32(bytes, offset + 8)?,
    ))
}

fn decode_segment(
    bytes: &[u8],
    file_offset: u32,
    file_size: u32,
    vaddr: u32,
    vsize: u32,
    compressed: bool,
) -> Result<SegmentData, NxoError> {
    let raw = read_bytes(bytes, file_offset as usize, file_size as usize)?;
    if compressed {
        let decoded = kip1_blz_decompress(raw)?;
        Ok(SegmentData {
            bytes: decoded,
            file_offset: None,
            vaddr: vaddr as u64,
            vsize: vsize as u64,
        })
    } else {
        Ok(SegmentData {
            bytes: raw.to_vec(),
            file_offset: Some(file_offset as u64),
            vaddr: vaddr as u64,
            vsize: vsize as u64,
        })
    }
}
