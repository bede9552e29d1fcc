use crate::containers::{ContainerImage, ContainerKind, SegmentData};
use crate::error::NxoError;
use crate::util::{read_bytes, read_u32, read_u64};

const ASSET_MAGIC: &[u8; 4] = b"ASET";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NroAssetSection {
    pub offset: u64,
    pub size: u64,
}

// Trailing homebrew asset block (icon, control data, romfs) found
// after the loadable image in libnx NROs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NroAssetHeader {
    pub icon: NroAssetSection,
    pub nacp: NroAssetSection,
    pub romfs: NroAssetSection,
    pub base_offset: u64,
}

pub(crate) fn parse(bytes: &[u8]) -> Result<ContainerImage, NxoError> {
    let total_size = read_u32(bytes, 0x18)?;

    let tloc = read_u32(bytes, 0x20)?;
    let tsize = read_u32(bytes, 0x24)?;
    let rloc = read_u32(bytes, 0x28)?;
    let rsize = read_u32(bytes, 0x2C)?;
    let dloc = read_u32(bytes, 0x30)?;
    let dsize = read_u32(bytes, 0x34)?;
    let bss_size = read_u32(bytes, 0x38)?;
    let build_id = read_bytes(bytes, 0x40, 0x20)?
        .try_into()
        .map_err(|_| NxoError::Truncated("NRO build id".to_string()))?;

    let text = slice_segment(bytes, tloc, tsize)?;
    let ro = slice_segment(bytes, rloc, rsize)?;
    let data = slice_segment(bytes, dloc, dsize)?;

    let assets = parse_assets(bytes, total_size as usize);

    Ok(ContainerImage {
        kind: ContainerKind::Nro,
        text,
        ro,
        data,
        bss_size: bss_size as u64,
        build_id: Some(build_id),
        assets,
    })
}

// NROs are stored uncompressed with file offsets equal to vaddrs.
fn slice_segment(bytes: &[u8], vaddr: u32, vsize: u32) -> Result<SegmentData, NxoError> {
    let raw = read_bytes(bytes, vaddr as usize, vsize as usize)?;
    Ok(SegmentData {
        bytes: raw.to_vec(),
        file_offset: Some(vaddr as u64),
        vaddr: vaddr as u64,
        vsize: vsize as u64,
    })
}

fn parse_assets(bytes: &[u8], offset: usize) -> Option<NroAssetHeader> {
    let magic = read_bytes(bytes, offset, 4).ok()?;
    if magic != ASSET_MAGIC {
        return None;
    }
    let icon_offset = read_u64(bytes, offset + 0x8).ok()?;
    let icon_size = read_u64(bytes, offset + 0x10).ok()?;
    let nacp_offset = read_u64(bytes, offset + 0x18).ok()?;
    let nacp_size = read_u64(bytes, offset + 0x20).ok()?;
    let romfs_offset = read_u64(bytes, offset + 0x28).ok()?;
    let romfs_size = read_u64(bytes, offset + 0x30).ok()?;

    Some(NroAssetHeader {
        icon: NroAssetSection {
            offset: icon_offset,
            size: icon_size,
        },
        nacp: NroAssetSection {
            offset: nacp_offset,
            size: nacp_size,
        },
        romfs: NroAssetSection {
            offset: romfs_offset,
            size: romfs_size,
        },
        base_offset: offset as u64,
    })
}
