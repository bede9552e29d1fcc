use crate::error::NxoError;
use crate::util::read_u32;

/// Backward-LZ decoder for KIP1 segments. The stream carries a
/// 12-byte footer `(compressed_size, init_index, addl_size)` and is
/// expanded in place from the high end of the buffer downward.
pub fn kip1_blz_decompress(compressed: &[u8]) -> Result<Vec<u8>, NxoError> {
    if compressed.len() < 0xC {
        return Err(NxoError::BadCompression);
    }
    let footer = compressed.len() - 0xC;
    let compressed_size = read_u32(compressed, footer)? as usize;
    let init_index = read_u32(compressed, footer + 4)? as usize;
    let addl_size = read_u32(compressed, footer + 8)? as usize;

    if compressed_size + addl_size == 0 {
        return Ok(Vec::new());
    }

    let mut out = vec![0u8; compressed.len() + addl_size];
    out[..compressed.len()].copy_from_slice(compressed);

    let cmp_start = compressed
        .len()
        .checked_sub(compressed_size)
        .ok_or(NxoError::BadCompression)?;
    let mut cmp_ofs = compressed_size
        .checked_sub(init_index)
        .ok_or(NxoError::BadCompression)?;
    let mut out_ofs = compressed_size + addl_size;

    while out_ofs > 0 {
        cmp_ofs = cmp_ofs.checked_sub(1).ok_or(NxoError::BadCompression)?;
        let mut control = out[cmp_start + cmp_ofs];
        for _ in 0..8 {
            if control & 0x80 != 0 {
                cmp_ofs = cmp_ofs.checked_sub(2).ok_or(NxoError::BadCompression)?;
                let code = compressed[cmp_start + cmp_ofs] as usize
                    | (compressed[cmp_start + cmp_ofs + 1] as usize) << 8;
                let size = ((code >> 12) & 0xF) + 3;
                let offset = (code & 0x0FFF) + 2;
                for _ in 0..size {
                    let src = cmp_start + out_ofs + offset;
                    if src >= out.len() {
                        return Err(NxoError::BadCompression);
                    }
                    let data = out[src];
                    out_ofs = out_ofs.checked_sub(1).ok_or(NxoError::BadCompression)?;
                    out[cmp_start + out_ofs] = data;
                }
            } else {
                out_ofs = out_ofs.checked_sub(1).ok_or(NxoError::BadCompression)?;
                cmp_ofs = cmp_ofs.checked_sub(1).ok_or(NxoError::BadCompression)?;
                out[cmp_start + out_ofs] = out[cmp_start + cmp_ofs];
            }
            control <<= 1;
            if out_ofs == 0 {
                break;
            }
        }
    }
    Ok(out)
}
