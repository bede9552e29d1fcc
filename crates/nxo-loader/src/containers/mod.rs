mod kip;
mod nro;
mod nso;

use std::fs;
use std::path::Path;

use crate::error::NxoError;
use crate::image::NxoFile;

pub use nro::{NroAssetHeader, NroAssetSection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Nso,
    Nro,
    Kip,
}

impl ContainerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContainerKind::Nso => "nso",
            ContainerKind::Nro => "nro",
            ContainerKind::Kip => "kip",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SegmentData {
    pub bytes: Vec<u8>,
    pub file_offset: Option<u64>,
    pub vaddr: u64,
    pub vsize: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct ContainerImage {
    pub kind: ContainerKind,
    pub text: SegmentData,
    pub ro: SegmentData,
    pub data: SegmentData,
    pub bss_size: u64,
    pub build_id: Option<[u8; 32]>,
    pub assets: Option<NroAssetHeader>,
}

/// Detects the container kind from the header magic and parses the
/// file into its structural model.
pub fn load(bytes: &[u8]) -> Result<NxoFile, NxoError> {
    let image = if bytes.len() >= 4 && &bytes[..4] == b"NSO0" {
        nso::parse(bytes)?
    } else if bytes.len() >= 4 && &bytes[..4] == b"KIP1" {
        kip::parse(bytes)?
    } else if bytes.len() >= 0x14 && &bytes[0x10..0x14] == b"NRO0" {
        nro::parse(bytes)?
    } else {
        return Err(NxoError::BadMagic);
    };
    NxoFile::assemble(image)
}

pub fn load_file(path: &Path) -> Result<NxoFile, NxoError> {
    let bytes = fs::read(path)?;
    load(&bytes)
}
