pub mod blz;
pub mod consts;
mod containers;
pub mod error;
pub mod image;
pub mod memory;
pub mod symbols;
mod util;

pub use containers::{load, load_file, ContainerKind, NroAssetHeader, NroAssetSection};
pub use error::NxoError;
pub use image::{DynamicTable, NxoFile, PltEntry, Relocation, SegmentInfo};
pub use memory::{Range, SectionPart, SegmentBuilder, SegmentKind};
pub use symbols::ElfSym;
