#[derive(Debug, thiserror::Error)]
pub enum NxoError {
    #[error("not an NSO, NRO or KIP file")]
    BadMagic,
    #[error("compressed segment is corrupt")]
    BadCompression,
    #[error("invalid MOD0 magic")]
    BadMod,
    #[error("truncated image: {0}")]
    Truncated(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
