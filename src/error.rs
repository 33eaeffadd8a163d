//! Error type shared across the crate.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("antenna array has no elements ({rows} rows x {cols} cols)")]
    EmptyAntennaArray { rows: u16, cols: u16 },

    #[error("malformed resource pool: {0}")]
    MalformedResourcePool(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown vehicle id {0}")]
    UnknownVehicle(u16),

    #[error("no link registered from vehicle {tx} to vehicle {rx}")]
    UnknownLink { tx: u16, rx: u16 },

    #[error("scene error: {0}")]
    Scene(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parse(#[from] serde_json::Error),
}
