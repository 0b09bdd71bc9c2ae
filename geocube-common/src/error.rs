use std::path::PathBuf;
use thiserror::Error;

/// Error taxonomy shared by the tree, metacube, and cache layers.
#[derive(Error, Debug)]
pub enum GeocubeError {
    #[error("value {value} on dimension {dim} is out of range [{min}, {max}]")]
    OutOfRange {
        dim: u32,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("dimension {0} not found in query/point")]
    DimensionMissing(u32),

    #[error("metacube {cube_id} is corrupted: {reason}")]
    Corrupted { cube_id: i32, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, GeocubeError>;
