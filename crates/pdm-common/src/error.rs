//! Errors shared across PDM crates

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PdmError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PdmError {
    /// A sensor label other than `acc` or `mic`
    #[error("Unknown sensor kind '{0}' (expected acc or mic)")]
    UnknownSensor(String),
}
