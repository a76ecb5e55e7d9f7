//! PDM Common Library
//!
//! Shared types, logging setup, and error handling for the PDM toolkit.
//!
//! # Overview
//!
//! - **Errors**: [`PdmError`] and the [`Result`] alias
//! - **Logging**: console/file/JSON `tracing` subscriber setup
//! - **Types**: sensor kinds shared by every component that touches captures
//!
//! # Example
//!
//! ```no_run
//! use pdm_common::{Result, SensorKind};
//!
//! fn prefix(machine: &str, sensor: SensorKind) -> Result<String> {
//!     Ok(format!("{}/raw_dat/{}/", machine, sensor.storage_segment()))
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;
pub mod types;

pub use error::{PdmError, Result};
pub use types::SensorKind;
