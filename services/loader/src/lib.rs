//! Crime records loader
//!
//! Cleans a violent-crime export, resolves it into a third normal form model,
//! persists it once per target and computes aggregate views over the facts.
//!
//! Stages run strictly in order:
//! [`clean`] → [`resolve`] → [`writer`] → [`aggregate`].

pub mod aggregate;
pub mod clean;
pub mod config;
pub mod db;
pub mod error;
pub mod pipeline;
pub mod resolve;
pub mod writer;

pub use config::{ConnectionTarget, PipelineConfig};
pub use error::{PipelineError, ReferentialIntegrityError, Result, RowValidationError};
