//! Catalog Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling, logging and text helpers for the catalog workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`CatalogError`] and the [`Result`] alias
//! - **Logging**: [`logging::LogConfig`] and [`logging::init_logging`]
//! - **Text**: character-safe truncation used before persisting free-form messages
//!
//! # Example
//!
//! ```no_run
//! use catalog_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("catalog tool started");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod text;

// Re-export commonly used types
pub use error::{CatalogError, Result};
