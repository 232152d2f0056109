//! Snapex Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging for the snapex workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`SnapexError`] and the [`Result`] alias used by every
//!   pipeline stage
//! - **Logging**: [`logging::init_logging`] installs the tracing subscriber
//!
//! # Example
//!
//! ```no_run
//! use snapex_common::logging::{init_logging, LogConfig};
//! use tracing::info;
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     info!("export starting");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{Result, SnapexError};
