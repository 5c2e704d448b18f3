//! Knapsack Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging for the knapsack workspace.
//!
//! - **Error Handling**: [`KnapsackError`] and the [`Result`] alias used by
//!   every library crate
//! - **Logging**: [`logging::LogConfig`] and [`logging::init_logging`]
//!
//! # Example
//!
//! ```no_run
//! use knapsack_common::{KnapsackError, Result};
//!
//! fn require_suffix(path: &str) -> Result<()> {
//!     if !path.contains('.') {
//!         return Err(KnapsackError::CodecNotFound(path.to_string()));
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

pub use error::{KnapsackError, Result};
