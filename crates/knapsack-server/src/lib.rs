//! Knapsack Server Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! HTTP surface for archive imports.
//!
//! # Overview
//!
//! - **Import endpoints**: `POST /{index}/{type}/_import/{mode}` and its
//!   shorter forms start an import in the background
//! - **Import state**: `GET /_import/state` lists running imports
//! - **S3 fetch**: archives can be downloaded before import (`s3` mode)
//! - **Configuration**: environment-based, with `.env` support
//!
//! # Example
//!
//! ```no_run
//! use knapsack_server::{config::Config, routes, state::AppState};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let addr = format!("{}:{}", config.server.host, config.server.port);
//!     let app = routes::router(AppState::new(config));
//!     let listener = tokio::net::TcpListener::bind(addr).await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod fetch;
pub mod middleware;
pub mod request;
pub mod routes;
pub mod state;

// Re-export commonly used types
pub use config::Config;
pub use error::AppError;
pub use state::AppState;
