//! Async client for a production-tracker HTTP API.
//!
//! This crate is the transport core that entity-level wrapper libraries
//! build on. It covers:
//!
//! - **Dispatch**: `GET`/`POST`/`PUT`/`DELETE` plus streamed upload and
//!   download, with bearer-token injection, a deterministic status-to-error
//!   mapping and a transparent refresh-and-retry cycle on expired tokens.
//! - **Listing**: collection fetches with sequential page aggregation and
//!   small `fetch_*`/`create`/`update` conveniences over the `data/` routes.
//! - **Memoization**: an opt-in bounded, expiring cache for lookup
//!   functions, with per-wrapper switches and counters behind one shared
//!   registry switch.
//!
//! # Quickstart
//!
//! ```no_run
//! use callsheet::Client;
//!
//! #[tokio::main]
//! async fn main() -> callsheet::Result<()> {
//!     let client = Client::builder("https://tracker.studio/api").build()?;
//!     client.log_in("jane@studio.tv", "secret").await?;
//!
//!     let shots = client.fetch_all_paginated("shots", None, Some(100)).await?;
//!     println!("{} shots", shots.len());
//!
//!     client.log_out().await
//! }
//! ```
//!
//! Every fallible operation returns [`Result`] with [`CallsheetError`]
//! describing what the server rejected and on which path. Telemetry is
//! emitted through the `metrics` and `tracing` facades; both are no-ops
//! until the application installs a recorder or subscriber.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod telemetry;

mod auth;
mod records;

pub use cache::{CacheRegistry, CacheStats, Cacheable};
pub use client::{build_path_with_params, url_path_join, Client};
pub use config::{AuthRecovery, ClientBuilder};
pub use error::{CallsheetError, Result};
