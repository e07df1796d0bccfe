//! # Database Crate
//!
//! The durable candle archive: a single local SQLite file holding the
//! `candles` series and the per-series `updates` watermarks.
//!
//! ## Architectural Principles
//!
//! - **Adapter:** all SQL lives here. The rest of the workspace sees
//!   [`CandleStore`] and the `Candle` type only.
//! - **Transactional updates:** an update fetches every source window first
//!   and then writes candles and watermark in one transaction, so a failed
//!   update leaves both tables untouched.
//! - **Exact prices:** prices are stored as decimal text and converted back
//!   to `Quotation` without loss; rows that violate the candle invariants are
//!   reported as [`DbError::StoreCorruption`].
//!
//! ## Public API
//!
//! - `CandleStore`: `open`, `load`, `update`, `watermark`.
//! - `connect` / `run_migrations`: lower-level pool helpers.
//! - `DbError`: The specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod connection;
pub mod error;
pub mod store;

// Re-export the key components to create a clean, public-facing API.
pub use connection::{connect, run_migrations};
pub use error::DbError;
pub use store::CandleStore;
