//! # Executor Crate
//!
//! Order execution and position state. The [`Executor`] is the only component
//! in the workspace that submits orders; strategies tell it when to `buy`,
//! `sell` or `sell_out` and it decides whether an order is actually sent.
//!
//! ## Architectural Principles
//!
//! - **Execution Abstraction:** orders go through the [`OrderGateway`] trait,
//!   so the live engine ([`LiveGateway`]) and the backtester
//!   ([`SimulatedGateway`]) drive the same executor logic.
//! - **State moves with fills:** a position flips `in_stock` only inside the
//!   book lock and only after a filled report. Rejections are logged and leave
//!   the book untouched; transport errors propagate.
//! - **Shared prices:** the [`LastPriceTable`] is written by the market-data
//!   consumer and read here for sizing, funds checks and profit/stop rules.
//!
//! ## Public API
//!
//! - `Executor`: `buy`, `sell`, `stop_loss`, `sell_out`, `last_price_update`.
//! - `OrderGateway`, `LiveGateway`, `SimulatedGateway`: order destinations.
//! - `LastPriceTable`, `Portfolio`, `Position`.
//! - `ExecutorError`: The specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod error;
pub mod exchange;
pub mod executor;
pub mod portfolio;
pub mod prices;

// Re-export the key components to provide a clean, public-facing API.
pub use error::ExecutorError;
pub use exchange::{LiveGateway, OrderGateway, SimulatedGateway};
pub use executor::{position_quantity, Executor};
pub use portfolio::{Portfolio, Position};
pub use prices::LastPriceTable;
