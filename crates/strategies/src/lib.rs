//! # Strategy Library
//!
//! The trading decisions of the runtime. Strategies are pure logic: they
//! read market data and emit [`Signal`]s, and the runtime (the live `engine`
//! or the `backtester`) applies those signals to the executor.
//!
//! ## Architectural Principles
//!
//! - **Pure Logic:** no strategy talks to the network, the store or the
//!   broker. It depends on `core-types` and `configuration`, plus the
//!   executor only as the target of [`Signal::apply`].
//! - **Same code live and simulated:** the backtester replays stored candles
//!   through exactly the strategies the engine runs.
//!
//! ## Public API
//!
//! - `OrderBookStrategy`: order-book imbalance.
//! - `IntervalStrategy`: corridor (range) trading with `best-width` and
//!   `math-stat` corridors.
//! - `Signal` / `Action`: a decision for one instrument.

// Declare all the modules that constitute this crate.
pub mod error;
pub mod interval;
pub mod order_book;
pub mod signal;

// Re-export the key components to create a clean, public-facing API.
pub use error::StrategyError;
pub use interval::{Corridor, IntervalStrategy};
pub use order_book::OrderBookStrategy;
pub use signal::{Action, Signal};
