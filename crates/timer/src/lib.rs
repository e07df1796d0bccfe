//! # Timer Crate
//!
//! Gates strategy activity by the exchange's published trading schedule:
//! [`SessionTimer`] emits `Start` when the main session opens and `Stop` a
//! configurable lead time before it closes, then waits for the next
//! trading day.

pub mod clock;
pub mod error;
pub mod session;

pub use clock::{AnchoredClock, Clock, SystemClock};
pub use error::TimerError;
pub use session::{SessionEvent, SessionTimer, TimerState};
