//! Shared utilities for the Apollo Snow consensus core.
//!
//! - [`Bag`]: a multiset with threshold tracking, used to tally poll replies
//! - [`logging`]: tracing subscriber configuration
//! - [`timer`]: elapsed-time measurement for poll rounds

pub mod bag;
pub mod logging;
pub mod timer;

pub use bag::Bag;
pub use timer::Timer;
