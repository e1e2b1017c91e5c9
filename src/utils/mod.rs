//! Utility Module
//!
//! - [`FpsCounter`]: frame rate measurement for the title-bar stats line
//! - [`RateLimiter`]: per-failure-class log throttling (one line per second)

pub mod fps_counter;
pub mod rate_limit;

pub use fps_counter::{FpsCounter, FrameTiming};
pub use rate_limit::RateLimiter;
