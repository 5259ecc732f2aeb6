//! Sliding window rate limiting and its time source.

mod clock;
mod limiter;
mod sweeper;
mod window;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use limiter::{Admission, SlidingWindowLimiter};
pub use sweeper::spawn_sweeper;
pub use window::EventRecord;
