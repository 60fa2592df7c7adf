//! Rate limiting strategies and state management.

mod backend;
mod clock;
mod decision;
mod limiter;
mod mapping;

pub mod counter;
pub mod rules;
pub mod store;
pub mod window;

pub use backend::{spawn_sweeper, RateLimiter};
pub use clock::{Clock, ManualClock, MonotonicClock, Timestamp};
pub use counter::{CounterState, Strategy};
pub use decision::{Decision, KeyState};
pub use limiter::{LimitConfig, SweepConfig};
pub use mapping::{DynamicMapping, FixedMapping, JumpingWindow};
pub use rules::{LimitRule, TimeUnit};
