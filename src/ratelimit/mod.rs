//! Rate limiting logic: bucket keys, the sliding window limiter and the
//! admission guard placed in front of actions.

mod guard;
mod key;
mod limiter;
mod window;

pub use guard::{Admission, AdmissionGuard, Identify, Rejected};
pub use key::{BucketKey, ClientId};
pub use limiter::{Decision, SlidingWindowLimiter};
pub use window::{WindowConfig, DEFAULT_LIMIT, DEFAULT_WINDOW_SECONDS};
