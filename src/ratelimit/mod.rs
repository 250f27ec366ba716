//! Rate limiting logic and state management.

pub mod clock;
pub mod compose;
pub mod headers;
pub mod key;
mod limiter;
mod policy;
pub mod presets;
mod store;
mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use compose::{ExemptLimiter, OutcomeLimiter, RequestOutcome, TieredLimiter};
pub use headers::{add_rate_limit_headers, HeaderSink};
pub use key::{client_ip, default_key, HeaderSource, KeyGenerator};
pub use limiter::{get_rate_limit_info, Limiter, RateLimiter};
pub use policy::RateLimitPolicy;
pub use presets::Limiters;
pub use store::{CounterStore, RateLimitEntry, DEFAULT_SWEEP_INTERVAL};
pub use window::{FixedWindow, RateLimitInfo, WindowDecision};
