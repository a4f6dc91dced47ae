//! Rate limiting logic and state management.

pub mod clock;
mod limiter;
mod registry;
mod window;

pub use clock::Timestamp;
pub use limiter::RateLimiter;
pub use registry::PolicyRegistry;
pub use window::SlidingWindow;
