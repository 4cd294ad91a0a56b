//! Low-level concurrency primitives used by the session/steering coordinator
//! (spec.md §4.1–§4.3).

pub mod arc_lock;
pub mod async_queue;
pub mod rate_limiter;

pub use arc_lock::ArcLock;
pub use async_queue::AsyncQueue;
pub use rate_limiter::RateLimiter;
