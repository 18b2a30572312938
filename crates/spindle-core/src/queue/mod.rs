//! Queue module: record store, retry policy, engine and workers.

mod engine;
mod retry;
mod store;
mod worker;

pub use engine::{Engine, WeakEngine};
pub use retry::RetryPolicy;
