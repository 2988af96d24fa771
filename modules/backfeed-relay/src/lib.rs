pub mod filter;
pub mod handlers;
pub mod lease;
pub mod poller;
pub mod propagator;
pub mod queue;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod webmention;
