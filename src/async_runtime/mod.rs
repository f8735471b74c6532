//! Thin wrapper around the async runtime backing the connection engine's
//! event loop and retransmit worker, so call sites never name `tokio`
//! directly outside of this module.

#[cfg(feature = "async_runtime_tokio")]
mod tokio_impl;

#[cfg(feature = "async_runtime_tokio")]
pub use tokio_impl::*;
