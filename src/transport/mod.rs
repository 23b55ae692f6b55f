//! The remote call boundary.
//!
//! Implemented by:
//! - [`HttpTransport`] - form posts against the remote store (feature `http`)
//! - [`ScriptedTransport`] - in-memory replies for tests and offline demos
//!
//! The sync engine only ever sees `dyn Transport`, so swapping the wire layer
//! leaves every lifecycle and protocol code path unchanged.

#[cfg(feature = "http")]
pub mod http;
pub mod scripted;

use async_trait::async_trait;

use crate::Result;
use crate::protocol::{Reply, Request};

#[cfg(feature = "http")]
pub use http::HttpTransport;
pub use scripted::{ReplyGate, ScriptedTransport};

/// Issues one request and resolves with exactly one reply or error.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<Reply>;
}
