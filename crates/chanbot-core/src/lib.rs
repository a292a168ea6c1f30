//! Command routing, throughput control and privileged-command gating for chanbot.
//!
//! Nothing here knows about the transport: the chat connection lives behind
//! the [`ports::ChatPort`] trait, implemented in adapter crates.

pub mod audit;
pub mod auth;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod ports;
pub mod rate_limit;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
