//! Core domain + application logic for the Titus moderation bot.
//!
//! This crate is intentionally framework-agnostic. The Telegram Bot API, the
//! Titorelli services (CAS, classifier) and the transmitter relay live behind
//! ports (traits) implemented in adapter crates.

pub mod bot;
pub mod config;
pub mod dedup;
pub mod domain;
pub mod dry_run;
pub mod errors;
pub mod logging;
pub mod manager;
pub mod moderation;
pub mod outgoing;
pub mod ports;
pub mod session;
pub mod timeout;
pub mod update;
pub mod welcome;

pub use errors::{Error, Result};
