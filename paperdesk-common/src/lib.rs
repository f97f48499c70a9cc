//! # paperdesk common library
//!
//! Shared code for the paperdesk crates:
//! - Event types (`UploadEvent`) and the broadcast `EventBus`
//! - Bootstrap TOML configuration and root folder resolution
//! - Server-Sent Events helpers
//! - Common error type

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
