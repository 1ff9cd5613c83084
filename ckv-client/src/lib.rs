//! # CoralKV Sync Client
//!
//! Provide a lightweight, blocking RESP client with a reconnecting
//! connection, typed helpers for the common commands, and a raw escape
//! hatch for everything else.

mod client;
mod resp;

pub use client::{ClientConfig, ClientError, ClientResult, ClientTtl, KvClient};
pub use resp::Reply;
