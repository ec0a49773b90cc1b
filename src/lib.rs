//! Lead Outreach - staggered chat campaigns
//!
//! Sends a capped, randomly spaced batch of first-contact messages to leads
//! from a contact ledger, and replies once to every lead that answers with
//! interest. Transport is delegated to an external messaging bridge.

pub mod contacts;
pub mod channel;
pub mod bridge;
pub mod scheduler;
pub mod responder;
pub mod campaign;
pub mod config;
pub mod error;

pub use error::{Error, Result};
