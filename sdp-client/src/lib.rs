//! SDP client: unlocks the controller over SPA, discovers authorized
//! services over mutual TLS and keeps access to them open.

pub mod config;
pub mod discover;
pub mod error;
pub mod orchestrator;
pub mod spa;

pub use error::{Error, Result};
