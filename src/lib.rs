//! A library implementation of the OAI-PMH 2.0 protocol: a repository
//! server side (backend trait, resumption-token pagination, XML
//! response builder) and a harvesting client side (retrying request
//! engine, lazy cross-batch record iteration, datestamp granularity
//! negotiation).
//!
//! This crate has no process-level entry point; embedding programs
//! supply their own CLI, configuration, and logging initialization
//! around it.

pub mod args;
pub mod client;
pub mod datestamp;
pub mod error;
pub mod model;
pub mod registry;
pub mod server;
pub mod xmltree;

pub use error::{OaiError, Result};
