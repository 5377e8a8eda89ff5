#![forbid(unsafe_code)]

//! Voracious code storage: a TCP service for content-versioned text files.
//!
//! Clients speak a line-framed command protocol (`PUT`/`GET`/`LIST`/`HELP`)
//! against an in-memory store that keeps every accepted revision of every
//! file and projects the flat key space into directory listings.

pub mod cli;
pub mod config;
pub mod error;
pub mod listing;
pub mod path;
pub mod server;
pub mod store;
pub mod telemetry;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

pub use crate::store::{LookupError, Revision, RevisionRef, Store};
