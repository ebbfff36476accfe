#![warn(clippy::all)]
#![allow(clippy::new_without_default)]

//! A Bitcask-inspired, log-structured persistent key-value store core.
//!
//! Keys map to the newest value through an in-memory keydir; every
//! mutation is appended to an on-disk log split into size/entry-bounded
//! segments, each carrying `.hint` and `.log.index` sidecars that make
//! point reads O(1) and recovery fast without requiring the sidecars to be
//! correct — the `.log` itself is always the ground truth.
//!
//! Out of scope here (see the HTTP service / client / CLI that would wrap
//! this crate): network exposure, configuration loading from environment,
//! and request-scoped logging. This crate's only contract with those
//! layers is [`Store`]'s public operation surface.

pub mod config;
pub mod error;
pub mod event;
pub mod keydir;
mod lock;
pub mod manager;
pub mod record;
pub mod segment;
pub mod store;

pub use config::Options;
pub use error::{Error, Result};
pub use event::{Event, EventSink};
pub use keydir::Location;
pub use record::Record;
pub use store::Store;
