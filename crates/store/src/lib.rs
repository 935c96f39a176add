//! Store - Local persistence for the autosave pipeline
//!
//! This crate holds the durable pending-save queue, the key/value storage
//! backends it is written through, and application settings.

mod error;
mod queue;
mod settings;
mod storage;

pub use error::*;
pub use queue::*;
pub use settings::*;
pub use storage::*;
