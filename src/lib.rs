pub mod bagfile;
pub mod build;
pub mod config;
pub mod dump;
pub mod error;
pub mod hashbucket;
pub mod key;
pub mod logging;
pub mod pattern;
pub mod schema;
pub mod shard;
pub mod trigram;
pub mod wire;

pub use error::{IndexError, Result};

/// The dense, 0-based record id a bag file entry is addressed by.
pub type RecordId = i64;
