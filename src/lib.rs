pub mod backoff;
mod commands;
pub mod error;
mod opts;
pub mod protocol;
mod value;

pub use commands::{Commands, Executor, SetOptions};
pub use error::{Error, Result};
pub use opts::{BackoffFn, Opts};
pub use protocol::{EntryId, Reply, StreamEntry, StreamId};
pub use value::Value;

pub mod tokio;

#[cfg(test)]
mod opts_test;
