//! Storage for checkpoints, progress and notifications.
//!
//! Everything is kept in a TTL-bounded key-value service reached through
//! [`KeyValueStore`]. The stores here add keying, serialization and
//! retention on top of it.

mod checkpoint;
mod event_log;
mod kv;

pub use checkpoint::CheckpointStore;
pub use event_log::EventLog;
pub use kv::{InMemoryKeyValueStore, KeyValueStore};
