//! pingguard-state — ping history and remediation state for pingguard.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for per-target ping histories and the single remediation
//! cooldown record.
//!
//! # Architecture
//!
//! Histories are JSON-serialized into redb's `&[u8]` value columns, keyed
//! by the target's IP address. The remediation state lives under a fixed
//! key in its own table. Whenever a value is destroyed (cleared, or found
//! unreadable) its raw bytes are first copied into the `backups` table
//! under `{key}.{epoch_millis}`.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod history;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use history::{HealthHistory, HISTORY_CAPACITY};
pub use store::StateStore;
pub use types::*;
