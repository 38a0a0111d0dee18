//! Sharded, JSON-backed key-value store for application preferences.
//!
//! Keys are spread over a fixed number of shards. Each shard holds its
//! entries in memory behind its own lock, remembers whether it has unsaved
//! changes, and writes its own file once mutations have been quiet for a
//! while (or when you flush). Files are replaced atomically, so a crash never
//! leaves a half-written shard behind.
//!
//! ```rust,no_run
//! use json_shards::ShardedStore;
//!
//! # async fn demo() -> json_shards::Result<()> {
//! let store = ShardedStore::open("prefs")?;
//! store.put("theme", "dark").await?;
//! assert_eq!(store.get::<String>("theme").await?.as_deref(), Some("dark"));
//! store.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! Needs a tokio runtime. **Single-process only.** If multiple processes open
//! the same directory they will clobber each other's files.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod config;
pub mod error;
pub mod flush;
pub mod persist;
pub mod prefs;
pub mod shard;
pub mod store;

pub use codec::{Codec, Document, JsonCodec};
pub use config::StoreConfig;
pub use error::{Error, Result};
pub use flush::{FlushOutcome, FlushPolicy};
pub use prefs::{PrefKey, Preferences};
pub use shard::{Shard, ShardPhase};
pub use store::{ShardedStore, StoreBuilder};
