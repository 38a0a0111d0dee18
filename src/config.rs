//! Store configuration with sensible defaults.

use crate::flush::FlushPolicy;
use crate::persist::shard_file_name;
use std::path::PathBuf;

/// Default number of shards.
pub const DEFAULT_SHARD_COUNT: usize = 16;

/// Everything a [`ShardedStore`](crate::ShardedStore) needs to know about its
/// files. Usually filled in through
/// [`StoreBuilder`](crate::StoreBuilder).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Directory holding the shard files. Created on open if missing.
    pub base_dir: PathBuf,
    /// Number of shards. Fixed for the lifetime of the files: changing it
    /// re-routes keys and strands data in the old shards.
    pub shard_count: usize,
    /// When dirty shards write themselves out.
    pub policy: FlushPolicy,
    /// Gzip each shard file (`.json.gz`).
    pub compression: bool,
    /// Indent the JSON inside shard files.
    pub pretty: bool,
    /// Rename unreadable shard files to `.corrupt` instead of deleting them.
    pub backup_corrupt: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            shard_count: DEFAULT_SHARD_COUNT,
            policy: FlushPolicy::default(),
            compression: false,
            pretty: false,
            backup_corrupt: true,
        }
    }
}

impl StoreConfig {
    /// Path of the backing file for shard `index`.
    pub fn shard_path(&self, index: usize) -> PathBuf {
        self.base_dir.join(shard_file_name(index, self.compression))
    }
}
