//! Core store type, key routing and builder.

use crate::codec::{Codec, JsonCodec};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::flush::{FlushOutcome, FlushPolicy};
use crate::shard::{Shard, ShardSettings};
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::Hasher;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use twox_hash::XxHash64;

/// Shard that owns `key` in a store with `shard_count` shards.
///
/// XxHash64 with a fixed seed, so the answer is the same in every process
/// and on every platform. The hash is unsigned, so the result is always in
/// `0..shard_count`. `shard_count` is never zero here; the builder rejects it.
pub(crate) fn shard_index(key: &str, shard_count: usize) -> usize {
    debug_assert!(shard_count > 0);
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(key.as_bytes());
    (hasher.finish() % shard_count as u64) as usize
}

struct StoreInner {
    config: StoreConfig,
    codec: JsonCodec,
    shards: Vec<Shard>,
    closed: AtomicBool,
    init: OnceCell<usize>,
    shutdown: CancellationToken,
}

/// Sharded, JSON-backed key-value store with debounced persistence.
///
/// Keys are routed to one of a fixed number of shards; each shard keeps its
/// entries in memory, tracks whether they changed, and writes its own file
/// once it has been quiet for the configured delay (or when you flush).
/// Values can be any serde type, and different keys can hold different types.
///
/// Cheap to clone; clones share the same shards. Every operation waits for
/// the initial load to finish, so nothing ever sees a half-loaded shard.
///
/// Call [`close`](Self::close) before exiting to get the last changes on
/// disk; nothing is flushed automatically on drop.
#[derive(Clone)]
pub struct ShardedStore {
    inner: Arc<StoreInner>,
}

impl ShardedStore {
    /// Open (or create) a store in `base_dir` with the default configuration.
    /// Must be called from inside a tokio runtime.
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self> {
        Self::builder(base_dir).build()
    }

    /// Start configuring a new store. Call [`.build()`](StoreBuilder::build)
    /// when ready.
    pub fn builder(base_dir: impl AsRef<Path>) -> StoreBuilder {
        StoreBuilder::new(base_dir)
    }

    fn from_config(config: StoreConfig, runtime: Handle) -> Self {
        let codec = if config.pretty {
            JsonCodec::pretty()
        } else {
            JsonCodec::new()
        };
        let settings = Arc::new(ShardSettings {
            codec,
            policy: config.policy,
            compression: config.compression,
            backup_corrupt: config.backup_corrupt,
            runtime: runtime.clone(),
        });
        let shutdown = CancellationToken::new();
        let shards = (0..config.shard_count)
            .map(|i| {
                Shard::new(
                    i,
                    config.shard_path(i),
                    Arc::clone(&settings),
                    shutdown.child_token(),
                )
            })
            .collect();

        let store = Self {
            inner: Arc::new(StoreInner {
                config,
                codec,
                shards,
                closed: AtomicBool::new(false),
                init: OnceCell::new(),
                shutdown,
            }),
        };

        let background = store.clone();
        let token = store.inner.shutdown.clone();
        runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = background.ready() => {}
            }
        });
        store
    }

    // ---- initialization ----

    /// Wait until every shard has loaded its file. Returns the total number
    /// of entries loaded. Runs the load itself if the background task hasn't
    /// got to it yet.
    pub async fn ready(&self) -> usize {
        *self
            .inner
            .init
            .get_or_init(|| async {
                let counts = join_all(self.inner.shards.iter().map(Shard::load)).await;
                let items: usize = counts.iter().sum();
                info!(
                    dir = %self.inner.config.base_dir.display(),
                    shards = counts.len(),
                    items,
                    "store loaded"
                );
                items
            })
            .await
    }

    // ---- routing ----

    /// Index of the shard that owns `key`.
    #[must_use]
    pub fn shard_index(&self, key: &str) -> usize {
        shard_index(key, self.inner.shards.len())
    }

    /// The shard that owns `key`.
    #[must_use]
    pub fn shard_for(&self, key: &str) -> &Shard {
        &self.inner.shards[self.shard_index(key)]
    }

    /// Shard by index, if in range.
    #[must_use]
    pub fn shard(&self, index: usize) -> Option<&Shard> {
        self.inner.shards.get(index)
    }

    /// Number of shards.
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.inner.shards.len()
    }

    /// Directory holding the shard files.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.inner.config.base_dir
    }

    /// The configuration this store was opened with.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// `true` once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    // ---- reads ----

    /// Get the value for `key`, or `None` if absent (or the store is closed).
    ///
    /// Fails with [`Error::Decode`] if the stored value isn't a `T`.
    pub async fn get<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        if self.is_closed() {
            return Ok(None);
        }
        self.ready().await;
        self.shard_for(key).get(key).await
    }

    /// Get the value for `key`, or `T::default()` when it's absent.
    pub async fn get_or_default<T>(&self, key: &str) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        Ok(self.get(key).await?.unwrap_or_default())
    }

    /// `true` if the key exists.
    pub async fn contains_key(&self, key: &str) -> bool {
        if self.is_closed() {
            return false;
        }
        self.ready().await;
        self.shard_for(key).contains_key(key).await
    }

    /// Number of entries across all shards.
    pub async fn len(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.ready().await;
        join_all(self.inner.shards.iter().map(Shard::len))
            .await
            .into_iter()
            .sum()
    }

    /// `true` when the store has no entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of all keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        if self.is_closed() {
            return Vec::new();
        }
        self.ready().await;
        let mut keys: Vec<String> = join_all(self.inner.shards.iter().map(Shard::keys))
            .await
            .into_iter()
            .flatten()
            .collect();
        keys.sort_unstable();
        keys
    }

    // ---- writes ----

    /// Store `value` under `key`. Returns `true` if anything changed; storing
    /// an equal value again is a no-op and schedules no write.
    pub async fn put<T>(&self, key: &str, value: &T) -> Result<bool>
    where
        T: Serialize + ?Sized,
    {
        if self.is_closed() {
            return Ok(false);
        }
        self.ready().await;
        self.shard_for(key).put(key, value).await
    }

    /// Bulk insert. Each touched shard schedules one write for the whole
    /// batch, not one per entry. Returns how many entries changed.
    pub async fn put_all<K, V, I>(&self, entries: I) -> Result<usize>
    where
        K: Into<String>,
        V: Serialize,
        I: IntoIterator<Item = (K, V)>,
    {
        if self.is_closed() {
            return Ok(0);
        }
        let mut batches: BTreeMap<usize, Vec<_>> = BTreeMap::new();
        for (key, value) in entries {
            let key = key.into();
            let encoded = self.inner.codec.encode(&value)?;
            batches
                .entry(self.shard_index(&key))
                .or_default()
                .push((key, encoded));
        }

        self.ready().await;
        let changed = join_all(
            batches
                .into_iter()
                .map(|(index, batch)| self.inner.shards[index].put_many(batch)),
        )
        .await;
        Ok(changed.into_iter().sum())
    }

    /// Remove `key`. Returns `true` if it was present.
    pub async fn delete(&self, key: &str) -> bool {
        if self.is_closed() {
            return false;
        }
        self.ready().await;
        self.shard_for(key).delete(key).await
    }

    /// Drop all entries from every shard.
    pub async fn clear(&self) {
        if self.is_closed() {
            return;
        }
        self.ready().await;
        join_all(self.inner.shards.iter().map(Shard::clear)).await;
    }

    // ---- persistence ----

    /// Write every dirty shard to disk, in parallel. Returns `true` only if
    /// all of them succeeded; failures are logged and stay dirty.
    pub async fn flush(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.flush_shards(0..self.inner.shards.len()).await
    }

    /// Flush only the shard that owns `key`.
    pub async fn flush_for_key(&self, key: &str) -> bool {
        if self.is_closed() {
            return false;
        }
        self.flush_shards([self.shard_index(key)]).await
    }

    /// Flush the shards owning any of `keys`, each at most once.
    pub async fn flush_for_keys<I, S>(&self, keys: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if self.is_closed() {
            return false;
        }
        let indices: BTreeSet<usize> = keys
            .into_iter()
            .map(|k| self.shard_index(k.as_ref()))
            .collect();
        self.flush_shards(indices).await
    }

    /// Flush everything, then shut the store down. A second call does
    /// nothing. Shards are closed even if the final flush fails.
    ///
    /// A write racing with `close` either lands before the final flush and
    /// reaches disk, or is refused and returns `false`.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // writers that got past the closed check are stopped at the shard lock
        for shard in &self.inner.shards {
            shard.seal();
        }
        let flushed = self.flush_shards(0..self.inner.shards.len()).await;
        for shard in &self.inner.shards {
            shard.close();
        }
        self.inner.shutdown.cancel();

        if flushed {
            info!(dir = %self.inner.config.base_dir.display(), "store closed");
        } else {
            warn!(
                dir = %self.inner.config.base_dir.display(),
                "store closed, some changes could not be written"
            );
        }
    }

    async fn flush_shards<I>(&self, indices: I) -> bool
    where
        I: IntoIterator<Item = usize>,
    {
        self.ready().await;
        let results = join_all(
            indices
                .into_iter()
                .map(|i| async move { (i, self.inner.shards[i].flush().await) }),
        )
        .await;

        let mut ok = true;
        for (index, result) in results {
            match result {
                Ok(FlushOutcome::Written | FlushOutcome::Skipped) => {}
                Err(err) => {
                    warn!(shard = index, error = %err, "shard flush failed");
                    ok = false;
                }
            }
        }
        ok
    }
}

impl std::fmt::Debug for ShardedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedStore")
            .field("base_dir", &self.inner.config.base_dir)
            .field("shard_count", &self.inner.shards.len())
            .field("policy", &self.inner.config.policy)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Configures and opens a [`ShardedStore`].
///
/// ```rust,no_run
/// use json_shards::ShardedStore;
/// use std::time::Duration;
///
/// # async fn demo() -> json_shards::Result<()> {
/// let store = ShardedStore::builder("prefs")
///     .shard_count(8)
///     .write_delay(Duration::from_millis(250))
///     .compression(true)
///     .build()?;
/// store.put("theme", "dark").await?;
/// store.close().await;
/// # Ok(())
/// # }
/// ```
pub struct StoreBuilder {
    config: StoreConfig,
    runtime: Option<Handle>,
}

impl StoreBuilder {
    fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            config: StoreConfig {
                base_dir: base_dir.as_ref().to_path_buf(),
                ..StoreConfig::default()
            },
            runtime: None,
        }
    }

    /// Start from a full configuration.
    pub fn from_config(config: StoreConfig) -> Self {
        Self {
            config,
            runtime: None,
        }
    }

    /// Number of shards (default: 16). Must stay the same across restarts.
    pub fn shard_count(mut self, count: usize) -> Self {
        self.config.shard_count = count;
        self
    }

    /// Debounce delay before a dirty shard writes itself out
    /// (default: 500 ms). Shorthand for `policy(FlushPolicy::Debounce(delay))`.
    pub fn write_delay(mut self, delay: Duration) -> Self {
        self.config.policy = FlushPolicy::Debounce(delay);
        self
    }

    /// Set the flush policy.
    pub fn policy(mut self, policy: FlushPolicy) -> Self {
        self.config.policy = policy;
        self
    }

    /// Gzip shard files (default: off).
    pub fn compression(mut self, yes: bool) -> Self {
        self.config.compression = yes;
        self
    }

    /// Write human-readable JSON with indentation (default: compact).
    pub fn pretty(mut self, yes: bool) -> Self {
        self.config.pretty = yes;
        self
    }

    /// Keep unreadable shard files as `.corrupt` backups instead of deleting
    /// them (default: on).
    pub fn backup_corrupt(mut self, yes: bool) -> Self {
        self.config.backup_corrupt = yes;
        self
    }

    /// Runtime that runs loads, debounced writes and file I/O (default: the
    /// runtime `build()` is called from).
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Create the base directory if needed and open the store. Loading
    /// starts in the background right away.
    pub fn build(self) -> Result<ShardedStore> {
        if self.config.shard_count == 0 {
            return Err(Error::Config("shard_count must be at least 1".into()));
        }
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|e| {
                Error::Config(format!("no tokio runtime available: {e}"))
            })?,
        };
        std::fs::create_dir_all(&self.config.base_dir)?;
        Ok(ShardedStore::from_config(self.config, runtime))
    }

    /// Path the builder will open.
    pub fn base_dir(&self) -> &Path {
        &self.config.base_dir
    }
}

impl std::fmt::Debug for StoreBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreBuilder")
            .field("config", &self.config)
            .field("has_runtime", &self.runtime.is_some())
            .finish()
    }
}
