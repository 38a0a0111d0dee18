//! One partition of the key space, backed by its own file.
//!
//! A shard keeps its whole map in memory behind a `parking_lot::Mutex`. The
//! lock is only ever held for in-memory work; writes copy a snapshot under
//! the lock and do the file I/O on the blocking pool after releasing it.
//!
//! Dirtiness is tracked with two counters: `revision` goes up on every
//! effective mutation, `persisted` records the revision of the last snapshot
//! that made it to disk. The shard is dirty while they differ, which means a
//! mutation that lands while a write is in flight keeps the shard dirty.

use crate::codec::{Codec, Document, JsonCodec};
use crate::error::Result;
use crate::flush::{FlushOutcome, FlushPolicy, PendingWrite};
use crate::persist;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// Lifecycle of a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardPhase {
    /// Created, file not read yet.
    Uninitialized,
    /// Reading its file.
    Loading,
    /// Serving requests. Reached even when the file couldn't be read.
    Ready,
    /// Closed; reads return nothing and mutations are ignored.
    Closed,
}

/// Settings every shard of a store shares.
#[derive(Debug)]
pub(crate) struct ShardSettings {
    pub(crate) codec: JsonCodec,
    pub(crate) policy: FlushPolicy,
    pub(crate) compression: bool,
    pub(crate) backup_corrupt: bool,
    pub(crate) runtime: Handle,
}

struct ShardState {
    map: Document,
    phase: ShardPhase,
    closed: bool,
    /// Set by the store just before its final flush. Reads and flushes still
    /// work; mutations are refused so nothing slips in after the snapshot.
    sealed: bool,
    revision: u64,
    persisted: u64,
    pending: PendingWrite,
    /// Identifies the most recently scheduled write; older tasks that wake up
    /// late see a different ticket and back off.
    ticket: u64,
}

impl ShardState {
    fn is_dirty(&self) -> bool {
        self.revision != self.persisted
    }

    fn accepts_writes(&self) -> bool {
        !self.closed && !self.sealed
    }
}

struct ShardInner {
    index: usize,
    path: PathBuf,
    settings: Arc<ShardSettings>,
    state: Mutex<ShardState>,
    loaded: OnceCell<()>,
    /// Serializes file writes so snapshots hit the disk in the order they
    /// were taken.
    write_gate: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

/// Handle to a single shard. Cheap to clone; clones share state.
///
/// You normally reach shards through
/// [`ShardedStore::shard_for`](crate::ShardedStore::shard_for); every
/// operation waits for the shard's file to be loaded first.
#[derive(Clone)]
pub struct Shard {
    inner: Arc<ShardInner>,
}

impl Shard {
    pub(crate) fn new(
        index: usize,
        path: PathBuf,
        settings: Arc<ShardSettings>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ShardInner {
                index,
                path,
                settings,
                state: Mutex::new(ShardState {
                    map: Document::new(),
                    phase: ShardPhase::Uninitialized,
                    closed: false,
                    sealed: false,
                    revision: 0,
                    persisted: 0,
                    pending: PendingWrite::default(),
                    ticket: 0,
                }),
                loaded: OnceCell::new(),
                write_gate: tokio::sync::Mutex::new(()),
                shutdown,
            }),
        }
    }

    /// Position of this shard in the store.
    #[must_use]
    pub fn index(&self) -> usize {
        self.inner.index
    }

    /// Path to the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> ShardPhase {
        self.inner.state.lock().phase
    }

    /// `true` when memory holds changes the file doesn't have yet.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.inner.state.lock().is_dirty()
    }

    /// `true` while a debounced write is waiting for its quiet period.
    #[must_use]
    pub fn has_pending_write(&self) -> bool {
        self.inner.state.lock().pending.is_pending()
    }

    // ---- loading ----

    /// Load the shard from disk if that hasn't happened yet, and return the
    /// number of entries it holds. Concurrent callers all wait for the same
    /// single load.
    pub async fn load(&self) -> usize {
        self.ready().await;
        self.inner.state.lock().map.len()
    }

    async fn ready(&self) {
        self.inner.loaded.get_or_init(|| self.load_from_disk()).await;
    }

    async fn load_from_disk(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.phase == ShardPhase::Uninitialized {
                state.phase = ShardPhase::Loading;
            }
        }

        let path = self.inner.path.clone();
        let settings = Arc::clone(&self.inner.settings);
        let loaded = self
            .run_blocking(move || {
                persist::load(&path, settings.compression, &settings.codec).map_err(|err| {
                    let discarded = persist::discard_corrupt(&path, settings.backup_corrupt);
                    (err, discarded)
                })
            })
            .await;

        let map = match loaded {
            Ok(Ok(map)) => map,
            Ok(Err((err, discarded))) => {
                match discarded {
                    Ok(Some(backup)) => warn!(
                        shard = self.inner.index,
                        path = %self.inner.path.display(),
                        backup = %backup.display(),
                        error = %err,
                        "unreadable shard file moved aside, starting empty"
                    ),
                    Ok(None) => warn!(
                        shard = self.inner.index,
                        path = %self.inner.path.display(),
                        error = %err,
                        "unreadable shard file deleted, starting empty"
                    ),
                    Err(cleanup) => warn!(
                        shard = self.inner.index,
                        path = %self.inner.path.display(),
                        error = %err,
                        cleanup_error = %cleanup,
                        "unreadable shard file could not be removed, starting empty"
                    ),
                }
                Document::new()
            }
            Err(err) => {
                warn!(shard = self.inner.index, error = %err, "shard load task failed, starting empty");
                Document::new()
            }
        };

        let mut state = self.inner.state.lock();
        trace!(shard = self.inner.index, items = map.len(), "shard loaded");
        state.map = map;
        state.revision = 0;
        state.persisted = 0;
        if !state.closed {
            state.phase = ShardPhase::Ready;
        }
    }

    // ---- reads ----

    /// Decoded value for `key`, or `None` if absent. Fails with
    /// [`Error::Decode`](crate::Error::Decode) when the stored document isn't a `T`.
    pub async fn get<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        self.ready().await;
        let state = self.inner.state.lock();
        if state.closed {
            return Ok(None);
        }
        match state.map.get(key) {
            Some(document) => self.inner.settings.codec.decode(document).map(Some).map_err(|err| {
                warn!(shard = self.inner.index, key, error = %err, "stored value has a different shape");
                err
            }),
            None => Ok(None),
        }
    }

    /// `true` if the key exists.
    pub async fn contains_key(&self, key: &str) -> bool {
        self.ready().await;
        let state = self.inner.state.lock();
        !state.closed && state.map.contains_key(key)
    }

    /// Number of entries.
    pub async fn len(&self) -> usize {
        self.ready().await;
        let state = self.inner.state.lock();
        if state.closed {
            0
        } else {
            state.map.len()
        }
    }

    /// `true` when the shard has no entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of all keys, in order.
    pub async fn keys(&self) -> Vec<String> {
        self.ready().await;
        let state = self.inner.state.lock();
        if state.closed {
            return Vec::new();
        }
        state.map.keys().cloned().collect()
    }

    // ---- writes ----

    /// Store `value` under `key`. Returns `false` when the key already held an
    /// equal value (nothing to write) or the shard is closed.
    pub async fn put<T>(&self, key: &str, value: &T) -> Result<bool>
    where
        T: Serialize + ?Sized,
    {
        let encoded = self.inner.settings.codec.encode(value)?;
        self.ready().await;

        let mut state = self.inner.state.lock();
        if !state.accepts_writes() {
            return Ok(false);
        }
        if state.map.get(key) == Some(&encoded) {
            trace!(shard = self.inner.index, key, "value unchanged");
            return Ok(false);
        }
        state.map.insert(key.to_owned(), encoded);
        self.mark_dirty(&mut state);
        Ok(true)
    }

    /// Insert already-encoded entries with a single reschedule at the end.
    /// Returns how many entries actually changed.
    pub(crate) async fn put_many(&self, entries: Vec<(String, Value)>) -> usize {
        self.ready().await;

        let mut state = self.inner.state.lock();
        if !state.accepts_writes() {
            return 0;
        }
        let mut changed = 0;
        for (key, encoded) in entries {
            if state.map.get(&key) != Some(&encoded) {
                state.map.insert(key, encoded);
                changed += 1;
            }
        }
        if changed > 0 {
            self.mark_dirty(&mut state);
        }
        changed
    }

    /// Remove `key`. Returns `true` if it was present.
    pub async fn delete(&self, key: &str) -> bool {
        self.ready().await;

        let mut state = self.inner.state.lock();
        if !state.accepts_writes() || state.map.remove(key).is_none() {
            return false;
        }
        self.mark_dirty(&mut state);
        true
    }

    /// Drop every entry. Returns `true` if there was anything to drop.
    pub async fn clear(&self) -> bool {
        self.ready().await;

        let mut state = self.inner.state.lock();
        if !state.accepts_writes() || state.map.is_empty() {
            return false;
        }
        state.map.clear();
        self.mark_dirty(&mut state);
        true
    }

    // ---- persistence ----

    /// Write the shard to disk now if it has unsaved changes.
    ///
    /// Cancels any pending debounced write. On failure the shard stays dirty,
    /// so the next flush (scheduled or explicit) tries again. A closed shard
    /// has nothing left to write and reports [`FlushOutcome::Skipped`].
    pub async fn flush(&self) -> Result<FlushOutcome> {
        self.ready().await;
        let _gate = self.inner.write_gate.lock().await;

        let (snapshot, revision) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                debug!(shard = self.inner.index, "flush skipped, shard is closed");
                return Ok(FlushOutcome::Skipped);
            }
            state.pending.cancel();
            if !state.is_dirty() {
                debug!(shard = self.inner.index, "flush skipped, nothing changed");
                return Ok(FlushOutcome::Skipped);
            }
            (state.map.clone(), state.revision)
        };

        self.write_snapshot(snapshot, revision).await?;
        Ok(FlushOutcome::Written)
    }

    /// Refuse further mutations while still allowing reads and flushes.
    pub(crate) fn seal(&self) {
        self.inner.state.lock().sealed = true;
    }

    /// Stop accepting work and cancel any pending write. Does not flush.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.phase = ShardPhase::Closed;
        state.pending.cancel();
        trace!(shard = self.inner.index, dirty = state.is_dirty(), "shard closed");
    }

    // ---- internal ----

    fn mark_dirty(&self, state: &mut ShardState) {
        state.revision += 1;
        self.schedule_write(state);
    }

    fn schedule_write(&self, state: &mut ShardState) {
        if state.closed || !state.is_dirty() {
            return;
        }
        let Some(delay) = self.inner.settings.policy.write_delay() else {
            return;
        };

        state.ticket += 1;
        let ticket = state.ticket;
        let shard = self.clone();
        let handle = self
            .inner
            .settings
            .runtime
            .spawn(async move { shard.deferred_write(ticket, delay).await });
        state.pending.replace(handle);
        trace!(shard = self.inner.index, ticket, ?delay, "write scheduled");
    }

    async fn deferred_write(self, ticket: u64, delay: Duration) {
        tokio::select! {
            _ = self.inner.shutdown.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        let _gate = self.inner.write_gate.lock().await;
        let (snapshot, revision) = {
            let mut state = self.inner.state.lock();
            if state.ticket != ticket || state.closed || !state.is_dirty() {
                return;
            }
            state.pending.detach();
            (state.map.clone(), state.revision)
        };

        // Failures are already logged and leave the shard dirty for the next
        // flush to retry.
        let _ = self.write_snapshot(snapshot, revision).await;
    }

    async fn write_snapshot(&self, snapshot: Document, revision: u64) -> Result<()> {
        let items = snapshot.len();
        let path = self.inner.path.clone();
        let settings = Arc::clone(&self.inner.settings);
        let written = self
            .run_blocking(move || persist::save(&path, settings.compression, &settings.codec, &snapshot))
            .await
            .and_then(|res| res);

        match written {
            Ok(()) => {
                let mut state = self.inner.state.lock();
                if revision > state.persisted {
                    state.persisted = revision;
                }
                debug!(shard = self.inner.index, items, revision, "shard written");
                Ok(())
            }
            Err(err) => {
                error!(
                    shard = self.inner.index,
                    path = %self.inner.path.display(),
                    error = %err,
                    "shard write failed, keeping changes in memory"
                );
                Err(err)
            }
        }
    }

    async fn run_blocking<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        Ok(self.inner.settings.runtime.spawn_blocking(f).await?)
    }
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Shard")
            .field("index", &self.inner.index)
            .field("path", &self.inner.path)
            .field("phase", &state.phase)
            .field("dirty", &state.is_dirty())
            .finish_non_exhaustive()
    }
}
