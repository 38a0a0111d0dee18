//! Flush policies and the per-shard deferred write slot.

use std::time::Duration;
use tokio::task::JoinHandle;

/// Controls when a dirty shard gets written to disk on its own.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Write once the shard has seen no mutation for this long. Every
    /// mutation restarts the timer, so a burst turns into a single write.
    Debounce(Duration),
    /// Only write when you call `flush()` (or `close()`) yourself.
    Manual,
}

impl FlushPolicy {
    /// The debounce delay, or `None` for [`FlushPolicy::Manual`].
    pub fn write_delay(&self) -> Option<Duration> {
        match self {
            FlushPolicy::Debounce(delay) => Some(*delay),
            FlushPolicy::Manual => None,
        }
    }
}

impl Default for FlushPolicy {
    fn default() -> Self {
        FlushPolicy::Debounce(Duration::from_millis(500))
    }
}

/// What a successful shard flush did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing changed since the last write; the file wasn't touched.
    Skipped,
    /// The shard file was replaced with the current contents.
    Written,
}

/// Holds at most one scheduled write task. Putting a new one in aborts the
/// old one; dropping the slot aborts whatever is left.
#[derive(Debug, Default)]
pub(crate) struct PendingWrite {
    handle: Option<JoinHandle<()>>,
}

impl PendingWrite {
    pub(crate) fn replace(&mut self, handle: JoinHandle<()>) {
        if let Some(prev) = self.handle.replace(handle) {
            prev.abort();
        }
    }

    /// Abort the pending task. Returns `true` if there was one.
    pub(crate) fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(h) => {
                h.abort();
                true
            }
            None => false,
        }
    }

    /// Let the task run to completion without tracking it any more. Called by
    /// the task itself once it commits to writing, so a later `cancel` can't
    /// interrupt it halfway through.
    pub(crate) fn detach(&mut self) {
        self.handle.take();
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for PendingWrite {
    fn drop(&mut self) {
        self.cancel();
    }
}
