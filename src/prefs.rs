//! Application preferences on top of [`ShardedStore`].
//!
//! There is no global instance. The application opens one [`Preferences`]
//! at startup, hands it (or clones of it) to whatever needs it, and calls
//! [`close`](ShardedStore::close) before exiting.
//!
//! ```rust,no_run
//! use json_shards::{PrefKey, Preferences};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! #[serde(default)]
//! struct Window {
//!     width: u32,
//!     height: u32,
//! }
//!
//! const THEME: PrefKey<String> = PrefKey::new("theme");
//! const WINDOW: PrefKey<Window> = PrefKey::new("window");
//!
//! # async fn demo() -> json_shards::Result<()> {
//! let prefs = Preferences::open("settings")?;
//! prefs.write(&THEME, &"dark".to_string()).await?;
//! let window = prefs.read(&WINDOW).await?;
//! println!("{}x{}", window.width, window.height);
//! prefs.close().await;
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use crate::store::ShardedStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::Path;
use std::time::Duration;

/// Shard count used for preference files.
pub const PREFS_SHARD_COUNT: usize = 16;

/// Quiet period before changed preferences are written.
pub const PREFS_WRITE_DELAY: Duration = Duration::from_millis(500);

/// Whether preference files are gzipped.
pub const PREFS_COMPRESSION: bool = true;

/// A key name tied to the type stored under it.
pub struct PrefKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PrefKey<T> {
    /// Declare a key. Usually bound to a `const`.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// The key as stored.
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for PrefKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PrefKey<T> {}

impl<T> std::fmt::Debug for PrefKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PrefKey").field(&self.name).finish()
    }
}

/// Preferences store with the application's fixed configuration.
///
/// Derefs to [`ShardedStore`] for untyped access, flushing and closing.
#[derive(Clone, Debug)]
pub struct Preferences {
    store: ShardedStore,
}

impl Preferences {
    /// Open the preference files in `base_dir`. Must be called from inside a
    /// tokio runtime.
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self> {
        let store = ShardedStore::builder(base_dir)
            .shard_count(PREFS_SHARD_COUNT)
            .write_delay(PREFS_WRITE_DELAY)
            .compression(PREFS_COMPRESSION)
            .build()?;
        Ok(Self { store })
    }

    /// Open the preference files in the current working directory.
    pub fn open_in_current_dir() -> Result<Self> {
        Self::open(std::env::current_dir()?)
    }

    /// The underlying store.
    pub fn store(&self) -> &ShardedStore {
        &self.store
    }

    /// Stored value for `key`, or `T::default()` if it was never written.
    pub async fn read<T>(&self, key: &PrefKey<T>) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        self.store.get_or_default(key.name).await
    }

    /// Stored value for `key`, or `None` if it was never written.
    pub async fn try_read<T>(&self, key: &PrefKey<T>) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        self.store.get(key.name).await
    }

    /// Store `value` under `key`. Returns `true` if it changed anything.
    pub async fn write<T>(&self, key: &PrefKey<T>, value: &T) -> Result<bool>
    where
        T: Serialize,
    {
        self.store.put(key.name, value).await
    }

    /// Forget `key`, so the next [`read`](Self::read) returns the default.
    pub async fn reset<T>(&self, key: &PrefKey<T>) -> bool {
        self.store.delete(key.name).await
    }
}

impl std::ops::Deref for Preferences {
    type Target = ShardedStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}
