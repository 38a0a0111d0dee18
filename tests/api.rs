use json_shards::{Error, FlushOutcome, FlushPolicy, ShardPhase, ShardedStore};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tempfile::TempDir;

fn temp_dir() -> TempDir {
    tempfile::tempdir().unwrap()
}

fn manual_store(dir: &TempDir) -> ShardedStore {
    ShardedStore::builder(dir.path())
        .policy(FlushPolicy::Manual)
        .build()
        .unwrap()
}

// ---- get / put --------------------------------------------------------------

#[tokio::test]
async fn put_then_get_without_flush() {
    let dir = temp_dir();
    let store = manual_store(&dir);

    assert!(store.put("theme", "dark").await.unwrap());
    assert_eq!(
        store.get::<String>("theme").await.unwrap(),
        Some("dark".to_string())
    );
    assert!(store.shard_for("theme").is_dirty());
}

#[tokio::test]
async fn get_missing_key_is_none() {
    let dir = temp_dir();
    let store = manual_store(&dir);
    assert_eq!(store.get::<i32>("nope").await.unwrap(), None);
    assert_eq!(store.get_or_default::<i32>("nope").await.unwrap(), 0);
}

#[tokio::test]
async fn put_overwrites_and_reports_change() {
    let dir = temp_dir();
    let store = manual_store(&dir);
    assert!(store.put("volume", &3).await.unwrap());
    assert!(store.put("volume", &7).await.unwrap());
    assert_eq!(store.get::<i32>("volume").await.unwrap(), Some(7));
}

#[tokio::test]
async fn put_same_value_is_unchanged() {
    let dir = temp_dir();
    let store = manual_store(&dir);
    assert!(store.put("lang", "en").await.unwrap());
    assert!(store.flush().await);
    assert!(!store.shard_for("lang").is_dirty());

    assert!(!store.put("lang", "en").await.unwrap());
    assert!(!store.shard_for("lang").is_dirty());
}

#[tokio::test]
async fn heterogeneous_values_share_a_store() {
    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Window {
        width: u32,
        height: u32,
    }

    let dir = temp_dir();
    let store = ShardedStore::builder(dir.path())
        .shard_count(1)
        .policy(FlushPolicy::Manual)
        .build()
        .unwrap();
    store.put("name", "alice").await.unwrap();
    store.put("count", &42u64).await.unwrap();
    store.put("flags", &vec![true, false]).await.unwrap();
    store
        .put("window", &Window { width: 800, height: 600 })
        .await
        .unwrap();

    assert_eq!(store.get::<String>("name").await.unwrap().unwrap(), "alice");
    assert_eq!(store.get::<u64>("count").await.unwrap(), Some(42));
    assert_eq!(
        store.get::<Vec<bool>>("flags").await.unwrap(),
        Some(vec![true, false])
    );
    assert_eq!(
        store.get::<Window>("window").await.unwrap(),
        Some(Window { width: 800, height: 600 })
    );
}

#[tokio::test]
async fn decode_mismatch_is_an_error() {
    let dir = temp_dir();
    let store = manual_store(&dir);
    store.put("theme", "dark").await.unwrap();

    let err = store.get::<u32>("theme").await.unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
}

#[tokio::test]
async fn unencodable_value_is_an_error() {
    use std::collections::HashMap;

    let dir = temp_dir();
    let store = manual_store(&dir);
    let mut bad: HashMap<Vec<u8>, i32> = HashMap::new();
    bad.insert(vec![1, 2], 3);

    let err = store.put("bad", &bad).await.unwrap_err();
    assert!(matches!(err, Error::Encode(_)));
    assert!(!store.contains_key("bad").await);
}

// ---- schema evolution -------------------------------------------------------

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct PrefsV1 {
    theme: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct PrefsV2 {
    theme: String,
    #[serde(default)]
    font_size: u32,
}

#[tokio::test]
async fn unknown_fields_are_ignored() {
    let dir = temp_dir();
    let store = manual_store(&dir);
    store
        .put("prefs", &PrefsV2 { theme: "dark".into(), font_size: 14 })
        .await
        .unwrap();

    let old = store.get::<PrefsV1>("prefs").await.unwrap();
    assert_eq!(old, Some(PrefsV1 { theme: "dark".into() }));
}

#[tokio::test]
async fn missing_fields_take_defaults() {
    let dir = temp_dir();
    let store = manual_store(&dir);
    store
        .put("prefs", &PrefsV1 { theme: "light".into() })
        .await
        .unwrap();

    let new = store.get::<PrefsV2>("prefs").await.unwrap();
    assert_eq!(new, Some(PrefsV2 { theme: "light".into(), font_size: 0 }));
}

#[tokio::test]
async fn default_field_values_are_written() {
    let dir = temp_dir();
    let store = ShardedStore::builder(dir.path())
        .shard_count(1)
        .policy(FlushPolicy::Manual)
        .build()
        .unwrap();
    store
        .put("prefs", &PrefsV2 { theme: String::new(), font_size: 0 })
        .await
        .unwrap();
    assert!(store.flush().await);

    let raw = std::fs::read_to_string(store.shard(0).unwrap().path()).unwrap();
    assert!(raw.contains("\"font_size\":0"));
    assert!(raw.contains("\"theme\":\"\""));
}

// ---- delete / clear ---------------------------------------------------------

#[tokio::test]
async fn delete_present_key() {
    let dir = temp_dir();
    let store = manual_store(&dir);
    store.put("a", &1).await.unwrap();
    assert!(store.delete("a").await);
    assert_eq!(store.get::<i32>("a").await.unwrap(), None);
}

#[tokio::test]
async fn delete_absent_key_does_not_dirty() {
    let dir = temp_dir();
    let store = ShardedStore::builder(dir.path())
        .write_delay(Duration::from_secs(60))
        .build()
        .unwrap();

    assert!(!store.delete("ghost").await);
    let shard = store.shard_for("ghost");
    assert!(!shard.is_dirty());
    assert!(!shard.has_pending_write());
}

#[tokio::test]
async fn clear_removes_all_entries() {
    let dir = temp_dir();
    let store = manual_store(&dir);
    for i in 0..20 {
        store.put(&format!("k{i}"), &i).await.unwrap();
    }
    assert_eq!(store.len().await, 20);

    store.clear().await;
    assert!(store.is_empty().await);
    assert_eq!(store.get::<i32>("k0").await.unwrap(), None);
}

#[tokio::test]
async fn clear_on_empty_store_does_not_dirty() {
    let dir = temp_dir();
    let store = manual_store(&dir);
    store.clear().await;
    for i in 0..store.shard_count() {
        assert!(!store.shard(i).unwrap().is_dirty());
    }
}

#[tokio::test]
async fn clear_then_flush_persists_empty() {
    let dir = temp_dir();
    {
        let store = manual_store(&dir);
        store.put("a", &1).await.unwrap();
        assert!(store.flush().await);
        store.clear().await;
        store.close().await;
    }
    let store = manual_store(&dir);
    assert!(store.is_empty().await);
}

// ---- keys / len / put_all ---------------------------------------------------

#[tokio::test]
async fn keys_are_sorted_across_shards() {
    let dir = temp_dir();
    let store = manual_store(&dir);
    for key in ["zeta", "alpha", "mid", "beta"] {
        store.put(key, &true).await.unwrap();
    }
    assert_eq!(store.keys().await, vec!["alpha", "beta", "mid", "zeta"]);
    assert!(store.contains_key("mid").await);
    assert!(!store.contains_key("omega").await);
}

#[tokio::test]
async fn put_all_counts_changes() {
    let dir = temp_dir();
    let store = manual_store(&dir);
    store.put("k0", &0).await.unwrap();

    let batch: Vec<(String, i32)> = (0..50).map(|i| (format!("k{i}"), i)).collect();
    let changed = store.put_all(batch).await.unwrap();
    assert_eq!(changed, 49);
    assert_eq!(store.len().await, 50);
    assert_eq!(store.get::<i32>("k49").await.unwrap(), Some(49));
}

// ---- durability -------------------------------------------------------------

#[tokio::test]
async fn flush_then_reopen_roundtrip() {
    let dir = temp_dir();
    {
        let store = manual_store(&dir);
        store.put("k1", "v1").await.unwrap();
        store.put("k2", "v2").await.unwrap();
        assert!(store.flush().await);
    }
    let store = manual_store(&dir);
    assert_eq!(store.ready().await, 2);
    assert_eq!(store.get::<String>("k1").await.unwrap().unwrap(), "v1");
    assert_eq!(store.get::<String>("k2").await.unwrap().unwrap(), "v2");
}

#[tokio::test]
async fn close_flushes_pending_changes() {
    let dir = temp_dir();
    {
        let store = ShardedStore::builder(dir.path())
            .write_delay(Duration::from_secs(60))
            .build()
            .unwrap();
        store.put("late", "value").await.unwrap();
        store.close().await;
    }
    let store = manual_store(&dir);
    assert_eq!(store.get::<String>("late").await.unwrap().unwrap(), "value");
}

// ---- close ------------------------------------------------------------------

#[tokio::test]
async fn operations_after_close_are_neutral() {
    let dir = temp_dir();
    let store = manual_store(&dir);
    store.put("a", &1).await.unwrap();
    store.close().await;

    assert!(store.is_closed());
    assert_eq!(store.get::<i32>("a").await.unwrap(), None);
    assert!(!store.put("b", &2).await.unwrap());
    assert!(!store.delete("a").await);
    assert!(!store.flush().await);
    assert!(!store.flush_for_key("a").await);
    assert_eq!(store.len().await, 0);
    store.clear().await;
}

#[tokio::test]
async fn close_twice_is_a_noop() {
    let dir = temp_dir();
    let store = manual_store(&dir);
    store.put("a", &1).await.unwrap();
    store.close().await;

    let path = store.shard_for("a").path().to_path_buf();
    let modified = std::fs::metadata(&path).unwrap().modified().unwrap();
    store.close().await;
    assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), modified);
}

#[tokio::test]
async fn closed_shard_is_neutral() {
    let dir = temp_dir();
    let store = manual_store(&dir);
    store.put("a", &1).await.unwrap();
    let shard = store.shard_for("a").clone();
    store.close().await;

    assert_eq!(shard.phase(), ShardPhase::Closed);
    assert_eq!(shard.get::<i32>("a").await.unwrap(), None);
    assert!(!shard.put("a", &2).await.unwrap());
    assert!(!shard.delete("a").await);
    assert!(!shard.clear().await);
    assert_eq!(shard.flush().await.unwrap(), FlushOutcome::Skipped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn writes_racing_close_are_kept_or_refused() {
    for round in 0..50 {
        let dir = temp_dir();
        let store = ShardedStore::builder(dir.path())
            .shard_count(4)
            .policy(FlushPolicy::Manual)
            .build()
            .unwrap();
        store.ready().await;

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut accepted = Vec::new();
                for i in 0..200 {
                    let key = format!("r{round}-{i}");
                    if store.put(&key, &i).await.unwrap() {
                        accepted.push((key, i));
                    }
                    tokio::task::yield_now().await;
                }
                accepted
            })
        };
        tokio::task::yield_now().await;
        store.close().await;
        let accepted = writer.await.unwrap();

        let reopened = manual_store(&dir);
        for (key, value) in accepted {
            assert_eq!(
                reopened.get::<i32>(&key).await.unwrap(),
                Some(value),
                "{key} was accepted but not persisted"
            );
        }
        reopened.close().await;
    }
}

// ---- builder / debug --------------------------------------------------------

#[tokio::test]
async fn zero_shards_is_a_config_error() {
    let dir = temp_dir();
    let err = ShardedStore::builder(dir.path())
        .shard_count(0)
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn build_outside_runtime_is_a_config_error() {
    let dir = temp_dir();
    let err = ShardedStore::open(dir.path()).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn build_with_explicit_runtime() {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let dir = temp_dir();
    let store = ShardedStore::builder(dir.path())
        .runtime(rt.handle().clone())
        .policy(FlushPolicy::Manual)
        .build()
        .unwrap();

    rt.block_on(async {
        store.put("x", &1).await.unwrap();
        assert!(store.flush().await);
        store.close().await;
    });
}

#[tokio::test]
async fn creates_missing_base_dir() {
    let dir = temp_dir();
    let nested = dir.path().join("a").join("b");
    let store = ShardedStore::open(&nested).unwrap();
    assert!(nested.is_dir());
    assert_eq!(store.base_dir(), nested.as_path());
}

#[tokio::test]
async fn debug_impls_dont_panic() {
    let dir = temp_dir();
    let store = manual_store(&dir);

    let dbg_store = format!("{store:?}");
    assert!(dbg_store.contains("ShardedStore"));
    assert!(dbg_store.contains("shard_count"));

    let dbg_shard = format!("{:?}", store.shard(0).unwrap());
    assert!(dbg_shard.contains("Shard"));

    let dbg_builder = format!("{:?}", ShardedStore::builder(dir.path()));
    assert!(dbg_builder.contains("StoreBuilder"));
}

#[tokio::test]
async fn builder_from_config() {
    use json_shards::{StoreBuilder, StoreConfig};

    let dir = temp_dir();
    let config = StoreConfig {
        base_dir: dir.path().to_path_buf(),
        shard_count: 3,
        policy: FlushPolicy::Manual,
        ..StoreConfig::default()
    };
    let store = StoreBuilder::from_config(config.clone()).build().unwrap();
    assert_eq!(store.shard_count(), 3);
    assert_eq!(store.config(), &config);
    assert_eq!(store.shard(2).unwrap().path(), config.shard_path(2));
    assert!(store.shard(3).is_none());
}
