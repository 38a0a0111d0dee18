use json_shards::ShardedStore;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), json_shards::Error> {
    let dir = std::env::temp_dir().join("json_shards_example_builder");

    // pretty-printed JSON, 4 shards, write 200ms after the last change
    let store = ShardedStore::builder(&dir)
        .shard_count(4)
        .pretty(true)
        .write_delay(Duration::from_millis(200))
        .build()?;
    println!("loaded {} entries", store.ready().await);

    store.put("name", "json-shards").await?;
    store.put("version", "0.1.0").await?;
    store.put("status", "awesome").await?;

    // let the debounced writes land on their own
    tokio::time::sleep(Duration::from_millis(400)).await;

    for key in ["name", "version", "status"] {
        let shard = store.shard_for(key);
        println!("{key} -> shard {} (dirty: {})", shard.index(), shard.is_dirty());
    }

    // the file on disk is now nicely indented
    let contents = std::fs::read_to_string(store.shard_for("name").path())?;
    println!("On-disk JSON:\n{contents}");

    println!("\nDebug output: {store:?}");

    store.close().await;
    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}
