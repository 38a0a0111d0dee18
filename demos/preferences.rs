use json_shards::{PrefKey, Preferences};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct UserPrefs {
    theme: String,
    font_size: u32,
    show_sidebar: bool,
}

const USER: PrefKey<UserPrefs> = PrefKey::new("user");
const LAUNCHES: PrefKey<u64> = PrefKey::new("launches");

#[tokio::main]
async fn main() -> Result<(), json_shards::Error> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,json_shards=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let dir = std::env::temp_dir().join("json_shards_example_prefs");
    let prefs = Preferences::open(&dir)?;

    let launches = prefs.read(&LAUNCHES).await? + 1;
    prefs.write(&LAUNCHES, &launches).await?;
    println!("launch #{launches}");

    let mut user = prefs.read(&USER).await?;
    println!("current prefs: {user:?}");
    if user.theme.is_empty() {
        user.theme = "dark".into();
        user.font_size = 13;
        user.show_sidebar = true;
        prefs.write(&USER, &user).await?;
    }

    // only the shard holding `user` gets written
    prefs.flush_for_key(USER.name()).await;

    // run again to see the counter go up
    prefs.close().await;
    Ok(())
}
