//! Key-value store against a database file on disk

use tagdeck_common::db::{init_database, KvStore, SETTINGS_NAMESPACE, TAGS_NAMESPACE};
use tempfile::TempDir;

#[tokio::test]
async fn test_values_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("tagdeck.db");

    {
        let pool = init_database(&path).await.unwrap();
        let tags = KvStore::new(pool.clone(), TAGS_NAMESPACE);
        tags.put_verified("1234", "#/music/a.mp3#0#1#0").await.unwrap();
        KvStore::new(pool.clone(), SETTINGS_NAMESPACE)
            .put_display("general.initVolume", 7)
            .await
            .unwrap();
        pool.close().await;
    }
    assert!(path.exists());

    let pool = init_database(&path).await.unwrap();
    let tags = KvStore::new(pool.clone(), TAGS_NAMESPACE);
    let settings = KvStore::new(pool, SETTINGS_NAMESPACE);

    assert_eq!(
        tags.get("1234").await.unwrap().as_deref(),
        Some("#/music/a.mp3#0#1#0")
    );
    assert_eq!(settings.get_or("general.initVolume", 3u8).await, 7);
    assert_eq!(tags.keys().await.unwrap(), vec!["1234".to_string()]);
}

#[tokio::test]
async fn test_clear_only_touches_own_namespace() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("tagdeck.db")).await.unwrap();
    let tags = KvStore::new(pool.clone(), TAGS_NAMESPACE);
    let settings = KvStore::new(pool, SETTINGS_NAMESPACE);

    tags.put("1", "#/a.mp3#0#1#0").await.unwrap();
    tags.put("2", "#/b.mp3#0#1#0").await.unwrap();
    settings.put("led.initBrightness", "16").await.unwrap();

    assert_eq!(tags.clear().await.unwrap(), 2);
    assert!(tags.entries().await.unwrap().is_empty());
    assert!(settings.contains("led.initBrightness").await.unwrap());
}
