//! Namespaced key-value store
//!
//! Every persisted value lives in one `kv` table keyed by `(namespace, key)`.
//! Values are stored as text; typed access goes through `FromStr`/`Display`.

use crate::error::{Error, Result};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

/// Namespace holding device settings
pub const SETTINGS_NAMESPACE: &str = "settings";

/// Namespace holding RFID tag assignments
pub const TAGS_NAMESPACE: &str = "rfidTags";

const UPSERT: &str = r#"
    INSERT INTO kv (namespace, key, value, updated_at)
    VALUES (?, ?, ?, CURRENT_TIMESTAMP)
    ON CONFLICT(namespace, key) DO UPDATE SET
        value = excluded.value,
        updated_at = CURRENT_TIMESTAMP
"#;

/// Handle to one namespace of the key-value table
#[derive(Debug, Clone)]
pub struct KvStore {
    db: Pool<Sqlite>,
    namespace: String,
}

impl KvStore {
    pub fn new(db: Pool<Sqlite>, namespace: impl Into<String>) -> Self {
        Self {
            db,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.db
    }

    /// Raw value for `key`, `None` when absent
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM kv WHERE namespace = ? AND key = ?")
                .bind(&self.namespace)
                .bind(key)
                .fetch_optional(&self.db)
                .await?;
        Ok(value)
    }

    /// Insert or replace `key`
    pub async fn put(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(UPSERT)
            .bind(&self.namespace)
            .bind(key)
            .bind(value)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Write `value` and read it back, failing if the stored text differs
    pub async fn put_verified(&self, key: &str, value: &str) -> Result<()> {
        self.put(key, value).await?;
        match self.get(key).await? {
            Some(stored) if stored == value => Ok(()),
            Some(stored) => Err(Error::Verification(format!(
                "{}/{}: wrote '{}', read back '{}'",
                self.namespace, key, value, stored
            ))),
            None => Err(Error::Verification(format!(
                "{}/{}: value missing after write",
                self.namespace, key
            ))),
        }
    }

    /// Write every pair and read each back inside one transaction
    ///
    /// Either all pairs are stored or, on the first failed write or
    /// mismatched read-back, none of them are.
    pub async fn put_many_verified(&self, pairs: &[(String, String)]) -> Result<()> {
        let mut tx = self.db.begin().await?;
        for (key, value) in pairs {
            sqlx::query(UPSERT)
                .bind(&self.namespace)
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;

            let stored: Option<String> =
                sqlx::query_scalar("SELECT value FROM kv WHERE namespace = ? AND key = ?")
                    .bind(&self.namespace)
                    .bind(key)
                    .fetch_optional(&mut *tx)
                    .await?;
            if stored.as_deref() != Some(value.as_str()) {
                return Err(Error::Verification(format!(
                    "{}/{}: wrote '{}', read back {:?}",
                    self.namespace, key, value, stored
                )));
            }
        }
        tx.commit().await?;
        Ok(())
    }

    /// Delete `key`; returns whether it existed
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM kv WHERE namespace = ? AND key = ?")
            .bind(&self.namespace)
            .bind(key)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// All keys of the namespace in ascending order
    pub async fn keys(&self) -> Result<Vec<String>> {
        let keys: Vec<String> =
            sqlx::query_scalar("SELECT key FROM kv WHERE namespace = ? ORDER BY key")
                .bind(&self.namespace)
                .fetch_all(&self.db)
                .await?;
        Ok(keys)
    }

    /// All `(key, value)` pairs of the namespace in ascending key order
    pub async fn entries(&self) -> Result<Vec<(String, String)>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM kv WHERE namespace = ? ORDER BY key")
                .bind(&self.namespace)
                .fetch_all(&self.db)
                .await?;
        Ok(rows)
    }

    /// Erase every key of the namespace; returns the number removed
    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM kv WHERE namespace = ?")
            .bind(&self.namespace)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    /// Typed getter
    ///
    /// Returns None if the key is absent, an error if it cannot be parsed.
    pub async fn get_parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(s) => match s.parse::<T>() {
                Ok(parsed) => Ok(Some(parsed)),
                Err(_) => Err(Error::Config(format!(
                    "Failed to parse {}/{} value: {}",
                    self.namespace, key, s
                ))),
            },
            None => Ok(None),
        }
    }

    /// Typed getter falling back to `default` when absent or unparsable
    pub async fn get_or<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.get_parsed(key).await {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(e) => {
                tracing::warn!("{}; using default", e);
                default
            }
        }
    }

    /// Typed setter with read-after-write verification
    pub async fn put_display<T: ToString>(&self, key: &str, value: T) -> Result<()> {
        self.put_verified(key, &value.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;

    async fn store(namespace: &str) -> KvStore {
        let pool = init_memory_database().await.unwrap();
        KvStore::new(pool, namespace)
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let kv = store(SETTINGS_NAMESPACE).await;

        assert_eq!(kv.get("initVolume").await.unwrap(), None);
        kv.put("initVolume", "3").await.unwrap();
        assert_eq!(kv.get("initVolume").await.unwrap().as_deref(), Some("3"));

        kv.put("initVolume", "5").await.unwrap();
        assert_eq!(kv.get_parsed::<u8>("initVolume").await.unwrap(), Some(5));

        assert!(kv.remove("initVolume").await.unwrap());
        assert!(!kv.remove("initVolume").await.unwrap());
        assert!(!kv.contains("initVolume").await.unwrap());
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let pool = init_memory_database().await.unwrap();
        let settings = KvStore::new(pool.clone(), SETTINGS_NAMESPACE);
        let tags = KvStore::new(pool, TAGS_NAMESPACE);

        settings.put("123456789012", "x").await.unwrap();
        tags.put("123456789012", "#/a.mp3#0#1#0").await.unwrap();

        assert_eq!(settings.clear().await.unwrap(), 1);
        assert_eq!(tags.keys().await.unwrap(), vec!["123456789012".to_string()]);
    }

    #[tokio::test]
    async fn test_get_parsed_rejects_garbage() {
        let kv = store(SETTINGS_NAMESPACE).await;
        kv.put("maxVolumeSp", "loud").await.unwrap();

        assert!(kv.get_parsed::<u8>("maxVolumeSp").await.is_err());
        assert_eq!(kv.get_or::<u8>("maxVolumeSp", 21).await, 21);
        assert_eq!(kv.get_or::<u8>("missing", 7).await, 7);
    }

    #[tokio::test]
    async fn test_entries_sorted_by_key() {
        let kv = store(TAGS_NAMESPACE).await;
        kv.put_display("2", 20).await.unwrap();
        kv.put_display("1", 10).await.unwrap();

        let entries = kv.entries().await.unwrap();
        assert_eq!(
            entries,
            vec![
                ("1".to_string(), "10".to_string()),
                ("2".to_string(), "20".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_put_many_is_all_or_nothing() {
        let kv = store(SETTINGS_NAMESPACE).await;
        sqlx::query(
            "CREATE TRIGGER reject_hp BEFORE INSERT ON kv \
             WHEN NEW.key = 'general.maxVolumeHp' \
             BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .execute(kv.pool())
        .await
        .unwrap();

        let pairs = vec![
            ("general.initVolume".to_string(), "4".to_string()),
            ("general.maxVolumeHp".to_string(), "10".to_string()),
        ];
        assert!(kv.put_many_verified(&pairs).await.is_err());
        assert_eq!(kv.get("general.initVolume").await.unwrap(), None);

        kv.put_many_verified(&pairs[..1]).await.unwrap();
        assert_eq!(kv.get("general.initVolume").await.unwrap().as_deref(), Some("4"));
    }
}
