use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use cinemeld_core::host::{Settings, Translation};
use cinemeld_db::repo;
use sqlx::SqlitePool;
use tracing::warn;

const BLOB_PREFIX: &str = "blob.";

/// Settings persisted in the `settings` table.
///
/// Reads are memoised until the next write. Binary values are stored
/// hex-encoded under a `blob.` prefixed key.
pub struct DbSettings {
    db: SqlitePool,
    memo: RwLock<HashMap<String, Option<String>>>,
}

impl DbSettings {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            db,
            memo: RwLock::new(HashMap::new()),
        }
    }

    fn forget(&self, key: &str) {
        self.memo.write().unwrap_or_else(|e| e.into_inner()).remove(key);
    }
}

#[async_trait]
impl Settings for DbSettings {
    async fn get(&self, key: &str) -> Option<String> {
        if let Some(hit) = self.memo.read().unwrap_or_else(|e| e.into_inner()).get(key) {
            return hit.clone();
        }
        let value = match repo::settings::get(&self.db, key).await {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "settings read failed");
                return None;
            }
        };
        self.memo
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.clone());
        value
    }

    async fn set(&self, key: &str, value: &str) {
        if let Err(e) = repo::settings::set(&self.db, key, value).await {
            warn!(key, error = %e, "settings write failed");
        }
        self.forget(key);
    }

    async fn get_blob(&self, key: &str) -> Option<Vec<u8>> {
        let encoded = self.get(&format!("{BLOB_PREFIX}{key}")).await?;
        hex::decode(encoded).ok()
    }

    async fn set_blob(&self, key: &str, value: &[u8]) {
        self.set(&format!("{BLOB_PREFIX}{key}"), &hex::encode(value)).await;
    }
}

/// Localised strings supplied by the host shell, falling back to the id.
#[derive(Debug, Default)]
pub struct StringTable {
    strings: HashMap<u32, String>,
}

impl StringTable {
    pub fn new(strings: HashMap<u32, String>) -> Self {
        Self { strings }
    }
}

impl Translation for StringTable {
    fn translate(&self, id: u32) -> String {
        self.strings.get(&id).cloned().unwrap_or_else(|| id.to_string())
    }
}
