use sqlx::SqlitePool;

/// A stored setting with its declared type and optional display label.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingRow {
    pub key: String,
    pub value: String,
    pub kind: String,
    pub label: Option<String>,
}

/// Get a setting value by key.
pub async fn get(pool: &SqlitePool, key: &str) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(v,)| v))
}

pub async fn get_row(pool: &SqlitePool, key: &str) -> Result<Option<SettingRow>, sqlx::Error> {
    let row: Option<(String, String, String, Option<String>)> =
        sqlx::query_as("SELECT key, value, type, label FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|r| SettingRow {
        key: r.0,
        value: r.1,
        kind: r.2,
        label: r.3,
    }))
}

/// Set a setting value (upsert). The declared type and label are kept.
pub async fn set(pool: &SqlitePool, key: &str, value: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

/// Declare a setting with its type and label, inserting the default value if absent.
pub async fn declare(
    pool: &SqlitePool,
    key: &str,
    default: &str,
    kind: &str,
    label: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO settings (key, value, type, label) VALUES (?, ?, ?, ?) \
         ON CONFLICT(key) DO UPDATE SET type = excluded.type, label = excluded.label",
    )
    .bind(key)
    .bind(default)
    .bind(kind)
    .bind(label)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list(pool: &SqlitePool) -> Result<Vec<SettingRow>, sqlx::Error> {
    let rows: Vec<(String, String, String, Option<String>)> =
        sqlx::query_as("SELECT key, value, type, label FROM settings ORDER BY key")
            .fetch_all(pool)
            .await?;
    Ok(rows
        .into_iter()
        .map(|r| SettingRow {
            key: r.0,
            value: r.1,
            kind: r.2,
            label: r.3,
        })
        .collect())
}

/// Delete a setting.
pub async fn delete(pool: &SqlitePool, key: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM settings WHERE key = ?")
        .bind(key)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::test_pool;

    #[tokio::test]
    async fn declare_keeps_user_value() {
        let pool = test_pool().await;
        set(&pool, "playback.watched_fraction", "0.9").await.unwrap();
        declare(&pool, "playback.watched_fraction", "0.8", "float", Some("Watched at"))
            .await
            .unwrap();
        declare(&pool, "menu.page_size", "20", "integer", None).await.unwrap();

        let row = get_row(&pool, "playback.watched_fraction").await.unwrap().unwrap();
        assert_eq!(row.value, "0.9");
        assert_eq!(row.kind, "float");
        assert_eq!(row.label.as_deref(), Some("Watched at"));
        assert_eq!(get(&pool, "menu.page_size").await.unwrap().as_deref(), Some("20"));
        assert_eq!(list(&pool).await.unwrap().len(), 2);
        assert!(delete(&pool, "menu.page_size").await.unwrap());
    }
}
