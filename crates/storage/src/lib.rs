//! Storage layer: local SQLite settings store.
//!
//! Holds DB pool setup, the migration runner and the key/value helpers the
//! session persistence is built on.

use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

/// Opens the settings database.
///
/// `location` is either a `sqlite:` URL or a filesystem path. For a path the
/// parent directories are created and the file is created on first use.
/// In-memory databases get a single connection so every query sees the same
/// store.
pub async fn connect(location: &str) -> anyhow::Result<SqlitePool> {
    let url = if location.starts_with("sqlite:") {
        location.to_string()
    } else {
        let path = Path::new(location);
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        path_to_url(path)
    };
    let options = SqliteConnectOptions::from_str(&url)
        .with_context(|| format!("bad database location {}", url))?
        .create_if_missing(true);
    let max_connections = if url.contains("mode=memory") || url.ends_with(":memory:") {
        1
    } else {
        5
    };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .with_context(|| format!("opening {}", url))?;
    tracing::debug!(url = %url, "settings database ready");
    Ok(pool)
}

fn path_to_url(path: &Path) -> String {
    let norm = path.to_string_lossy().replace('\\', "/");
    if path.is_absolute() {
        format!("sqlite:///{}", norm.trim_start_matches('/'))
    } else {
        format!("sqlite://{}", norm)
    }
}

/// Brings the schema up to date. Already applied migrations are skipped.
pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("running settings migrations")?;
    Ok(())
}

pub async fn kv_get(pool: &SqlitePool, key: &str) -> anyhow::Result<Option<String>> {
    let row = sqlx::query("SELECT value FROM kv WHERE key = ?1")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.get::<String, _>(0)))
}

pub async fn kv_set(pool: &SqlitePool, key: &str, value: &str) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, strftime('%s','now'))
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

/// Removes `key`; removing a missing key is not an error.
pub async fn kv_remove(pool: &SqlitePool, key: &str) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM kv WHERE key = ?1")
        .bind(key)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn kv_set_overwrites_and_remove_clears() {
        let pool = connect("sqlite://file:kv_roundtrip?mode=memory&cache=shared")
            .await
            .unwrap();
        migrate(&pool).await.unwrap();

        assert_eq!(kv_get(&pool, "authToken").await.unwrap(), None);
        kv_set(&pool, "authToken", "first").await.unwrap();
        kv_set(&pool, "authToken", "second").await.unwrap();
        assert_eq!(
            kv_get(&pool, "authToken").await.unwrap().as_deref(),
            Some("second")
        );

        kv_remove(&pool, "authToken").await.unwrap();
        kv_remove(&pool, "authToken").await.unwrap();
        assert_eq!(kv_get(&pool, "authToken").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_database_is_created_on_connect() {
        let temp = tempfile::tempdir().unwrap();
        let db_path = temp.path().join("nested").join("session.db");
        let pool = connect(&db_path.to_string_lossy()).await.unwrap();
        migrate(&pool).await.unwrap();
        kv_set(&pool, "user", "{}").await.unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn paths_become_sqlite_urls() {
        assert_eq!(path_to_url(Path::new("data/session.db")), "sqlite://data/session.db");
        assert_eq!(path_to_url(Path::new("/var/lib/photoup.db")), "sqlite:///var/lib/photoup.db");
    }

    #[tokio::test]
    async fn migrating_twice_keeps_stored_values() {
        let pool = connect("sqlite://file:kv_remigrate?mode=memory&cache=shared")
            .await
            .unwrap();
        migrate(&pool).await.unwrap();
        kv_set(&pool, "user", "ana").await.unwrap();
        migrate(&pool).await.unwrap();
        assert_eq!(kv_get(&pool, "user").await.unwrap().as_deref(), Some("ana"));
    }
}
