//! SQLite LLM response cache, partitioned by workspace and mode.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use kgrag_core::{CacheEntry, ModeBucket, ModeCache, QuantizedEmbedding, RagError, Result};

/// A stored mode and how many entries it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeSummary {
    pub mode: String,
    pub entries: u64,
}

/// Mode buckets persisted in SQLite.
///
/// Every read and write is scoped to the workspace given at open time, so
/// several workspaces can share one database file.
pub struct SqliteModeCache {
    conn: Mutex<Connection>,
    workspace: String,
}

impl SqliteModeCache {
    /// Open or create a cache database at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Storage`] if the database cannot be opened.
    pub fn open(path: &Path, workspace: &str) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| RagError::Storage(e.to_string()))?;
        debug!(path = %path.display(), workspace, "opened llm cache");
        Self::with_connection(conn, workspace)
    }

    /// Create an in-memory cache (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Storage`] if schema creation fails.
    pub fn in_memory(workspace: &str) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| RagError::Storage(e.to_string()))?;
        Self::with_connection(conn, workspace)
    }

    fn with_connection(conn: Connection, workspace: &str) -> Result<Self> {
        let cache = Self {
            conn: Mutex::new(conn),
            workspace: workspace.to_string(),
        };
        cache.create_schema()?;
        Ok(cache)
    }

    fn create_schema(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS llm_cache (
                workspace TEXT NOT NULL,
                mode TEXT NOT NULL,
                id TEXT NOT NULL,
                cache_type TEXT NOT NULL,
                return_value TEXT NOT NULL,
                original_prompt TEXT NOT NULL,
                embedding BLOB,
                embedding_min REAL,
                embedding_max REAL,
                embedding_shape TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (workspace, mode, id)
            );
            ",
            )
            .map_err(|e| RagError::Storage(e.to_string()))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| RagError::Storage("llm cache connection poisoned".to_string()))
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    /// List stored modes in this workspace with their entry counts.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Storage`] if the query fails.
    pub fn modes(&self) -> Result<Vec<ModeSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT mode, COUNT(*) FROM llm_cache
                 WHERE workspace = ?1
                 GROUP BY mode
                 ORDER BY mode",
            )
            .map_err(|e| RagError::Storage(e.to_string()))?;
        let modes = stmt
            .query_map(params![self.workspace], |row| {
                let entries: i64 = row.get(1)?;
                Ok(ModeSummary {
                    mode: row.get(0)?,
                    entries: entries as u64,
                })
            })
            .map_err(|e| RagError::Storage(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| RagError::Storage(e.to_string()))?;
        Ok(modes)
    }
}

/// Raw columns of one cache row.
struct EntryRow {
    id: String,
    mode: String,
    cache_type: String,
    return_value: String,
    original_prompt: String,
    embedding: Option<Vec<u8>>,
    embedding_min: Option<f64>,
    embedding_max: Option<f64>,
    embedding_shape: Option<String>,
    created_at: String,
    updated_at: String,
}

const ENTRY_COLUMNS: &str = "id, mode, cache_type, return_value, original_prompt,
    embedding, embedding_min, embedding_max, embedding_shape, created_at, updated_at";

impl EntryRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            mode: row.get(1)?,
            cache_type: row.get(2)?,
            return_value: row.get(3)?,
            original_prompt: row.get(4)?,
            embedding: row.get(5)?,
            embedding_min: row.get(6)?,
            embedding_max: row.get(7)?,
            embedding_shape: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_entry(self) -> Result<CacheEntry> {
        let embedding = match (self.embedding, self.embedding_min, self.embedding_max) {
            (Some(values), Some(min), Some(max)) => {
                let shape = match self.embedding_shape {
                    Some(s) => serde_json::from_str(&s)?,
                    None => vec![values.len()],
                };
                Some(QuantizedEmbedding {
                    values,
                    min: min as f32,
                    max: max as f32,
                    shape,
                })
            }
            _ => None,
        };
        Ok(CacheEntry {
            args_hash: self.id,
            mode: self.mode,
            cache_type: self.cache_type,
            return_value: self.return_value,
            original_prompt: self.original_prompt,
            embedding,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RagError::Storage(format!("invalid timestamp {raw:?}: {e}")))
}

#[async_trait]
impl ModeCache for SqliteModeCache {
    async fn get_bucket(&self, mode: &str) -> Result<Option<ModeBucket>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM llm_cache WHERE workspace = ?1 AND mode = ?2"
            ))
            .map_err(|e| RagError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map(params![self.workspace, mode], EntryRow::from_row)
            .map_err(|e| RagError::Storage(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| RagError::Storage(e.to_string()))?;

        if rows.is_empty() {
            return Ok(None);
        }
        let bucket = rows
            .into_iter()
            .map(|row| row.into_entry().map(|e| (e.args_hash.clone(), e)))
            .collect::<Result<ModeBucket>>()?;
        Ok(Some(bucket))
    }

    /// Reads a single row instead of the whole bucket.
    async fn get_entry(&self, mode: &str, args_hash: &str) -> Result<Option<CacheEntry>> {
        let row = self
            .conn()?
            .query_row(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM llm_cache
                     WHERE workspace = ?1 AND mode = ?2 AND id = ?3"
                ),
                params![self.workspace, mode, args_hash],
                EntryRow::from_row,
            )
            .optional()
            .map_err(|e| RagError::Storage(e.to_string()))?;
        row.map(EntryRow::into_entry).transpose()
    }

    /// Replaces the stored bucket in a single transaction. Writing an empty
    /// bucket removes the mode.
    async fn put_bucket(&self, mode: &str, bucket: ModeBucket) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RagError::Storage(e.to_string()))?;
        tx.execute(
            "DELETE FROM llm_cache WHERE workspace = ?1 AND mode = ?2",
            params![self.workspace, mode],
        )
        .map_err(|e| RagError::Storage(e.to_string()))?;

        {
            let mut insert = tx
                .prepare(
                    "INSERT INTO llm_cache
                    (workspace, mode, id, cache_type, return_value, original_prompt,
                     embedding, embedding_min, embedding_max, embedding_shape,
                     created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                )
                .map_err(|e| RagError::Storage(e.to_string()))?;
            for (id, entry) in &bucket {
                let emb = entry.embedding.as_ref();
                let shape = emb.map(|e| serde_json::to_string(&e.shape)).transpose()?;
                insert
                    .execute(params![
                        self.workspace,
                        mode,
                        id,
                        entry.cache_type,
                        entry.return_value,
                        entry.original_prompt,
                        emb.map(|e| e.values.as_slice()),
                        emb.map(|e| f64::from(e.min)),
                        emb.map(|e| f64::from(e.max)),
                        shape,
                        entry.created_at.to_rfc3339(),
                        entry.updated_at.to_rfc3339(),
                    ])
                    .map_err(|e| RagError::Storage(e.to_string()))?;
            }
        }

        tx.commit().map_err(|e| RagError::Storage(e.to_string()))?;
        debug!(workspace = %self.workspace, mode, entries = bucket.len(), "wrote cache bucket");
        Ok(())
    }

    async fn drop_modes(&self, modes: &[String]) -> Result<bool> {
        if modes.is_empty() {
            return Ok(false);
        }
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RagError::Storage(e.to_string()))?;
        let mut removed = 0;
        for mode in modes {
            removed += tx
                .execute(
                    "DELETE FROM llm_cache WHERE workspace = ?1 AND mode = ?2",
                    params![self.workspace, mode],
                )
                .map_err(|e| RagError::Storage(e.to_string()))?;
        }
        tx.commit().map_err(|e| RagError::Storage(e.to_string()))?;
        info!(workspace = %self.workspace, ?modes, removed, "dropped cache modes");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(hash: &str, answer: &str, embedding: Option<QuantizedEmbedding>) -> CacheEntry {
        let ts = Utc.with_ymd_and_hms(2025, 2, 10, 12, 0, 0).unwrap();
        CacheEntry {
            args_hash: hash.to_string(),
            mode: "local".to_string(),
            cache_type: "query".to_string(),
            return_value: answer.to_string(),
            original_prompt: format!("question for {hash}"),
            embedding,
            created_at: ts,
            updated_at: ts,
        }
    }

    fn bucket(entries: Vec<CacheEntry>) -> ModeBucket {
        entries
            .into_iter()
            .map(|e| (e.args_hash.clone(), e))
            .collect()
    }

    #[tokio::test]
    async fn missing_mode_is_none() {
        let cache = SqliteModeCache::in_memory("default").unwrap();
        assert!(cache.get_bucket("local").await.unwrap().is_none());
        assert!(cache.modes().unwrap().is_empty());
    }

    #[tokio::test]
    async fn bucket_round_trips_with_embedding() {
        let cache = SqliteModeCache::in_memory("default").unwrap();
        let emb = QuantizedEmbedding {
            values: vec![0, 17, 255],
            min: -0.5,
            max: 0.75,
            shape: vec![3],
        };
        let stored = bucket(vec![entry("h1", "Alice", Some(emb)), entry("h2", "Bob", None)]);
        cache.put_bucket("local", stored.clone()).await.unwrap();

        let loaded = cache.get_bucket("local").await.unwrap().unwrap();
        assert_eq!(loaded, stored);
    }

    #[tokio::test]
    async fn put_bucket_replaces_previous_contents() {
        let cache = SqliteModeCache::in_memory("default").unwrap();
        cache
            .put_bucket("local", bucket(vec![entry("h1", "a", None), entry("h2", "b", None)]))
            .await
            .unwrap();
        cache
            .put_bucket("local", bucket(vec![entry("h3", "c", None)]))
            .await
            .unwrap();

        let loaded = cache.get_bucket("local").await.unwrap().unwrap();
        assert_eq!(loaded.keys().collect::<Vec<_>>(), vec!["h3"]);
        assert_eq!(cache.get_entry("local", "h3").await.unwrap().unwrap().return_value, "c");
    }

    #[tokio::test]
    async fn workspaces_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let team_a = SqliteModeCache::open(&path, "team-a").unwrap();
        let team_b = SqliteModeCache::open(&path, "team-b").unwrap();

        team_a
            .put_bucket("local", bucket(vec![entry("h1", "a", None)]))
            .await
            .unwrap();

        assert!(team_b.get_bucket("local").await.unwrap().is_none());
        assert!(team_b.drop_modes(&["local".to_string()]).await.unwrap());
        assert!(team_a.get_bucket("local").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn drop_modes_and_mode_listing() {
        let cache = SqliteModeCache::in_memory("default").unwrap();
        for mode in ["local", "global", "default"] {
            cache
                .put_bucket(mode, bucket(vec![entry("h1", "a", None), entry("h2", "b", None)]))
                .await
                .unwrap();
        }

        assert!(!cache.drop_modes(&[]).await.unwrap());
        assert!(cache
            .drop_modes(&["local".to_string(), "global".to_string()])
            .await
            .unwrap());

        assert_eq!(
            cache.modes().unwrap(),
            vec![ModeSummary {
                mode: "default".to_string(),
                entries: 2
            }]
        );
    }

    #[tokio::test]
    async fn bucket_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        {
            let cache = SqliteModeCache::open(&path, "default").unwrap();
            cache
                .put_bucket("default", bucket(vec![entry("h1", "kept", None)]))
                .await
                .unwrap();
        }
        let cache = SqliteModeCache::open(&path, "default").unwrap();
        let got = cache.get_entry("default", "h1").await.unwrap().unwrap();
        assert_eq!(got.return_value, "kept");
    }

    #[tokio::test]
    async fn get_entry_reads_only_the_requested_row() {
        let cache = SqliteModeCache::in_memory("default").unwrap();
        cache
            .put_bucket("default", bucket(vec![entry("good", "kept", None)]))
            .await
            .unwrap();
        cache
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO llm_cache
                 (workspace, mode, id, cache_type, return_value, original_prompt,
                  created_at, updated_at)
                 VALUES ('default', 'default', 'bad', 'extract', 'x', 'p', 'yesterday', 'today')",
                [],
            )
            .unwrap();

        assert!(cache.get_bucket("default").await.is_err());
        let got = cache.get_entry("default", "good").await.unwrap().unwrap();
        assert_eq!(got.return_value, "kept");
        assert!(cache.get_entry("default", "missing").await.unwrap().is_none());
        assert!(cache.get_entry("local", "good").await.unwrap().is_none());
    }
}
