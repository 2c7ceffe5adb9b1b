// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite record store for starred repositories.
//!
//! Holds the enriched star records, the sync cursor, and one marker table
//! per embedding backend listing the ids already present in that backend's
//! vector index. Star rows are insert-only.

use anyhow::{Context, Result};
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::embedding::EmbeddingBackend;

/// Key of the sync cursor row in `sync_status`.
pub const CURSOR_KEY: &str = "last_synced_page";

/// SQLite caps bound parameters per statement; stay well under it.
const MAX_VARS: usize = 900;

/// A stored starred repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StarRecord {
    /// GitHub repository id
    pub id: i64,
    /// `owner/name`
    pub name: String,
    pub description: String,
    pub url: String,
    /// Generated abstract; empty when summarization was unavailable
    pub summary: String,
}

pub struct RecordStore {
    conn: Connection,
    path: PathBuf,
}

impl RecordStore {
    /// Opens or creates a record store at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let store = Self { conn, path };
        store.init_schema()?;
        Ok(store)
    }

    /// Opens a private in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let store = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
            CREATE TABLE IF NOT EXISTS star (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                url TEXT NOT NULL,
                summary TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sync_status (
                key TEXT PRIMARY KEY,
                value INTEGER
            );
            "#,
            )
            .context("Failed to initialize database schema")?;

        self.conn.execute(
            "INSERT OR IGNORE INTO sync_status (key, value) VALUES (?1, 0)",
            params![CURSOR_KEY],
        )?;
        Ok(())
    }

    /// Opens an existing store without creating or migrating anything.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        Ok(Self { conn, path })
    }

    /// Returns the path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Closes the storage connection explicitly.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| e)?;
        Ok(())
    }

    /// Last page whose items are durably committed (0 before the first sync).
    pub fn last_synced_page(&self) -> Result<u32> {
        let value: Option<Option<i64>> = self
            .conn
            .query_row(
                "SELECT value FROM sync_status WHERE key = ?1",
                params![CURSOR_KEY],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read sync cursor")?;
        let value = value.flatten().unwrap_or(0);
        u32::try_from(value)
            .with_context(|| format!("Sync cursor {} is out of range", value))
    }

    /// Returns which of `ids` already have a star row.
    pub fn existing_ids(&self, ids: &[i64]) -> Result<HashSet<i64>> {
        let mut found = HashSet::new();
        for chunk in ids.chunks(MAX_VARS) {
            let sql = format!(
                "SELECT id FROM star WHERE id IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| row.get::<_, i64>(0))?;
            for id in rows {
                found.insert(id?);
            }
        }
        Ok(found)
    }

    /// Inserts a page of records and advances the cursor to `page` in one transaction.
    ///
    /// Records whose id already exists are ignored. The cursor never moves
    /// backwards. Returns the number of rows actually inserted.
    pub fn commit_page(&mut self, page: u32, records: &[StarRecord]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO star (id, name, description, url, summary)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for record in records {
                inserted += stmt.execute(params![
                    record.id,
                    record.name,
                    record.description,
                    record.url,
                    record.summary
                ])?;
            }
        }
        tx.execute(
            "UPDATE sync_status SET value = MAX(COALESCE(value, 0), ?1) WHERE key = ?2",
            params![page, CURSOR_KEY],
        )?;
        tx.commit().context("Failed to commit synced page")?;
        Ok(inserted)
    }

    /// Fetches records by id. Order is unspecified and unknown ids are absent.
    pub fn get_stars(&self, ids: &[i64]) -> Result<Vec<StarRecord>> {
        let mut records = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_VARS) {
            let sql = format!(
                "SELECT id, name, description, url, summary FROM star WHERE id IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), row_to_record)?;
            for record in rows {
                records.push(record?);
            }
        }
        Ok(records)
    }

    /// Fetches one record by id.
    pub fn get_star(&self, id: i64) -> Result<Option<StarRecord>> {
        self.conn
            .query_row(
                "SELECT id, name, description, url, summary FROM star WHERE id = ?1",
                params![id],
                row_to_record,
            )
            .optional()
            .context("Failed to query star")
    }

    /// Counts total number of star records.
    pub fn count_stars(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM star", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Creates the backend's marker table if missing.
    pub fn ensure_marker_table(&self, backend: EmbeddingBackend) -> Result<()> {
        self.conn
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} (star_id INTEGER PRIMARY KEY)",
                backend.marker_table()
            ))
            .with_context(|| format!("Failed to create {}", backend.marker_table()))
    }

    /// Drops and recreates the backend's marker table.
    pub fn reset_markers(&self, backend: EmbeddingBackend) -> Result<()> {
        self.conn
            .execute_batch(&format!(
                "DROP TABLE IF EXISTS {}",
                backend.marker_table()
            ))
            .with_context(|| format!("Failed to drop {}", backend.marker_table()))?;
        self.ensure_marker_table(backend)
    }

    /// Records with a non-empty summary that are not yet in the backend's index.
    pub fn unindexed_summaries(&self, backend: EmbeddingBackend) -> Result<Vec<(i64, String)>> {
        self.ensure_marker_table(backend)?;
        let sql = format!(
            "SELECT id, summary FROM star
             WHERE summary != '' AND id NOT IN (SELECT star_id FROM {})
             ORDER BY id",
            backend.marker_table()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to query unindexed stars")?;
        Ok(rows)
    }

    /// Adds ids to the backend's marker set in one transaction.
    pub fn mark_indexed(&mut self, backend: EmbeddingBackend, ids: &[i64]) -> Result<()> {
        self.ensure_marker_table(backend)?;
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR IGNORE INTO {} (star_id) VALUES (?1)",
                backend.marker_table()
            ))?;
            for id in ids {
                stmt.execute(params![id])?;
            }
        }
        tx.commit().context("Failed to commit index markers")?;
        Ok(())
    }

    /// Size of the backend's marker set; 0 when the table was never created.
    pub fn indexed_count(&self, backend: EmbeddingBackend) -> Result<usize> {
        let table = backend.marker_table();
        let exists: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Ok(0);
        }
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            .with_context(|| format!("Failed to count {}", table))?;
        Ok(count as usize)
    }

    /// All ids in the backend's marker set.
    pub fn indexed_ids(&self, backend: EmbeddingBackend) -> Result<HashSet<i64>> {
        self.ensure_marker_table(backend)?;
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT star_id FROM {}", backend.marker_table()))?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<std::result::Result<HashSet<_>, _>>()?;
        Ok(ids)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<StarRecord> {
    Ok(StarRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        url: row.get(3)?,
        summary: row.get(4)?,
    })
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}
