use super::models::{RemoteRecord, TrackRecord};
use super::schema::LIBRARY_VERSIONED_SCHEMAS;
use super::{RemoteStore, TrackIndex};
use crate::sqlite_persistence::{read_schema_version, BASE_DB_VERSION};
use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

const TRACK_COLUMNS: &str = "path, hash, size, mtime, title, artist, duration, bitrate, verified";

/// Track index and remote registry backed by a single SQLite connection.
pub struct SqliteLibraryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLibraryStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let mut conn = Connection::open(path)
            .with_context(|| format!("Failed to open library database at {:?}", path))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let latest = LIBRARY_VERSIONED_SCHEMAS
            .last()
            .context("No library schema declared")?;

        if is_new_db {
            info!("Creating new library database at {:?}", path);
            latest.create(&conn)?;
        } else {
            let db_version = read_schema_version(&conn)?;
            if db_version < 1 {
                bail!(
                    "Library database version {} is invalid (expected >= 1)",
                    db_version
                );
            }

            let schema = LIBRARY_VERSIONED_SCHEMAS
                .iter()
                .find(|s| s.version as i64 == db_version)
                .with_context(|| format!("Unknown library database version {}", db_version))?;
            schema.validate(&conn).with_context(|| {
                format!(
                    "Library database schema validation failed for version {}",
                    db_version
                )
            })?;

            if (db_version as usize) < latest.version {
                info!(
                    "Migrating library database from version {} to {}",
                    db_version, latest.version
                );
                Self::migrate(&mut conn, db_version as usize)?;
            }
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        LIBRARY_VERSIONED_SCHEMAS
            .last()
            .context("No library schema declared")?
            .create(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate(conn: &mut Connection, from_version: usize) -> Result<()> {
        let tx = conn.transaction()?;
        let mut current = from_version;
        for schema in LIBRARY_VERSIONED_SCHEMAS
            .iter()
            .filter(|s| s.version > from_version)
        {
            if let Some(migration) = schema.migration {
                migration(&tx).with_context(|| {
                    format!("Failed to run migration to version {}", schema.version)
                })?;
            }
            current = schema.version;
        }
        tx.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + current),
            [],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn row_to_track(row: &rusqlite::Row) -> rusqlite::Result<TrackRecord> {
        Ok(TrackRecord {
            path: row.get("path")?,
            hash: row.get("hash")?,
            size: row.get::<_, i64>("size")?.max(0) as u64,
            mtime: row.get("mtime")?,
            title: row.get("title")?,
            artist: row.get("artist")?,
            duration: row.get("duration")?,
            bitrate: row.get("bitrate")?,
            verified: row.get::<_, i64>("verified")? != 0,
        })
    }

    fn row_to_remote(row: &rusqlite::Row) -> rusqlite::Result<RemoteRecord> {
        Ok(RemoteRecord {
            name: row.get("name")?,
            url: row.get("url")?,
            last_sync: row.get("last_sync")?,
        })
    }

    fn query_tracks<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<TrackRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let tracks = stmt
            .query_map(params, Self::row_to_track)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tracks)
    }
}

impl TrackIndex for SqliteLibraryStore {
    fn put(&self, track: &TrackRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO tracks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1)",
                TRACK_COLUMNS
            ),
            params![
                track.path,
                track.hash,
                track.size as i64,
                track.mtime,
                track.title,
                track.artist,
                track.duration,
                track.bitrate,
            ],
        )
        .with_context(|| format!("Failed to store track {}", track.path))?;
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM tracks WHERE path = ?1", params![path])?;
        Ok(removed > 0)
    }

    fn get(&self, path: &str) -> Result<Option<TrackRecord>> {
        let conn = self.conn.lock().unwrap();
        let track = conn
            .query_row(
                &format!("SELECT {} FROM tracks WHERE path = ?1", TRACK_COLUMNS),
                params![path],
                Self::row_to_track,
            )
            .optional()?;
        Ok(track)
    }

    fn get_by_hash(&self, hash: &str) -> Result<Option<TrackRecord>> {
        let conn = self.conn.lock().unwrap();
        let track = conn
            .query_row(
                &format!(
                    "SELECT {} FROM tracks WHERE hash = ?1 AND verified = 1 LIMIT 1",
                    TRACK_COLUMNS
                ),
                params![hash],
                Self::row_to_track,
            )
            .optional()?;
        Ok(track)
    }

    fn find_by_metadata(&self, title: &str, artist: &str) -> Result<Vec<TrackRecord>> {
        self.query_tracks(
            &format!(
                "SELECT {} FROM tracks WHERE title = ?1 AND artist = ?2 AND verified = 1",
                TRACK_COLUMNS
            ),
            params![title, artist],
        )
    }

    fn list_verified(&self) -> Result<Vec<TrackRecord>> {
        self.query_tracks(
            &format!(
                "SELECT {} FROM tracks WHERE verified = 1 ORDER BY path",
                TRACK_COLUMNS
            ),
            [],
        )
    }

    fn list_paths(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT path FROM tracks")?;
        let paths = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(paths)
    }

    fn count_verified(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM tracks WHERE verified = 1", [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }
}

impl RemoteStore for SqliteLibraryStore {
    fn upsert_remote(&self, name: &str, url: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO remotes (name, url, last_sync) VALUES (?1, ?2, 0)",
            params![name, url],
        )?;
        Ok(())
    }

    fn seed_remote(&self, name: &str, url: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO remotes (name, url, last_sync) VALUES (?1, ?2, 0)",
            params![name, url],
        )?;
        Ok(inserted > 0)
    }

    fn delete_remote(&self, name: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM remotes WHERE name = ?1", params![name])?;
        Ok(removed > 0)
    }

    fn get_remote(&self, name: &str) -> Result<Option<RemoteRecord>> {
        let conn = self.conn.lock().unwrap();
        let remote = conn
            .query_row(
                "SELECT name, url, last_sync FROM remotes WHERE name = ?1",
                params![name],
                Self::row_to_remote,
            )
            .optional()?;
        Ok(remote)
    }

    fn list_remotes(&self) -> Result<Vec<RemoteRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT name, url, last_sync FROM remotes ORDER BY name")?;
        let remotes = stmt
            .query_map([], Self::row_to_remote)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(remotes)
    }

    fn update_last_sync(&self, name: &str, timestamp_ms: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE remotes SET last_sync = ?1 WHERE name = ?2",
            params![timestamp_ms, name],
        )?;
        Ok(updated > 0)
    }
}
