//! Local snapshot database adapter.
//!
//! The snapshot is an SQLite file with three tracked tables:
//! `observations`, `session_summaries`, and `user_prompts`. This module
//! wraps the handful of operations the sync engine needs: integrity
//! checking, consistent vacuum-copies, row counting, and content hashing.
//!
//! `vacuum_copy` must run with no other writer touching the source; the
//! engine guarantees that by quiescing the worker first.

use crate::error::{Error, Result};
use libsql::Builder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Tables the manifest reports on. Missing tables count as zero.
pub const TRACKED_TABLES: [&str; 3] = ["observations", "session_summaries", "user_prompts"];

/// Row counts of the tracked tables plus the total table count.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DbCounts {
    pub observations: i64,
    pub session_summaries: i64,
    pub user_prompts: i64,
    pub tables: i64,
}

async fn connect(path: &Path) -> Result<libsql::Connection> {
    let db = Builder::new_local(path).build().await?;
    Ok(db.connect()?)
}

/// Run `PRAGMA integrity_check` and return the first report line
/// (`"ok"` when the database is healthy).
pub async fn integrity_check(path: &Path) -> Result<String> {
    let conn = connect(path).await?;
    let mut rows = conn.query("PRAGMA integrity_check", ()).await?;
    match rows.next().await? {
        Some(row) => Ok(row.get::<String>(0)?),
        None => Ok("integrity_check returned no rows".to_string()),
    }
}

/// Produce a consistent, defragmented copy of `src` at `dest` via
/// `VACUUM INTO`. The destination must not exist or be an empty file.
pub async fn vacuum_copy(src: &Path, dest: &Path) -> Result<()> {
    let conn = connect(src).await?;
    let dest_str = dest
        .to_str()
        .ok_or_else(|| Error::InvalidInput(format!("non-utf8 path: {}", dest.display())))?;
    conn.execute("VACUUM INTO ?1", libsql::params![dest_str])
        .await?;
    Ok(())
}

/// Count rows in the tracked tables and the total number of tables.
/// Best-effort: a missing table counts as zero.
pub async fn counts(path: &Path) -> Result<DbCounts> {
    let conn = connect(path).await?;

    async fn count_table(conn: &libsql::Connection, table: &str) -> i64 {
        let sql = format!("SELECT COUNT(*) FROM {table}");
        match conn.query(&sql, ()).await {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<i64>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0,
        }
    }

    let observations = count_table(&conn, "observations").await;
    let session_summaries = count_table(&conn, "session_summaries").await;
    let user_prompts = count_table(&conn, "user_prompts").await;

    let mut rows = conn
        .query("SELECT COUNT(*) FROM sqlite_master WHERE type='table'", ())
        .await?;
    let tables = match rows.next().await? {
        Some(row) => row.get::<i64>(0)?,
        None => 0,
    };

    Ok(DbCounts {
        observations,
        session_summaries,
        user_prompts,
        tables,
    })
}

/// Compute the SHA-256 of a file as lowercase hex, streaming in 64 KiB
/// chunks on the blocking pool.
pub async fn hash_file(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    let digest = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 65536];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    })
    .await
    .map_err(|e| Error::Io(std::io::Error::other(e)))??;
    Ok(digest)
}

/// File size in bytes.
pub async fn file_size(path: &Path) -> Result<u64> {
    Ok(tokio::fs::metadata(path).await?.len())
}
