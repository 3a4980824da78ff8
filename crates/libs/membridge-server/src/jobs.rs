//! Persistent sync-job history.
//!
//! One row per push/pull dispatch, stored in a local libsql database with
//! the schema initialized on first open. The stdout/stderr columns hold
//! tails, not full output.

use crate::error::Result;
use chrono::Utc;
use libsql::Builder;
use serde::Serialize;
use std::path::Path;
use utoipa::ToSchema;

/// Cap on the stored stdout/stderr tails, in lines.
pub const MAX_OUTPUT_LINES: usize = 200;

/// One dispatched sync job.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Job {
    pub id: String,
    pub action: String,
    pub project: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub canonical_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returncode: Option<i32>,
    pub created_at: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Keep at most the last [`MAX_OUTPUT_LINES`] lines, with a truncation
/// marker in front when lines were dropped.
pub fn tail_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= max_lines {
        return text.to_string();
    }
    let truncated = lines.len() - max_lines;
    let mut out = vec![format!("... ({truncated} lines truncated)")];
    out.extend(lines[truncated..].iter().map(|s| (*s).to_string()));
    out.join("\n")
}

/// Job-history store backed by `{data_dir}/jobs.db`.
#[derive(Clone)]
pub struct JobStore {
    conn: libsql::Connection,
}

impl JobStore {
    /// Open (or create) the store and apply the schema.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db = Builder::new_local(data_dir.join("jobs.db")).build().await?;
        let conn = db.connect()?;

        let _ = conn.execute("PRAGMA journal_mode=WAL;", ()).await;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                action TEXT NOT NULL,
                project TEXT NOT NULL,
                agent TEXT,
                canonical_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                detail TEXT,
                stdout TEXT,
                stderr TEXT,
                returncode INTEGER,
                created_at REAL NOT NULL,
                finished_at REAL,
                request_id TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_project ON jobs(project);
            CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs(created_at DESC);",
        )
        .await?;

        Ok(Self { conn })
    }

    pub async fn create_job(
        &self,
        action: &str,
        project: &str,
        canonical_id: &str,
        agent: Option<&str>,
        request_id: Option<&str>,
    ) -> Result<Job> {
        let job = Job {
            id: uuid::Uuid::new_v4().simple().to_string()[..16].to_string(),
            action: action.to_string(),
            project: project.to_string(),
            agent: agent.map(str::to_string),
            canonical_id: canonical_id.to_string(),
            status: "pending".to_string(),
            detail: None,
            stdout: None,
            stderr: None,
            returncode: None,
            created_at: Utc::now().timestamp_millis() as f64 / 1000.0,
            finished_at: None,
            request_id: request_id.map(str::to_string),
        };
        self.conn
            .execute(
                "INSERT INTO jobs (id, action, project, agent, canonical_id, status, created_at, request_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                libsql::params![
                    job.id.clone(),
                    job.action.clone(),
                    job.project.clone(),
                    job.agent.clone(),
                    job.canonical_id.clone(),
                    job.status.clone(),
                    job.created_at,
                    job.request_id.clone(),
                ],
            )
            .await?;
        Ok(job)
    }

    pub async fn finish_job(
        &self,
        job_id: &str,
        status: &str,
        detail: Option<&str>,
        stdout: Option<&str>,
        stderr: Option<&str>,
        returncode: Option<i32>,
    ) -> Result<()> {
        let stdout = stdout.map(|s| tail_lines(s, MAX_OUTPUT_LINES));
        let stderr = stderr.map(|s| tail_lines(s, MAX_OUTPUT_LINES));
        self.conn
            .execute(
                "UPDATE jobs SET status=?1, detail=?2, stdout=?3, stderr=?4, returncode=?5, finished_at=?6
                 WHERE id=?7",
                libsql::params![
                    status,
                    detail,
                    stdout,
                    stderr,
                    returncode.map(i64::from),
                    Utc::now().timestamp_millis() as f64 / 1000.0,
                    job_id,
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let mut rows = self
            .conn
            .query("SELECT * FROM jobs WHERE id=?1", libsql::params![job_id])
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_jobs(&self, limit: i64, project: Option<&str>) -> Result<Vec<Job>> {
        let mut rows = match project {
            Some(project) => {
                self.conn
                    .query(
                        "SELECT * FROM jobs WHERE project=?1 ORDER BY created_at DESC LIMIT ?2",
                        libsql::params![project, limit],
                    )
                    .await?
            }
            None => {
                self.conn
                    .query(
                        "SELECT * FROM jobs ORDER BY created_at DESC LIMIT ?1",
                        libsql::params![limit],
                    )
                    .await?
            }
        };

        let mut jobs = Vec::new();
        while let Some(row) = rows.next().await? {
            jobs.push(row_to_job(&row)?);
        }
        Ok(jobs)
    }
}

fn row_to_job(row: &libsql::Row) -> Result<Job> {
    Ok(Job {
        id: row.get::<String>(0)?,
        action: row.get::<String>(1)?,
        project: row.get::<String>(2)?,
        agent: row.get::<Option<String>>(3)?,
        canonical_id: row.get::<String>(4)?,
        status: row.get::<String>(5)?,
        detail: row.get::<Option<String>>(6)?,
        stdout: row.get::<Option<String>>(7)?,
        stderr: row.get::<Option<String>>(8)?,
        returncode: row.get::<Option<i64>>(9)?.map(|c| c as i32),
        created_at: row.get::<f64>(10)?,
        finished_at: row.get::<Option<f64>>(11)?,
        request_id: row.get::<Option<String>>(12)?,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_and_finish_job() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).await.unwrap();

        let job = store
            .create_job("push", "demo", "2a97516c354b6884", Some("rpi4b"), Some("req-1"))
            .await
            .unwrap();
        assert_eq!(job.id.len(), 16);
        assert_eq!(job.status, "pending");

        store
            .finish_job(&job.id, "completed", Some("uploaded"), None, None, Some(0))
            .await
            .unwrap();

        let fetched = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, "completed");
        assert_eq!(fetched.detail.as_deref(), Some("uploaded"));
        assert_eq!(fetched.returncode, Some(0));
        assert!(fetched.finished_at.is_some());
        assert_eq!(fetched.request_id.as_deref(), Some("req-1"));
    }

    #[tokio::test]
    async fn test_list_jobs_filters_by_project_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).await.unwrap();

        store.create_job("push", "alpha", "cid-a", None, None).await.unwrap();
        store.create_job("pull", "beta", "cid-b", None, None).await.unwrap();
        store.create_job("pull", "alpha", "cid-a", None, None).await.unwrap();

        let all = store.list_jobs(50, None).await.unwrap();
        assert_eq!(all.len(), 3);

        let alpha = store.list_jobs(50, Some("alpha")).await.unwrap();
        assert_eq!(alpha.len(), 2);
        assert!(alpha.iter().all(|j| j.project == "alpha"));
    }

    #[tokio::test]
    async fn test_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let id = {
            let store = JobStore::open(dir.path()).await.unwrap();
            store
                .create_job("push", "demo", "cid", None, None)
                .await
                .unwrap()
                .id
        };
        let store = JobStore::open(dir.path()).await.unwrap();
        assert!(store.get_job(&id).await.unwrap().is_some());
    }

    #[test]
    fn test_tail_lines_truncates_with_marker() {
        let text = (0..10).map(|i| format!("line-{i}")).collect::<Vec<_>>().join("\n");
        let tail = tail_lines(&text, 3);
        assert!(tail.starts_with("... (7 lines truncated)"));
        assert!(tail.ends_with("line-9"));

        assert_eq!(tail_lines("short", 3), "short");
    }
}
