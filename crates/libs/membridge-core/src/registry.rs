//! Agent-local project registry.
//!
//! Each agent persists the projects it has seen as a single JSON mapping
//! keyed by canonical id. The file is the agent's source for heartbeat
//! payloads and the `/projects` endpoint; it survives restarts.

use crate::error::Result;
use crate::identity::canonical_project_id;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One known project on this agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectEntry {
    pub project_id: String,
    pub canonical_id: String,
    pub created_at: String,
    pub last_seen: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obs_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
}

/// Persistent mapping of canonical id to [`ProjectEntry`].
#[derive(Debug)]
pub struct ProjectRegistry {
    path: PathBuf,
    entries: HashMap<String, ProjectEntry>,
}

impl ProjectRegistry {
    /// Load the registry from `path`, starting empty when the file does
    /// not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, entries })
    }

    pub fn file_path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, canonical_id: &str) -> Option<&ProjectEntry> {
        self.entries.get(canonical_id)
    }

    /// Register a project by name, creating the entry or refreshing
    /// `last_seen` and the optional fields. Persists immediately.
    pub fn register(
        &mut self,
        project_id: &str,
        path: Option<String>,
        repo_url: Option<String>,
        notes: Option<String>,
    ) -> Result<ProjectEntry> {
        let canonical_id = canonical_project_id(project_id);
        let now = Utc::now().to_rfc3339();
        let entry = self
            .entries
            .entry(canonical_id.clone())
            .and_modify(|e| {
                e.last_seen = now.clone();
                if path.is_some() {
                    e.path = path.clone();
                }
                if repo_url.is_some() {
                    e.repo_url = repo_url.clone();
                }
                if notes.is_some() {
                    e.notes = notes.clone();
                }
            })
            .or_insert_with(|| ProjectEntry {
                project_id: project_id.to_string(),
                canonical_id: canonical_id.clone(),
                created_at: now.clone(),
                last_seen: now,
                path,
                notes,
                obs_count: None,
                db_sha: None,
                repo_url,
            })
            .clone();
        self.save()?;
        Ok(entry)
    }

    /// Refresh a project's sync observations after a push or pull.
    pub fn touch(
        &mut self,
        canonical_id: &str,
        obs_count: Option<i64>,
        db_sha: Option<String>,
    ) -> Result<()> {
        if let Some(entry) = self.entries.get_mut(canonical_id) {
            entry.last_seen = Utc::now().to_rfc3339();
            if obs_count.is_some() {
                entry.obs_count = obs_count;
            }
            if db_sha.is_some() {
                entry.db_sha = db_sha;
            }
            self.save()?;
        }
        Ok(())
    }

    /// All entries, ordered by project name for stable presentation.
    pub fn list(&self) -> Vec<ProjectEntry> {
        let mut entries: Vec<ProjectEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.project_id.cmp(&b.project_id));
        entries
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_vec_pretty(&self.entries)?;
        std::fs::write(&self.path, body)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let reg = ProjectRegistry::open(dir.path().join("projects.json")).unwrap();
        assert!(reg.is_empty());
    }

    #[test]
    fn test_register_creates_entry_with_canonical_id() {
        let dir = TempDir::new().unwrap();
        let mut reg = ProjectRegistry::open(dir.path().join("projects.json")).unwrap();

        let entry = reg
            .register("garden-seedling", Some("/srv/garden".into()), None, None)
            .unwrap();

        assert_eq!(entry.canonical_id, "aeeafec3a5b5710f");
        assert_eq!(entry.path.as_deref(), Some("/srv/garden"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_register_twice_updates_last_seen_not_created_at() {
        let dir = TempDir::new().unwrap();
        let mut reg = ProjectRegistry::open(dir.path().join("projects.json")).unwrap();

        let first = reg.register("demo", None, None, None).unwrap();
        let second = reg
            .register("demo", None, Some("https://example.com/demo.git".into()), None)
            .unwrap();

        assert_eq!(reg.len(), 1);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(
            second.repo_url.as_deref(),
            Some("https://example.com/demo.git")
        );
    }

    #[test]
    fn test_registry_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("projects.json");
        {
            let mut reg = ProjectRegistry::open(&path).unwrap();
            reg.register("alpha", None, None, None).unwrap();
            reg.touch("8ed3f6ad685b959e", Some(42), Some("deadbeef".into()))
                .unwrap();
        }

        let reg = ProjectRegistry::open(&path).unwrap();
        let entry = reg.get("8ed3f6ad685b959e").unwrap();
        assert_eq!(entry.project_id, "alpha");
        assert_eq!(entry.obs_count, Some(42));
        assert_eq!(entry.db_sha.as_deref(), Some("deadbeef"));
    }

    #[test]
    fn test_list_is_sorted_by_project_name() {
        let dir = TempDir::new().unwrap();
        let mut reg = ProjectRegistry::open(dir.path().join("projects.json")).unwrap();
        reg.register("zulu", None, None, None).unwrap();
        reg.register("alpha", None, None, None).unwrap();

        let names: Vec<String> = reg.list().into_iter().map(|e| e.project_id).collect();
        assert_eq!(names, vec!["alpha", "zulu"]);
    }
}
