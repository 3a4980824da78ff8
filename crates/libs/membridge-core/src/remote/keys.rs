//! Object-store key layout.
//!
//! The layout is compatibility-critical; every key is rooted at
//! `projects/{canonical_id}/`:
//!
//! ```text
//! projects/{canonical_id}/
//!   sqlite/claude-mem.db                — snapshot bytes
//!   sqlite/claude-mem.db.sha256         — "{hexhash}  claude-mem.db\n"
//!   sqlite/manifest.json                — UTF-8 JSON, indent=2
//!   locks/active.lock                   — UTF-8 JSON, indent=2
//!   leadership/lease.json               — UTF-8 JSON, indent=2
//!   leadership/audit/{ts}-{node}.json   — UTF-8 JSON, indent=2
//! ```

use chrono::{DateTime, Utc};

/// File name of the snapshot object (and of the local database it mirrors).
pub const SNAPSHOT_FILE: &str = "claude-mem.db";

pub fn sqlite_prefix(canonical_id: &str) -> String {
    format!("projects/{canonical_id}/sqlite")
}

pub fn snapshot_key(canonical_id: &str) -> String {
    format!("projects/{canonical_id}/sqlite/{SNAPSHOT_FILE}")
}

pub fn sha256_key(canonical_id: &str) -> String {
    format!("projects/{canonical_id}/sqlite/{SNAPSHOT_FILE}.sha256")
}

pub fn manifest_key(canonical_id: &str) -> String {
    format!("projects/{canonical_id}/sqlite/manifest.json")
}

pub fn lock_key(canonical_id: &str) -> String {
    format!("projects/{canonical_id}/locks/active.lock")
}

pub fn lease_key(canonical_id: &str) -> String {
    format!("projects/{canonical_id}/leadership/lease.json")
}

/// Audit entries are separate objects so the log is append-only.
/// Path separators and colons in node ids are flattened to keep keys safe.
pub fn audit_key(canonical_id: &str, node_id: &str, at: DateTime<Utc>) -> String {
    let ts = at.format("%Y%m%dT%H%M%SZ");
    let safe_node = node_id.replace(['/', ':'], "_");
    format!("projects/{canonical_id}/leadership/audit/{ts}-{safe_node}.json")
}

/// The first whitespace-separated token of the `.sha256` object is the
/// authoritative hash.
pub fn parse_sha256_object(text: &str) -> Option<String> {
    text.split_whitespace().next().map(str::to_string)
}

/// Render the `.sha256` object body for a snapshot hash.
pub fn render_sha256_object(sha256: &str) -> String {
    format!("{sha256}  {SNAPSHOT_FILE}\n")
}
