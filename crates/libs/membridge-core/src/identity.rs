//! Canonical project identity.
//!
//! A project is identified by a human name; its canonical identifier is the
//! first 16 hex characters of the SHA-256 of that name. All object-store keys
//! for a project are rooted at `projects/{canonical_id}/`. The identifier is
//! purely derived, so renaming a project means creating a new one.

use sha2::{Digest, Sha256};

/// Length of a canonical project identifier in hex characters.
pub const CANONICAL_ID_LEN: usize = 16;

/// Derive the canonical identifier for a project name.
pub fn canonical_project_id(project_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(project_name.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..CANONICAL_ID_LEN].to_string()
}

/// Compute the full SHA-256 of a byte slice as lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
