//! Task deduplication keys.

use sha2::{Digest, Sha256};

/// Returns the dedupe key for a task: hex SHA-256 over the kind, a NUL
/// separator, and the payload's JSON text.
///
/// `serde_json` keeps object keys sorted, so equal payloads always produce
/// the same text.
#[must_use]
pub fn dedupe_key(kind: &str, payload: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update([0u8]);
    hasher.update(payload.to_string().as_bytes());
    let hash = hasher.finalize();

    let mut out = String::with_capacity(64);
    for byte in hash {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
