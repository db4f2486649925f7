//! Cache fingerprints.
//!
//! A fingerprint is a SHA-256 digest over the canonical descriptor JSON, the
//! resolved source table, and the catalog's data version. Because the
//! descriptor is canonical, filter order and `IN`-list order cannot produce
//! distinct fingerprints for the same query, and because the data version is
//! folded in, rebuilding the dataset implicitly invalidates every prior
//! entry.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::descriptor::QueryDescriptor;

/// Hex-encoded SHA-256 digest identifying one cacheable query result.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of a canonical descriptor routed to `source`
    /// at catalog version `data_version`.
    pub fn compute(desc: &QueryDescriptor, source: &str, data_version: u64) -> Self {
        // Serialization of a canonical descriptor is deterministic: struct
        // fields serialize in declaration order and all collections are
        // already canonically sorted.
        let body = serde_json::to_string(desc).unwrap_or_else(|e| {
            tracing::warn!("descriptor serialization failed, degrading fingerprint: {e}");
            format!("{desc:?}")
        });

        let mut hasher = Sha256::new();
        hasher.update(body.as_bytes());
        hasher.update(b"\n");
        hasher.update(source.as_bytes());
        hasher.update(b"\n");
        hasher.update(data_version.to_le_bytes());
        Self(hex_encode(&hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}
