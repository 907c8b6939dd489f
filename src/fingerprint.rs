use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;
use uuid::Uuid;

/// Namespace for fingerprint UUIDs; fixed so fingerprints stay stable
/// across processes and restarts.
const FINGERPRINT_NAMESPACE: Uuid = Uuid::from_bytes([
    0x8f, 0x1c, 0x52, 0xee, 0x3a, 0x0b, 0x4d, 0x9a, 0xb2, 0x6e, 0x41, 0x7f, 0x09, 0xc4, 0xd1, 0x35,
]);

/// Deterministic identity of a content item, used for deduplication.
///
/// Derived from the source-provided unique ID when the adapter supplies
/// one, otherwise from the normalized URL plus title. The same logical
/// item re-collected later always maps to the same fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(Uuid);

impl Fingerprint {
    /// Compute the fingerprint for a candidate item.
    pub fn derive(source_id: &str, external_id: Option<&str>, url: &str, title: &str) -> Self {
        let material = match external_id {
            Some(ext) if !ext.is_empty() => format!("{}|{}", source_id, ext),
            _ => format!("{}|{}", normalize_url(url), title.trim()),
        };
        Fingerprint(Uuid::new_v5(&FINGERPRINT_NAMESPACE, material.as_bytes()))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Fingerprint(id)
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Fingerprint)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Normalize a URL for identity purposes: lowercase scheme and host, drop
/// the fragment, tracking query parameters, and any trailing slash.
pub fn normalize_url(raw: &str) -> String {
    let mut parsed = match Url::parse(raw.trim()) {
        Ok(u) => u,
        // Unparseable URLs still dedupe on their trimmed text.
        Err(_) => return raw.trim().to_string(),
    };

    parsed.set_fragment(None);

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    parsed.set_query(None);
    if !kept.is_empty() {
        // Re-serialize through the crate so decoded values are re-encoded;
        // a literal '&' or '=' inside a value must not reshape the query.
        let mut pairs = parsed.query_pairs_mut();
        for (key, value) in &kept {
            pairs.append_pair(key, value);
        }
    }

    let mut normalized = parsed.to_string();
    while normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || matches!(key, "fbclid" | "gclid" | "ref" | "source")
}
