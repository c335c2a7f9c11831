use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Where a credential came from. Provenance drives attempt ordering and log
/// labels, never the request itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Supplied explicitly by the caller for this dispatch.
    Specific,
    /// The current user's own credential.
    Personal,
    /// Drawn from the shared session pool.
    Pool,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Specific => "specific",
            Self::Personal => "personal",
            Self::Pool => "pool",
        };
        f.write_str(label)
    }
}

/// An opaque bearer token plus its provenance. Immutable for the duration of
/// one dispatch.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    pub provenance: Provenance,
}

impl Credential {
    pub fn new(token: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            token: token.into(),
            provenance,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Stable identity used to deduplicate attempts. Derived from the token
    /// so two copies of the same token collapse regardless of provenance.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.token.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Short tail of the token, safe to put in log lines.
    pub fn suffix(&self) -> String {
        let chars: Vec<char> = self.token.chars().collect();
        let start = chars.len().saturating_sub(6);
        chars[start..].iter().collect()
    }

    /// Same token, re-tagged. Used when an explicit caller credential enters
    /// a plan as `Specific`.
    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }
}

// The token must never reach logs in full, so Debug only shows the tail.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(..{}, {})", self.suffix(), self.provenance)
    }
}

/// Read-only access to the locally cached credentials.
///
/// Implementations must be infallible from the caller's point of view: a
/// corrupt or missing store degrades to an empty result.
pub trait CredentialSource: Send + Sync {
    /// The current user's personal credential, if one is cached.
    fn personal(&self) -> Option<Credential>;

    /// Eligible pool credentials, newest first. Implementations cap the
    /// result to the freshest entries; older ones are presumed stale.
    fn pool(&self) -> Vec<Credential>;
}

#[derive(Debug, Deserialize)]
struct CacheDocument {
    #[serde(default)]
    user: Option<CachedUser>,
    #[serde(default)]
    pool: Vec<CachedPoolEntry>,
}

#[derive(Debug, Deserialize)]
struct CachedUser {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CachedPoolEntry {
    token: String,
    #[serde(default)]
    created_at: Option<String>,
}

/// File-backed credential source reading the JSON cache written by the
/// session layer:
///
/// ```json
/// {
///   "user": { "token": "..." },
///   "pool": [ { "token": "...", "created_at": "2026-01-01T00:00:00Z" } ]
/// }
/// ```
pub struct CredentialCache {
    path: PathBuf,
    eligible_window: usize,
}

impl CredentialCache {
    pub fn new(path: impl Into<PathBuf>, eligible_window: usize) -> Self {
        Self {
            path: path.into(),
            eligible_window,
        }
    }

    fn read_document(&self) -> Option<CacheDocument> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "credential cache not readable");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(doc) => Some(doc),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "credential cache not parseable");
                None
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialSource for CredentialCache {
    fn personal(&self) -> Option<Credential> {
        let token = self.read_document()?.user?.token?;
        if token.is_empty() {
            return None;
        }
        Some(Credential::new(token, Provenance::Personal))
    }

    fn pool(&self) -> Vec<Credential> {
        let Some(doc) = self.read_document() else {
            return Vec::new();
        };

        let mut entries: Vec<(Option<chrono::DateTime<chrono::FixedOffset>>, String)> = doc
            .pool
            .into_iter()
            .filter(|entry| !entry.token.is_empty())
            .map(|entry| {
                // Unparseable timestamps sort as oldest rather than poisoning
                // the whole cache.
                let created = entry
                    .created_at
                    .as_deref()
                    .and_then(|ts| chrono::DateTime::parse_from_rfc3339(ts).ok());
                (created, entry.token)
            })
            .collect();

        entries.sort_by(|a, b| b.0.cmp(&a.0));
        entries.truncate(self.eligible_window);
        entries
            .into_iter()
            .map(|(_, token)| Credential::new(token, Provenance::Pool))
            .collect()
    }
}
