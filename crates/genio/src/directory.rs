use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::warn;

/// The two independent backend service types. Each has its own default relay
/// and its own preference slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum ServiceKind {
    /// Image generation
    Image,
    /// Video generation
    Video,
}

impl ServiceKind {
    /// Path segment used when building endpoints: `{base}/api/{kind}{path}`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One interchangeable backend relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayServer {
    pub id: String,
    pub base_url: String,
}

impl RelayServer {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
        }
    }
}

/// The reference deployment: ten interchangeable relays.
fn builtin_relays() -> Vec<RelayServer> {
    (1..=10)
        .map(|n| {
            RelayServer::new(
                format!("relay-{n:02}"),
                format!("https://relay-{n:02}.genio.app"),
            )
        })
        .collect()
}

const DEFAULT_IMAGE_RELAY: &str = "relay-01";
const DEFAULT_VIDEO_RELAY: &str = "relay-06";

/// Enumerates the fixed relay set and resolves the currently preferred one.
///
/// The preference map is the only mutable state shared between concurrent
/// dispatches; it is read-mostly and guarded by a `RwLock`.
pub struct ServerDirectory {
    servers: Vec<RelayServer>,
    defaults: HashMap<ServiceKind, String>,
    preferred: RwLock<HashMap<ServiceKind, String>>,
}

impl ServerDirectory {
    pub fn new() -> Self {
        let mut defaults = HashMap::new();
        defaults.insert(ServiceKind::Image, DEFAULT_IMAGE_RELAY.to_owned());
        defaults.insert(ServiceKind::Video, DEFAULT_VIDEO_RELAY.to_owned());
        Self {
            servers: builtin_relays(),
            defaults,
            preferred: RwLock::new(HashMap::new()),
        }
    }

    /// Directory over a custom relay set. `defaults` maps each service kind
    /// to the id of its default relay.
    pub fn with_servers(
        servers: Vec<RelayServer>,
        defaults: HashMap<ServiceKind, String>,
    ) -> Self {
        Self {
            servers,
            defaults,
            preferred: RwLock::new(HashMap::new()),
        }
    }

    fn by_id(&self, id: &str) -> Option<&RelayServer> {
        self.servers.iter().find(|s| s.id == id)
    }

    /// Pin the current relay for one service kind. Unknown ids are ignored
    /// so a stale preference cannot take the whole service down.
    pub fn prefer(&self, kind: ServiceKind, id: &str) {
        if self.by_id(id).is_none() {
            warn!(kind = %kind, relay = id, "ignoring preference for unknown relay");
            return;
        }
        self.preferred.write().insert(kind, id.to_owned());
    }

    /// Clear the preference so the kind falls back to its default relay.
    pub fn clear_preference(&self, kind: ServiceKind) {
        self.preferred.write().remove(&kind);
    }

    /// The relay all first-phase attempts target: the caller-set preference
    /// if any, otherwise the kind's fixed default.
    pub fn current(&self, kind: ServiceKind) -> RelayServer {
        let preferred = self.preferred.read().get(&kind).cloned();
        let id = preferred
            .or_else(|| self.defaults.get(&kind).cloned())
            .unwrap_or_else(|| self.servers[0].id.clone());
        self.by_id(&id)
            .cloned()
            .unwrap_or_else(|| self.servers[0].clone())
    }

    /// Every relay except `excluding`, in randomized order so overload does
    /// not concentrate on one fixed fallback across concurrent callers.
    pub fn alternates<R: Rng>(&self, excluding: &RelayServer, rng: &mut R) -> Vec<RelayServer> {
        let mut others: Vec<RelayServer> = self
            .servers
            .iter()
            .filter(|s| s.id != excluding.id)
            .cloned()
            .collect();
        others.shuffle(rng);
        others
    }

    pub fn servers(&self) -> &[RelayServer] {
        &self.servers
    }
}

impl Default for ServerDirectory {
    fn default() -> Self {
        Self::new()
    }
}
