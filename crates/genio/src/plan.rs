//! Attempt plan construction.
//!
//! A plan is the ordered, de-duplicated sequence of (credential, server)
//! pairs one dispatch is allowed to try. It is built fresh per call and has
//! no identity beyond that call.

use std::collections::HashSet;

use rand::Rng;
use rand::seq::SliceRandom;

use crate::config::FailoverConfig;
use crate::credential::{Credential, CredentialSource, Provenance};
use crate::directory::{RelayServer, ServerDirectory, ServiceKind};
use crate::error::DispatchError;

/// How the plan is allowed to pick credentials.
#[derive(Debug, Clone)]
pub enum DispatchMode {
    /// Use exactly the caller-supplied credential. With `allow_fallback`,
    /// a bounded number of pool credentials are appended on the same server
    /// so a multi-step workflow survives one bad credential; without it the
    /// call is an exact probe and gets no substitutes.
    Strict {
        credential: Credential,
        allow_fallback: bool,
    },

    /// Full failover across the personal credential, the pool, and backup
    /// servers.
    Robust,
}

impl DispatchMode {
    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Strict { .. })
    }
}

/// One credential aimed at one server.
#[derive(Debug, Clone)]
pub struct AttemptPair {
    pub credential: Credential,
    pub server: RelayServer,
}

/// Ordered attempt sequence. Guaranteed non-empty and free of duplicate
/// (credential, server) combinations.
#[derive(Debug)]
pub struct AttemptPlan {
    pairs: Vec<AttemptPair>,
}

impl AttemptPlan {
    #[cfg(test)]
    pub(crate) fn from_pairs(pairs: Vec<AttemptPair>) -> Self {
        Self { pairs }
    }

    pub fn pairs(&self) -> &[AttemptPair] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

struct PlanAccumulator {
    pairs: Vec<AttemptPair>,
    seen: HashSet<(String, String)>,
}

impl PlanAccumulator {
    fn new() -> Self {
        Self {
            pairs: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Appends unless the (fingerprint, server) combination is already
    /// planned. Duplicates are skipped silently.
    fn push(&mut self, credential: Credential, server: &RelayServer) {
        let key = (credential.fingerprint(), server.id.clone());
        if self.seen.insert(key) {
            self.pairs.push(AttemptPair {
                credential,
                server: server.clone(),
            });
        }
    }
}

/// Build the attempt sequence for one dispatch.
///
/// Strict mode emits the supplied credential against the current server,
/// optionally followed by pool fallbacks on that same server. Robust mode
/// runs two phases: the current server first (personal credential, then a
/// shuffled sample of the freshest pool credentials), then a few randomly
/// chosen backup servers with a reduced version of the same ordering.
pub fn build_plan<R: Rng>(
    mode: &DispatchMode,
    source: &dyn CredentialSource,
    directory: &ServerDirectory,
    kind: ServiceKind,
    config: &FailoverConfig,
    rng: &mut R,
) -> Result<AttemptPlan, DispatchError> {
    let current = directory.current(kind);
    let mut acc = PlanAccumulator::new();

    match mode {
        DispatchMode::Strict {
            credential,
            allow_fallback,
        } => {
            acc.push(credential.clone().with_provenance(Provenance::Specific), &current);
            if *allow_fallback {
                for cred in source.pool().into_iter().take(config.strict_pool_fallback) {
                    acc.push(cred, &current);
                }
            }
        }
        DispatchMode::Robust => {
            let personal = source.personal();
            let pool = source.pool();

            // Phase 1: current server. The pool sample is shuffled so
            // concurrent callers do not all hammer the same first token.
            if let Some(cred) = &personal {
                acc.push(cred.clone(), &current);
            }
            for cred in sampled(&pool, config.primary_pool_sample, rng) {
                acc.push(cred, &current);
            }

            // Phase 2: backup servers, smaller pool sample each. Recovers
            // from server-level outages without multiplying the attempt
            // count combinatorially.
            let backups = directory.alternates(&current, rng);
            for backup in backups.iter().take(config.backup_server_count) {
                if let Some(cred) = &personal {
                    acc.push(cred.clone(), backup);
                }
                for cred in sampled(&pool, config.backup_pool_sample, rng) {
                    acc.push(cred, backup);
                }
            }
        }
    }

    if acc.pairs.is_empty() {
        return Err(DispatchError::NoCredentials);
    }
    Ok(AttemptPlan { pairs: acc.pairs })
}

/// The freshest `count` pool credentials, in shuffled order.
fn sampled<R: Rng>(pool: &[Credential], count: usize, rng: &mut R) -> Vec<Credential> {
    let mut sample: Vec<Credential> = pool.iter().take(count).cloned().collect();
    sample.shuffle(rng);
    sample
}
