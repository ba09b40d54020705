//! Conflict detection and resolution between a local and a remote envelope.
//!
//! Two envelopes conflict when their content hashes differ. Resolution
//! never merges: one side wins as a whole and the other is handed back so
//! the caller can archive it before replacing anything.

use crate::error::{SyncError, SyncResult};
use genpwd_crypto::VaultEnvelope;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How to pick a winner between two diverged vault versions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionStrategy {
    LocalWins,
    RemoteWins,
    /// Last write wins on the envelope timestamp.
    NewestWins,
    /// Stop and let a person decide.
    Manual,
    /// Planned entry-level merge. Always fails.
    SmartMerge,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::LocalWins => "LOCAL_WINS",
            ResolutionStrategy::RemoteWins => "REMOTE_WINS",
            ResolutionStrategy::NewestWins => "NEWEST_WINS",
            ResolutionStrategy::Manual => "MANUAL",
            ResolutionStrategy::SmartMerge => "SMART_MERGE",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            ResolutionStrategy::LocalWins,
            ResolutionStrategy::RemoteWins,
            ResolutionStrategy::NewestWins,
            ResolutionStrategy::Manual,
            ResolutionStrategy::SmartMerge,
        ]
        .into_iter()
        .find(|strategy| strategy.as_str() == s)
        .ok_or_else(|| format!("unknown resolution strategy: {s}"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictSide {
    Local,
    Remote,
}

impl ConflictSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictSide::Local => "LOCAL",
            ConflictSide::Remote => "REMOTE",
        }
    }
}

/// Outcome of [`ConflictResolver::resolve`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Resolved {
        winner: ConflictSide,
        winning: VaultEnvelope,
        /// Must be archived before the winner replaces it.
        losing: VaultEnvelope,
    },
    /// `MANUAL`: nothing was decided.
    Pending,
}

/// Stateless conflict policy.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn has_conflict(&self, local: &VaultEnvelope, remote: &VaultEnvelope) -> bool {
        !local.same_content(remote)
    }

    pub fn suggest_strategy(
        &self,
        _local: &VaultEnvelope,
        _remote: &VaultEnvelope,
    ) -> ResolutionStrategy {
        ResolutionStrategy::NewestWins
    }

    pub fn resolve(
        &self,
        local: &VaultEnvelope,
        remote: &VaultEnvelope,
        strategy: ResolutionStrategy,
    ) -> SyncResult<Resolution> {
        let winner = match strategy {
            ResolutionStrategy::LocalWins => ConflictSide::Local,
            ResolutionStrategy::RemoteWins => ConflictSide::Remote,
            ResolutionStrategy::NewestWins => newest(local, remote),
            ResolutionStrategy::Manual => return Ok(Resolution::Pending),
            ResolutionStrategy::SmartMerge => {
                return Err(SyncError::UnsupportedStrategy(strategy));
            }
        };

        let (winning, losing) = match winner {
            ConflictSide::Local => (local.clone(), remote.clone()),
            ConflictSide::Remote => (remote.clone(), local.clone()),
        };
        Ok(Resolution::Resolved {
            winner,
            winning,
            losing,
        })
    }
}

/// Later timestamp wins. Equal timestamps fall back to the greater device
/// id, then the greater content hash, so both devices pick the same side.
fn newest(local: &VaultEnvelope, remote: &VaultEnvelope) -> ConflictSide {
    let key = |e: &VaultEnvelope| (e.timestamp(), e.device_id().to_owned(), e.content_hash().to_owned());
    if key(remote) > key(local) {
        ConflictSide::Remote
    } else {
        ConflictSide::Local
    }
}
