//! Encrypted vault synchronization for GenPwd.
//!
//! Ties the envelope crypto of `genpwd-crypto` to the providers of
//! `genpwd-cloud`:
//!
//! - [`VaultSyncManager`] runs one sync cycle per vault at a time and
//!   returns conflicts instead of guessing
//! - [`ConflictResolver`] applies an explicit [`ResolutionStrategy`]
//! - [`HistoryStore`] keeps an append-only record of every cycle, conflict
//!   and archived losing version
//! - [`AutoSyncScheduler`] runs syncs in the background when its
//!   constraint allows

pub mod config;
pub mod conflict;
pub mod error;
pub mod history;
pub mod manager;
pub mod repository;
pub mod scheduler;
pub mod status;

pub use config::{SchedulerConfig, SyncConfig};
pub use conflict::{ConflictResolver, ConflictSide, Resolution, ResolutionStrategy};
pub use error::{SyncError, SyncResult};
pub use history::{
    ArchiveReason, ArchivedVersion, ConflictRecord, EnvelopeSummary, HistoryOutcome,
    HistoryStore, MemoryHistoryStore, SqliteHistoryStore, SyncHistoryEntry,
};
pub use manager::{SyncOutcome, VaultSyncManager};
pub use repository::VaultRepository;
pub use scheduler::{
    AutoSyncScheduler, NetworkConnected, NetworkMonitor, NetworkState, NoConstraint, Predicate,
    SchedulerEvent, SyncConstraint, SyncCredentials, UnmeteredNetworkOnly,
};
pub use status::{SyncPhase, SyncStatus, SyncStatusBoard};
