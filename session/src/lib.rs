//! # Tally Session
//!
//! Single-flight sync sessions against an external system of record.
//!
//! A [`SyncManager`] starts a remote sync, polls it with retry and
//! backoff, reconciles the result with the [`tally_engine`] and holds the
//! session in `conflict` until every conflict is resolved. Observers follow
//! along through progress snapshots.
//!
//! ## Seams
//!
//! - [`RemoteSyncApi`]: the external system (HTTP in the server crate)
//! - [`PropertyStore`]: where committed records are written through
//!   ([`MemoryStore`] ships here)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! let manager = SyncManager::new(remote, store, SessionConfig::default());
//!
//! let handle = manager.start_sync(SyncOptions::default()).await?;
//! let session = manager.wait_until_settled(handle).await?;
//!
//! if session.status == SessionStatus::Conflict {
//!     manager.set_resolution_for_all(handle.id, ResolutionKind::Merge, false).await?;
//!     let result = manager.finalize(handle.id).await?;
//! }
//! ```

pub mod config;
pub mod error;
pub mod manager;
pub mod progress;
pub mod remote;
pub mod retry;
pub mod session;
pub mod store;

pub use config::SessionConfig;
pub use error::{Result, SyncError};
pub use manager::SyncManager;
pub use progress::Subscription;
pub use remote::{
    RemoteConflict, RemoteError, RemoteReport, RemoteState, RemoteStatus, RemoteSyncApi,
    ReportOptions, SyncOptions,
};
pub use retry::RetryPolicy;
pub use session::{
    SessionError, SessionHandle, SessionSnapshot, SessionStatus, SyncSession,
};
pub use store::{validate_writes, MemoryStore, Placement, PropertyStore, StoreError, StoreWrite};

/// Identifier of a sync session
pub type SessionId = uuid::Uuid;
