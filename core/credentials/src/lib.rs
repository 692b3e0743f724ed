//! Credential layer for drivelink.
//!
//! Stores one encrypted record per connected drive account and keeps its
//! access token usable:
//! - [`store`]: durable records (in-memory and SQLite)
//! - [`state_cache`]: one-time OAuth state tokens
//! - [`lifecycle`]: decrypt, check, refresh and persist access tokens
//! - [`connect`]: the connect and disconnect flow

pub mod connect;
pub mod lifecycle;
pub mod record;
pub mod sqlite;
pub mod state_cache;
pub mod store;

pub use connect::{ConnectService, OAUTH_STATE_TTL};
pub use lifecycle::{plan, LifecycleConfig, TokenLifecycleManager, TokenPlan};
pub use record::{CredentialRecord, HealthStatus, TokenUpdate};
pub use sqlite::SqliteCredentialStore;
pub use state_cache::{EphemeralStateCache, MemoryStateBackend, StateBackend};
pub use store::{CredentialStore, MemoryCredentialStore};
