//! Push Identity - anonymous device identity and push-notification targeting.
//!
//! This crate lets a client receive targeted notifications without an
//! account: it derives a stable pseudonymous device id, manages the push
//! subscription lifecycle against a platform binding, and keeps the user's
//! notification preferences in sync with a server keyed by that id.
//!
//! # Architecture
//!
//! - **Identity** - fingerprint-seeded device id, persisted once
//! - **Preferences** - immutable preference snapshots with validation
//! - **Lifecycle** - state machine driving permission, subscription, sync
//! - **Platform** - capability traits for the host push stack
//! - **Sync** - HTTP client for the notification API
//!
//! Everything runs on a single-threaded async runtime; shared state uses
//! `Rc` and `RefCell`.
//!
//! # Modules
//!
//! - [`fingerprint`] - Device signal collection and hashing
//! - [`identity`] - Device id minting and persistence
//! - [`preferences`] - Preference model and local store
//! - [`lifecycle`] - Subscription manager
//! - [`platform`] - Push platform traits and bindings
//! - [`sync`] - Remote store and HTTP client
//! - [`config`] - Configuration loading/saving

pub mod config;
pub mod constants;
pub mod env;
pub mod error;
pub mod fingerprint;
pub mod identity;
pub mod lifecycle;
pub mod platform;
pub mod preferences;
pub mod storage;
pub mod sync;

// Re-export commonly used types
pub use config::Config;
pub use error::{NotifyError, StorageError, SyncError, ValidationError};
pub use identity::{DeviceIdentityStore, Identity};
pub use lifecycle::{SubscribeOutcome, SubscriptionManager, SubscriptionState, UnsubscribeOutcome};
pub use preferences::{Mode, NotificationPreferences, PreferenceStore, Schedule};
pub use storage::{FileStore, KeyValueStore, MemoryStore, SharedStore};
pub use sync::{RemoteStore, SyncClient};
