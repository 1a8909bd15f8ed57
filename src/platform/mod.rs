//! Platform capability surface for push notifications.
//!
//! The lifecycle manager never talks to a concrete push stack. It drives a
//! [`PushPlatform`] (permission, registration, notifications) and the
//! [`TransportHandle`] that registration yields (readiness and the
//! subscription manager). Any binding that satisfies these traits works:
//!
//! ```text
//! PushPlatform (trait)
//!     │
//!     ├── FakePlatform   in-memory, scriptable failures (`test-util` feature)
//!     │
//!     └── NativePlatform file-backed keys and subscription (CLI)
//! ```
//!
//! Every async method is a suspension point on a single-threaded scheduler,
//! hence `?Send`.

#[cfg(any(test, feature = "test-util"))]
pub mod fake;
pub mod native;

use std::rc::Rc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(any(test, feature = "test-util"))]
pub use fake::{FakeHandle, FakePlatform};
pub use native::{NativeHandle, NativePlatform};

/// Notification permission as reported by the platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// User allowed notifications.
    Granted,
    /// User blocked notifications.
    Denied,
    /// User has not decided (prompt dismissed or never shown).
    #[default]
    Default,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Granted => write!(f, "granted"),
            Self::Denied => write!(f, "denied"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Encryption keys of a push subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    /// Client P-256 ECDH public key (base64url).
    pub p256dh: String,
    /// Shared auth secret (base64url).
    pub auth: String,
}

/// Push subscription issued by the platform.
///
/// Serializes to the same JSON a browser's `PushSubscription.toJSON()`
/// produces, which is what the server stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Push service endpoint URL.
    pub endpoint: String,
    /// Expiration time in epoch millis, if the push service set one.
    #[serde(default)]
    pub expiration_time: Option<i64>,
    /// Encryption keys.
    pub keys: SubscriptionKeys,
}

/// Options for a locally displayed notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NotificationOptions {
    /// Body text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Icon URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Replacement tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// A platform call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct PlatformError(pub String);

impl PlatformError {
    /// Error with a message.
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<anyhow::Error> for PlatformError {
    fn from(e: anyhow::Error) -> Self {
        Self(format!("{e:#}"))
    }
}

/// Push capability of the host platform.
#[async_trait(?Send)]
pub trait PushPlatform {
    /// Handle returned by [`PushPlatform::register_transport`].
    type Handle: TransportHandle;

    /// Whether both the push transport and a subscription manager exist.
    fn check_support(&self) -> bool;

    /// Current permission, without prompting.
    fn permission(&self) -> Permission;

    /// Ask the user for permission.
    async fn request_permission(&self) -> Result<Permission, PlatformError>;

    /// Register the transport, or return the existing registration.
    ///
    /// Must be idempotent.
    async fn register_transport(&self) -> Result<Rc<Self::Handle>, PlatformError>;

    /// Show a notification locally (test-notification path only).
    async fn show_notification(
        &self,
        title: &str,
        options: &NotificationOptions,
    ) -> Result<(), PlatformError>;
}

/// Registered transport and its subscription manager.
#[async_trait(?Send)]
pub trait TransportHandle {
    /// Suspend until the registration is active.
    async fn ready(&self) -> Result<(), PlatformError>;

    /// Existing subscription, if any.
    async fn get_subscription(&self) -> Result<Option<Subscription>, PlatformError>;

    /// Create a subscription bound to the server's public key.
    async fn subscribe(&self, application_server_key: &[u8])
        -> Result<Subscription, PlatformError>;

    /// Cancel `subscription`. `Ok(false)` if it was already gone.
    async fn unsubscribe(&self, subscription: &Subscription) -> Result<bool, PlatformError>;
}

/// Decode a URL-safe base64 server key into raw bytes.
///
/// Restores padding, maps `-`→`+` and `_`→`/`, then decodes as standard
/// base64.
pub fn decode_application_server_key(key: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let trimmed = key.trim();
    let padding = "=".repeat((4 - trimmed.len() % 4) % 4);
    let standard = format!("{trimmed}{padding}")
        .replace('-', "+")
        .replace('_', "/");
    BASE64.decode(standard)
}
