//! Error types for push-identity.
//!
//! [`NotifyError`] is the taxonomy surfaced to callers of the lifecycle
//! manager:
//!
//! - [`NotifyError::Unsupported`] - platform lacks push capability (terminal)
//! - [`NotifyError::PermissionDenied`] - user has not granted permission (recoverable)
//! - [`NotifyError::Transport`] - registration/readiness/subscribe failed (retry)
//! - [`NotifyError::Sync`] - remote push/fetch/delete failed (local state kept)
//! - [`NotifyError::Validation`] - input rejected locally, never reaches the network
//!
//! Lower-level errors ([`SyncError`], [`StorageError`], [`ValidationError`])
//! are typed so the layers above can decide how to degrade.

use thiserror::Error;

/// Result type alias for lifecycle operations.
pub type Result<T> = std::result::Result<T, NotifyError>;

/// Message shown for failures the user can only retry.
const RETRY_MESSAGE: &str = "Something went wrong while setting up notifications. Please try again.";

/// Errors surfaced by the subscription lifecycle manager.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The platform has no push transport or subscription manager.
    #[error("push notifications are not supported on this platform")]
    Unsupported,

    /// Notification permission is denied or was never granted.
    #[error("notification permission was not granted")]
    PermissionDenied,

    /// Registration, readiness, subscribe or unsubscribe failed on the platform.
    #[error("push transport failure: {0}")]
    Transport(String),

    /// The remote settings store could not be reached or rejected the request.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Keyword or schedule input was rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl NotifyError {
    /// Whether the error carries an actionable, user-facing message.
    ///
    /// Transport and sync failures collapse to a generic retry signal.
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            Self::Unsupported | Self::PermissionDenied | Self::Validation(_)
        )
    }

    /// Message suitable for display to the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Unsupported => {
                "This device does not support push notifications.".to_string()
            }
            Self::PermissionDenied => {
                "Notifications are blocked. Allow them in your settings and try again."
                    .to_string()
            }
            Self::Validation(e) => e.to_string(),
            Self::Transport(_) | Self::Sync(_) => RETRY_MESSAGE.to_string(),
        }
    }
}

/// Errors from the remote settings protocol.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Request could not be sent or no response arrived.
    #[error("network error: {0}")]
    Network(String),

    /// Server answered with a non-success status.
    #[error("server returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// Response body could not be decoded.
    #[error("invalid response: {0}")]
    Decode(String),
}

/// Errors from local key/value storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Storage is disabled (privacy mode, quota, missing directory).
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Read or write failed.
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Rejected keyword or schedule input.
///
/// Messages are shown to the user verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Keyword shorter than the minimum.
    #[error("keywords must be at least {min} characters")]
    TooShort {
        /// Minimum length in characters.
        min: usize,
    },

    /// Keyword longer than the maximum.
    #[error("keywords must be at most {max} characters")]
    TooLong {
        /// Maximum length in characters.
        max: usize,
    },

    /// Keyword contains something other than letters, digits or spaces.
    #[error("keywords may only contain letters, digits and spaces")]
    InvalidCharacters,

    /// Keyword already registered.
    #[error("keyword \"{0}\" is already registered")]
    Duplicate(String),

    /// Keyword list is full.
    #[error("you can register at most {max} keywords")]
    CapacityReached {
        /// Maximum number of keywords.
        max: usize,
    },

    /// Schedule time is not `HH:MM`.
    #[error("invalid time \"{0}\", expected HH:MM")]
    InvalidTime(String),

    /// Schedule start and end are identical.
    #[error("quiet hours start and end must differ")]
    EmptyWindow,
}
