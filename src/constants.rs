//! Application-wide constants for push-identity.
//!
//! Constants are grouped by domain:
//!
//! - **Storage**: keys for locally persisted state
//! - **Preferences**: keyword limits and schedule defaults
//! - **Fingerprint**: entropy slicing
//! - **Network**: HTTP timeouts and endpoint paths

use std::time::Duration;

// ============================================================================
// Storage
// ============================================================================

/// Storage key for the persisted device identifier.
pub const DEVICE_ID_KEY: &str = "device_id";

/// Storage key for the serialized notification preferences.
pub const PREFERENCES_KEY: &str = "notification_preferences";

/// File used by the native platform binding to keep its registration state.
pub const NATIVE_PLATFORM_FILE: &str = "native_push.json";

// ============================================================================
// Preferences
// ============================================================================

/// Default maximum number of keywords a device may register.
pub const DEFAULT_MAX_KEYWORDS: usize = 10;

/// Minimum keyword length in characters (after trimming).
pub const KEYWORD_MIN_CHARS: usize = 2;

/// Maximum keyword length in characters (after trimming).
pub const KEYWORD_MAX_CHARS: usize = 20;

/// Default start of the delivery window (KST).
pub const DEFAULT_SCHEDULE_START: &str = "09:00";

/// Default end of the delivery window (KST).
pub const DEFAULT_SCHEDULE_END: &str = "22:00";

/// Offset of the fixed schedule timezone (KST, UTC+9) in seconds.
pub const SCHEDULE_UTC_OFFSET_SECS: i32 = 9 * 3600;

// ============================================================================
// Fingerprint
// ============================================================================

/// DJB2 seed.
pub const FINGERPRINT_SEED: u32 = 5381;

/// Number of plugin names that contribute to the fingerprint.
pub const FINGERPRINT_PLUGIN_COUNT: usize = 3;

/// Number of trailing canvas data-URL characters that contribute to the
/// fingerprint. The leading `data:image/png;base64,` header is identical
/// everywhere, so the tail is used.
pub const FINGERPRINT_CANVAS_CHARS: usize = 50;

/// Separator between entropy components.
pub const FINGERPRINT_SEPARATOR: &str = "|";

// ============================================================================
// Network
// ============================================================================

/// HTTP client request timeout for settings sync calls.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Path of the subscription registration endpoint.
pub const SUBSCRIBE_PATH: &str = "/notifications/subscribe";

/// Path of the settings endpoint (GET/PUT/DELETE).
pub const SETTINGS_PATH: &str = "/notifications/settings";
