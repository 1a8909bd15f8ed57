//! Anonymous device identity.
//!
//! A device id is minted once per storage profile, lazily, and then treated
//! as an opaque token:
//!
//! ```text
//! device_<fingerprint-hex>_<base36 creation millis>
//! temp_<random base36>_<base36 creation millis>
//! ```
//!
//! `temp` replaces `device` when no fingerprint entropy was readable. When
//! storage itself is unavailable the store hands out a [`SessionId`]
//! instead, which lives only as long as the store does.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::Utc;
use rand::Rng;

use crate::constants::DEVICE_ID_KEY;
use crate::fingerprint::{self, SignalSource};
use crate::storage::SharedStore;

/// Where a device id's middle segment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdOrigin {
    /// Derived from the device fingerprint.
    Device,
    /// Random fallback.
    Temp,
}

impl IdOrigin {
    fn prefix(self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::Temp => "temp",
        }
    }
}

/// Durable device identifier, persisted in local storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    /// Parse a persisted id, rejecting anything that fails the shape check.
    pub fn parse(raw: &str) -> Option<Self> {
        is_valid(raw).then(|| Self(raw.to_string()))
    }

    fn mint(origin: IdOrigin, middle: &str, created_millis: i64) -> Self {
        Self(format!(
            "{}_{}_{}",
            origin.prefix(),
            middle,
            to_base36(u64::try_from(created_millis).unwrap_or(0))
        ))
    }

    /// Id as sent to the server.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Origin segment.
    pub fn origin(&self) -> IdOrigin {
        if self.0.starts_with("device_") {
            IdOrigin::Device
        } else {
            IdOrigin::Temp
        }
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session-only identifier, used when storage is unavailable.
///
/// Same shape as a `temp` device id, but never persisted; it does not
/// survive a restart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    fn mint() -> Self {
        Self(format!(
            "temp_{}_{}",
            random_base36(),
            to_base36(u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0))
        ))
    }

    /// Id as sent to the server.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identity handed to the rest of the subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Persisted across runs.
    Durable(DeviceId),
    /// Valid for the current session only.
    Session(SessionId),
}

impl Identity {
    /// Id as sent to the server.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Durable(id) => id.as_str(),
            Self::Session(id) => id.as_str(),
        }
    }

    /// Whether the identity survives a restart.
    pub fn is_durable(&self) -> bool {
        matches!(self, Self::Durable(_))
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape check: `^(device|temp)_[a-z0-9]+_[a-z0-9]+$`.
///
/// Pure; the id is opaque after creation and never re-derived.
pub fn is_valid(id: &str) -> bool {
    let rest = match id.split_once('_') {
        Some(("device" | "temp", rest)) => rest,
        _ => return false,
    };
    let Some((middle, tail)) = rest.split_once('_') else {
        return false;
    };
    let segment_ok =
        |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
    segment_ok(middle) && segment_ok(tail)
}

/// Lowercase base36.
pub fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn random_base36() -> String {
    let value: u64 = rand::rng().random_range(36u64.pow(7)..36u64.pow(10));
    to_base36(value)
}

/// Produces and remembers the device identity.
pub struct DeviceIdentityStore {
    storage: SharedStore,
    signals: Rc<dyn SignalSource>,
    session: RefCell<Option<SessionId>>,
}

impl std::fmt::Debug for DeviceIdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentityStore")
            .field("storage", &self.storage)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl DeviceIdentityStore {
    /// Create a store over `storage`, fingerprinting with `signals`.
    pub fn new(storage: SharedStore, signals: Rc<dyn SignalSource>) -> Self {
        Self {
            storage,
            signals,
            session: RefCell::new(None),
        }
    }

    /// Return the persisted id, creating and persisting one if needed.
    ///
    /// Safe to call on every load. Falls back to a session id when storage
    /// fails; the session id is reused for the lifetime of this store.
    pub fn get_or_create(&self) -> Identity {
        match self.storage.get(DEVICE_ID_KEY) {
            Ok(Some(raw)) => {
                if let Some(id) = DeviceId::parse(&raw) {
                    return Identity::Durable(id);
                }
                log::warn!("Discarding malformed persisted device id {raw:?}");
            }
            Ok(None) => {}
            Err(e) => {
                log::warn!("Device id storage unreadable, using session id: {e}");
                return Identity::Session(self.session_id());
            }
        }

        let id = self.mint();
        match self.storage.set(DEVICE_ID_KEY, id.as_str()) {
            Ok(()) => {
                log::info!("Created device id {id}");
                Identity::Durable(id)
            }
            Err(e) => {
                log::warn!("Could not persist device id, using session id: {e}");
                Identity::Session(self.session_id())
            }
        }
    }

    /// Read the current identity without side effects.
    pub fn get(&self) -> Option<Identity> {
        match self.storage.get(DEVICE_ID_KEY) {
            Ok(Some(raw)) => DeviceId::parse(&raw).map(Identity::Durable),
            Ok(None) | Err(_) => self.session.borrow().clone().map(Identity::Session),
        }
    }

    /// Forget the identity (full unsubscribe/reset).
    pub fn clear(&self) {
        if let Err(e) = self.storage.remove(DEVICE_ID_KEY) {
            log::warn!("Failed to remove persisted device id: {e}");
        }
        self.session.borrow_mut().take();
    }

    /// Shape check, see [`is_valid`].
    pub fn is_valid(id: &str) -> bool {
        is_valid(id)
    }

    fn mint(&self) -> DeviceId {
        let now = Utc::now().timestamp_millis();
        match fingerprint::generate(self.signals.as_ref()) {
            Ok(fp) => DeviceId::mint(IdOrigin::Device, &fp.to_hex(), now),
            Err(e) => {
                log::warn!("Fingerprint unavailable ({e}), minting temp device id");
                DeviceId::mint(IdOrigin::Temp, &random_base36(), now)
            }
        }
    }

    fn session_id(&self) -> SessionId {
        self.session
            .borrow_mut()
            .get_or_insert_with(SessionId::mint)
            .clone()
    }
}
