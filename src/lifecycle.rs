//! Subscription lifecycle manager.
//!
//! Drives a device from "nothing" to "receiving targeted notifications":
//!
//! ```text
//! Unsupported (terminal)
//!
//! NoPermission ──request_permission──► PermissionGranted
//!                                          │
//!                                      subscribe
//!                                          ▼
//!                          Subscribed { active: true } ◄──► Subscribed { active: false }
//!                                          │                 set_active
//!                                     unsubscribe
//!                                          ▼
//!                                    Unsubscribed
//! ```
//!
//! `subscribe` runs permission → registration → readiness → platform
//! subscription → remote push strictly in order. Any failure leaves the
//! state and local preferences untouched. A platform subscription created
//! before a failed remote push is kept: the next `subscribe` finds it and
//! only repeats the push.
//!
//! All operations take `&self` and no `RefCell` borrow is held across an
//! `.await`, so overlapping calls (a double tap on "enable") are safe; the
//! platform's reuse-or-create check prevents duplicate subscriptions.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::constants::DEFAULT_MAX_KEYWORDS;
use crate::error::{NotifyError, Result};
use crate::identity::{DeviceIdentityStore, Identity};
use crate::platform::{
    decode_application_server_key, NotificationOptions, Permission, PlatformError, PushPlatform,
    Subscription, TransportHandle,
};
use crate::preferences::{Mode, NotificationPreferences, PreferenceStore, Schedule};
use crate::sync::RemoteStore;

/// Where the device is in the subscription lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Platform cannot do push. Nothing else is attempted.
    Unsupported,
    /// Permission not (yet) granted.
    NoPermission,
    /// Permission granted, no subscription yet.
    PermissionGranted,
    /// Subscription registered with the server.
    Subscribed {
        /// `false` while the user has paused notifications.
        active: bool,
    },
    /// Explicitly unsubscribed; permission is still granted.
    Unsubscribed,
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unsupported => write!(f, "unsupported"),
            Self::NoPermission => write!(f, "no permission"),
            Self::PermissionGranted => write!(f, "permission granted"),
            Self::Subscribed { active: true } => write!(f, "subscribed"),
            Self::Subscribed { active: false } => write!(f, "subscribed (paused)"),
            Self::Unsubscribed => write!(f, "unsubscribed"),
        }
    }
}

/// Result of a successful [`SubscriptionManager::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOutcome {
    /// Subscription registered with the server.
    pub subscription: Subscription,
    /// Identity it was registered under.
    pub identity: Identity,
    /// Whether an existing platform subscription was reused.
    pub reused: bool,
    /// Whether the enabled preferences reached the server. When `false`
    /// the local record is ahead and the next edit will push it.
    pub settings_synced: bool,
}

/// Result of a successful [`SubscriptionManager::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsubscribeOutcome {
    /// Whether the server record was deleted.
    pub remote_deleted: bool,
    /// Whether a platform subscription was cancelled.
    pub platform_unsubscribed: bool,
}

fn transport(step: &'static str) -> impl Fn(PlatformError) -> NotifyError {
    move |e| {
        log::warn!("Push {step} failed: {e}");
        NotifyError::Transport(format!("{step}: {e}"))
    }
}

/// Orchestrates platform, identity, preferences and the remote store.
pub struct SubscriptionManager<P: PushPlatform, R: RemoteStore> {
    platform: P,
    remote: R,
    identity: DeviceIdentityStore,
    preferences: PreferenceStore,
    application_server_key: String,
    max_keywords: usize,
    state: Cell<SubscriptionState>,
    handle: RefCell<Option<Rc<P::Handle>>>,
}

impl<P: PushPlatform, R: RemoteStore> std::fmt::Debug for SubscriptionManager<P, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("state", &self.state.get())
            .field("identity", &self.identity)
            .field("max_keywords", &self.max_keywords)
            .finish_non_exhaustive()
    }
}

impl<P: PushPlatform, R: RemoteStore> SubscriptionManager<P, R> {
    /// Create a manager. The initial state reflects platform support and the
    /// current permission; call [`restore`](Self::restore) to pick up an
    /// existing subscription.
    pub fn new(
        platform: P,
        remote: R,
        identity: DeviceIdentityStore,
        preferences: PreferenceStore,
        application_server_key: impl Into<String>,
    ) -> Self {
        let state = Self::initial_state(&platform);
        Self {
            platform,
            remote,
            identity,
            preferences,
            application_server_key: application_server_key.into(),
            max_keywords: DEFAULT_MAX_KEYWORDS,
            state: Cell::new(state),
            handle: RefCell::new(None),
        }
    }

    /// Override the keyword limit.
    pub fn with_max_keywords(mut self, max_keywords: usize) -> Self {
        self.max_keywords = max_keywords;
        self
    }

    fn initial_state(platform: &P) -> SubscriptionState {
        if !platform.check_support() {
            SubscriptionState::Unsupported
        } else if platform.permission() == Permission::Granted {
            SubscriptionState::PermissionGranted
        } else {
            SubscriptionState::NoPermission
        }
    }

    /// Current state.
    pub fn state(&self) -> SubscriptionState {
        self.state.get()
    }

    /// Locally saved preferences.
    pub fn preferences(&self) -> NotificationPreferences {
        self.preferences.load()
    }

    /// Current identity, without creating one.
    pub fn identity(&self) -> Option<Identity> {
        self.identity.get()
    }

    /// Identity, created on first use.
    pub fn ensure_identity(&self) -> Identity {
        self.identity.get_or_create()
    }

    /// Keyword limit in effect.
    pub fn max_keywords(&self) -> usize {
        self.max_keywords
    }

    /// Platform binding.
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Remote store.
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Registration handle, registering on first use.
    async fn handle(&self) -> Result<Rc<P::Handle>> {
        let cached = self.handle.borrow().clone();
        if let Some(handle) = cached {
            return Ok(handle);
        }
        let handle = self
            .platform
            .register_transport()
            .await
            .map_err(transport("registration"))?;
        self.handle
            .borrow_mut()
            .get_or_insert_with(|| Rc::clone(&handle));
        Ok(handle)
    }

    fn save_local(&self, prefs: &NotificationPreferences) {
        if let Err(e) = self.preferences.save(prefs) {
            log::warn!("Failed to save notification preferences locally: {e}");
        }
    }

    /// Re-derive the state on load, picking up an existing subscription.
    pub async fn restore(&self) -> Result<SubscriptionState> {
        let state = Self::initial_state(&self.platform);
        if state != SubscriptionState::PermissionGranted {
            self.state.set(state);
            return Ok(state);
        }

        let handle = self.handle().await?;
        handle.ready().await.map_err(transport("readiness wait"))?;
        let existing = handle
            .get_subscription()
            .await
            .map_err(transport("subscription lookup"))?;

        let state = match existing {
            Some(_) => SubscriptionState::Subscribed {
                active: self.preferences.load().enabled,
            },
            None => SubscriptionState::PermissionGranted,
        };
        log::debug!("Restored subscription state: {state}");
        self.state.set(state);
        Ok(state)
    }

    /// Ask the platform for notification permission.
    ///
    /// Denial (or a dismissed prompt) is `PermissionDenied`, recoverable once
    /// the user changes their settings.
    pub async fn request_permission(&self) -> Result<()> {
        if self.state.get() == SubscriptionState::Unsupported {
            return Err(NotifyError::Unsupported);
        }

        let permission = self
            .platform
            .request_permission()
            .await
            .map_err(transport("permission request"))?;

        if permission != Permission::Granted {
            log::info!("Notification permission not granted ({permission})");
            return Err(NotifyError::PermissionDenied);
        }

        if self.state.get() == SubscriptionState::NoPermission {
            self.state.set(SubscriptionState::PermissionGranted);
        }
        Ok(())
    }

    /// Create or reuse the platform subscription and register it remotely.
    pub async fn subscribe(&self) -> Result<SubscribeOutcome> {
        match self.state.get() {
            SubscriptionState::Unsupported => return Err(NotifyError::Unsupported),
            SubscriptionState::NoPermission => {
                // Permission may have been granted outside the app
                if self.platform.permission() != Permission::Granted {
                    return Err(NotifyError::PermissionDenied);
                }
                self.state.set(SubscriptionState::PermissionGranted);
            }
            _ => {}
        }

        let key = decode_application_server_key(&self.application_server_key).map_err(|e| {
            log::warn!("Server public key is not valid base64url: {e}");
            NotifyError::Transport(format!("invalid server public key: {e}"))
        })?;

        let handle = self.handle().await?;
        handle.ready().await.map_err(transport("readiness wait"))?;

        let existing = handle
            .get_subscription()
            .await
            .map_err(transport("subscription lookup"))?;
        let reused = existing.is_some();
        let subscription = match existing {
            Some(subscription) => subscription,
            None => handle
                .subscribe(&key)
                .await
                .map_err(transport("subscribe"))?,
        };

        let identity = self.identity.get_or_create();
        self.remote
            .register_subscription(identity.as_str(), &subscription)
            .await
            .map_err(|e| {
                log::warn!("Failed to register subscription with server: {e}");
                NotifyError::Sync(e)
            })?;

        self.state.set(SubscriptionState::Subscribed { active: true });
        log::info!(
            "Subscribed {} ({})",
            identity,
            if reused { "reused" } else { "new" }
        );

        let prefs = self.preferences.load().with_enabled(true);
        self.save_local(&prefs);
        let settings_synced = match self.remote.put_settings(identity.as_str(), &prefs).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Subscribed, but pushing settings failed: {e}");
                false
            }
        };

        Ok(SubscribeOutcome {
            subscription,
            identity,
            reused,
            settings_synced,
        })
    }

    /// Delete the remote record, cancel the platform subscription, and
    /// reset local state.
    ///
    /// The platform step runs even when the remote delete fails. A platform
    /// failure returns `Transport` and keeps local state for a retry.
    pub async fn unsubscribe(&self) -> Result<UnsubscribeOutcome> {
        let remote_deleted = match self.identity.get() {
            Some(identity) => match self.remote.delete_settings(identity.as_str()).await {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("Failed to delete remote notification settings: {e}");
                    false
                }
            },
            None => true,
        };

        let can_reach_platform = self.platform.check_support()
            && self.platform.permission() == Permission::Granted;
        let platform_unsubscribed = if can_reach_platform {
            let handle = self.handle().await?;
            handle.ready().await.map_err(transport("readiness wait"))?;
            match handle
                .get_subscription()
                .await
                .map_err(transport("subscription lookup"))?
            {
                Some(subscription) => handle
                    .unsubscribe(&subscription)
                    .await
                    .map_err(transport("unsubscribe"))?,
                None => false,
            }
        } else {
            false
        };

        if let Err(e) = self.preferences.clear() {
            log::warn!("Failed to clear local notification preferences: {e}");
        }
        self.identity.clear();

        let state = match Self::initial_state(&self.platform) {
            SubscriptionState::PermissionGranted => SubscriptionState::Unsubscribed,
            other => other,
        };
        self.state.set(state);
        log::info!(
            "Unsubscribed (remote deleted: {remote_deleted}, platform: {platform_unsubscribed})"
        );

        Ok(UnsubscribeOutcome {
            remote_deleted,
            platform_unsubscribed,
        })
    }

    /// Pause or resume delivery without touching the platform subscription.
    ///
    /// Resuming without a subscription runs [`subscribe`](Self::subscribe).
    pub async fn set_active(&self, active: bool) -> Result<NotificationPreferences> {
        let subscribed = matches!(self.state.get(), SubscriptionState::Subscribed { .. });
        if active && !subscribed {
            self.subscribe().await?;
            return Ok(self.preferences.load());
        }

        let result = self
            .update_preferences(|prefs| Ok(prefs.with_enabled(active)))
            .await;
        if subscribed {
            // Local state already reflects the toggle, even if the push failed
            self.state.set(SubscriptionState::Subscribed { active });
        }
        result
    }

    /// Add a keyword.
    pub async fn add_keyword(&self, keyword: &str) -> Result<NotificationPreferences> {
        let max = self.max_keywords;
        self.update_preferences(|prefs| prefs.add_keyword(keyword, max))
            .await
    }

    /// Remove a keyword.
    pub async fn remove_keyword(&self, keyword: &str) -> Result<NotificationPreferences> {
        self.update_preferences(|prefs| Ok(prefs.remove_keyword(keyword)))
            .await
    }

    /// Switch between category and keyword matching.
    pub async fn set_mode(&self, mode: Mode) -> Result<NotificationPreferences> {
        self.update_preferences(|prefs| Ok(prefs.with_mode(mode)))
            .await
    }

    /// Switch one category.
    pub async fn set_category(&self, name: &str, on: bool) -> Result<NotificationPreferences> {
        self.update_preferences(|prefs| Ok(prefs.with_category(name, on)))
            .await
    }

    /// Replace the delivery window.
    pub async fn set_schedule(
        &self,
        enabled: bool,
        start: &str,
        end: &str,
    ) -> Result<NotificationPreferences> {
        self.update_preferences(|prefs| Ok(prefs.with_schedule(Schedule::new(enabled, start, end)?)))
            .await
    }

    /// Apply an edit: validate, save locally, then push.
    ///
    /// Validation errors never reach the network. On a sync failure the
    /// local edit stays saved.
    pub async fn update_preferences<F>(&self, edit: F) -> Result<NotificationPreferences>
    where
        F: FnOnce(
            &NotificationPreferences,
        ) -> std::result::Result<NotificationPreferences, crate::error::ValidationError>,
    {
        let current = self.preferences.load();
        let next = edit(&current)?;
        self.save_local(&next);

        let identity = self.identity.get_or_create();
        self.remote
            .put_settings(identity.as_str(), &next)
            .await
            .map_err(|e| {
                log::warn!("Saved preferences locally, remote push failed: {e}");
                NotifyError::Sync(e)
            })?;
        Ok(next)
    }

    /// Pull the server record and merge it into local preferences.
    ///
    /// Returns `None` when the server has nothing for this device.
    pub async fn refresh_from_remote(&self) -> Result<Option<NotificationPreferences>> {
        let Some(identity) = self.identity.get() else {
            return Ok(None);
        };
        let Some(remote) = self.remote.fetch_settings(identity.as_str()).await? else {
            return Ok(None);
        };

        let merged = remote.merge_into(&self.preferences.load());
        self.save_local(&merged);
        if let SubscriptionState::Subscribed { .. } = self.state.get() {
            self.state.set(SubscriptionState::Subscribed {
                active: merged.enabled,
            });
        }
        Ok(Some(merged))
    }

    /// Show a local test notification.
    pub async fn send_test_notification(&self) -> Result<()> {
        if self.state.get() == SubscriptionState::Unsupported {
            return Err(NotifyError::Unsupported);
        }
        if self.platform.permission() != Permission::Granted {
            return Err(NotifyError::PermissionDenied);
        }
        let options = NotificationOptions {
            body: Some("Notifications are working on this device.".to_string()),
            tag: Some("test-notification".to_string()),
            ..NotificationOptions::default()
        };
        self.platform
            .show_notification("Test notification", &options)
            .await
            .map_err(transport("test notification"))
    }
}
