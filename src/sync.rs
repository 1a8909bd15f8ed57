//! Remote settings protocol client.
//!
//! Four keyed operations against the notification server, all JSON over
//! HTTP and all keyed by `device_id`:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | register subscription | `POST /notifications/subscribe` |
//! | fetch settings | `GET /notifications/settings?device_id=…` |
//! | upsert settings | `PUT /notifications/settings` |
//! | delete settings | `DELETE /notifications/settings?device_id=…` |
//!
//! Writes are full-record upserts, so repeating one is harmless. A 404 on
//! fetch means "nothing configured yet" and is not an error.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::constants::{SETTINGS_PATH, SUBSCRIBE_PATH};
use crate::error::SyncError;
use crate::platform::Subscription;
use crate::preferences::{Mode, NotificationPreferences, Schedule};

/// Remote mirror of the preference record.
#[async_trait(?Send)]
pub trait RemoteStore {
    /// Store `{device_id, subscription}`.
    async fn register_subscription(
        &self,
        device_id: &str,
        subscription: &Subscription,
    ) -> Result<(), SyncError>;

    /// Settings for `device_id`, `None` if none were saved yet.
    async fn fetch_settings(&self, device_id: &str) -> Result<Option<RemoteSettings>, SyncError>;

    /// Upsert settings for `device_id`.
    async fn put_settings(
        &self,
        device_id: &str,
        prefs: &NotificationPreferences,
    ) -> Result<(), SyncError>;

    /// Delete the record for `device_id`.
    async fn delete_settings(&self, device_id: &str) -> Result<(), SyncError>;
}

#[derive(Debug, Serialize)]
struct SubscribeRequest<'a> {
    device_id: &'a str,
    subscription: &'a Subscription,
}

/// Body of `PUT /notifications/settings`.
#[derive(Debug, Serialize)]
struct SettingsRequest<'a> {
    device_id: &'a str,
    enabled: bool,
    keywords: &'a [String],
    schedule_enabled: bool,
    schedule_start: String,
    schedule_end: String,
    mode: Mode,
    categories: &'a BTreeMap<String, bool>,
}

impl<'a> SettingsRequest<'a> {
    fn new(device_id: &'a str, prefs: &'a NotificationPreferences) -> Self {
        Self {
            device_id,
            enabled: prefs.enabled,
            keywords: &prefs.keywords,
            schedule_enabled: prefs.schedule.enabled,
            schedule_start: prefs.schedule.start_time.to_string(),
            schedule_end: prefs.schedule.end_time.to_string(),
            mode: prefs.mode,
            categories: &prefs.categories,
        }
    }
}

/// Settings as stored on the server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteSettings {
    /// Master switch.
    #[serde(default)]
    pub enabled: bool,
    /// Keywords.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Whether the delivery window is enforced.
    #[serde(default)]
    pub schedule_enabled: bool,
    /// Window start (`HH:MM`, `HH:MM:SS` tolerated).
    #[serde(default)]
    pub schedule_start: Option<String>,
    /// Window end (`HH:MM`, `HH:MM:SS` tolerated).
    #[serde(default)]
    pub schedule_end: Option<String>,
    /// Mode, if the server stores it.
    #[serde(default)]
    pub mode: Option<Mode>,
    /// Categories, if the server stores them.
    #[serde(default)]
    pub categories: Option<BTreeMap<String, bool>>,
}

impl RemoteSettings {
    /// Overlay the server record on `local`.
    ///
    /// Fields the server does not carry keep their local values; an
    /// unparseable schedule keeps the local schedule.
    pub fn merge_into(&self, local: &NotificationPreferences) -> NotificationPreferences {
        let mut merged = local.clone();
        merged.enabled = self.enabled;
        merged.keywords = self.keywords.clone();
        if let Some(mode) = self.mode {
            merged.mode = mode;
        }
        if let Some(categories) = &self.categories {
            merged.categories = categories.clone();
        }

        let start = self
            .schedule_start
            .as_deref()
            .map_or_else(|| local.schedule.start_time.to_string(), truncate_seconds);
        let end = self
            .schedule_end
            .as_deref()
            .map_or_else(|| local.schedule.end_time.to_string(), truncate_seconds);
        match Schedule::new(self.schedule_enabled, &start, &end) {
            Ok(schedule) => merged.schedule = schedule,
            Err(e) => log::warn!("Ignoring remote schedule {start}-{end}: {e}"),
        }
        merged
    }
}

fn truncate_seconds(time: &str) -> String {
    match time.len() {
        8 if time.as_bytes()[5] == b':' => time[..5].to_string(),
        _ => time.to_string(),
    }
}

/// HTTP implementation of [`RemoteStore`].
#[derive(Debug, Clone)]
pub struct SyncClient {
    client: Client,
    base_url: String,
}

impl SyncClient {
    /// Client for the server at `base_url` with a request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Client reusing a configured `reqwest::Client`.
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Server base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn network(e: reqwest::Error) -> SyncError {
    SyncError::Network(e.to_string())
}

async fn ensure_success(response: Response) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SyncError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait(?Send)]
impl RemoteStore for SyncClient {
    async fn register_subscription(
        &self,
        device_id: &str,
        subscription: &Subscription,
    ) -> Result<(), SyncError> {
        let response = self
            .client
            .post(self.url(SUBSCRIBE_PATH))
            .json(&SubscribeRequest {
                device_id,
                subscription,
            })
            .send()
            .await
            .map_err(network)?;
        ensure_success(response).await?;
        log::debug!("Registered subscription for {device_id}");
        Ok(())
    }

    async fn fetch_settings(&self, device_id: &str) -> Result<Option<RemoteSettings>, SyncError> {
        let response = self
            .client
            .get(self.url(SETTINGS_PATH))
            .query(&[("device_id", device_id)])
            .send()
            .await
            .map_err(network)?;

        if response.status() == StatusCode::NOT_FOUND {
            log::debug!("No remote settings for {device_id}");
            return Ok(None);
        }

        let settings = ensure_success(response)
            .await?
            .json::<RemoteSettings>()
            .await
            .map_err(|e| SyncError::Decode(e.to_string()))?;
        Ok(Some(settings))
    }

    async fn put_settings(
        &self,
        device_id: &str,
        prefs: &NotificationPreferences,
    ) -> Result<(), SyncError> {
        let response = self
            .client
            .put(self.url(SETTINGS_PATH))
            .json(&SettingsRequest::new(device_id, prefs))
            .send()
            .await
            .map_err(network)?;
        ensure_success(response).await?;
        log::debug!("Pushed settings for {device_id}");
        Ok(())
    }

    async fn delete_settings(&self, device_id: &str) -> Result<(), SyncError> {
        let response = self
            .client
            .delete(self.url(SETTINGS_PATH))
            .query(&[("device_id", device_id)])
            .send()
            .await
            .map_err(network)?;

        // Already gone counts as deleted
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(response).await?;
        Ok(())
    }
}
