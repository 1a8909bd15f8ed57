//! Native push binding for the command-line client.
//!
//! The host acts as its own push client: it owns a P-256 keypair and an auth
//! secret, and its endpoint lives under a configured push endpoint base.
//! Registration state, the granted permission, and the subscription are kept
//! in `native_push.json` in the config directory (owner read/write only).
//! A corrupt state file is treated as empty so the user can start over;
//! [`NativePlatform::reset`] removes it.
//!
//! Support requires a configured endpoint base; without one the platform
//! reports itself unsupported.

use std::fs;
use std::io::{self, Write};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};
use p256::ecdsa::SigningKey;
use p256::elliptic_curve::rand_core::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::{
    NotificationOptions, Permission, PlatformError, PushPlatform, Subscription, SubscriptionKeys,
    TransportHandle,
};
use crate::constants::NATIVE_PLATFORM_FILE;

/// Length of an uncompressed SEC1 P-256 point.
const UNCOMPRESSED_POINT_LEN: usize = 65;

/// Length of the auth secret (RFC 8291).
const AUTH_SECRET_LEN: usize = 16;

#[derive(Debug, Default, Serialize, Deserialize)]
struct NativeState {
    #[serde(default)]
    permission: Permission,
    #[serde(default)]
    registered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subscription: Option<StoredSubscription>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredSubscription {
    subscription: Subscription,
    /// Server key the subscription is bound to (base64url).
    application_server_key: String,
}

fn load_state(path: &Path) -> Result<NativeState> {
    if !path.exists() {
        return Ok(NativeState::default());
    }
    let content = fs::read_to_string(path).context("Failed to read native push state")?;
    match serde_json::from_str(&content) {
        Ok(state) => Ok(state),
        Err(e) => {
            log::warn!(
                "Ignoring corrupt native push state at {}: {e}",
                path.display()
            );
            Ok(NativeState::default())
        }
    }
}

fn save_state(path: &Path, state: &NativeState) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).context("Failed to create native push state directory")?;
    }
    let content =
        serde_json::to_string_pretty(state).context("Failed to serialize native push state")?;
    fs::write(path, content).context("Failed to write native push state")?;

    #[cfg(unix)]
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .context("Failed to set native push state permissions")?;

    Ok(())
}

/// File-backed [`PushPlatform`] for the host.
#[derive(Debug, Clone)]
pub struct NativePlatform {
    state_path: PathBuf,
    endpoint_base: Option<String>,
    assume_yes: bool,
}

impl NativePlatform {
    /// Platform keeping its state in `state_dir`.
    ///
    /// With `assume_yes`, permission prompts are answered "granted" without
    /// asking.
    pub fn new(state_dir: &Path, endpoint_base: Option<String>, assume_yes: bool) -> Self {
        Self {
            state_path: state_dir.join(NATIVE_PLATFORM_FILE),
            endpoint_base: endpoint_base
                .map(|base| base.trim_end_matches('/').to_string())
                .filter(|base| !base.is_empty()),
            assume_yes,
        }
    }

    /// Forget permission, registration and subscription.
    pub fn reset(&self) -> Result<()> {
        match fs::remove_file(&self.state_path) {
            Ok(()) => {
                log::info!("Removed native push state {}", self.state_path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to remove native push state"),
        }
    }

    fn ask_user() -> Result<Permission> {
        if !atty::is(atty::Stream::Stdin) {
            return Ok(Permission::Default);
        }
        print!("Allow push notifications on this device? [y/N] ");
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().read_line(&mut answer)?;
        Ok(match answer.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => Permission::Granted,
            _ => Permission::Denied,
        })
    }
}

#[async_trait(?Send)]
impl PushPlatform for NativePlatform {
    type Handle = NativeHandle;

    fn check_support(&self) -> bool {
        self.endpoint_base.is_some()
    }

    fn permission(&self) -> Permission {
        load_state(&self.state_path)
            .map(|state| state.permission)
            .unwrap_or_default()
    }

    async fn request_permission(&self) -> Result<Permission, PlatformError> {
        let mut state = load_state(&self.state_path)?;
        if state.permission == Permission::Granted {
            return Ok(Permission::Granted);
        }

        let answer = if self.assume_yes {
            Permission::Granted
        } else {
            Self::ask_user()?
        };

        if answer != Permission::Default {
            state.permission = answer;
            save_state(&self.state_path, &state)?;
        }
        Ok(answer)
    }

    async fn register_transport(&self) -> Result<Rc<NativeHandle>, PlatformError> {
        let endpoint_base = self
            .endpoint_base
            .clone()
            .ok_or_else(|| PlatformError::new("no push endpoint configured"))?;

        let mut state = load_state(&self.state_path)?;
        if !state.registered {
            state.registered = true;
            save_state(&self.state_path, &state)?;
            log::info!("Registered native push transport at {}", self.state_path.display());
        }

        Ok(Rc::new(NativeHandle {
            state_path: self.state_path.clone(),
            endpoint_base,
        }))
    }

    async fn show_notification(
        &self,
        title: &str,
        options: &NotificationOptions,
    ) -> Result<(), PlatformError> {
        log::info!("Showing local notification: {title}");
        match &options.body {
            Some(body) => println!("[notification] {title}: {body}"),
            None => println!("[notification] {title}"),
        }
        Ok(())
    }
}

/// Registration handle of a [`NativePlatform`].
#[derive(Debug, Clone)]
pub struct NativeHandle {
    state_path: PathBuf,
    endpoint_base: String,
}

impl NativeHandle {
    /// Only the public point is kept: this binding never decrypts payloads.
    fn create_subscription(&self, application_server_key: &[u8]) -> StoredSubscription {
        let signing_key = SigningKey::random(&mut OsRng);
        let public_point = signing_key.verifying_key().to_encoded_point(false);

        let mut auth = [0u8; AUTH_SECRET_LEN];
        rand::rng().fill_bytes(&mut auth);
        let mut token = [0u8; 16];
        rand::rng().fill_bytes(&mut token);

        StoredSubscription {
            subscription: Subscription {
                endpoint: format!("{}/{}", self.endpoint_base, BASE64URL.encode(token)),
                expiration_time: None,
                keys: SubscriptionKeys {
                    p256dh: BASE64URL.encode(public_point.as_bytes()),
                    auth: BASE64URL.encode(auth),
                },
            },
            application_server_key: BASE64URL.encode(application_server_key),
        }
    }
}

#[async_trait(?Send)]
impl TransportHandle for NativeHandle {
    async fn ready(&self) -> Result<(), PlatformError> {
        let state = load_state(&self.state_path)?;
        if !state.registered {
            return Err(PlatformError::new("push transport is not registered"));
        }
        Ok(())
    }

    async fn get_subscription(&self) -> Result<Option<Subscription>, PlatformError> {
        let state = load_state(&self.state_path)?;
        Ok(state.subscription.map(|stored| stored.subscription))
    }

    async fn subscribe(&self, application_server_key: &[u8]) -> Result<Subscription, PlatformError> {
        if application_server_key.len() != UNCOMPRESSED_POINT_LEN
            || application_server_key[0] != 0x04
        {
            return Err(PlatformError::new(
                "application server key must be a 65-byte uncompressed P-256 point",
            ));
        }

        let mut state = load_state(&self.state_path)?;
        let key_b64 = BASE64URL.encode(application_server_key);
        if let Some(existing) = &state.subscription {
            if existing.application_server_key == key_b64 {
                return Ok(existing.subscription.clone());
            }
            return Err(PlatformError::new(
                "a subscription with a different application server key already exists",
            ));
        }

        let stored = self.create_subscription(application_server_key);
        let subscription = stored.subscription.clone();
        state.subscription = Some(stored);
        save_state(&self.state_path, &state)?;
        log::info!("Created native push subscription {}", subscription.endpoint);
        Ok(subscription)
    }

    async fn unsubscribe(&self, subscription: &Subscription) -> Result<bool, PlatformError> {
        let mut state = load_state(&self.state_path)?;
        let matches = state
            .subscription
            .as_ref()
            .is_some_and(|stored| stored.subscription.endpoint == subscription.endpoint);
        if matches {
            state.subscription = None;
            save_state(&self.state_path, &state)?;
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_key() -> Vec<u8> {
        let key = SigningKey::random(&mut OsRng);
        key.verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    fn platform(dir: &Path) -> NativePlatform {
        NativePlatform::new(dir, Some("https://push.example.com/v1/".to_string()), true)
    }

    #[test]
    fn test_support_requires_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        assert!(platform(dir.path()).check_support());
        assert!(!NativePlatform::new(dir.path(), None, true).check_support());
        assert!(!NativePlatform::new(dir.path(), Some(String::new()), true).check_support());
    }

    #[tokio::test]
    async fn test_assume_yes_grants_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let platform = platform(dir.path());
        assert_eq!(platform.permission(), Permission::Default);
        assert_eq!(
            platform.request_permission().await.unwrap(),
            Permission::Granted
        );
        assert_eq!(platform.permission(), Permission::Granted);
    }

    #[tokio::test]
    async fn test_subscribe_generates_keys_and_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let platform = platform(dir.path());
        let handle = platform.register_transport().await.unwrap();
        handle.ready().await.unwrap();
        assert_eq!(handle.get_subscription().await.unwrap(), None);

        let key = server_key();
        let sub = handle.subscribe(&key).await.unwrap();
        assert!(sub.endpoint.starts_with("https://push.example.com/v1/"));
        assert_eq!(BASE64URL.decode(&sub.keys.p256dh).unwrap().len(), 65);
        assert_eq!(BASE64URL.decode(&sub.keys.auth).unwrap().len(), 16);

        // Survives a fresh handle and is reused
        let again = platform.register_transport().await.unwrap();
        assert_eq!(again.get_subscription().await.unwrap(), Some(sub.clone()));
        assert_eq!(again.subscribe(&key).await.unwrap(), sub);

        // Different key conflicts
        assert!(again.subscribe(&server_key()).await.is_err());
    }

    #[tokio::test]
    async fn test_subscribe_rejects_malformed_key() {
        let dir = tempfile::tempdir().unwrap();
        let handle = platform(dir.path()).register_transport().await.unwrap();
        assert!(handle.subscribe(&[0x04; 10]).await.is_err());
        let mut compressed = server_key();
        compressed[0] = 0x02;
        assert!(handle.subscribe(&compressed).await.is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_subscription() {
        let dir = tempfile::tempdir().unwrap();
        let handle = platform(dir.path()).register_transport().await.unwrap();
        let sub = handle.subscribe(&server_key()).await.unwrap();

        assert!(handle.unsubscribe(&sub).await.unwrap());
        assert!(!handle.unsubscribe(&sub).await.unwrap());
        assert_eq!(handle.get_subscription().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_state_starts_over() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(NATIVE_PLATFORM_FILE), "{not json").unwrap();

        let platform = platform(dir.path());
        assert_eq!(platform.permission(), Permission::Default);
        assert_eq!(
            platform.request_permission().await.unwrap(),
            Permission::Granted
        );

        let handle = platform.register_transport().await.unwrap();
        handle.ready().await.unwrap();
        let sub = handle.subscribe(&server_key()).await.unwrap();
        assert_eq!(handle.get_subscription().await.unwrap(), Some(sub));
    }

    #[tokio::test]
    async fn test_reset_removes_state() {
        let dir = tempfile::tempdir().unwrap();
        let platform = platform(dir.path());
        platform.request_permission().await.unwrap();
        let handle = platform.register_transport().await.unwrap();
        handle.subscribe(&server_key()).await.unwrap();

        platform.reset().unwrap();
        assert!(!dir.path().join(NATIVE_PLATFORM_FILE).exists());
        assert_eq!(platform.permission(), Permission::Default);
        assert!(handle.ready().await.is_err());
        assert_eq!(handle.get_subscription().await.unwrap(), None);

        // Nothing left to remove
        platform.reset().unwrap();
    }

    #[test]
    fn test_state_file_holds_no_private_key() {
        let state = NativeState {
            permission: Permission::Granted,
            registered: true,
            subscription: Some(StoredSubscription {
                subscription: Subscription {
                    endpoint: "https://push.example.com/v1/t".to_string(),
                    expiration_time: None,
                    keys: SubscriptionKeys {
                        p256dh: "p".to_string(),
                        auth: "a".to_string(),
                    },
                },
                application_server_key: "k".to_string(),
            }),
        };
        let json = serde_json::to_string(&state).unwrap();
        assert!(!json.contains("private_key"));

        // Files written before the key was dropped still load
        let legacy = json.replace(
            "\"application_server_key\":\"k\"",
            "\"application_server_key\":\"k\",\"private_key\":\"x\"",
        );
        assert!(legacy.contains("private_key"));
        let parsed: NativeState = serde_json::from_str(&legacy).unwrap();
        assert!(parsed.subscription.is_some());
    }

    #[tokio::test]
    async fn test_ready_requires_registration() {
        let dir = tempfile::tempdir().unwrap();
        let handle = NativeHandle {
            state_path: dir.path().join(NATIVE_PLATFORM_FILE),
            endpoint_base: "https://push.example.com".to_string(),
        };
        assert!(handle.ready().await.is_err());
    }
}
