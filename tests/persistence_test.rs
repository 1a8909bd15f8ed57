// Persistence across runs: file-backed storage and the native push binding.
//
// Each test works in its own temp directory so nothing touches the real
// config directory.

use std::rc::Rc;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use p256::ecdsa::SigningKey;
use p256::elliptic_curve::rand_core::OsRng;
use push_identity::fingerprint::StaticSignals;
use push_identity::identity::{DeviceId, IdOrigin};
use push_identity::platform::NativePlatform;
use push_identity::{
    DeviceIdentityStore, FileStore, Identity, PreferenceStore, SharedStore, SubscriptionManager,
    SubscriptionState, SyncClient,
};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn signals() -> Rc<StaticSignals> {
    Rc::new(StaticSignals {
        user_agent: Some("push-identity-test".to_string()),
        platform: Some("linux x86_64".to_string()),
        ..StaticSignals::default()
    })
}

fn vapid_public_key() -> String {
    let key = SigningKey::random(&mut OsRng);
    URL_SAFE_NO_PAD.encode(key.verifying_key().to_encoded_point(false).as_bytes())
}

fn native_manager(
    dir: &TempDir,
    server: &MockServer,
    key: &str,
) -> SubscriptionManager<NativePlatform, SyncClient> {
    let storage: SharedStore = Rc::new(FileStore::new(dir.path()));
    SubscriptionManager::new(
        NativePlatform::new(
            dir.path(),
            Some("https://push.example.com/v1".to_string()),
            true,
        ),
        SyncClient::new(&server.uri(), Duration::from_secs(5)).unwrap(),
        DeviceIdentityStore::new(Rc::clone(&storage), signals()),
        PreferenceStore::new(storage),
        key,
    )
}

async fn mount_ok(server: &MockServer) {
    for (verb, route, status) in [
        ("POST", "/notifications/subscribe", 201),
        ("PUT", "/notifications/settings", 200),
        ("DELETE", "/notifications/settings", 204),
    ] {
        Mock::given(method(verb))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status))
            .mount(server)
            .await;
    }
}

#[test]
fn test_device_id_survives_restart() {
    let dir = TempDir::new().unwrap();

    let first = {
        let storage: SharedStore = Rc::new(FileStore::new(dir.path()));
        DeviceIdentityStore::new(storage, signals()).get_or_create()
    };
    assert!(first.is_durable());

    let storage: SharedStore = Rc::new(FileStore::new(dir.path()));
    let second = DeviceIdentityStore::new(storage, signals()).get_or_create();
    assert_eq!(first, second);

    match second {
        Identity::Durable(id) => assert_eq!(id.origin(), IdOrigin::Device),
        Identity::Session(_) => panic!("expected a durable id"),
    }
}

#[test]
fn test_hand_edited_id_is_replaced() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("device_id"), "device_UPPER_case").unwrap();

    let storage: SharedStore = Rc::new(FileStore::new(dir.path()));
    let identity = DeviceIdentityStore::new(storage, signals()).get_or_create();
    assert!(DeviceId::parse(identity.as_str()).is_some());
    assert_ne!(identity.as_str(), "device_UPPER_case");
}

#[tokio::test]
async fn test_native_subscription_survives_restart() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mount_ok(&server).await;
    let key = vapid_public_key();

    let first = native_manager(&dir, &server, &key);
    assert_eq!(first.state(), SubscriptionState::NoPermission);
    first.request_permission().await.unwrap();
    let outcome = first.subscribe().await.unwrap();
    assert!(!outcome.reused);
    first.add_keyword("AI").await.unwrap();
    drop(first);

    let second = native_manager(&dir, &server, &key);
    assert_eq!(
        second.restore().await.unwrap(),
        SubscriptionState::Subscribed { active: true }
    );
    assert_eq!(second.identity(), Some(outcome.identity.clone()));
    assert_eq!(second.preferences().keywords, vec!["AI".to_string()]);

    let again = second.subscribe().await.unwrap();
    assert!(again.reused);
    assert_eq!(again.subscription, outcome.subscription);
}

#[tokio::test]
async fn test_native_unsubscribe_clears_everything() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mount_ok(&server).await;
    let key = vapid_public_key();

    let manager = native_manager(&dir, &server, &key);
    manager.request_permission().await.unwrap();
    manager.subscribe().await.unwrap();

    let outcome = manager.unsubscribe().await.unwrap();
    assert!(outcome.remote_deleted);
    assert!(outcome.platform_unsubscribed);
    assert!(!dir.path().join("device_id").exists());
    assert!(!dir.path().join("notification_preferences").exists());

    let restarted = native_manager(&dir, &server, &key);
    assert_eq!(
        restarted.restore().await.unwrap(),
        SubscriptionState::PermissionGranted
    );
    assert_eq!(restarted.identity(), None);
}

#[tokio::test]
async fn test_native_platform_without_endpoint_is_unsupported() {
    let dir = TempDir::new().unwrap();
    let storage: SharedStore = Rc::new(FileStore::new(dir.path()));
    let manager = SubscriptionManager::new(
        NativePlatform::new(dir.path(), None, true),
        SyncClient::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap(),
        DeviceIdentityStore::new(Rc::clone(&storage), signals()),
        PreferenceStore::new(storage),
        vapid_public_key(),
    );
    assert_eq!(manager.state(), SubscriptionState::Unsupported);
    assert!(matches!(
        manager.subscribe().await,
        Err(push_identity::NotifyError::Unsupported)
    ));
}
