//! In-memory push platform.
//!
//! Behaves like a browser push stack: registration is idempotent, and
//! subscribing while a subscription with the same key exists returns that
//! subscription instead of creating a second one. Each step can be made to
//! fail, and call counters let tests assert what was (not) attempted.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use async_trait::async_trait;

use super::{
    NotificationOptions, Permission, PlatformError, PushPlatform, Subscription, SubscriptionKeys,
    TransportHandle,
};

/// Scriptable in-memory [`PushPlatform`].
#[derive(Debug)]
pub struct FakePlatform {
    supported: bool,
    permission: Cell<Permission>,
    prompt_answer: Cell<Permission>,
    fail_register: Cell<bool>,
    registrations: Cell<usize>,
    handle: RefCell<Option<Rc<FakeHandle>>>,
    shown: RefCell<Vec<(String, NotificationOptions)>>,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePlatform {
    /// Supported platform, permission undecided, prompts answer "granted".
    pub fn new() -> Self {
        Self {
            supported: true,
            permission: Cell::new(Permission::Default),
            prompt_answer: Cell::new(Permission::Granted),
            fail_register: Cell::new(false),
            registrations: Cell::new(0),
            handle: RefCell::new(None),
            shown: RefCell::new(Vec::new()),
        }
    }

    /// Platform without push support.
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    /// Set the current permission.
    pub fn set_permission(&self, permission: Permission) {
        self.permission.set(permission);
    }

    /// Answer the next permission prompts with `answer`.
    pub fn answer_prompt_with(&self, answer: Permission) {
        self.prompt_answer.set(answer);
    }

    /// Make registration fail.
    pub fn fail_registration(&self, fail: bool) {
        self.fail_register.set(fail);
    }

    /// Number of registrations actually performed (reuse does not count).
    pub fn registrations(&self) -> usize {
        self.registrations.get()
    }

    /// Registered handle, if registration happened.
    pub fn handle(&self) -> Option<Rc<FakeHandle>> {
        self.handle.borrow().clone()
    }

    /// Notifications shown so far.
    pub fn shown_notifications(&self) -> Vec<(String, NotificationOptions)> {
        self.shown.borrow().clone()
    }
}

#[async_trait(?Send)]
impl PushPlatform for FakePlatform {
    type Handle = FakeHandle;

    fn check_support(&self) -> bool {
        self.supported
    }

    fn permission(&self) -> Permission {
        self.permission.get()
    }

    async fn request_permission(&self) -> Result<Permission, PlatformError> {
        if self.permission.get() == Permission::Default {
            tokio::task::yield_now().await;
            self.permission.set(self.prompt_answer.get());
        }
        Ok(self.permission.get())
    }

    async fn register_transport(&self) -> Result<Rc<FakeHandle>, PlatformError> {
        if self.fail_register.get() {
            return Err(PlatformError::new("service worker registration failed"));
        }
        if let Some(handle) = self.handle.borrow().as_ref() {
            return Ok(Rc::clone(handle));
        }
        self.registrations.set(self.registrations.get() + 1);
        let handle = Rc::new(FakeHandle::default());
        *self.handle.borrow_mut() = Some(Rc::clone(&handle));
        Ok(handle)
    }

    async fn show_notification(
        &self,
        title: &str,
        options: &NotificationOptions,
    ) -> Result<(), PlatformError> {
        self.shown
            .borrow_mut()
            .push((title.to_string(), options.clone()));
        Ok(())
    }
}

/// Registration handle of a [`FakePlatform`].
#[derive(Debug, Default)]
pub struct FakeHandle {
    subscription: RefCell<Option<(Vec<u8>, Subscription)>>,
    created: Cell<usize>,
    subscribe_calls: Cell<usize>,
    fail_ready: Cell<bool>,
    fail_subscribe: Cell<bool>,
    fail_unsubscribe: Cell<bool>,
}

impl FakeHandle {
    /// Subscriptions actually created (reuse does not count).
    pub fn created(&self) -> usize {
        self.created.get()
    }

    /// Calls to `subscribe`, including ones that returned an existing one.
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.get()
    }

    /// Current subscription.
    pub fn current(&self) -> Option<Subscription> {
        self.subscription.borrow().as_ref().map(|(_, s)| s.clone())
    }

    /// Make `ready` fail.
    pub fn fail_ready(&self, fail: bool) {
        self.fail_ready.set(fail);
    }

    /// Make `subscribe` fail.
    pub fn fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.set(fail);
    }

    /// Make `unsubscribe` fail.
    pub fn fail_unsubscribe(&self, fail: bool) {
        self.fail_unsubscribe.set(fail);
    }
}

#[async_trait(?Send)]
impl TransportHandle for FakeHandle {
    async fn ready(&self) -> Result<(), PlatformError> {
        tokio::task::yield_now().await;
        if self.fail_ready.get() {
            return Err(PlatformError::new("registration never became active"));
        }
        Ok(())
    }

    async fn get_subscription(&self) -> Result<Option<Subscription>, PlatformError> {
        Ok(self.current())
    }

    async fn subscribe(&self, application_server_key: &[u8]) -> Result<Subscription, PlatformError> {
        self.subscribe_calls.set(self.subscribe_calls.get() + 1);
        tokio::task::yield_now().await;
        if self.fail_subscribe.get() {
            return Err(PlatformError::new("push service unavailable"));
        }

        let mut slot = self.subscription.borrow_mut();
        if let Some((key, existing)) = slot.as_ref() {
            if key.as_slice() == application_server_key {
                return Ok(existing.clone());
            }
            return Err(PlatformError::new(
                "a subscription with a different application server key already exists",
            ));
        }

        let n = self.created.get() + 1;
        self.created.set(n);
        let subscription = Subscription {
            endpoint: format!("https://push.example.test/send/{n}"),
            expiration_time: None,
            keys: SubscriptionKeys {
                p256dh: format!("p256dh-{n}"),
                auth: format!("auth-{n}"),
            },
        };
        *slot = Some((application_server_key.to_vec(), subscription.clone()));
        Ok(subscription)
    }

    async fn unsubscribe(&self, subscription: &Subscription) -> Result<bool, PlatformError> {
        if self.fail_unsubscribe.get() {
            return Err(PlatformError::new("unsubscribe rejected"));
        }
        let mut slot = self.subscription.borrow_mut();
        let matches = slot
            .as_ref()
            .is_some_and(|(_, current)| current.endpoint == subscription.endpoint);
        if matches {
            *slot = None;
        }
        Ok(matches)
    }
}
