//! Scripted fakes of the IPC platform services.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use super::{
    bundle::Bundle,
    platform::{
        AccountManagerClient, AuthenticatorDescription, BrokerValidator, ContentResolver, Cursor,
        PackageInspector, RemoteError, ServiceBinder, ServiceConnection, ServiceTarget,
    },
};

type Reply = Result<Option<Bundle>, String>;

fn next_reply(replies: &Mutex<VecDeque<Reply>>) -> Result<Option<Bundle>, RemoteError> {
    replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(Ok(None))
        .map_err(RemoteError)
}

#[derive(Default)]
struct BinderState {
    exported: HashSet<(String, String)>,
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<String>>,
    open: AtomicUsize,
    binds: AtomicUsize,
}

/// Binder whose services answer from a reply queue.
#[derive(Default)]
pub struct FakeBinder {
    state: Arc<Mutex<BinderState>>,
}

impl FakeBinder {
    pub fn export(&self, package_name: &str, class_name: &str) {
        self.state
            .lock()
            .unwrap()
            .exported
            .insert((package_name.to_string(), class_name.to_string()));
    }

    pub fn respond_with(&self, reply: Reply) {
        self.state.lock().unwrap().replies.lock().unwrap().push_back(reply);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.lock().unwrap().clone()
    }

    pub fn open_connections(&self) -> usize {
        self.state.lock().unwrap().open.load(Ordering::SeqCst)
    }

    pub fn bind_count(&self) -> usize {
        self.state.lock().unwrap().binds.load(Ordering::SeqCst)
    }
}

impl ServiceBinder for FakeBinder {
    fn supports(&self, target: &ServiceTarget) -> bool {
        self.state
            .lock()
            .unwrap()
            .exported
            .contains(&(target.package_name.clone(), target.class_name.clone()))
    }

    fn bind(
        &self,
        target: &ServiceTarget,
        _timeout: Duration,
    ) -> Result<Box<dyn ServiceConnection>, RemoteError> {
        let state = self.state.lock().unwrap();
        state.binds.fetch_add(1, Ordering::SeqCst);
        if !state
            .exported
            .contains(&(target.package_name.clone(), target.class_name.clone()))
        {
            return Err(RemoteError("bindService returned false".to_string()));
        }
        state.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeConnection {
    state: Arc<Mutex<BinderState>>,
}

impl ServiceConnection for FakeConnection {
    fn call(&self, method: &str, _request: &Bundle) -> Result<Option<Bundle>, RemoteError> {
        let state = self.state.lock().unwrap();
        state.calls.lock().unwrap().push(method.to_string());
        next_reply(&state.replies)
    }

    fn unbind(&self) {
        self.state.lock().unwrap().open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Content resolver answering from a reply queue.
#[derive(Default)]
pub struct FakeResolver {
    providers: Mutex<HashSet<String>>,
    replies: Mutex<VecDeque<Result<Option<Cursor>, String>>>,
    queries: Mutex<Vec<(String, String)>>,
}

impl FakeResolver {
    pub fn register_provider(&self, authority: &str) {
        self.providers.lock().unwrap().insert(authority.to_string());
    }

    pub fn respond_with(&self, reply: Result<Option<Cursor>, String>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn queries(&self) -> Vec<(String, String)> {
        self.queries.lock().unwrap().clone()
    }
}

impl ContentResolver for FakeResolver {
    fn provider_exists(&self, authority: &str) -> bool {
        self.providers.lock().unwrap().contains(authority)
    }

    fn query(&self, uri: &str, selection: &str) -> Result<Option<Cursor>, RemoteError> {
        self.queries
            .lock()
            .unwrap()
            .push((uri.to_string(), selection.to_string()));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(None))
            .map_err(RemoteError)
    }
}

/// `AccountManager` answering from a reply queue.
#[derive(Default)]
pub struct FakeAccountManager {
    authenticators: Mutex<Vec<AuthenticatorDescription>>,
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<(String, Bundle)>>,
}

impl FakeAccountManager {
    pub fn register_authenticator(&self, description: AuthenticatorDescription) {
        self.authenticators.lock().unwrap().push(description);
    }

    pub fn respond_with(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn requests(&self) -> Vec<(String, Bundle)> {
        self.requests.lock().unwrap().clone()
    }
}

impl AccountManagerClient for FakeAccountManager {
    fn add_account(
        &self,
        account_type: &str,
        options: &Bundle,
        _timeout: Duration,
    ) -> Result<Option<Bundle>, RemoteError> {
        self.requests
            .lock()
            .unwrap()
            .push((account_type.to_string(), options.clone()));
        next_reply(&self.replies)
    }

    fn authenticator_types(&self) -> Vec<AuthenticatorDescription> {
        self.authenticators.lock().unwrap().clone()
    }
}

pub struct FakeValidator(bool);

impl FakeValidator {
    pub const fn accepting() -> Self {
        Self(true)
    }

    pub const fn rejecting() -> Self {
        Self(false)
    }
}

impl BrokerValidator for FakeValidator {
    fn is_valid_broker_package(&self, _package_name: &str) -> bool {
        self.0
    }
}

/// Installed packages and their version codes.
#[derive(Default)]
pub struct FakePackages(Mutex<HashMap<String, String>>);

impl FakePackages {
    pub fn install(&self, package_name: &str, version_code: &str) {
        self.0
            .lock()
            .unwrap()
            .insert(package_name.to_string(), version_code.to_string());
    }

    pub fn uninstall(&self, package_name: &str) {
        self.0.lock().unwrap().remove(package_name);
    }
}

impl PackageInspector for FakePackages {
    fn version_code(&self, package_name: &str) -> Option<String> {
        self.0.lock().unwrap().get(package_name).cloned()
    }
}
