//! OS services the transports are built on.
//!
//! On Android these are thin wrappers over `Context.bindService`,
//! `ContentResolver`, `AccountManager` and `PackageManager`. Tests provide
//! scripted fakes.

use std::time::Duration;

use thiserror::Error;

use super::bundle::Bundle;

/// A failure reported by the OS or by the remote process.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct RemoteError(pub String);

/// A service component exported by a broker app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTarget {
    /// Package exporting the service.
    pub package_name: String,
    /// Fully qualified service class.
    pub class_name: String,
    /// Intent action, for services that filter on one.
    pub action: Option<String>,
}

/// Binds to services in other apps.
pub trait ServiceBinder: Send + Sync {
    /// Whether `target` resolves to an exported service.
    fn supports(&self, target: &ServiceTarget) -> bool;

    /// Binds to `target`, waiting at most `timeout` for the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the service does not bind in time.
    fn bind(
        &self,
        target: &ServiceTarget,
        timeout: Duration,
    ) -> Result<Box<dyn ServiceConnection>, RemoteError>;
}

/// A live service binding. Must be released with [`ServiceConnection::unbind`].
pub trait ServiceConnection: Send {
    /// Invokes `method` on the remote service.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call throws or the binder dies.
    fn call(&self, method: &str, request: &Bundle) -> Result<Option<Bundle>, RemoteError>;

    /// Releases the binding.
    fn unbind(&self);
}

/// Result row of a content provider query. Only the extras are used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursor {
    /// Extras bundle attached to the cursor.
    pub extras: Option<Bundle>,
}

/// Queries content providers of other apps.
pub trait ContentResolver: Send + Sync {
    /// Whether a provider is registered under `authority`.
    fn provider_exists(&self, authority: &str) -> bool;

    /// Queries `uri` with `selection`. `Ok(None)` is a null cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider throws.
    fn query(&self, uri: &str, selection: &str) -> Result<Option<Cursor>, RemoteError>;
}

/// An `AccountManager` authenticator registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorDescription {
    /// Account type the authenticator handles.
    pub account_type: String,
    /// Package owning the authenticator.
    pub package_name: String,
}

/// The subset of `AccountManager` the transports use.
pub trait AccountManagerClient: Send + Sync {
    /// Calls `addAccount` for `account_type` and waits for its result.
    ///
    /// # Errors
    ///
    /// Returns an error if the authenticator fails or the call times out.
    fn add_account(
        &self,
        account_type: &str,
        options: &Bundle,
        timeout: Duration,
    ) -> Result<Option<Bundle>, RemoteError>;

    /// Every registered authenticator.
    fn authenticator_types(&self) -> Vec<AuthenticatorDescription>;
}

/// Signature check of broker apps.
pub trait BrokerValidator: Send + Sync {
    /// Whether `package_name` is signed as a genuine broker.
    fn is_valid_broker_package(&self, package_name: &str) -> bool;
}

/// Installed package metadata.
pub trait PackageInspector: Send + Sync {
    /// Version code of `package_name`, or `None` when it is not installed.
    fn version_code(&self, package_name: &str) -> Option<String>;
}
