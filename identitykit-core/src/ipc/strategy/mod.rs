//! Transports to the broker and the order they are tried in.

use std::{fmt, sync::Arc, time::Duration};

use super::{
    bundle::Bundle,
    error::{BrokerCommunicationError, StrategyType},
    operation::BrokerOperationBundle,
    platform::{AccountManagerClient, BrokerValidator, ContentResolver, ServiceBinder},
};
use crate::config::IpcSettings;

mod account_manager;
mod bound_service;
mod content_provider;
mod legacy;

pub use account_manager::{
    AccountManagerAddAccountStrategy, AccountManagerBackupStrategy, BROKER_ACCOUNT_MANAGER_OPERATION_KEY,
    BROKER_ACCOUNT_TYPE, CONTENT_PROVIDER_PATH_KEY, REQUEST_BUNDLE_KEY,
};
pub use bound_service::{BoundServiceStrategy, MICROSOFT_AUTH_SERVICE_CLASS};
pub use content_provider::ContentProviderStrategy;
pub use legacy::{
    LegacyAccountServiceStrategy, BROKER_ACCOUNT_SERVICE_ACTION, BROKER_ACCOUNT_SERVICE_CLASS,
};

/// One way of reaching the broker.
pub trait IpcStrategy: Send + Sync {
    /// Sends `bundle` to its target broker and returns the broker's reply.
    ///
    /// # Errors
    ///
    /// Every failure is a [`BrokerCommunicationError`], whatever the transport.
    fn communicate_to_broker(
        &self,
        bundle: &BrokerOperationBundle,
    ) -> Result<Option<Bundle>, BrokerCommunicationError>;

    /// Transport identifier.
    fn strategy_type(&self) -> StrategyType;

    /// Cheap capability check, run before committing to this transport.
    fn is_supported_by_targeted_broker(&self, package_name: &str) -> bool;
}

/// OS services available to build transports from. A missing service means
/// the transports that need it are never offered.
#[derive(Clone, Default)]
pub struct IpcPlatform {
    /// Service binding.
    pub binder: Option<Arc<dyn ServiceBinder>>,
    /// Content provider queries.
    pub content_resolver: Option<Arc<dyn ContentResolver>>,
    /// `AccountManager`.
    pub account_manager: Option<Arc<dyn AccountManagerClient>>,
    /// Broker signature validation.
    pub broker_validator: Option<Arc<dyn BrokerValidator>>,
}

impl fmt::Debug for IpcPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpcPlatform")
            .field("binder", &self.binder.is_some())
            .field("content_resolver", &self.content_resolver.is_some())
            .field("account_manager", &self.account_manager.is_some())
            .field("broker_validator", &self.broker_validator.is_some())
            .finish()
    }
}

/// Ordered list of candidate transports.
#[derive(Clone, Default)]
pub struct StrategySelector {
    strategies: Vec<Arc<dyn IpcStrategy>>,
}

impl StrategySelector {
    /// An empty selector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `strategy` at the lowest priority.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Arc<dyn IpcStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// The standard order: bound service, content provider, account manager
    /// add-account, account manager backup, legacy account service.
    #[must_use]
    pub fn from_platform(platform: &IpcPlatform, settings: &IpcSettings) -> Self {
        let mut selector = Self::new();
        if let Some(binder) = &platform.binder {
            selector = selector.with_strategy(Arc::new(BoundServiceStrategy::new(
                Arc::clone(binder),
                Duration::from_millis(settings.bound_service_timeout_ms),
            )));
        }
        if let Some(resolver) = &platform.content_resolver {
            selector =
                selector.with_strategy(Arc::new(ContentProviderStrategy::new(Arc::clone(resolver))));
        }
        if let Some(account_manager) = &platform.account_manager {
            selector = selector.with_strategy(Arc::new(AccountManagerAddAccountStrategy::new(
                Arc::clone(account_manager),
                Duration::from_millis(settings.account_manager_timeout_ms),
            )));
            if let Some(validator) = &platform.broker_validator {
                selector = selector.with_strategy(Arc::new(AccountManagerBackupStrategy::new(
                    Arc::clone(account_manager),
                    Arc::clone(validator),
                    Duration::from_millis(settings.account_manager_timeout_ms),
                )));
            }
        }
        if let Some(binder) = &platform.binder {
            selector = selector.with_strategy(Arc::new(LegacyAccountServiceStrategy::new(
                Arc::clone(binder),
                Duration::from_millis(settings.bound_service_timeout_ms),
            )));
        }
        selector
    }

    /// Transports that report support for `package_name`, in priority order.
    #[must_use]
    pub fn select(&self, package_name: &str) -> Vec<Arc<dyn IpcStrategy>> {
        let selected: Vec<_> = self
            .strategies
            .iter()
            .filter(|strategy| {
                let supported = strategy.is_supported_by_targeted_broker(package_name);
                if !supported {
                    tracing::debug!(
                        strategy = %strategy.strategy_type(),
                        package = package_name,
                        "transport not supported by target broker"
                    );
                }
                supported
            })
            .cloned()
            .collect();
        tracing::info!(
            package = package_name,
            strategies = ?selected.iter().map(|s| s.strategy_type()).collect::<Vec<_>>(),
            "selected broker transports"
        );
        selected
    }

    /// Every configured transport, supported or not.
    #[must_use]
    pub fn strategy_types(&self) -> Vec<StrategyType> {
        self.strategies.iter().map(|s| s.strategy_type()).collect()
    }
}

impl fmt::Debug for StrategySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategySelector")
            .field("strategies", &self.strategy_types())
            .finish()
    }
}
