use std::{sync::Arc, time::Duration};

use crate::{
    defaults::{AUTHENTICATOR_PACKAGE, COMPANY_PORTAL_PACKAGE, LINK_TO_WINDOWS_PACKAGE},
    ipc::{
        bundle::Bundle,
        error::{BrokerCommunicationError, CommunicationErrorCategory, StrategyType},
        operation::BrokerOperationBundle,
        platform::{AccountManagerClient, BrokerValidator},
    },
};

use super::IpcStrategy;

/// Account type the broker's `AccountManager` authenticator is registered for.
pub const BROKER_ACCOUNT_TYPE: &str = "com.microsoft.workaccount";

/// Options key carrying the operation for the add-account transport.
pub const BROKER_ACCOUNT_MANAGER_OPERATION_KEY: &str =
    "com.microsoft.broker_accountmanager_operation_key";

/// Options key carrying the request bundle for the backup transport.
pub const REQUEST_BUNDLE_KEY: &str = "REQUEST_BUNDLE";

/// Options key carrying the content provider path for the backup transport.
pub const CONTENT_PROVIDER_PATH_KEY: &str = "CONTENT_PROVIDER_PATH";

const LTW_BACKUP_ACCOUNT_TYPE: &str = "com.microsoft.ltwpassthroughbackup";
const CP_BACKUP_ACCOUNT_TYPE: &str = "com.microsoft.cppassthroughbackup";
const AUTHAPP_BACKUP_ACCOUNT_TYPE: &str = "com.microsoft.authapppassthroughbackup";

fn connection_error(
    strategy_type: StrategyType,
    err: impl std::error::Error + Send + Sync + 'static,
) -> BrokerCommunicationError {
    BrokerCommunicationError::new(
        CommunicationErrorCategory::ConnectionError,
        strategy_type,
        format!("AccountManager failed to respond - {err}"),
    )
    .with_source(err)
}

/// Sends the operation through `AccountManager.addAccount` on the broker
/// account type.
pub struct AccountManagerAddAccountStrategy {
    account_manager: Arc<dyn AccountManagerClient>,
    timeout: Duration,
}

impl AccountManagerAddAccountStrategy {
    /// Creates the transport.
    #[must_use]
    pub fn new(account_manager: Arc<dyn AccountManagerClient>, timeout: Duration) -> Self {
        Self {
            account_manager,
            timeout,
        }
    }
}

impl IpcStrategy for AccountManagerAddAccountStrategy {
    fn communicate_to_broker(
        &self,
        bundle: &BrokerOperationBundle,
    ) -> Result<Option<Bundle>, BrokerCommunicationError> {
        let Some(operation_key) = bundle.operation.account_manager_operation() else {
            return Err(BrokerCommunicationError::new(
                CommunicationErrorCategory::OperationNotSupportedOnClientSide,
                self.strategy_type(),
                format!("{} has no account manager operation", bundle.operation),
            ));
        };

        let mut options = bundle.payload.clone();
        options.put_string(BROKER_ACCOUNT_MANAGER_OPERATION_KEY, operation_key);
        self.account_manager
            .add_account(BROKER_ACCOUNT_TYPE, &options, self.timeout)
            .map_err(|err| connection_error(self.strategy_type(), err))
    }

    fn strategy_type(&self) -> StrategyType {
        StrategyType::AccountManagerAddAccount
    }

    fn is_supported_by_targeted_broker(&self, _package_name: &str) -> bool {
        true
    }
}

/// Passthrough over a per-app `AccountManager` account type, for brokers
/// whose content provider cannot be reached (e.g. blocked by package
/// visibility rules). Targets exactly one broker app per call.
pub struct AccountManagerBackupStrategy {
    account_manager: Arc<dyn AccountManagerClient>,
    validator: Arc<dyn BrokerValidator>,
    timeout: Duration,
}

impl AccountManagerBackupStrategy {
    /// Creates the transport.
    #[must_use]
    pub fn new(
        account_manager: Arc<dyn AccountManagerClient>,
        validator: Arc<dyn BrokerValidator>,
        timeout: Duration,
    ) -> Self {
        Self {
            account_manager,
            validator,
            timeout,
        }
    }

    /// Backup account type registered by `package_name`.
    #[must_use]
    pub fn account_type_for(package_name: &str) -> Option<&'static str> {
        match package_name {
            LINK_TO_WINDOWS_PACKAGE => Some(LTW_BACKUP_ACCOUNT_TYPE),
            COMPANY_PORTAL_PACKAGE => Some(CP_BACKUP_ACCOUNT_TYPE),
            AUTHENTICATOR_PACKAGE => Some(AUTHAPP_BACKUP_ACCOUNT_TYPE),
            _ => None,
        }
    }

    /// Checks that `account_type` is owned by `package_name` and that the
    /// package is a genuine broker.
    fn validate_target(
        &self,
        package_name: &str,
        account_type: &str,
    ) -> Result<(), BrokerCommunicationError> {
        let owned = self
            .account_manager
            .authenticator_types()
            .iter()
            .any(|desc| desc.package_name == package_name && desc.account_type == account_type);
        if !owned {
            return Err(BrokerCommunicationError::new(
                CommunicationErrorCategory::ValidationError,
                self.strategy_type(),
                format!("{package_name} doesn't support account manager backup ipc."),
            ));
        }
        if !self.validator.is_valid_broker_package(package_name) {
            return Err(BrokerCommunicationError::new(
                CommunicationErrorCategory::ValidationError,
                self.strategy_type(),
                format!("{package_name} is not a valid broker app."),
            ));
        }
        Ok(())
    }
}

impl IpcStrategy for AccountManagerBackupStrategy {
    fn communicate_to_broker(
        &self,
        bundle: &BrokerOperationBundle,
    ) -> Result<Option<Bundle>, BrokerCommunicationError> {
        let target = bundle.target_broker_package_name.as_str();
        let Some(account_type) = Self::account_type_for(target) else {
            return Err(BrokerCommunicationError::new(
                CommunicationErrorCategory::OperationNotSupportedOnClientSide,
                self.strategy_type(),
                format!("AccountManagerBackupStrategy doesn't recognize {target} as a broker"),
            ));
        };
        self.validate_target(target, account_type)?;

        let Some(path) = bundle.operation.content_provider_path() else {
            return Err(BrokerCommunicationError::new(
                CommunicationErrorCategory::OperationNotSupportedOnClientSide,
                self.strategy_type(),
                format!("{} has no content provider path", bundle.operation),
            ));
        };

        // Wire layout shared with already-shipped brokers; do not change.
        let mut options = Bundle::new();
        options.put_bundle(REQUEST_BUNDLE_KEY, bundle.payload.clone());
        options.put_string(CONTENT_PROVIDER_PATH_KEY, path);

        self.account_manager
            .add_account(account_type, &options, self.timeout)
            .map_err(|err| {
                tracing::error!(error = %err, package = target, "account manager backup call failed");
                connection_error(self.strategy_type(), err)
            })
    }

    fn strategy_type(&self) -> StrategyType {
        StrategyType::AccountManagerBackup
    }

    fn is_supported_by_targeted_broker(&self, package_name: &str) -> bool {
        let Some(account_type) = Self::account_type_for(package_name) else {
            tracing::info!(package = package_name, "not a known backup ipc broker");
            return false;
        };
        match self.validate_target(package_name, account_type) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, "account manager backup ipc unavailable");
                false
            }
        }
    }
}
