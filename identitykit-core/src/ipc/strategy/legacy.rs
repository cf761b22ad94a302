use std::{sync::Arc, time::Duration};

use crate::ipc::{
    bundle::Bundle,
    error::{BrokerCommunicationError, CommunicationErrorCategory, StrategyType},
    operation::BrokerOperationBundle,
    platform::{ServiceBinder, ServiceTarget},
};

use super::{bound_service::call_bound_service, IpcStrategy};

/// Service class of the ADAL-era broker account service.
pub const BROKER_ACCOUNT_SERVICE_CLASS: &str = "com.microsoft.aad.adal.BrokerAccountService";

/// Intent action the legacy service filters on.
pub const BROKER_ACCOUNT_SERVICE_ACTION: &str = "com.microsoft.workaccount.BrokerAccount";

/// Talks to brokers that only ship the ADAL `BrokerAccountService`.
pub struct LegacyAccountServiceStrategy {
    binder: Arc<dyn ServiceBinder>,
    timeout: Duration,
}

impl LegacyAccountServiceStrategy {
    /// Creates the transport.
    #[must_use]
    pub fn new(binder: Arc<dyn ServiceBinder>, timeout: Duration) -> Self {
        Self { binder, timeout }
    }

    fn target(package_name: &str) -> ServiceTarget {
        ServiceTarget {
            package_name: package_name.to_string(),
            class_name: BROKER_ACCOUNT_SERVICE_CLASS.to_string(),
            action: Some(BROKER_ACCOUNT_SERVICE_ACTION.to_string()),
        }
    }
}

impl IpcStrategy for LegacyAccountServiceStrategy {
    fn communicate_to_broker(
        &self,
        bundle: &BrokerOperationBundle,
    ) -> Result<Option<Bundle>, BrokerCommunicationError> {
        let Some(method) = bundle.operation.legacy_account_service_method() else {
            return Err(BrokerCommunicationError::new(
                CommunicationErrorCategory::OperationNotSupportedOnClientSide,
                self.strategy_type(),
                format!("{} is not supported by the legacy account service", bundle.operation),
            ));
        };
        call_bound_service(
            self.binder.as_ref(),
            &Self::target(&bundle.target_broker_package_name),
            self.timeout,
            method,
            &bundle.payload,
            self.strategy_type(),
        )
    }

    fn strategy_type(&self) -> StrategyType {
        StrategyType::LegacyAccountService
    }

    fn is_supported_by_targeted_broker(&self, package_name: &str) -> bool {
        self.binder.supports(&Self::target(package_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::{operation::Operation, testing::FakeBinder};

    #[test]
    fn test_dispatches_legacy_method_name() {
        let binder = Arc::new(FakeBinder::default());
        binder.export("com.azure.authenticator", BROKER_ACCOUNT_SERVICE_CLASS);
        binder.respond_with(Ok(Some(Bundle::new())));

        let strategy = LegacyAccountServiceStrategy::new(binder.clone(), Duration::from_secs(1));
        strategy
            .communicate_to_broker(&BrokerOperationBundle::new(
                Operation::BrokerGetKeyFromInactiveBroker,
                "com.azure.authenticator",
                Bundle::new(),
            ))
            .expect("call");
        assert_eq!(binder.calls(), vec!["getInactiveBrokerKey".to_string()]);
        assert_eq!(binder.open_connections(), 0);
    }

    #[test]
    fn test_msal_only_operation_is_client_side() {
        let binder = Arc::new(FakeBinder::default());
        binder.export("com.azure.authenticator", BROKER_ACCOUNT_SERVICE_CLASS);
        let strategy = LegacyAccountServiceStrategy::new(binder.clone(), Duration::from_secs(1));
        let err = strategy
            .communicate_to_broker(&BrokerOperationBundle::new(
                Operation::MsalGenerateShr,
                "com.azure.authenticator",
                Bundle::new(),
            ))
            .expect_err("unmapped");
        assert_eq!(
            err.category,
            CommunicationErrorCategory::OperationNotSupportedOnClientSide
        );
        assert_eq!(binder.bind_count(), 0);
    }
}
