use std::{sync::Arc, time::Duration};

use crate::ipc::{
    bundle::Bundle,
    error::{BrokerCommunicationError, CommunicationErrorCategory, StrategyType},
    operation::BrokerOperationBundle,
    platform::{ServiceBinder, ServiceConnection, ServiceTarget},
};

use super::IpcStrategy;

/// Service class of the MSAL broker's bound service.
pub const MICROSOFT_AUTH_SERVICE_CLASS: &str =
    "com.microsoft.workaccount.brokeraccount.MicrosoftAuthService";

/// Unbinds on drop, so the binding is released on every exit path.
struct BoundConnection(Box<dyn ServiceConnection>);

impl Drop for BoundConnection {
    fn drop(&mut self) {
        self.0.unbind();
    }
}

/// Binds to `target`, calls `method` once and releases the binding.
pub(super) fn call_bound_service(
    binder: &dyn ServiceBinder,
    target: &ServiceTarget,
    timeout: Duration,
    method: &str,
    request: &Bundle,
    strategy_type: StrategyType,
) -> Result<Option<Bundle>, BrokerCommunicationError> {
    if !binder.supports(target) {
        return Err(BrokerCommunicationError::new(
            CommunicationErrorCategory::OperationNotSupportedOnServerSide,
            strategy_type,
            format!(
                "{} does not export {}",
                target.package_name, target.class_name
            ),
        ));
    }

    let connection = binder.bind(target, timeout).map(BoundConnection).map_err(|err| {
        BrokerCommunicationError::new(
            CommunicationErrorCategory::ConnectionError,
            strategy_type,
            format!("failed to bind to {}", target.class_name),
        )
        .with_source(err)
    })?;

    tracing::debug!(service = %target.class_name, method, "calling bound service");
    connection.0.call(method, request).map_err(|err| {
        BrokerCommunicationError::new(
            CommunicationErrorCategory::ConnectionError,
            strategy_type,
            format!("{method} failed"),
        )
        .with_source(err)
    })
}

/// Talks to the broker's `MicrosoftAuthService`.
pub struct BoundServiceStrategy {
    binder: Arc<dyn ServiceBinder>,
    timeout: Duration,
}

impl BoundServiceStrategy {
    /// Creates the transport.
    #[must_use]
    pub fn new(binder: Arc<dyn ServiceBinder>, timeout: Duration) -> Self {
        Self { binder, timeout }
    }

    fn target(package_name: &str) -> ServiceTarget {
        ServiceTarget {
            package_name: package_name.to_string(),
            class_name: MICROSOFT_AUTH_SERVICE_CLASS.to_string(),
            action: None,
        }
    }
}

impl IpcStrategy for BoundServiceStrategy {
    fn communicate_to_broker(
        &self,
        bundle: &BrokerOperationBundle,
    ) -> Result<Option<Bundle>, BrokerCommunicationError> {
        let Some(method) = bundle.operation.account_manager_operation() else {
            return Err(BrokerCommunicationError::new(
                CommunicationErrorCategory::OperationNotSupportedOnClientSide,
                self.strategy_type(),
                format!("{} is not supported by the bound service", bundle.operation),
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
        StrategyType::BoundService
    }

    fn is_supported_by_targeted_broker(&self, package_name: &str) -> bool {
        self.binder.supports(&Self::target(package_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::{operation::Operation, testing::FakeBinder};

    const AUTHENTICATOR: &str = "com.azure.authenticator";

    fn strategy(binder: &Arc<FakeBinder>) -> BoundServiceStrategy {
        BoundServiceStrategy::new(binder.clone(), Duration::from_secs(30))
    }

    #[test]
    fn test_call_unbinds_after_success() {
        let binder = Arc::new(FakeBinder::default());
        binder.export(AUTHENTICATOR, MICROSOFT_AUTH_SERVICE_CLASS);
        binder.respond_with(Ok(Some(Bundle::new().with_string("ok", "1"))));

        let reply = strategy(&binder)
            .communicate_to_broker(&BrokerOperationBundle::new(
                Operation::MsalGetAccounts,
                AUTHENTICATOR,
                Bundle::new(),
            ))
            .expect("call");
        assert_eq!(reply.expect("reply").get_string("ok"), Some("1"));
        assert_eq!(binder.calls(), vec!["GET_ACCOUNTS".to_string()]);
        assert_eq!(binder.open_connections(), 0);
    }

    #[test]
    fn test_call_unbinds_after_failure() {
        let binder = Arc::new(FakeBinder::default());
        binder.export(AUTHENTICATOR, MICROSOFT_AUTH_SERVICE_CLASS);
        binder.respond_with(Err("DeadObjectException".to_string()));

        let err = strategy(&binder)
            .communicate_to_broker(&BrokerOperationBundle::new(
                Operation::MsalAcquireTokenSilent,
                AUTHENTICATOR,
                Bundle::new(),
            ))
            .expect_err("call must fail");
        assert_eq!(err.category, CommunicationErrorCategory::ConnectionError);
        assert_eq!(binder.open_connections(), 0);
    }

    #[test]
    fn test_unmapped_operation_fails_before_binding() {
        let binder = Arc::new(FakeBinder::default());
        binder.export(AUTHENTICATOR, MICROSOFT_AUTH_SERVICE_CLASS);

        let err = strategy(&binder)
            .communicate_to_broker(&BrokerOperationBundle::new(
                Operation::BrokerApiUpdateBrt,
                AUTHENTICATOR,
                Bundle::new(),
            ))
            .expect_err("unmapped");
        assert_eq!(
            err.category,
            CommunicationErrorCategory::OperationNotSupportedOnClientSide
        );
        assert_eq!(binder.bind_count(), 0);
    }

    #[test]
    fn test_missing_service_is_server_side() {
        let binder = Arc::new(FakeBinder::default());
        let strategy = strategy(&binder);
        assert!(!strategy.is_supported_by_targeted_broker(AUTHENTICATOR));
        let err = strategy
            .communicate_to_broker(&BrokerOperationBundle::new(
                Operation::MsalHello,
                AUTHENTICATOR,
                Bundle::new(),
            ))
            .expect_err("not exported");
        assert_eq!(
            err.category,
            CommunicationErrorCategory::OperationNotSupportedOnServerSide
        );
    }
}
