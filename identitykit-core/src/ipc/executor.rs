//! Runs a broker operation over the first transport that works.

use std::sync::{Arc, Mutex};

use super::{
    bundle::Bundle,
    error::{BrokerCommunicationError, BrokerError},
    hello::{HelloNegotiator, ERROR_DESCRIPTION_KEY, ERROR_KEY, NEGOTIATED_BP_VERSION_KEY},
    operation::{BrokerOperationBundle, Operation},
    strategy::{IpcStrategy, StrategySelector},
};
use crate::diagnostics::DiagnosticContext;

/// A typed broker call.
///
/// The executor calls, per transport: [`BrokerOperation::perform_prerequisites`],
/// [`BrokerOperation::bundle`], the transport, then
/// [`BrokerOperation::extract_result`].
pub trait BrokerOperation {
    /// Decoded result.
    type Output;

    /// Work that must succeed on `strategy` before the call itself, such as
    /// the hello handshake.
    ///
    /// # Errors
    ///
    /// A [`BrokerError::Communication`] makes the executor try the next
    /// transport. Any other error ends the execution.
    fn perform_prerequisites(&self, strategy: &dyn IpcStrategy) -> Result<(), BrokerError>;

    /// The request to send.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be built.
    fn bundle(&self) -> Result<BrokerOperationBundle, BrokerError>;

    /// Decodes the broker's reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the reply is an error or cannot be interpreted.
    fn extract_result(&self, result: Option<Bundle>) -> Result<Self::Output, BrokerError>;

    /// Name used in logs.
    fn method_name(&self) -> &'static str;

    /// Package of the broker app the operation is addressed to.
    fn target_package(&self) -> &str;
}

/// Tries each transport in order until one completes.
pub struct BrokerOperationExecutor {
    strategies: Vec<Arc<dyn IpcStrategy>>,
}

impl BrokerOperationExecutor {
    /// Creates an executor over `strategies`, tried in the given order.
    #[must_use]
    pub fn new(strategies: Vec<Arc<dyn IpcStrategy>>) -> Self {
        Self { strategies }
    }

    /// An executor over the transports `selector` offers for `package_name`.
    #[must_use]
    pub fn for_package(selector: &StrategySelector, package_name: &str) -> Self {
        Self::new(selector.select(package_name))
    }

    /// Runs `operation`.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::BindServiceFailed`] if no transport was available or
    ///   every transport failed. Each transport failure is attached.
    /// - Any non-transport error raised by `operation`, unchanged.
    pub fn execute<O: BrokerOperation>(
        &self,
        context: &DiagnosticContext,
        operation: &O,
    ) -> Result<O::Output, BrokerError> {
        let span = context.span(operation.method_name());
        span.record("target_package", operation.target_package());
        let _entered = span.enter();

        if self.strategies.is_empty() {
            tracing::error!("no IPC strategy available");
            return Err(BrokerError::BindServiceFailed {
                failures: Vec::new(),
            });
        }

        let mut failures: Vec<BrokerCommunicationError> = Vec::new();
        for strategy in &self.strategies {
            match Self::execute_with(strategy.as_ref(), operation) {
                Ok(output) => {
                    tracing::info!(strategy = %strategy.strategy_type(), "broker operation succeeded");
                    return Ok(output);
                }
                Err(BrokerError::Communication(err)) => {
                    tracing::warn!(
                        strategy = %strategy.strategy_type(),
                        category = %err.category,
                        error = %err.message,
                        "transport failed, trying next",
                    );
                    failures.push(err);
                }
                Err(err) => return Err(err),
            }
        }

        tracing::error!(attempts = failures.len(), "unable to connect to the broker");
        Err(BrokerError::BindServiceFailed { failures })
    }

    fn execute_with<O: BrokerOperation>(
        strategy: &dyn IpcStrategy,
        operation: &O,
    ) -> Result<O::Output, BrokerError> {
        operation.perform_prerequisites(strategy)?;
        let bundle = operation.bundle()?;
        let result = strategy.communicate_to_broker(&bundle)?;
        operation.extract_result(result)
    }
}

/// A plain request-reply operation with an optional hello beforehand. The
/// negotiated protocol version is sent along with the payload.
pub struct BrokerRequest<'a> {
    operation: Operation,
    target_package: String,
    payload: Bundle,
    hello: Option<&'a HelloNegotiator>,
    negotiated_version: Mutex<Option<String>>,
}

impl<'a> BrokerRequest<'a> {
    /// Creates a request without a hello.
    #[must_use]
    pub fn new(operation: Operation, target_package: impl Into<String>, payload: Bundle) -> Self {
        Self {
            operation,
            target_package: target_package.into(),
            payload,
            hello: None,
            negotiated_version: Mutex::new(None),
        }
    }

    /// Negotiates a protocol version with `hello` on each transport before
    /// sending.
    #[must_use]
    pub const fn with_hello(mut self, hello: &'a HelloNegotiator) -> Self {
        self.hello = Some(hello);
        self
    }

    /// Version agreed by the last successful hello.
    #[must_use]
    pub fn negotiated_version(&self) -> Option<String> {
        self.negotiated_version
            .lock()
            .ok()
            .and_then(|version| version.clone())
    }
}

impl BrokerOperation for BrokerRequest<'_> {
    type Output = Bundle;

    fn perform_prerequisites(&self, strategy: &dyn IpcStrategy) -> Result<(), BrokerError> {
        let Some(hello) = self.hello else {
            return Ok(());
        };
        let version = hello.negotiate(strategy, &self.target_package)?;
        if let Ok(mut negotiated) = self.negotiated_version.lock() {
            *negotiated = Some(version);
        }
        Ok(())
    }

    fn bundle(&self) -> Result<BrokerOperationBundle, BrokerError> {
        let mut payload = self.payload.clone();
        if let Some(version) = self.negotiated_version() {
            payload.put_string(NEGOTIATED_BP_VERSION_KEY, version);
        }
        Ok(BrokerOperationBundle::new(
            self.operation,
            self.target_package.clone(),
            payload,
        ))
    }

    fn extract_result(&self, result: Option<Bundle>) -> Result<Bundle, BrokerError> {
        let Some(result) = result else {
            return Err(BrokerError::InvalidResponse(format!(
                "{} returned no result",
                self.operation
            )));
        };
        if let Some(code) = result.get_string(ERROR_KEY) {
            return Err(BrokerError::Remote {
                code: code.to_string(),
                description: result
                    .get_string(ERROR_DESCRIPTION_KEY)
                    .unwrap_or_default()
                    .to_string(),
            });
        }
        Ok(result)
    }

    fn method_name(&self) -> &'static str {
        self.operation.into()
    }

    fn target_package(&self) -> &str {
        &self.target_package
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;
    use crate::ipc::{
        error::{CommunicationErrorCategory, StrategyType},
        hello::HelloRequest,
        platform::Cursor,
        strategy::{BoundServiceStrategy, ContentProviderStrategy, MICROSOFT_AUTH_SERVICE_CLASS},
        testing::{FakeBinder, FakeResolver},
    };

    const BROKER: &str = "com.azure.authenticator";

    /// Transport that fails with a fixed category.
    struct Broken(StrategyType, AtomicUsize);

    impl IpcStrategy for Broken {
        fn communicate_to_broker(
            &self,
            _bundle: &BrokerOperationBundle,
        ) -> Result<Option<Bundle>, BrokerCommunicationError> {
            self.1.fetch_add(1, Ordering::SeqCst);
            Err(BrokerCommunicationError::new(
                CommunicationErrorCategory::ConnectionError,
                self.0,
                "dead object",
            ))
        }

        fn strategy_type(&self) -> StrategyType {
            self.0
        }

        fn is_supported_by_targeted_broker(&self, _package_name: &str) -> bool {
            true
        }
    }

    fn accounts_request() -> BrokerRequest<'static> {
        BrokerRequest::new(Operation::MsalGetAccounts, BROKER, Bundle::new())
    }

    #[test]
    fn test_empty_strategy_list_fails_to_bind() {
        let executor = BrokerOperationExecutor::new(Vec::new());
        match executor.execute(&DiagnosticContext::new(), &accounts_request()) {
            Err(BrokerError::BindServiceFailed { failures }) => assert!(failures.is_empty()),
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn test_falls_through_to_next_strategy() {
        let broken = Arc::new(Broken(StrategyType::BoundService, AtomicUsize::new(0)));
        let resolver = Arc::new(FakeResolver::default());
        resolver.respond_with(Ok(Some(Cursor {
            extras: Some(Bundle::new().with_string("accounts", "[]")),
        })));
        let executor = BrokerOperationExecutor::new(vec![
            broken.clone(),
            Arc::new(ContentProviderStrategy::new(resolver)),
        ]);

        let reply = executor
            .execute(&DiagnosticContext::new(), &accounts_request())
            .expect("second transport answers");
        assert_eq!(reply.get_string("accounts"), Some("[]"));
        assert_eq!(broken.1.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_all_failures_are_attached_in_order() {
        let executor = BrokerOperationExecutor::new(vec![
            Arc::new(Broken(StrategyType::BoundService, AtomicUsize::new(0))),
            Arc::new(Broken(StrategyType::ContentProvider, AtomicUsize::new(0))),
        ]);
        match executor.execute(&DiagnosticContext::new(), &accounts_request()) {
            Err(BrokerError::BindServiceFailed { failures }) => {
                let types: Vec<_> = failures.iter().map(|f| f.strategy_type).collect();
                assert_eq!(types, vec![StrategyType::BoundService, StrategyType::ContentProvider]);
            }
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn test_remote_error_stops_execution() {
        let resolver = Arc::new(FakeResolver::default());
        resolver.respond_with(Ok(Some(Cursor {
            extras: Some(Bundle::new().with_string(ERROR_KEY, "invalid_grant")),
        })));
        let fallback = Arc::new(Broken(StrategyType::AccountManagerAddAccount, AtomicUsize::new(0)));
        let executor = BrokerOperationExecutor::new(vec![
            Arc::new(ContentProviderStrategy::new(resolver)),
            fallback.clone(),
        ]);

        match executor.execute(&DiagnosticContext::new(), &accounts_request()) {
            Err(BrokerError::Remote { code, .. }) => assert_eq!(code, "invalid_grant"),
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }
        assert_eq!(fallback.1.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_hello_precedes_call_and_version_is_forwarded() {
        let binder = Arc::new(FakeBinder::default());
        binder.export(BROKER, MICROSOFT_AUTH_SERVICE_CLASS);
        binder.respond_with(Ok(Some(
            Bundle::new().with_string(NEGOTIATED_BP_VERSION_KEY, "13.0"),
        )));
        binder.respond_with(Ok(Some(Bundle::new().with_string("accounts", "[]"))));
        let executor = BrokerOperationExecutor::new(vec![Arc::new(BoundServiceStrategy::new(
            binder.clone(),
            Duration::from_secs(1),
        ))]);

        let hello = HelloNegotiator::new(HelloRequest::msal(None));
        let request = accounts_request().with_hello(&hello);
        executor
            .execute(&DiagnosticContext::new(), &request)
            .expect("accounts");

        assert_eq!(binder.calls(), vec!["HELLO".to_string(), "GET_ACCOUNTS".to_string()]);
        assert_eq!(request.negotiated_version().as_deref(), Some("13.0"));
        assert_eq!(
            request.bundle().expect("bundle").payload.get_string(NEGOTIATED_BP_VERSION_KEY),
            Some("13.0")
        );
    }
}
