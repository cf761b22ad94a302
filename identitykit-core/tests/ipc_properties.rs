mod common;

use std::sync::Arc;

use common::{cursor_with, ScriptedResolver};
use identitykit_core::{
    diagnostics::DiagnosticContext,
    ipc::{
        operation::content_provider_authority,
        platform::Cursor,
        strategy::ContentProviderStrategy,
        Bundle, BrokerError, BrokerOperationBundle, BrokerOperationExecutor, BrokerRequest,
        CommunicationErrorCategory, IpcPlatform, IpcStrategy, Operation, StrategySelector,
        StrategyType,
    },
    IpcSettings,
};
use strum::IntoEnumIterator;

const BROKER: &str = "com.azure.authenticator";

#[test]
fn test_unmapped_operation_fails_before_any_query() {
    let resolver = Arc::new(ScriptedResolver::answering(Some(cursor_with("k", "v"))));
    let strategy = ContentProviderStrategy::new(resolver.clone());

    let unmapped: Vec<_> = Operation::iter()
        .filter(|operation| operation.content_provider_path().is_none())
        .collect();
    assert!(!unmapped.is_empty());

    for operation in unmapped {
        let err = strategy
            .communicate_to_broker(&BrokerOperationBundle::new(operation, BROKER, Bundle::new()))
            .expect_err("no content provider path");
        assert_eq!(
            err.category,
            CommunicationErrorCategory::OperationNotSupportedOnClientSide
        );
        assert_eq!(err.strategy_type, StrategyType::ContentProvider);
    }
    assert_eq!(resolver.query_count(), 0);
}

#[test]
fn test_missing_extras_and_missing_cursor_are_distinct() {
    let request = BrokerOperationBundle::new(Operation::MsalGetDeviceMode, BROKER, Bundle::new());

    let no_extras = ContentProviderStrategy::new(Arc::new(ScriptedResolver::answering(Some(
        Cursor { extras: None },
    ))));
    let err = no_extras
        .communicate_to_broker(&request)
        .expect_err("no extras");
    assert_eq!(
        err.category,
        CommunicationErrorCategory::OperationNotSupportedOnServerSide
    );

    let no_cursor = ContentProviderStrategy::new(Arc::new(ScriptedResolver::answering(None)));
    let err = no_cursor
        .communicate_to_broker(&request)
        .expect_err("no cursor");
    assert_eq!(err.category, CommunicationErrorCategory::ConnectionError);
}

#[test]
fn test_selector_offers_only_supported_transports() {
    let resolver = Arc::new(ScriptedResolver {
        authorities: vec![content_provider_authority(BROKER)],
        ..ScriptedResolver::default()
    });
    let platform = IpcPlatform {
        content_resolver: Some(resolver),
        ..IpcPlatform::default()
    };
    let selector = StrategySelector::from_platform(&platform, &IpcSettings::default());

    let for_broker: Vec<_> = selector
        .select(BROKER)
        .iter()
        .map(|strategy| strategy.strategy_type())
        .collect();
    assert_eq!(for_broker, vec![StrategyType::ContentProvider]);
    assert!(selector.select("com.contoso.not.a.broker").is_empty());
}

#[test]
fn test_executor_over_selected_transports() {
    let resolver = Arc::new(ScriptedResolver {
        authorities: vec![content_provider_authority(BROKER)],
        cursor: Some(cursor_with("device_mode", "shared")),
        ..ScriptedResolver::default()
    });
    let platform = IpcPlatform {
        content_resolver: Some(resolver.clone()),
        ..IpcPlatform::default()
    };
    let selector = StrategySelector::from_platform(&platform, &IpcSettings::default());
    let executor = BrokerOperationExecutor::for_package(&selector, BROKER);

    let reply = executor
        .execute(
            &DiagnosticContext::new(),
            &BrokerRequest::new(Operation::MsalGetDeviceMode, BROKER, Bundle::new()),
        )
        .expect("device mode");
    assert_eq!(reply.get_string("device_mode"), Some("shared"));
    assert_eq!(
        resolver.queries.lock().unwrap().as_slice(),
        [format!("content://{}/getDeviceMode", content_provider_authority(BROKER))]
    );
}

#[test]
fn test_no_supported_transport_is_bind_failure() {
    let selector = StrategySelector::from_platform(&IpcPlatform::default(), &IpcSettings::default());
    let executor = BrokerOperationExecutor::for_package(&selector, BROKER);
    match executor.execute(
        &DiagnosticContext::new(),
        &BrokerRequest::new(Operation::MsalGetAccounts, BROKER, Bundle::new()),
    ) {
        Err(BrokerError::BindServiceFailed { failures }) => assert!(failures.is_empty()),
        Err(err) => panic!("unexpected error: {err}"),
        Ok(_) => panic!("expected error"),
    }
}
