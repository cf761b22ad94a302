use std::sync::Arc;

use crate::ipc::{
    bundle::Bundle,
    error::{BrokerCommunicationError, CommunicationErrorCategory, StrategyType},
    operation::{content_provider_authority, BrokerOperationBundle},
    platform::ContentResolver,
};

use super::IpcStrategy;

/// Queries the broker's content provider. The request bundle travels
/// base64-encoded in the selection argument; the reply comes back as the
/// cursor's extras.
pub struct ContentProviderStrategy {
    resolver: Arc<dyn ContentResolver>,
}

impl ContentProviderStrategy {
    /// Creates the transport.
    #[must_use]
    pub fn new(resolver: Arc<dyn ContentResolver>) -> Self {
        Self { resolver }
    }

    fn error(&self, category: CommunicationErrorCategory, message: String) -> BrokerCommunicationError {
        BrokerCommunicationError::new(category, self.strategy_type(), message)
    }
}

impl IpcStrategy for ContentProviderStrategy {
    fn communicate_to_broker(
        &self,
        bundle: &BrokerOperationBundle,
    ) -> Result<Option<Bundle>, BrokerCommunicationError> {
        let Some(uri) = bundle.content_provider_uri() else {
            return Err(self.error(
                CommunicationErrorCategory::OperationNotSupportedOnClientSide,
                format!("{} has no content provider path", bundle.operation),
            ));
        };
        let selection = bundle.payload.to_base64().map_err(|err| {
            self.error(
                CommunicationErrorCategory::OperationNotSupportedOnClientSide,
                "failed to marshal request bundle".to_string(),
            )
            .with_source(err)
        })?;

        tracing::debug!(uri = %uri, "querying broker content provider");
        let cursor = self.resolver.query(&uri, &selection).map_err(|err| {
            self.error(
                CommunicationErrorCategory::ConnectionError,
                format!("query to {uri} failed"),
            )
            .with_source(err)
        })?;

        let Some(cursor) = cursor else {
            return Err(self.error(
                CommunicationErrorCategory::ConnectionError,
                format!("{uri} returned a null cursor"),
            ));
        };
        match cursor.extras {
            Some(extras) => Ok(Some(extras)),
            None => Err(self.error(
                CommunicationErrorCategory::OperationNotSupportedOnServerSide,
                format!("{uri} returned no result bundle, the broker may be too old"),
            )),
        }
    }

    fn strategy_type(&self) -> StrategyType {
        StrategyType::ContentProvider
    }

    fn is_supported_by_targeted_broker(&self, package_name: &str) -> bool {
        self.resolver
            .provider_exists(&content_provider_authority(package_name))
    }
}
