//! Error taxonomy of broker IPC.

use thiserror::Error;

/// Why a transport could not complete a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CommunicationErrorCategory {
    /// The transport itself failed: bind failure, null cursor, remote exception.
    ConnectionError,
    /// The operation has no mapping for this transport. Raised before any call.
    OperationNotSupportedOnClientSide,
    /// The installed broker does not implement this operation.
    OperationNotSupportedOnServerSide,
    /// The target app failed validation as a broker.
    ValidationError,
}

/// Transport identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyType {
    /// `MicrosoftAuthService` bound service.
    BoundService,
    /// Broker content provider.
    ContentProvider,
    /// `AccountManager.addAccount` on the broker account type.
    AccountManagerAddAccount,
    /// `AccountManager.addAccount` on a per-app passthrough account type.
    AccountManagerBackup,
    /// ADAL-era `BrokerAccountService`.
    LegacyAccountService,
}

/// A transport-level failure. The executor moves on to the next transport
/// when it sees one.
#[derive(Debug, Error)]
#[error("{category} ({strategy_type}): {message}")]
pub struct BrokerCommunicationError {
    /// Failure class.
    pub category: CommunicationErrorCategory,
    /// Transport that raised the error.
    pub strategy_type: StrategyType,
    /// Human-readable detail.
    pub message: String,
    /// Underlying platform error, if any.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl BrokerCommunicationError {
    /// Creates an error without an underlying cause.
    #[must_use]
    pub fn new(
        category: CommunicationErrorCategory,
        strategy_type: StrategyType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            strategy_type,
            message: message.into(),
            source: None,
        }
    }

    /// Attaches the underlying cause.
    #[must_use]
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

/// Errors returned by a broker operation.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Every transport failed, or none was available.
    #[error("Unable to connect to the broker ({} transport failure(s))", .failures.len())]
    BindServiceFailed {
        /// Failure of each transport tried, in order.
        failures: Vec<BrokerCommunicationError>,
    },

    /// A single transport failure, before the executor aggregated it.
    #[error(transparent)]
    Communication(#[from] BrokerCommunicationError),

    /// The broker rejected the protocol handshake or is too old.
    #[error("unsupported broker: {0}")]
    UnsupportedBroker(String),

    /// The broker answered with an error bundle.
    #[error("broker error {code}: {description}")]
    Remote {
        /// Error code returned by the broker.
        code: String,
        /// Error description returned by the broker.
        description: String,
    },

    /// The broker answered with a bundle that could not be interpreted.
    #[error("invalid broker response: {0}")]
    InvalidResponse(String),

    /// A bundle could not be marshaled or unmarshaled.
    #[error("bundle serialization error: {0}")]
    Serialization(String),
}

impl BrokerError {
    /// Whether the executor should try the next transport after this error.
    #[must_use]
    pub const fn is_transport_failure(&self) -> bool {
        matches!(self, Self::Communication(_))
    }
}
