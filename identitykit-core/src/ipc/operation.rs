//! Logical broker operations and their per-transport identifiers.

use super::bundle::Bundle;

/// Suffix of every broker content provider authority.
pub const CONTENT_PROVIDER_AUTHORITY_SUFFIX: &str = "microsoft.identity.broker";

/// Content provider authority of the broker app `package_name`.
#[must_use]
pub fn content_provider_authority(package_name: &str) -> String {
    format!("{package_name}.{CONTENT_PROVIDER_AUTHORITY_SUFFIX}")
}

/// A logical RPC the client can ask the broker to perform.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter, strum::IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    /// Protocol version handshake.
    MsalHello,
    /// Fetch the intent that starts an interactive request.
    MsalGetIntentForInteractiveRequest,
    /// Silent token acquisition.
    MsalAcquireTokenSilent,
    /// List accounts visible to the calling app.
    MsalGetAccounts,
    /// Remove one account.
    MsalRemoveAccount,
    /// Whether the device is in shared mode.
    MsalGetDeviceMode,
    /// Signed-in account of a shared device.
    MsalGetCurrentAccountInSharedDevice,
    /// Global sign-out on a shared device.
    MsalSignOutFromSharedDevice,
    /// Signed HTTP request generation.
    MsalGenerateShr,
    /// SSO token for a web session.
    MsalSsoToken,
    /// Poll a device code flow.
    MsalFetchDcfAuthResult,
    /// Start a device code flow.
    MsalAcquireTokenDcf,
    /// Broker-to-broker handshake.
    BrokerApiHello,
    /// Accounts held by the broker itself.
    BrokerApiGetBrokerAccounts,
    /// Remove a broker account.
    BrokerApiRemoveBrokerAccount,
    /// Update the broker refresh token.
    BrokerApiUpdateBrt,
    /// Push feature flights.
    BrokerSetFlights,
    /// Read feature flights.
    BrokerGetFlights,
    /// Broker discovery metadata.
    BrokerDiscoveryMetadataRetrieval,
    /// Active broker lookup on behalf of an SDK.
    BrokerDiscoveryFromSdk,
    /// Record the active broker.
    BrokerSetActiveBroker,
    /// Fetch the legacy key held by an inactive broker.
    BrokerGetKeyFromInactiveBroker,
    /// Device registration protocols the broker supports.
    DeviceRegistrationProtocols,
    /// Ask the broker to upload its logs.
    BrokerUploadLogs,
}

impl Operation {
    /// Path under the broker's content provider authority.
    #[must_use]
    pub const fn content_provider_path(self) -> Option<&'static str> {
        Some(match self {
            Self::MsalHello => "/hello",
            Self::MsalGetIntentForInteractiveRequest => "/acquireTokenInteractive",
            Self::MsalAcquireTokenSilent => "/acquireTokenSilent",
            Self::MsalGetAccounts => "/getAccounts",
            Self::MsalRemoveAccount => "/removeAccounts",
            Self::MsalGetDeviceMode => "/getDeviceMode",
            Self::MsalGetCurrentAccountInSharedDevice => "/getCurrentAccountSharedDevice",
            Self::MsalSignOutFromSharedDevice => "/signOutFromSharedDevice",
            Self::MsalGenerateShr => "/generateShr",
            Self::MsalSsoToken => "/ssoToken",
            Self::MsalFetchDcfAuthResult => "/fetchDCFAuthResult",
            Self::MsalAcquireTokenDcf => "/acquireTokenDCF",
            Self::BrokerApiHello => "/brokerApi/hello",
            Self::BrokerApiGetBrokerAccounts => "/brokerApi/getBrokerAccounts",
            Self::BrokerApiRemoveBrokerAccount => "/brokerApi/removeBrokerAccount",
            Self::BrokerApiUpdateBrt => "/brokerApi/updateBrt",
            Self::BrokerSetFlights => "/brokerApi/setFlights",
            Self::BrokerGetFlights => "/brokerApi/getFlights",
            Self::BrokerDiscoveryMetadataRetrieval => {
                "/brokerElection/brokerDiscoveryMetadataRetrieval"
            }
            Self::BrokerDiscoveryFromSdk => "/brokerElection/brokerDiscoveryFromSdk",
            Self::BrokerSetActiveBroker => "/brokerElection/setActiveBroker",
            Self::DeviceRegistrationProtocols => "/multipledeviceRegistration/protocols",
            Self::BrokerUploadLogs => "/brokerApi/uploadBrokerLogs",
            Self::BrokerGetKeyFromInactiveBroker => return None,
        })
    }

    /// Lowest `msal.to.broker` protocol version the broker must have
    /// negotiated for this operation.
    #[must_use]
    pub const fn min_msal_protocol_version(self) -> Option<&'static str> {
        match self {
            Self::MsalHello
            | Self::MsalGetIntentForInteractiveRequest
            | Self::MsalAcquireTokenSilent
            | Self::MsalGetAccounts
            | Self::MsalRemoveAccount
            | Self::MsalGetDeviceMode
            | Self::MsalGetCurrentAccountInSharedDevice
            | Self::MsalSignOutFromSharedDevice => Some("3.0"),
            Self::MsalGenerateShr => Some("6.0"),
            Self::MsalSsoToken => Some("7.0"),
            _ => None,
        }
    }

    /// Lowest broker-to-broker protocol version required by this operation.
    #[must_use]
    pub const fn min_broker_protocol_version(self) -> Option<&'static str> {
        match self {
            Self::BrokerApiHello
            | Self::BrokerApiGetBrokerAccounts
            | Self::BrokerApiRemoveBrokerAccount
            | Self::BrokerApiUpdateBrt => Some("1.0"),
            Self::BrokerSetFlights | Self::BrokerGetFlights => Some("3.0"),
            Self::BrokerUploadLogs => Some("4.0"),
            _ => None,
        }
    }

    /// Operation key understood by the broker's `AccountManager` authenticator
    /// and by `MicrosoftAuthService`.
    #[must_use]
    pub const fn account_manager_operation(self) -> Option<&'static str> {
        Some(match self {
            Self::MsalHello => "HELLO",
            Self::MsalGetIntentForInteractiveRequest => "GET_INTENT_FOR_INTERACTIVE_REQUEST",
            Self::MsalAcquireTokenSilent => "ACQUIRE_TOKEN_SILENT",
            Self::MsalGetAccounts => "GET_ACCOUNTS",
            Self::MsalRemoveAccount => "REMOVE_ACCOUNT",
            Self::MsalGetDeviceMode => "GET_DEVICE_MODE",
            Self::MsalGetCurrentAccountInSharedDevice => "GET_CURRENT_ACCOUNT",
            Self::MsalSignOutFromSharedDevice => "REMOVE_ACCOUNT_FROM_SHARED_DEVICE",
            Self::MsalGenerateShr => "GENERATE_SHR",
            Self::MsalFetchDcfAuthResult => "FETCH_DCF_AUTH_RESULT",
            Self::MsalAcquireTokenDcf => "ACQUIRE_TOKEN_DCF",
            _ => return None,
        })
    }

    /// Method name on the ADAL-era `BrokerAccountService`.
    #[must_use]
    pub const fn legacy_account_service_method(self) -> Option<&'static str> {
        match self {
            Self::MsalGetAccounts => Some("getBrokerUsers"),
            Self::MsalAcquireTokenSilent => Some("acquireTokenSilently"),
            Self::MsalRemoveAccount => Some("removeAccounts"),
            Self::BrokerGetKeyFromInactiveBroker => Some("getInactiveBrokerKey"),
            _ => None,
        }
    }
}

/// One request to one broker app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerOperationBundle {
    /// What to do.
    pub operation: Operation,
    /// Package of the broker app that should handle it.
    pub target_broker_package_name: String,
    /// Operation arguments.
    pub payload: Bundle,
}

impl BrokerOperationBundle {
    /// Creates a request.
    #[must_use]
    pub fn new(
        operation: Operation,
        target_broker_package_name: impl Into<String>,
        payload: Bundle,
    ) -> Self {
        Self {
            operation,
            target_broker_package_name: target_broker_package_name.into(),
            payload,
        }
    }

    /// Full content provider URI, if the operation has a path.
    #[must_use]
    pub fn content_provider_uri(&self) -> Option<String> {
        self.operation
            .content_provider_path()
            .map(|path| {
                format!(
                    "content://{}{path}",
                    content_provider_authority(&self.target_broker_package_name)
                )
            })
    }
}
