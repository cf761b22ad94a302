//! Broker IPC.
//!
//! A request to the broker app is a [`BrokerOperationBundle`]: a logical
//! [`Operation`], a target package and a [`Bundle`] payload. Several
//! transports can carry it. The [`StrategySelector`] lists the ones the target
//! broker supports, and the [`BrokerOperationExecutor`] walks them in order,
//! falling through on transport failures and collecting each of them into the
//! final error when nothing worked.
//!
//! The OS services behind the transports are traits in [`platform`], so the
//! host app supplies the real binder, content resolver and `AccountManager`.

pub mod bundle;
pub mod error;
pub mod executor;
pub mod hello;
pub mod operation;
pub mod platform;
pub mod strategy;

#[cfg(test)]
pub(crate) mod testing;

pub use bundle::{Bundle, BundleValue};
pub use error::{BrokerCommunicationError, BrokerError, CommunicationErrorCategory, StrategyType};
pub use executor::{BrokerOperation, BrokerOperationExecutor, BrokerRequest};
pub use hello::{HelloCache, HelloCacheResult, HelloNegotiator, HelloRequest};
pub use operation::{BrokerOperationBundle, Operation};
pub use strategy::{IpcPlatform, IpcStrategy, StrategySelector};
