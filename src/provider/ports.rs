use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::provider::{credentials::ProviderCredentials, error::ProviderError};

/// One provider-issued address and the handle needed to give it back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquiredAddress {
    pub public_ip: String,
    pub allocation_id: String,
}

/// Acquire/release capability against the cloud provider. Implementations
/// must not retry internally; retry policy belongs to the caller.
#[async_trait]
pub trait AddressProvider: Send + Sync {
    async fn acquire(&self) -> Result<AcquiredAddress, ProviderError>;

    async fn release(&self, allocation_id: &str) -> Result<(), ProviderError>;
}

/// Builds a provider bound to one set of caller credentials.
pub trait AddressProviderFactory: Send + Sync {
    fn connect(
        &self,
        credentials: &ProviderCredentials,
    ) -> Result<Arc<dyn AddressProvider>, ProviderError>;
}
