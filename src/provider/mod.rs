pub mod credentials;
pub mod ec2;
pub mod error;
pub mod ports;
pub mod sigv4;

pub use credentials::ProviderCredentials;
pub use ec2::{Ec2AddressProvider, Ec2ProviderFactory};
pub use error::{ProviderError, ProviderErrorKind};
pub use ports::{AcquiredAddress, AddressProvider, AddressProviderFactory};
