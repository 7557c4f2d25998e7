pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{
    Config, ConfigLoader, ConfigValidator, DisplayConfig, DuplicatePolicy, GatewayConfig,
    PublisherConfig, PublisherMode, StoreConfig,
};
pub use error::{DomainError, InfraError, RollcallError};
