mod settings;
pub mod error;

pub use error::ConfigError;
pub use settings::{load_config, EndpointConfig, ServiceConfig, StoreBackend, StoreConfig};
