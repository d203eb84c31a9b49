pub mod loader;
pub mod model;

pub use loader::ConfigLoader;
pub use model::{
    AdviceConfig, AppConfig, AuthConfig, DatabaseConfig, GatewayConfig, LlmConfig, ThresholdConfig,
};
