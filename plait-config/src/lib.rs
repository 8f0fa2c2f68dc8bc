// plait-config - Configuration Management
// TOML-based configuration with environment variable overrides

pub mod config;
pub mod env;

pub use config::load_config;
pub use config::load_from_file;
pub use config::validate_config;
pub use config::ConfigError;
pub use config::ConfigResult;
pub use config::Configuration;
pub use config::StrategyKind;
pub use config::Verbosity;
pub use env::apply_env_overrides;
pub use env::load_env_config;
