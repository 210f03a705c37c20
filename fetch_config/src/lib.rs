pub mod fetch_config;
pub mod macros;

pub mod groups;

// Re-exported for use inside the config_group! macro expansion.
pub use fetch_config::{FetchConfig, fetch_config};
pub use utils::configuration_utils::ParsableConfigValue;

pub type ClientConfig = groups::client::ConfigValues;
pub type StreamConfig = groups::stream::ConfigValues;
pub type ResolverConfig = groups::resolver::ConfigValues;
pub type GatewayConfig = groups::gateway::ConfigValues;
pub type DownloadConfig = groups::download::ConfigValues;
