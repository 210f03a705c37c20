use lazy_static::lazy_static;

use crate::{ClientConfig, DownloadConfig, GatewayConfig, ResolverConfig, StreamConfig};

/// Aggregate of all configuration groups. `fetch_config()` returns the
/// process-wide instance with environment overrides applied; `default()`
/// gives compiled-in values only (tests).
#[derive(Debug, Clone, Default)]
pub struct FetchConfig {
    pub client: ClientConfig,
    pub stream: StreamConfig,
    pub resolver: ResolverConfig,
    pub gateway: GatewayConfig,
    pub download: DownloadConfig,
}

impl FetchConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.client.apply_env_overrides();
        config.stream.apply_env_overrides();
        config.resolver.apply_env_overrides();
        config.gateway.apply_env_overrides();
        config.download.apply_env_overrides();
        config
    }
}

lazy_static! {
    static ref GLOBAL_CONFIG: FetchConfig = FetchConfig::from_env();
}

/// The process-wide configuration, read once from the environment.
pub fn fetch_config() -> &'static FetchConfig {
    &GLOBAL_CONFIG
}
