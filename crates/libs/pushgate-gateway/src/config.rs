use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Prefix of the handles the gateway mints for server-discovered objects.
pub const DEFAULT_SYNTHETIC_PREFIX: &str = "mpnsub-server";

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    pub synthetic_handle_prefix: String,
    /// Fabricate a client for an unknown handle instead of failing the
    /// lookup. Kept for frontends written against the old behavior.
    pub lenient_client_lookup: bool,
    pub command_buffer: usize,
    pub log_filter: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            synthetic_handle_prefix: DEFAULT_SYNTHETIC_PREFIX.to_string(),
            lenient_client_lookup: false,
            command_buffer: 64,
            log_filter: "info".to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn from_toml(input: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(input)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    }

    pub fn command_buffer(&self) -> usize {
        self.command_buffer.max(1)
    }
}
