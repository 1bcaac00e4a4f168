use config::{Config, Environment, File as ConfigFile};
use serde::Deserialize;

use crate::address::Network;
use crate::error::Result;

/// Run settings. Sources, lowest precedence first: built-in defaults, the
/// optional config file (`utxobal.toml` by default), `UTXOBAL_*` environment
/// variables. Command-line flags override all of them.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub network: Network,
    /// Node version that wrote the chainstate, e.g. "0.15" or "0.14".
    pub node_version: String,
    /// Log one progress line every this many outputs; 0 disables.
    pub progress_interval: u64,
    pub log_level: String,
    pub log_format: String,
    pub log_file: Option<String>,
    pub log_rotation: String,
}

impl Settings {
    pub fn load(config_file: &str) -> Result<Self> {
        let config = Config::builder()
            .set_default("network", "mainnet")?
            .set_default("node_version", "0.15")?
            .set_default("progress_interval", 100_000i64)?
            .set_default("log_level", "info")?
            .set_default("log_format", "pretty")?
            .set_default("log_rotation", "never")?
            .add_source(ConfigFile::with_name(config_file).required(false))
            .add_source(Environment::with_prefix("UTXOBAL"))
            .build()?;
        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_without_file() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent");
        let settings = Settings::load(missing.to_str().unwrap()).unwrap();
        assert_eq!(settings.node_version, "0.15");
        assert_eq!(settings.progress_interval, 100_000);
        assert_eq!(settings.log_format, "pretty");
        assert!(settings.log_file.is_none());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("utxobal.toml");
        std::fs::write(
            &path,
            "network = \"testnet\"\nnode_version = \"0.14\"\nprogress_interval = 10\nlog_format = \"json\"\n",
        )
        .unwrap();
        let settings = Settings::load(path.to_str().unwrap()).unwrap();
        assert_eq!(settings.network, Network::Testnet);
        assert_eq!(settings.node_version, "0.14");
        assert_eq!(settings.progress_interval, 10);
        assert_eq!(settings.log_format, "json");
    }

    #[test]
    fn test_network_is_case_insensitive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("utxobal.toml");
        std::fs::write(&path, "network = \"Testnet\"\n").unwrap();
        let settings = Settings::load(path.to_str().unwrap()).unwrap();
        assert_eq!(settings.network, Network::Testnet);

        std::fs::write(&path, "network = \"regtest\"\n").unwrap();
        assert!(Settings::load(path.to_str().unwrap()).is_err());
    }
}
