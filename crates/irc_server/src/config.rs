use crate::constants::{DEFAULT_OUTBOUND_CAP_BYTES, MAX_LINE_LEN};
use crate::errors::ServerError;
use serde::Deserialize;
use std::path::Path;

/// Ambient, non-protocol settings. The port and server password always come
/// from the command line (see `Cli`); nothing here can override them.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub limits: LimitsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    pub motd: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            name: "localhost".to_owned(),
            motd: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_line_len: usize,
    pub outbound_cap_bytes: usize,
    pub registration_timeout_secs: Option<u64>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            max_line_len: MAX_LINE_LEN,
            outbound_cap_bytes: DEFAULT_OUTBOUND_CAP_BYTES,
            registration_timeout_secs: None,
        }
    }
}

impl Config {
    /// Loads and parses the TOML configuration file. Any individual table
    /// the file omits falls back to its `Default`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ServerError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|source| ServerError::ConfigRead {
                path: path.display().to_string(),
                source,
            })?;
        let mut config: Config =
            toml::from_str(&content).map_err(|source| ServerError::ConfigParse {
                path: path.display().to_string(),
                source: Box::new(source),
            })?;
        // never let a config file raise the wire ceiling, only lower it
        config.limits.max_line_len = config.limits.max_line_len.min(MAX_LINE_LEN);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.server.name, "localhost");
        assert_eq!(config.limits.max_line_len, MAX_LINE_LEN);
        assert!(config.limits.registration_timeout_secs.is_none());
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let toml_str = r#"
            [server]
            name = "chat.example.org"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.name, "chat.example.org");
        assert_eq!(config.server.motd, "");
        assert_eq!(config.limits.max_line_len, MAX_LINE_LEN);
    }

    #[test]
    fn max_line_len_is_never_raised_past_the_wire_ceiling() {
        let toml_str = r#"
            [limits]
            max_line_len = 9999
        "#;
        let path = std::env::temp_dir().join("irc_server_test_config_overlong.toml");
        std::fs::write(&path, toml_str).unwrap();
        let config = Config::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(config.limits.max_line_len, MAX_LINE_LEN);
    }
}
