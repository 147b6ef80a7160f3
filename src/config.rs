use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    /// API token of the hub bot users register their character bots with.
    pub bot_token: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Public HTTPS hostname the character-bot webhooks are registered under.
    pub public_hostname: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config: Config = toml::from_str(
            r#"
            [telegram]
            bot_token = "123:abc"

            [server]
            bind_addr = "127.0.0.1:9000"
            public_hostname = "relay.example.com"
            "#,
        )
        .unwrap();
        assert_eq!(config.telegram.bot_token, "123:abc");
        assert_eq!(config.server.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.server.public_hostname, "relay.example.com");
    }

    #[test]
    fn bind_addr_defaults() {
        let config: Config = toml::from_str(
            r#"
            [telegram]
            bot_token = "123:abc"

            [server]
            public_hostname = "relay.example.com"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.bind_addr, "0.0.0.0:8080");
    }
}
