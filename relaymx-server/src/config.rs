use serde::Deserialize;

use relaymx_session::{Properties, Semantics};

/// Process configuration, loaded from a TOML file. One section per
/// concern, each independently deserializable with sensible defaults so a
/// minimal file is enough to start the proxy.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub session: Semantics,
    #[serde(default)]
    pub session_limits: Properties,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    pub max_connections: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string(), log_format: LogFormat::Text, max_connections: 1000 }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ListenerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Multiplied by `SOMAXCONN` the way the distilled design calls for;
    /// Tokio's `TcpListener` doesn't expose backlog tuning directly, so this
    /// value is recorded in the startup log for operational visibility and
    /// applied at the `socket2::Socket` level before it's handed to Tokio.
    pub backlog_multiplier: u32,
    pub send_buffer_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self { bind_address: "127.0.0.1".to_string(), port: 4406, backlog_multiplier: 10, send_buffer_bytes: 256 * 1024 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true, bind_address: "127.0.0.1".to_string(), port: 9406 }
    }
}

impl Config {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_an_empty_document() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.listener.port, 4406);
        assert_eq!(config.general.max_connections, 1000);
    }

    #[test]
    fn session_semantics_override_from_toml() {
        let toml = r#"
            [session]
            reply_on = "all_ok"
            must_reply = "all"
            on_error = "abort"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.session.must_reply, relaymx_session::MustReply::All);
    }
}
