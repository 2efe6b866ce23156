//! Environment-driven configuration, assembled once at startup and
//! validated before anything connects (`SPEC_FULL.md` §6.4).
//!
//! Grounded in `original_source/src/nwws/models/config.py::Config.from_env`
//! and `original_source/src/models/mqtt_config.py`.

use std::env;
use std::time::Duration;

use thiserror::Error;

/// A fatal, logged, exit-1 condition: missing credentials or an unparsable
/// setting. `main` turns this into process exit code 1 before any
/// connection is attempted.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    MissingRequired(&'static str),
    #[error("{0} is not a valid value for {1}: {2}")]
    InvalidValue(String, &'static str, String),
}

fn env_var(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingRequired(name))
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(raw.clone(), name, e.to_string())),
        Err(_) => Ok(default),
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(raw) => matches!(raw.to_lowercase().as_str(), "true" | "1" | "yes"),
        Err(_) => default,
    }
}

/// XMPP endpoint and credentials for the NWWS-OI ingest connection.
#[derive(Debug, Clone)]
pub struct XmppConfig {
    pub username: String,
    pub password: String,
    pub server: String,
    pub port: u16,
}

/// Which sinks the pipeline fans out to, parsed from `OUTPUTS`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum OutputKind {
    Console,
    Mqtt,
    Database,
}

impl std::str::FromStr for OutputKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "console" => Ok(OutputKind::Console),
            "mqtt" => Ok(OutputKind::Mqtt),
            "database" => Ok(OutputKind::Database),
            other => Err(ConfigError::InvalidValue(other.to_string(), "OUTPUTS", "expected console, mqtt, or database".to_string())),
        }
    }
}

/// MQTT broker connection parameters, present whenever `OUTPUTS` includes
/// `mqtt`.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub broker: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
    pub qos: u8,
    pub client_id: String,
}

/// Database connection parameters, present whenever `OUTPUTS` includes
/// `database`.
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: String,
}

/// Embedded HTTP server bind settings.
#[derive(Debug, Clone)]
pub struct MetricServerSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

/// Ingest queue / pipeline backpressure settings (`SPEC_FULL.md` §5).
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub capacity: usize,
    pub submit_timeout: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: 1024,
            submit_timeout: Duration::from_secs(5),
        }
    }
}

/// The fully assembled, validated application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub xmpp: XmppConfig,
    pub log_level: String,
    pub log_file: Option<String>,
    pub outputs: Vec<OutputKind>,
    pub mqtt: Option<MqttSettings>,
    pub database: Option<DatabaseSettings>,
    pub metric_server: MetricServerSettings,
    pub queue: QueueSettings,
}

impl Config {
    /// Assembles a [`Config`] from process environment variables, per
    /// `SPEC_FULL.md` §6.4. Does not itself load a `.env` file; callers
    /// (typically `main`) run `dotenvy::dotenv().ok()` first.
    pub fn from_env() -> Result<Self, ConfigError> {
        let xmpp = XmppConfig {
            username: env_var("NWWS_USERNAME")?,
            password: env_var("NWWS_PASSWORD")?,
            server: env_or("NWWS_SERVER", "nwws-oi.weather.gov"),
            port: env_parsed("NWWS_PORT", 5222u16)?,
        };

        let outputs = env_or("OUTPUTS", "console")
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<OutputKind>, ConfigError>>()?;

        let mqtt = if outputs.contains(&OutputKind::Mqtt) {
            Some(MqttSettings {
                broker: env_or("MQTT_BROKER", "localhost"),
                port: env_parsed("MQTT_PORT", 1883u16)?,
                username: env::var("MQTT_USERNAME").ok(),
                password: env::var("MQTT_PASSWORD").ok(),
                topic_prefix: env_or("MQTT_TOPIC_PREFIX", "nwws"),
                qos: env_parsed("MQTT_QOS", 1u8)?,
                client_id: env_or("MQTT_CLIENT_ID", "nwws-bridge"),
            })
        } else {
            None
        };

        let database = if outputs.contains(&OutputKind::Database) {
            Some(DatabaseSettings {
                url: env_var("DATABASE_URL")?,
            })
        } else {
            None
        };

        let metric_server = MetricServerSettings {
            enabled: env_bool("METRIC_SERVER", true),
            host: env_or("METRIC_HOST", "127.0.0.1"),
            port: env_parsed("METRIC_PORT", 8080u16)?,
        };

        Ok(Self {
            xmpp,
            log_level: env_or("LOG_LEVEL", "INFO"),
            log_file: env::var("LOG_FILE").ok(),
            outputs,
            mqtt,
            database,
            metric_server,
            queue: QueueSettings::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch
    // them so they don't race on the same keys.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "NWWS_USERNAME",
            "NWWS_PASSWORD",
            "NWWS_SERVER",
            "NWWS_PORT",
            "OUTPUTS",
            "MQTT_BROKER",
            "MQTT_PORT",
            "MQTT_TOPIC_PREFIX",
            "MQTT_QOS",
            "DATABASE_URL",
            "METRIC_SERVER",
            "METRIC_HOST",
            "METRIC_PORT",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn missing_credentials_is_a_config_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired("NWWS_USERNAME")));
    }

    #[test]
    fn defaults_apply_when_optional_vars_absent() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("NWWS_USERNAME", "user");
        env::set_var("NWWS_PASSWORD", "pass");

        let config = Config::from_env().unwrap();
        assert_eq!(config.xmpp.server, "nwws-oi.weather.gov");
        assert_eq!(config.xmpp.port, 5222);
        assert_eq!(config.outputs, vec![OutputKind::Console]);
        assert!(config.mqtt.is_none());
        assert!(config.metric_server.enabled);
        clear_env();
    }

    #[test]
    fn mqtt_output_requires_no_extra_vars_but_enables_mqtt_settings() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("NWWS_USERNAME", "user");
        env::set_var("NWWS_PASSWORD", "pass");
        env::set_var("OUTPUTS", "console,mqtt");

        let config = Config::from_env().unwrap();
        assert!(config.mqtt.is_some());
        assert_eq!(config.mqtt.unwrap().broker, "localhost");
        clear_env();
    }

    #[test]
    fn invalid_port_is_a_config_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("NWWS_USERNAME", "user");
        env::set_var("NWWS_PASSWORD", "pass");
        env::set_var("NWWS_PORT", "not-a-port");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_, "NWWS_PORT", _)));
        clear_env();
    }
}
