use std::env;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid server URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid value for {var}: '{value}'")]
    InvalidEnvValue { var: String, value: String },
}

pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8888/ws/";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_BATCH_CAPACITY: usize = 10;

/// Client configuration, resolved from defaults and environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint of the sensor server.
    pub server_url: String,
    /// Cadence of batch read requests.
    pub poll_interval: Duration,
    /// Readings per batch run.
    pub batch_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_capacity: DEFAULT_BATCH_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults. `SENSOR_SERVER_URL` overrides the endpoint and
    /// `SENSOR_POLL_INTERVAL_MS` the batch cadence.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Ok(url) = env::var("SENSOR_SERVER_URL") {
            config.server_url = url;
        }

        if let Ok(value) = env::var("SENSOR_POLL_INTERVAL_MS") {
            let millis = value
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidEnvValue {
                    var: "SENSOR_POLL_INTERVAL_MS".to_string(),
                    value,
                })?;
            config.poll_interval = Duration::from_millis(millis);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the server URL is a well-formed ws:// or wss:// endpoint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let parsed = Url::parse(&self.server_url).map_err(|e| ConfigError::InvalidUrl {
            url: self.server_url.clone(),
            reason: e.to_string(),
        })?;

        match parsed.scheme() {
            "ws" | "wss" => Ok(()),
            other => Err(ConfigError::InvalidUrl {
                url: self.server_url.clone(),
                reason: format!("unsupported scheme '{}'", other),
            }),
        }
    }
}

/// Load configuration with helpful error messages for development
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    match ClientConfig::load() {
        Ok(config) => {
            log::info!("Loaded configuration, server: {}", config.server_url);
            Ok(config)
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            log::error!("Set SENSOR_SERVER_URL to a ws:// endpoint, e.g. {DEFAULT_SERVER_URL}");
            Err(e)
        }
    }
}
