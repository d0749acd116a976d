//! Configuration traits and utilities.

use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::LoggingConfig;
use crate::error::{BridgeError, Result};

/// Settings for the message router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// How long a fan-out attempt waits for its reply.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Capacity of every channel between adapters and the router.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_response_timeout_ms() -> u64 {
    5000
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: default_response_timeout_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl RouterConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.response_timeout_ms == 0 {
            return Err(BridgeError::validation(
                "router.response_timeout_ms must be greater than zero",
            ));
        }
        if self.channel_capacity == 0 {
            return Err(BridgeError::validation(
                "router.channel_capacity must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Trait for bridge configuration types.
///
/// Implement this trait for the bridge's configuration struct to get
/// loading and validation.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use hemma_bridge_framework::{BridgeConfig, LoggingConfig, RouterConfig};
///
/// #[derive(Debug, Default, Deserialize)]
/// pub struct MyBridgeConfig {
///     #[serde(default)]
///     pub router: RouterConfig,
///     #[serde(default)]
///     pub logging: LoggingConfig,
/// }
///
/// impl BridgeConfig for MyBridgeConfig {
///     fn logging(&self) -> &LoggingConfig {
///         &self.logging
///     }
///
///     fn router(&self) -> &RouterConfig {
///         &self.router
///     }
/// }
/// ```
pub trait BridgeConfig: Sized + DeserializeOwned {
    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Get the router configuration.
    fn router(&self) -> &RouterConfig;

    /// Validate the configuration.
    ///
    /// Called automatically after loading. Override to add custom validation,
    /// keeping the router checks.
    fn validate(&self) -> Result<()> {
        self.router().validate()
    }

    /// Load configuration from a file path.
    ///
    /// Supports JSON5 format. Calls [`validate`](Self::validate) after loading.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BridgeError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from a JSON5 string.
    fn parse(content: &str) -> Result<Self> {
        let config: Self = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise start from the defaults.
    fn load_or_default(path: Option<&Path>) -> Result<Self>
    where
        Self: Default,
    {
        match path {
            Some(path) => Self::load(path),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Deserialize)]
    struct TestConfig {
        #[serde(default)]
        logging: LoggingConfig,
        #[serde(default)]
        router: RouterConfig,
    }

    impl BridgeConfig for TestConfig {
        fn logging(&self) -> &LoggingConfig {
            &self.logging
        }

        fn router(&self) -> &RouterConfig {
            &self.router
        }
    }

    #[test]
    fn test_config_not_found() {
        let result = TestConfig::load("/nonexistent/path.json5");
        assert!(matches!(result, Err(BridgeError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_router_defaults() {
        let config = TestConfig::parse("{}").unwrap();
        assert_eq!(config.router, RouterConfig::default());
        assert_eq!(config.router.response_timeout(), Duration::from_secs(5));
        assert_eq!(config.router.channel_capacity, 256);
    }

    #[test]
    fn test_router_overrides() {
        let config = TestConfig::parse(
            r#"{
                // JSON5 comments are fine
                router: { response_timeout_ms: 250, channel_capacity: 8 },
                logging: { level: "debug" },
            }"#,
        )
        .unwrap();
        assert_eq!(config.router.response_timeout(), Duration::from_millis(250));
        assert_eq!(config.router.channel_capacity, 8);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = TestConfig::parse("{ router: { response_timeout_ms: 0 } }");
        assert!(matches!(result, Err(BridgeError::ConfigValidation(_))));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = TestConfig::parse("{ router: { channel_capacity: 0 } }");
        assert!(matches!(result, Err(BridgeError::ConfigValidation(_))));
    }

    #[test]
    fn test_parse_error() {
        let result = TestConfig::parse("{ router: ");
        assert!(matches!(result, Err(BridgeError::ConfigParse(_))));
    }

    #[test]
    fn test_load_or_default_without_path() {
        let config = TestConfig::load_or_default(None).unwrap();
        assert_eq!(config.logging.level, "info");
    }
}
