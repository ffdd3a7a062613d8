//! Configuration for logging and telemetry

use serde::{Deserialize, Serialize};

use crate::error::ObservabilityError;

const DEFAULT_SERVICE_NAME: &str = "conduit";

/// Observability configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Service name for traces (e.g., "conduit", "conduit-daemon")
    pub service_name: String,

    /// Service version (optional, defaults to "unknown")
    pub service_version: Option<String>,

    /// OTLP endpoint for trace export (e.g., "http://localhost:4317")
    pub otlp_endpoint: Option<String>,

    /// Write formatted log lines to stderr
    pub enable_console: bool,

    /// Log level filter (e.g., "info", "conduit_mcp=debug")
    /// Defaults to "warn" if not set
    pub log_level: Option<String>,

    /// Colored console output
    pub ansi: bool,

    /// Additional resource attributes (key-value pairs)
    pub resource_attributes: Vec<(String, String)>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            service_version: None,
            otlp_endpoint: None,
            enable_console: true,
            log_level: None,
            ansi: true,
            resource_attributes: Vec::new(),
        }
    }
}

impl ObservabilityConfig {
    /// Create a new configuration with service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set service version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = Some(version.into());
        self
    }

    /// Set OTLP endpoint
    pub fn with_otlp_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = Some(endpoint.into());
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enable: bool) -> Self {
        self.enable_console = enable;
        self
    }

    /// Set log level
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    /// Add resource attribute
    pub fn with_resource_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.resource_attributes.push((key.into(), value.into()));
        self
    }

    /// Build from environment variables
    ///
    /// Reads:
    /// - `OTEL_SERVICE_NAME` or `SERVICE_NAME` → service_name
    /// - `OTEL_SERVICE_VERSION` or `SERVICE_VERSION` → service_version
    /// - `OTEL_EXPORTER_OTLP_ENDPOINT` → otlp_endpoint
    /// - `CONDUIT_LOG` or `RUST_LOG` → log_level
    pub fn from_env() -> Self {
        let service_name = std::env::var("OTEL_SERVICE_NAME")
            .or_else(|_| std::env::var("SERVICE_NAME"))
            .unwrap_or_else(|_| DEFAULT_SERVICE_NAME.to_string());

        let service_version = std::env::var("OTEL_SERVICE_VERSION")
            .or_else(|_| std::env::var("SERVICE_VERSION"))
            .ok();

        // OTLP only when explicitly set; otherwise console-only.
        let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok();

        let log_level = std::env::var("CONDUIT_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .ok();

        Self {
            service_name,
            service_version,
            otlp_endpoint,
            log_level,
            ..Default::default()
        }
    }

    /// Rejects endpoints the OTLP exporter could never reach.
    pub fn validate(&self) -> Result<(), ObservabilityError> {
        if self.service_name.trim().is_empty() {
            return Err(ObservabilityError::Config("service name is empty".to_string()));
        }
        match &self.otlp_endpoint {
            Some(endpoint) if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) => {
                Err(ObservabilityError::Config(format!(
                    "OTLP endpoint must be an http(s) URL, got '{}'",
                    endpoint
                )))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.service_name, "conduit");
        assert!(config.enable_console);
        assert!(config.otlp_endpoint.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ObservabilityConfig::new("conduit-test")
            .with_version("1.2.3")
            .with_log_level("debug")
            .with_ansi(false)
            .with_resource_attribute("host", "ci");
        assert_eq!(config.service_version.as_deref(), Some("1.2.3"));
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert!(!config.ansi);
        assert_eq!(config.resource_attributes, vec![("host".into(), "ci".into())]);
    }

    #[test]
    fn test_validate_endpoint() {
        let bad = ObservabilityConfig::default().with_otlp_endpoint("localhost:4317");
        assert!(matches!(bad.validate(), Err(ObservabilityError::Config(_))));

        let good = ObservabilityConfig::default().with_otlp_endpoint("http://localhost:4317");
        assert!(good.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ObservabilityConfig =
            serde_json::from_str(r#"{"log_level":"trace"}"#).unwrap();
        assert_eq!(config.service_name, "conduit");
        assert_eq!(config.log_level.as_deref(), Some("trace"));
    }
}
