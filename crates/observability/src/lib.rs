//! Conduit Observability - logging and tracing setup shared by the conduit crates
//!
//! Console output goes to stderr so command output on stdout stays machine
//! readable. Spans can additionally be exported over OTLP.
//!
//! # Quick Start
//!
//! ```no_run
//! use conduit_observability::{ObservabilityConfig, init};
//!
//! let config = ObservabilityConfig::new("conduit")
//!     .with_otlp_endpoint("http://localhost:4317")
//!     .with_log_level("info");
//!
//! init(config)?;
//!
//! // Or from environment variables
//! conduit_observability::init_from_env()?;
//!
//! tracing::info!("Supervisor started");
//! # Ok::<(), conduit_observability::ObservabilityError>(())
//! ```
//!
//! # Environment Variables
//!
//! - `OTEL_SERVICE_NAME` or `SERVICE_NAME` - Service name
//! - `OTEL_SERVICE_VERSION` or `SERVICE_VERSION` - Service version
//! - `OTEL_EXPORTER_OTLP_ENDPOINT` - OTLP endpoint
//! - `CONDUIT_LOG` or `RUST_LOG` - Log level filter

pub mod config;
pub mod error;
pub mod telemetry;
pub mod tracing;

pub use config::ObservabilityConfig;
pub use error::ObservabilityError;
pub use telemetry::{init, init_from_env, shutdown};
pub use tracing::{record_duration, record_error};

// Macros are exported at the crate root via #[macro_export]:
// conduit_observability::server_span!(), conduit_observability::tool_span!()
