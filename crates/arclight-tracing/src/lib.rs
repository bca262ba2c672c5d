//! Shared tracing configuration for the Arclight workspace.
//!
//! Executables, integration tests, and benches all install their `tracing`
//! subscriber through this crate so filter resolution and output format stay
//! consistent instead of being copy-pasted per binary.

pub mod perf;

#[macro_use]
pub mod macros;

use std::env;
use std::error::Error;
use std::fmt;

pub use tracing::{debug, error, info, trace, warn};

use tracing::Subscriber;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter, Layer, Registry};

/// Output format for the formatter layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingOutput {
    /// Human-oriented multi-line output
    Pretty,
    /// Single-line output for terminals
    Compact,
    /// Machine-readable JSON for log collection
    Json,
}

impl TracingOutput {
    fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "compact" => Some(Self::Compact),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Configuration describing how the shared subscriber should behave
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Explicit filter directives (e.g. `arclight_backends=debug,info`).
    /// When absent the crate falls back to `RUST_LOG`, then to
    /// `default_directive`.
    pub directives: Option<String>,
    /// Fallback directive when neither `directives` nor `RUST_LOG` apply
    pub default_directive: String,
    /// Whether event targets (module paths) appear in output
    pub include_targets: bool,
    /// ANSI colour; disable for CI logs
    pub ansi: bool,
    /// Span lifecycle events to emit
    pub span_events: FmtSpan,
    pub output: TracingOutput,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::for_local()
    }
}

impl TracingConfig {
    /// Configuration tuned for local development
    pub fn for_local() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            include_targets: true,
            ansi: true,
            span_events: FmtSpan::NONE,
            output: TracingOutput::Pretty,
        }
    }

    /// Configuration tuned for CI and log collection (JSON, no ANSI)
    pub fn for_ci() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            include_targets: true,
            ansi: false,
            span_events: FmtSpan::NONE,
            output: TracingOutput::Json,
        }
    }

    /// Build a configuration from environment hints.
    ///
    /// # Environment Variables
    ///
    /// - `ARCLIGHT_TRACING_PROFILE` - `local` (default) or `ci`
    /// - `ARCLIGHT_TRACING_DIRECTIVES` - overrides filter directives
    /// - `ARCLIGHT_TRACING_FORMAT` - `pretty`, `compact`, or `json`
    pub fn from_env() -> Self {
        let profile = env::var("ARCLIGHT_TRACING_PROFILE")
            .unwrap_or_else(|_| "local".to_string())
            .to_ascii_lowercase();

        let mut config = match profile.as_str() {
            "ci" => Self::for_ci(),
            _ => Self::for_local(),
        };

        if let Ok(directives) = env::var("ARCLIGHT_TRACING_DIRECTIVES") {
            if !directives.trim().is_empty() {
                config.directives = Some(directives);
            }
        }

        if let Ok(format) = env::var("ARCLIGHT_TRACING_FORMAT") {
            if let Some(parsed) = TracingOutput::from_env_value(&format) {
                config.output = parsed;
                if parsed == TracingOutput::Json {
                    config.ansi = false;
                }
            }
        }

        config
    }

    fn resolve_filter(&self) -> Result<EnvFilter, TracingSetupError> {
        if let Some(directives) = &self.directives {
            EnvFilter::try_new(directives)
                .map_err(|err| TracingSetupError::InvalidFilter(err.to_string()))
        } else {
            Ok(EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(self.default_directive.clone())))
        }
    }
}

/// Errors surfaced when subscriber setup fails
#[derive(Debug)]
pub enum TracingSetupError {
    /// The directive string could not be parsed
    InvalidFilter(String),
    /// Installing the global subscriber failed (usually one is already set)
    SubscriberInit(tracing_subscriber::util::TryInitError),
}

impl fmt::Display for TracingSetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TracingSetupError::InvalidFilter(msg) => write!(f, "invalid tracing directive: {msg}"),
            TracingSetupError::SubscriberInit(err) => {
                write!(f, "failed to install global tracing subscriber: {err}")
            }
        }
    }
}

impl Error for TracingSetupError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TracingSetupError::SubscriberInit(err) => Some(err),
            _ => None,
        }
    }
}

/// Build a subscriber from the configuration without installing it
pub fn build_subscriber(
    config: &TracingConfig,
) -> Result<impl Subscriber + Send + Sync, TracingSetupError> {
    let filter = config.resolve_filter()?;
    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.output {
        TracingOutput::Pretty => Box::new(
            tracing_fmt::layer()
                .pretty()
                .with_target(config.include_targets)
                .with_ansi(config.ansi)
                .with_span_events(config.span_events.clone()),
        ),
        TracingOutput::Compact => Box::new(
            tracing_fmt::layer()
                .compact()
                .with_target(config.include_targets)
                .with_ansi(config.ansi)
                .with_span_events(config.span_events.clone()),
        ),
        TracingOutput::Json => Box::new(
            tracing_fmt::layer()
                .json()
                .with_target(config.include_targets)
                .with_span_events(config.span_events.clone()),
        ),
    };
    Ok(Registry::default().with(layer).with(filter))
}

/// Install the global subscriber, failing if one is already set
pub fn try_init(config: &TracingConfig) -> Result<(), TracingSetupError> {
    build_subscriber(config)?
        .try_init()
        .map_err(TracingSetupError::SubscriberInit)
}

/// Install the global subscriber for tests and tools.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_for_tests() {
    let _ = try_init(&TracingConfig::from_env());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_parsing() {
        assert_eq!(TracingOutput::from_env_value(" JSON "), Some(TracingOutput::Json));
        assert_eq!(TracingOutput::from_env_value("pretty"), Some(TracingOutput::Pretty));
        assert_eq!(TracingOutput::from_env_value("verbose"), None);
    }

    #[test]
    fn test_invalid_directives_rejected() {
        let mut config = TracingConfig::for_local();
        config.directives = Some("not a === directive".to_string());
        assert!(matches!(
            config.resolve_filter(),
            Err(TracingSetupError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_default_profile_is_local() {
        let config = TracingConfig::default();
        assert_eq!(config.output, TracingOutput::Pretty);
        assert!(config.ansi);
    }
}
