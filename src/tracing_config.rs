//! Tracing configuration module for structured logging
//!
//! The library only emits trace events; the CLI installs the subscriber. Log
//! output goes to stderr so results printed on stdout stay machine readable.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Configuration for tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable console output with colors (default for CLI)
    Console,
    /// Compact console output without ANSI colors, for CI logs
    Compact,
    /// JSON structured logging
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Tracing configuration builder
#[derive(Debug)]
pub struct TracingConfig {
    /// Verbosity level (maps to log levels)
    pub verbosity: u8,
    pub format: TracingFormat,
    /// Environment filter string (overrides verbosity if set)
    pub env_filter: Option<String>,
    /// Session ID for correlating one CLI run
    pub session_id: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            env_filter: None,
            session_id: None,
        }
    }
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set verbosity level (0-2)
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    /// Set a custom filter such as `bgremove_studio=debug,reqwest=warn`
    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Convert verbosity level to tracing filter string
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",  // Default: run summaries and problems
            1 => "debug", // -v: per-image state changes and HTTP details
            _ => "trace", // -vv+: everything
        }
    }

    /// Root span for one run, carrying the session id when one is set
    #[must_use]
    pub fn session_span(&self) -> tracing::Span {
        match &self.session_id {
            Some(session_id) => tracing::info_span!("session", session_id = %session_id),
            None => tracing::Span::none(),
        }
    }

    /// Install the global subscriber and return the session root span
    ///
    /// Work run inside the returned span is tagged with the session id.
    ///
    /// # Errors
    /// - the filter string cannot be parsed
    /// - a global subscriber is already installed
    pub fn init(self) -> anyhow::Result<tracing::Span> {
        let filter = if let Some(env_filter) = &self.env_filter {
            EnvFilter::try_new(env_filter)?
        } else {
            EnvFilter::try_new(self.verbosity_to_filter())?
        };

        let registry = Registry::default().with(filter);

        match self.format {
            TracingFormat::Console => {
                let fmt_layer = fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(false)
                    .with_level(true)
                    .compact();
                registry.with(fmt_layer).try_init()?;
            },
            TracingFormat::Compact => {
                let fmt_layer = fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false)
                    .with_target(false)
                    .compact();
                registry.with(fmt_layer).try_init()?;
            },
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => {
                let fmt_layer = fmt::layer()
                    .with_writer(std::io::stderr)
                    .json()
                    .with_current_span(true)
                    .with_span_list(true);
                registry.with(fmt_layer).try_init()?;
            },
        }

        let span = self.session_span();
        if let Some(session_id) = &self.session_id {
            tracing::info!(parent: &span, session_id = %session_id, "Background removal session started");
        }

        Ok(span)
    }
}

/// Initialize tracing with CLI defaults and a fresh session id
///
/// # Errors
/// - see [`TracingConfig::init`]
pub fn init_cli_tracing(verbosity: u8, filter: Option<&str>) -> anyhow::Result<tracing::Span> {
    let mut config = TracingConfig::new()
        .with_verbosity(verbosity)
        .with_session_id(uuid::Uuid::new_v4().to_string());
    if let Some(filter) = filter {
        config = config.with_env_filter(filter);
    }
    config.init()
}
