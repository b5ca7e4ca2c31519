//! Configuration conversion utilities for CLI arguments

use crate::cli::main_impl::Cli;
use crate::{
    config::{ApiKey, PipelineConfig, ServiceConfig, API_KEY_ENV, MAX_CONCURRENT_REQUESTS},
    types::BackgroundSpec,
};
use anyhow::{Context, Result};
use std::path::Path;

/// Convert CLI arguments to a validated `PipelineConfig`
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the pipeline configuration from CLI arguments
    pub(crate) fn from_cli(cli: &Cli) -> Result<PipelineConfig> {
        let api_key = cli
            .api_key
            .as_deref()
            .map(ApiKey::new)
            .filter(|key| !key.is_empty())
            .with_context(|| format!("No API key given. Pass --api-key or set {API_KEY_ENV}"))?;

        let defaults = ServiceConfig::default();
        let config = PipelineConfig::builder()
            .api_key(api_key)
            .endpoint(cli.endpoint.clone().unwrap_or(defaults.endpoint))
            .size(cli.size.clone())
            .timeout_secs(cli.timeout.unwrap_or(defaults.timeout_secs))
            .max_concurrent_requests(cli.concurrency)
            .build()
            .context("Invalid configuration")?;

        Ok(config)
    }

    /// Parse the `--background` argument
    pub(crate) fn background(cli: &Cli) -> Result<BackgroundSpec> {
        cli.background
            .parse()
            .with_context(|| format!("Invalid background '{}'", cli.background))
    }

    /// Validate CLI arguments for consistency
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        if cli.concurrency == 0 || cli.concurrency > MAX_CONCURRENT_REQUESTS {
            anyhow::bail!(
                "--concurrency must be between 1 and {MAX_CONCURRENT_REQUESTS}, got {}",
                cli.concurrency
            );
        }

        if let Some(pattern) = &cli.pattern {
            glob::Pattern::new(pattern)
                .with_context(|| format!("Invalid --pattern '{pattern}'"))?;
        }

        if let Some(output) = &cli.output {
            if Path::new(output).is_file() {
                anyhow::bail!("Output path exists and is a file, not a directory: {output}");
            }
        }

        if let Some(archive) = &cli.archive {
            if archive.is_dir() {
                anyhow::bail!("Archive path is a directory: {}", archive.display());
            }
        }

        Self::background(cli)?;
        Ok(())
    }
}
