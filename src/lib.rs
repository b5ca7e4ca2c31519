#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # Background Removal Studio
//!
//! Batch background removal through a remote segmentation service, with local
//! compositing over replacement backgrounds and zip packaging of the results.
//!
//! ## Features
//!
//! - **Batch Pipeline**: ingest many images, remove their backgrounds in one run,
//!   and keep per-image status for partial failures
//! - **Remote Removal**: multipart upload to a remove.bg compatible endpoint, with
//!   the API key read from configuration or the environment
//! - **Compositing**: transparent, solid color, diagonal gradient, or an external
//!   image scaled to cover the canvas
//! - **Packaging**: one zip archive with a PNG per processed image
//! - **CLI Integration**: optional command-line interface (enable with `cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bgremove_studio::{BackgroundSpec, Color, InputImage, Pipeline, PipelineConfig, ServiceConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = PipelineConfig::builder()
//!     .service(ServiceConfig::from_env()?)
//!     .max_concurrent_requests(4)
//!     .build()?;
//! let pipeline = Pipeline::new(config)?;
//!
//! let bytes = tokio::fs::read("portrait.jpg").await?;
//! let ids = pipeline.ingest(vec![InputImage::named("portrait.jpg", bytes)]).await.ids();
//!
//! let report = pipeline.remove_background_all(CancellationToken::new()).await?;
//! for (id, category, message) in report.failed() {
//!     eprintln!("{id}: {category}: {message}");
//! }
//!
//! pipeline
//!     .update_background(&ids[0], BackgroundSpec::solid(Color::WHITE))
//!     .await?;
//! let archive = pipeline.package_all().await?;
//! tokio::fs::write("results.zip", archive).await?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod backends;
pub mod batch;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compositor;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod services;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

// Public API exports
pub use archive::{write_archive, ArchivePackager};
pub use backends::{RemovalBackend, RemoveBgClient};
pub use batch::{Batch, BatchEntry, ProcessedImage, SourceImage};
pub use compositor::{Backdrop, BackgroundFetcher, Compositor, HttpBackgroundFetcher};
pub use config::{ApiKey, PipelineConfig, PipelineConfigBuilder, ServiceConfig};
pub use error::{ErrorCategory, Result, StudioError};
pub use pipeline::{
    BatchReport, IngestOutcome, IngestReport, InputImage, ItemOutcome, Pipeline, PipelineEvent,
};
pub use services::ImageIOService;
pub use types::{BackgroundSpec, Color, ImageId, ImageStatus};

#[cfg(feature = "cli")]
pub use tracing_config::{TracingConfig, TracingFormat};

/// Remove the background of a single image and return it as PNG
///
/// Convenience wrapper around a one-image [`Pipeline`]: the image is sent to
/// the configured service once and composited over `background`.
///
/// # Examples
///
/// ```rust,no_run
/// use bgremove_studio::{remove_background_from_bytes, BackgroundSpec, PipelineConfig, ServiceConfig};
///
/// # async fn example(upload: Vec<u8>) -> anyhow::Result<()> {
/// let config = PipelineConfig::builder()
///     .service(ServiceConfig::from_env()?)
///     .build()?;
/// let png = remove_background_from_bytes(upload, &config, &BackgroundSpec::Transparent).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
/// - `Decode` if the input is not a readable image
/// - `Network`, `Auth`, `Quota` or `Service` if the removal call fails
/// - `CompositeFetch` if an external background cannot be fetched
pub async fn remove_background_from_bytes(
    bytes: Vec<u8>,
    config: &PipelineConfig,
    background: &BackgroundSpec,
) -> Result<Vec<u8>> {
    let pipeline = Pipeline::new(config.clone())?;
    let ingest = pipeline.ingest(vec![InputImage::new(bytes)]).await;
    match ingest.outcomes.into_iter().next() {
        Some(IngestOutcome::Decoded { id }) => {
            let report = pipeline
                .remove_background_all(CancellationToken::new())
                .await?;
            if let Some((_, category, message)) = report.failed().first() {
                return Err(StudioError::from_category(*category, *message));
            }
            pipeline.update_background(&id, background.clone()).await?;
            pipeline.render(&id).await
        },
        Some(IngestOutcome::DecodeFailed { message, .. }) => Err(StudioError::decode(message)),
        _ => Err(StudioError::decode("No image was ingested")),
    }
}

/// Like [`remove_background_from_bytes`], reading the image from any async reader
pub async fn remove_background_from_reader<R: AsyncRead + Unpin>(
    mut reader: R,
    config: &PipelineConfig,
    background: &BackgroundSpec,
) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).await?;
    remove_background_from_bytes(bytes, config, background).await
}
