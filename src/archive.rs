//! Zip packaging of every composited image in a batch

use crate::{
    batch::Batch,
    compositor::Compositor,
    error::{Result, StudioError},
};
use std::io::{Cursor, Write};
use tracing::{info, instrument};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

/// Builds one archive holding `{id}.png` for each processed entry
#[derive(Debug, Clone)]
pub struct ArchivePackager {
    compositor: Compositor,
    compression: CompressionMethod,
}

impl ArchivePackager {
    #[must_use]
    pub fn new(compositor: Compositor) -> Self {
        Self {
            compositor,
            compression: CompressionMethod::Deflated,
        }
    }

    /// Store entries without compression (PNG data is already compressed)
    #[must_use]
    pub fn stored(mut self) -> Self {
        self.compression = CompressionMethod::Stored;
        self
    }

    /// Render every processed entry with its current background and zip the results
    ///
    /// Entries without a cutout are skipped. The archive is only returned when
    /// every render succeeded.
    ///
    /// # Errors
    /// - `EmptyBatch` if no entry has been processed
    /// - `CompositeFetch` if any external background cannot be fetched
    /// - `Archive` if the zip container cannot be written
    #[instrument(skip(self, batch), fields(entries = batch.len()))]
    pub async fn package_all(&self, batch: &Batch) -> Result<Vec<u8>> {
        let processed: Vec<_> = batch.processed().collect();
        if processed.is_empty() {
            return Err(StudioError::EmptyBatch);
        }

        let mut rendered = Vec::with_capacity(processed.len());
        for image in &processed {
            let png = self
                .compositor
                .render_png(&image.cutout, &image.background)
                .await?;
            rendered.push((image.id.png_file_name(), png));
        }

        let archive = write_archive(&rendered, self.compression)?;
        info!(
            files = rendered.len(),
            skipped = batch.len() - rendered.len(),
            bytes = archive.len(),
            "Packaged archive"
        );
        Ok(archive)
    }
}

/// Write named files into an in-memory zip container
///
/// # Errors
/// - `Archive` on a duplicate name or any zip writer failure
pub fn write_archive(files: &[(String, Vec<u8>)], compression: CompressionMethod) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(compression)
        .unix_permissions(0o644);

    for (name, bytes) in files {
        writer.start_file(name.as_str(), options)?;
        writer
            .write_all(bytes)
            .map_err(|e| StudioError::archive(format!("Failed to write '{name}': {e}")))?;
    }

    Ok(writer.finish()?.into_inner())
}
