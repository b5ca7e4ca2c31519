//! Image I/O operations service
//!
//! This module separates decoding, encoding and file I/O from the pipeline
//! state machine. Decoding and encoding are CPU bound and run on the blocking
//! pool so the async driver stays responsive.

use crate::error::{Result, StudioError};
use image::{codecs::png::PngEncoder, DynamicImage, ImageEncoder, RgbaImage};
use std::path::Path;
use std::sync::Arc;

/// Service for decoding, encoding and storing images
pub struct ImageIOService;

impl ImageIOService {
    /// Decode raw input bytes into a bitmap
    ///
    /// # Errors
    /// - `Decode` if the bytes are not an image the `image` crate can read
    pub async fn decode(bytes: Arc<[u8]>) -> Result<DynamicImage> {
        tokio::task::spawn_blocking(move || Self::decode_sync(&bytes))
            .await
            .map_err(|e| StudioError::decode(format!("Decode task failed: {e}")))?
    }

    /// Blocking variant of [`decode`](Self::decode)
    pub fn decode_sync(bytes: &[u8]) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(StudioError::decode("Input is empty"));
        }
        image::load_from_memory(bytes).map_err(|e| {
            let format = image::guess_format(bytes)
                .map_or_else(|_| "unknown".to_string(), |f| format!("{f:?}"));
            StudioError::decode(format!(
                "Failed to decode image ({} bytes, format: {}): {}",
                bytes.len(),
                format,
                e
            ))
        })
    }

    /// Decode the cutout returned by the removal service
    ///
    /// # Errors
    /// - `Service` if the service answered with something that is not an image
    pub async fn decode_cutout(bytes: Vec<u8>) -> Result<RgbaImage> {
        tokio::task::spawn_blocking(move || {
            image::load_from_memory(&bytes)
                .map(|img| img.to_rgba8())
                .map_err(|e| {
                    StudioError::service(format!(
                        "Service returned an undecodable cutout ({} bytes): {}",
                        bytes.len(),
                        e
                    ))
                })
        })
        .await
        .map_err(|e| StudioError::service(format!("Cutout decode task failed: {e}")))?
    }

    /// Encode an RGBA bitmap as PNG (truecolor with alpha, 8 bits per channel)
    ///
    /// # Errors
    /// - `Image` if the encoder fails
    pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(image.as_raw().len() / 2);
        PngEncoder::new(&mut buffer).write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgba8,
        )?;
        Ok(buffer)
    }

    /// Read an input file
    ///
    /// # Errors
    /// - `Io` with the path in the message if the file cannot be read
    pub async fn read_input<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
        let path_ref = path.as_ref();
        tokio::fs::read(path_ref)
            .await
            .map_err(|e| StudioError::file_io_error("read input image", path_ref, &e))
    }

    /// Write an output file atomically (temp file in the same directory, then rename)
    ///
    /// A failed write never leaves a partial file under the final name.
    ///
    /// # Errors
    /// - `Io` with the path in the message on any file system failure
    pub async fn write_output<P: AsRef<Path>>(path: P, bytes: &[u8]) -> Result<()> {
        let path_ref = path.as_ref();

        if let Some(parent) = path_ref.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StudioError::file_io_error("create output directory", parent, &e))?;
        }

        let file_name = path_ref
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StudioError::invalid_config(format!("Invalid output path '{}'", path_ref.display())))?;
        let temp_path = path_ref.with_file_name(format!(".{file_name}.partial"));

        if let Err(e) = tokio::fs::write(&temp_path, bytes).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(StudioError::file_io_error("write output", &temp_path, &e));
        }

        tokio::fs::rename(&temp_path, path_ref).await.map_err(|e| {
            StudioError::file_io_error("move output into place", path_ref, &e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        ImageIOService::encode_png(&RgbaImage::from_pixel(
            width,
            height,
            image::Rgba([10, 20, 30, 128]),
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_decode_valid_png() {
        let bytes: Arc<[u8]> = Arc::from(png_bytes(3, 2));
        let image = ImageIOService::decode(bytes).await.unwrap();
        assert_eq!((image.width(), image.height()), (3, 2));
    }

    #[tokio::test]
    async fn test_decode_rejects_garbage() {
        let bytes: Arc<[u8]> = Arc::from(b"this is not an image".to_vec());
        let err = ImageIOService::decode(bytes).await.unwrap_err();
        assert!(matches!(err, StudioError::Decode(_)));

        let empty: Arc<[u8]> = Arc::from(Vec::new());
        assert!(matches!(
            ImageIOService::decode(empty).await,
            Err(StudioError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_decode_cutout_maps_to_service_error() {
        let err = ImageIOService::decode_cutout(b"{\"errors\":[]}".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, StudioError::Service(_)));

        let cutout = ImageIOService::decode_cutout(png_bytes(4, 4)).await.unwrap();
        assert_eq!(cutout.get_pixel(0, 0).0, [10, 20, 30, 128]);
    }

    #[test]
    fn test_png_keeps_alpha() {
        let mut image = RgbaImage::new(2, 1);
        image.put_pixel(0, 0, image::Rgba([255, 0, 0, 0]));
        image.put_pixel(1, 0, image::Rgba([0, 255, 0, 77]));
        let encoded = ImageIOService::encode_png(&image).unwrap();
        assert_eq!(image::guess_format(&encoded).unwrap(), image::ImageFormat::Png);

        let decoded = image::load_from_memory(&encoded).unwrap().to_rgba8();
        assert_eq!(decoded, image);
    }

    #[tokio::test]
    async fn test_write_output_is_atomic_and_creates_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("nested").join("out.png");

        ImageIOService::write_output(&target, b"png-bytes").await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"png-bytes");
        let leftovers: Vec<_> = std::fs::read_dir(target.parent().unwrap())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_read_missing_input() {
        let err = ImageIOService::read_input("/definitely/not/here.png")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.png"));
    }
}
