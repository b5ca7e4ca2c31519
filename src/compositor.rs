//! Compositing of cutouts over replacement backgrounds
//!
//! Rendering always produces a canvas the exact size of the cutout:
//!
//! 1. the background is painted (transparent, solid, 45° gradient, or an
//!    external image scaled to cover the canvas),
//! 2. the cutout is drawn at (0, 0) with source-over alpha blending.
//!
//! Over a transparent background the cutout pixels are copied unchanged, so a
//! transparent render preserves the cutout's alpha channel exactly.

use crate::{
    config::PipelineConfig,
    error::{Result, StudioError},
    services::ImageIOService,
    types::{BackgroundSpec, Color},
};
use async_trait::async_trait;
use image::{imageops::FilterType, DynamicImage, Rgba, RgbaImage};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Source of external background images
#[async_trait]
pub trait BackgroundFetcher: Send + Sync {
    /// Fetch and decode the image at `url`
    ///
    /// # Errors
    /// - `CompositeFetch` if the resource cannot be retrieved or decoded
    async fn fetch(&self, url: &str) -> Result<DynamicImage>;
}

/// Fetches background images over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpBackgroundFetcher {
    client: Client,
    max_bytes: u64,
}

impl HttpBackgroundFetcher {
    /// Create a fetcher with a request timeout and a download size cap
    ///
    /// # Errors
    /// - `Network` if the HTTP client cannot be created
    pub fn new(timeout: Duration, max_bytes: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("bgremove-studio/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StudioError::network_error("Failed to create HTTP client", &e))?;
        Ok(Self { client, max_bytes })
    }

    /// Create a fetcher from the pipeline settings
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Self::new(config.background_fetch_timeout(), config.max_background_bytes)
    }
}

#[async_trait]
impl BackgroundFetcher for HttpBackgroundFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<DynamicImage> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StudioError::composite_fetch(format!("Failed to fetch '{url}': {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StudioError::composite_fetch(format!(
                "Fetching '{url}' returned HTTP {}",
                status.as_u16()
            )));
        }
        if response.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(StudioError::composite_fetch(format!(
                "Background '{url}' exceeds the {} byte limit",
                self.max_bytes
            )));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            StudioError::composite_fetch(format!("Failed to read '{url}': {e}"))
        })? {
            if (body.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(StudioError::composite_fetch(format!(
                    "Background '{url}' exceeds the {} byte limit",
                    self.max_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }
        debug!(bytes = body.len(), "Fetched background image");

        ImageIOService::decode(Arc::from(body))
            .await
            .map_err(|e| StudioError::composite_fetch(format!("Background '{url}' is not a usable image: {e}")))
    }
}

/// A background ready to be painted, with any external image already fetched
#[derive(Debug, Clone)]
pub enum Backdrop {
    Transparent,
    Solid(Color),
    Gradient { start: Color, end: Color },
    Image(DynamicImage),
}

/// Renders cutouts over backgrounds and encodes the result
#[derive(Clone)]
pub struct Compositor {
    fetcher: Arc<dyn BackgroundFetcher>,
}

impl std::fmt::Debug for Compositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compositor").finish_non_exhaustive()
    }
}

impl Compositor {
    #[must_use]
    pub fn new(fetcher: Arc<dyn BackgroundFetcher>) -> Self {
        Self { fetcher }
    }

    /// Compositor fetching external backgrounds over HTTP
    pub fn with_http(config: &PipelineConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(HttpBackgroundFetcher::from_config(config)?)))
    }

    /// Resolve a background spec, fetching the external image if needed
    pub async fn resolve(&self, spec: &BackgroundSpec) -> Result<Backdrop> {
        Ok(match spec {
            BackgroundSpec::Transparent => Backdrop::Transparent,
            BackgroundSpec::Solid { color } => Backdrop::Solid(*color),
            BackgroundSpec::Gradient { start, end } => Backdrop::Gradient {
                start: *start,
                end: *end,
            },
            BackgroundSpec::Image { url } => Backdrop::Image(self.fetcher.fetch(url).await?),
        })
    }

    /// Flatten the cutout over the background described by `spec`
    ///
    /// # Errors
    /// - `CompositeFetch` if an external background cannot be fetched or decoded
    #[instrument(skip(self, cutout), fields(width = cutout.width(), height = cutout.height(), background = spec.kind()))]
    pub async fn render(&self, cutout: &RgbaImage, spec: &BackgroundSpec) -> Result<RgbaImage> {
        let backdrop = self.resolve(spec).await?;
        Ok(compose(cutout, &backdrop))
    }

    /// Render and encode as PNG
    pub async fn render_png(&self, cutout: &RgbaImage, spec: &BackgroundSpec) -> Result<Vec<u8>> {
        let flattened = self.render(cutout, spec).await?;
        ImageIOService::encode_png(&flattened)
    }
}

/// Paint `backdrop` on a canvas the size of `cutout` and draw the cutout on top
#[must_use]
pub fn compose(cutout: &RgbaImage, backdrop: &Backdrop) -> RgbaImage {
    let (width, height) = cutout.dimensions();
    let mut canvas = paint(width, height, backdrop);
    draw_over(&mut canvas, cutout);
    canvas
}

/// Paint a background of the given size
#[must_use]
pub fn paint(width: u32, height: u32, backdrop: &Backdrop) -> RgbaImage {
    match backdrop {
        Backdrop::Transparent => RgbaImage::new(width, height),
        Backdrop::Solid(color) => RgbaImage::from_pixel(width, height, color.to_rgba()),
        Backdrop::Gradient { start, end } => fill_gradient(width, height, *start, *end),
        Backdrop::Image(image) => fill_cover(image, width, height),
    }
}

/// Linear gradient along the 45° diagonal, `start` at (0, 0), `end` at the far corner
#[must_use]
pub fn fill_gradient(width: u32, height: u32, start: Color, end: Color) -> RgbaImage {
    let span = (width.saturating_sub(1) + height.saturating_sub(1)) as f32;
    let lerp = |a: u8, b: u8, t: f32| (f32::from(a) + (f32::from(b) - f32::from(a)) * t).round() as u8;

    RgbaImage::from_fn(width, height, |x, y| {
        let t = if span > 0.0 { (x + y) as f32 / span } else { 0.0 };
        Rgba([
            lerp(start.r, end.r, t),
            lerp(start.g, end.g, t),
            lerp(start.b, end.b, t),
            255,
        ])
    })
}

/// Scale and center-crop `image` so it fills `width` x `height` exactly
#[must_use]
pub fn fill_cover(image: &DynamicImage, width: u32, height: u32) -> RgbaImage {
    if width == 0 || height == 0 || image.width() == 0 || image.height() == 0 {
        return RgbaImage::new(width, height);
    }
    if image.width() == width && image.height() == height {
        return image.to_rgba8();
    }
    image
        .resize_to_fill(width, height, FilterType::Lanczos3)
        .to_rgba8()
}

/// Draw `source` over `canvas` at (0, 0) with source-over blending
///
/// Pixels outside the canvas are ignored.
pub fn draw_over(canvas: &mut RgbaImage, source: &RgbaImage) {
    let width = canvas.width().min(source.width());
    let height = canvas.height().min(source.height());

    for y in 0..height {
        for x in 0..width {
            let src = *source.get_pixel(x, y);
            let dst = canvas.get_pixel_mut(x, y);
            *dst = blend_over(src, *dst);
        }
    }
}

/// Straight-alpha source-over for one pixel
#[must_use]
pub fn blend_over(src: Rgba<u8>, dst: Rgba<u8>) -> Rgba<u8> {
    let [sr, sg, sb, sa] = src.0;
    let [dr, dg, db, da] = dst.0;

    if sa == 255 || da == 0 {
        return src;
    }
    if sa == 0 {
        return dst;
    }

    let sa_f = f32::from(sa) / 255.0;
    let da_f = f32::from(da) / 255.0;
    let out_a = sa_f + da_f * (1.0 - sa_f);
    let channel = |s: u8, d: u8| {
        let value = (f32::from(s) * sa_f + f32::from(d) * da_f * (1.0 - sa_f)) / out_a;
        value.round().clamp(0.0, 255.0) as u8
    };

    Rgba([
        channel(sr, dr),
        channel(sg, dg),
        channel(sb, db),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticFetcher(DynamicImage);

    #[async_trait]
    impl BackgroundFetcher for StaticFetcher {
        async fn fetch(&self, _url: &str) -> Result<DynamicImage> {
            Ok(self.0.clone())
        }
    }

    struct UnreachableFetcher;

    #[async_trait]
    impl BackgroundFetcher for UnreachableFetcher {
        async fn fetch(&self, url: &str) -> Result<DynamicImage> {
            Err(StudioError::composite_fetch(format!("{url} unreachable")))
        }
    }

    /// 4x4 cutout with an opaque blue 2x2 subject in the middle
    fn subject_cutout() -> RgbaImage {
        RgbaImage::from_fn(4, 4, |x, y| {
            if (1..3).contains(&x) && (1..3).contains(&y) {
                Rgba([0, 0, 255, 255])
            } else {
                Rgba([0, 0, 0, 0])
            }
        })
    }

    #[test]
    fn test_blend_over_edge_cases() {
        let red = Rgba([255, 0, 0, 255]);
        let clear = Rgba([0, 0, 0, 0]);
        assert_eq!(blend_over(clear, red), red);
        assert_eq!(blend_over(red, clear), red);
        let soft = Rgba([10, 20, 30, 40]);
        assert_eq!(blend_over(soft, clear), soft);

        let half_white = Rgba([255, 255, 255, 128]);
        let out = blend_over(half_white, Rgba([0, 0, 0, 255]));
        assert_eq!(out.0[3], 255);
        assert!((127..=129).contains(&out.0[0]));
    }

    #[test]
    fn test_solid_background_keeps_subject() {
        let cutout = subject_cutout();
        let out = compose(&cutout, &Backdrop::Solid(Color::rgb(255, 0, 0)));
        assert_eq!(out.dimensions(), (4, 4));
        assert_eq!(out.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(out.get_pixel(1, 1).0, [0, 0, 255, 255]);
    }

    #[test]
    fn test_gradient_endpoints() {
        let start = Color::rgb(0, 0, 0);
        let end = Color::rgb(200, 100, 50);
        let gradient = fill_gradient(5, 3, start, end);
        assert_eq!(gradient.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(gradient.get_pixel(4, 2).0, [200, 100, 50, 255]);
        // Pixels on the same anti-diagonal share a color
        assert_eq!(gradient.get_pixel(2, 0), gradient.get_pixel(0, 2));
        assert_eq!(gradient.get_pixel(3, 0).0, [100, 50, 25, 255]);

        let single = fill_gradient(1, 1, start, end);
        assert_eq!(single.get_pixel(0, 0).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_cover_fills_exact_dimensions() {
        let wide = DynamicImage::ImageRgba8(RgbaImage::from_pixel(40, 10, Rgba([9, 9, 9, 255])));
        let covered = fill_cover(&wide, 8, 8);
        assert_eq!(covered.dimensions(), (8, 8));
        assert!(covered.pixels().all(|p| p.0[3] == 255));

        let tall = DynamicImage::ImageRgba8(RgbaImage::from_pixel(3, 30, Rgba([1, 2, 3, 255])));
        assert_eq!(fill_cover(&tall, 10, 4).dimensions(), (10, 4));
        assert_eq!(fill_cover(&tall, 0, 4).dimensions(), (0, 4));
    }

    #[tokio::test]
    async fn test_render_with_external_image() {
        let background = DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 16, Rgba([0, 200, 0, 255])));
        let compositor = Compositor::new(Arc::new(StaticFetcher(background)));
        let spec = BackgroundSpec::image_url("https://example.com/grass.png").unwrap();

        let out = compositor.render(&subject_cutout(), &spec).await.unwrap();
        assert_eq!(out.dimensions(), (4, 4));
        assert_eq!(out.get_pixel(0, 3).0, [0, 200, 0, 255]);
        assert_eq!(out.get_pixel(2, 2).0, [0, 0, 255, 255]);
    }

    #[tokio::test]
    async fn test_render_fails_when_background_unreachable() {
        let compositor = Compositor::new(Arc::new(UnreachableFetcher));
        let spec = BackgroundSpec::image_url("https://example.com/missing.png").unwrap();
        let err = compositor.render(&subject_cutout(), &spec).await.unwrap_err();
        assert!(matches!(err, StudioError::CompositeFetch(_)));

        // Other variants never touch the fetcher
        let png = compositor
            .render_png(&subject_cutout(), &BackgroundSpec::Transparent)
            .await
            .unwrap();
        assert_eq!(image::guess_format(&png).unwrap(), image::ImageFormat::Png);
    }
}
