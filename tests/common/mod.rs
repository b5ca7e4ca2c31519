//! Shared helpers for integration tests: scripted backends, fetchers and images

#![allow(dead_code)]

use async_trait::async_trait;
use bgremove_studio::{
    ApiKey, BackgroundFetcher, Compositor, ImageIOService, Pipeline, PipelineConfig,
    RemovalBackend, Result, StudioError,
};
use image::{DynamicImage, Rgba, RgbaImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Error a scripted backend answers with for a given input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    /// HTTP 401
    Auth,
    /// HTTP 402 insufficient credits
    Quota,
    /// HTTP 500
    Service,
    /// Connection refused
    Network,
}

impl ScriptedFailure {
    fn to_error(self) -> StudioError {
        match self {
            Self::Auth => StudioError::auth("HTTP 401: API key invalid"),
            Self::Quota => StudioError::quota("HTTP 402: Insufficient credits"),
            Self::Service => StudioError::service("HTTP 500: Internal server error"),
            Self::Network => StudioError::network("connection refused"),
        }
    }
}

/// Removal backend returning a cutout with an opaque center and transparent border
///
/// Every call is recorded. Inputs registered with [`fail_on`](Self::fail_on)
/// produce the scripted error instead of a cutout.
#[derive(Default)]
pub struct MockRemovalBackend {
    failures: Mutex<Vec<(Vec<u8>, ScriptedFailure)>>,
    calls: Mutex<Vec<Vec<u8>>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockRemovalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_on(&self, input: &[u8], failure: ScriptedFailure) {
        self.failures.lock().unwrap().push((input.to_vec(), failure));
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<Vec<u8>> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of calls observed running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemovalBackend for MockRemovalBackend {
    async fn remove(&self, image: &[u8]) -> Result<Vec<u8>> {
        self.calls.lock().unwrap().push(image.to_vec());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failure = self
            .failures
            .lock()
            .unwrap()
            .iter()
            .find(|(input, _)| input.as_slice() == image)
            .map(|(_, failure)| *failure);
        if let Some(failure) = failure {
            return Err(failure.to_error());
        }

        let source = ImageIOService::decode_sync(image)?.to_rgba8();
        ImageIOService::encode_png(&subject_cutout(&source))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Keep the center half of the image opaque, clear everything else
pub fn subject_cutout(source: &RgbaImage) -> RgbaImage {
    let (width, height) = source.dimensions();
    RgbaImage::from_fn(width, height, |x, y| {
        if is_subject(x, y, width, height) {
            let [r, g, b, _] = source.get_pixel(x, y).0;
            Rgba([r, g, b, 255])
        } else {
            Rgba([0, 0, 0, 0])
        }
    })
}

/// Whether (x, y) lies in the opaque center of a mock cutout
pub fn is_subject(x: u32, y: u32, width: u32, height: u32) -> bool {
    x >= width / 4 && x < width - width / 4 && y >= height / 4 && y < height - height / 4
}

/// Background fetcher serving one fixed image and counting requests
pub struct StaticFetcher {
    image: DynamicImage,
    requests: AtomicUsize,
}

impl StaticFetcher {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image,
            requests: AtomicUsize::new(0),
        }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackgroundFetcher for StaticFetcher {
    async fn fetch(&self, _url: &str) -> Result<DynamicImage> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.image.clone())
    }
}

/// Background fetcher for which every URL is unreachable
pub struct UnreachableFetcher;

#[async_trait]
impl BackgroundFetcher for UnreachableFetcher {
    async fn fetch(&self, url: &str) -> Result<DynamicImage> {
        Err(StudioError::composite_fetch(format!("{url}: connection refused")))
    }
}

/// Valid configuration with a dummy key
pub fn test_config(concurrency: usize) -> PipelineConfig {
    PipelineConfig::builder()
        .api_key(ApiKey::new("test-key"))
        .max_concurrent_requests(concurrency)
        .build()
        .unwrap()
}

pub fn pipeline_with(
    backend: Arc<MockRemovalBackend>,
    fetcher: Arc<dyn BackgroundFetcher>,
    concurrency: usize,
) -> Pipeline {
    Pipeline::with_components(test_config(concurrency), backend, Compositor::new(fetcher))
}

/// Pipeline with a mock backend and no reachable backgrounds
pub fn mock_pipeline(concurrency: usize) -> (Pipeline, Arc<MockRemovalBackend>) {
    let backend = Arc::new(MockRemovalBackend::new());
    let pipeline = pipeline_with(backend.clone(), Arc::new(UnreachableFetcher), concurrency);
    (pipeline, backend)
}

/// PNG of a single color; distinct colors give distinct byte payloads
pub fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let [r, g, b] = color;
    ImageIOService::encode_png(&RgbaImage::from_pixel(width, height, Rgba([r, g, b, 255]))).unwrap()
}
