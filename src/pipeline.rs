//! Image pipeline: the single writer of batch state
//!
//! The [`Pipeline`] owns the [`Batch`] and exposes the operations that mutate
//! it (ingest, background removal, background updates). Every mutation is
//! published as a [`PipelineEvent`] to subscribers. Removal calls run without
//! holding the state lock, and their results are applied in insertion order.

use crate::{
    archive::ArchivePackager,
    backends::{RemovalBackend, RemoveBgClient},
    batch::Batch,
    compositor::Compositor,
    config::PipelineConfig,
    error::{ErrorCategory, Result, StudioError},
    services::ImageIOService,
    types::{BackgroundSpec, ImageId},
};
use futures::{future::join_all, stream, StreamExt};
use instant::Instant;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Raw image handed to [`Pipeline::ingest`]
#[derive(Debug, Clone)]
pub struct InputImage {
    /// Original file name, if any
    pub name: Option<String>,
    pub bytes: Vec<u8>,
}

impl InputImage {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { name: None, bytes }
    }

    #[must_use]
    pub fn named<S: Into<String>>(name: S, bytes: Vec<u8>) -> Self {
        Self {
            name: Some(name.into()),
            bytes,
        }
    }
}

/// State change notifications published to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    Ingested { id: ImageId },
    Decoded { id: ImageId, width: u32, height: u32 },
    DecodeFailed { id: ImageId, message: String },
    Submitted { id: ImageId },
    Processed { id: ImageId },
    Failed { id: ImageId, category: ErrorCategory, message: String },
    Cancelled { id: ImageId },
    BackgroundChanged { id: ImageId, spec: BackgroundSpec },
    Removed { id: ImageId },
    Cleared,
}

/// Result of ingesting one input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Decoded { id: ImageId },
    DecodeFailed { id: ImageId, message: String },
    /// The file could not be read, so no entry was created
    Unreadable { path: PathBuf, message: String },
    /// The entry was removed before its decode settled
    Discarded { id: ImageId },
}

/// Per-item results of an ingest call, in input order
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub outcomes: Vec<IngestOutcome>,
}

impl IngestReport {
    /// Ids of every entry created, decoded or not
    #[must_use]
    pub fn ids(&self) -> Vec<ImageId> {
        self.outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                IngestOutcome::Decoded { id } | IngestOutcome::DecodeFailed { id, .. } => {
                    Some(id.clone())
                },
                IngestOutcome::Unreadable { .. } | IngestOutcome::Discarded { .. } => None,
            })
            .collect()
    }

    #[must_use]
    pub fn decoded_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome, IngestOutcome::Decoded { .. }))
            .count()
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|outcome| {
            matches!(
                outcome,
                IngestOutcome::DecodeFailed { .. } | IngestOutcome::Unreadable { .. }
            )
        })
    }
}

/// Outcome for one image in a removal run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Processed,
    Failed { category: ErrorCategory, message: String },
    Cancelled,
}

/// Per-item results of [`Pipeline::remove_background_all`], in insertion order
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub items: Vec<(ImageId, ItemOutcome)>,
    pub elapsed_ms: u64,
}

impl BatchReport {
    /// True if at least one image failed
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.items
            .iter()
            .any(|(_, outcome)| matches!(outcome, ItemOutcome::Failed { .. }))
    }

    #[must_use]
    pub fn processed(&self) -> Vec<&ImageId> {
        self.select(|outcome| matches!(outcome, ItemOutcome::Processed))
    }

    #[must_use]
    pub fn failed(&self) -> Vec<(&ImageId, ErrorCategory, &str)> {
        self.items
            .iter()
            .filter_map(|(id, outcome)| match outcome {
                ItemOutcome::Failed { category, message } => Some((id, *category, message.as_str())),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn cancelled(&self) -> Vec<&ImageId> {
        self.select(|outcome| matches!(outcome, ItemOutcome::Cancelled))
    }

    fn select(&self, predicate: impl Fn(&ItemOutcome) -> bool) -> Vec<&ImageId> {
        self.items
            .iter()
            .filter(|(_, outcome)| predicate(outcome))
            .map(|(id, _)| id)
            .collect()
    }
}

/// Clears the in-flight flag when a removal run ends, however it ends
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owner of the batch and orchestrator of removal calls
pub struct Pipeline {
    state: RwLock<Batch>,
    backend: Arc<dyn RemovalBackend>,
    compositor: Compositor,
    config: PipelineConfig,
    running: AtomicBool,
    events: broadcast::Sender<PipelineEvent>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .field("running", &self.running.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Pipeline talking to the configured removal service over HTTP
    ///
    /// # Errors
    /// - `InvalidConfig` if the configuration does not validate
    /// - `Network` if an HTTP client cannot be created
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let backend = Arc::new(RemoveBgClient::new(config.service.clone())?);
        let compositor = Compositor::with_http(&config)?;
        Ok(Self::with_components(config, backend, compositor))
    }

    /// Pipeline with injected backend and compositor
    #[must_use]
    pub fn with_components(
        config: PipelineConfig,
        backend: Arc<dyn RemovalBackend>,
        compositor: Compositor,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            state: RwLock::new(Batch::new()),
            backend,
            compositor,
            config,
            running: AtomicBool::new(false),
            events,
        }
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Receive every state change from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Cheap copy of the current batch
    pub async fn snapshot(&self) -> Batch {
        self.state.read().await.clone()
    }

    /// True while a removal run is in flight
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Add images under generated ids and decode them
    ///
    /// Returns once every decode has settled. Undecodable inputs stay in the
    /// batch as `DecodeFailed` and are listed in the report.
    #[instrument(skip(self, inputs), fields(count = inputs.len()))]
    pub async fn ingest(&self, inputs: Vec<InputImage>) -> IngestReport {
        let mut added = Vec::with_capacity(inputs.len());
        {
            let mut batch = self.state.write().await;
            for input in inputs {
                let bytes: Arc<[u8]> = Arc::from(input.bytes);
                let id = batch.push_source(input.name, Arc::clone(&bytes));
                added.push((id, bytes));
            }
        }
        self.decode_added(added).await
    }

    /// Add images under caller-chosen ids and decode them
    ///
    /// Nothing is added if any id is invalid, already present, or repeated.
    ///
    /// # Errors
    /// - `DuplicateId` if an id is taken or appears twice
    pub async fn ingest_named(&self, inputs: Vec<(ImageId, InputImage)>) -> Result<IngestReport> {
        let mut added = Vec::with_capacity(inputs.len());
        {
            let mut batch = self.state.write().await;
            let mut seen = std::collections::HashSet::new();
            for (id, _) in &inputs {
                if batch.contains(id) || !seen.insert(id.clone()) {
                    return Err(StudioError::DuplicateId(id.to_string()));
                }
            }
            for (id, input) in inputs {
                let bytes: Arc<[u8]> = Arc::from(input.bytes);
                batch.insert_source(id.clone(), input.name, Arc::clone(&bytes))?;
                added.push((id, bytes));
            }
        }
        Ok(self.decode_added(added).await)
    }

    /// Read files from disk and ingest them; unreadable files are reported, not fatal
    pub async fn ingest_paths<P: AsRef<Path>>(&self, paths: &[P]) -> IngestReport {
        let reads = join_all(paths.iter().map(|path| async move {
            let path = path.as_ref().to_path_buf();
            let result = ImageIOService::read_input(&path).await;
            (path, result)
        }))
        .await;

        let mut unreadable = Vec::new();
        let mut inputs = Vec::new();
        let mut order = Vec::new();
        for (path, result) in reads {
            match result {
                Ok(bytes) => {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned());
                    order.push(true);
                    inputs.push(InputImage { name, bytes });
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable input");
                    order.push(false);
                    unreadable.push(IngestOutcome::Unreadable {
                        path,
                        message: e.to_string(),
                    });
                },
            }
        }

        let ingested = self.ingest(inputs).await;

        // Merge back into input order
        let mut ingested = ingested.outcomes.into_iter();
        let mut unreadable = unreadable.into_iter();
        let outcomes = order
            .into_iter()
            .map_while(|readable| {
                if readable {
                    ingested.next()
                } else {
                    unreadable.next()
                }
            })
            .collect();
        IngestReport { outcomes }
    }

    async fn decode_added(&self, added: Vec<(ImageId, Arc<[u8]>)>) -> IngestReport {
        for (id, _) in &added {
            self.emit(PipelineEvent::Ingested { id: id.clone() });
        }

        let decoded = join_all(added.into_iter().map(|(id, bytes)| async move {
            let result = ImageIOService::decode(bytes).await;
            (id, result)
        }))
        .await;

        let mut batch = self.state.write().await;
        let outcomes = decoded
            .into_iter()
            .map(|(id, result)| self.settle_decode(&mut batch, id, result))
            .collect();
        IngestReport { outcomes }
    }

    /// Record one decode result; every input yields exactly one outcome
    fn settle_decode(
        &self,
        batch: &mut Batch,
        id: ImageId,
        result: Result<image::DynamicImage>,
    ) -> IngestOutcome {
        if !batch.contains(&id) {
            debug!(%id, "Entry removed before decode settled");
            return IngestOutcome::Discarded { id };
        }
        match result {
            Ok(image) => {
                let (width, height) = (image.width(), image.height());
                if batch.set_decoded(&id, Arc::new(image)).is_err() {
                    return IngestOutcome::Discarded { id };
                }
                debug!(%id, width, height, "Decoded input");
                self.emit(PipelineEvent::Decoded {
                    id: id.clone(),
                    width,
                    height,
                });
                IngestOutcome::Decoded { id }
            },
            Err(e) => {
                let message = e.detail();
                if batch.set_decode_failed(&id, message.clone()).is_err() {
                    return IngestOutcome::Discarded { id };
                }
                warn!(%id, error = %message, "Input could not be decoded");
                self.emit(PipelineEvent::DecodeFailed {
                    id: id.clone(),
                    message: message.clone(),
                });
                IngestOutcome::DecodeFailed { id, message }
            },
        }
    }

    /// Send every unprocessed, decoded image to the removal backend
    ///
    /// Entries that already have a cutout are never re-submitted. One failure
    /// does not stop the run; every outcome is listed in the report. Entries
    /// whose input could not be decoded are reported as failures without a
    /// service call.
    ///
    /// # Errors
    /// - `AlreadyRunning` if another run is in flight (state is not touched)
    #[instrument(skip(self, cancel))]
    pub async fn remove_background_all(&self, cancel: CancellationToken) -> Result<BatchReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(StudioError::AlreadyRunning);
        }
        let _guard = RunGuard(&self.running);
        let started = Instant::now();

        let mut report = BatchReport::default();
        let mut jobs = Vec::new();
        {
            let batch = self.state.read().await;
            for entry in batch.entries() {
                if entry.processed.is_some() {
                    continue;
                }
                if let crate::types::ImageStatus::DecodeFailed(message) = &entry.status {
                    report.items.push((
                        entry.id().clone(),
                        ItemOutcome::Failed {
                            category: ErrorCategory::Decode,
                            message: message.clone(),
                        },
                    ));
                    continue;
                }
                if entry.needs_removal() {
                    jobs.push((entry.id().clone(), Arc::clone(&entry.source.bytes)));
                }
            }
        }

        info!(
            jobs = jobs.len(),
            concurrency = self.config.max_concurrent_requests,
            backend = self.backend.name(),
            "Starting background removal"
        );

        let mut results = stream::iter(jobs)
            .map(|(id, bytes)| {
                let backend = Arc::clone(&self.backend);
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return (id, Err(StudioError::Cancelled));
                    }
                    self.mark_submitted(&id).await;
                    let result = tokio::select! {
                        () = cancel.cancelled() => Err(StudioError::Cancelled),
                        result = remove_one(backend.as_ref(), &bytes) => result,
                    };
                    (id, result)
                }
            })
            .buffered(self.config.max_concurrent_requests.max(1));

        while let Some((id, result)) = results.next().await {
            let outcome = self.apply_result(&id, result).await;
            report.items.push((id, outcome));
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            processed = report.processed().len(),
            failed = report.failed().len(),
            cancelled = report.cancelled().len(),
            elapsed_ms = report.elapsed_ms,
            "Background removal finished"
        );
        Ok(report)
    }

    async fn mark_submitted(&self, id: &ImageId) {
        if self.state.write().await.mark_submitted(id).is_ok() {
            self.emit(PipelineEvent::Submitted { id: id.clone() });
        }
    }

    async fn apply_result(&self, id: &ImageId, result: Result<image::RgbaImage>) -> ItemOutcome {
        let mut batch = self.state.write().await;
        match result {
            Ok(cutout) => match batch.set_processed(id, cutout) {
                Ok(()) => {
                    self.emit(PipelineEvent::Processed { id: id.clone() });
                    ItemOutcome::Processed
                },
                Err(e) => ItemOutcome::Failed {
                    category: e.category(),
                    message: e.detail(),
                },
            },
            Err(StudioError::Cancelled) => {
                let _ = batch.reset_to_loaded(id);
                self.emit(PipelineEvent::Cancelled { id: id.clone() });
                ItemOutcome::Cancelled
            },
            Err(e) => {
                let category = e.category();
                let message = e.detail();
                warn!(%id, %category, error = %message, "Background removal failed");
                let _ = batch.set_failed(id, message.clone());
                self.emit(PipelineEvent::Failed {
                    id: id.clone(),
                    category,
                    message: message.clone(),
                });
                ItemOutcome::Failed { category, message }
            },
        }
    }

    /// Change the background of a processed image
    ///
    /// # Errors
    /// - `UnknownImage` / `NotProcessed`; the batch is left unchanged
    pub async fn update_background(&self, id: &ImageId, spec: BackgroundSpec) -> Result<()> {
        self.state
            .write()
            .await
            .update_background(id, spec.clone())?;
        debug!(%id, background = spec.kind(), "Background updated");
        self.emit(PipelineEvent::BackgroundChanged {
            id: id.clone(),
            spec,
        });
        Ok(())
    }

    /// Drop one image from the batch
    ///
    /// # Errors
    /// - `AlreadyRunning` while a removal run is in flight
    /// - `UnknownImage` if no entry has this id
    pub async fn remove(&self, id: &ImageId) -> Result<()> {
        let mut batch = self.state.write().await;
        // Checked under the lock: a run flags itself before taking its job list
        if self.is_running() {
            return Err(StudioError::AlreadyRunning);
        }
        batch.remove(id)?;
        self.emit(PipelineEvent::Removed { id: id.clone() });
        Ok(())
    }

    /// Drop every image
    ///
    /// # Errors
    /// - `AlreadyRunning` while a removal run is in flight
    pub async fn clear(&self) -> Result<()> {
        let mut batch = self.state.write().await;
        if self.is_running() {
            return Err(StudioError::AlreadyRunning);
        }
        batch.clear();
        self.emit(PipelineEvent::Cleared);
        Ok(())
    }

    /// Render one processed image with its current background as PNG
    ///
    /// # Errors
    /// - `UnknownImage` / `NotProcessed` for ids without a cutout
    /// - `CompositeFetch` if an external background cannot be fetched
    pub async fn render(&self, id: &ImageId) -> Result<Vec<u8>> {
        let (cutout, background) = {
            let batch = self.state.read().await;
            let entry = batch
                .get(id)
                .ok_or_else(|| StudioError::UnknownImage(id.to_string()))?;
            let processed = entry
                .processed
                .as_ref()
                .ok_or_else(|| StudioError::NotProcessed(id.to_string()))?;
            (Arc::clone(&processed.cutout), processed.background.clone())
        };
        self.compositor.render_png(&cutout, &background).await
    }

    /// Render every processed image and zip them as `{id}.png`
    ///
    /// # Errors
    /// - `EmptyBatch` if nothing has been processed
    pub async fn package_all(&self) -> Result<Vec<u8>> {
        let snapshot = self.snapshot().await;
        ArchivePackager::new(self.compositor.clone())
            .package_all(&snapshot)
            .await
    }
}

/// One removal call plus cutout decode
async fn remove_one(backend: &dyn RemovalBackend, bytes: &[u8]) -> Result<image::RgbaImage> {
    let cutout = backend.remove(bytes).await?;
    ImageIOService::decode_cutout(cutout).await
}
