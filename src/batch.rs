//! Batch state: source images, their cutouts and lifecycle status
//!
//! `Batch` is a plain value. The [`Pipeline`](crate::pipeline::Pipeline) owns the
//! live instance and is the only writer; everything else works on snapshots.
//! Images are held behind `Arc`, so cloning a batch never copies pixel data.

use crate::{
    error::{Result, StudioError},
    types::{BackgroundSpec, ImageId, ImageStatus},
};
use chrono::{DateTime, Utc};
use image::{DynamicImage, RgbaImage};
use std::collections::HashMap;
use std::sync::Arc;

/// An ingested input image
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub id: ImageId,
    /// Original file name, when known
    pub name: Option<String>,
    /// Raw input bytes as selected by the user
    pub bytes: Arc<[u8]>,
    /// Decoded bitmap, absent until decode succeeds
    pub bitmap: Option<Arc<DynamicImage>>,
}

impl SourceImage {
    /// Name for display: the original file name or the id
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }

    #[must_use]
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.bitmap
            .as_ref()
            .map(|bitmap| (bitmap.width(), bitmap.height()))
    }
}

/// Cutout returned by the removal service plus the chosen background
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub id: ImageId,
    /// Foreground on transparent pixels; never modified after creation
    pub cutout: Arc<RgbaImage>,
    pub background: BackgroundSpec,
    pub processed_at: DateTime<Utc>,
}

impl ProcessedImage {
    #[must_use]
    pub fn new(id: ImageId, cutout: RgbaImage) -> Self {
        Self {
            id,
            cutout: Arc::new(cutout),
            background: BackgroundSpec::Transparent,
            processed_at: Utc::now(),
        }
    }
}

/// One source image with its derived state
#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub source: SourceImage,
    pub processed: Option<ProcessedImage>,
    pub status: ImageStatus,
}

impl BatchEntry {
    #[must_use]
    pub fn id(&self) -> &ImageId {
        &self.source.id
    }

    /// Decoded and still waiting for a cutout
    #[must_use]
    pub fn needs_removal(&self) -> bool {
        self.processed.is_none()
            && self.source.bitmap.is_some()
            && matches!(self.status, ImageStatus::Loaded | ImageStatus::Failed(_))
    }
}

/// All images of one session, in insertion order
#[derive(Debug, Clone, Default)]
pub struct Batch {
    entries: Vec<BatchEntry>,
    index: HashMap<ImageId, usize>,
    next_sequence: u64,
}

impl Batch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an image under a freshly generated id
    pub fn push_source(&mut self, name: Option<String>, bytes: Arc<[u8]>) -> ImageId {
        let id = loop {
            self.next_sequence += 1;
            let candidate = ImageId::from_sequence(self.next_sequence);
            if !self.index.contains_key(&candidate) {
                break candidate;
            }
        };
        self.push_entry(id.clone(), name, bytes);
        id
    }

    /// Append an image under a caller-chosen id
    ///
    /// # Errors
    /// - `DuplicateId` if the id is already present
    pub fn insert_source(
        &mut self,
        id: ImageId,
        name: Option<String>,
        bytes: Arc<[u8]>,
    ) -> Result<()> {
        if self.index.contains_key(&id) {
            return Err(StudioError::DuplicateId(id.to_string()));
        }
        self.push_entry(id, name, bytes);
        Ok(())
    }

    fn push_entry(&mut self, id: ImageId, name: Option<String>, bytes: Arc<[u8]>) {
        self.index.insert(id.clone(), self.entries.len());
        self.entries.push(BatchEntry {
            source: SourceImage {
                id,
                name,
                bytes,
                bitmap: None,
            },
            processed: None,
            status: ImageStatus::Pending,
        });
    }

    #[must_use]
    pub fn get(&self, id: &ImageId) -> Option<&BatchEntry> {
        self.index.get(id).and_then(|&i| self.entries.get(i))
    }

    fn get_mut(&mut self, id: &ImageId) -> Result<&mut BatchEntry> {
        let position = *self
            .index
            .get(id)
            .ok_or_else(|| StudioError::UnknownImage(id.to_string()))?;
        self.entries
            .get_mut(position)
            .ok_or_else(|| StudioError::UnknownImage(id.to_string()))
    }

    #[must_use]
    pub fn contains(&self, id: &ImageId) -> bool {
        self.index.contains_key(id)
    }

    /// Entries in insertion order
    pub fn entries(&self) -> impl Iterator<Item = &BatchEntry> {
        self.entries.iter()
    }

    /// Entries that currently have a cutout, in insertion order
    pub fn processed(&self) -> impl Iterator<Item = &ProcessedImage> {
        self.entries.iter().filter_map(|entry| entry.processed.as_ref())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn processed_count(&self) -> usize {
        self.processed().count()
    }

    #[must_use]
    pub fn ids(&self) -> Vec<ImageId> {
        self.entries.iter().map(|entry| entry.id().clone()).collect()
    }

    /// Record a successful decode
    pub fn set_decoded(&mut self, id: &ImageId, bitmap: Arc<DynamicImage>) -> Result<()> {
        let entry = self.get_mut(id)?;
        entry.source.bitmap = Some(bitmap);
        entry.status = ImageStatus::Loaded;
        Ok(())
    }

    /// Record a permanent decode failure
    pub fn set_decode_failed(&mut self, id: &ImageId, message: String) -> Result<()> {
        let entry = self.get_mut(id)?;
        entry.source.bitmap = None;
        entry.status = ImageStatus::DecodeFailed(message);
        Ok(())
    }

    pub fn mark_submitted(&mut self, id: &ImageId) -> Result<()> {
        self.get_mut(id)?.status = ImageStatus::Submitted;
        Ok(())
    }

    /// Store the cutout; an existing cutout for the same id is replaced, never duplicated
    pub fn set_processed(&mut self, id: &ImageId, cutout: RgbaImage) -> Result<()> {
        let entry = self.get_mut(id)?;
        entry.processed = Some(ProcessedImage::new(id.clone(), cutout));
        entry.status = ImageStatus::Processed;
        Ok(())
    }

    pub fn set_failed(&mut self, id: &ImageId, message: String) -> Result<()> {
        self.get_mut(id)?.status = ImageStatus::Failed(message);
        Ok(())
    }

    /// Return an interrupted entry to the ready state
    pub fn reset_to_loaded(&mut self, id: &ImageId) -> Result<()> {
        let entry = self.get_mut(id)?;
        if entry.processed.is_none() && entry.source.bitmap.is_some() {
            entry.status = ImageStatus::Loaded;
        }
        Ok(())
    }

    /// Replace the background of a processed entry
    ///
    /// # Errors
    /// - `UnknownImage` if no entry has this id
    /// - `NotProcessed` if the entry has no cutout yet
    pub fn update_background(&mut self, id: &ImageId, spec: BackgroundSpec) -> Result<()> {
        let entry = self.get_mut(id)?;
        let processed = entry
            .processed
            .as_mut()
            .ok_or_else(|| StudioError::NotProcessed(id.to_string()))?;
        processed.background = spec;
        Ok(())
    }

    /// Drop one entry and its cutout
    pub fn remove(&mut self, id: &ImageId) -> Result<BatchEntry> {
        let position = self
            .index
            .remove(id)
            .ok_or_else(|| StudioError::UnknownImage(id.to_string()))?;
        let entry = self.entries.remove(position);
        for slot in self.index.values_mut() {
            if *slot > position {
                *slot -= 1;
            }
        }
        Ok(entry)
    }

    /// Drop every entry; generated ids keep counting so old ids are never reused
    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes() -> Arc<[u8]> {
        Arc::from(vec![1_u8, 2, 3])
    }

    fn bitmap() -> Arc<DynamicImage> {
        Arc::new(DynamicImage::new_rgba8(2, 2))
    }

    #[test]
    fn test_generated_ids_preserve_insertion_order() {
        let mut batch = Batch::new();
        let first = batch.push_source(Some("b.jpg".into()), bytes());
        let second = batch.push_source(Some("a.jpg".into()), bytes());

        assert_eq!(first.as_str(), "image-0001");
        assert_eq!(second.as_str(), "image-0002");
        assert_eq!(batch.ids(), vec![first, second]);
        assert!(batch.entries().all(|e| e.status == ImageStatus::Pending));
    }

    #[test]
    fn test_generated_ids_skip_explicit_ids() {
        let mut batch = Batch::new();
        batch
            .insert_source(ImageId::new("image-0001").unwrap(), None, bytes())
            .unwrap();
        let generated = batch.push_source(None, bytes());
        assert_eq!(generated.as_str(), "image-0002");
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_duplicate_explicit_id_rejected() {
        let mut batch = Batch::new();
        let id = ImageId::new("a").unwrap();
        batch.insert_source(id.clone(), None, bytes()).unwrap();
        let err = batch.insert_source(id, None, bytes()).unwrap_err();
        assert!(matches!(err, StudioError::DuplicateId(_)));
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut batch = Batch::new();
        let id = batch.push_source(None, bytes());
        assert!(!batch.get(&id).unwrap().needs_removal());

        batch.set_decoded(&id, bitmap()).unwrap();
        assert!(batch.get(&id).unwrap().needs_removal());

        batch.mark_submitted(&id).unwrap();
        assert!(!batch.get(&id).unwrap().needs_removal());

        batch.set_failed(&id, "quota".into()).unwrap();
        assert!(batch.get(&id).unwrap().needs_removal());

        batch.set_processed(&id, RgbaImage::new(2, 2)).unwrap();
        let entry = batch.get(&id).unwrap();
        assert_eq!(entry.status, ImageStatus::Processed);
        assert!(!entry.needs_removal());
        assert_eq!(batch.processed_count(), 1);
    }

    #[test]
    fn test_update_background_requires_cutout() {
        let mut batch = Batch::new();
        let id = batch.push_source(None, bytes());
        batch.set_decoded(&id, bitmap()).unwrap();

        let err = batch
            .update_background(&id, BackgroundSpec::solid(crate::types::Color::BLACK))
            .unwrap_err();
        assert!(matches!(err, StudioError::NotProcessed(_)));

        let unknown = ImageId::new("missing").unwrap();
        assert!(matches!(
            batch.update_background(&unknown, BackgroundSpec::Transparent),
            Err(StudioError::UnknownImage(_))
        ));

        batch.set_processed(&id, RgbaImage::new(2, 2)).unwrap();
        let spec = BackgroundSpec::solid(crate::types::Color::WHITE);
        batch.update_background(&id, spec.clone()).unwrap();
        assert_eq!(batch.get(&id).unwrap().processed.as_ref().unwrap().background, spec);
    }

    #[test]
    fn test_remove_keeps_index_consistent() {
        let mut batch = Batch::new();
        let a = batch.push_source(None, bytes());
        let b = batch.push_source(None, bytes());
        let c = batch.push_source(None, bytes());

        batch.remove(&a).unwrap();
        assert_eq!(batch.ids(), vec![b.clone(), c.clone()]);
        assert_eq!(batch.get(&c).unwrap().id(), &c);
        assert!(batch.remove(&a).is_err());

        batch.clear();
        assert!(batch.is_empty());
        assert_eq!(batch.push_source(None, bytes()).as_str(), "image-0004");
    }

    #[test]
    fn test_snapshot_shares_pixels() {
        let mut batch = Batch::new();
        let id = batch.push_source(None, bytes());
        batch.set_decoded(&id, bitmap()).unwrap();
        batch.set_processed(&id, RgbaImage::new(4, 4)).unwrap();

        let snapshot = batch.clone();
        let live = batch.get(&id).unwrap().processed.as_ref().unwrap();
        let copy = snapshot.get(&id).unwrap().processed.as_ref().unwrap();
        assert!(Arc::ptr_eq(&live.cutout, &copy.cutout));
    }
}
