//! Merge of the three project collections into one per-segment view.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use frameloom_contracts::ids::{has_timestamp_suffix, segment_key, video_key};
use frameloom_contracts::records::{
    GeneratedImage, GeneratedVideo, ImageRecord, Segment, SegmentationRecord, VideoRecord,
};
use serde::Serialize;

use crate::previews::PreviewVideos;
use crate::project_source::ProjectDataSource;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciledView {
    pub segments: Vec<Segment>,
    pub art_style: Option<String>,
    /// Per segment, primary image first.
    pub images: BTreeMap<String, Vec<GeneratedImage>>,
    /// Keyed `segment-image` or `segment`.
    pub videos: BTreeMap<String, GeneratedVideo>,
}

impl ReconciledView {
    pub fn segment(&self, key: &str) -> Option<&Segment> {
        self.segments.iter().find(|segment| segment.id == key)
    }

    pub fn segment_ids(&self) -> Vec<String> {
        self.segments.iter().map(|segment| segment.id.clone()).collect()
    }

    pub fn primary_image(&self, segment_key: &str) -> Option<&GeneratedImage> {
        self.images.get(segment_key).and_then(|images| images.first())
    }

    pub fn image(&self, segment_key: &str, image_id: &str) -> Option<&GeneratedImage> {
        self.images
            .get(segment_key)?
            .iter()
            .find(|image| image.id == image_id)
    }

    /// Video for a specific image, falling back to the segment-level one.
    pub fn video_for(&self, segment_key: &str, image_id: Option<&str>) -> Option<&GeneratedVideo> {
        image_id
            .and_then(|image_id| self.videos.get(&video_key(segment_key, Some(image_id))))
            .or_else(|| self.videos.get(segment_key))
    }

    pub fn image_count(&self) -> usize {
        self.images.values().map(Vec::len).sum()
    }

    pub fn video_count(&self) -> usize {
        self.videos.len()
    }

    /// Canonical videos with previews filling the gaps. A preview never
    /// replaces a canonical entry under the same key.
    pub fn display_videos(&self, previews: &PreviewVideos) -> BTreeMap<String, GeneratedVideo> {
        let mut merged = self.videos.clone();
        for preview in previews.iter() {
            merged
                .entry(preview.key())
                .or_insert_with(|| preview.clone());
        }
        merged
    }

    /// `display key -> storage key`, the shape cached between sessions.
    pub fn video_map(&self) -> BTreeMap<String, String> {
        self.videos
            .iter()
            .map(|(key, video)| (key.clone(), video.storage_key.clone()))
            .collect()
    }

    /// Record a freshly generated image ahead of the next refresh. It only
    /// becomes primary when the segment had no image yet.
    pub fn insert_image(&mut self, mut image: GeneratedImage) {
        let list = self.images.entry(image.segment_key.clone()).or_default();
        list.retain(|existing| existing.id != image.id);
        image.is_primary = list.is_empty();
        image.created_order = list
            .iter()
            .map(|existing| existing.created_order + 1)
            .max()
            .unwrap_or(0);
        list.push(image);
    }

    /// Make `image_id` the segment's primary image, keeping the others in
    /// their current order.
    pub fn promote_image(&mut self, segment_key: &str, image_id: &str) -> bool {
        let Some(list) = self.images.get_mut(segment_key) else {
            return false;
        };
        let Some(position) = list.iter().position(|image| image.id == image_id) else {
            return false;
        };
        let promoted = list.remove(position);
        list.insert(0, promoted);
        for (idx, image) in list.iter_mut().enumerate() {
            image.is_primary = idx == 0;
        }
        true
    }

    pub fn insert_video(&mut self, video: GeneratedVideo) {
        self.videos.insert(video.key(), video);
    }
}

/// Pure merge; identical inputs give identical views.
pub fn reconcile(
    segmentations: &[SegmentationRecord],
    images: &[ImageRecord],
    videos: &[VideoRecord],
) -> ReconciledView {
    let (segments, art_style) = match segmentations.first() {
        Some(record) => (record.segments.clone(), record.art_style.clone()),
        None => (Vec::new(), None),
    };
    let known: Vec<String> = segments.iter().map(|segment| segment.id.clone()).collect();

    let mut grouped: BTreeMap<String, Vec<(Rank, GeneratedImage)>> = BTreeMap::new();
    for (order, record) in images.iter().enumerate() {
        let Some(image) = image_from_record(record, order as u64, &known) else {
            continue;
        };
        let rank = Rank::of(record, &image.id, &image.segment_key);
        grouped
            .entry(image.segment_key.clone())
            .or_default()
            .push((rank, image));
    }

    let images = grouped
        .into_iter()
        .map(|(key, mut ranked)| {
            // An explicit flag anywhere in the segment outranks the id heuristic.
            let any_flagged = ranked.iter().any(|(rank, _)| *rank == Rank::Flagged);
            ranked.sort_by_key(|(rank, _)| match rank {
                Rank::Flagged => 0,
                Rank::Conventional if !any_flagged => 1,
                _ => 2,
            });
            let list = ranked
                .into_iter()
                .enumerate()
                .map(|(idx, (_, mut image))| {
                    image.is_primary = idx == 0;
                    image
                })
                .collect();
            (key, list)
        })
        .collect();

    let mut video_map = BTreeMap::new();
    for record in videos {
        if let Some(video) = video_from_record(record, &known) {
            // Later records are newer; the last one for a key is displayed.
            video_map.insert(video.key(), video);
        }
    }

    ReconciledView {
        segments,
        art_style,
        images,
        videos: video_map,
    }
}

/// Fetch all three collections concurrently and merge them. Any failure,
/// including `success = false`, aborts without producing a view.
pub async fn fetch_and_reconcile(
    source: &dyn ProjectDataSource,
    project_id: &str,
) -> Result<ReconciledView> {
    let (segmentations, images, videos) = tokio::try_join!(
        async {
            source
                .get_segmentations(project_id)
                .await
                .context("segmentations fetch failed")?
                .into_data("segmentations")
        },
        async {
            source
                .get_images(project_id)
                .await
                .context("images fetch failed")?
                .into_data("images")
        },
        async {
            source
                .get_videos(project_id)
                .await
                .context("videos fetch failed")?
                .into_data("videos")
        },
    )?;
    let view = reconcile(&segmentations, &images, &videos);
    tracing::debug!(
        project_id,
        segments = view.segments.len(),
        images = view.image_count(),
        videos = view.video_count(),
        "project reconciled"
    );
    Ok(view)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rank {
    Flagged,
    Conventional,
    Other,
}

impl Rank {
    fn of(record: &ImageRecord, id: &str, segment_key: &str) -> Self {
        match record.is_primary {
            Some(true) => Self::Flagged,
            Some(false) => Self::Other,
            None if !has_timestamp_suffix(id, segment_key) => Self::Conventional,
            None => Self::Other,
        }
    }
}

fn raw_segment(segment_id: Option<String>, uuid: Option<&str>) -> Option<String> {
    segment_id
        .filter(|value| !value.trim().is_empty())
        .or_else(|| uuid.map(str::to_string))
}

fn image_from_record(record: &ImageRecord, order: u64, known: &[String]) -> Option<GeneratedImage> {
    if !record.success {
        return None;
    }
    let uuid = record.uuid.as_deref().map(str::trim).filter(|id| !id.is_empty())?;
    let storage_key = record
        .storage_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty())?;
    let raw = raw_segment(record.segment_id.as_ref().map(ToString::to_string), Some(uuid))?;
    Some(GeneratedImage {
        id: uuid.to_string(),
        segment_key: segment_key(&raw, known),
        url: record.url.clone(),
        storage_key: storage_key.to_string(),
        visual_prompt: record.visual_prompt.clone().unwrap_or_default(),
        art_style: record.art_style.clone().unwrap_or_default(),
        is_primary: false,
        created_order: order,
    })
}

fn video_from_record(record: &VideoRecord, known: &[String]) -> Option<GeneratedVideo> {
    let file = record.files.first()?;
    let storage_key = file
        .storage_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty())?;
    let raw = raw_segment(
        record.segment_id.as_ref().map(ToString::to_string),
        record.uuid.as_deref(),
    )?;
    let segment_key = segment_key(&raw, known);
    let image_id = record
        .image_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string);
    let id = record
        .uuid
        .clone()
        .unwrap_or_else(|| video_key(&segment_key, image_id.as_deref()));
    Some(GeneratedVideo {
        id,
        segment_key,
        image_id,
        url: file.url.clone(),
        storage_key: storage_key.to_string(),
        art_style: record.art_style.clone().unwrap_or_default(),
    })
}
