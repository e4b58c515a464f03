use std::collections::BTreeMap;

use frameloom_contracts::records::GeneratedVideo;

/// Speculative videos, keyed `(segment, image)`, held until saved or
/// discarded. They are never written to the project on their own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreviewVideos {
    entries: BTreeMap<(String, String), GeneratedVideo>,
}

impl PreviewVideos {
    pub fn new() -> Self {
        Self::default()
    }

    /// Previews are per image; a video without an image id is ignored.
    pub fn insert(&mut self, video: GeneratedVideo) -> bool {
        let Some(image_id) = video.image_id.clone() else {
            return false;
        };
        self.entries
            .insert((video.segment_key.clone(), image_id), video);
        true
    }

    pub fn get(&self, segment_key: &str, image_id: &str) -> Option<&GeneratedVideo> {
        self.entries
            .get(&(segment_key.to_string(), image_id.to_string()))
    }

    pub fn take(&mut self, segment_key: &str, image_id: &str) -> Option<GeneratedVideo> {
        self.entries
            .remove(&(segment_key.to_string(), image_id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &GeneratedVideo> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preview(segment: &str, image: Option<&str>, key: &str) -> GeneratedVideo {
        GeneratedVideo {
            id: key.to_string(),
            segment_key: segment.to_string(),
            image_id: image.map(str::to_string),
            url: None,
            storage_key: key.to_string(),
            art_style: String::new(),
        }
    }

    #[test]
    fn newer_preview_replaces_older_for_the_same_pair() {
        let mut previews = PreviewVideos::new();
        assert!(previews.insert(preview("1", Some("seg-1"), "a.mp4")));
        assert!(previews.insert(preview("1", Some("seg-1"), "b.mp4")));
        assert!(previews.insert(preview("1", Some("seg-1-9"), "c.mp4")));
        assert_eq!(previews.len(), 2);
        assert_eq!(
            previews.get("1", "seg-1").map(|video| video.storage_key.as_str()),
            Some("b.mp4")
        );
    }

    #[test]
    fn take_removes_and_segment_level_videos_are_refused() {
        let mut previews = PreviewVideos::new();
        assert!(!previews.insert(preview("1", None, "a.mp4")));
        previews.insert(preview("2", Some("seg-2"), "b.mp4"));
        assert!(previews.take("2", "seg-2").is_some());
        assert!(previews.take("2", "seg-2").is_none());
        assert!(previews.is_empty());
    }
}
