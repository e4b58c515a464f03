//! Node/edge projection of a project for the canvas view.
//!
//! Columns, left to right: segments, one "add image" anchor per segment,
//! the segment's images stacked vertically, then for every image its
//! video (image-specific first, segment-level second) or an "add video"
//! placeholder. The layout is a pure function of the input.

use std::collections::{BTreeMap, BTreeSet};

use frameloom_contracts::ids::video_key;
use frameloom_contracts::records::{GeneratedImage, GeneratedVideo, Segment};
use serde::Serialize;

use crate::previews::PreviewVideos;
use crate::reconcile::ReconciledView;

pub const COLUMN_SPACING: f64 = 320.0;
pub const ROW_SPACING: f64 = 200.0;
pub const SEGMENT_GAP: f64 = 80.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    Segment,
    AddImage,
    Image,
    Video,
    AddVideo,
}

impl NodeKind {
    fn column(self) -> f64 {
        let index = match self {
            Self::Segment => 0,
            Self::AddImage => 1,
            Self::Image => 2,
            Self::Video | Self::AddVideo => 3,
        };
        f64::from(index) * COLUMN_SPACING
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    pub label: String,
    pub segment_key: String,
    pub image_id: Option<String>,
    pub storage_key: Option<String>,
    pub url: Option<String>,
    pub is_primary: bool,
    pub is_preview: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub position: Position,
    pub data: NodeData,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn targets_of(&self, source: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|edge| edge.source == source)
            .map(|edge| edge.target.as_str())
            .collect()
    }
}

pub struct GraphInput<'a> {
    pub segments: &'a [Segment],
    pub images: &'a BTreeMap<String, Vec<GeneratedImage>>,
    /// Canonical videos only; previews are passed separately.
    pub videos: &'a BTreeMap<String, GeneratedVideo>,
    pub previews: &'a PreviewVideos,
}

impl<'a> GraphInput<'a> {
    pub fn from_view(view: &'a ReconciledView, previews: &'a PreviewVideos) -> Self {
        Self {
            segments: &view.segments,
            images: &view.images,
            videos: &view.videos,
            previews,
        }
    }

    fn video(&self, segment_key: &str, image_id: &str) -> Option<(&'a GeneratedVideo, bool)> {
        let exact = video_key(segment_key, Some(image_id));
        if let Some(video) = self.videos.get(&exact) {
            return Some((video, false));
        }
        if let Some(video) = self.previews.get(segment_key, image_id) {
            return Some((video, true));
        }
        self.videos.get(segment_key).map(|video| (video, false))
    }
}

pub fn project(input: &GraphInput<'_>) -> Graph {
    let mut graph = Graph::default();
    let mut seen = BTreeSet::new();
    let mut cursor = 0.0;

    for segment in input.segments {
        let key = segment.id.as_str();
        let images = input.images.get(key).map(Vec::as_slice).unwrap_or_default();
        let top = cursor;

        let segment_id = format!("segment-{key}");
        push_node(
            &mut graph,
            &mut seen,
            &segment_id,
            NodeKind::Segment,
            top,
            NodeData {
                label: segment_label(segment),
                segment_key: key.to_string(),
                ..NodeData::default()
            },
        );

        let anchor_id = format!("add-image-{key}");
        push_node(
            &mut graph,
            &mut seen,
            &anchor_id,
            NodeKind::AddImage,
            top,
            NodeData {
                label: "Add image".to_string(),
                segment_key: key.to_string(),
                ..NodeData::default()
            },
        );
        push_edge(&mut graph, &segment_id, &anchor_id);

        for (row, image) in images.iter().enumerate() {
            let y = top + row as f64 * ROW_SPACING;
            let image_node = format!("image-{}", image.id);
            push_node(
                &mut graph,
                &mut seen,
                &image_node,
                NodeKind::Image,
                y,
                NodeData {
                    label: if image.is_primary {
                        "Primary image".to_string()
                    } else {
                        format!("Image {}", row + 1)
                    },
                    segment_key: key.to_string(),
                    image_id: Some(image.id.clone()),
                    storage_key: Some(image.storage_key.clone()),
                    url: image.url.clone(),
                    is_primary: image.is_primary,
                    is_preview: false,
                },
            );
            push_edge(&mut graph, &anchor_id, &image_node);

            let target = match input.video(key, &image.id) {
                Some((video, is_preview)) => {
                    let video_node = format!("video-{}", video.key());
                    push_node(
                        &mut graph,
                        &mut seen,
                        &video_node,
                        NodeKind::Video,
                        y,
                        NodeData {
                            label: (if is_preview { "Preview video" } else { "Video" }).to_string(),
                            segment_key: key.to_string(),
                            image_id: video.image_id.clone(),
                            storage_key: Some(video.storage_key.clone()),
                            url: video.url.clone(),
                            is_primary: false,
                            is_preview,
                        },
                    );
                    video_node
                }
                None => {
                    let placeholder = format!("add-video-{key}-{}", image.id);
                    push_node(
                        &mut graph,
                        &mut seen,
                        &placeholder,
                        NodeKind::AddVideo,
                        y,
                        NodeData {
                            label: "Add video".to_string(),
                            segment_key: key.to_string(),
                            image_id: Some(image.id.clone()),
                            ..NodeData::default()
                        },
                    );
                    placeholder
                }
            };
            push_edge(&mut graph, &image_node, &target);
        }

        cursor = top + images.len().max(1) as f64 * ROW_SPACING + SEGMENT_GAP;
    }

    graph
}

fn segment_label(segment: &Segment) -> String {
    let visual = segment.visual.trim();
    if visual.is_empty() {
        return format!("Segment {}", segment.id);
    }
    let mut label: String = visual.chars().take(48).collect();
    if visual.chars().count() > 48 {
        label.push('…');
    }
    format!("Segment {}: {label}", segment.id)
}

/// A segment-level video shared by several images is drawn once, at the
/// row of the first image that reaches it.
fn push_node(
    graph: &mut Graph,
    seen: &mut BTreeSet<String>,
    id: &str,
    kind: NodeKind,
    y: f64,
    data: NodeData,
) {
    if !seen.insert(id.to_string()) {
        return;
    }
    graph.nodes.push(Node {
        id: id.to_string(),
        kind,
        position: Position { x: kind.column(), y },
        data,
    });
}

fn push_edge(graph: &mut Graph, source: &str, target: &str) {
    graph.edges.push(Edge {
        id: format!("edge-{source}-{target}"),
        source: source.to_string(),
        target: target.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use frameloom_contracts::records::{ImageRecord, RawId, SegmentationRecord, VideoFile, VideoRecord};

    use super::*;
    use crate::reconcile::reconcile;

    fn view() -> ReconciledView {
        let segmentation = SegmentationRecord {
            id: None,
            segments: ["1", "2", "3"]
                .iter()
                .map(|id| Segment {
                    id: id.to_string(),
                    visual: format!("shot {id}"),
                    narration: String::new(),
                    animation: String::new(),
                })
                .collect(),
            art_style: None,
        };
        let image = |uuid: &str| ImageRecord {
            uuid: Some(uuid.to_string()),
            segment_id: None,
            success: true,
            storage_key: Some(format!("{uuid}.png")),
            url: None,
            visual_prompt: None,
            art_style: None,
            is_primary: None,
        };
        let video = |segment: &str, image_id: Option<&str>| VideoRecord {
            uuid: None,
            segment_id: Some(RawId::Text(segment.to_string())),
            image_id: image_id.map(str::to_string),
            files: vec![VideoFile {
                storage_key: Some(format!("{segment}.mp4")),
                url: None,
            }],
            art_style: None,
        };
        reconcile(
            &[segmentation],
            &[image("seg-1"), image("seg-1-20"), image("seg-2")],
            &[video("1", Some("seg-1")), video("2", None)],
        )
    }

    #[test]
    fn layout_follows_the_four_columns() {
        let view = view();
        let previews = PreviewVideos::new();
        let graph = project(&GraphInput::from_view(&view, &previews));

        assert_eq!(graph.targets_of("segment-1"), vec!["add-image-1"]);
        assert_eq!(graph.targets_of("add-image-1"), vec!["image-seg-1", "image-seg-1-20"]);
        assert_eq!(graph.targets_of("image-seg-1"), vec!["video-1-seg-1"]);
        assert_eq!(graph.targets_of("image-seg-1-20"), vec!["add-video-1-seg-1-20"]);
        // Segment 2 only has a segment-level video.
        assert_eq!(graph.targets_of("image-seg-2"), vec!["video-2"]);
        // Segment 3 has no images: just the segment and its anchor.
        assert_eq!(graph.targets_of("add-image-3"), Vec::<&str>::new());

        let second_image = graph.node("image-seg-1-20").map(|node| node.position);
        assert_eq!(second_image, Some(Position { x: 2.0 * COLUMN_SPACING, y: ROW_SPACING }));
        let segment_two = graph.node("segment-2").map(|node| node.position.y);
        assert_eq!(segment_two, Some(2.0 * ROW_SPACING + SEGMENT_GAP));
        let segment_three = graph.node("segment-3").map(|node| node.position.y);
        assert_eq!(segment_three, Some(3.0 * ROW_SPACING + 2.0 * SEGMENT_GAP));
    }

    #[test]
    fn projection_is_deterministic() {
        let view = view();
        let previews = PreviewVideos::new();
        let first = project(&GraphInput::from_view(&view, &previews));
        let second = project(&GraphInput::from_view(&view, &previews));
        assert_eq!(first, second);
        let ids: BTreeSet<&str> = first.nodes.iter().map(|node| node.id.as_str()).collect();
        assert_eq!(ids.len(), first.nodes.len());
    }

    #[test]
    fn previews_replace_placeholders_but_not_canonical_videos() {
        let view = view();
        let mut previews = PreviewVideos::new();
        for image_id in ["seg-1", "seg-1-20"] {
            previews.insert(GeneratedVideo {
                id: format!("p-{image_id}"),
                segment_key: "1".to_string(),
                image_id: Some(image_id.to_string()),
                url: None,
                storage_key: format!("preview-{image_id}.mp4"),
                art_style: String::new(),
            });
        }
        let graph = project(&GraphInput::from_view(&view, &previews));
        assert_eq!(graph.targets_of("image-seg-1"), vec!["video-1-seg-1"]);
        let canonical = graph.node("video-1-seg-1");
        assert_eq!(canonical.map(|node| node.data.is_preview), Some(false));
        let preview = graph.node("video-1-seg-1-20");
        assert_eq!(preview.map(|node| node.data.is_preview), Some(true));
    }

    #[test]
    fn shared_segment_video_is_drawn_once() {
        let mut view = view();
        view.videos.remove("1-seg-1");
        view.insert_video(GeneratedVideo {
            id: "v1".to_string(),
            segment_key: "1".to_string(),
            image_id: None,
            url: None,
            storage_key: "1.mp4".to_string(),
            art_style: String::new(),
        });
        let previews = PreviewVideos::new();
        let graph = project(&GraphInput::from_view(&view, &previews));
        assert_eq!(graph.targets_of("image-seg-1"), vec!["video-1"]);
        assert_eq!(graph.targets_of("image-seg-1-20"), vec!["video-1"]);
        let count = graph.nodes.iter().filter(|node| node.id == "video-1").count();
        assert_eq!(count, 1);
    }
}
