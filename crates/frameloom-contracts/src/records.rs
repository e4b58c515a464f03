use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::ids;

/// An id field that services send either as a JSON number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Number(i64),
    Text(String),
}

impl fmt::Display for RawId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value}"),
        }
    }
}

fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(RawId::deserialize(deserializer)?.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    #[serde(default)]
    pub visual: String,
    #[serde(default)]
    pub narration: String,
    #[serde(default)]
    pub animation: String,
}

impl Segment {
    pub fn has_visual(&self) -> bool {
        !self.visual.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Concept {
    pub title: String,
    #[serde(default)]
    pub logline: String,
    #[serde(default)]
    pub tone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptDraft {
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub art_style: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptOptions {
    pub option_a: ScriptDraft,
    pub option_b: ScriptDraft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptChoice {
    A,
    B,
}

impl ScriptOptions {
    pub fn get(&self, choice: ScriptChoice) -> &ScriptDraft {
        match choice {
            ScriptChoice::A => &self.option_a,
            ScriptChoice::B => &self.option_b,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedScript {
    pub segments: Vec<Segment>,
    pub art_style: String,
    pub concept: Concept,
}

impl SelectedScript {
    pub fn segment_ids(&self) -> Vec<String> {
        self.segments.iter().map(|segment| segment.id.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
    pub id: String,
    pub segment_key: String,
    pub url: Option<String>,
    pub storage_key: String,
    #[serde(default)]
    pub visual_prompt: String,
    #[serde(default)]
    pub art_style: String,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub created_order: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedVideo {
    pub id: String,
    pub segment_key: String,
    pub image_id: Option<String>,
    pub url: Option<String>,
    pub storage_key: String,
    #[serde(default)]
    pub art_style: String,
}

impl GeneratedVideo {
    pub fn key(&self) -> String {
        ids::video_key(&self.segment_key, self.image_id.as_deref())
    }
}

/// Response wrapper shared by every project data endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: Vec<T>) -> Self {
        Self {
            success: true,
            data,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Vec::new(),
            message: Some(message.into()),
        }
    }

    /// Unwrap the payload, treating `success = false` as an error.
    pub fn into_data(self, what: &str) -> anyhow::Result<Vec<T>> {
        if !self.success {
            anyhow::bail!(
                "{what} request reported failure: {}",
                self.message.as_deref().unwrap_or("no message")
            );
        }
        Ok(self.data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentationRecord {
    #[serde(default)]
    pub id: Option<RawId>,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub art_style: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default, alias = "segment_id")]
    pub segment_id: Option<RawId>,
    #[serde(default)]
    pub success: bool,
    #[serde(default, alias = "storage_key", alias = "s3_key", alias = "s3Key")]
    pub storage_key: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, alias = "visual_prompt")]
    pub visual_prompt: Option<String>,
    #[serde(default, alias = "art_style")]
    pub art_style: Option<String>,
    #[serde(default, alias = "is_primary")]
    pub is_primary: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoFile {
    #[serde(default, alias = "storage_key", alias = "s3_key", alias = "s3Key")]
    pub storage_key: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default, alias = "segment_id")]
    pub segment_id: Option<RawId>,
    #[serde(default, alias = "image_id")]
    pub image_id: Option<String>,
    #[serde(default)]
    pub files: Vec<VideoFile>,
    #[serde(default, alias = "art_style")]
    pub art_style: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn segment_ids_accept_numbers_and_strings() -> anyhow::Result<()> {
        let numeric: Segment = serde_json::from_value(json!({"id": 3, "visual": "dunes"}))?;
        let text: Segment = serde_json::from_value(json!({"id": "seg-3"}))?;
        assert_eq!(numeric.id, "3");
        assert!(numeric.has_visual());
        assert_eq!(text.id, "seg-3");
        assert!(!text.has_visual());
        Ok(())
    }

    #[test]
    fn image_record_reads_snake_and_camel_fields() -> anyhow::Result<()> {
        let camel: ImageRecord = serde_json::from_value(json!({
            "uuid": "seg-2",
            "segmentId": 2,
            "success": true,
            "storageKey": "images/a.png",
            "isPrimary": true
        }))?;
        let snake: ImageRecord = serde_json::from_value(json!({
            "uuid": "seg-2-17",
            "segment_id": "2",
            "success": true,
            "s3_key": "images/b.png"
        }))?;
        assert_eq!(camel.segment_id, Some(RawId::Number(2)));
        assert_eq!(camel.is_primary, Some(true));
        assert_eq!(snake.storage_key.as_deref(), Some("images/b.png"));
        assert_eq!(snake.segment_id.map(|id| id.to_string()).as_deref(), Some("2"));
        assert_eq!(snake.is_primary, None);
        Ok(())
    }

    #[test]
    fn envelope_failure_becomes_an_error() {
        let failed: ApiEnvelope<ImageRecord> = ApiEnvelope::failed("quota exceeded");
        let err = failed.into_data("images").err().map(|err| err.to_string());
        assert_eq!(
            err.as_deref(),
            Some("images request reported failure: quota exceeded")
        );
        let ok = ApiEnvelope::ok(vec![1, 2]).into_data("numbers").unwrap_or_default();
        assert_eq!(ok, vec![1, 2]);
    }

    #[test]
    fn video_key_uses_image_when_present() {
        let video = GeneratedVideo {
            id: "v1".to_string(),
            segment_key: "4".to_string(),
            image_id: Some("seg-4".to_string()),
            url: None,
            storage_key: "videos/v1.mp4".to_string(),
            art_style: String::new(),
        };
        assert_eq!(video.key(), "4-seg-4");
    }
}
