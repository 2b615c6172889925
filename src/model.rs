use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound on simultaneously enabled effects.
pub const MAX_ENABLED_EFFECTS: usize = 3;

/// Marker appended to an effect name when the transformation fell back.
pub const FAILED_MARKER: &str = " (failed)";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
    Square,
}

impl Orientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Orientation::Portrait => "portrait",
            Orientation::Landscape => "landscape",
            Orientation::Square => "square",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "portrait" => Some(Orientation::Portrait),
            "landscape" => Some(Orientation::Landscape),
            "square" => Some(Orientation::Square),
            _ => None,
        }
    }

    /// Provider aspect-ratio code requested for this orientation.
    pub fn aspect_ratio(&self) -> &'static str {
        match self {
            Orientation::Portrait => "2:3",
            Orientation::Landscape => "3:2",
            Orientation::Square => "1:1",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Effect {
    pub id: String,
    pub name: String,
    pub prompt: String,
    pub enabled: bool,
}

/// The parts of an effect that travel with a job or a result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EffectRef {
    pub id: String,
    pub name: String,
    pub prompt: String,
}

impl EffectRef {
    /// Synthetic effect used when nothing is enabled.
    pub fn original() -> Self {
        Self {
            id: "original".into(),
            name: "Original".into(),
            prompt: "Enhance this photo: improve lighting, color balance and sharpness while keeping it natural".into(),
        }
    }
}

impl From<&Effect> for EffectRef {
    fn from(e: &Effect) -> Self {
        Self {
            id: e.id.clone(),
            name: e.name.clone(),
            prompt: e.prompt.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSettings {
    pub flash_enabled: bool,
    pub sound_enabled: bool,
    pub preview_time: u32,
    pub retake_allowed: bool,
    pub max_retakes: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            flash_enabled: true,
            sound_enabled: true,
            preview_time: 3,
            retake_allowed: true,
            max_retakes: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub orientation: Orientation,
    pub effects: Vec<Effect>,
    pub capture_interval: u32,
    pub countdown_duration: u32,
    pub photo_count: u32,
    pub capture_settings: CaptureSettings,
}

impl Settings {
    pub fn enabled_effects(&self) -> impl Iterator<Item = &Effect> {
        self.effects.iter().filter(|e| e.enabled)
    }
}

/// An opaque image payload with its MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl ImageData {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            bytes,
        }
    }

    pub fn jpeg(bytes: Vec<u8>) -> Self {
        Self::new("image/jpeg", bytes)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.to_base64())
    }

    /// Accepts either a `data:<mime>;base64,<body>` URL or a bare base64 body
    /// (assumed JPEG).
    pub fn from_data_url(s: &str) -> Result<Self, ImageDecodeError> {
        let s = s.trim();
        let (mime, body) = match s.strip_prefix("data:") {
            Some(rest) => {
                let (meta, body) = rest.split_once(',').ok_or(ImageDecodeError::Malformed)?;
                let mime = meta
                    .strip_suffix(";base64")
                    .ok_or(ImageDecodeError::Malformed)?;
                (mime.to_string(), body)
            }
            None => ("image/jpeg".to_string(), s),
        };
        if !mime.starts_with("image/") {
            return Err(ImageDecodeError::NotAnImage(mime));
        }
        let bytes = STANDARD.decode(body)?;
        if bytes.is_empty() {
            return Err(ImageDecodeError::Empty);
        }
        Ok(Self { mime, bytes })
    }
}

impl Serialize for ImageData {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_data_url())
    }
}

impl<'de> Deserialize<'de> for ImageData {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ImageData::from_data_url(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImageDecodeError {
    #[error("malformed data URL")]
    Malformed,
    #[error("not an image: {0}")]
    NotAnImage(String),
    #[error("empty image payload")]
    Empty,
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// How the effect application for one image ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Applied,
    Fallback { reason: String },
}

/// One entry of the orchestrator output; `processed` is always populated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessedResult {
    pub original: ImageData,
    pub processed: ImageData,
    pub effect: EffectRef,
    pub outcome: Outcome,
}

impl ProcessedResult {
    pub fn applied(original: ImageData, processed: ImageData, effect: EffectRef) -> Self {
        Self {
            original,
            processed,
            effect,
            outcome: Outcome::Applied,
        }
    }

    pub fn fallback(original: ImageData, mut effect: EffectRef, reason: impl Into<String>) -> Self {
        effect.name.push_str(FAILED_MARKER);
        Self {
            processed: original.clone(),
            original,
            effect,
            outcome: Outcome::Fallback {
                reason: reason.into(),
            },
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.outcome, Outcome::Fallback { .. })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedImageRef {
    pub file_name: String,
    pub effect_id: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingJob {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub total_images: u32,
    pub processed_images: u32,
    pub effects: Vec<EffectRef>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub processed_image_urls: Vec<ProcessedImageRef>,
    pub error: Option<String>,
}

impl ProcessingJob {
    pub fn new(total_images: u32, effects: Vec<EffectRef>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            status: JobStatus::Processing,
            total_images,
            processed_images: 0,
            effects,
            start_time: Utc::now(),
            end_time: None,
            processed_image_urls: Vec::new(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Progress {
    pub current: u32,
    pub total: u32,
    pub percentage: u32,
}

impl Progress {
    pub fn new(current: u32, total: u32) -> Self {
        let percentage = if total == 0 {
            0
        } else {
            (f64::from(current) / f64::from(total) * 100.0).round() as u32
        };
        Self {
            current,
            total,
            percentage,
        }
    }
}

/// Client-facing view of a tracked batch job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub status: JobStatus,
    pub progress: Progress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_images: Option<Vec<ProcessedImageRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ProcessingJob> for JobStatusView {
    fn from(job: &ProcessingJob) -> Self {
        Self {
            status: job.status,
            progress: Progress::new(job.processed_images, job.total_images),
            processed_images: (job.status == JobStatus::Completed)
                .then(|| job.processed_image_urls.clone()),
            error: job.error.clone(),
        }
    }
}
