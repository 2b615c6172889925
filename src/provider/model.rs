use serde::{Deserialize, Serialize};

/// Body of a transformation submission.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub input_image: String,
    pub prompt: String,
    pub prompt_upsampling: bool,
    pub output_format: String,
    pub aspect_ratio: String,
}

impl SubmitRequest {
    pub fn new(input_image: String, prompt: &str, aspect_ratio: &str) -> Self {
        Self {
            input_image,
            prompt: prompt.to_string(),
            prompt_upsampling: true,
            output_format: "jpeg".into(),
            aspect_ratio: aspect_ratio.to_string(),
        }
    }
}

#[derive(Deserialize, Debug)]
pub(crate) struct SubmitResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub polling_url: Option<String>,
}

/// Handle to an accepted provider job.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobHandle {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polling_url: Option<String>,
}

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            polling_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderStatus {
    Pending,
    Processing,
    Ready,
    Error,
    Failed,
    TaskNotFound,
    Unknown(String),
}

impl ProviderStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "Pending" => ProviderStatus::Pending,
            "Processing" => ProviderStatus::Processing,
            "Ready" => ProviderStatus::Ready,
            "Error" => ProviderStatus::Error,
            "Failed" => ProviderStatus::Failed,
            "Task not found" => ProviderStatus::TaskNotFound,
            other => ProviderStatus::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ProviderStatus::Pending => "Pending",
            ProviderStatus::Processing => "Processing",
            ProviderStatus::Ready => "Ready",
            ProviderStatus::Error => "Error",
            ProviderStatus::Failed => "Failed",
            ProviderStatus::TaskNotFound => "Task not found",
            ProviderStatus::Unknown(s) => s,
        }
    }

    /// Explicit provider-side failure; never retried.
    pub fn is_hard_failure(&self) -> bool {
        matches!(self, ProviderStatus::Error | ProviderStatus::Failed)
    }
}

/// What one poll of the result endpoint returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResponse {
    Image { mime: String, bytes: Vec<u8> },
    Status {
        status: ProviderStatus,
        message: Option<String>,
        sample: Option<String>,
    },
}

impl PollResponse {
    pub fn status(status: ProviderStatus) -> Self {
        PollResponse::Status {
            status,
            message: None,
            sample: None,
        }
    }
}

#[derive(Deserialize, Debug)]
pub(crate) struct ResultBody {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub result: Option<ResultSample>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct ResultSample {
    #[serde(default)]
    pub sample: Option<String>,
}

impl From<ResultBody> for PollResponse {
    fn from(body: ResultBody) -> Self {
        PollResponse::Status {
            status: ProviderStatus::parse(&body.status),
            message: body.message,
            sample: body.result.and_then(|r| r.sample),
        }
    }
}
