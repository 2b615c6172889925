use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client, StatusCode, Url};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;

pub mod model;

pub use model::{JobHandle, PollResponse, ProviderStatus, SubmitRequest};
use model::{ResultBody, SubmitResponse};

const PROVIDER_API_BASE: &str = "https://api.bfl.ai/";
const DEFAULT_MODEL: &str = "v1/flux-kontext-pro";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("provider error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("provider response carried no job id")]
    MissingJobId,
    #[error("invalid provider URL: {0}")]
    Url(String),
}

/// Submit/poll contract of the external image-transformation service.
#[async_trait]
pub trait EffectProvider: Send + Sync {
    async fn submit(&self, request: &SubmitRequest) -> Result<JobHandle, ProviderError>;

    async fn poll(&self, job: &JobHandle) -> Result<PollResponse, ProviderError>;

    /// Download the pixels referenced by a `Ready` result.
    async fn fetch_sample(&self, url: &str) -> Result<Vec<u8>, ProviderError>;
}

#[derive(Clone)]
pub struct HttpProvider {
    http: Client,
    base_url: Url,
    model: String,
    api_key: String,
}

impl fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl HttpProvider {
    pub fn new(api_key: String) -> Self {
        let base_url = Url::parse(PROVIDER_API_BASE).expect("valid default provider URL");
        Self::with_base_url(api_key, base_url, DEFAULT_MODEL.into(), Duration::from_secs(60))
    }

    pub fn with_base_url(api_key: String, base_url: Url, model: String, timeout: Duration) -> Self {
        let http = Client::builder()
            .user_agent(concat!("photobooth/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url,
            model,
            api_key,
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self, ProviderError> {
        let base_url = parse_url(&cfg.provider.base_url)?;
        Ok(Self::with_base_url(
            cfg.provider.api_key.clone(),
            base_url,
            cfg.provider.model.clone(),
            Duration::from_secs(cfg.provider.request_timeout_secs),
        ))
    }

    pub fn build_submit(&self, body: &SubmitRequest) -> Result<reqwest::Request, ProviderError> {
        let endpoint = self
            .base_url
            .join(&self.model)
            .map_err(|e| ProviderError::Url(e.to_string()))?;
        Ok(self
            .http
            .post(endpoint)
            .header("x-key", &self.api_key)
            .header("accept", "application/json")
            .json(body)
            .build()?)
    }

    pub fn build_poll(&self, job: &JobHandle) -> Result<reqwest::Request, ProviderError> {
        let url = match &job.polling_url {
            Some(url) => parse_url(url)?,
            None => {
                let mut url = self
                    .base_url
                    .join("v1/get_result")
                    .map_err(|e| ProviderError::Url(e.to_string()))?;
                url.query_pairs_mut().append_pair("id", &job.id);
                url
            }
        };
        Ok(self
            .http
            .get(url)
            .header("x-key", &self.api_key)
            .header("accept", "application/json")
            .build()?)
    }

    async fn error_for(res: reqwest::Response) -> ProviderError {
        let status = res.status().as_u16();
        let body = res.text().await.unwrap_or_default();
        ProviderError::Api { status, body }
    }
}

fn parse_url(s: &str) -> Result<Url, ProviderError> {
    Url::parse(s).map_err(|e| ProviderError::Url(format!("{s}: {e}")))
}

#[async_trait]
impl EffectProvider for HttpProvider {
    async fn submit(&self, request: &SubmitRequest) -> Result<JobHandle, ProviderError> {
        let req = self.build_submit(request)?;
        debug!(url = %req.url(), prompt = %request.prompt, aspect_ratio = %request.aspect_ratio, "submitting to provider");
        let res = self.http.execute(req).await?;
        if !res.status().is_success() {
            let err = Self::error_for(res).await;
            warn!(%err, "provider rejected submission");
            return Err(err);
        }
        let payload: SubmitResponse = res.json().await?;
        match payload.id.filter(|id| !id.trim().is_empty()) {
            Some(id) => Ok(JobHandle {
                id,
                polling_url: payload.polling_url,
            }),
            None => Err(ProviderError::MissingJobId),
        }
    }

    async fn poll(&self, job: &JobHandle) -> Result<PollResponse, ProviderError> {
        let req = self.build_poll(job)?;
        let res = self.http.execute(req).await?;

        if res.status() == StatusCode::NOT_FOUND {
            return Ok(PollResponse::status(ProviderStatus::TaskNotFound));
        }
        if !res.status().is_success() {
            return Err(Self::error_for(res).await);
        }

        let mime = res
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if mime.starts_with("image/") {
            let bytes = res.bytes().await?.to_vec();
            return Ok(PollResponse::Image { mime, bytes });
        }

        let body: ResultBody = res.json().await?;
        Ok(body.into())
    }

    async fn fetch_sample(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        let res = self.http.get(url).send().await?;
        if !res.status().is_success() {
            return Err(Self::error_for(res).await);
        }
        Ok(res.bytes().await?.to_vec())
    }
}
