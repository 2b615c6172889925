#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use photobooth::config::{self, Config};
use photobooth::model::ImageData;
use photobooth::provider::{
    EffectProvider, JobHandle, PollResponse, ProviderError, ProviderStatus, SubmitRequest,
};
use photobooth::server;
use photobooth::state::AppState;
use tokio::sync::Mutex;
use tower::ServiceExt;

pub async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

/// Example config with a fast poll loop and a short simulated effect delay.
pub fn test_config() -> Config {
    let mut cfg: Config = serde_yaml::from_str(config::example()).unwrap();
    cfg.provider.poll_interval_ms = 5;
    cfg.provider.max_attempts = 5;
    cfg.jobs.simulated_effect_ms = 1;
    cfg
}

pub fn png(width: u32, height: u32, color: [u8; 3]) -> ImageData {
    let img = RgbImage::from_pixel(width, height, Rgb(color));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    ImageData::new("image/png", buf.into_inner())
}

/// How the fake provider treats jobs submitted with a given prompt.
#[derive(Debug, Clone)]
pub enum Script {
    /// Report `Pending` for `pending` polls, then return the image inline.
    Image { pending: u32, bytes: Vec<u8> },
    /// Report `Ready` with a sample URL after `pending` polls.
    Sample { pending: u32, url: String },
    /// Report `Error` on the first poll.
    Fails,
    /// Reject the submission itself.
    RejectSubmit,
    /// Report `Pending` forever.
    NeverReady,
    /// Fail `failures` polls at the transport level, then return the image.
    Flaky { failures: u32, bytes: Vec<u8> },
    /// Report the raw `status` for `times` polls, then return the image.
    Status {
        status: String,
        times: u32,
        bytes: Vec<u8>,
    },
    /// Report the raw `status` forever.
    Stuck(String),
}

#[derive(Debug, Default)]
struct Recorded {
    submitted: Vec<SubmitRequest>,
    jobs: HashMap<String, (Script, u32)>,
    polls: Vec<JobHandle>,
    fetched: Vec<String>,
}

#[derive(Clone)]
pub struct ScriptedProvider {
    scripts: Arc<HashMap<String, Script>>,
    fallback: Script,
    samples: Arc<HashMap<String, Vec<u8>>>,
    recorded: Arc<Mutex<Recorded>>,
}

impl ScriptedProvider {
    /// Every prompt without a dedicated script follows `fallback`.
    pub fn new(fallback: Script) -> Self {
        Self {
            scripts: Arc::new(HashMap::new()),
            fallback,
            samples: Arc::new(HashMap::new()),
            recorded: Arc::new(Mutex::new(Recorded::default())),
        }
    }

    pub fn with_script(mut self, prompt: &str, script: Script) -> Self {
        Arc::make_mut(&mut self.scripts).insert(prompt.to_string(), script);
        self
    }

    pub fn with_sample(mut self, url: &str, bytes: Vec<u8>) -> Self {
        Arc::make_mut(&mut self.samples).insert(url.to_string(), bytes);
        self
    }

    pub async fn submitted(&self) -> Vec<SubmitRequest> {
        self.recorded.lock().await.submitted.clone()
    }

    pub async fn poll_count(&self) -> usize {
        self.recorded.lock().await.polls.len()
    }

    pub async fn polled(&self) -> Vec<JobHandle> {
        self.recorded.lock().await.polls.clone()
    }

    pub async fn fetched(&self) -> Vec<String> {
        self.recorded.lock().await.fetched.clone()
    }
}

fn api_error(status: u16, body: &str) -> ProviderError {
    ProviderError::Api {
        status,
        body: body.to_string(),
    }
}

#[async_trait::async_trait]
impl EffectProvider for ScriptedProvider {
    async fn submit(&self, request: &SubmitRequest) -> Result<JobHandle, ProviderError> {
        let script = self
            .scripts
            .get(&request.prompt)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());
        let mut rec = self.recorded.lock().await;
        rec.submitted.push(request.clone());
        if matches!(script, Script::RejectSubmit) {
            return Err(api_error(422, "invalid input image"));
        }
        let id = format!("job-{}", rec.submitted.len());
        rec.jobs.insert(id.clone(), (script, 0));
        Ok(JobHandle {
            polling_url: Some(format!("https://poll.example/v1/get_result?id={id}")),
            id,
        })
    }

    async fn poll(&self, job: &JobHandle) -> Result<PollResponse, ProviderError> {
        let mut rec = self.recorded.lock().await;
        rec.polls.push(job.clone());
        let Some((script, seen)) = rec.jobs.get_mut(&job.id) else {
            return Ok(PollResponse::status(ProviderStatus::TaskNotFound));
        };
        let n = *seen;
        *seen += 1;

        let pending = PollResponse::status(ProviderStatus::Pending);
        Ok(match script {
            Script::Image { pending: p, bytes } if n >= *p => PollResponse::Image {
                mime: "image/jpeg".into(),
                bytes: bytes.clone(),
            },
            Script::Sample { pending: p, url } if n >= *p => PollResponse::Status {
                status: ProviderStatus::Ready,
                message: None,
                sample: Some(url.clone()),
            },
            Script::Fails => PollResponse::Status {
                status: ProviderStatus::Error,
                message: Some("content moderated".into()),
                sample: None,
            },
            Script::Flaky { failures, bytes } => {
                if n < *failures {
                    return Err(api_error(503, "upstream hiccup"));
                }
                PollResponse::Image {
                    mime: "image/jpeg".into(),
                    bytes: bytes.clone(),
                }
            }
            Script::Status {
                status,
                times,
                bytes,
            } => {
                if n < *times {
                    PollResponse::status(ProviderStatus::parse(status))
                } else {
                    PollResponse::Image {
                        mime: "image/jpeg".into(),
                        bytes: bytes.clone(),
                    }
                }
            }
            Script::Stuck(status) => PollResponse::status(ProviderStatus::parse(status)),
            _ => pending,
        })
    }

    async fn fetch_sample(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        self.recorded.lock().await.fetched.push(url.to_string());
        self.samples
            .get(url)
            .cloned()
            .ok_or_else(|| api_error(404, "sample expired"))
    }
}

pub fn build_test_app(pool: sqlx::SqlitePool, provider: ScriptedProvider) -> (Router, AppState) {
    let state = AppState::new(pool, Arc::new(provider), test_config());
    (server::router(state.clone()), state)
}

pub async fn send_json(
    app: Router,
    method: Method,
    uri: &str,
    body: serde_json::Value,
) -> Response<Body> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// A single-part multipart body builder for `/api/process-batch`.
pub struct MultipartBody {
    boundary: &'static str,
    buf: Vec<u8>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self {
            boundary: "booth-test-boundary",
            buf: Vec::new(),
        }
    }

    pub fn file(mut self, name: &str, file_name: &str, mime: &str, bytes: &[u8]) -> Self {
        self.buf.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: {mime}\r\n\r\n",
                self.boundary
            )
            .as_bytes(),
        );
        self.buf.extend_from_slice(bytes);
        self.buf.extend_from_slice(b"\r\n");
        self
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.buf.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n",
                self.boundary
            )
            .as_bytes(),
        );
        self
    }

    pub fn into_request(mut self, uri: &str) -> Request<Body> {
        self.buf
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", self.boundary),
            )
            .body(Body::from(self.buf))
            .unwrap()
    }
}
