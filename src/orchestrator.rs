//! Effect application: turns captured images plus the enabled effects into
//! one processed result per image.
//!
//! Every image is isolated. A submission error, a provider-reported failure
//! or an exhausted poll budget degrades that single image to its original
//! pixels; the batch always comes back complete and in input order.
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::model::{EffectRef, ImageData, Orientation, ProcessedResult};
use crate::polling::{poll_until, PollError, PollStep, RetryPolicy};
use crate::provider::{
    EffectProvider, JobHandle, PollResponse, ProviderError, ProviderStatus, SubmitRequest,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOptions {
    pub orientation: Orientation,
    pub policy: RetryPolicy,
    /// Images in flight at once; 1 keeps the pipeline strictly sequential.
    pub max_concurrency: usize,
}

impl ApplyOptions {
    pub fn from_config(cfg: &Config, orientation: Orientation) -> Self {
        Self {
            orientation,
            policy: cfg.retry_policy(),
            max_concurrency: cfg.provider.max_concurrency.max(1),
        }
    }
}

#[derive(Debug, Error)]
enum EffectFailure {
    #[error("submission failed: {0}")]
    Submit(ProviderError),
    #[error("provider reported {status}: {message}")]
    Provider { status: String, message: String },
    #[error("no result after {0} polls")]
    Timeout(u32),
    #[error("could not download result: {0}")]
    Download(ProviderError),
}

/// Effect for image `index`: round robin over `effects`.
pub fn effect_for(effects: &[EffectRef], index: usize) -> &EffectRef {
    &effects[index % effects.len()]
}

/// Apply effects to every image; never fails and never drops an image.
#[instrument(skip_all, fields(images = images.len(), effects = effects.len()))]
pub async fn apply_effects(
    provider: &dyn EffectProvider,
    images: Vec<ImageData>,
    effects: Vec<EffectRef>,
    options: &ApplyOptions,
) -> Vec<ProcessedResult> {
    let effects = if effects.is_empty() {
        vec![EffectRef::original()]
    } else {
        effects
    };

    let jobs = images.into_iter().enumerate().map(|(index, image)| {
        let effect = effect_for(&effects, index).clone();
        async move { apply_one(provider, index, image, effect, options).await }
    });

    let results: Vec<ProcessedResult> = stream::iter(jobs)
        .buffered(options.max_concurrency.max(1))
        .collect()
        .await;

    let failed = results.iter().filter(|r| r.is_fallback()).count();
    info!(total = results.len(), failed, "effect batch finished");
    results
}

async fn apply_one(
    provider: &dyn EffectProvider,
    index: usize,
    original: ImageData,
    effect: EffectRef,
    options: &ApplyOptions,
) -> ProcessedResult {
    match transform(provider, &original, &effect, options).await {
        Ok(processed) => {
            info!(index, effect = %effect.id, "effect applied");
            ProcessedResult::applied(original, processed, effect)
        }
        Err(err) => {
            warn!(index, effect = %effect.id, %err, "effect failed; using original");
            ProcessedResult::fallback(original, effect, err.to_string())
        }
    }
}

async fn transform(
    provider: &dyn EffectProvider,
    original: &ImageData,
    effect: &EffectRef,
    options: &ApplyOptions,
) -> Result<ImageData, EffectFailure> {
    let request = SubmitRequest::new(
        original.to_base64(),
        &effect.prompt,
        options.orientation.aspect_ratio(),
    );
    let job = provider
        .submit(&request)
        .await
        .map_err(EffectFailure::Submit)?;

    let outcome = poll_until(&options.policy, |attempt| {
        let job = &job;
        async move { check(provider, job, attempt).await }
    })
    .await;

    match outcome {
        Ok(Ready::Image(image)) => Ok(image),
        Ok(Ready::Sample(url)) => {
            let bytes = provider
                .fetch_sample(&url)
                .await
                .map_err(EffectFailure::Download)?;
            Ok(ImageData::jpeg(bytes))
        }
        Err(PollError::Failed(err)) => Err(err),
        Err(PollError::Exhausted { attempts }) => Err(EffectFailure::Timeout(attempts)),
    }
}

enum Ready {
    Image(ImageData),
    Sample(String),
}

async fn check(
    provider: &dyn EffectProvider,
    job: &JobHandle,
    attempt: u32,
) -> PollStep<Ready, EffectFailure> {
    match provider.poll(job).await {
        Ok(PollResponse::Image { mime, bytes }) => {
            PollStep::Ready(Ready::Image(ImageData::new(mime, bytes)))
        }
        Ok(PollResponse::Status {
            status: ProviderStatus::Ready,
            sample: Some(url),
            ..
        }) => PollStep::Ready(Ready::Sample(url)),
        Ok(PollResponse::Status {
            status: ProviderStatus::Ready,
            sample: None,
            ..
        }) => {
            warn!(job = %job.id, attempt, "ready without a sample; polling again");
            PollStep::Pending
        }
        Ok(PollResponse::Status {
            status, message, ..
        }) if status.is_hard_failure() => PollStep::Failed(EffectFailure::Provider {
            status: status.as_str().to_string(),
            message: message.unwrap_or_default(),
        }),
        Ok(PollResponse::Status {
            status: status @ (ProviderStatus::TaskNotFound | ProviderStatus::Unknown(_)),
            ..
        }) => {
            // The provider can briefly lose track of fresh jobs; only the budget ends these.
            debug!(job = %job.id, attempt, status = status.as_str(), "unrecognised status; polling again");
            PollStep::Pending
        }
        Ok(PollResponse::Status { .. }) => PollStep::Pending,
        Err(err) => {
            warn!(job = %job.id, attempt, %err, "poll failed; retrying");
            PollStep::Pending
        }
    }
}
