//! In-memory job bookkeeping.
//!
//! [`JobStore`] is created once at startup and handed to the HTTP layer. It
//! owns the batch jobs tracked by [`BatchTracker`] and the lookup table of
//! provider polling URLs, and prunes both by age and by count.
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::Jobs as JobsConfig;
use crate::model::{
    EffectRef, ImageData, JobStatus, JobStatusView, ProcessedImageRef, ProcessingJob,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobStoreError {
    #[error("job {0} not found")]
    NotFound(Uuid),
    #[error("job {0} already finished")]
    Terminal(Uuid),
}

#[derive(Debug, Clone)]
struct PollingEntry {
    url: String,
    stored_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct JobStore {
    jobs: RwLock<HashMap<Uuid, ProcessingJob>>,
    polling_urls: RwLock<HashMap<String, PollingEntry>>,
    ttl: ChronoDuration,
    max_entries: usize,
}

impl JobStore {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            polling_urls: RwLock::new(HashMap::new()),
            ttl: ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::days(36_500)),
            max_entries: max_entries.max(1),
        }
    }

    pub fn from_config(cfg: &JobsConfig) -> Self {
        Self::new(Duration::from_secs(cfg.ttl_seconds), cfg.max_entries)
    }

    pub async fn insert(&self, job: ProcessingJob) -> Uuid {
        self.prune(Utc::now()).await;
        let id = job.job_id;
        let mut jobs = self.jobs.write().await;
        while jobs.len() >= self.max_entries {
            let Some(oldest) = oldest_job(&jobs) else {
                break;
            };
            warn!(job_id = %oldest, "job store full; dropping oldest job");
            jobs.remove(&oldest);
        }
        jobs.insert(id, job);
        id
    }

    pub async fn get(&self, id: Uuid) -> Option<ProcessingJob> {
        self.jobs.read().await.get(&id).cloned()
    }

    /// Mutate a job in place. Finished jobs are frozen.
    pub async fn update<F>(&self, id: Uuid, f: F) -> Result<(), JobStoreError>
    where
        F: FnOnce(&mut ProcessingJob),
    {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        if job.status.is_terminal() {
            return Err(JobStoreError::Terminal(id));
        }
        f(job);
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Drop finished jobs and polling URLs older than the TTL. Returns how
    /// many entries went away.
    #[instrument(skip(self))]
    pub async fn prune(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now.checked_sub_signed(self.ttl).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut removed = 0;

        {
            let mut jobs = self.jobs.write().await;
            let before = jobs.len();
            jobs.retain(|_, job| match job.end_time {
                Some(end) if job.status.is_terminal() => end > cutoff,
                _ => true,
            });
            removed += before - jobs.len();
        }
        {
            let mut urls = self.polling_urls.write().await;
            let before = urls.len();
            urls.retain(|_, entry| entry.stored_at > cutoff);
            removed += before - urls.len();
        }

        if removed > 0 {
            debug!(removed, "pruned job store");
        }
        removed
    }

    pub async fn remember_polling_url(&self, provider_job_id: &str, url: &str) {
        let mut urls = self.polling_urls.write().await;
        while urls.len() >= self.max_entries {
            let oldest = urls
                .iter()
                .min_by_key(|(_, e)| e.stored_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    urls.remove(&key);
                }
                None => break,
            }
        }
        urls.insert(
            provider_job_id.to_string(),
            PollingEntry {
                url: url.to_string(),
                stored_at: Utc::now(),
            },
        );
    }

    pub async fn polling_url(&self, provider_job_id: &str) -> Option<String> {
        self.polling_urls
            .read()
            .await
            .get(provider_job_id)
            .map(|e| e.url.clone())
    }
}

fn oldest_job(jobs: &HashMap<Uuid, ProcessingJob>) -> Option<Uuid> {
    // Prefer evicting finished jobs before live ones.
    jobs.values()
        .min_by_key(|j| (!j.status.is_terminal(), j.start_time))
        .map(|j| j.job_id)
}

/// A file received by the batch upload endpoint.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub file_name: String,
    pub image: ImageData,
}

/// Simulated multi-file effect processing with pollable progress.
#[derive(Debug, Clone)]
pub struct BatchTracker {
    store: Arc<JobStore>,
    effect_delay: Duration,
}

impl BatchTracker {
    pub fn new(store: Arc<JobStore>, effect_delay: Duration) -> Self {
        Self {
            store,
            effect_delay,
        }
    }

    /// Register the job and start processing it in the background.
    pub async fn start_job(&self, files: Vec<UploadedImage>, effects: Vec<EffectRef>) -> Uuid {
        let effects = if effects.is_empty() {
            vec![EffectRef::original()]
        } else {
            effects
        };
        let job = ProcessingJob::new(files.len() as u32, effects.clone());
        let id = self.store.insert(job).await;
        info!(job_id = %id, files = files.len(), effects = effects.len(), "batch job started");

        let store = Arc::clone(&self.store);
        let delay = self.effect_delay;
        tokio::spawn(async move {
            if let Err(err) = run_job(&store, id, files, effects, delay).await {
                warn!(job_id = %id, %err, "batch job aborted");
            }
        });
        id
    }

    pub async fn get_status(&self, id: Uuid) -> Option<JobStatusView> {
        self.store.get(id).await.as_ref().map(JobStatusView::from)
    }
}

async fn run_job(
    store: &JobStore,
    id: Uuid,
    files: Vec<UploadedImage>,
    effects: Vec<EffectRef>,
    delay: Duration,
) -> Result<(), JobStoreError> {
    if files.is_empty() {
        return store
            .update(id, |job| {
                job.status = JobStatus::Failed;
                job.error = Some("no images to process".into());
                job.end_time = Some(Utc::now());
            })
            .await;
    }

    for file in &files {
        for effect in &effects {
            tokio::time::sleep(delay).await;
            let processed = ProcessedImageRef {
                file_name: file.file_name.clone(),
                effect_id: effect.id.clone(),
                url: file.image.to_data_url(),
            };
            store
                .update(id, |job| job.processed_image_urls.push(processed))
                .await?;
        }
        store.update(id, |job| job.processed_images += 1).await?;
        debug!(job_id = %id, file = %file.file_name, "image processed");
    }

    store
        .update(id, |job| {
            job.status = JobStatus::Completed;
            job.end_time = Some(Utc::now());
        })
        .await?;
    info!(job_id = %id, "batch job completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: &str) -> UploadedImage {
        UploadedImage {
            file_name: name.into(),
            image: ImageData::jpeg(vec![1, 2, 3]),
        }
    }

    #[tokio::test]
    async fn terminal_jobs_are_frozen() {
        let store = JobStore::new(Duration::from_secs(60), 10);
        let id = store.insert(ProcessingJob::new(1, vec![])).await;
        store
            .update(id, |j| j.status = JobStatus::Completed)
            .await
            .unwrap();
        let err = store.update(id, |j| j.processed_images = 7).await;
        assert_eq!(err, Err(JobStoreError::Terminal(id)));
        assert_eq!(store.get(id).await.unwrap().processed_images, 0);
        let missing = Uuid::new_v4();
        assert_eq!(
            store.update(missing, |_| {}).await,
            Err(JobStoreError::NotFound(missing))
        );
    }

    #[tokio::test]
    async fn prune_drops_expired_finished_jobs() {
        let store = JobStore::new(Duration::from_secs(60), 10);
        let live = store.insert(ProcessingJob::new(1, vec![])).await;
        let done = store.insert(ProcessingJob::new(1, vec![])).await;
        store
            .update(done, |j| {
                j.status = JobStatus::Completed;
                j.end_time = Some(Utc::now());
            })
            .await
            .unwrap();
        store.remember_polling_url("ext-1", "https://x/poll").await;

        assert_eq!(store.prune(Utc::now()).await, 0);
        let later = Utc::now() + ChronoDuration::seconds(120);
        assert_eq!(store.prune(later).await, 2);
        assert!(store.get(done).await.is_none());
        assert!(store.get(live).await.is_some());
        assert!(store.polling_url("ext-1").await.is_none());
    }

    #[tokio::test]
    async fn prune_with_huge_ttl_keeps_everything() {
        let store = JobStore::new(Duration::from_secs(1_000_000_000_000_000), 10);
        let done = store.insert(ProcessingJob::new(1, vec![])).await;
        store
            .update(done, |j| {
                j.status = JobStatus::Completed;
                j.end_time = Some(Utc::now());
            })
            .await
            .unwrap();
        store.remember_polling_url("ext-1", "https://x/poll").await;

        assert_eq!(store.prune(Utc::now()).await, 0);
        assert!(store.get(done).await.is_some());
        assert!(store.polling_url("ext-1").await.is_some());
    }

    #[tokio::test]
    async fn capacity_evicts_oldest() {
        let store = JobStore::new(Duration::from_secs(60), 2);
        let first = store.insert(ProcessingJob::new(1, vec![])).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        let second = store.insert(ProcessingJob::new(1, vec![])).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        let third = store.insert(ProcessingJob::new(1, vec![])).await;
        assert_eq!(store.len().await, 2);
        assert!(store.get(first).await.is_none());
        assert!(store.get(second).await.is_some());
        assert!(store.get(third).await.is_some());
    }

    #[tokio::test]
    async fn polling_urls_round_trip() {
        let store = JobStore::new(Duration::from_secs(60), 1);
        store.remember_polling_url("a", "https://x/a").await;
        store.remember_polling_url("b", "https://x/b").await;
        assert!(store.polling_url("a").await.is_none());
        assert_eq!(store.polling_url("b").await.as_deref(), Some("https://x/b"));
    }

    #[tokio::test(start_paused = true)]
    async fn tracker_progress_is_monotonic_and_completes() {
        let store = Arc::new(JobStore::new(Duration::from_secs(60), 10));
        let tracker = BatchTracker::new(store, Duration::from_millis(500));
        let effects = vec![EffectRef::original(), EffectRef::original()];
        let id = tracker
            .start_job(vec![upload("a.jpg"), upload("b.jpg"), upload("c.jpg")], effects)
            .await;

        let mut last = 0;
        let mut seen_partial = false;
        loop {
            let view = tracker.get_status(id).await.unwrap();
            assert!(view.progress.current >= last);
            last = view.progress.current;
            assert_eq!(view.progress.total, 3);
            if view.status == JobStatus::Completed {
                assert_eq!(view.progress.percentage, 100);
                assert_eq!(view.processed_images.unwrap().len(), 6);
                break;
            }
            if view.progress.current > 0 {
                seen_partial = true;
                assert!(view.processed_images.is_none());
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        assert!(seen_partial);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_upload_fails_job() {
        let store = Arc::new(JobStore::new(Duration::from_secs(60), 10));
        let tracker = BatchTracker::new(store, Duration::from_millis(10));
        let id = tracker.start_job(vec![], vec![]).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let view = tracker.get_status(id).await.unwrap();
        assert_eq!(view.status, JobStatus::Failed);
        assert!(view.error.is_some());
    }
}
