use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::db::Pool;
use crate::jobs::{BatchTracker, JobStore};
use crate::provider::EffectProvider;

/// Shared state handed to every handler; cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub provider: Arc<dyn EffectProvider>,
    pub jobs: Arc<JobStore>,
    pub tracker: BatchTracker,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(pool: Pool, provider: Arc<dyn EffectProvider>, config: Config) -> Self {
        let jobs = Arc::new(JobStore::from_config(&config.jobs));
        let tracker = BatchTracker::new(
            Arc::clone(&jobs),
            Duration::from_millis(config.jobs.simulated_effect_ms),
        );
        Self {
            pool,
            provider,
            jobs,
            tracker,
            config: Arc::new(config),
        }
    }
}
