use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use cinder_protocol::JobId;
use moka::future::Cache;
use tracing::debug;

use crate::error::Result;
use crate::session::Session;
use crate::stores::JobStore;

/// Reference policy: a realm's job list stays fresh for 15 seconds, and at
/// most 3 distinct listings are retained.
pub const JOB_LIST_TTL_SECS: u64 = 15;
pub const JOB_LIST_MAX_KEYS: u64 = 3;

type JobKey = (String, Option<Vec<String>>, u64);

/// Short-lived memoized job listing per (realm, attributes, session
/// identity). A hit answers without touching the remote store; a miss or
/// expiry runs a full listing scan. The store gives no ordering guarantee,
/// so listings are sorted lexicographically here before they are cached.
pub struct JobListCache {
    cache: Cache<JobKey, std::sync::Arc<Vec<JobId>>>,
    fetches: AtomicU64,
}

impl JobListCache {
    pub fn new() -> Self {
        Self::with_policy(Duration::from_secs(JOB_LIST_TTL_SECS), JOB_LIST_MAX_KEYS)
    }

    pub fn with_policy(ttl: Duration, max_keys: u64) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_keys)
                .time_to_live(ttl)
                .build(),
            fetches: AtomicU64::new(0),
        }
    }

    /// Number of listings that actually hit the remote store.
    pub fn remote_fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub async fn list_jobs(
        &self,
        session: &Session,
        realm: &str,
        attributes: Option<&[String]>,
    ) -> Result<Vec<JobId>> {
        let key: JobKey = (
            realm.to_string(),
            attributes.map(<[String]>::to_vec),
            session.generation(),
        );
        if let Some(hit) = self.cache.get(&key).await {
            debug!(realm, "job list served from cache");
            return Ok((*hit).clone());
        }

        self.fetches.fetch_add(1, Ordering::Relaxed);
        let mut jobs = session.jobs().list_jobs(realm, attributes).await?;
        jobs.sort();
        let shared = std::sync::Arc::new(jobs);
        self.cache.insert(key, std::sync::Arc::clone(&shared)).await;
        Ok((*shared).clone())
    }
}

impl Default for JobListCache {
    fn default() -> Self {
        Self::new()
    }
}
