//! In-memory store for tests and single-process defaults. One instance
//! plays every remote role; a [`MemoryFactory`] hands the same instance to
//! each profile that connects.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail};
use cinder_protocol::{
    DispatchRequest, EventRecord, EventStatus, JobId, JobSpec, ProfileName, QueryOutput, RealmId,
    RunId, ScanOutput, ScanWindow,
};

use super::{
    BlobStore, DispatchApi, EventStore, JobStore, NetConfig, RealmDirectory, SessionClients,
    SessionFactory,
};

const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Default)]
struct RealmData {
    jobs: HashMap<JobId, JobSpec>,
    events: Vec<EventRecord>,
    accessible: bool,
}

#[derive(Default)]
struct MemoryInner {
    realms: Mutex<HashMap<RealmId, RealmData>>,
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    dispatches: Mutex<Vec<DispatchRequest>>,
    job_list_fetches: AtomicU64,
    scan_pages: AtomicU64,
    omit_items: AtomicBool,
    fail_probe: AtomicBool,
    fail_can_access: AtomicBool,
    fail_dispatch: AtomicBool,
}

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
    page_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Small page sizes force the continuation-cursor loop in tests.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            inner: Arc::new(MemoryInner::default()),
            page_size: page_size.max(1),
        }
    }

    pub fn add_realm(&self, realm: &str) {
        let mut realms = self.lock_realms();
        realms.entry(realm.to_string()).or_default().accessible = true;
    }

    pub fn set_accessible(&self, realm: &str, accessible: bool) {
        let mut realms = self.lock_realms();
        realms.entry(realm.to_string()).or_default().accessible = accessible;
    }

    pub fn add_job(&self, realm: &str, job_id: &str, spec: JobSpec) {
        let mut realms = self.lock_realms();
        realms
            .entry(realm.to_string())
            .or_default()
            .jobs
            .insert(job_id.to_string(), spec);
    }

    pub fn add_event(&self, realm: &str, event: EventRecord) {
        let mut realms = self.lock_realms();
        realms.entry(realm.to_string()).or_default().events.push(event);
    }

    pub fn add_object(&self, bucket: &str, key: &str, bytes: Vec<u8>) {
        self.inner
            .objects
            .lock()
            .expect("object map lock poisoned")
            .insert((bucket.to_string(), key.to_string()), bytes);
    }

    /// Number of full job-list scans issued against the store.
    pub fn job_list_fetches(&self) -> u64 {
        self.inner.job_list_fetches.load(Ordering::Relaxed)
    }

    /// Number of scan pages served (across all segments).
    pub fn scan_pages_served(&self) -> u64 {
        self.inner.scan_pages.load(Ordering::Relaxed)
    }

    pub fn dispatched(&self) -> Vec<DispatchRequest> {
        self.inner
            .dispatches
            .lock()
            .expect("dispatch log lock poisoned")
            .clone()
    }

    /// Make point queries come back without the expected `items` field.
    pub fn set_omit_items(&self, omit: bool) {
        self.inner.omit_items.store(omit, Ordering::Relaxed);
    }

    pub fn set_fail_probe(&self, fail: bool) {
        self.inner.fail_probe.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_can_access(&self, fail: bool) {
        self.inner.fail_can_access.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_dispatch(&self, fail: bool) {
        self.inner.fail_dispatch.store(fail, Ordering::Relaxed);
    }

    /// Stable segment assignment used by the scan; exposed so tests can
    /// seed runs into known partitions.
    pub fn segment_for(run_id: &str, total_segments: u32) -> u32 {
        let h = run_id
            .bytes()
            .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
        (h % u64::from(total_segments.max(1))) as u32
    }

    pub fn clients(self: &Arc<Self>) -> SessionClients {
        SessionClients {
            jobs: Arc::clone(self) as Arc<dyn JobStore>,
            events: Arc::clone(self) as Arc<dyn EventStore>,
            blobs: Arc::clone(self) as Arc<dyn BlobStore>,
            realms: Arc::clone(self) as Arc<dyn RealmDirectory>,
            dispatch: Arc::clone(self) as Arc<dyn DispatchApi>,
        }
    }

    fn lock_realms(&self) -> std::sync::MutexGuard<'_, HashMap<RealmId, RealmData>> {
        self.inner.realms.lock().expect("realm map lock poisoned")
    }
}

#[async_trait::async_trait]
impl JobStore for MemoryStore {
    async fn job_spec(&self, realm: &str, job_id: &str) -> anyhow::Result<JobSpec> {
        let realms = self.lock_realms();
        realms
            .get(realm)
            .and_then(|data| data.jobs.get(job_id))
            .cloned()
            .ok_or_else(|| anyhow!("no spec for job '{job_id}' in realm '{realm}'"))
    }

    async fn list_jobs(
        &self,
        realm: &str,
        _attributes: Option<&[String]>,
    ) -> anyhow::Result<Vec<JobId>> {
        self.inner.job_list_fetches.fetch_add(1, Ordering::Relaxed);
        let realms = self.lock_realms();
        let data = realms
            .get(realm)
            .ok_or_else(|| anyhow!("realm '{realm}' does not exist"))?;
        // HashMap order stands in for the store's lack of ordering guarantees.
        Ok(data.jobs.keys().cloned().collect())
    }
}

#[async_trait::async_trait]
impl EventStore for MemoryStore {
    async fn query_events(
        &self,
        realm: &str,
        job_id: &str,
        limit: Option<usize>,
        newest_first: bool,
        status: Option<EventStatus>,
    ) -> anyhow::Result<QueryOutput> {
        if self.inner.omit_items.load(Ordering::Relaxed) {
            return Ok(QueryOutput { items: None });
        }
        let realms = self.lock_realms();
        let data = realms
            .get(realm)
            .ok_or_else(|| anyhow!("realm '{realm}' does not exist"))?;
        let mut items: Vec<EventRecord> = data
            .events
            .iter()
            .filter(|ev| ev.job_id == job_id)
            .filter(|ev| status.map_or(true, |s| ev.status == s))
            .cloned()
            .collect();
        items.sort_by_key(|ev| ev.ts_event);
        if newest_first {
            items.reverse();
        }
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        Ok(QueryOutput { items: Some(items) })
    }

    async fn scan_events(
        &self,
        realm: &str,
        window: &ScanWindow,
        segment: u32,
        total_segments: u32,
        cursor: Option<String>,
    ) -> anyhow::Result<ScanOutput> {
        self.inner.scan_pages.fetch_add(1, Ordering::Relaxed);
        let realms = self.lock_realms();
        let data = realms
            .get(realm)
            .ok_or_else(|| anyhow!("realm '{realm}' does not exist"))?;
        let matching: Vec<EventRecord> = data
            .events
            .iter()
            .filter(|ev| Self::segment_for(&ev.run_id, total_segments) == segment)
            .filter(|ev| ev.status == window.status)
            .filter(|ev| ev.ts_dispatch >= window.from && ev.ts_dispatch <= window.to)
            .cloned()
            .collect();

        let offset: usize = match cursor {
            Some(raw) => raw
                .parse()
                .map_err(|_| anyhow!("malformed continuation cursor '{raw}'"))?,
            None => 0,
        };
        let page: Vec<EventRecord> = matching
            .iter()
            .skip(offset)
            .take(self.page_size)
            .cloned()
            .collect();
        let consumed = offset + page.len();
        let next_cursor = (consumed < matching.len()).then(|| consumed.to_string());
        Ok(ScanOutput {
            items: Some(page),
            next_cursor,
        })
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryStore {
    async fn get_object(&self, bucket: &str, key: &str) -> anyhow::Result<Vec<u8>> {
        self.inner
            .objects
            .lock()
            .expect("object map lock poisoned")
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| anyhow!("no object at s3://{bucket}/{key}"))
    }
}

#[async_trait::async_trait]
impl RealmDirectory for MemoryStore {
    async fn probe(&self) -> anyhow::Result<()> {
        if self.inner.fail_probe.load(Ordering::Relaxed) {
            bail!("realm directory unreachable");
        }
        Ok(())
    }

    async fn list_realms(&self) -> anyhow::Result<Vec<RealmId>> {
        let mut realms: Vec<RealmId> = self.lock_realms().keys().cloned().collect();
        realms.sort();
        Ok(realms)
    }

    async fn can_access(&self, realm: &str) -> anyhow::Result<bool> {
        if self.inner.fail_can_access.load(Ordering::Relaxed) {
            bail!("permission check failed for realm '{realm}'");
        }
        Ok(self
            .lock_realms()
            .get(realm)
            .map(|data| data.accessible)
            .unwrap_or(false))
    }
}

#[async_trait::async_trait]
impl DispatchApi for MemoryStore {
    async fn dispatch(&self, request: &DispatchRequest) -> anyhow::Result<RunId> {
        if self.inner.fail_dispatch.load(Ordering::Relaxed) {
            bail!("dispatch rejected by control plane");
        }
        self.inner
            .dispatches
            .lock()
            .expect("dispatch log lock poisoned")
            .push(request.clone());
        Ok(uuid::Uuid::new_v4().to_string())
    }
}

/// Session factory over a fixed set of profiles, each backed by a
/// [`MemoryStore`].
#[derive(Default)]
pub struct MemoryFactory {
    profiles: Mutex<HashMap<ProfileName, Arc<MemoryStore>>>,
    denied: Mutex<HashSet<ProfileName>>,
    connects: AtomicU64,
    last_proxy: Mutex<Option<String>>,
}

impl MemoryFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_profile(&self, profile: &str, store: Arc<MemoryStore>) {
        self.profiles
            .lock()
            .expect("profile map lock poisoned")
            .insert(profile.to_string(), store);
    }

    /// Make `connect` fail for `profile` as if its credentials were bad.
    pub fn deny_profile(&self, profile: &str) {
        self.denied
            .lock()
            .expect("denied set lock poisoned")
            .insert(profile.to_string());
    }

    pub fn allow_profile(&self, profile: &str) {
        self.denied
            .lock()
            .expect("denied set lock poisoned")
            .remove(profile);
    }

    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    pub fn last_proxy(&self) -> Option<String> {
        self.last_proxy.lock().expect("proxy lock poisoned").clone()
    }
}

#[async_trait::async_trait]
impl SessionFactory for MemoryFactory {
    async fn connect(&self, profile: &str, net: &NetConfig) -> anyhow::Result<SessionClients> {
        self.connects.fetch_add(1, Ordering::Relaxed);
        *self.last_proxy.lock().expect("proxy lock poisoned") = net.proxy.clone();
        if self
            .denied
            .lock()
            .expect("denied set lock poisoned")
            .contains(profile)
        {
            bail!("credentials for profile '{profile}' were rejected");
        }
        let store = self
            .profiles
            .lock()
            .expect("profile map lock poisoned")
            .get(profile)
            .cloned()
            .ok_or_else(|| anyhow!("unknown profile '{profile}'"))?;
        Ok(store.clients())
    }

    async fn available_profiles(&self) -> anyhow::Result<Vec<ProfileName>> {
        let mut profiles: Vec<ProfileName> = self
            .profiles
            .lock()
            .expect("profile map lock poisoned")
            .keys()
            .cloned()
            .collect();
        profiles.sort();
        Ok(profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn event(job: &str, run: &str, status: EventStatus, age_mins: i64) -> EventRecord {
        let now = Utc::now();
        EventRecord {
            job_id: job.to_string(),
            run_id: run.to_string(),
            ts_dispatch: now - Duration::minutes(age_mins),
            ts_event: now - Duration::minutes(age_mins) + Duration::seconds(30),
            status,
            extra: Default::default(),
        }
    }

    #[tokio::test]
    async fn scan_pages_through_a_segment() {
        let store = MemoryStore::with_page_size(2);
        store.add_realm("dev");
        let now = Utc::now();
        // All runs share a name prefix; pick ones landing in segment 0.
        let mut seeded = 0;
        let mut i = 0;
        while seeded < 5 {
            let run = format!("run-{i}");
            i += 1;
            if MemoryStore::segment_for(&run, 4) != 0 {
                continue;
            }
            store.add_event("dev", event("job-a", &run, EventStatus::Running, 10));
            seeded += 1;
        }
        let window = ScanWindow {
            status: EventStatus::Running,
            from: now - Duration::hours(1),
            to: now,
        };
        let mut collected = 0;
        let mut cursor = None;
        let mut pages = 0;
        loop {
            let out = store
                .scan_events("dev", &window, 0, 4, cursor.clone())
                .await
                .unwrap();
            collected += out.items.as_deref().map(|i| i.len()).unwrap_or(0);
            pages += 1;
            match out.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(collected, 5);
        assert_eq!(pages, 3);
    }

    #[tokio::test]
    async fn query_orders_newest_first() {
        let store = MemoryStore::new();
        store.add_realm("dev");
        store.add_event("dev", event("job-a", "r1", EventStatus::Complete, 30));
        store.add_event("dev", event("job-a", "r2", EventStatus::Running, 5));
        store.add_event("dev", event("job-b", "r3", EventStatus::Running, 1));

        let out = store
            .query_events("dev", "job-a", Some(10), true, None)
            .await
            .unwrap();
        let items = out.items.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].run_id, "r2");
        assert_eq!(items[1].run_id, "r1");
    }
}
