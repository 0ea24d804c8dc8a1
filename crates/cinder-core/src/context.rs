use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use cinder_protocol::{
    DispatchRequest, EventRecord, EventStatus, JobId, JobSpec, ProfileName, RealmId, RunId,
};
use tracing::{debug, warn};

use crate::error::{ConsoleError, Result};
use crate::jobs::JobListCache;
use crate::limiter::{Acquire, BlackoutGuard, OpKind};
use crate::query::EventQueryEngine;
use crate::session::{ProfileContext, RealmContext, Session, SessionRegistry};
use crate::settings::Settings;
use crate::stores::{DispatchApi, JobStore, NetConfig, RealmDirectory, SessionFactory};
use crate::util::coerce_value;

#[derive(Default)]
struct ContextState {
    active_profile: Option<ProfileName>,
    profiles: HashMap<ProfileName, ProfileContext>,
}

/// Explicitly constructed owner of everything the console layer keeps
/// between operations: the session registry, per-profile/realm contexts,
/// the blackout guard, the job-list cache, and the query engine. There is
/// no hidden process-wide instance; consumers build one and pass it around.
pub struct ConsoleContext {
    registry: SessionRegistry,
    limiter: BlackoutGuard,
    jobs: JobListCache,
    query: EventQueryEngine,
    settings: Mutex<Settings>,
    state: tokio::sync::Mutex<ContextState>,
}

impl ConsoleContext {
    pub fn new(factory: Arc<dyn SessionFactory>, settings: Settings) -> Arc<Self> {
        Self::with_policies(factory, settings, BlackoutGuard::new(), JobListCache::new())
    }

    /// Construction with explicit policies, for tests and embedders that
    /// need different windows.
    pub fn with_policies(
        factory: Arc<dyn SessionFactory>,
        settings: Settings,
        limiter: BlackoutGuard,
        jobs: JobListCache,
    ) -> Arc<Self> {
        let net = NetConfig::detect(&settings.https_proxy);
        Arc::new(Self {
            registry: SessionRegistry::new(factory, net),
            limiter,
            jobs,
            query: EventQueryEngine::new(),
            settings: Mutex::new(settings),
            state: tokio::sync::Mutex::new(ContextState::default()),
        })
    }

    pub fn limiter(&self) -> &BlackoutGuard {
        &self.limiter
    }

    pub fn job_cache(&self) -> &JobListCache {
        &self.jobs
    }

    pub fn query(&self) -> &EventQueryEngine {
        &self.query
    }

    pub fn settings_snapshot(&self) -> Settings {
        self.settings.lock().expect("settings lock poisoned").clone()
    }

    pub async fn available_profiles(&self) -> Result<Vec<ProfileName>> {
        self.registry.available_profiles().await
    }

    /// Switch the console to `profile`.
    ///
    /// The previous session handle is released (in-flight calls finish on
    /// their own clones), then the new profile resolves via the registry —
    /// reusing that profile's cached clients from a prior visit when they
    /// exist. On failure the profile's session slot reverts to empty so a
    /// later retry starts clean, and the failure surfaces as `Access`.
    pub async fn switch_profile(&self, profile: &str) -> Result<Arc<Session>> {
        let mut state = self.state.lock().await;
        state.active_profile = None;

        let cached = state
            .profiles
            .entry(profile.to_string())
            .or_default()
            .session
            .clone();
        match self.registry.resolve(profile, cached).await {
            Ok(session) => {
                let ctx = state.profiles.entry(profile.to_string()).or_default();
                ctx.session = Some(Arc::clone(&session));
                state.active_profile = Some(profile.to_string());
                self.settings
                    .lock()
                    .expect("settings lock poisoned")
                    .set_profile(profile);
                Ok(session)
            }
            Err(err) => {
                if let Some(ctx) = state.profiles.get_mut(profile) {
                    ctx.session = None;
                }
                Err(err)
            }
        }
    }

    /// Tear down the active profile's session. The profile/realm contexts
    /// stay; only the clients go.
    pub async fn close_session(&self) {
        let mut state = self.state.lock().await;
        if let Some(profile) = state.active_profile.take() {
            debug!(profile = %profile, "closing session");
            if let Some(ctx) = state.profiles.get_mut(&profile) {
                ctx.session = None;
            }
        }
    }

    /// Enter `realm` within the active profile, creating its context on
    /// first visit. Returns the (possibly restored) bookmark so the caller
    /// can put the operator back where they left off.
    pub async fn switch_realm(&self, realm: &str) -> Result<RealmContext> {
        let mut state = self.state.lock().await;
        let profile = state
            .active_profile
            .clone()
            .ok_or_else(|| ConsoleError::InvalidState("no profile selected".into()))?;
        let ctx = state.profiles.entry(profile).or_default();
        ctx.last_realm = Some(realm.to_string());
        let snapshot = ctx.realm_context(realm).clone();
        self.settings
            .lock()
            .expect("settings lock poisoned")
            .set_realm(realm);
        Ok(snapshot)
    }

    pub async fn active_realm(&self) -> Option<RealmId> {
        let state = self.state.lock().await;
        let profile = state.active_profile.as_ref()?;
        state.profiles.get(profile)?.last_realm.clone()
    }

    /// Bookmark snapshot for any (profile, realm) pair, if visited.
    pub async fn realm_view(&self, profile: &str, realm: &str) -> Option<RealmContext> {
        let state = self.state.lock().await;
        state.profiles.get(profile)?.realms.get(realm).cloned()
    }

    pub async fn record_search(&self, text: &str) -> Result<()> {
        self.with_active_realm_context(|ctx| ctx.last_search = text.to_string())
            .await
    }

    pub async fn record_selected_job(&self, job_id: &str) -> Result<()> {
        self.with_active_realm_context(|ctx| ctx.last_selected_job = Some(job_id.to_string()))
            .await
    }

    async fn with_active_realm_context(&self, f: impl FnOnce(&mut RealmContext)) -> Result<()> {
        let mut state = self.state.lock().await;
        let profile = state
            .active_profile
            .clone()
            .ok_or_else(|| ConsoleError::InvalidState("no profile selected".into()))?;
        let ctx = state
            .profiles
            .get_mut(&profile)
            .ok_or_else(|| ConsoleError::InvalidState("no profile selected".into()))?;
        let realm = ctx
            .last_realm
            .clone()
            .ok_or_else(|| ConsoleError::InvalidState("no realm selected".into()))?;
        f(ctx.realm_context(&realm));
        Ok(())
    }

    pub async fn active_session(&self) -> Result<Arc<Session>> {
        let state = self.state.lock().await;
        let profile = state
            .active_profile
            .as_ref()
            .ok_or_else(|| ConsoleError::InvalidState("no profile selected".into()))?;
        state
            .profiles
            .get(profile)
            .and_then(|ctx| ctx.session.clone())
            .ok_or_else(|| ConsoleError::InvalidState("no open session".into()))
    }

    async fn active_target(&self) -> Result<(Arc<Session>, RealmId)> {
        let session = self.active_session().await?;
        let realm = self
            .active_realm()
            .await
            .ok_or_else(|| ConsoleError::InvalidState("no realm selected".into()))?;
        Ok((session, realm))
    }

    /// Realms the active credentials can actually reach. Directory and
    /// probe failures degrade (empty list / excluded realm) instead of
    /// propagating; these are the layer's only swallowed errors.
    pub async fn accessible_realms(&self) -> Result<Vec<RealmId>> {
        let session = self.active_session().await?;
        let all = match session.realms().list_realms().await {
            Ok(realms) => realms,
            Err(err) => {
                warn!("failed to list realms: {err}");
                return Ok(Vec::new());
            }
        };
        let mut reachable = Vec::new();
        for realm in all {
            match session.realms().can_access(&realm).await {
                Ok(true) => reachable.push(realm),
                Ok(false) => {}
                Err(err) => {
                    debug!(realm = %realm, "access probe failed: {err}");
                }
            }
        }
        reachable.sort();
        Ok(reachable)
    }

    /// Job listing for the active realm, via the TTL cache.
    pub async fn list_jobs(&self) -> Result<Vec<JobId>> {
        let (session, realm) = self.active_target().await?;
        self.jobs.list_jobs(&session, &realm, None).await
    }

    /// Fetch a job's spec and bookmark it as the realm's selected job.
    pub async fn job_details(&self, job_id: &str) -> Result<JobSpec> {
        let (session, realm) = self.active_target().await?;
        self.record_selected_job(job_id).await?;
        Ok(session.jobs().job_spec(&realm, job_id).await?)
    }

    /// Recent events for a job, newest first.
    pub async fn events_for_job(
        &self,
        job_id: &str,
        limit: usize,
        status: Option<EventStatus>,
    ) -> Result<Vec<EventRecord>> {
        let (session, realm) = self.active_target().await?;
        self.query
            .events_for_job(&session, &realm, job_id, limit, status)
            .await
    }

    /// The event for one run among the job's `DEFAULT_EVENTS` newest,
    /// gated by the event-fetch blackout.
    pub async fn run_details(&self, job_id: &str, run_id: &str) -> Result<Option<EventRecord>> {
        let (session, realm) = self.active_target().await?;
        self.query
            .run_details(&session, &self.limiter, &realm, job_id, run_id, Utc::now())
            .await
    }

    /// Full running-jobs scan over the event store, blackout-gated and
    /// limited to one in flight per session.
    pub async fn running_jobs(&self, lookback_hours: i64) -> Result<Vec<(JobId, RunId)>> {
        let (session, realm) = self.active_target().await?;
        self.query
            .running_jobs(&session, &self.limiter, &realm, lookback_hours, Utc::now())
            .await
    }

    /// Dispatch `job_id` with operator-entered parameter and global rows.
    /// Values coerce like the forms do (JSON first, then bool/null/number
    /// fallbacks). Gated by the dispatch blackout; a failed RPC has
    /// already consumed the window.
    pub async fn dispatch_job(
        &self,
        job_id: &str,
        worker: &str,
        params: &[(String, String)],
        globals: &[(String, String)],
    ) -> Result<RunId> {
        if job_id.trim().is_empty() {
            return Err(ConsoleError::InvalidState("no job selected".into()));
        }
        if worker.trim().is_empty() {
            return Err(ConsoleError::InvalidState("no worker specified".into()));
        }
        let (session, realm) = self.active_target().await?;
        if let Acquire::Denied { remaining_secs } =
            self.limiter.try_acquire(OpKind::Dispatch, Utc::now())
        {
            return Err(ConsoleError::RateLimited {
                op: OpKind::Dispatch,
                remaining_secs,
            });
        }
        let request = DispatchRequest {
            realm,
            job_id: job_id.trim().to_string(),
            worker: worker.trim().to_string(),
            params: coerce_rows(params),
            globals: coerce_rows(globals),
        };
        Ok(session.dispatch().dispatch(&request).await?)
    }

    /// Fetch a log artifact discovered via reference extraction.
    pub async fn fetch_log(&self, uri: &str) -> Result<String> {
        let session = self.active_session().await?;
        crate::logs::fetch_log(&session, uri).await
    }
}

fn coerce_rows(rows: &[(String, String)]) -> serde_json::Map<String, serde_json::Value> {
    rows.iter()
        .map(|(key, value)| (key.clone(), coerce_value(value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::memory::{MemoryFactory, MemoryStore};
    use serde_json::json;

    fn settings() -> Settings {
        let dir = std::env::temp_dir().join("cinder-context-tests");
        Settings::load_from(dir.join(format!("{}.toml", uuid::Uuid::new_v4())))
    }

    fn harness() -> (Arc<MemoryFactory>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.add_realm("dev");
        store.add_realm("prod");
        let factory = Arc::new(MemoryFactory::new());
        factory.add_profile("ops", Arc::clone(&store));
        (factory, store)
    }

    #[tokio::test]
    async fn operations_without_a_profile_are_invalid_state() {
        let (factory, _store) = harness();
        let context = ConsoleContext::new(factory, settings());
        assert!(matches!(
            context.list_jobs().await.unwrap_err(),
            ConsoleError::InvalidState(_)
        ));
        assert!(matches!(
            context.switch_realm("dev").await.unwrap_err(),
            ConsoleError::InvalidState(_)
        ));
    }

    #[tokio::test]
    async fn failed_switch_resets_the_slot() {
        let (factory, _store) = harness();
        factory.deny_profile("ops");
        let context = ConsoleContext::new(factory.clone(), settings());
        let err = context.switch_profile("ops").await.unwrap_err();
        assert!(matches!(err, ConsoleError::Access(_)));
        assert!(context.active_session().await.is_err());

        factory.allow_profile("ops");
        let session = context.switch_profile("ops").await.unwrap();
        assert_eq!(session.profile(), "ops");
    }

    #[tokio::test]
    async fn dispatch_coerces_and_is_blackout_gated() {
        let (factory, store) = harness();
        store.add_job("dev", "nightly", JobSpec::from_json(r#"{"worker": "w"}"#).unwrap());
        let context = ConsoleContext::new(factory, settings());
        context.switch_profile("ops").await.unwrap();
        context.switch_realm("dev").await.unwrap();

        let rows = vec![
            ("count".to_string(), "3".to_string()),
            ("dry_run".to_string(), "True".to_string()),
            ("label".to_string(), "overnight batch".to_string()),
        ];
        let run_id = context
            .dispatch_job("nightly", "w", &rows, &[])
            .await
            .unwrap();
        assert!(!run_id.is_empty());
        let sent = store.dispatched();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].params["count"], json!(3));
        assert_eq!(sent[0].params["dry_run"], json!(true));
        assert_eq!(sent[0].params["label"], json!("overnight batch"));

        let err = context
            .dispatch_job("nightly", "w", &rows, &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConsoleError::RateLimited {
                op: OpKind::Dispatch,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn failed_dispatch_still_consumes_the_window() {
        let (factory, store) = harness();
        store.set_fail_dispatch(true);
        let context = ConsoleContext::new(factory, settings());
        context.switch_profile("ops").await.unwrap();
        context.switch_realm("dev").await.unwrap();

        let err = context.dispatch_job("nightly", "w", &[], &[]).await.unwrap_err();
        assert!(matches!(err, ConsoleError::Store(_)));

        store.set_fail_dispatch(false);
        let err = context.dispatch_job("nightly", "w", &[], &[]).await.unwrap_err();
        assert!(matches!(err, ConsoleError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn accessible_realms_degrade_on_probe_failure() {
        let (factory, store) = harness();
        store.set_accessible("prod", false);
        let context = ConsoleContext::new(factory, settings());
        context.switch_profile("ops").await.unwrap();

        assert_eq!(context.accessible_realms().await.unwrap(), vec!["dev"]);

        store.set_fail_can_access(true);
        assert!(context.accessible_realms().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn job_details_bookmarks_selection() {
        let (factory, store) = harness();
        store.add_job("dev", "nightly", JobSpec::from_json(r#"{"worker": "w"}"#).unwrap());
        let context = ConsoleContext::new(factory, settings());
        context.switch_profile("ops").await.unwrap();
        context.switch_realm("dev").await.unwrap();

        let spec = context.job_details("nightly").await.unwrap();
        assert_eq!(spec.worker, "w");
        let view = context.realm_view("ops", "dev").await.unwrap();
        assert_eq!(view.last_selected_job.as_deref(), Some("nightly"));
    }
}
