use std::sync::{Arc, Mutex};
use std::time::Duration;

use cinder_protocol::JobId;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::context::ConsoleContext;

/// The presentation layer falls over under high-frequency updates to a
/// large job list, so keystrokes are coalesced: only the last input within
/// any window of this length triggers a filter pass.
pub const DEBOUNCE_WINDOW_MS: u64 = 300;

/// Receives each filtered job list; the display side of the seam.
pub type SearchSink = Arc<dyn Fn(Vec<JobId>) + Send + Sync>;

/// Case-insensitive substring filter over a realm's full job list.
pub fn filter_jobs(jobs: &[JobId], query: &str) -> Vec<JobId> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return jobs.to_vec();
    }
    jobs.iter()
        .filter(|job| job.to_lowercase().contains(&query))
        .cloned()
        .collect()
}

/// Coalesces rapid search input into a single filter pass.
///
/// Each keystroke aborts the pending delayed task and schedules a fresh
/// one; the mutex around the handle makes the cancel/replace pair atomic,
/// so at most one callback is ever pending. A callback that is already
/// running is not interrupted.
pub struct DebouncedSearch {
    context: Arc<ConsoleContext>,
    sink: SearchSink,
    delay: Duration,
    jobs: Mutex<Vec<JobId>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl DebouncedSearch {
    pub fn new(context: Arc<ConsoleContext>, sink: SearchSink) -> Arc<Self> {
        Self::with_delay(context, sink, Duration::from_millis(DEBOUNCE_WINDOW_MS))
    }

    pub fn with_delay(
        context: Arc<ConsoleContext>,
        sink: SearchSink,
        delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            context,
            sink,
            delay,
            jobs: Mutex::new(Vec::new()),
            timer: Mutex::new(None),
        })
    }

    /// Install the realm's full (unfiltered) job list.
    pub fn set_jobs(&self, jobs: Vec<JobId>) {
        *self.jobs.lock().expect("job list lock poisoned") = jobs;
    }

    /// Register a keystroke. Restarts the debounce timer.
    pub fn on_input(self: &Arc<Self>, text: &str) {
        let mut timer = self.timer.lock().expect("timer lock poisoned");
        if let Some(pending) = timer.take() {
            pending.abort();
        }
        let this = Arc::clone(self);
        let text = text.to_string();
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(this.delay).await;
            this.apply(&text).await;
        }));
    }

    /// Run the filter pass immediately: record the query as the active
    /// realm's `last_search` and hand the narrowed list to the sink. Also
    /// used directly when a realm restore replays a saved search.
    pub async fn apply(&self, text: &str) {
        let query = text.trim().to_lowercase();
        if let Err(err) = self.context.record_search(&query).await {
            debug!("search not recorded: {err}");
        }
        let filtered = {
            let jobs = self.jobs.lock().expect("job list lock poisoned");
            filter_jobs(&jobs, &query)
        };
        (self.sink)(filtered);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use crate::stores::memory::{MemoryFactory, MemoryStore};
    use tokio::time::sleep;

    fn recorded_sink() -> (SearchSink, Arc<Mutex<Vec<Vec<JobId>>>>) {
        let calls: Arc<Mutex<Vec<Vec<JobId>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_calls = Arc::clone(&calls);
        let sink: SearchSink = Arc::new(move |jobs| {
            sink_calls.lock().unwrap().push(jobs);
        });
        (sink, calls)
    }

    async fn context_in_realm() -> Arc<ConsoleContext> {
        let store = Arc::new(MemoryStore::new());
        store.add_realm("dev");
        let factory = Arc::new(MemoryFactory::new());
        factory.add_profile("ops", store);
        let dir = std::env::temp_dir().join("cinder-search-tests");
        let settings = Settings::load_from(dir.join(format!("{}.toml", uuid::Uuid::new_v4())));
        let context = ConsoleContext::new(factory, settings);
        context.switch_profile("ops").await.unwrap();
        context.switch_realm("dev").await.unwrap();
        context
    }

    #[test]
    fn filter_is_case_insensitive_substring() {
        let jobs: Vec<JobId> = ["Nightly-Report", "daily-sync", "report-cleanup"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(
            filter_jobs(&jobs, "REPORT"),
            vec!["Nightly-Report".to_string(), "report-cleanup".to_string()]
        );
        assert_eq!(filter_jobs(&jobs, "  "), jobs);
    }

    #[tokio::test]
    async fn rapid_input_coalesces_to_one_apply() {
        let context = context_in_realm().await;
        let (sink, calls) = recorded_sink();
        let search = DebouncedSearch::with_delay(context.clone(), sink, Duration::from_millis(60));
        search.set_jobs(vec!["abcd".to_string(), "zzz".to_string()]);

        search.on_input("a");
        search.on_input("ab");
        search.on_input("abc");
        sleep(Duration::from_millis(250)).await;

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], vec!["abcd".to_string()]);
        let view = context.realm_view("ops", "dev").await.unwrap();
        assert_eq!(view.last_search, "abc");
    }

    #[tokio::test]
    async fn spaced_input_applies_each_time() {
        let context = context_in_realm().await;
        let (sink, calls) = recorded_sink();
        let search = DebouncedSearch::with_delay(context, sink, Duration::from_millis(30));
        search.set_jobs(vec!["abcd".to_string()]);

        search.on_input("a");
        sleep(Duration::from_millis(120)).await;
        search.on_input("ab");
        sleep(Duration::from_millis(120)).await;

        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn query_is_normalized_before_recording() {
        let context = context_in_realm().await;
        let (sink, _calls) = recorded_sink();
        let search = DebouncedSearch::with_delay(context.clone(), sink, Duration::from_millis(10));
        search.set_jobs(vec!["Nightly".to_string()]);

        search.apply("  NIGHT  ").await;
        let view = context.realm_view("ops", "dev").await.unwrap();
        assert_eq!(view.last_search, "night");
    }
}
