//! Trait seams for the remote collaborators. Each is an opaque networked
//! dependency; implementations live with the consumer (or in
//! [`memory`] for tests and single-process defaults).

use std::sync::Arc;

use cinder_protocol::{
    DispatchRequest, EventStatus, JobId, JobSpec, ProfileName, QueryOutput, RealmId, RunId,
    ScanOutput, ScanWindow,
};

pub mod memory;

/// Key-value job store.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    async fn job_spec(&self, realm: &str, job_id: &str) -> anyhow::Result<JobSpec>;
    /// Full listing scan; order is not guaranteed by the store.
    async fn list_jobs(
        &self,
        realm: &str,
        attributes: Option<&[String]>,
    ) -> anyhow::Result<Vec<JobId>>;
}

/// Partitioned event store: point queries by job id plus a segmented,
/// paginated scan with an opaque continuation cursor.
#[async_trait::async_trait]
pub trait EventStore: Send + Sync {
    async fn query_events(
        &self,
        realm: &str,
        job_id: &str,
        limit: Option<usize>,
        newest_first: bool,
        status: Option<EventStatus>,
    ) -> anyhow::Result<QueryOutput>;

    /// One page of one scan segment. Callers loop until `next_cursor` is
    /// exhausted, for every segment in `0..total_segments`.
    async fn scan_events(
        &self,
        realm: &str,
        window: &ScanWindow,
        segment: u32,
        total_segments: u32,
        cursor: Option<String>,
    ) -> anyhow::Result<ScanOutput>;
}

/// Blob store holding log artifacts.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    async fn get_object(&self, bucket: &str, key: &str) -> anyhow::Result<Vec<u8>>;
}

/// Realm directory at the control-plane root.
#[async_trait::async_trait]
pub trait RealmDirectory: Send + Sync {
    /// Cheap reachability check against the directory root. Session
    /// resolution treats a failure here as fatal for the candidate session.
    async fn probe(&self) -> anyhow::Result<()>;
    async fn list_realms(&self) -> anyhow::Result<Vec<RealmId>>;
    /// Whether the active credentials can reach `realm`. Callers degrade
    /// errors to `false`; implementations may simply propagate.
    async fn can_access(&self, realm: &str) -> anyhow::Result<bool>;
}

/// Opaque dispatch RPC.
#[async_trait::async_trait]
pub trait DispatchApi: Send + Sync {
    async fn dispatch(&self, request: &DispatchRequest) -> anyhow::Result<RunId>;
}

/// The per-profile client bundle a [`SessionFactory`] produces.
#[derive(Clone)]
pub struct SessionClients {
    pub jobs: Arc<dyn JobStore>,
    pub events: Arc<dyn EventStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub realms: Arc<dyn RealmDirectory>,
    pub dispatch: Arc<dyn DispatchApi>,
}

/// Network options applied to every client of a session.
#[derive(Debug, Clone, Default)]
pub struct NetConfig {
    /// Process-wide HTTPS proxy. Environment override wins over settings.
    pub proxy: Option<String>,
}

impl NetConfig {
    /// Resolve the proxy from `HTTPS_PROXY` first, then the settings file.
    pub fn detect(settings_proxy: &str) -> Self {
        let proxy = std::env::var("HTTPS_PROXY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| {
                let trimmed = settings_proxy.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            });
        Self { proxy }
    }
}

/// Builds service clients for a named credential profile. Connection
/// failures surface as errors here; the registry turns them into
/// `ConsoleError::Access`.
#[async_trait::async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(&self, profile: &str, net: &NetConfig) -> anyhow::Result<SessionClients>;
    /// Externally enumerable credential profiles.
    async fn available_profiles(&self) -> anyhow::Result<Vec<ProfileName>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn net_config_env_override_wins() {
        std::env::set_var("HTTPS_PROXY", "http://env-proxy:8080");
        let net = NetConfig::detect("http://file-proxy:3128");
        assert_eq!(net.proxy.as_deref(), Some("http://env-proxy:8080"));
        std::env::remove_var("HTTPS_PROXY");
    }

    #[test]
    #[serial]
    fn net_config_falls_back_to_settings() {
        std::env::remove_var("HTTPS_PROXY");
        let net = NetConfig::detect("http://file-proxy:3128");
        assert_eq!(net.proxy.as_deref(), Some("http://file-proxy:3128"));
        let none = NetConfig::detect("   ");
        assert!(none.proxy.is_none());
    }
}
