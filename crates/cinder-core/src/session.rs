use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cinder_protocol::{JobId, ProfileName, RealmId};
use tracing::debug;

use crate::error::ConsoleError;
use crate::stores::{NetConfig, RealmDirectory, SessionClients, SessionFactory};

/// Live connection bundle for one credential profile. Exclusively owned by
/// that profile's context slot; replaced wholesale on switch or failure and
/// never shared across profiles.
pub struct Session {
    profile: ProfileName,
    /// Monotonic resolve generation; distinguishes reconnects of the same
    /// profile (job-list cache keys include it).
    generation: u64,
    clients: SessionClients,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("profile", &self.profile)
            .field("generation", &self.generation)
            .finish()
    }
}

impl Session {
    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn jobs(&self) -> &Arc<dyn crate::stores::JobStore> {
        &self.clients.jobs
    }

    pub fn events(&self) -> &Arc<dyn crate::stores::EventStore> {
        &self.clients.events
    }

    pub fn blobs(&self) -> &Arc<dyn crate::stores::BlobStore> {
        &self.clients.blobs
    }

    pub fn realms(&self) -> &Arc<dyn crate::stores::RealmDirectory> {
        &self.clients.realms
    }

    pub fn dispatch(&self) -> &Arc<dyn crate::stores::DispatchApi> {
        &self.clients.dispatch
    }
}

/// Per-(profile, realm) bookmark: where the operator left off. Survives
/// realm switches within the profile and is restored verbatim on revisit.
#[derive(Debug, Clone, Default)]
pub struct RealmContext {
    pub last_search: String,
    pub last_selected_job: Option<JobId>,
}

/// Per-profile state, created lazily on first use and held for the life of
/// the process. Only the session slot is ever torn down.
#[derive(Default)]
pub struct ProfileContext {
    pub last_realm: Option<RealmId>,
    pub realms: HashMap<RealmId, RealmContext>,
    pub session: Option<Arc<Session>>,
}

impl ProfileContext {
    pub fn realm_context(&mut self, realm: &str) -> &mut RealmContext {
        self.realms.entry(realm.to_string()).or_default()
    }
}

/// Resolves a named credential profile to a usable [`Session`].
pub struct SessionRegistry {
    factory: Arc<dyn SessionFactory>,
    net: NetConfig,
    generation: AtomicU64,
}

impl SessionRegistry {
    pub fn new(factory: Arc<dyn SessionFactory>, net: NetConfig) -> Self {
        Self {
            factory,
            net,
            generation: AtomicU64::new(0),
        }
    }

    pub fn net(&self) -> &NetConfig {
        &self.net
    }

    pub async fn available_profiles(&self) -> crate::error::Result<Vec<ProfileName>> {
        Ok(self.factory.available_profiles().await?)
    }

    /// Resolve `profile`, reusing `cached` clients when a prior visit left
    /// a session behind. The realm-directory probe is mandatory either way:
    /// an identity that cannot enumerate the control-plane root is not a
    /// usable session, and the half-built one is discarded rather than
    /// returned.
    pub async fn resolve(
        &self,
        profile: &str,
        cached: Option<Arc<Session>>,
    ) -> Result<Arc<Session>, ConsoleError> {
        let session = match cached {
            Some(existing) => {
                debug!(profile, "reusing cached session clients");
                existing
            }
            None => {
                let clients = self
                    .factory
                    .connect(profile, &self.net)
                    .await
                    .map_err(|err| ConsoleError::Access(err.to_string()))?;
                Arc::new(Session {
                    profile: profile.to_string(),
                    generation: self.generation.fetch_add(1, Ordering::Relaxed) + 1,
                    clients,
                })
            }
        };

        if let Err(err) = session.realms().probe().await {
            return Err(ConsoleError::Access(format!(
                "profile '{profile}' cannot reach the realm directory: {err}"
            )));
        }
        debug!(profile, generation = session.generation, "session resolved");
        Ok(session)
    }
}
