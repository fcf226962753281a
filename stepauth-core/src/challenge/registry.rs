// stepauth-core/src/challenge/registry.rs

use std::sync::Arc;
use dashmap::DashMap;
use tracing::info;

use crate::challenge::{BackendFactory, ChallengeOrchestrator};
use crate::config::ClientConfig;
use crate::models::SessionKey;
use crate::Error;

/// Name -> orchestrator cache, owned by whoever composes the application.
///
/// Entries are created on first lookup and live until [`teardown`](Self::teardown).
pub struct SessionRegistry {
    config: ClientConfig,
    factory: Arc<dyn BackendFactory>,
    sessions: DashMap<SessionKey, Arc<ChallengeOrchestrator>>,
}

impl SessionRegistry {
    pub fn new(config: ClientConfig, factory: Arc<dyn BackendFactory>) -> Self {
        Self {
            config,
            factory,
            sessions: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the orchestrator for `name`, building it on first use.
    /// `None` is the default session, which never collides with a name.
    pub fn lookup_or_create(&self, name: Option<&str>) -> Result<Arc<ChallengeOrchestrator>, Error> {
        if name.is_some_and(|n| n.trim().is_empty()) {
            return Err(Error::Config("session name must not be empty".into()));
        }
        let key = SessionKey::from_name(name);

        if let Some(existing) = self.sessions.get(&key) {
            return Ok(Arc::clone(existing.value()));
        }

        // The entry lock is held while the backend is built, so two first-time
        // lookups of the same name cannot both construct one.
        let entry = self
            .sessions
            .entry(key.clone())
            .or_try_insert_with(|| -> Result<Arc<ChallengeOrchestrator>, Error> {
                let binding = self.config.binding_for(&key);
                info!(session = %key, client_key = %binding.client_key, "creating session orchestrator");
                let backend = self.factory.create(&binding)?;
                Ok(Arc::new(ChallengeOrchestrator::new(key.clone(), backend)))
            })?;
        Ok(Arc::clone(entry.value()))
    }

    pub fn get(&self, name: Option<&str>) -> Option<Arc<ChallengeOrchestrator>> {
        self.sessions
            .get(&SessionKey::from_name(name))
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Names of all named sessions, sorted. The default session is not listed.
    pub fn session_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sessions
            .iter()
            .filter_map(|entry| entry.key().name().map(str::to_string))
            .collect();
        names.sort();
        names
    }

    /// Drops every cached orchestrator. Returns how many there were.
    pub fn teardown(&self) -> usize {
        let count = self.sessions.len();
        self.sessions.clear();
        info!(count, "session registry torn down");
        count
    }
}
