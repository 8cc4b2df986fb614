//! Concurrent session map with per-session exclusion.
//!
//! The map itself is sharded (`DashMap`) and only ever locked for lookups.
//! Mutation of a session goes through [`SessionRegistry::with_session`],
//! which holds that one session's async mutex for the duration of the
//! mutator. Close, eviction and the sweeper never wait for that mutex: they
//! unlink the session and flag it closed, and a flagged session refuses any
//! further cache writes.

use crate::models::{
    AnalysisProfile, AnalysisResult, ArtifactRef, Navigation, SessionId, SessionView, SpeechClip,
    UnitSource, UnitVersion,
};
use crate::services::ArtifactStore;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Session {0} not found")]
    NotFound(SessionId),

    #[error("Session {0} has expired")]
    Expired(SessionId),

    #[error("Session {0} is busy with another request")]
    Busy(SessionId),

    #[error("Session registry is full ({max} sessions)")]
    CapacityExceeded { max: usize },

    #[error("A session needs at least one unit")]
    NoUnits,
}

/// What to do when a session is already being mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyPolicy {
    FailFast,
    Wait(Duration),
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub ttl: Duration,
    pub capacity: usize,
    pub busy_policy: BusyPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            capacity: 1000,
            busy_policy: BusyPolicy::FailFast,
        }
    }
}

pub struct NewSession {
    pub artifact: ArtifactRef,
    pub profile: AnalysisProfile,
    pub language: String,
    pub units: Vec<UnitSource>,
}

#[derive(Default)]
struct SessionState {
    results: HashMap<UnitVersion, Arc<AnalysisResult>>,
    /// Latest version per unit; absent means version 0.
    versions: HashMap<usize, u32>,
    speech: HashMap<UnitVersion, Arc<SpeechClip>>,
}

struct SessionEntry {
    id: SessionId,
    artifact: ArtifactRef,
    profile: AnalysisProfile,
    language: String,
    units: Vec<UnitSource>,
    created_at: DateTime<Utc>,
    /// Milliseconds since the registry epoch, for TTL.
    touched_at_ms: AtomicU64,
    /// Registry-wide access sequence, for LRU ordering.
    touched_seq: AtomicU64,
    cursor: AtomicUsize,
    closed: AtomicBool,
    state: Arc<Mutex<SessionState>>,
}

impl SessionEntry {
    fn unit_count(&self) -> usize {
        self.units.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Removal {
    Closed,
    Evicted,
    Expired,
}

impl Removal {
    fn as_str(self) -> &'static str {
        match self {
            Removal::Closed => "closed",
            Removal::Evicted => "evicted",
            Removal::Expired => "expired",
        }
    }
}

pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<SessionEntry>>,
    store: Arc<ArtifactStore>,
    config: RegistryConfig,
    epoch: Instant,
    epoch_wall: DateTime<Utc>,
    sequence: AtomicU64,
    /// Serializes the capacity check and insert of `create`.
    admission: Mutex<()>,
}

impl SessionRegistry {
    pub fn new(store: Arc<ArtifactStore>, config: RegistryConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            store,
            config,
            epoch: Instant::now(),
            epoch_wall: Utc::now(),
            sequence: AtomicU64::new(0),
            admission: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Registers a session over a staged artifact. At capacity the least
    /// recently accessed session is evicted first.
    pub async fn create(&self, session: NewSession) -> Result<SessionId, RegistryError> {
        if session.units.is_empty() {
            return Err(RegistryError::NoUnits);
        }
        if self.config.capacity == 0 {
            return Err(RegistryError::CapacityExceeded { max: 0 });
        }

        let _admission = self.admission.lock().await;

        while self.sessions.len() >= self.config.capacity {
            match self.least_recently_used() {
                Some(victim) => {
                    tracing::info!(session_id = %victim, "Evicting least recently used session");
                    self.remove(&victim, Removal::Evicted).await;
                }
                None => {
                    return Err(RegistryError::CapacityExceeded {
                        max: self.config.capacity,
                    })
                }
            }
        }

        let id = SessionId::generate();
        let entry = Arc::new(SessionEntry {
            id: id.clone(),
            artifact: session.artifact,
            profile: session.profile,
            language: session.language,
            units: session.units,
            created_at: Utc::now(),
            touched_at_ms: AtomicU64::new(0),
            touched_seq: AtomicU64::new(0),
            cursor: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            state: Arc::new(Mutex::new(SessionState::default())),
        });
        self.touch(&entry);
        self.sessions.insert(id.clone(), entry);

        metrics::counter!("sessions_created_total").increment(1);
        metrics::gauge!("sessions_active").set(self.sessions.len() as f64);

        Ok(id)
    }

    /// Snapshot of a session. Counts as an access.
    pub fn get(&self, id: &SessionId) -> Result<SessionView, RegistryError> {
        let entry = self.live_entry(id)?;
        self.touch(&entry);
        Ok(self.view_of(&entry))
    }

    /// Runs `mutator` with exclusive access to one session.
    pub async fn with_session<F, Fut, T>(&self, id: &SessionId, mutator: F) -> Result<T, RegistryError>
    where
        F: FnOnce(SessionGuard) -> Fut,
        Fut: Future<Output = T>,
    {
        let entry = self.live_entry(id)?;

        let state = match self.config.busy_policy {
            BusyPolicy::FailFast => entry
                .state
                .clone()
                .try_lock_owned()
                .map_err(|_| RegistryError::Busy(id.clone()))?,
            BusyPolicy::Wait(bound) => {
                tokio::time::timeout(bound, entry.state.clone().lock_owned())
                    .await
                    .map_err(|_| RegistryError::Busy(id.clone()))?
            }
        };

        // Closed or evicted while we were waiting for the lock.
        if entry.closed.load(Ordering::SeqCst) {
            return Err(RegistryError::NotFound(id.clone()));
        }
        self.touch(&entry);

        let guard = SessionGuard {
            entry,
            state,
            epoch_wall: self.epoch_wall,
        };
        Ok(mutator(guard).await)
    }

    /// Removes a session and releases its artifact.
    pub async fn close(&self, id: &SessionId) -> Result<(), RegistryError> {
        if self.remove(id, Removal::Closed).await {
            Ok(())
        } else {
            Err(RegistryError::NotFound(id.clone()))
        }
    }

    /// Removes every session idle for longer than the TTL. Sessions under
    /// mutation are skipped; they are by definition being accessed.
    pub async fn sweep_expired(&self) -> usize {
        let candidates: Vec<Arc<SessionEntry>> = self
            .sessions
            .iter()
            .filter(|entry| self.is_expired(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        let mut removed = 0;
        for entry in candidates {
            let Ok(_claim) = entry.state.try_lock() else {
                continue;
            };
            let unlinked = self
                .sessions
                .remove_if(&entry.id, |_, current| {
                    Arc::ptr_eq(current, &entry) && self.is_expired(current)
                })
                .is_some();
            if unlinked {
                tracing::info!(session_id = %entry.id, "Session expired");
                self.finish_removal(&entry, Removal::Expired).await;
                removed += 1;
            }
        }
        removed
    }

    fn live_entry(&self, id: &SessionId) -> Result<Arc<SessionEntry>, RegistryError> {
        let entry = self
            .sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        if self.is_expired(&entry) {
            return Err(RegistryError::Expired(id.clone()));
        }
        Ok(entry)
    }

    fn least_recently_used(&self) -> Option<SessionId> {
        self.sessions
            .iter()
            .min_by_key(|entry| entry.touched_seq.load(Ordering::SeqCst))
            .map(|entry| entry.key().clone())
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn touch(&self, entry: &SessionEntry) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        entry.touched_seq.store(seq, Ordering::SeqCst);
        entry.touched_at_ms.store(self.now_ms(), Ordering::SeqCst);
    }

    fn is_expired(&self, entry: &SessionEntry) -> bool {
        let idle = self
            .now_ms()
            .saturating_sub(entry.touched_at_ms.load(Ordering::SeqCst));
        idle > self.config.ttl.as_millis() as u64
    }

    fn view_of(&self, entry: &SessionEntry) -> SessionView {
        view(entry, self.epoch_wall)
    }

    async fn remove(&self, id: &SessionId, reason: Removal) -> bool {
        match self.sessions.remove(id) {
            Some((_, entry)) => {
                self.finish_removal(&entry, reason).await;
                true
            }
            None => false,
        }
    }

    async fn finish_removal(&self, entry: &SessionEntry, reason: Removal) {
        entry.closed.store(true, Ordering::SeqCst);
        self.store.release(&entry.artifact).await;

        tracing::info!(
            session_id = %entry.id,
            artifact_id = %entry.artifact.id,
            reason = reason.as_str(),
            "Session removed"
        );
        metrics::counter!("sessions_closed_total", "reason" => reason.as_str()).increment(1);
        metrics::gauge!("sessions_active").set(self.sessions.len() as f64);
    }
}

fn view(entry: &SessionEntry, epoch_wall: DateTime<Utc>) -> SessionView {
    let touched = entry.touched_at_ms.load(Ordering::SeqCst);
    SessionView {
        session_id: entry.id.clone(),
        artifact_id: entry.artifact.id,
        kind: entry.artifact.kind,
        profile: entry.profile,
        language: entry.language.clone(),
        unit_count: entry.unit_count(),
        cursor: entry.cursor.load(Ordering::SeqCst),
        created_at: entry.created_at,
        last_accessed_at: epoch_wall + chrono::Duration::milliseconds(touched as i64),
    }
}

/// Exclusive handle on one session, alive for the duration of a mutator.
pub struct SessionGuard {
    entry: Arc<SessionEntry>,
    state: OwnedMutexGuard<SessionState>,
    epoch_wall: DateTime<Utc>,
}

impl SessionGuard {
    pub fn id(&self) -> &SessionId {
        &self.entry.id
    }

    pub fn artifact(&self) -> &ArtifactRef {
        &self.entry.artifact
    }

    pub fn profile(&self) -> AnalysisProfile {
        self.entry.profile
    }

    pub fn language(&self) -> &str {
        &self.entry.language
    }

    pub fn unit_count(&self) -> usize {
        self.entry.unit_count()
    }

    pub fn cursor(&self) -> usize {
        self.entry.cursor.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.entry.closed.load(Ordering::SeqCst)
    }

    pub fn unit(&self, index: usize) -> Option<&UnitSource> {
        self.entry.units.get(index)
    }

    /// The unit `navigation` lands on, clamped to the unit range. The
    /// cursor itself does not move until `set_cursor`.
    pub fn resolve(&self, navigation: Navigation) -> usize {
        navigation.resolve(self.cursor(), self.unit_count())
    }

    pub fn set_cursor(&mut self, index: usize) {
        let index = index.min(self.unit_count().saturating_sub(1));
        self.entry.cursor.store(index, Ordering::SeqCst);
    }

    pub fn current_version(&self, unit: usize) -> u32 {
        self.state.versions.get(&unit).copied().unwrap_or(0)
    }

    pub fn cached(&self, key: UnitVersion) -> Option<Arc<AnalysisResult>> {
        self.state.results.get(&key).cloned()
    }

    /// Stores a result. An existing entry under the same key is kept and
    /// returned instead; entries are never overwritten.
    pub fn record(&mut self, result: AnalysisResult) -> Result<Arc<AnalysisResult>, RegistryError> {
        if self.is_closed() {
            return Err(RegistryError::NotFound(self.entry.id.clone()));
        }

        let key = result.key();
        if let Some(existing) = self.state.results.get(&key) {
            return Ok(existing.clone());
        }

        let result = Arc::new(result);
        self.state.results.insert(key, result.clone());
        let latest = self.state.versions.entry(key.unit).or_insert(0);
        *latest = (*latest).max(key.version);
        Ok(result)
    }

    pub fn cached_speech(&self, key: UnitVersion) -> Option<Arc<SpeechClip>> {
        self.state.speech.get(&key).cloned()
    }

    pub fn record_speech(
        &mut self,
        key: UnitVersion,
        clip: SpeechClip,
    ) -> Result<Arc<SpeechClip>, RegistryError> {
        if self.is_closed() {
            return Err(RegistryError::NotFound(self.entry.id.clone()));
        }
        let clip = self
            .state
            .speech
            .entry(key)
            .or_insert_with(|| Arc::new(clip))
            .clone();
        Ok(clip)
    }

    pub fn view(&self) -> SessionView {
        view(&self.entry, self.epoch_wall)
    }
}
