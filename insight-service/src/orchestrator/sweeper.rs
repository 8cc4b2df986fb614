use crate::services::ArtifactStore;
use crate::sessions::SessionRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Periodically reclaims idle sessions and expired artifacts until the
/// token is cancelled.
pub fn spawn_sweeper(
    registry: Arc<SessionRegistry>,
    store: Arc<ArtifactStore>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let sessions = registry.sweep_expired().await;
                    let artifacts = store.sweep_expired().await;
                    if sessions > 0 || artifacts > 0 {
                        tracing::info!(sessions, artifacts, "Sweep reclaimed expired state");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisProfile, UnitSource};
    use crate::services::{MemoryStorage, StoreConfig};
    use crate::sessions::{NewSession, RegistryConfig};

    #[tokio::test]
    async fn sweeps_on_interval_and_stops_on_cancel() {
        let store = Arc::new(ArtifactStore::new(
            Arc::new(MemoryStorage::new()),
            StoreConfig::default(),
        ));
        let registry = Arc::new(SessionRegistry::new(
            store.clone(),
            RegistryConfig {
                ttl: Duration::from_millis(20),
                ..Default::default()
            },
        ));
        let artifact = store.put(b"img".to_vec(), "image/png").await.unwrap();
        let id = registry
            .create(NewSession {
                artifact,
                profile: AnalysisProfile::Form,
                language: "en".into(),
                units: vec![UnitSource::Artifact],
            })
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let handle = spawn_sweeper(
            registry.clone(),
            store.clone(),
            Duration::from_millis(10),
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(registry.get(&id).is_err());
        assert!(registry.is_empty());
        assert_eq!(store.staged_count(), 0);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
