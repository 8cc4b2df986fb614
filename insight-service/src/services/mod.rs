pub mod artifact_store;
pub mod metrics;
pub mod storage;

pub use artifact_store::{ArtifactStore, StoreConfig, StoreError};
pub use metrics::{get_metrics, init_metrics};
pub use storage::{LocalStorage, MemoryStorage, Storage};
