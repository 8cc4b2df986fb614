use crate::backends::{BackendError, Capability};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    Healthy,
    Degraded,
    Unreachable,
}

/// Last observed outcome of one capability.
#[derive(Debug, Clone, Serialize)]
pub struct HealthRecord {
    pub status: BackendStatus,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self {
            status: BackendStatus::Healthy,
            consecutive_failures: 0,
            last_error: None,
            last_checked: None,
        }
    }
}

/// Passive health tracking, fed by real calls. Reading it never contacts a
/// backend.
pub struct HealthBoard {
    records: DashMap<Capability, HealthRecord>,
    unreachable_after: u32,
}

impl HealthBoard {
    pub fn new(unreachable_after: u32) -> Self {
        let records = DashMap::new();
        for capability in Capability::ALL {
            records.insert(capability, HealthRecord::default());
        }
        Self {
            records,
            unreachable_after: unreachable_after.max(1),
        }
    }

    pub fn record_success(&self, capability: Capability) {
        let mut record = self.records.entry(capability).or_default();
        record.status = BackendStatus::Healthy;
        record.consecutive_failures = 0;
        record.last_error = None;
        record.last_checked = Some(Utc::now());
    }

    pub fn record_failure(&self, capability: Capability, error: &BackendError) {
        let mut record = self.records.entry(capability).or_default();
        record.last_checked = Some(Utc::now());
        record.last_error = Some(error.to_string());

        // A rejected input still proves the backend answered.
        if !error.is_transient() {
            record.status = BackendStatus::Healthy;
            record.consecutive_failures = 0;
            return;
        }

        record.consecutive_failures += 1;
        record.status = if record.consecutive_failures >= self.unreachable_after {
            BackendStatus::Unreachable
        } else {
            BackendStatus::Degraded
        };
    }

    pub fn status(&self, capability: Capability) -> BackendStatus {
        self.records
            .get(&capability)
            .map(|record| record.status)
            .unwrap_or(BackendStatus::Healthy)
    }

    pub fn snapshot(&self) -> BTreeMap<Capability, HealthRecord> {
        self.records
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Healthy only when every capability is healthy.
    pub fn overall(&self) -> BackendStatus {
        if self
            .records
            .iter()
            .all(|entry| entry.status == BackendStatus::Healthy)
        {
            BackendStatus::Healthy
        } else {
            BackendStatus::Degraded
        }
    }
}
