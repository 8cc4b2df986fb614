use crate::orchestrator::OrchestratorError;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting gate over workflows that call backends. Saturation is reported
/// immediately instead of queueing.
#[derive(Clone)]
pub struct AdmissionGate {
    permits: Arc<Semaphore>,
    limit: usize,
}

/// Held for the lifetime of one admitted workflow.
pub struct Admission {
    _permit: OwnedSemaphorePermit,
}

impl Drop for Admission {
    fn drop(&mut self) {
        metrics::gauge!("backend_calls_in_flight").decrement(1.0);
    }
}

impl AdmissionGate {
    pub fn new(limit: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn try_admit(&self) -> Result<Admission, OrchestratorError> {
        match self.permits.clone().try_acquire_owned() {
            Ok(permit) => {
                metrics::gauge!("backend_calls_in_flight").increment(1.0);
                Ok(Admission { _permit: permit })
            }
            Err(_) => {
                metrics::counter!("admission_rejected_total").increment(1);
                tracing::warn!(limit = self.limit, "Admission gate saturated");
                Err(OrchestratorError::Overloaded { limit: self.limit })
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.limit - self.permits.available_permits()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_when_saturated_and_recovers_on_release() {
        let gate = AdmissionGate::new(2);
        let first = gate.try_admit().unwrap();
        let _second = gate.try_admit().unwrap();
        assert_eq!(gate.in_flight(), 2);

        assert!(matches!(
            gate.try_admit(),
            Err(OrchestratorError::Overloaded { limit: 2 })
        ));

        drop(first);
        assert_eq!(gate.in_flight(), 1);
        assert!(gate.try_admit().is_ok());
    }
}
