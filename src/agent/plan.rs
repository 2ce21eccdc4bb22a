//! Action plans: an explicit enum plus per-action `Result`, replacing
//! exception-driven control flow. `failure_counter` is carried in the loop's
//! per-tick state so a dataset that keeps failing to converge doesn't get
//! retried in a tight spin — each failure widens the next retry's delay.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::backend::BackendError;
use crate::model::DatasetId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    CreateThenAttach { dataset_id: DatasetId, size: u64 },
    Attach { dataset_id: DatasetId, blockdevice_id: String },
    MountFilesystem { dataset_id: DatasetId, device: PathBuf },
    Unmount { dataset_id: DatasetId },
    Detach { dataset_id: DatasetId, blockdevice_id: String },
    Destroy { dataset_id: DatasetId, blockdevice_id: String },
}

impl Action {
    pub fn dataset_id(&self) -> DatasetId {
        match self {
            Action::CreateThenAttach { dataset_id, .. }
            | Action::Attach { dataset_id, .. }
            | Action::MountFilesystem { dataset_id, .. }
            | Action::Unmount { dataset_id }
            | Action::Detach { dataset_id, .. }
            | Action::Destroy { dataset_id, .. } => *dataset_id,
        }
    }
}

#[derive(Debug)]
pub struct ActionOutcome {
    pub action: Action,
    pub result: Result<(), BackendError>,
}

/// A tick's worth of actions, computed by diffing desired against observed
/// state. Actions within a plan are independent of each other's success —
/// one failing never blocks the rest from being attempted this tick.
#[derive(Debug, Default)]
pub struct ActionPlan {
    pub actions: Vec<Action>,
}

impl ActionPlan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Tracks consecutive failures per dataset across ticks. A dataset's counter
/// resets the moment one of its actions succeeds.
#[derive(Debug, Default)]
pub struct FailureCounter {
    counts: HashMap<DatasetId, u32>,
}

impl FailureCounter {
    pub fn record(&mut self, outcome: &ActionOutcome) {
        let dataset_id = outcome.action.dataset_id();
        match &outcome.result {
            Ok(()) => {
                self.counts.remove(&dataset_id);
            }
            Err(_) => {
                *self.counts.entry(dataset_id).or_insert(0) += 1;
            }
        }
    }

    pub fn failures_for(&self, dataset_id: DatasetId) -> u32 {
        self.counts.get(&dataset_id).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_counter_resets_on_success() {
        let mut counter = FailureCounter::default();
        let dataset_id = DatasetId::new();
        let action = Action::Attach { dataset_id, blockdevice_id: "bd-1".to_string() };

        counter.record(&ActionOutcome {
            action: action.clone(),
            result: Err(BackendError::Timeout(dataset_id)),
        });
        counter.record(&ActionOutcome {
            action: action.clone(),
            result: Err(BackendError::Timeout(dataset_id)),
        });
        assert_eq!(counter.failures_for(dataset_id), 2);

        counter.record(&ActionOutcome {
            action,
            result: Ok(()),
        });
        assert_eq!(counter.failures_for(dataset_id), 0);
    }
}
