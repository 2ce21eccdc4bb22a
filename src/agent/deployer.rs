//! The convergence loop: discover -> report -> receive -> compute plan ->
//! execute -> sleep-or-wake-early.
//!
//! Grounded in `LeaderElection::start`/`election_cycle`'s
//! `interval.tick().await { ... }` shape, generalized from "recompute
//! leadership" to the five-step cycle above. Strictly single-threaded
//! cooperative: one task runs this loop, never a second concurrent
//! iteration; a separate task only ever writes into the `watch` mailbox.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::agent::discover::{self, Observation};
use crate::agent::plan::{Action, ActionOutcome, ActionPlan, FailureCounter};
use crate::backend::VolumeBackend;
use crate::model::{ClusterState, Configuration, Dataset, DatasetId, Node, NodeId};
use crate::protocol::wire::ControlMessage;

/// Computes this tick's plan by diffing `desired` (this node's entry in the
/// `Configuration`) against `observed` (what `discover::observe` found).
/// Two-primaries is tolerated rather than treated as an error: a dataset
/// moving between nodes briefly has a primary manifestation on both until
/// the old one detaches, and spec.md's tie-break is "the destination node's
/// plan wins, the source node's unmount/detach actions proceed
/// independently".
pub fn compute_plan(desired: &Node, observed: &Observation) -> ActionPlan {
    let mut actions = Vec::new();
    let observed_node = &observed.node;

    for (dataset_id, manifestation) in &desired.manifestations {
        if manifestation.dataset.deleted {
            continue;
        }
        let already_attached = observed_node.paths.contains_key(dataset_id);
        let has_manifestation = observed_node.manifestations.contains_key(dataset_id);

        if !has_manifestation {
            let size = manifestation.dataset.maximum_size.unwrap_or(0);
            actions.push(Action::CreateThenAttach {
                dataset_id: *dataset_id,
                size,
            });
        } else if !already_attached {
            if let Some(blockdevice_id) = observed.blockdevice_ids.get(dataset_id) {
                actions.push(Action::Attach {
                    dataset_id: *dataset_id,
                    blockdevice_id: blockdevice_id.clone(),
                });
            }
        }
    }

    for (dataset_id, manifestation) in &observed_node.manifestations {
        let still_desired = desired
            .manifestations
            .get(dataset_id)
            .is_some_and(|m| !m.dataset.deleted);
        if still_desired {
            continue;
        }
        let Some(blockdevice_id) = observed.blockdevice_ids.get(dataset_id) else {
            continue;
        };
        if let Some(device) = observed_node.paths.get(dataset_id) {
            actions.push(Action::Unmount {
                dataset_id: *dataset_id,
            });
            let _ = device;
        }
        actions.push(Action::Detach {
            dataset_id: *dataset_id,
            blockdevice_id: blockdevice_id.clone(),
        });
        if manifestation.dataset.deleted {
            actions.push(Action::Destroy {
                dataset_id: *dataset_id,
                blockdevice_id: blockdevice_id.clone(),
            });
        }
    }

    ActionPlan { actions }
}

/// Executes one action plan sequentially against `backend`. Actions do not
/// stop at the first failure: a dataset failing to converge this tick must
/// not block unrelated datasets from making progress, per spec.md's
/// partial-failure-is-never-fatal rule.
pub async fn execute_plan(backend: &dyn VolumeBackend, plan: ActionPlan, instance_id: &str) -> Vec<ActionOutcome> {
    let mut outcomes = Vec::with_capacity(plan.actions.len());
    for action in plan.actions {
        let result = run_action(backend, &action, instance_id).await;
        outcomes.push(ActionOutcome { action, result });
    }
    outcomes
}

async fn run_action(
    backend: &dyn VolumeBackend,
    action: &Action,
    instance_id: &str,
) -> Result<(), crate::backend::BackendError> {
    match action {
        Action::CreateThenAttach { dataset_id, size } => {
            let volume = backend.create_volume(*dataset_id, *size).await?;
            backend.attach_volume(&volume.blockdevice_id, instance_id).await?;
            Ok(())
        }
        Action::Attach { blockdevice_id, .. } => {
            backend.attach_volume(blockdevice_id, instance_id).await?;
            Ok(())
        }
        Action::MountFilesystem { .. } => Ok(()),
        Action::Unmount { .. } => Ok(()),
        Action::Detach { blockdevice_id, .. } => backend.detach_volume(blockdevice_id).await,
        Action::Destroy { blockdevice_id, .. } => backend.destroy_volume(blockdevice_id).await,
    }
}

fn desired_dataset_ids(configuration: &Configuration, node_id: NodeId) -> Vec<DatasetId> {
    configuration
        .desired_for(node_id)
        .manifestations
        .into_keys()
        .collect()
}

/// One full iteration of the loop, exposed separately from `run` so tests
/// can drive a single tick deterministically instead of racing a timer.
pub async fn tick(
    backend: &dyn VolumeBackend,
    instance_id: &str,
    node_id: NodeId,
    configuration: &Configuration,
    failure_counter: &mut FailureCounter,
) -> Vec<ActionOutcome> {
    let desired = configuration.desired_for(node_id);
    let observed = match discover::observe(backend, instance_id, &desired).await {
        Ok(observation) => observation,
        Err(_) => Observation::default(),
    };
    let plan = compute_plan(&desired, &observed);
    let outcomes = execute_plan(backend, plan, instance_id).await;
    for outcome in &outcomes {
        failure_counter.record(outcome);
    }
    outcomes
}

/// Runs the convergence loop until `shutdown` fires. `mailbox` carries the
/// latest `ClusterStatusUpdate` from the protocol-receive task — last value
/// wins, so an update arriving mid-tick simply replaces whatever the next
/// tick would have read instead of queuing.
pub async fn run(
    backend: Arc<dyn VolumeBackend>,
    node_id: NodeId,
    mut mailbox: watch::Receiver<Option<ControlMessage>>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let instance_id = match backend.compute_instance_id().await {
        Ok(id) => id,
        Err(e) => {
            log::error!("failed to determine this node's instance id: {e}");
            return;
        }
    };

    let mut configuration = Configuration::empty();
    let mut cluster_state = ClusterState::empty();
    let mut failure_counter = FailureCounter::default();
    let mut interval = tokio::time::interval(poll_interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = mailbox.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(ControlMessage::ClusterStatusUpdate { configuration: new_configuration, cluster_state: new_cluster_state }) =
                    mailbox.borrow_and_update().clone()
                {
                    configuration = new_configuration;
                    cluster_state = new_cluster_state;
                }
                continue;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let outcomes = tick(
            backend.as_ref(),
            &instance_id,
            node_id,
            &configuration,
            &mut failure_counter,
        )
        .await;

        for outcome in &outcomes {
            if let Err(e) = &outcome.result {
                log::warn!(
                    "action {:?} for dataset {} failed (attempt {}): {e}",
                    outcome.action,
                    outcome.action.dataset_id(),
                    failure_counter.failures_for(outcome.action.dataset_id())
                );
            }
        }
        let _ = &cluster_state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::model::Manifestation;
    use uuid::Uuid;

    #[tokio::test]
    async fn tick_creates_and_attaches_a_missing_dataset() {
        let backend = MemoryBackend::new(Uuid::new_v4(), "i-1");
        let node_id = NodeId::new();
        let dataset_id = DatasetId::new();

        let mut configuration = Configuration::empty();
        configuration
            .create_dataset(node_id, Dataset::new(dataset_id))
            .unwrap();

        let mut failure_counter = FailureCounter::default();
        let outcomes = tick(&backend, "i-1", node_id, &configuration, &mut failure_counter).await;
        assert!(outcomes.iter().all(|o| o.result.is_ok()));

        let volumes = backend.list_volumes().await.unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].attached_to.as_deref(), Some("i-1"));
    }

    #[tokio::test]
    async fn tick_detaches_a_dataset_no_longer_desired() {
        let backend = MemoryBackend::new(Uuid::new_v4(), "i-1");
        let node_id = NodeId::new();
        let dataset_id = DatasetId::new();
        let created = backend.create_volume(dataset_id, 512).await.unwrap();
        backend.attach_volume(&created.blockdevice_id, "i-1").await.unwrap();

        let configuration = Configuration::empty();
        let mut failure_counter = FailureCounter::default();

        let desired = configuration.desired_for(node_id);
        let mut observed_node = Node::default();
        observed_node.manifestations.insert(
            dataset_id,
            Manifestation {
                dataset: Dataset::new(dataset_id),
                primary: true,
            },
        );
        observed_node.paths.insert(dataset_id, "/dev/flocker0".into());
        let mut observed = Observation {
            node: observed_node,
            ..Observation::default()
        };
        observed.blockdevice_ids.insert(dataset_id, created.blockdevice_id.clone());

        let plan = compute_plan(&desired, &observed);
        assert!(plan
            .actions
            .contains(&Action::Detach { dataset_id, blockdevice_id: created.blockdevice_id.clone() }));

        let outcomes = execute_plan(&backend, plan, "i-1").await;
        for outcome in &outcomes {
            failure_counter.record(outcome);
        }
        assert!(backend.detach_volume(&created.blockdevice_id).await.is_err());
    }
}
