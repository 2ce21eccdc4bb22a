//! Property tests for the invariants named in SPEC_FULL §8 (P1, P3, P4, P5).
//! P2 and P6 are whole-system convergence properties and are exercised as
//! end-to-end scenarios in `tests/scenarios.rs` instead, since they require
//! an agent and a control service actually talking to each other.

use std::collections::BTreeSet;

use proptest::prelude::*;
use uuid::Uuid;

use flocker::backend::memory::MemoryBackend;
use flocker::backend::VolumeBackend;
use flocker::model::{Configuration, Dataset, DatasetId, Lease, NodeId};
use flocker::store::ConfigurationStore;

#[derive(Debug, Clone)]
enum Op {
    Create { dataset: usize, node: usize, name: String },
    Move { dataset: usize, node: usize },
    UpdateSize { dataset: usize, size: u64 },
    Delete { dataset: usize },
    AcquireLease { dataset: usize, node: usize },
    ReleaseLease { dataset: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..4, 0usize..3, "[a-z]{3,8}").prop_map(|(dataset, node, name)| Op::Create { dataset, node, name }),
        (0usize..4, 0usize..3).prop_map(|(dataset, node)| Op::Move { dataset, node }),
        (0usize..4, 0u64..4096).prop_map(|(dataset, size)| Op::UpdateSize { dataset, size }),
        (0usize..4).prop_map(|dataset| Op::Delete { dataset }),
        (0usize..4, 0usize..3).prop_map(|(dataset, node)| Op::AcquireLease { dataset, node }),
        (0usize..4).prop_map(|dataset| Op::ReleaseLease { dataset }),
    ]
}

proptest! {
    /// P1: any sequence of successful REST operations leaves the store's tag
    /// strictly greater than every tag observed before it. Modeled directly
    /// against `Configuration`'s mutators plus `ConfigurationStore::set_if_matches`,
    /// since the REST handlers are thin wrappers around exactly this pair.
    #[test]
    fn p1_tag_is_monotonically_increasing_across_any_operation_sequence(
        ops in prop::collection::vec(op_strategy(), 0..40)
    ) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigurationStore::open(dir.path().join("configuration.json")).unwrap();
        let dataset_ids: Vec<DatasetId> = (0..4).map(|_| DatasetId::new()).collect();
        let node_ids: Vec<NodeId> = (0..3).map(|_| NodeId::new()).collect();
        let mut last_tag = store.tag();

        for op in ops {
            let mut configuration = store.get();
            let expected_tag = configuration.tag;

            match op {
                Op::Create { dataset, node, name } => {
                    let mut new_dataset = Dataset::new(dataset_ids[dataset]);
                    new_dataset.metadata.insert("name".to_string(), name);
                    let _ = configuration.create_dataset(node_ids[node], new_dataset);
                }
                Op::Move { dataset, node } => {
                    let _ = configuration.move_primary(dataset_ids[dataset], node_ids[node], chrono::Utc::now());
                }
                Op::UpdateSize { dataset, size } => {
                    configuration.update_dataset(dataset_ids[dataset], |d| d.maximum_size = Some(size));
                }
                Op::Delete { dataset } => {
                    let _ = configuration.mark_deleted(dataset_ids[dataset], chrono::Utc::now());
                }
                Op::AcquireLease { dataset, node } => {
                    configuration.acquire_lease(Lease {
                        dataset_id: dataset_ids[dataset],
                        node_uuid: node_ids[node],
                        expiration: None,
                    });
                }
                Op::ReleaseLease { dataset } => {
                    configuration.release_lease(dataset_ids[dataset]);
                }
            }

            if configuration.tag == expected_tag {
                continue;
            }

            let new_tag = store.set_if_matches(expected_tag, configuration).unwrap();
            prop_assert!(new_tag > last_tag);
            last_tag = new_tag;
        }
    }

    /// P3: for every `dataset_id` ever created, `list_volumes()` contains at
    /// most one volume with that id, regardless of how many times creation is
    /// retried for it.
    #[test]
    fn p3_repeated_create_volume_never_produces_a_second_volume(
        sizes in prop::collection::vec(1u64..4096, 1..10)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (distinct_blockdevices, matching_volumes) = rt.block_on(async {
            let backend = MemoryBackend::new(Uuid::new_v4(), "i-p3");
            let dataset_id = DatasetId::new();
            let mut blockdevice_ids = BTreeSet::new();
            for size in sizes {
                let volume = backend.create_volume(dataset_id, size).await.unwrap();
                blockdevice_ids.insert(volume.blockdevice_id);
            }
            let volumes = backend.list_volumes().await.unwrap();
            let matching = volumes.iter().filter(|v| v.dataset_id == dataset_id).count();
            (blockdevice_ids.len(), matching)
        });

        prop_assert_eq!(distinct_blockdevices, 1);
        prop_assert_eq!(matching_volumes, 1);
    }

    /// P4: a dataset under an unexpired lease for `(d, n)` never has its
    /// primary moved away from `n`, nor is it deleted, regardless of whether
    /// a caller attempts either.
    #[test]
    fn p4_unexpired_lease_blocks_move_and_delete(
        attempt_move in any::<bool>(),
        attempt_delete in any::<bool>(),
    ) {
        let mut configuration = Configuration::empty();
        let holder = NodeId::new();
        let other = NodeId::new();
        let dataset = Dataset::new(DatasetId::new());
        let dataset_id = dataset.dataset_id;
        configuration.create_dataset(holder, dataset).unwrap();
        configuration.acquire_lease(Lease {
            dataset_id,
            node_uuid: holder,
            expiration: None,
        });

        if attempt_move {
            let _ = configuration.move_primary(dataset_id, other, chrono::Utc::now());
            prop_assert_eq!(configuration.primary_node_of(dataset_id), Some(holder));
        }
        if attempt_delete {
            let _ = configuration.mark_deleted(dataset_id, chrono::Utc::now());
            prop_assert!(!configuration.nodes[&holder].manifestations[&dataset_id].dataset.deleted);
        }
    }

    /// P5: a conditional update carrying tag `t` succeeds exactly when the
    /// store's current tag is `t`, regardless of how many unrelated writes
    /// happened first.
    #[test]
    fn p5_conditional_update_succeeds_only_when_tag_matches(extra_writes in 0usize..5) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigurationStore::open(dir.path().join("configuration.json")).unwrap();

        for _ in 0..extra_writes {
            let mut configuration = store.get();
            let expected = configuration.tag;
            configuration.create_dataset(NodeId::new(), Dataset::new(DatasetId::new())).unwrap();
            store.set_if_matches(expected, configuration).unwrap();
        }

        let captured_tag = store.tag();
        let mut stale_configuration = store.get();
        stale_configuration.create_dataset(NodeId::new(), Dataset::new(DatasetId::new())).unwrap();

        store.set_if_matches(captured_tag, stale_configuration.clone()).unwrap();
        prop_assert_ne!(store.tag(), captured_tag);

        // `captured_tag` is now stale: the same write submitted again must fail.
        prop_assert!(store.set_if_matches(captured_tag, stale_configuration).is_err());

        // the store's actual current tag always succeeds.
        let mut fresh_configuration = store.get();
        let current = fresh_configuration.tag;
        fresh_configuration.create_dataset(NodeId::new(), Dataset::new(DatasetId::new())).unwrap();
        prop_assert!(store.set_if_matches(current, fresh_configuration).is_ok());
    }
}
