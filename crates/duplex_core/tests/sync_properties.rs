//! Integration tests for the download/upload protocol, driven by hand on one thread.

mod common;

use std::sync::Arc;

use common::{applied_ids, new_log, CoreEvent, Node};
use duplex_core::{
    CommandBuffer, CoreObjectExt, CoreObjectId, CoreObjectManager, SyncConfig, SyncError,
};

fn manager() -> Arc<CoreObjectManager> {
    CoreObjectManager::new(SyncConfig::default())
}

/// Runs one download and its matching upload.
fn full_pass(manager: &CoreObjectManager) {
    let _ = manager.sync_download();
    let _ = manager.sync_upload();
}

#[test]
fn test_ids_strictly_increasing_and_never_reused() {
    let manager = manager();
    let log = new_log();

    let mut last = CoreObjectId::NONE;
    let mut nodes = Vec::new();
    for _ in 0..50 {
        let node = Node::new(&manager, &log);
        assert!(node.id() > last);
        last = node.id();
        nodes.push(node);
    }

    // Destroy half, then register more: fresh ids keep climbing.
    nodes.truncate(25);
    for _ in 0..25 {
        let node = Node::new(&manager, &log);
        assert!(node.id() > last);
        last = node.id();
        nodes.push(node);
    }
    assert_eq!(last, CoreObjectId::new(75));
    assert_eq!(manager.registered_count(), 50);
}

#[test]
fn test_dependency_graph_stays_symmetric() {
    let manager = manager();
    let log = new_log();
    let nodes: Vec<_> = (0..6).map(|_| Node::new(&manager, &log)).collect();

    nodes[5].depend_on(&[&nodes[0], &nodes[1], &nodes[2]]).unwrap();
    nodes[4].depend_on(&[&nodes[1]]).unwrap();
    nodes[3].depend_on(&[&nodes[1], &nodes[2]]).unwrap();
    assert!(manager.graph_is_consistent());

    // Replace one list: removed edges vanish from both sides.
    nodes[5].depend_on(&[&nodes[2], &nodes[3]]).unwrap();
    assert!(manager.graph_is_consistent());
    assert_eq!(
        manager.dependencies_of(nodes[5].id()),
        vec![nodes[2].id(), nodes[3].id()]
    );
    assert!(!manager.dependants_of(nodes[0].id()).contains(&nodes[5].id()));
    assert!(manager.dependants_of(nodes[3].id()).contains(&nodes[5].id()));

    for node in &nodes {
        for dep in manager.dependencies_of(node.id()) {
            assert!(manager.dependants_of(dep).contains(&node.id()));
        }
        for dependant in manager.dependants_of(node.id()) {
            assert!(manager.dependencies_of(dependant).contains(&node.id()));
        }
    }
}

#[test]
fn test_unregister_drops_all_edges() {
    let manager = manager();
    let log = new_log();
    let a = Node::new(&manager, &log);
    let b = Node::new(&manager, &log);
    let c = Node::new(&manager, &log);
    b.depend_on(&[&a]).unwrap();
    c.depend_on(&[&b]).unwrap();

    let b_id = b.id();
    drop(b);

    assert!(!manager.is_registered(b_id));
    assert!(manager.dependants_of(a.id()).is_empty());
    assert!(manager.dependencies_of(c.id()).is_empty());
    assert!(manager.graph_is_consistent());
}

#[test]
fn test_dependant_pulled_in_and_ordered_after_dependency() {
    let manager = manager();
    let log = new_log();
    let a = Node::new(&manager, &log);
    let b = Node::new(&manager, &log);
    assert_eq!(a.id(), CoreObjectId::new(1));
    assert_eq!(b.id(), CoreObjectId::new(2));
    b.depend_on(&[&a]).unwrap();

    full_pass(&manager);
    log.lock().clear();

    a.set(10);
    assert!(!b.is_core_dirty());

    let stats = manager.sync_download();
    assert_eq!(stats.objects_synced, 2);
    assert_eq!(stats.forced_dependants, 1);

    let report = manager.sync_upload().unwrap();
    assert_eq!(report.applied, 2);
    assert_eq!(applied_ids(&log), vec![a.id(), b.id()]);
}

#[test]
fn test_dependency_propagation_is_transitive() {
    let manager = manager();
    let log = new_log();
    let a = Node::new(&manager, &log);
    let b = Node::new(&manager, &log);
    let c = Node::new(&manager, &log);
    b.depend_on(&[&a]).unwrap();
    c.depend_on(&[&b]).unwrap();

    full_pass(&manager);
    log.lock().clear();

    a.set(1);
    let stats = manager.sync_download();
    assert_eq!(stats.forced_dependants, 2);
    let _ = manager.sync_upload();

    assert_eq!(applied_ids(&log), vec![a.id(), b.id(), c.id()]);
}

#[test]
fn test_dependencies_first_regardless_of_id_order() {
    let manager = manager();
    let log = new_log();
    // Registered in reverse, so every dependant has the smaller id.
    let top = Node::new(&manager, &log);
    let middle = Node::new(&manager, &log);
    let bottom = Node::new(&manager, &log);
    top.depend_on(&[&middle]).unwrap();
    middle.depend_on(&[&bottom]).unwrap();

    top.set(3);
    middle.set(2);
    bottom.set(1);
    full_pass(&manager);

    assert_eq!(applied_ids(&log), vec![bottom.id(), middle.id(), top.id()]);
}

#[test]
fn test_each_object_applied_once_per_pass() {
    let manager = manager();
    let log = new_log();
    let shared = Node::new(&manager, &log);
    let left = Node::new(&manager, &log);
    let right = Node::new(&manager, &log);
    let top = Node::new(&manager, &log);
    left.depend_on(&[&shared]).unwrap();
    right.depend_on(&[&shared]).unwrap();
    top.depend_on(&[&left, &right]).unwrap();

    full_pass(&manager);

    let ids = applied_ids(&log);
    assert_eq!(ids.len(), 4);
    let position = |id| ids.iter().position(|x| *x == id).unwrap();
    assert!(position(shared.id()) < position(left.id()));
    assert!(position(shared.id()) < position(right.id()));
    assert!(position(left.id()) < position(top.id()));
    assert!(position(right.id()) < position(top.id()));
}

#[test]
fn test_destroyed_dirty_object_flushed_once() {
    let manager = manager();
    let log = new_log();
    let a = Node::new(&manager, &log);
    let b = Node::new(&manager, &log);
    let c = Node::new(&manager, &log);
    assert_eq!(c.id(), CoreObjectId::new(3));
    full_pass(&manager);
    log.lock().clear();

    c.set(99);
    let c_id = c.id();
    let core = c.core_weak();
    drop(c);

    // Retained payload keeps the core side alive until upload.
    assert!(core.upgrade().is_some());
    assert!(manager.is_dirty(c_id));

    let stats = manager.sync_download();
    assert_eq!(stats.retained_flushed, 1);
    assert!(core.upgrade().is_some());

    let _ = manager.sync_upload();
    assert_eq!(*log.lock(), vec![(c_id, 99)]);
    assert!(core.upgrade().is_none());

    full_pass(&manager);
    assert_eq!(log.lock().len(), 1);
    drop((a, b));
}

#[test]
fn test_destroy_before_first_sync_still_flushes() {
    let manager = manager();
    let log = new_log();
    let node = Node::new(&manager, &log);
    node.set(5);
    let id = node.id();
    drop(node);

    full_pass(&manager);
    assert_eq!(*log.lock(), vec![(id, 5)]);
}

#[test]
fn test_stale_notify_does_not_replace_retained_delta() {
    let manager = manager();
    let log = new_log();
    let node = Node::new(&manager, &log);
    node.set(8);
    let id = node.id();
    drop(node);

    manager.notify_core_dirty(id);
    full_pass(&manager);
    assert_eq!(*log.lock(), vec![(id, 8)]);
}

#[test]
fn test_clean_destroy_does_not_flush() {
    let manager = manager();
    let log = new_log();
    let node = Node::new(&manager, &log);
    full_pass(&manager);
    log.lock().clear();

    drop(node);
    let stats = manager.sync_download();
    assert_eq!(stats.objects_synced, 0);
    assert_eq!(stats.retained_flushed, 0);
}

#[test]
fn test_batches_applied_in_production_order() {
    let manager = manager();
    let log = new_log();
    let node = Node::new(&manager, &log);

    for value in 1..=3 {
        node.set(value);
        let _ = manager.sync_download();
    }
    assert_eq!(manager.pending_batches(), 3);

    let mut sequences = Vec::new();
    while let Some(report) = manager.sync_upload() {
        sequences.push(report.sequence);
    }
    assert_eq!(sequences, vec![0, 1, 2]);
    let values: Vec<u64> = log.lock().iter().map(|(_, v)| *v).collect();
    assert_eq!(values, vec![1, 2, 3]);
    assert_eq!(node.core_value(), 3);
}

#[test]
fn test_second_pass_without_mutation_is_empty() {
    let manager = manager();
    let log = new_log();
    let a = Node::new(&manager, &log);
    let b = Node::new(&manager, &log);
    b.depend_on(&[&a]).unwrap();

    let first = manager.sync_download();
    let _ = manager.sync_upload();
    assert_eq!(first.objects_synced, 2);

    let second = manager.sync_download();
    assert_eq!(second.objects_synced, 0);
    assert_eq!(second.bytes, 0);
    let report = manager.sync_upload().unwrap();
    assert_eq!(report.applied, 0);
    assert!(!a.is_core_dirty());
    assert!(!b.is_core_dirty());
}

#[test]
fn test_repeated_mark_is_idempotent() {
    let manager = manager();
    let log = new_log();
    let node = Node::new(&manager, &log);
    full_pass(&manager);
    log.lock().clear();

    for value in 0..10 {
        node.set(value);
    }
    assert_eq!(manager.dirty_count(), 1);
    full_pass(&manager);
    assert_eq!(*log.lock(), vec![(node.id(), 9)]);
}

#[test]
fn test_unregistered_object_does_not_notify() {
    let manager = manager();
    let log = new_log();
    let node = Node::unregistered(&manager, &log);
    node.set(1);

    assert!(node.is_core_dirty());
    assert_eq!(manager.dirty_count(), 0);
    assert_eq!(
        node.depend_on(&[]),
        Err(SyncError::NotRegistered(CoreObjectId::NONE))
    );
}

#[test]
fn test_cycle_rejected_and_graph_unchanged() {
    let manager = manager();
    let log = new_log();
    let a = Node::new(&manager, &log);
    let b = Node::new(&manager, &log);
    let c = Node::new(&manager, &log);
    b.depend_on(&[&a]).unwrap();
    c.depend_on(&[&b]).unwrap();

    let err = a.depend_on(&[&c]).unwrap_err();
    match err {
        SyncError::DependencyCycle { object, path } => {
            assert_eq!(object, a.id());
            assert_eq!(path.first(), Some(&a.id()));
            assert_eq!(path.last(), Some(&a.id()));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(manager.dependencies_of(a.id()).is_empty());
    assert!(manager.graph_is_consistent());

    // The rest still syncs in order.
    full_pass(&manager);
    assert_eq!(applied_ids(&log), vec![a.id(), b.id(), c.id()]);
}

#[test]
fn test_self_dependency_ignored() {
    let manager = manager();
    let log = new_log();
    let a = Node::new(&manager, &log);
    a.depend_on(&[&a]).unwrap();
    assert!(manager.dependencies_of(a.id()).is_empty());
}

#[test]
fn test_eager_sync_then_full_pass_skips_object() {
    let manager = manager();
    let log = new_log();
    let a = Node::new(&manager, &log);
    let b = Node::new(&manager, &log);
    b.depend_on(&[&a]).unwrap();
    full_pass(&manager);
    log.lock().clear();

    a.set(4);
    b.set(6);
    let queue = CommandBuffer::new();
    b.sync_now(&queue).unwrap();
    assert_eq!(queue.run_all(), 1);
    assert_eq!(*log.lock(), vec![(a.id(), 4), (b.id(), 6)]);
    log.lock().clear();

    // Both are clean now; the next pass sends nothing new for them.
    let stats = manager.sync_download();
    assert_eq!(stats.objects_synced, 0);
    let _ = manager.sync_upload();
    assert!(log.lock().is_empty());
}

#[test]
fn test_payload_memory_returned_after_upload() {
    let manager = manager();
    let log = new_log();
    let nodes: Vec<_> = (0..8).map(|_| Node::new(&manager, &log)).collect();

    let allocator = manager.frame_allocators().current();
    let stats = manager.sync_download();
    assert_eq!(stats.bytes, 8 * 16);
    assert_eq!(allocator.outstanding(), 8);

    let _ = manager.sync_upload();
    assert_eq!(allocator.outstanding(), 0);

    manager.end_frame();
    manager.end_frame();
    assert_eq!(allocator.used(), 0);
    drop(nodes);
}

#[test]
fn test_sync_to_core_through_command_buffer() {
    let manager = manager();
    let log = new_log();
    let node = Node::new(&manager, &log);
    node.set(12);

    let queue = CommandBuffer::new();
    let stats = manager.sync_to_core(&queue).unwrap();
    assert_eq!(stats.objects_synced, 1);
    assert!(log.lock().is_empty());

    queue.run_all();
    assert_eq!(*log.lock(), vec![(node.id(), 12)]);
    assert_eq!(manager.pending_batches(), 0);
    assert_eq!(manager.batches_produced(), 1);
}

#[test]
fn test_eagerly_synced_dependant_refreshed_when_dependency_changes() {
    let manager = manager();
    let log = new_log();
    let a = Node::new(&manager, &log);
    let b = Node::new(&manager, &log);
    b.depend_on(&[&a]).unwrap();
    full_pass(&manager);
    log.lock().clear();

    b.set(6);
    let queue = CommandBuffer::new();
    b.sync_now(&queue).unwrap();
    queue.run_all();
    assert_eq!(*log.lock(), vec![(b.id(), 6)]);
    log.lock().clear();

    a.set(7);
    let stats = manager.sync_download();
    assert_eq!(stats.forced_dependants, 1);
    let _ = manager.sync_upload();
    assert_eq!(applied_ids(&log), vec![a.id(), b.id()]);
}

#[test]
fn test_eager_sync_of_dependency_refreshes_dependant_next_pass() {
    let manager = manager();
    let log = new_log();
    let a = Node::new(&manager, &log);
    let b = Node::new(&manager, &log);
    b.depend_on(&[&a]).unwrap();
    full_pass(&manager);
    log.lock().clear();

    a.set(3);
    let queue = CommandBuffer::new();
    a.sync_now(&queue).unwrap();
    queue.run_all();
    log.lock().clear();

    let stats = manager.sync_download();
    assert_eq!(stats.forced_dependants, 1);
    assert_eq!(stats.objects_synced, 1);
    let _ = manager.sync_upload();
    assert_eq!(applied_ids(&log), vec![b.id()]);
}

#[test]
fn test_older_eager_dependant_refreshed_after_newer_eager_dependency() {
    let manager = manager();
    let log = new_log();
    let a = Node::new(&manager, &log);
    let b = Node::new(&manager, &log);
    b.depend_on(&[&a]).unwrap();
    full_pass(&manager);

    let queue = CommandBuffer::new();
    b.set(1);
    b.sync_now(&queue).unwrap();
    a.set(2);
    a.sync_now(&queue).unwrap();
    queue.run_all();
    log.lock().clear();

    let stats = manager.sync_download();
    assert_eq!(stats.forced_dependants, 1);
    let _ = manager.sync_upload();
    assert_eq!(*log.lock(), vec![(b.id(), 1)]);
}

#[test]
fn test_tolerated_cycle_terminates() {
    let manager = CoreObjectManager::new(SyncConfig {
        detect_cycles: false,
        ..SyncConfig::default()
    });
    let log = new_log();
    let a = Node::new(&manager, &log);
    let b = Node::new(&manager, &log);
    a.depend_on(&[&b]).unwrap();
    b.depend_on(&[&a]).unwrap();
    assert_eq!(manager.dependencies_of(b.id()), vec![a.id()]);

    full_pass(&manager);
    assert_eq!(applied_ids(&log), vec![b.id(), a.id()]);
    log.lock().clear();

    a.set(5);
    let stats = manager.sync_download();
    assert_eq!(stats.forced_dependants, 1);
    assert_eq!(stats.objects_synced, 2);
    let _ = manager.sync_upload();
    assert_eq!(applied_ids(&log), vec![b.id(), a.id()]);
}

/// Registers `len` nodes where each one depends on the next.
fn chain(
    manager: &Arc<CoreObjectManager>,
    log: &common::ApplyLog,
    len: usize,
) -> Vec<Arc<Node>> {
    let nodes: Vec<_> = (0..len).map(|_| Node::new(manager, log)).collect();
    for pair in nodes.windows(2) {
        pair[0].depend_on(&[&pair[1]]).unwrap();
    }
    nodes
}

#[test]
fn test_chain_within_depth_cap_applied_dependencies_first() {
    let manager = manager();
    let log = new_log();
    let nodes = chain(&manager, &log, 6);

    full_pass(&manager);
    let expected: Vec<_> = nodes.iter().rev().map(|n| n.id()).collect();
    assert_eq!(applied_ids(&log), expected);
}

#[test]
fn test_chain_past_depth_cap_loses_ordering() {
    let manager = CoreObjectManager::new(SyncConfig {
        max_dependency_depth: 3,
        ..SyncConfig::default()
    });
    let log = new_log();
    let nodes = chain(&manager, &log, 6);
    let ids: Vec<_> = nodes.iter().map(|n| n.id()).collect();

    full_pass(&manager);

    // The walk from ids[0] stops above ids[4]. Every node still goes out
    // once, but ids[4] and ids[5] land after their dependants.
    assert_eq!(
        applied_ids(&log),
        vec![ids[3], ids[2], ids[1], ids[0], ids[5], ids[4]]
    );
}

#[test]
fn test_core_initialized_before_first_delta() {
    let manager = manager();
    let log = new_log();
    let node = Node::new(&manager, &log);
    let core = node.core_handle();
    assert!(core.events().is_empty());

    node.set(2);
    full_pass(&manager);
    node.set(3);
    full_pass(&manager);

    assert_eq!(
        core.events(),
        vec![CoreEvent::Initialize, CoreEvent::Sync(2), CoreEvent::Sync(3)]
    );
}

#[test]
fn test_clean_destroy_destroys_core_on_next_pass() {
    let manager = manager();
    let log = new_log();
    let node = Node::new(&manager, &log);
    full_pass(&manager);
    let core = node.core_handle();
    drop(node);

    assert_eq!(core.events(), vec![CoreEvent::Initialize, CoreEvent::Sync(0)]);
    let stats = manager.sync_download();
    assert_eq!(stats.objects_synced, 0);
    assert_eq!(stats.cores_destroyed, 1);

    let report = manager.sync_upload().unwrap();
    assert_eq!(report.destroyed, 1);
    assert_eq!(core.events().last(), Some(&CoreEvent::Destroy));

    // Destroyed once only.
    full_pass(&manager);
    assert_eq!(core.events().len(), 3);
}

#[test]
fn test_destroy_before_first_sync_runs_full_lifecycle() {
    let manager = manager();
    let log = new_log();
    let node = Node::new(&manager, &log);
    let core = node.core_handle();
    node.set(5);
    drop(node);

    full_pass(&manager);
    assert_eq!(
        core.events(),
        vec![CoreEvent::Initialize, CoreEvent::Sync(5), CoreEvent::Destroy]
    );
}
