//! Shared test resource: a node carrying one value and a dependency list.

#![allow(dead_code)]

use std::sync::{Arc, Weak};

use duplex_core::{
    CoreObject, CoreObjectCore, CoreObjectExt, CoreObjectId, CoreObjectManager, CoreObjectState,
    CoreSyncData, FrameAlloc, SyncResult,
};
use parking_lot::Mutex;

/// Every delta applied on the core side, in application order.
pub type ApplyLog = Arc<Mutex<Vec<(CoreObjectId, u64)>>>;

pub fn new_log() -> ApplyLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// What happened to one core side, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoreEvent {
    Initialize,
    Sync(u64),
    Destroy,
}

pub struct NodeCore {
    log: ApplyLog,
    value: Mutex<u64>,
    events: Mutex<Vec<CoreEvent>>,
}

impl NodeCore {
    pub fn value(&self) -> u64 {
        *self.value.lock()
    }

    pub fn events(&self) -> Vec<CoreEvent> {
        self.events.lock().clone()
    }
}

impl CoreObjectCore for NodeCore {
    fn sync_to_core(&self, data: &CoreSyncData) {
        let mut reader = data.reader();
        let id: u64 = reader.read().unwrap();
        let value: u64 = reader.read().unwrap();
        *self.value.lock() = value;
        self.events.lock().push(CoreEvent::Sync(value));
        self.log.lock().push((CoreObjectId::new(id), value));
    }

    fn initialize(&self, _id: CoreObjectId) {
        self.events.lock().push(CoreEvent::Initialize);
    }

    fn destroy(&self, _id: CoreObjectId) {
        self.events.lock().push(CoreEvent::Destroy);
    }
}

pub struct Node {
    state: CoreObjectState,
    core: Arc<NodeCore>,
    value: Mutex<u64>,
    dependencies: Mutex<Vec<CoreObjectId>>,
}

impl Node {
    /// Creates and registers a node.
    pub fn new(manager: &Arc<CoreObjectManager>, log: &ApplyLog) -> Arc<Self> {
        let node = Self::unregistered(manager, log);
        manager.register(&node);
        node
    }

    pub fn unregistered(manager: &Arc<CoreObjectManager>, log: &ApplyLog) -> Arc<Self> {
        Arc::new(Self {
            state: CoreObjectState::new(manager),
            core: Arc::new(NodeCore {
                log: Arc::clone(log),
                value: Mutex::new(0),
                events: Mutex::new(Vec::new()),
            }),
            value: Mutex::new(0),
            dependencies: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> CoreObjectId {
        self.internal_id()
    }

    pub fn set(&self, value: u64) {
        *self.value.lock() = value;
        self.mark_core_dirty(1);
    }

    pub fn depend_on(&self, nodes: &[&Arc<Node>]) -> SyncResult<()> {
        *self.dependencies.lock() = nodes.iter().map(|n| n.id()).collect();
        self.mark_dependencies_dirty()
    }

    pub fn core_weak(&self) -> Weak<NodeCore> {
        Arc::downgrade(&self.core)
    }

    pub fn core_handle(&self) -> Arc<NodeCore> {
        Arc::clone(&self.core)
    }

    pub fn core_value(&self) -> u64 {
        self.core.value()
    }
}

impl CoreObject for Node {
    fn core_state(&self) -> &CoreObjectState {
        &self.state
    }

    fn core(&self) -> Option<Arc<dyn CoreObjectCore>> {
        let core: Arc<dyn CoreObjectCore> = self.core.clone();
        Some(core)
    }

    fn sync_to_core(&self, allocator: &Arc<FrameAlloc>) -> CoreSyncData {
        let mut data = allocator.alloc(16);
        let mut writer = data.writer();
        let _ = writer.write(&self.state.id().raw());
        let _ = writer.write(&*self.value.lock());
        data
    }

    fn core_dependencies(&self, dependencies: &mut Vec<CoreObjectId>) {
        dependencies.extend(self.dependencies.lock().iter().copied());
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Ids in the log, in application order.
pub fn applied_ids(log: &ApplyLog) -> Vec<CoreObjectId> {
    log.lock().iter().map(|(id, _)| *id).collect()
}
