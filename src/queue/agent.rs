//! Queue agent
//!
//! Owns one controller per queue and keeps them in line with the rows read
//! from the agent's dynamic state. Queue snapshots published by the agent's
//! own controllers are visible to every trim session through
//! [`AgentObjectStore`], so replicas of a replicated queue can see each
//! other.

use crate::client::directory::ClientDirectory;
use crate::client::object_store::ObjectStore;
use crate::core::cleanup::Reaper;
use crate::core::time::TimeProvider;
use crate::queue::config::QueueControllerDynamicConfig;
use crate::queue::controller::{retire, update_queue_controller, ControllerContext, QueueController};
use crate::queue::error::QueueResult;
use crate::queue::snapshot::ObjectSnapshot;
use crate::queue::types::{
    ConsumerRegistrationRow, ObjectKind, QueueRef, QueueTableRow, ReplicatedTableMappingRow,
};
use arc_swap::ArcSwap;
use futures::future::join_all;
use log::{debug, info};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tokio::task::JoinHandle;

type ControllerMap = RwLock<HashMap<QueueRef, QueueController>>;

/// Object store answering queue snapshot lookups from the agent's own
/// controllers and everything else from an external store
pub struct AgentObjectStore {
    external: Arc<dyn ObjectStore>,
    controllers: Weak<ControllerMap>,
}

impl ObjectStore for AgentObjectStore {
    fn get_registrations(
        &self,
        object: &QueueRef,
        kind: ObjectKind,
    ) -> Vec<ConsumerRegistrationRow> {
        self.external.get_registrations(object, kind)
    }

    fn find_snapshot(&self, object: &QueueRef) -> Option<ObjectSnapshot> {
        let own = self.controllers.upgrade().and_then(|controllers| {
            controllers
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(object)
                .map(|controller| ObjectSnapshot::Queue(controller.latest_snapshot()))
        });
        own.or_else(|| self.external.find_snapshot(object))
    }
}

/// What one `sync_queues` call changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub created: usize,
    pub recreated: usize,
    pub kept: usize,
    pub removed: usize,
}

pub struct QueueAgent {
    leading: bool,
    context: ControllerContext,
    dynamic_config: ArcSwap<QueueControllerDynamicConfig>,
    controllers: Arc<ControllerMap>,
    reaper: Option<Reaper<QueueController>>,
    reaper_handle: Option<JoinHandle<usize>>,
}

impl QueueAgent {
    /// Must be called inside a tokio runtime when `schedule_passes` is set
    pub fn new(
        directory: Arc<dyn ClientDirectory>,
        external_store: Arc<dyn ObjectStore>,
        clock: Arc<dyn TimeProvider>,
        dynamic_config: QueueControllerDynamicConfig,
        leading: bool,
        schedule_passes: bool,
    ) -> QueueResult<Self> {
        dynamic_config.validate()?;

        let controllers: Arc<ControllerMap> = Arc::new(RwLock::new(HashMap::new()));
        let object_store: Arc<dyn ObjectStore> = Arc::new(AgentObjectStore {
            external: external_store,
            controllers: Arc::downgrade(&controllers),
        });
        let (reaper, reaper_handle) = match tokio::runtime::Handle::try_current() {
            Ok(_) => {
                let (reaper, handle) = Reaper::spawn("queue controllers");
                (Some(reaper), Some(handle))
            }
            Err(_) => (None, None),
        };

        Ok(Self {
            leading,
            context: ControllerContext {
                directory,
                object_store,
                clock,
                schedule_passes,
            },
            dynamic_config: ArcSwap::from_pointee(dynamic_config),
            controllers,
            reaper,
            reaper_handle,
        })
    }

    pub fn is_leading(&self) -> bool {
        self.leading
    }

    pub fn object_store(&self) -> Arc<dyn ObjectStore> {
        self.context.object_store.clone()
    }

    pub fn dynamic_config(&self) -> Arc<QueueControllerDynamicConfig> {
        self.dynamic_config.load_full()
    }

    pub fn controller(&self, queue: &QueueRef) -> Option<QueueController> {
        self.controllers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(queue)
            .cloned()
    }

    pub fn queue_refs(&self) -> Vec<QueueRef> {
        let mut refs: Vec<QueueRef> = self
            .controllers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        refs.sort();
        refs
    }

    /// Apply the full current set of queue and mapping rows
    ///
    /// Queues missing from `rows` lose their controllers.
    pub fn sync_queues(
        &self,
        rows: &[QueueTableRow],
        mapping_rows: &[ReplicatedTableMappingRow],
    ) -> SyncSummary {
        let mappings: HashMap<&QueueRef, &ReplicatedTableMappingRow> = mapping_rows
            .iter()
            .map(|mapping| (&mapping.queue_ref, mapping))
            .collect();
        let dynamic_config = self.dynamic_config.load_full();
        let mut summary = SyncSummary::default();

        let mut controllers = self
            .controllers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        for row in rows {
            let mut slot = controllers.remove(&row.queue_ref);
            let existed = slot.is_some();
            let recreated = update_queue_controller(
                &mut slot,
                self.leading,
                row,
                mappings.get(&row.queue_ref).copied(),
                &dynamic_config,
                &self.context,
                self.reaper.as_ref(),
            );
            match (existed, recreated) {
                (false, _) => summary.created += 1,
                (true, true) => summary.recreated += 1,
                (true, false) => summary.kept += 1,
            }
            if let Some(controller) = slot {
                controllers.insert(row.queue_ref.clone(), controller);
            }
        }

        let stale: Vec<QueueRef> = controllers
            .keys()
            .filter(|queue_ref| !rows.iter().any(|row| &row.queue_ref == *queue_ref))
            .cloned()
            .collect();
        for queue_ref in stale {
            if let Some(controller) = controllers.remove(&queue_ref) {
                debug!("Queue controller removed (Queue: {})", queue_ref);
                retire(controller, self.reaper.as_ref());
                summary.removed += 1;
            }
        }

        info!(
            "Queue controllers synchronized (Created: {}, Recreated: {}, Kept: {}, Removed: {})",
            summary.created, summary.recreated, summary.kept, summary.removed
        );
        summary
    }

    /// Swap the tunables of the agent and every controller
    pub fn on_dynamic_config_changed(
        &self,
        new_config: QueueControllerDynamicConfig,
    ) -> QueueResult<()> {
        new_config.validate()?;
        let old_config = self.dynamic_config.swap(Arc::new(new_config.clone()));
        for controller in self.snapshot_controllers() {
            controller.on_dynamic_config_changed(&old_config, &new_config);
        }
        Ok(())
    }

    fn snapshot_controllers(&self) -> Vec<QueueController> {
        self.controllers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Run one pass of every controller concurrently
    pub async fn pass_all(&self) {
        let controllers = self.snapshot_controllers();
        join_all(controllers.iter().map(QueueController::pass)).await;
    }

    /// Orchids of all queues keyed by `<cluster>:<path>`
    pub fn build_orchid(&self) -> Value {
        let orchids: BTreeMap<String, Value> = self
            .controllers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(queue_ref, controller)| (queue_ref.to_string(), controller.build_orchid()))
            .collect();

        let mut root = Map::new();
        root.insert("leading".into(), Value::Bool(self.leading));
        root.insert("queues".into(), Value::Object(orchids.into_iter().collect()));
        Value::Object(root)
    }

    /// Retire every controller and wait for their teardown
    pub async fn shutdown(mut self) -> usize {
        let controllers: Vec<QueueController> = self
            .controllers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, controller)| controller)
            .collect();
        let count = controllers.len();
        for controller in controllers {
            retire(controller, self.reaper.as_ref());
        }
        self.reaper.take();
        if let Some(handle) = self.reaper_handle.take() {
            let _ = handle.await;
        }
        info!("Queue agent stopped (Controllers: {})", count);
        count
    }
}
