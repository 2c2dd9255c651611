//! Registration and snapshot lookup service

use crate::queue::snapshot::{ConsumerSnapshot, ObjectSnapshot, QueueSnapshot};
use crate::queue::types::{ConsumerRegistrationRow, ObjectKind, QueueRef};
use std::sync::Arc;

pub trait ObjectStore: Send + Sync {
    /// Registrations in which `object` takes part as a queue or as a consumer
    fn get_registrations(&self, object: &QueueRef, kind: ObjectKind)
        -> Vec<ConsumerRegistrationRow>;

    /// Latest published snapshot of `object`
    fn find_snapshot(&self, object: &QueueRef) -> Option<ObjectSnapshot>;

    fn find_queue_snapshot(&self, object: &QueueRef) -> Option<Arc<QueueSnapshot>> {
        self.find_snapshot(object)
            .and_then(|snapshot| snapshot.as_queue().cloned())
    }

    fn find_consumer_snapshot(&self, object: &QueueRef) -> Option<Arc<ConsumerSnapshot>> {
        self.find_snapshot(object)
            .and_then(|snapshot| snapshot.as_consumer().cloned())
    }
}

/// Registrations of `queue` whose consumers are vital
pub fn vital_registrations(
    store: &dyn ObjectStore,
    queue: &QueueRef,
) -> Vec<ConsumerRegistrationRow> {
    store
        .get_registrations(queue, ObjectKind::Queue)
        .into_iter()
        .filter(|registration| registration.vital)
        .collect()
}
