//! Queue controllers
//!
//! A controller owns the published state of one queue: the latest rows, the
//! dynamic config and the latest snapshot, each held in an atomically swapped
//! pointer so that readers never block and never observe a partial update.
//!
//! Controllers are identified by `(family, leading)`. When either changes the
//! controller is replaced as a whole by [`update_queue_controller`]; the
//! retired one is torn down in the background.

use crate::client::directory::ClientDirectory;
use crate::client::object_store::ObjectStore;
use crate::core::cleanup::{Cleanup, Reaper};
use crate::core::periodic::PeriodicExecutor;
use crate::core::time::TimeProvider;
use crate::queue::builder::SnapshotBuilder;
use crate::queue::config::QueueControllerDynamicConfig;
use crate::queue::error::{QueueError, QueueResult};
use crate::queue::orchid::{build_error_orchid, build_queue_orchid};
use crate::queue::profile::QueueProfileDelta;
use crate::queue::snapshot::QueueSnapshot;
use crate::queue::trim::report::TrimReport;
use crate::queue::trim::run_trimming_iteration;
use crate::queue::types::{
    ObjectKind, ObjectType, QueueFamily, QueueRef, QueueTableRow, ReplicatedTableMappingRow,
};
use arc_swap::{ArcSwap, ArcSwapOption};
use log::{debug, info};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Collaborators shared by all controllers of an agent
#[derive(Clone)]
pub struct ControllerContext {
    pub directory: Arc<dyn ClientDirectory>,
    pub object_store: Arc<dyn ObjectStore>,
    pub clock: Arc<dyn TimeProvider>,
    /// Start a periodic pass executor for every new controller
    pub schedule_passes: bool,
}

/// Family of a queue, or why it cannot be processed
pub fn deduce_queue_family(
    row: &QueueTableRow,
    replicated_table_mapping_row: Option<&ReplicatedTableMappingRow>,
) -> QueueResult<QueueFamily> {
    let invalid = |reason: String| Err(QueueError::InvalidFamily { reason });
    row.auto_trim_config.validate()?;

    let Some(object_type) = row.object_type else {
        return invalid(format!("object type of queue {} is unknown", row.queue_ref));
    };
    if object_type.is_replicated() && replicated_table_mapping_row.is_none() {
        return invalid(format!(
            "{} queue {} has no replicated table mapping row",
            object_type, row.queue_ref
        ));
    }
    if object_type == ObjectType::Table && row.dynamic != Some(true) {
        return invalid(format!("queue {} is not a dynamic table", row.queue_ref));
    }
    if row.sorted == Some(true) || (object_type == ObjectType::Table && row.sorted.is_none()) {
        return invalid(format!("queue {} is not an ordered table", row.queue_ref));
    }
    Ok(QueueFamily::OrderedDynamicTable)
}

pub struct OrderedDynamicTableController {
    queue_ref: QueueRef,
    leading: bool,
    logging_tag: String,
    context: ControllerContext,

    row: ArcSwap<QueueTableRow>,
    replicated_table_mapping_row: ArcSwapOption<ReplicatedTableMappingRow>,
    dynamic_config: ArcSwap<QueueControllerDynamicConfig>,

    snapshot: ArcSwap<QueueSnapshot>,
    trim_report: ArcSwapOption<TrimReport>,

    // Serialises passes started outside of the executor
    pass_guard: tokio::sync::Mutex<()>,
    executor: Mutex<Option<PeriodicExecutor>>,
}

impl OrderedDynamicTableController {
    pub fn new(
        leading: bool,
        row: QueueTableRow,
        replicated_table_mapping_row: Option<ReplicatedTableMappingRow>,
        dynamic_config: QueueControllerDynamicConfig,
        context: ControllerContext,
    ) -> Arc<Self> {
        let queue_ref = row.queue_ref.clone();
        let logging_tag = format!("Queue: {}, Leading: {}", queue_ref, leading);
        let initial_snapshot = QueueSnapshot::erroneous(
            row.clone(),
            replicated_table_mapping_row.clone(),
            QueueError::NotProcessedYet,
        );

        let controller = Arc::new(Self {
            queue_ref,
            leading,
            logging_tag,
            context,
            row: ArcSwap::from_pointee(row),
            replicated_table_mapping_row: ArcSwapOption::from_pointee(replicated_table_mapping_row),
            dynamic_config: ArcSwap::from_pointee(dynamic_config),
            snapshot: ArcSwap::from_pointee(initial_snapshot),
            trim_report: ArcSwapOption::empty(),
            pass_guard: tokio::sync::Mutex::new(()),
            executor: Mutex::new(None),
        });

        info!("Queue controller started ({})", controller.logging_tag);
        if controller.context.schedule_passes {
            controller.start();
        }
        controller
    }

    /// Schedule passes on the current runtime; the executor only holds a
    /// weak reference and stops once the controller is dropped
    pub fn start(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.dynamic_config.load().pass_period;
        let executor = PeriodicExecutor::start(
            format!("pass {}", self.queue_ref),
            period,
            move || {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(controller) => {
                            controller.pass().await;
                            true
                        }
                        None => false,
                    }
                }
            },
        );
        let previous = self
            .executor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(executor);
        if let Some(previous) = previous {
            previous.stop();
        }
    }

    pub fn queue_ref(&self) -> &QueueRef {
        &self.queue_ref
    }

    pub fn is_leading(&self) -> bool {
        self.leading
    }

    pub fn logging_tag(&self) -> &str {
        &self.logging_tag
    }

    pub fn latest_snapshot(&self) -> Arc<QueueSnapshot> {
        self.snapshot.load_full()
    }

    pub fn latest_trim_report(&self) -> Option<Arc<TrimReport>> {
        self.trim_report.load_full()
    }

    pub fn dynamic_config(&self) -> Arc<QueueControllerDynamicConfig> {
        self.dynamic_config.load_full()
    }

    /// Picked up by the next pass
    pub fn on_row_updated(&self, row: QueueTableRow) {
        self.row.store(Arc::new(row));
    }

    pub fn on_replicated_table_mapping_row_updated(&self, row: Option<ReplicatedTableMappingRow>) {
        self.replicated_table_mapping_row.store(row.map(Arc::new));
    }

    pub fn on_dynamic_config_changed(
        &self,
        old_config: &QueueControllerDynamicConfig,
        new_config: &QueueControllerDynamicConfig,
    ) {
        self.dynamic_config.store(Arc::new(new_config.clone()));
        if let Some(executor) = self
            .executor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            executor.set_period(new_config.pass_period);
        }
        debug!(
            "Updated queue controller dynamic config (OldConfig: {:?}, NewConfig: {:?}, {})",
            old_config, new_config, self.logging_tag
        );
    }

    pub fn build_orchid(&self) -> serde_json::Value {
        let snapshot = self.snapshot.load();
        let trim_report = self.trim_report.load();
        build_queue_orchid(&snapshot, self.leading, trim_report.as_deref())
    }

    /// Trimming runs on every `trimming_frequency`-th pass when enabled
    pub fn should_trim(&self, pass_index: i64) -> bool {
        let config = self.dynamic_config.load();
        config.enable_automatic_trimming && pass_index % config.trimming_frequency() == 0
    }

    /// Build and publish the next snapshot; trim when leading
    pub async fn pass(&self) {
        let _guard = self.pass_guard.lock().await;

        info!("Queue controller pass started ({})", self.logging_tag);

        let registrations = self
            .context
            .object_store
            .get_registrations(&self.queue_ref, ObjectKind::Queue);
        info!(
            "Registrations fetched (RegistrationCount: {}, {})",
            registrations.len(),
            self.logging_tag
        );
        for registration in &registrations {
            debug!(
                "Relevant registration (Queue: {}, Consumer: {}, Vital: {}, {})",
                registration.queue, registration.consumer, registration.vital, self.logging_tag
            );
        }

        let previous = self.snapshot.load_full();
        let row = self.row.load_full();
        let mapping = self.replicated_table_mapping_row.load_full();
        let next = SnapshotBuilder::new(
            self.context.directory.as_ref(),
            self.context.clock.as_ref(),
            &previous,
            (*row).clone(),
            mapping.as_deref().cloned(),
            registrations,
        )
        .with_logging_tag(&self.logging_tag)
        .build()
        .await;
        let next = Arc::new(next);
        self.snapshot.store(next.clone());

        info!(
            "Queue snapshot updated (PassIndex: {}, {})",
            next.pass_index, self.logging_tag
        );

        if self.leading {
            debug!(
                "Queue controller is leading, performing mutating operations ({})",
                self.logging_tag
            );

            let delta = QueueProfileDelta::between(&previous, &next);
            if !delta.is_empty() {
                debug!(
                    "Queue profile (RowsWritten: {}, RowsTrimmed: {}, DataWeightWritten: {}, {})",
                    delta.rows_written, delta.rows_trimmed, delta.data_weight_written, self.logging_tag
                );
            }

            if self.should_trim(next.pass_index) {
                let report = run_trimming_iteration(
                    next,
                    self.context.directory.as_ref(),
                    self.context.object_store.as_ref(),
                    &self.logging_tag,
                )
                .await;
                self.trim_report.store(Some(Arc::new(report)));
            }
        }

        info!("Queue controller pass finished ({})", self.logging_tag);
    }
}

impl Cleanup for OrderedDynamicTableController {
    fn cleanup(&self) {
        if let Some(executor) = self
            .executor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            executor.stop();
        }
        debug!("Queue controller retired ({})", self.logging_tag);
    }
}

/// Stateless controller of a queue that cannot be processed
pub struct ErrorQueueController {
    row: QueueTableRow,
    replicated_table_mapping_row: Option<ReplicatedTableMappingRow>,
    error: QueueError,
    snapshot: Arc<QueueSnapshot>,
}

impl ErrorQueueController {
    pub fn new(
        row: QueueTableRow,
        replicated_table_mapping_row: Option<ReplicatedTableMappingRow>,
        error: QueueError,
    ) -> Self {
        let snapshot = Arc::new(QueueSnapshot::erroneous(
            row.clone(),
            replicated_table_mapping_row.clone(),
            error.clone(),
        ));
        Self {
            row,
            replicated_table_mapping_row,
            error,
            snapshot,
        }
    }

    pub fn error(&self) -> &QueueError {
        &self.error
    }

    pub fn build_orchid(&self) -> serde_json::Value {
        build_error_orchid(
            &self.row,
            self.replicated_table_mapping_row.as_ref(),
            &self.error,
        )
    }
}

#[derive(Clone)]
pub enum QueueController {
    OrderedDynamicTable(Arc<OrderedDynamicTableController>),
    Error(Arc<ErrorQueueController>),
}

impl QueueController {
    pub fn family(&self) -> QueueFamily {
        match self {
            QueueController::OrderedDynamicTable(_) => QueueFamily::OrderedDynamicTable,
            QueueController::Error(_) => QueueFamily::Null,
        }
    }

    pub fn is_leading(&self) -> bool {
        match self {
            QueueController::OrderedDynamicTable(controller) => controller.is_leading(),
            QueueController::Error(_) => false,
        }
    }

    pub fn latest_snapshot(&self) -> Arc<QueueSnapshot> {
        match self {
            QueueController::OrderedDynamicTable(controller) => controller.latest_snapshot(),
            QueueController::Error(controller) => controller.snapshot.clone(),
        }
    }

    pub fn build_orchid(&self) -> serde_json::Value {
        match self {
            QueueController::OrderedDynamicTable(controller) => controller.build_orchid(),
            QueueController::Error(controller) => controller.build_orchid(),
        }
    }

    pub fn on_row_updated(&self, row: QueueTableRow) {
        if let QueueController::OrderedDynamicTable(controller) = self {
            controller.on_row_updated(row);
        }
    }

    pub fn on_replicated_table_mapping_row_updated(&self, row: Option<ReplicatedTableMappingRow>) {
        if let QueueController::OrderedDynamicTable(controller) = self {
            controller.on_replicated_table_mapping_row_updated(row);
        }
    }

    pub fn on_dynamic_config_changed(
        &self,
        old_config: &QueueControllerDynamicConfig,
        new_config: &QueueControllerDynamicConfig,
    ) {
        if let QueueController::OrderedDynamicTable(controller) = self {
            controller.on_dynamic_config_changed(old_config, new_config);
        }
    }

    /// Run one pass now; error controllers have nothing to do
    pub async fn pass(&self) {
        if let QueueController::OrderedDynamicTable(controller) = self {
            controller.pass().await;
        }
    }

    pub fn as_ordered(&self) -> Option<&Arc<OrderedDynamicTableController>> {
        match self {
            QueueController::OrderedDynamicTable(controller) => Some(controller),
            QueueController::Error(_) => None,
        }
    }
}

impl Cleanup for QueueController {
    fn cleanup(&self) {
        if let QueueController::OrderedDynamicTable(controller) = self {
            controller.cleanup();
        }
    }
}

/// Bring `slot` in line with the latest rows
///
/// Returns whether a new controller was installed. Error controllers are
/// rebuilt every time so their error is never stale; a working controller
/// is kept while its family and leadership are unchanged. A replaced
/// controller is handed to `reaper`, or cleaned up inline without one.
#[allow(clippy::too_many_arguments)]
pub fn update_queue_controller(
    slot: &mut Option<QueueController>,
    leading: bool,
    row: &QueueTableRow,
    replicated_table_mapping_row: Option<&ReplicatedTableMappingRow>,
    dynamic_config: &QueueControllerDynamicConfig,
    context: &ControllerContext,
    reaper: Option<&Reaper<QueueController>>,
) -> bool {
    let replacement = if let Some(message) = &row.synchronization_error {
        QueueController::Error(Arc::new(ErrorQueueController::new(
            row.clone(),
            replicated_table_mapping_row.cloned(),
            QueueError::Synchronization {
                message: message.clone(),
            },
        )))
    } else {
        match deduce_queue_family(row, replicated_table_mapping_row) {
            Err(family_error) => QueueController::Error(Arc::new(ErrorQueueController::new(
                row.clone(),
                replicated_table_mapping_row.cloned(),
                family_error,
            ))),
            Ok(family) => {
                if let Some(current) = slot.as_ref() {
                    if current.family() == family && current.is_leading() == leading {
                        current.on_row_updated(row.clone());
                        current.on_replicated_table_mapping_row_updated(
                            replicated_table_mapping_row.cloned(),
                        );
                        return false;
                    }
                }
                match family {
                    QueueFamily::OrderedDynamicTable => {
                        QueueController::OrderedDynamicTable(OrderedDynamicTableController::new(
                            leading,
                            row.clone(),
                            replicated_table_mapping_row.cloned(),
                            dynamic_config.clone(),
                            context.clone(),
                        ))
                    }
                    QueueFamily::Null => QueueController::Error(Arc::new(
                        ErrorQueueController::new(
                            row.clone(),
                            replicated_table_mapping_row.cloned(),
                            QueueError::InvalidFamily {
                                reason: "null family has no controller".to_string(),
                            },
                        ),
                    )),
                }
            }
        }
    };

    if let Some(retired) = slot.replace(replacement) {
        retire(retired, reaper);
    }
    true
}

/// Hand `controller` to the reaper, or clean it up inline without one
pub fn retire(controller: QueueController, reaper: Option<&Reaper<QueueController>>) {
    match reaper {
        Some(reaper) => reaper.retire(controller),
        None => controller.cleanup(),
    }
}
