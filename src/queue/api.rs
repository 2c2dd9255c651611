//! Public API of the queue agent
//!
//! External modules should import from here rather than from the
//! individual queue modules.

// Agent and controllers
pub use crate::queue::agent::{AgentObjectStore, QueueAgent, SyncSummary};
pub use crate::queue::controller::{
    deduce_queue_family, update_queue_controller, ControllerContext, ErrorQueueController,
    OrderedDynamicTableController, QueueController,
};

// Configuration
pub use crate::queue::config::{QueueControllerDynamicConfig, DEFAULT_PASS_PERIOD};

// Snapshots and introspection
pub use crate::queue::orchid::{build_error_orchid, build_queue_orchid};
pub use crate::queue::profile::QueueProfileDelta;
pub use crate::queue::snapshot::{
    ConsumerPartitionSnapshot, ConsumerSnapshot, ObjectSnapshot, PartitionMeta,
    PartitionSnapshot, QueueSnapshot, SubConsumerSnapshot,
};
pub use crate::queue::write_rate::{EmaCounter, RateSummary, WriteRate};

// Trimming
pub use crate::queue::trim::report::{PartitionTrimOutcome, ReplicaTrimOutcome, TrimReport};
pub use crate::queue::trim::run_trimming_iteration;

// Rows and identifiers
pub use crate::queue::types::{
    AutoTrimConfig, ConsumerRegistrationRow, ObjectKind, ObjectType, QueueFamily, QueueRef,
    QueueTableRow, ReplicaDescriptor, ReplicaMode, ReplicatedTableMappingRow, TabletState,
};

// Error handling
pub use crate::queue::error::{ErrorScope, QueueError, QueueResult};
