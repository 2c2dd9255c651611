//! Access to clusters and to the snapshots of other queue agent objects
//!
//! Production deployments implement [`storage::StorageClient`],
//! [`directory::ClientDirectory`] and [`object_store::ObjectStore`] over
//! their cluster API; [`memory`] provides an in-process implementation of
//! all three.

pub mod directory;
pub mod memory;
pub mod object_store;
pub mod storage;
