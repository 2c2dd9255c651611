//! Core services and infrastructure

pub mod cleanup;
pub mod logging;
pub mod periodic;
pub mod shutdown;
pub mod time;
pub mod version;
