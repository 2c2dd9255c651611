//! Command-line arguments and configuration file

pub mod args;
pub mod config;
