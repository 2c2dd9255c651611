//! Application module

pub mod cli;
pub mod fixture;
pub mod startup;
