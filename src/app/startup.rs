//! Application startup
//!
//! Loads configuration, starts logging, builds the agent over the cluster
//! fixture and drives it either for a fixed number of passes or until a
//! shutdown signal arrives. The final orchid is printed as JSON.

use super::cli::args::Args;
use super::cli::config::AgentConfig;
use super::fixture::ClusterFixture;
use crate::core::logging::init_logging;
use crate::core::shutdown::ShutdownCoordinator;
use crate::core::time::{SystemTimeProvider, TimeProvider};
use crate::core::version::long_version;
use crate::queue::agent::QueueAgent;
use clap::Parser;
use log::info;
use std::error::Error;
use std::path::Path;
use std::sync::Arc;

/// Run the agent from the process arguments; returns the exit code
pub async fn startup() -> i32 {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => 0,
        Err(startup_error) => {
            eprintln!("Error: {}", startup_error);
            1
        }
    }
}

pub async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let mut config = AgentConfig::load(args.config_file.as_deref()).await?;
    config.apply_args(&args);

    init_logging(
        config.logging.level.as_deref(),
        config.logging.format.as_deref(),
        config.logging.file.as_deref().and_then(Path::to_str),
        args.use_color(config.logging.color),
    )?;
    info!(
        "Queue agent starting (Version: {}, Leading: {})",
        long_version(),
        config.leading
    );

    let cluster_file = config
        .cluster_file
        .clone()
        .ok_or("No cluster file given; use --cluster-file or set cluster_file in the configuration")?;
    let fixture = ClusterFixture::load(&cluster_file).await?;
    let clock: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let loaded = fixture.materialize(clock.clone())?;

    let agent = QueueAgent::new(
        loaded.directory.clone(),
        loaded.object_store.clone(),
        clock,
        config.controller.clone(),
        config.leading,
        args.passes.is_none(),
    )?;
    agent.sync_queues(&loaded.queues, &loaded.replicated_table_mappings);

    match args.passes {
        Some(passes) => {
            for pass in 1..=passes {
                agent.pass_all().await;
                info!("Agent pass finished (Pass: {}, Of: {})", pass, passes);
            }
        }
        None => {
            ShutdownCoordinator::guard_with_coordinator(|_coordinator, mut shutdown_rx| async move {
                info!("Queue agent running; waiting for shutdown signal");
                let _ = shutdown_rx.recv().await;
                Ok::<(), Box<dyn Error>>(())
            })
            .await?;
        }
    }

    println!("{}", serde_json::to_string_pretty(&agent.build_orchid())?);
    agent.shutdown().await;
    Ok(())
}
