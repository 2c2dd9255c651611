//! Command-line driver tests
//!
//! Only one test in this binary may start the agent: the global logger can
//! be installed once per process.

use clap::Parser;
use queue_agent::app::cli::args::Args;
use queue_agent::app::cli::config::AgentConfig;
use queue_agent::app::fixture::ClusterFixture;
use queue_agent::app::startup::run;
use queue_agent::core::time::MockTimeProvider;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::NamedTempFile;

fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("cluster.toml")
}

#[tokio::test]
async fn test_fixture_materializes() {
    let fixture = ClusterFixture::load(&fixture_path()).await.unwrap();
    assert_eq!(fixture.queues.len(), 2);

    let loaded = fixture
        .materialize(Arc::new(MockTimeProvider::new()))
        .unwrap();
    let cluster = loaded.directory.cluster("hume").unwrap();
    assert_eq!(cluster.tablet_counters("//queues/events", 0), Some((0, 40)));
    assert_eq!(cluster.tablet_counters("//queues/audit", 0), Some((0, 10)));
}

#[tokio::test]
async fn test_config_file_points_at_fixture() {
    let mut config_file = NamedTempFile::new().unwrap();
    writeln!(
        config_file,
        "cluster_file = {:?}\n[controller]\npass_period_ms = 100\nenable_automatic_trimming = true",
        fixture_path().display().to_string()
    )
    .unwrap();

    let args = Args::try_parse_from([
        "queue-agent",
        "--config-file",
        config_file.path().to_str().unwrap(),
        "--follower",
    ])
    .unwrap();
    let mut config = AgentConfig::load(args.config_file.as_deref()).await.unwrap();
    config.apply_args(&args);

    assert!(!config.leading);
    assert_eq!(config.cluster_file, Some(fixture_path()));
    assert!(config.controller.enable_automatic_trimming);
}

#[tokio::test]
async fn test_run_fixed_number_of_passes() {
    let mut config_file = NamedTempFile::new().unwrap();
    writeln!(
        config_file,
        "[controller]\npass_period_ms = 100\nenable_automatic_trimming = true\n[logging]\nlevel = \"warn\""
    )
    .unwrap();

    let args = Args::try_parse_from([
        "queue-agent",
        "--config-file",
        config_file.path().to_str().unwrap(),
        "--cluster-file",
        fixture_path().to_str().unwrap(),
        "--passes",
        "2",
        "--no-color",
    ])
    .unwrap();

    run(args).await.unwrap();
}

#[tokio::test]
async fn test_missing_cluster_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.toml");
    let result = ClusterFixture::load(&missing).await;
    assert!(result.is_err());
}
