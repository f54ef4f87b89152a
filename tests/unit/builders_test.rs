//! Tests for builder modules

use std::sync::Arc;
use std::time::Duration;

use prometheus_fleet::builders::FleetBuilder;
use prometheus_fleet::config::{FleetConfig, SizingConfig};
use prometheus_fleet::core::{prepare_fn, FleetError, ShellCommand, SizingPolicy};
use prometheus_fleet::infra::{InMemoryProvisioner, InMemoryShell};

fn builder(cfg: FleetConfig) -> (FleetBuilder, InMemoryProvisioner, InMemoryShell) {
    let provisioner = InMemoryProvisioner::with_base_images();
    let shell = InMemoryShell::new();
    let builder = FleetBuilder::new(cfg, Arc::new(provisioner.clone()), Arc::new(shell.clone()));
    (builder, provisioner, shell)
}

#[test]
fn test_builder_applies_config() {
    let mut cfg = FleetConfig::new("node-v6");
    cfg.poll_timeout_secs = 30;
    let (builder, _, _) = builder(cfg);
    assert_eq!(builder.config().base_image, "node-v6");
    assert_eq!(builder.instance_ops().poller().timeout(), Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_builder_launches_fleet() {
    let mut cfg = FleetConfig::new("node-v6");
    cfg.builder_size = Some("2gb".into());
    cfg.sizing = SizingConfig::Clamp {
        min_pool_size: 1,
        max_pool_size: 2,
    };
    let (builder, provisioner, shell) = builder(cfg);
    let fleet = builder
        .prepare(prepare_fn(|shell| async move {
            shell.exec(ShellCommand::new("yum -y install nodejs")).await?;
            Ok(())
        }))
        .launch()
        .await
        .unwrap();
    fleet.ready().await.unwrap();

    let created = provisioner.created();
    assert_eq!(created[0].size, "2gb");
    assert_eq!(created[1].size, "512mb");
    assert!(created[1].name.starts_with("fleet-ship-"));
    assert_eq!(shell.exec_log()[0].script, "yum -y install nodejs");
    assert_eq!(fleet.stats().pool_size, 1);

    fleet.shutdown().await;
    assert!(provisioner.live_instances().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_builder_sizing_override() {
    let (builder, provisioner, _) = builder(FleetConfig::new("node-v6"));
    let fleet = builder
        .sizing(SizingPolicy::spare(2, 3))
        .launch()
        .await
        .unwrap();
    assert_eq!(fleet.stats().pool_size, 2);
    fleet.ready().await.unwrap();
    fleet.shutdown().await;
    assert!(provisioner.live_instances().is_empty());
}

#[tokio::test]
async fn test_builder_rejects_invalid_config() {
    let (builder, provisioner, _) = builder(FleetConfig::new(""));
    let result = builder.launch().await;
    assert!(matches!(result, Err(FleetError::InvalidConfig(_))));
    assert_eq!(provisioner.calls().list_images, 0);
}
