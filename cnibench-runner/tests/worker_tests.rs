use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use cnibench_core::{BenchConfig, Phase, PluginId};
use cnibench_namespace::{NamespaceOps, MOCK_ORIGINAL_NS};
use cnibench_runner::*;

fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

async fn mock_worker(mocks: &MockSet) -> NetnsWorker {
    let mocks = mocks.clone();
    NetnsWorker::start_with(move || Ok(Collaborators::mock(&mocks)))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_bridge_scenario_through_worker() {
    let mocks = MockSet::new();
    let worker = mock_worker(&mocks).await;
    let bridge = PluginId::new("bridge").unwrap();

    let report = worker
        .create_network(&bridge, IterationOptions::verbose())
        .await
        .unwrap();

    assert_eq!(report.plugin, bridge);
    assert!(report.ip.to_string().starts_with("10.88.0."));
    assert!(report.links.contains(&"veth->eth0".to_string()));
    assert!(report.probe.is_some());

    worker.shutdown().await.unwrap();

    assert_eq!(mocks.namespaces.active().unwrap(), MOCK_ORIGINAL_NS);
    assert_eq!(mocks.spawner.live(), 0);
    // The original handle is released once, when the worker winds down
    assert_eq!(
        mocks
            .journal
            .count(&format!("release {}", MOCK_ORIGINAL_NS.inode())),
        1
    );
}

#[tokio::test]
async fn test_benchmark_through_worker() {
    let mocks = MockSet::new();
    let worker = mock_worker(&mocks).await;
    let plugin = PluginId::new("macvlan").unwrap();

    let report = worker
        .benchmark(&plugin, 5, IterationOptions::timing())
        .await
        .unwrap();

    assert_eq!(report.attach.len(), 5);
    assert_eq!(report.detach.len(), 5);
    assert_eq!(mocks.spawner.spawned(), 5);
    assert_eq!(mocks.attachment.loads().await, 5);
    assert_eq!(mocks.spawner.live(), 0);
}

#[tokio::test]
async fn test_worker_keeps_serving_after_plugin_error() {
    let mocks = MockSet::new();
    let worker = mock_worker(&mocks).await;
    let plugin = PluginId::new("bridge").unwrap();

    mocks.attachment.fail_attach(true).await;
    let err = worker
        .create_network(&plugin, IterationOptions::verbose())
        .await
        .unwrap_err();
    assert_eq!(err.phase(), Some(Phase::Attach));

    mocks.attachment.fail_attach(false).await;
    assert!(worker
        .create_network(&plugin, IterationOptions::verbose())
        .await
        .is_ok());
}

#[tokio::test]
async fn test_dropped_caller_does_not_leak() {
    let mocks = MockSet::new();
    let worker = mock_worker(&mocks).await;
    let plugin = PluginId::new("bridge").unwrap();

    // Abandon a request as soon as it is queued
    let abandoned = worker.create_network(&plugin, IterationOptions::verbose());
    let _ = tokio::time::timeout(Duration::ZERO, abandoned).await;

    worker.shutdown().await.unwrap();
    assert_eq!(mocks.spawner.live(), 0);
    assert_eq!(mocks.namespaces.active().unwrap(), MOCK_ORIGINAL_NS);
}

#[tokio::test]
#[ignore] // Requires root
async fn test_real_namespace_with_fake_plugin() {
    if !is_root() {
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let conf_dir = dir.path().join("net.d");
    let bin_dir = dir.path().join("bin");
    std::fs::create_dir(&conf_dir).unwrap();
    std::fs::create_dir(&bin_dir).unwrap();

    std::fs::write(
        conf_dir.join("fake.conf"),
        r#"{"cniVersion":"0.4.0","name":"fake-net","type":"fake"}"#,
    )
    .unwrap();
    // Creates a real dummy link in the target namespace on ADD and removes it on DEL
    let plugin = bin_dir.join("fake");
    std::fs::write(
        &plugin,
        r#"#!/bin/sh
cat > /dev/null
if [ "$CNI_COMMAND" = ADD ]; then
  nsenter --net="$CNI_NETNS" ip link add "$CNI_IFNAME" type dummy || exit 1
  printf '{"cniVersion":"0.4.0","interfaces":[{"name":"%s","sandbox":"%s"}],"ips":[{"address":"192.0.2.10/24","interface":0}]}' "$CNI_IFNAME" "$CNI_NETNS"
else
  nsenter --net="$CNI_NETNS" ip link del "$CNI_IFNAME" 2>/dev/null
fi
exit 0
"#,
    )
    .unwrap();
    std::fs::set_permissions(&plugin, std::fs::Permissions::from_mode(0o755)).unwrap();

    let config = BenchConfig::default()
        .with_conf_dir(&conf_dir)
        .with_plugin_dirs(vec![bin_dir])
        .with_loopback(false)
        .with_probe_endpoint("http://127.0.0.1:9/ip");
    let worker = NetnsWorker::start(&config).await.unwrap();

    let report = worker
        .create_network(&PluginId::new("fake").unwrap(), IterationOptions::verbose())
        .await
        .unwrap();

    assert_eq!(report.ip.to_string(), "192.0.2.10");
    assert_eq!(report.links, ["device->lo", "dummy->eth0"]);
    assert!(report.probe.is_none());

    // The anchor process is gone once the iteration returns
    let proc_dir = std::path::PathBuf::from(format!("/proc/{}", report.pid.as_raw()));
    assert!(!proc_dir.exists(), "{} still exists", proc_dir.display());

    worker.shutdown().await.unwrap();
}
