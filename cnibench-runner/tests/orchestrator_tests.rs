use cnibench_core::{Error, Phase, PluginId, ProcessId};
use cnibench_namespace::{mock_process_ns, NamespaceOps, MOCK_ORIGINAL_NS};
use cnibench_runner::*;

fn bridge() -> PluginId {
    PluginId::new("bridge").unwrap()
}

fn orchestrator(mocks: &MockSet) -> Orchestrator {
    Orchestrator::new(Collaborators::mock(mocks)).unwrap()
}

/// Invariants that hold after every iteration, whatever its outcome
fn assert_clean(mocks: &MockSet) {
    assert_eq!(mocks.namespaces.active().unwrap(), MOCK_ORIGINAL_NS);
    assert_eq!(mocks.spawner.live(), 0);
    assert_eq!(
        mocks.journal.count("spawn "),
        mocks.journal.count("terminate ")
    );
    assert_eq!(mocks.journal.count("resolve "), mocks.journal.count("release ") - released_original(mocks));
}

fn released_original(mocks: &MockSet) -> usize {
    mocks
        .journal
        .count(&format!("release {}", MOCK_ORIGINAL_NS.inode()))
}

fn failed_phase(result: Result<IterationReport, Error>) -> Phase {
    result.unwrap_err().phase().expect("lifecycle error carries its phase")
}

#[tokio::test]
async fn test_successful_iteration() {
    let mocks = MockSet::new();
    let mut orchestrator = orchestrator(&mocks);

    let report = orchestrator
        .run_iteration(&bridge(), IterationOptions::verbose())
        .await
        .unwrap();

    assert_eq!(report.plugin, bridge());
    assert_eq!(report.pid, ProcessId::from_raw(1000));
    assert_eq!(report.interface, "eth0");
    assert_eq!(report.ip.to_string(), "10.88.0.3");
    assert_eq!(report.prefix_len, 16);
    assert_eq!(report.links, ["device->lo", "veth->eth0"]);
    assert_eq!(report.probe.as_deref(), Some("{\"origin\":\"10.88.0.2\"}"));

    assert_clean(&mocks);
    assert_eq!(mocks.attachment.attached().await, 0);
    assert!(!orchestrator.is_poisoned());
}

#[tokio::test]
async fn test_canonical_order() {
    let mocks = MockSet::new();
    let mut orchestrator = orchestrator(&mocks);
    orchestrator
        .run_iteration(&bridge(), IterationOptions::verbose())
        .await
        .unwrap();

    let journal = &mocks.journal;
    let target = mock_process_ns(ProcessId::from_raw(1000)).inode();
    let original = MOCK_ORIGINAL_NS.inode();
    let at = |entry: String| {
        journal
            .position(&entry)
            .unwrap_or_else(|| panic!("missing {entry}: {:?}", journal.entries()))
    };

    let order = [
        at("spawn 1000".to_string()),
        at("load bridge".to_string()),
        at("attach 1000".to_string()),
        at("resolve 1000".to_string()),
        at(format!("activate {target}")),
        at(format!("links {target}")),
        at(format!("probe {target}")),
        at(format!("activate {original}")),
        at("detach 1000".to_string()),
        at(format!("release {target}")),
        at("terminate 1000".to_string()),
    ];
    assert!(order.windows(2).all(|pair| pair[0] < pair[1]), "{:?}", journal.entries());
}

#[tokio::test]
async fn test_spawn_failure_needs_no_cleanup() {
    let mocks = MockSet::new();
    mocks.spawner.fail_spawn(true);
    let mut orchestrator = orchestrator(&mocks);

    let result = orchestrator
        .run_iteration(&bridge(), IterationOptions::verbose())
        .await;

    assert_eq!(failed_phase(result), Phase::Spawn);
    assert_eq!(mocks.journal.count("load"), 0);
    assert_clean(&mocks);
}

#[tokio::test]
async fn test_load_failure_kills_process() {
    let mocks = MockSet::new();
    mocks.attachment.fail_load(true).await;
    let mut orchestrator = orchestrator(&mocks);

    let result = orchestrator
        .run_iteration(&bridge(), IterationOptions::verbose())
        .await;

    assert_eq!(failed_phase(result), Phase::LoadConfig);
    assert_eq!(mocks.journal.count("attach"), 0);
    assert_eq!(mocks.journal.count("detach"), 0);
    assert_eq!(mocks.journal.count("terminate 1000"), 1);
    assert_clean(&mocks);
}

#[tokio::test]
async fn test_attach_failure_skips_detach() {
    let mocks = MockSet::new();
    mocks.attachment.fail_attach(true).await;
    let mut orchestrator = orchestrator(&mocks);

    let err = orchestrator
        .run_iteration(&bridge(), IterationOptions::verbose())
        .await
        .unwrap_err();

    assert_eq!(err.phase(), Some(Phase::Attach));
    assert!(err.to_string().starts_with("[bridge] attach failed"));
    assert_eq!(mocks.journal.count("detach"), 0);
    assert_eq!(mocks.journal.count("resolve"), 0);
    assert_clean(&mocks);
}

#[tokio::test]
async fn test_missing_interface_cleans_up() {
    let mocks = MockSet::new();
    mocks.attachment.omit_interface(true).await;
    let mut orchestrator = orchestrator(&mocks);

    let err = orchestrator
        .run_iteration(&bridge(), IterationOptions::verbose())
        .await
        .unwrap_err();

    assert_eq!(err.phase(), Some(Phase::ExtractAddress));
    assert!(err.to_string().contains("eth0"));
    assert_eq!(mocks.journal.count("detach 1000"), 1);
    assert!(mocks.journal.position("detach 1000") < mocks.journal.position("terminate 1000"));
    assert_eq!(mocks.attachment.attached().await, 0);
    assert_clean(&mocks);
}

#[tokio::test]
async fn test_resolve_failure_cleans_up() {
    let mocks = MockSet::new();
    mocks.namespaces.fail_resolve(true);
    let mut orchestrator = orchestrator(&mocks);

    let result = orchestrator
        .run_iteration(&bridge(), IterationOptions::verbose())
        .await;

    assert_eq!(failed_phase(result), Phase::ResolveNamespace);
    assert_eq!(mocks.journal.count("detach 1000"), 1);
    assert_clean(&mocks);
}

#[tokio::test]
async fn test_activate_failure_cleans_up() {
    let mocks = MockSet::new();
    mocks.namespaces.fail_activate(true);
    let mut orchestrator = orchestrator(&mocks);

    let result = orchestrator
        .run_iteration(&bridge(), IterationOptions::verbose())
        .await;

    assert_eq!(failed_phase(result), Phase::ActivateNamespace);
    assert_eq!(mocks.journal.count("links"), 0);
    assert_eq!(mocks.journal.count("detach 1000"), 1);
    assert_clean(&mocks);
}

#[tokio::test]
async fn test_diagnostic_failures_are_not_fatal() {
    let mocks = MockSet::new();
    mocks.diagnostics.fail_links(true);
    mocks.diagnostics.fail_probe(true);
    let mut orchestrator = orchestrator(&mocks);

    let report = orchestrator
        .run_iteration(&bridge(), IterationOptions::verbose())
        .await
        .unwrap();

    assert!(report.links.is_empty());
    assert!(report.probe.is_none());
    assert_eq!(mocks.journal.count("detach 1000"), 1);
    assert_clean(&mocks);
}

#[tokio::test]
async fn test_timing_options_skip_diagnostics() {
    let mocks = MockSet::new();
    let mut orchestrator = orchestrator(&mocks);

    let report = orchestrator
        .run_iteration(&bridge(), IterationOptions::timing())
        .await
        .unwrap();

    assert!(report.links.is_empty());
    assert_eq!(mocks.journal.count("links"), 0);
    assert_eq!(mocks.journal.count("probe"), 0);
    // Namespace switching still happens every iteration
    assert_eq!(mocks.journal.count("resolve 1000"), 1);
    assert_eq!(mocks.namespaces.activations(), 2);
}

#[tokio::test]
async fn test_detach_failure_fails_iteration() {
    let mocks = MockSet::new();
    mocks.attachment.fail_detach(true).await;
    let mut orchestrator = orchestrator(&mocks);

    let result = orchestrator
        .run_iteration(&bridge(), IterationOptions::verbose())
        .await;

    assert_eq!(failed_phase(result), Phase::Detach);
    assert_eq!(mocks.journal.count("terminate 1000"), 1);
    assert_clean(&mocks);
}

#[tokio::test]
async fn test_restore_failure_poisons_orchestrator() {
    let mocks = MockSet::new();
    let mut orchestrator = orchestrator(&mocks);
    mocks.namespaces.fail_restore(true);

    let result = orchestrator
        .run_iteration(&bridge(), IterationOptions::verbose())
        .await;
    assert_eq!(failed_phase(result), Phase::RestoreNamespace);
    assert!(orchestrator.is_poisoned());

    // Detach and terminate still ran
    assert_eq!(mocks.journal.count("detach 1000"), 1);
    assert_eq!(mocks.spawner.live(), 0);

    mocks.namespaces.fail_restore(false);
    let result = orchestrator
        .run_iteration(&bridge(), IterationOptions::verbose())
        .await;
    assert_eq!(failed_phase(result), Phase::RestoreNamespace);
    assert_eq!(mocks.spawner.spawned(), 1);
}

#[tokio::test]
async fn test_every_plugin_runs_despite_failures() {
    let mocks = MockSet::new();
    let mut orchestrator = orchestrator(&mocks);
    let plugins = ["bridge", "ipvlan", "macvlan"].map(|p| PluginId::new(p).unwrap());

    let mut outcomes = Vec::new();
    for plugin in &plugins {
        let broken = plugin.as_str() == "ipvlan";
        mocks.attachment.fail_attach(broken).await;
        outcomes.push(
            orchestrator
                .run_iteration(plugin, IterationOptions::verbose())
                .await
                .is_ok(),
        );
    }

    assert_eq!(outcomes, [true, false, true]);
    assert_eq!(mocks.spawner.spawned(), 3);
    assert_eq!(mocks.journal.count("detach"), 2);
    assert_clean(&mocks);
}

#[tokio::test]
async fn test_measure_five_iterations() {
    let mocks = MockSet::new();
    let mut orchestrator = orchestrator(&mocks);

    let report = measure(&mut orchestrator, &bridge(), 5, IterationOptions::timing())
        .await
        .unwrap();

    assert_eq!(report.iterations, 5);
    assert_eq!(report.attach.len(), 5);
    assert_eq!(report.detach.len(), 5);
    assert_eq!(report.attach_summary().count, 5);

    assert_eq!(mocks.spawner.spawned(), 5);
    assert_eq!(mocks.attachment.loads().await, 5);
    assert_eq!(mocks.journal.count("resolve"), 5);
    assert_eq!(mocks.journal.count("attach"), 5);
    assert_eq!(mocks.journal.count("detach"), 5);
    assert_clean(&mocks);
}

#[tokio::test]
async fn test_measure_stops_at_first_failure() {
    let mocks = MockSet::new();
    mocks.attachment.omit_interface(true).await;
    let mut orchestrator = orchestrator(&mocks);

    let err = measure(&mut orchestrator, &bridge(), 5, IterationOptions::timing())
        .await
        .unwrap_err();

    assert_eq!(err.phase(), Some(Phase::ExtractAddress));
    assert_eq!(mocks.spawner.spawned(), 1);
    assert_clean(&mocks);
}

#[tokio::test]
async fn test_measure_rejects_zero_iterations() {
    let mocks = MockSet::new();
    let mut orchestrator = orchestrator(&mocks);

    let err = measure(&mut orchestrator, &bridge(), 0, IterationOptions::timing())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfig { .. }));
    assert_eq!(mocks.spawner.spawned(), 0);
}

#[tokio::test]
async fn test_report_serializes() {
    let mocks = MockSet::new();
    let mut orchestrator = orchestrator(&mocks);
    let report = measure(&mut orchestrator, &bridge(), 2, IterationOptions::timing())
        .await
        .unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["plugin"], "bridge");
    assert_eq!(json["attach"].as_array().unwrap().len(), 2);
}
