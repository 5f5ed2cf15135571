use std::time::Duration;

use cnibench_core::{Journal, ProcessId};
use cnibench_namespace::*;

fn sleep_spawner() -> UnshareSpawner {
    UnshareSpawner::new(
        vec!["sleep".to_string(), "30".to_string()],
        Duration::from_millis(200),
    )
    .unwrap()
}

#[test]
fn test_host_current_handle() {
    let handle = HostNamespaces.current().unwrap();
    assert_eq!(handle.id(), HostNamespaces.active().unwrap());
    assert_eq!(handle.origin(), std::path::Path::new(THREAD_SELF_NETNS));
}

#[test]
fn test_namespace_id_of_process_path() {
    let id = NamespaceId::of_path(ProcessId::current().netns_path()).unwrap();
    assert_eq!(id, NamespaceId::of_current_thread().unwrap());
    assert!(id.to_string().starts_with("net:["));
}

#[test]
fn test_mock_namespaces_roundtrip_through_trait_object() {
    let journal = Journal::new();
    let ns: Box<dyn NamespaceOps> = Box::new(MockNamespaces::with_journal(journal.clone()));

    let mut original = ns.current().unwrap();
    let mut target = ns.from_process(ProcessId::from_raw(1234)).unwrap();
    assert_eq!(target.id(), mock_process_ns(ProcessId::from_raw(1234)));

    ns.activate(&target).unwrap();
    assert_eq!(ns.active().unwrap(), target.id());

    ns.activate(&original).unwrap();
    ns.release(&mut target);
    ns.release(&mut original);

    assert_eq!(ns.active().unwrap(), MOCK_ORIGINAL_NS);
    assert_eq!(journal.count("activate"), 2);
    assert_eq!(journal.count("release"), 2);
}

#[tokio::test]
async fn test_mock_process_netns_path() {
    let spawner = MockSpawner::new();
    let process = spawner.spawn().await.unwrap();

    assert_eq!(
        process.netns_path(),
        std::path::PathBuf::from(format!("/proc/{}/ns/net", process.pid()))
    );
}

#[tokio::test]
#[ignore] // Requires root
async fn test_unshared_process_has_private_namespace() {
    let mut process = sleep_spawner().spawn().await.unwrap();
    assert!(process.is_running());

    let mut handle = HostNamespaces.from_process(process.pid()).unwrap();
    assert_ne!(handle.id(), NamespaceId::of_current_thread().unwrap());

    HostNamespaces.release(&mut handle);
    process.terminate().await.unwrap();
    assert!(!process.is_running());

    // Second terminate is a no-op
    process.terminate().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires root
async fn test_terminated_process_namespace_unresolvable() {
    let mut process = sleep_spawner().spawn().await.unwrap();
    let pid = process.pid();
    process.terminate().await.unwrap();

    assert!(HostNamespaces.from_process(pid).is_err());
}

#[test]
#[ignore] // Requires root
fn test_switch_into_process_namespace_and_back() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let original = HostNamespaces.current().unwrap();
        let mut process = sleep_spawner().spawn().await.unwrap();
        let target = HostNamespaces.from_process(process.pid()).unwrap();

        HostNamespaces.activate(&target).unwrap();
        let links = list_links().await.unwrap();
        // A fresh namespace holds nothing but loopback
        assert_eq!(links.len(), 1);
        assert!(links[0].is_loopback());

        HostNamespaces.activate(&original).unwrap();
        assert_eq!(HostNamespaces.active().unwrap(), original.id());

        drop(target);
        process.terminate().await.unwrap();
    });
}
