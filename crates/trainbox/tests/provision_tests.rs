//! Allocation and validation integration tests.

mod common;

use common::{hdd, healthy_inventory, test_config, test_registry};
use trainbox::probe::HostInventory;
use trainbox::storage::RaidLevel;
use trainbox::validate;

/// The first two users get the documented UID/port pattern.
#[tokio::test]
async fn alice_and_bob_get_sequential_allocations() {
    let registry = test_registry().await;
    let cfg = test_config();

    let alice = registry.create("alice", None, &cfg).await.unwrap();
    let bob = registry.create("bob", None, &cfg).await.unwrap();

    assert_eq!((alice.uid, alice.ssh_port), (2000, 2222));
    assert_eq!((bob.uid, bob.ssh_port), (2001, 2223));
    assert_eq!(alice.vnc_port, 5901);
    assert_eq!(bob.rdp_port, 3391);
    assert_eq!(bob.novnc_port, 6081);
}

/// Removing a user must never shift anyone else's allocation, and the freed
/// slot must never be handed out again.
#[tokio::test]
async fn removals_never_shift_surviving_allocations() {
    let registry = test_registry().await;
    let cfg = test_config();

    registry.create("alice", None, &cfg).await.unwrap();
    registry.create("bob", None, &cfg).await.unwrap();
    let carol = registry.create("carol", None, &cfg).await.unwrap();

    assert!(registry.remove("bob").await.unwrap());
    let dave = registry.create("dave", None, &cfg).await.unwrap();

    assert_eq!(carol.uid, 2002);
    assert_eq!(dave.uid, 2003, "retired slot was recycled");
    assert_eq!(dave.ssh_port, 2225);

    let alice = registry.get("alice").await.unwrap().unwrap();
    assert_eq!(alice.uid, 2000, "existing allocation changed");
}

/// A correctly filled config on a healthy host validates clean.
#[tokio::test]
async fn healthy_host_passes_validation() {
    let registry = test_registry().await;
    let cfg = test_config();
    registry.create("alice", None, &cfg).await.unwrap();
    registry.create("bob", None, &cfg).await.unwrap();
    let users = registry.list().await.unwrap();

    let report = validate::run(&cfg, &users, &healthy_inventory(), &[]);
    assert!(report.passed(), "unexpected errors: {:?}", report.errors);
    assert!(report.render().contains("Errors: 0"));
}

/// raid10 with three spinning disks is a hard error, not a warning.
#[test]
fn raid10_with_three_disks_fails_validation() {
    let mut cfg = test_config();
    cfg.storage.raid_level = RaidLevel::Raid10;
    let inventory = HostInventory {
        disks: Some(vec![hdd("sda", 4096), hdd("sdb", 4096), hdd("sdc", 4096)]),
        mem_total_bytes: Some(128 * 1024 * 1024 * 1024),
        gpus: Some(0),
    };

    let report = validate::run(&cfg, &[], &inventory, &[]);
    assert!(!report.passed());
    assert!(report.errors.iter().any(|e| e.contains("raid10")));
}

/// A memory guarantee above the limit is an error, never a warning.
#[test]
fn memory_guarantee_above_limit_is_an_error() {
    let mut cfg = test_config();
    cfg.workspace.memory_guarantee_mb = 65536;
    cfg.workspace.memory_limit_mb = 32768;

    let report = validate::run(&cfg, &[], &healthy_inventory(), &[]);
    assert!(report.errors.iter().any(|e| e.contains("memory_guarantee_mb")));
}

/// Placeholder admin secrets block deployment.
#[test]
fn placeholder_secrets_block_validation() {
    let mut cfg = test_config();
    cfg.secrets.grafana_admin_password = "changeme".to_string();

    let report = validate::run(&cfg, &[], &healthy_inventory(), &[]);
    assert!(!report.passed());
    assert!(report.errors.iter().any(|e| e.contains("grafana")));
}

/// Port class bases that leave no headroom for the user budget are errors.
#[test]
fn exhausted_port_budget_is_an_error() {
    let mut cfg = test_config();
    cfg.ports.novnc_base = 65530;
    cfg.users.max_users = 32;

    let report = validate::run(&cfg, &[], &healthy_inventory(), &[]);
    assert!(!report.passed());
    assert!(report.errors.iter().any(|e| e.contains("novnc")));
}
