//! Manifest and secrets-file generation integration tests.

mod common;

use common::{test_config, test_registry};
use trainbox::compose;

/// Infrastructure services come first, then one service per active user.
#[tokio::test]
async fn manifest_contains_infra_and_every_user() {
    let registry = test_registry().await;
    let cfg = test_config();
    registry.create("alice", None, &cfg).await.unwrap();
    registry.create("bob", None, &cfg).await.unwrap();
    let users = registry.list_active().await.unwrap();

    let manifest = compose::build_manifest(&cfg, &users);
    let names = manifest.services.names();

    assert_eq!(
        &names[..7],
        &[
            "traefik",
            "prometheus",
            "grafana",
            "dozzle",
            "filebrowser",
            "guacd",
            "guacamole"
        ]
    );
    assert_eq!(&names[7..], &["alice", "bob"]);

    let alice = manifest.services.get("alice").unwrap();
    assert!(alice.ports.contains(&"2222:22".to_string()));
    assert!(alice.ports.contains(&"5901:5901".to_string()));
}

/// Rendering the same state twice produces byte-identical YAML.
#[tokio::test]
async fn manifest_rendering_is_deterministic() {
    let registry = test_registry().await;
    let cfg = test_config();
    registry.create("alice", None, &cfg).await.unwrap();
    registry.create("bob", None, &cfg).await.unwrap();
    let users = registry.list_active().await.unwrap();

    let first = compose::render(&compose::build_manifest(&cfg, &users)).unwrap();
    let second = compose::render(&compose::build_manifest(&cfg, &users)).unwrap();
    assert_eq!(first, second);
}

/// Deactivating a user retires their container but keeps the allocation, so
/// nobody else's ports move.
#[tokio::test]
async fn deactivated_users_leave_the_manifest() {
    let registry = test_registry().await;
    let cfg = test_config();
    registry.create("alice", None, &cfg).await.unwrap();
    registry.create("bob", None, &cfg).await.unwrap();
    registry.set_active("alice", false).await.unwrap();

    let active = registry.list_active().await.unwrap();
    let manifest = compose::build_manifest(&cfg, &active);
    assert!(manifest.services.get("alice").is_none());

    let bob = manifest.services.get("bob").unwrap();
    assert!(bob.ports.contains(&"2223:22".to_string()));
}

/// The secrets env file is written once and never overwritten.
#[tokio::test]
async fn env_file_is_never_overwritten() {
    let registry = test_registry().await;
    let cfg = test_config();
    registry.create("alice", None, &cfg).await.unwrap();
    let users = registry.list_active().await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let env_path = dir.path().join(".env");

    assert!(compose::ensure_env_file(&env_path, &cfg, &users).unwrap());
    let first = std::fs::read_to_string(&env_path).unwrap();
    assert!(first.contains("ALICE_PASSWORD="));

    assert!(!compose::ensure_env_file(&env_path, &cfg, &users).unwrap());
    let second = std::fs::read_to_string(&env_path).unwrap();
    assert_eq!(first, second, "existing secrets were rewritten");
}

/// GPU reservations only appear when the config asks for GPUs.
#[tokio::test]
async fn gpu_reservations_follow_config() {
    let registry = test_registry().await;
    let mut cfg = test_config();
    registry.create("alice", None, &cfg).await.unwrap();
    let users = registry.list_active().await.unwrap();

    let without = compose::render(&compose::build_manifest(&cfg, &users)).unwrap();
    assert!(!without.contains("driver: nvidia"));

    cfg.workspace.gpu_count = 2;
    let with = compose::render(&compose::build_manifest(&cfg, &users)).unwrap();
    assert!(with.contains("driver: nvidia"));
    assert!(with.contains("count: 2"));
}
