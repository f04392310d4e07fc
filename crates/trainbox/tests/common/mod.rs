//! Test utilities and common setup.

use trainbox::config::HostConfig;
use trainbox::probe::{BlockDevice, HostInventory};
use trainbox::registry::{Database, UserRegistry};

/// A config that passes validation: real domain, real secrets.
pub fn test_config() -> HostConfig {
    let mut config = HostConfig::default();
    config.host.domain = "ml.example.org".to_string();
    config.secrets.grafana_admin_password = "grafana-49wGxq2K".to_string();
    config.secrets.guacamole_password = "guac-72bGxSmQ".to_string();
    config
}

/// One spinning disk of the given size.
pub fn hdd(name: &str, size_gib: u64) -> BlockDevice {
    BlockDevice {
        name: name.to_string(),
        size_bytes: size_gib * 1024 * 1024 * 1024,
        rotational: true,
    }
}

/// A healthy host: two 4 TiB spinning disks, 128 GiB RAM, no GPUs.
pub fn healthy_inventory() -> HostInventory {
    HostInventory {
        disks: Some(vec![hdd("sda", 4096), hdd("sdb", 4096)]),
        mem_total_bytes: Some(128 * 1024 * 1024 * 1024),
        gpus: Some(0),
    }
}

/// Registry backed by an in-memory database.
pub async fn test_registry() -> UserRegistry {
    let db = Database::in_memory().await.unwrap();
    UserRegistry::new(db.pool().clone())
}
