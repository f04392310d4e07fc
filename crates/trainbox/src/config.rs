//! Typed host configuration.
//!
//! One TOML file describes the whole machine: storage layout, workspace
//! shape, port bases, secrets, backup schedule, alerting. The file is loaded
//! through the `config` crate so every field can also be overridden with
//! `TRAINBOX__SECTION__FIELD` environment variables.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::runtime::RuntimeType;
use crate::storage::RaidLevel;

/// Root configuration for a training host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub host: HostSection,
    pub storage: StorageSection,
    pub workspace: WorkspaceSection,
    pub ports: PortsSection,
    pub users: UsersSection,
    pub secrets: SecretsSection,
    pub backup: BackupSection,
    pub alerts: AlertsSection,
    pub runtime: RuntimeSection,
    pub paths: PathsSection,
    pub logging: LoggingSection,
}

/// Identity of the machine itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSection {
    /// Public DNS domain. Per-user web endpoints become `<user>.<domain>`.
    pub domain: String,
    /// Mount point of the bulk storage pool.
    pub mount_point: String,
    /// Timezone passed into every workspace container.
    pub timezone: String,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            domain: String::new(),
            mount_point: "/srv/tank".to_string(),
            timezone: "Etc/UTC".to_string(),
        }
    }
}

/// Bulk storage pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// BTRFS data profile for the pool.
    pub raid_level: RaidLevel,
    /// Per-user home quota in GiB. 0 disables quotas.
    pub user_quota_gb: u64,
    /// Optional SSD cache devices (informational, surfaced in status output).
    pub cache_devices: Vec<String>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            raid_level: RaidLevel::Single,
            user_quota_gb: 500,
            cache_devices: Vec::new(),
        }
    }
}

/// Shape of one user workspace container.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceSection {
    /// Container image every workspace runs.
    pub image: String,
    /// Memory reservation per workspace, in MiB.
    pub memory_guarantee_mb: u64,
    /// Hard memory limit per workspace, in MiB.
    pub memory_limit_mb: u64,
    /// Swap allowance on top of the memory limit, in MiB.
    pub swap_limit_mb: u64,
    /// CPU limit per workspace, in cores.
    pub cpu_limit: f64,
    /// Size of /dev/shm, in MiB. DataLoader workers need a real value here.
    pub shm_size_mb: u64,
    /// GPUs reserved per workspace. 0 means no GPU reservation.
    pub gpu_count: u32,
    /// Desktop resolution handed to the VNC server.
    pub vnc_geometry: String,
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            image: "trainbox/workspace:latest".to_string(),
            memory_guarantee_mb: 16384,
            memory_limit_mb: 32768,
            swap_limit_mb: 8192,
            cpu_limit: 8.0,
            shm_size_mb: 2048,
            gpu_count: 0,
            vnc_geometry: "1920x1080".to_string(),
        }
    }
}

/// Base port for every published service class. A user in slot `n` gets
/// `base + n` for each class.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsSection {
    pub ssh_base: u16,
    pub vnc_base: u16,
    pub rdp_base: u16,
    pub novnc_base: u16,
}

impl Default for PortsSection {
    fn default() -> Self {
        Self {
            ssh_base: 2222,
            vnc_base: 5901,
            rdp_base: 3390,
            novnc_base: 6080,
        }
    }
}

impl PortsSection {
    /// Every port class with its base, in stable display order.
    pub fn classes(&self) -> [(&'static str, u16); 4] {
        [
            ("ssh", self.ssh_base),
            ("vnc", self.vnc_base),
            ("rdp", self.rdp_base),
            ("novnc", self.novnc_base),
        ]
    }
}

/// User account policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsersSection {
    /// UID assigned to the first user. Slot `n` gets `first_uid + n`.
    pub first_uid: u32,
    /// Hard cap on concurrently registered users.
    pub max_users: u32,
}

impl Default for UsersSection {
    fn default() -> Self {
        Self {
            first_uid: 2000,
            max_users: 32,
        }
    }
}

/// Infrastructure credentials. Placeholder values fail validation; the env
/// file generator replaces placeholders with random secrets instead of ever
/// writing them out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsSection {
    pub grafana_admin_password: String,
    pub guacamole_password: String,
    /// Initial password for new workspace users. Leave as the placeholder to
    /// have a random one generated per user.
    pub default_user_password: String,
}

impl Default for SecretsSection {
    fn default() -> Self {
        Self {
            grafana_admin_password: "CHANGE_ME".to_string(),
            guacamole_password: "CHANGE_ME".to_string(),
            default_user_password: "CHANGE_ME".to_string(),
        }
    }
}

/// Restic backup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSection {
    /// Restic repository, e.g. `rclone:gdrive:trainbox`. Empty disables backups.
    pub repository: String,
    /// File holding the repository password.
    pub password_file: String,
    /// Glob patterns excluded from every backup run.
    pub excludes: Vec<String>,
    pub keep_daily: u32,
    pub keep_weekly: u32,
    pub keep_monthly: u32,
    /// systemd OnCalendar expression for the nightly backup timer.
    pub schedule: String,
}

impl Default for BackupSection {
    fn default() -> Self {
        Self {
            repository: String::new(),
            password_file: "/etc/trainbox/restic.password".to_string(),
            excludes: vec![
                "**/.cache".to_string(),
                "**/.venv".to_string(),
                "**/node_modules".to_string(),
                "**/__pycache__".to_string(),
                "**/wandb".to_string(),
            ],
            keep_daily: 7,
            keep_weekly: 4,
            keep_monthly: 6,
            schedule: "*-*-* 03:00:00".to_string(),
        }
    }
}

/// Operator alerting. Telegram delivery is best effort; every alert is also
/// written to the local log under `syslog_tag`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsSection {
    pub enabled: bool,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub syslog_tag: String,
}

impl Default for AlertsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            telegram_bot_token: None,
            telegram_chat_id: None,
            syslog_tag: "trainbox-alert".to_string(),
        }
    }
}

/// Container runtime selection and compose file locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    /// Force a runtime instead of auto-detecting (docker preferred).
    pub runtime: Option<RuntimeType>,
    /// Override the runtime binary path.
    pub binary: Option<String>,
    /// Where the generated compose manifest lives.
    pub compose_file: String,
    /// Companion env file holding secrets referenced from the manifest.
    pub env_file: String,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            runtime: None,
            binary: None,
            compose_file: "docker-compose.yml".to_string(),
            env_file: ".env".to_string(),
        }
    }
}

/// Filesystem locations for trainbox's own state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    /// Data directory (allocation registry). Defaults to the XDG data dir.
    pub data_dir: Option<String>,
    /// State directory (logs, scratch). Defaults to the XDG state dir.
    pub state_dir: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Default level when RUST_LOG is unset: error, warn, info, debug, trace.
    pub level: String,
    /// Optional log file. When set, logs are written as JSON lines.
    pub file: Option<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl HostConfig {
    /// Directory holding per-user home subvolumes.
    pub fn homes_dir(&self) -> PathBuf {
        PathBuf::from(&self.host.mount_point).join("homes")
    }

    /// Directory holding shared read-only datasets.
    pub fn datasets_dir(&self) -> PathBuf {
        PathBuf::from(&self.host.mount_point).join("datasets")
    }

    /// Directory holding infrastructure service state (prometheus, grafana).
    pub fn infra_dir(&self) -> PathBuf {
        PathBuf::from(&self.host.mount_point).join("infra")
    }

    /// True when a backup repository is configured.
    pub fn backups_enabled(&self) -> bool {
        !self.backup.repository.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = HostConfig::default();
        assert_eq!(cfg.users.first_uid, 2000);
        assert_eq!(cfg.ports.ssh_base, 2222);
        assert_eq!(cfg.host.mount_point, "/srv/tank");
        assert_eq!(cfg.storage.raid_level, RaidLevel::Single);
        assert!(!cfg.backups_enabled());
    }

    #[test]
    fn port_classes_are_in_display_order() {
        let ports = PortsSection::default();
        let names: Vec<&str> = ports.classes().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["ssh", "vnc", "rdp", "novnc"]);
    }

    #[test]
    fn derived_dirs_hang_off_mount_point() {
        let mut cfg = HostConfig::default();
        cfg.host.mount_point = "/mnt/pool".to_string();
        assert_eq!(cfg.homes_dir(), PathBuf::from("/mnt/pool/homes"));
        assert_eq!(cfg.datasets_dir(), PathBuf::from("/mnt/pool/datasets"));
    }

    #[test]
    fn toml_roundtrip_keeps_sections() {
        let cfg = HostConfig::default();
        let raw = toml::to_string(&cfg).unwrap();
        let back: HostConfig = toml::from_str(&raw).unwrap();
        assert_eq!(back.ports.novnc_base, cfg.ports.novnc_base);
        assert_eq!(back.workspace.image, cfg.workspace.image);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let raw = r#"
            [host]
            domain = "ml.example.org"

            [users]
            first_uid = 3000
        "#;
        let cfg: HostConfig = toml::from_str(raw).unwrap();
        assert_eq!(cfg.host.domain, "ml.example.org");
        assert_eq!(cfg.host.mount_point, "/srv/tank");
        assert_eq!(cfg.users.first_uid, 3000);
        assert_eq!(cfg.users.max_users, 32);
    }
}
