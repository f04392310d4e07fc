//! systemd unit generation.
//!
//! `trainbox system install` renders the units below into
//! /etc/systemd/system. The rclone mount carries a circuit breaker: five
//! failed starts inside ten minutes stop the restart loop and fire the alert
//! unit instead of hammering the remote forever.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::HostConfig;

/// Where the operator-facing binary is expected after installation.
pub const TRAINBOX_BIN: &str = "/usr/local/bin/trainbox";

/// Circuit breaker: allowed start attempts per window.
pub const START_LIMIT_BURST: u32 = 5;

/// Circuit breaker: window length in seconds.
pub const START_LIMIT_WINDOW_SECS: u32 = 600;

/// Mount point for the raw rclone remote (inspection and restores).
pub const REMOTE_MOUNT_POINT: &str = "/mnt/trainbox-remote";

/// One rendered unit file.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemdUnit {
    pub name: String,
    pub contents: String,
}

/// Render every unit the host needs.
pub fn render_units(config: &HostConfig) -> Vec<SystemdUnit> {
    let mut units = vec![
        alert_unit(config),
        backup_service(),
        backup_timer(config),
        scrub_service(config),
        scrub_timer(),
    ];
    if let Some(remote) = rclone_remote(&config.backup.repository) {
        units.push(rclone_mount_unit(remote));
    }
    units
}

/// Write units into `dir` (normally /etc/systemd/system).
pub fn install_units(dir: &Path, units: &[SystemdUnit], dry_run: bool) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for unit in units {
        let path = dir.join(&unit.name);
        if dry_run {
            info!("dry-run: would write {}", path.display());
            continue;
        }
        std::fs::write(&path, &unit.contents)
            .with_context(|| format!("writing {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

/// Extract the rclone remote from a restic repository string.
/// `rclone:gdrive:backups` -> `gdrive:backups`.
pub fn rclone_remote(repository: &str) -> Option<&str> {
    repository.strip_prefix("rclone:").filter(|rest| !rest.is_empty())
}

fn alert_unit(config: &HostConfig) -> SystemdUnit {
    let tag = &config.alerts.syslog_tag;
    let contents = format!(
        "[Unit]\n\
         Description=Trainbox failure alert for %i\n\
         \n\
         [Service]\n\
         Type=oneshot\n\
         SyslogIdentifier={tag}\n\
         ExecStart={TRAINBOX_BIN} alert send --severity critical \"systemd unit %i failed\"\n"
    );
    SystemdUnit {
        name: "trainbox-alert@.service".to_string(),
        contents,
    }
}

fn backup_service() -> SystemdUnit {
    let contents = format!(
        "[Unit]\n\
         Description=Trainbox nightly backup\n\
         Wants=network-online.target\n\
         After=network-online.target\n\
         OnFailure=trainbox-alert@%n.service\n\
         \n\
         [Service]\n\
         Type=oneshot\n\
         Nice=10\n\
         IOSchedulingClass=idle\n\
         ExecStart={TRAINBOX_BIN} backup run\n"
    );
    SystemdUnit {
        name: "trainbox-backup.service".to_string(),
        contents,
    }
}

fn backup_timer(config: &HostConfig) -> SystemdUnit {
    let schedule = &config.backup.schedule;
    let contents = format!(
        "[Unit]\n\
         Description=Trainbox nightly backup schedule\n\
         \n\
         [Timer]\n\
         OnCalendar={schedule}\n\
         Persistent=true\n\
         RandomizedDelaySec=600\n\
         \n\
         [Install]\n\
         WantedBy=timers.target\n"
    );
    SystemdUnit {
        name: "trainbox-backup.timer".to_string(),
        contents,
    }
}

fn scrub_service(config: &HostConfig) -> SystemdUnit {
    let mount = &config.host.mount_point;
    let contents = format!(
        "[Unit]\n\
         Description=Trainbox BTRFS scrub of {mount}\n\
         OnFailure=trainbox-alert@%n.service\n\
         \n\
         [Service]\n\
         Type=oneshot\n\
         ExecStart={TRAINBOX_BIN} storage scrub\n"
    );
    SystemdUnit {
        name: "trainbox-scrub.service".to_string(),
        contents,
    }
}

fn scrub_timer() -> SystemdUnit {
    let contents = "[Unit]\n\
         Description=Trainbox monthly scrub schedule\n\
         \n\
         [Timer]\n\
         OnCalendar=monthly\n\
         Persistent=true\n\
         \n\
         [Install]\n\
         WantedBy=timers.target\n"
        .to_string();
    SystemdUnit {
        name: "trainbox-scrub.timer".to_string(),
        contents,
    }
}

fn rclone_mount_unit(remote: &str) -> SystemdUnit {
    let contents = format!(
        "[Unit]\n\
         Description=Trainbox rclone mount of {remote}\n\
         Wants=network-online.target\n\
         After=network-online.target\n\
         StartLimitIntervalSec={START_LIMIT_WINDOW_SECS}\n\
         StartLimitBurst={START_LIMIT_BURST}\n\
         OnFailure=trainbox-alert@%n.service\n\
         \n\
         [Service]\n\
         Type=notify\n\
         ExecStartPre=/usr/bin/mkdir -p {REMOTE_MOUNT_POINT}\n\
         ExecStart=/usr/bin/rclone mount {remote} {REMOTE_MOUNT_POINT} --read-only --vfs-cache-mode minimal\n\
         ExecStop=/bin/fusermount -u {REMOTE_MOUNT_POINT}\n\
         Restart=on-failure\n\
         RestartSec=30\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n"
    );
    SystemdUnit {
        name: "trainbox-rclone-mount.service".to_string(),
        contents,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_rclone() -> HostConfig {
        let mut cfg = HostConfig::default();
        cfg.backup.repository = "rclone:gdrive:trainbox".to_string();
        cfg
    }

    #[test]
    fn rclone_remote_extraction() {
        assert_eq!(rclone_remote("rclone:gdrive:trainbox"), Some("gdrive:trainbox"));
        assert_eq!(rclone_remote("rclone:"), None);
        assert_eq!(rclone_remote("/srv/restic-repo"), None);
        assert_eq!(rclone_remote("s3:bucket/path"), None);
    }

    #[test]
    fn mount_unit_has_circuit_breaker() {
        let units = render_units(&config_with_rclone());
        let mount = units
            .iter()
            .find(|u| u.name == "trainbox-rclone-mount.service")
            .unwrap();
        assert!(mount.contents.contains("StartLimitBurst=5"));
        assert!(mount.contents.contains("StartLimitIntervalSec=600"));
        assert!(mount.contents.contains("Restart=on-failure"));
        assert!(mount.contents.contains("OnFailure=trainbox-alert@%n.service"));
    }

    #[test]
    fn mount_unit_absent_without_rclone_repository() {
        let mut cfg = config_with_rclone();
        cfg.backup.repository = "/srv/restic-repo".to_string();
        let units = render_units(&cfg);
        assert!(!units.iter().any(|u| u.name.contains("rclone")));
    }

    #[test]
    fn backup_timer_uses_configured_schedule() {
        let mut cfg = config_with_rclone();
        cfg.backup.schedule = "*-*-* 04:30:00".to_string();
        let units = render_units(&cfg);
        let timer = units
            .iter()
            .find(|u| u.name == "trainbox-backup.timer")
            .unwrap();
        assert!(timer.contents.contains("OnCalendar=*-*-* 04:30:00"));
        assert!(timer.contents.contains("Persistent=true"));
    }

    #[test]
    fn alert_template_is_instantiated_per_unit() {
        let units = render_units(&config_with_rclone());
        let alert = units
            .iter()
            .find(|u| u.name == "trainbox-alert@.service")
            .unwrap();
        assert!(alert.contents.contains("%i"));
        assert!(alert.contents.contains("--severity critical"));
    }

    #[test]
    fn install_writes_unit_files() {
        let dir = tempfile::tempdir().unwrap();
        let units = render_units(&config_with_rclone());
        let written = install_units(dir.path(), &units, false).unwrap();
        assert_eq!(written.len(), units.len());
        for path in written {
            assert!(path.exists());
        }
    }

    #[test]
    fn install_dry_run_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let units = render_units(&config_with_rclone());
        let written = install_units(dir.path(), &units, true).unwrap();
        assert!(written.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
