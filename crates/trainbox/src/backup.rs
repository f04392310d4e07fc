//! Restic backups of the user homes.
//!
//! Only `homes/` is backed up: datasets are re-downloadable and container
//! state is disposable. Repository and retention come from the config; the
//! repository password stays in a root-only file restic reads itself.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{BackupSection, HostConfig};

const BACKUP_TAG: &str = "trainbox";

/// One restic snapshot, as reported by `restic snapshots --json`.
#[derive(Debug, Clone, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub short_id: String,
    pub time: DateTime<Utc>,
    pub hostname: String,
    pub paths: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Drives restic against the configured repository.
pub struct ResticRunner {
    repository: String,
    password_file: String,
    excludes: Vec<String>,
    keep_daily: u32,
    keep_weekly: u32,
    keep_monthly: u32,
    source: PathBuf,
    dry_run: bool,
}

impl ResticRunner {
    pub fn from_config(config: &HostConfig, dry_run: bool) -> Result<Self> {
        if !config.backups_enabled() {
            anyhow::bail!("backup.repository is not configured");
        }
        let BackupSection {
            repository,
            password_file,
            excludes,
            keep_daily,
            keep_weekly,
            keep_monthly,
            ..
        } = config.backup.clone();
        Ok(Self {
            repository,
            password_file,
            excludes,
            keep_daily,
            keep_weekly,
            keep_monthly,
            source: config.homes_dir(),
            dry_run,
        })
    }

    /// Arguments for the backup run. Split out for testability.
    fn backup_args(&self) -> Vec<String> {
        let mut args = vec![
            "backup".to_string(),
            self.source.to_string_lossy().to_string(),
            "--tag".to_string(),
            BACKUP_TAG.to_string(),
        ];
        for pattern in &self.excludes {
            args.push("--exclude".to_string());
            args.push(pattern.clone());
        }
        if self.dry_run {
            args.push("--dry-run".to_string());
        }
        args
    }

    /// Arguments for the retention pass.
    fn forget_args(&self) -> Vec<String> {
        let mut args = vec![
            "forget".to_string(),
            "--tag".to_string(),
            BACKUP_TAG.to_string(),
            "--keep-daily".to_string(),
            self.keep_daily.to_string(),
            "--keep-weekly".to_string(),
            self.keep_weekly.to_string(),
            "--keep-monthly".to_string(),
            self.keep_monthly.to_string(),
            "--prune".to_string(),
        ];
        if self.dry_run {
            args.push("--dry-run".to_string());
        }
        args
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new("restic");
        cmd.args(args)
            .env("RESTIC_REPOSITORY", &self.repository)
            .env("RESTIC_PASSWORD_FILE", &self.password_file);
        cmd
    }

    /// Initialize the repository if it does not exist yet.
    pub async fn ensure_repository(&self) -> Result<()> {
        // `cat config` exits non-zero when the repository is missing.
        let probe = self
            .command(&["cat".to_string(), "config".to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .context("running restic cat config")?;
        if probe.success() {
            return Ok(());
        }
        info!(repository = %self.repository, "initializing restic repository");
        self.run_streamed(&["init".to_string()]).await
    }

    /// Back up the homes directory, then apply the retention policy.
    pub async fn run_backup(&self) -> Result<()> {
        if !self.source.is_dir() {
            anyhow::bail!("backup source {} does not exist", self.source.display());
        }
        self.ensure_repository().await?;

        info!(source = %self.source.display(), "starting backup");
        self.run_streamed(&self.backup_args()).await?;
        info!("applying retention policy");
        self.run_streamed(&self.forget_args()).await?;
        Ok(())
    }

    /// List snapshots in the repository.
    pub async fn snapshots(&self) -> Result<Vec<Snapshot>> {
        let output = self
            .command(&[
                "snapshots".to_string(),
                "--tag".to_string(),
                BACKUP_TAG.to_string(),
                "--json".to_string(),
            ])
            .output()
            .await
            .context("running restic snapshots")?;
        if !output.status.success() {
            anyhow::bail!(
                "restic snapshots failed with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        parse_snapshots(&String::from_utf8_lossy(&output.stdout))
    }

    /// Verify repository integrity.
    pub async fn check(&self) -> Result<()> {
        self.run_streamed(&["check".to_string()]).await
    }

    async fn run_streamed(&self, args: &[String]) -> Result<()> {
        debug!("running restic {}", args.join(" "));
        let status = self
            .command(args)
            .status()
            .await
            .context("running restic")?;
        if !status.success() {
            anyhow::bail!("restic {} failed with {status}", args.join(" "));
        }
        Ok(())
    }
}

fn parse_snapshots(raw: &str) -> Result<Vec<Snapshot>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(trimmed).context("parsing restic snapshots output")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> ResticRunner {
        let mut cfg = HostConfig::default();
        cfg.backup.repository = "rclone:gdrive:trainbox".to_string();
        cfg.backup.excludes = vec!["**/.cache".to_string(), "**/wandb".to_string()];
        ResticRunner::from_config(&cfg, false).unwrap()
    }

    #[test]
    fn from_config_requires_a_repository() {
        let cfg = HostConfig::default();
        assert!(ResticRunner::from_config(&cfg, false).is_err());
    }

    #[test]
    fn backup_args_carry_source_tag_and_excludes() {
        let args = runner().backup_args();
        assert_eq!(args[0], "backup");
        assert_eq!(args[1], "/srv/tank/homes");
        assert!(args.windows(2).any(|w| w == ["--tag", "trainbox"]));
        assert!(args.windows(2).any(|w| w == ["--exclude", "**/.cache"]));
        assert!(args.windows(2).any(|w| w == ["--exclude", "**/wandb"]));
        assert!(!args.contains(&"--dry-run".to_string()));
    }

    #[test]
    fn dry_run_is_passed_through() {
        let mut cfg = HostConfig::default();
        cfg.backup.repository = "rclone:gdrive:trainbox".to_string();
        let runner = ResticRunner::from_config(&cfg, true).unwrap();
        assert!(runner.backup_args().contains(&"--dry-run".to_string()));
        assert!(runner.forget_args().contains(&"--dry-run".to_string()));
    }

    #[test]
    fn forget_args_carry_retention() {
        let args = runner().forget_args();
        assert!(args.windows(2).any(|w| w == ["--keep-daily", "7"]));
        assert!(args.windows(2).any(|w| w == ["--keep-weekly", "4"]));
        assert!(args.windows(2).any(|w| w == ["--keep-monthly", "6"]));
        assert!(args.contains(&"--prune".to_string()));
    }

    #[test]
    fn parse_snapshots_handles_real_output() {
        let raw = r#"[
            {
                "time": "2026-02-11T03:00:01.123456789Z",
                "tree": "deadbeef",
                "paths": ["/srv/tank/homes"],
                "hostname": "gpubox",
                "username": "root",
                "tags": ["trainbox"],
                "id": "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
                "short_id": "01234567"
            }
        ]"#;
        let snapshots = parse_snapshots(raw).unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].short_id, "01234567");
        assert_eq!(snapshots[0].paths, vec!["/srv/tank/homes"]);
        assert_eq!(snapshots[0].tags, vec!["trainbox"]);
    }

    #[test]
    fn parse_snapshots_tolerates_empty_output() {
        assert!(parse_snapshots("").unwrap().is_empty());
        assert!(parse_snapshots("[]").unwrap().is_empty());
    }
}
