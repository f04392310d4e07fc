//! BTRFS storage pool operations.
//!
//! Per-user homes are BTRFS subvolumes under `<mount_point>/homes` so they
//! can be quota-limited and deleted atomically. Everything shells out to the
//! `btrfs` CLI the same way the rest of the tool drives external commands.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::HostConfig;

/// BTRFS data profile for the storage pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaidLevel {
    #[default]
    Single,
    Raid0,
    Raid1,
    Raid10,
}

impl RaidLevel {
    /// Minimum number of member devices the profile needs.
    pub fn min_disks(&self) -> usize {
        match self {
            RaidLevel::Single => 1,
            RaidLevel::Raid0 | RaidLevel::Raid1 => 2,
            RaidLevel::Raid10 => 4,
        }
    }

    /// True when the profile survives a device failure.
    pub fn is_redundant(&self) -> bool {
        matches!(self, RaidLevel::Raid1 | RaidLevel::Raid10)
    }
}

impl fmt::Display for RaidLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RaidLevel::Single => "single",
            RaidLevel::Raid0 => "raid0",
            RaidLevel::Raid1 => "raid1",
            RaidLevel::Raid10 => "raid10",
        };
        write!(f, "{name}")
    }
}

impl FromStr for RaidLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" => Ok(RaidLevel::Single),
            "raid0" => Ok(RaidLevel::Raid0),
            "raid1" => Ok(RaidLevel::Raid1),
            "raid10" => Ok(RaidLevel::Raid10),
            other => Err(format!(
                "unknown raid level '{other}' (expected single, raid0, raid1 or raid10)"
            )),
        }
    }
}

/// Handle on the storage pool for mutating operations.
pub struct StorageOps {
    mount_point: PathBuf,
    quota_gb: u64,
    dry_run: bool,
}

impl StorageOps {
    pub fn new(config: &HostConfig, dry_run: bool) -> Self {
        Self {
            mount_point: PathBuf::from(&config.host.mount_point),
            quota_gb: config.storage.user_quota_gb,
            dry_run,
        }
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    pub fn home_path(&self, username: &str) -> PathBuf {
        self.mount_point.join("homes").join(username)
    }

    pub fn home_exists(&self, username: &str) -> bool {
        self.home_path(username).exists()
    }

    /// True when the mount point exists and is a directory. Operations that
    /// touch the pool check this first so a laptop running the CLI against a
    /// copied config degrades gracefully.
    pub fn pool_available(&self) -> bool {
        self.mount_point.is_dir()
    }

    /// Create the fixed directory layout under the mount point.
    pub async fn ensure_layout(&self) -> Result<()> {
        for dir in ["homes", "datasets", "infra"] {
            let path = self.mount_point.join(dir);
            if self.dry_run {
                info!("dry-run: would create {}", path.display());
                continue;
            }
            tokio::fs::create_dir_all(&path)
                .await
                .with_context(|| format!("creating {}", path.display()))?;
        }
        Ok(())
    }

    /// Create a quota-limited home subvolume owned by the user's UID.
    pub async fn create_home(&self, username: &str, uid: u32) -> Result<PathBuf> {
        let path = self.home_path(username);
        if path.exists() {
            anyhow::bail!("home subvolume {} already exists", path.display());
        }

        self.run("btrfs", &["subvolume", "create", &path_str(&path)])
            .await?;
        if self.quota_gb > 0 {
            let limit = format!("{}G", self.quota_gb);
            self.run("btrfs", &["qgroup", "limit", &limit, &path_str(&path)])
                .await?;
        }
        let owner = format!("{uid}:{uid}");
        self.run("chown", &[&owner, &path_str(&path)]).await?;
        self.run("chmod", &["750", &path_str(&path)]).await?;

        info!(user = username, path = %path.display(), "created home subvolume");
        Ok(path)
    }

    /// Delete a user's home subvolume and everything in it.
    pub async fn delete_home(&self, username: &str) -> Result<()> {
        let path = self.home_path(username);
        if !path.exists() {
            debug!(user = username, "home subvolume already absent");
            return Ok(());
        }
        self.run("btrfs", &["subvolume", "delete", &path_str(&path)])
            .await?;
        info!(user = username, path = %path.display(), "deleted home subvolume");
        Ok(())
    }

    /// Raw `btrfs filesystem usage` report for the pool.
    pub async fn usage(&self) -> Result<String> {
        self.capture("btrfs", &["filesystem", "usage", &path_str(&self.mount_point)])
            .await
    }

    /// Kick off a background scrub of the pool.
    pub async fn scrub_start(&self) -> Result<()> {
        self.run("btrfs", &["scrub", "start", &path_str(&self.mount_point)])
            .await
    }

    /// Progress report for a running or finished scrub.
    pub async fn scrub_status(&self) -> Result<String> {
        self.capture("btrfs", &["scrub", "status", &path_str(&self.mount_point)])
            .await
    }

    async fn run(&self, cmd: &str, args: &[&str]) -> Result<()> {
        if self.dry_run {
            info!("dry-run: would run {cmd} {}", args.join(" "));
            return Ok(());
        }
        run_cmd(cmd, args).await.map(|_| ())
    }

    async fn capture(&self, cmd: &str, args: &[&str]) -> Result<String> {
        run_cmd(cmd, args).await
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Run an external command, returning trimmed stdout or a descriptive error
/// carrying the exit code and stderr.
pub async fn run_cmd(cmd: &str, args: &[&str]) -> Result<String> {
    debug!("running {cmd} {}", args.join(" "));
    let output = Command::new(cmd)
        .args(args)
        .output()
        .await
        .with_context(|| format!("failed to execute {cmd}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "{cmd} {} failed with {}: {}",
            args.join(" "),
            output.status,
            stderr.trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raid_level_parses_case_insensitively() {
        assert_eq!("RAID10".parse::<RaidLevel>().unwrap(), RaidLevel::Raid10);
        assert_eq!("single".parse::<RaidLevel>().unwrap(), RaidLevel::Single);
        assert!("raid6".parse::<RaidLevel>().is_err());
    }

    #[test]
    fn raid_level_display_roundtrips() {
        for level in [
            RaidLevel::Single,
            RaidLevel::Raid0,
            RaidLevel::Raid1,
            RaidLevel::Raid10,
        ] {
            assert_eq!(level.to_string().parse::<RaidLevel>().unwrap(), level);
        }
    }

    #[test]
    fn raid_minimums() {
        assert_eq!(RaidLevel::Single.min_disks(), 1);
        assert_eq!(RaidLevel::Raid0.min_disks(), 2);
        assert_eq!(RaidLevel::Raid1.min_disks(), 2);
        assert_eq!(RaidLevel::Raid10.min_disks(), 4);
        assert!(RaidLevel::Raid10.is_redundant());
        assert!(!RaidLevel::Raid0.is_redundant());
    }

    #[test]
    fn raid_level_serde_uses_lowercase() {
        let level: RaidLevel = serde_json::from_str("\"raid10\"").unwrap();
        assert_eq!(level, RaidLevel::Raid10);
        assert_eq!(serde_json::to_string(&RaidLevel::Raid1).unwrap(), "\"raid1\"");
    }

    #[test]
    fn home_paths_are_per_user() {
        let mut cfg = HostConfig::default();
        cfg.host.mount_point = "/srv/tank".to_string();
        let ops = StorageOps::new(&cfg, true);
        assert_eq!(
            ops.home_path("alice"),
            PathBuf::from("/srv/tank/homes/alice")
        );
    }
}
