//! Read-only host probes.
//!
//! Everything here inspects the machine without changing it: block devices
//! from /sys/block, memory from /proc/meminfo, GPUs from nvidia-smi, free
//! ports by binding. Validation consumes the results; probe failures surface
//! as `None` so callers can degrade to warnings instead of aborting.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use tokio::fs;
use tokio::process::Command;

use crate::storage::RaidLevel;

const SECTOR_SIZE: u64 = 512;

/// One physical block device.
#[derive(Debug, Clone, Serialize)]
pub struct BlockDevice {
    pub name: String,
    pub size_bytes: u64,
    /// True for spinning disks (queue/rotational == 1).
    pub rotational: bool,
}

impl BlockDevice {
    pub fn size_gib(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

/// Snapshot of the hardware the validator reasons about. `None` fields mean
/// the probe could not run, not that the resource is absent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HostInventory {
    pub disks: Option<Vec<BlockDevice>>,
    pub mem_total_bytes: Option<u64>,
    pub gpus: Option<u32>,
}

impl HostInventory {
    /// Spinning disks only; SSD cache devices do not count toward RAID math.
    pub fn hdds(&self) -> Option<Vec<&BlockDevice>> {
        self.disks
            .as_ref()
            .map(|disks| disks.iter().filter(|d| d.rotational).collect())
    }
}

/// Collect everything, tolerating individual probe failures.
pub async fn gather() -> HostInventory {
    let disks = match detect_block_devices().await {
        Ok(disks) => Some(disks),
        Err(err) => {
            tracing::warn!("block device probe failed: {err:#}");
            None
        }
    };
    let mem_total_bytes = match read_mem_total().await {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            tracing::warn!("memory probe failed: {err:#}");
            None
        }
    };
    let gpus = match detect_gpus().await {
        Ok(count) => Some(count),
        Err(err) => {
            tracing::debug!("gpu probe failed: {err:#}");
            None
        }
    };

    HostInventory {
        disks,
        mem_total_bytes,
        gpus,
    }
}

/// Enumerate physical block devices under /sys/block.
pub async fn detect_block_devices() -> Result<Vec<BlockDevice>> {
    let mut entries = fs::read_dir("/sys/block")
        .await
        .context("reading /sys/block")?;
    let mut devices = Vec::new();

    while let Some(entry) = entries.next_entry().await.context("reading /sys/block")? {
        let name = entry.file_name().to_string_lossy().to_string();
        if !is_physical_disk(&name) {
            continue;
        }
        let base = Path::new("/sys/block").join(&name);
        let size = fs::read_to_string(base.join("size")).await.ok();
        let rotational = fs::read_to_string(base.join("queue/rotational"))
            .await
            .ok();
        if let Some(device) = parse_block_device(&name, size.as_deref(), rotational.as_deref()) {
            devices.push(device);
        }
    }

    devices.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(devices)
}

/// Virtual and removable device names that never back a storage pool.
fn is_physical_disk(name: &str) -> bool {
    const SKIP: [&str; 8] = ["loop", "ram", "zram", "dm-", "sr", "fd", "nbd", "md"];
    !SKIP.iter().any(|prefix| name.starts_with(prefix))
}

fn parse_block_device(
    name: &str,
    size: Option<&str>,
    rotational: Option<&str>,
) -> Option<BlockDevice> {
    let sectors: u64 = size?.trim().parse().ok()?;
    if sectors == 0 {
        return None;
    }
    let rotational = rotational.map(|r| r.trim() == "1").unwrap_or(false);
    Some(BlockDevice {
        name: name.to_string(),
        size_bytes: sectors.saturating_mul(SECTOR_SIZE),
        rotational,
    })
}

/// Total system memory in bytes from /proc/meminfo.
pub async fn read_mem_total() -> Result<u64> {
    let contents = fs::read_to_string("/proc/meminfo")
        .await
        .context("reading /proc/meminfo")?;
    parse_mem_total(&contents).context("missing MemTotal in /proc/meminfo")
}

fn parse_mem_total(contents: &str) -> Option<u64> {
    let line = contents.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb.saturating_mul(1024))
}

/// Count GPUs via `nvidia-smi -L`. A missing binary means zero GPUs, not an
/// error; only an unexpected failure of an installed nvidia-smi is one.
pub async fn detect_gpus() -> Result<u32> {
    let output = match Command::new("nvidia-smi").arg("-L").output().await {
        Ok(output) => output,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err).context("running nvidia-smi"),
    };
    if !output.status.success() {
        anyhow::bail!(
            "nvidia-smi -L exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(parse_gpu_list(&String::from_utf8_lossy(&output.stdout)))
}

fn parse_gpu_list(stdout: &str) -> u32 {
    stdout
        .lines()
        .filter(|line| line.trim_start().starts_with("GPU "))
        .count() as u32
}

/// Check whether a TCP port can currently be bound on all interfaces.
pub fn is_port_free(port: u16) -> bool {
    std::net::TcpListener::bind(("0.0.0.0", port)).is_ok()
}

/// Usable capacity of a BTRFS pool built from `disks` at the given profile.
///
/// Mirrors halve raw capacity; striped and single profiles use all of it.
/// RAID10 and RAID1 are additionally bounded by the smallest member since a
/// lopsided pool cannot mirror past its smallest device.
pub fn estimate_usable_bytes(level: RaidLevel, disks: &[&BlockDevice]) -> u64 {
    if disks.is_empty() {
        return 0;
    }
    let raw: u64 = disks.iter().map(|d| d.size_bytes).sum();
    let smallest = disks.iter().map(|d| d.size_bytes).min().unwrap_or(0);
    match level {
        RaidLevel::Single | RaidLevel::Raid0 => raw,
        RaidLevel::Raid1 => smallest.saturating_mul(disks.len() as u64) / 2,
        RaidLevel::Raid10 => {
            let pairs = (disks.len() / 2) as u64;
            smallest.saturating_mul(pairs)
        }
    }
}
