//! Host resource snapshot for the dashboard: CPU, memory, disks and
//! software RAID, read from procfs. A source that cannot be read leaves its
//! section empty.

use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::config::MonitorConfig;

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ResourceSnapshot {
    pub cpu: f64,
    pub mem: MemoryUsage,
    pub disks: Vec<DiskUsage>,
    pub raid: Vec<RaidArray>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Default)]
pub struct MemoryUsage {
    pub percent: f64,
    pub used: u64,
    pub total: u64,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct DiskUsage {
    pub device: String,
    pub mountpoint: String,
    pub fstype: String,
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percent: f64,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct RaidArray {
    pub name: String,
    pub level: String,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MountEntry {
    pub device: String,
    pub mountpoint: String,
    pub fstype: String,
}

pub struct ResourceMonitor {
    proc_root: PathBuf,
    cpu_sample: Duration,
    min_disk_bytes: u64,
}

impl ResourceMonitor {
    pub fn new(config: &MonitorConfig) -> Self {
        Self::with_proc_root("/proc", config)
    }

    pub fn with_proc_root(proc_root: impl Into<PathBuf>, config: &MonitorConfig) -> Self {
        Self {
            proc_root: proc_root.into(),
            cpu_sample: Duration::from_millis(config.cpu_sample_ms),
            min_disk_bytes: config.min_disk_bytes,
        }
    }

    async fn read_proc(&self, name: &str) -> Option<String> {
        match tokio::fs::read_to_string(self.proc_root.join(name)).await {
            Ok(content) => Some(content),
            Err(e) => {
                tracing::debug!("Cannot read {}/{}: {}", self.proc_root.display(), name, e);
                None
            }
        }
    }

    pub async fn snapshot(&self) -> ResourceSnapshot {
        let cpu = self.cpu_percent().await;
        let mem = self
            .read_proc("meminfo")
            .await
            .and_then(|raw| parse_meminfo(&raw))
            .unwrap_or_default();
        let disks = match self.read_proc("mounts").await {
            Some(raw) => {
                let mounts = parse_mounts(&raw);
                let min_bytes = self.min_disk_bytes;
                // statvfs blocks
                tokio::task::spawn_blocking(move || collect_disks(&mounts, min_bytes))
                    .await
                    .unwrap_or_else(|e| {
                        tracing::warn!("Disk usage task failed: {}", e);
                        Vec::new()
                    })
            }
            None => Vec::new(),
        };
        let raid = self
            .read_proc("mdstat")
            .await
            .map(|raw| parse_mdstat(&raw))
            .unwrap_or_default();

        ResourceSnapshot { cpu, mem, disks, raid }
    }

    async fn cpu_percent(&self) -> f64 {
        let Some(first) = self.read_proc("stat").await.and_then(|raw| parse_cpu_line(&raw)) else {
            return 0.0;
        };
        tokio::time::sleep(self.cpu_sample).await;
        let Some(second) = self.read_proc("stat").await.and_then(|raw| parse_cpu_line(&raw)) else {
            return 0.0;
        };
        cpu_busy_percent(first, second)
    }
}

/// Aggregate `cpu` line of /proc/stat
pub fn parse_cpu_line(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|f| f.parse().ok())
        .collect();
    if fields.len() < 4 {
        return None;
    }
    // idle + iowait
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    Some(CpuTimes {
        idle,
        total: fields.iter().sum(),
    })
}

pub fn cpu_busy_percent(before: CpuTimes, after: CpuTimes) -> f64 {
    let total = after.total.saturating_sub(before.total);
    if total == 0 {
        return 0.0;
    }
    let idle = after.idle.saturating_sub(before.idle).min(total);
    round1((total - idle) as f64 * 100.0 / total as f64)
}

pub fn parse_meminfo(raw: &str) -> Option<MemoryUsage> {
    let field = |name: &str| -> Option<u64> {
        raw.lines()
            .find(|l| l.starts_with(name) && l[name.len()..].starts_with(':'))
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|v| v.parse::<u64>().ok())
            .map(|kb| kb * 1024)
    };

    let total = field("MemTotal")?;
    let available = field("MemAvailable")
        .or_else(|| Some(field("MemFree")? + field("Buffers").unwrap_or(0) + field("Cached").unwrap_or(0)))?;
    let used = total.saturating_sub(available);
    let percent = if total == 0 { 0.0 } else { round1(used as f64 * 100.0 / total as f64) };
    Some(MemoryUsage { percent, used, total })
}

pub fn parse_mounts(raw: &str) -> Vec<MountEntry> {
    raw.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            Some(MountEntry {
                device: unescape_mount(parts.next()?),
                mountpoint: unescape_mount(parts.next()?),
                fstype: parts.next()?.to_string(),
            })
        })
        .collect()
}

// /proc/mounts encodes space, tab, newline and backslash as octal escapes
fn unescape_mount(field: &str) -> String {
    field
        .replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

/// Arrays from /proc/mdstat. The status is the array state, marked degraded
/// when the member map on the following line shows a missing disk.
pub fn parse_mdstat(raw: &str) -> Vec<RaidArray> {
    let lines: Vec<&str> = raw.lines().collect();
    let mut arrays = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if !line.starts_with("md") {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        let name = parts.first().copied().unwrap_or_default().to_string();
        let state = parts.get(2).copied().unwrap_or_default();
        let level = parts
            .get(3)
            .filter(|p| p.starts_with("raid") || **p == "linear")
            .copied()
            .unwrap_or_default()
            .to_string();

        let degraded = lines
            .get(i + 1)
            .and_then(|next| next.rsplit('[').next())
            .map(|map| map.contains('_'))
            .unwrap_or(false);

        let status = if degraded {
            format!("{}, degraded", state)
        } else {
            state.to_string()
        };
        arrays.push(RaidArray { name, level, status });
    }
    arrays
}

fn collect_disks(mounts: &[MountEntry], min_bytes: u64) -> Vec<DiskUsage> {
    let mut seen = HashSet::new();
    let mut disks = Vec::new();

    for mount in mounts {
        let Some(usage) = disk_usage(Path::new(&mount.mountpoint)) else {
            continue;
        };
        if usage.0 < min_bytes || !seen.insert(mount.device.clone()) {
            continue;
        }
        let (total, used, free) = usage;
        let percent = if used + free == 0 { 0.0 } else { round1(used as f64 * 100.0 / (used + free) as f64) };
        disks.push(DiskUsage {
            device: mount.device.clone(),
            mountpoint: mount.mountpoint.clone(),
            fstype: mount.fstype.clone(),
            total,
            used,
            free,
            percent,
        });
    }
    disks
}

/// (total, used, free-for-unprivileged) in bytes
fn disk_usage(mountpoint: &Path) -> Option<(u64, u64, u64)> {
    let stat = nix::sys::statvfs::statvfs(mountpoint).ok()?;
    let frsize = stat.fragment_size() as u64;
    let total = stat.blocks() as u64 * frsize;
    let used = (stat.blocks() as u64).saturating_sub(stat.blocks_free() as u64) * frsize;
    let free = stat.blocks_available() as u64 * frsize;
    Some((total, used, free))
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
