//! Host sampler backed by `sysinfo`.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sysinfo::{CpuRefreshKind, Disk, Disks, RefreshKind, System};
use tracing::trace;

use super::sampler::{ResourceSample, ResourceSampler, Watermarks};

/// Default throughput treated as a fully busy disk, in MB/s.
pub const DEFAULT_DISK_CEILING_MB_S: u64 = 200;

const BYTES_PER_MB: u64 = 1_000_000;

/// Disk counters plus the time they were last refreshed.
struct DiskActivity {
    disks: Disks,
    refreshed_at: Instant,
}

/// Samples global CPU usage and the I/O throughput of the disk holding the
/// working folder.
///
/// Disk pressure is bytes read plus written since the previous sample,
/// as a percentage of a configurable throughput ceiling.
pub struct SystemSampler {
    system: Mutex<System>,
    disk: Mutex<DiskActivity>,
    folder: PathBuf,
    ceiling_bytes_per_sec: u64,
    watermarks: Watermarks,
}

impl SystemSampler {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        let folder = folder.into();
        let folder = std::fs::canonicalize(&folder).unwrap_or(folder);
        Self {
            system: Mutex::new(System::new_with_specifics(
                RefreshKind::nothing().with_cpu(CpuRefreshKind::everything()),
            )),
            disk: Mutex::new(DiskActivity {
                disks: Disks::new_with_refreshed_list(),
                refreshed_at: Instant::now(),
            }),
            folder,
            ceiling_bytes_per_sec: DEFAULT_DISK_CEILING_MB_S * BYTES_PER_MB,
            watermarks: Watermarks::default(),
        }
    }

    pub fn with_watermarks(mut self, watermarks: Watermarks) -> Self {
        self.watermarks = watermarks;
        self
    }

    /// Throughput, in MB/s, at which the disk counts as 100% busy.
    pub fn with_disk_ceiling_mb_s(mut self, mb_per_sec: u64) -> Self {
        self.ceiling_bytes_per_sec = mb_per_sec.saturating_mul(BYTES_PER_MB);
        self
    }

    fn cpu_usage(&self) -> f64 {
        let mut system = self.system.lock();
        system.refresh_cpu_all();
        f64::from(system.global_cpu_usage())
    }

    fn disk_busy(&self) -> f64 {
        let mut activity = self.disk.lock();
        activity.disks.refresh(true);
        let now = Instant::now();
        let elapsed = now.duration_since(activity.refreshed_at);
        activity.refreshed_at = now;

        let Some(disk) = disk_for_path(&activity.disks, &self.folder) else {
            return 0.0;
        };
        let usage = disk.usage();
        throughput_percent(
            usage.read_bytes.saturating_add(usage.written_bytes),
            elapsed,
            self.ceiling_bytes_per_sec,
        )
    }
}

/// The disk with the longest mount point that contains `path`.
fn disk_for_path<'a>(disks: &'a Disks, path: &Path) -> Option<&'a Disk> {
    let mut best_match: Option<(&Disk, usize)> = None;

    for disk in disks.list() {
        let mount_point = disk.mount_point();
        if path.starts_with(mount_point) {
            let mount_len = mount_point.as_os_str().len();
            if best_match.is_none_or(|(_, len)| mount_len > len) {
                best_match = Some((disk, mount_len));
            }
        }
    }

    best_match.map(|(disk, _)| disk)
}

/// `bytes` moved over `elapsed`, as a percentage of `ceiling` bytes per
/// second, clamped to `0..=100`.
fn throughput_percent(bytes: u64, elapsed: Duration, ceiling: u64) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 || ceiling == 0 {
        return 0.0;
    }
    let rate = bytes as f64 / secs;
    (rate / ceiling as f64 * 100.0).clamp(0.0, 100.0)
}

impl ResourceSampler for SystemSampler {
    fn sample(&self) -> ResourceSample {
        let sample = ResourceSample::new(self.cpu_usage(), self.disk_busy());
        trace!(cpu_pct = sample.cpu_pct, disk_pct = sample.disk_pct, "Resource sample");
        sample
    }

    fn watermarks(&self) -> Watermarks {
        self.watermarks
    }
}
