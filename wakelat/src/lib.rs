pub mod histogram;
pub mod probes;
pub mod settings;
pub mod telemetry;

use std::time::Duration;

use anyhow::{Context, Result};
use aya::Ebpf;
use aya::maps::{HashMap, MapData};
use log::{info, warn};
use tokio::signal;
use wakelat_common::HistKey;

use crate::histogram::HistogramSnapshot;
use crate::probes::{Probe, wake_to_run::WakeToRunProbe};
use crate::settings::Settings;

pub struct WakeLatEngine {
    pub settings: Settings,
    bpf: Ebpf,
}

impl WakeLatEngine {
    pub fn new(settings: Settings, bytecode: &[u8]) -> Result<Self> {
        bump_memlock_rlimit();
        let bpf = Ebpf::load(bytecode)?;
        Ok(Self { settings, bpf })
    }

    /// Attach the probe and read the histogram out periodically until
    /// Ctrl-C. With `once`, collect for a single interval, dump, and
    /// exit.
    pub async fn run(mut self, once: bool) -> Result<()> {
        WakeToRunProbe.attach(&mut self.bpf)?;

        let hist: HashMap<MapData, HistKey, u64> = HashMap::try_from(
            self.bpf
                .take_map("LATENCY_HIST")
                .context("Failed to get LATENCY_HIST map")?,
        )?;

        let interval = Duration::from_secs(self.settings.readout_interval_secs());
        let max_tasks = self.settings.max_rendered_tasks();

        if once {
            tokio::time::sleep(interval).await;
            report(&hist, &HistogramSnapshot::default(), max_tasks);
            telemetry::shutdown_metrics();
            return Ok(());
        }

        info!("Monitoring active. Press Ctrl-C to exit.");

        let mut previous = HistogramSnapshot::default();
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; skip it so the first
        // readout covers a full interval.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    previous = report(&hist, &previous, max_tasks);
                }
                _ = signal::ctrl_c() => break,
            }
        }

        info!("Exiting...");
        report(&hist, &previous, max_tasks);
        telemetry::shutdown_metrics();
        Ok(())
    }
}

/// Snapshot the kernel map, print the rendered table, and export the
/// per-cell growth since the previous snapshot. Returns the snapshot
/// to diff against next time.
fn report(
    hist: &HashMap<MapData, HistKey, u64>,
    previous: &HistogramSnapshot,
    max_tasks: usize,
) -> HistogramSnapshot {
    let snapshot = histogram::snapshot(hist);
    if snapshot.is_empty() {
        info!("No wake-to-run samples above the noise threshold yet");
        return snapshot;
    }

    println!("{}", snapshot.render(histogram::resolve_comm, max_tasks));

    for (task_id, bucket, count) in snapshot.delta_since(previous) {
        let comm =
            histogram::resolve_comm(task_id).unwrap_or_else(|| String::from("<unknown>"));
        telemetry::record_latency_bucket(task_id, &comm, bucket, count);
    }

    snapshot
}

fn bump_memlock_rlimit() {
    // eBPF maps live in locked kernel memory; lift RLIMIT_MEMLOCK so
    // loading doesn't fail on pre-5.11 memcg-less kernels.
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        warn!("Failed to increase rlimit");
    }
}
