//! Wake-to-run latency probe.
//!
//! Attaches the wake tracker to `sched:sched_wakeup` (and
//! `sched_wakeup_new`) and the latency aggregator to
//! `sched:sched_switch`. All correlation, filtering, and bucketing
//! happens kernel-side; userspace only reads the histogram map.
//!
//! ## Use Cases
//! - Detecting scheduling delay and CPU contention
//! - Priority-inversion symptom hunting
//! - Noisy neighbor detection in shared environments

use anyhow::{Context, Result};
use aya::Ebpf;
use aya::programs::TracePoint;
use log::info;
use wakelat_common::NOISE_THRESHOLD_NS;

use crate::probes::{Probe, tracepoint_exists};

pub struct WakeToRunProbe;

impl Probe for WakeToRunProbe {
    fn attach(&self, bpf: &mut Ebpf) -> Result<()> {
        let wakeup: &mut TracePoint = bpf
            .program_mut("sched_wakeup")
            .context("Failed to find sched_wakeup program")?
            .try_into()?;
        wakeup.load()?;
        wakeup.attach("sched", "sched_wakeup")?;
        info!("Attached tracepoint: sched/sched_wakeup");

        // Freshly forked tasks announce their first dispatch through
        // sched_wakeup_new; same record layout, same program.
        if tracepoint_exists("sched", "sched_wakeup_new") {
            wakeup.attach("sched", "sched_wakeup_new")?;
            info!("Attached tracepoint: sched/sched_wakeup_new");
        }

        let switch: &mut TracePoint = bpf
            .program_mut("sched_switch")
            .context("Failed to find sched_switch program")?
            .try_into()?;
        switch.load()?;
        switch.attach("sched", "sched_switch")?;
        info!("Attached tracepoint: sched/sched_switch");

        info!(
            "WakeToRunProbe attached (noise threshold={}ms)",
            NOISE_THRESHOLD_NS / 1_000_000
        );

        Ok(())
    }
}
