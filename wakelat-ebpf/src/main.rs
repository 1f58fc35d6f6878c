//! Wake-to-run latency engine.
//!
//! Two tracepoint programs over two shared maps:
//! - `sched_wakeup` records the timestamp at which a task became
//!   runnable (last wakeup wins).
//! - `sched_switch` consumes that timestamp for the incoming task,
//!   filters out sub-threshold noise, and bumps the per-task log2
//!   histogram cell.
//!
//! Both programs run concurrently on every CPU in non-sleeping
//! contexts: single-key map operations and atomic adds only, no locks,
//! no allocation, no per-event logging. Failures (full map, unreadable
//! record) are dropped; nothing here may ever impede the task whose
//! scheduling triggered the event.

#![no_std]
#![no_main]

use aya_ebpf::{
    helpers::bpf_ktime_get_ns,
    macros::{map, tracepoint},
    maps::HashMap,
    programs::TracePointContext,
};
use core::sync::atomic::{AtomicU64, Ordering};
use wakelat_common::{HistKey, MAX_HIST_ENTRIES, MAX_TRACKED_TASKS, classify_latency};

// Tracepoint record offsets, from
// /sys/kernel/tracing/events/sched/<name>/format. sched_wakeup and
// sched_wakeup_new carry the woken pid at the same offset, so one
// program serves both.
const WAKEUP_PID_OFFSET: usize = 24;
const SWITCH_NEXT_PID_OFFSET: usize = 56;

/// Most recent wakeup timestamp per task id, consumed by `sched_switch`.
#[map]
static TASK_WAKE_AT: HashMap<u32, u64> = HashMap::with_max_entries(MAX_TRACKED_TASKS, 0);

/// (task, bucket) -> occurrence count. Cells are created lazily and
/// never deleted while the session is active.
#[map]
static LATENCY_HIST: HashMap<HistKey, u64> = HashMap::with_max_entries(MAX_HIST_ENTRIES, 0);

#[tracepoint]
pub fn sched_wakeup(ctx: TracePointContext) -> u32 {
    match try_sched_wakeup(&ctx) {
        Ok(ret) => ret,
        Err(ret) => ret,
    }
}

#[tracepoint]
pub fn sched_switch(ctx: TracePointContext) -> u32 {
    match try_sched_switch(&ctx) {
        Ok(ret) => ret,
        Err(ret) => ret,
    }
}

#[inline(always)]
fn try_sched_wakeup(ctx: &TracePointContext) -> Result<u32, u32> {
    let task_id = unsafe { ctx.read_at::<i32>(WAKEUP_PID_OFFSET) }.map_err(|_| 1u32)? as u32;
    let now = unsafe { bpf_ktime_get_ns() };

    // Overwrite any earlier wakeup: a task woken twice before running
    // is charged from the most recent wakeup. A full map drops the
    // sample instead of surfacing an error.
    let _ = TASK_WAKE_AT.insert(&task_id, &now, 0);

    Ok(0)
}

#[inline(always)]
fn try_sched_switch(ctx: &TracePointContext) -> Result<u32, u32> {
    let task_id = unsafe { ctx.read_at::<i32>(SWITCH_NEXT_PID_OFFSET) }.map_err(|_| 1u32)? as u32;

    let wake_at = match unsafe { TASK_WAKE_AT.get(&task_id) } {
        Some(ts) => *ts,
        // Task was already running, predates tracing, or its wake
        // record was dropped under capacity pressure. Expected gap,
        // not an error.
        None => return Ok(0),
    };

    // Consume the record before anything else so it can never be
    // charged against a later, unrelated dispatch of the same task.
    let _ = TASK_WAKE_AT.remove(&task_id);

    let now = unsafe { bpf_ktime_get_ns() };
    // Clock anomalies clamp to zero latency, which the noise filter
    // then discards.
    let delta = now.saturating_sub(wake_at);

    let bucket = match classify_latency(delta) {
        Some(bucket) => bucket,
        None => return Ok(0),
    };

    let key = HistKey { task_id, bucket };
    match LATENCY_HIST.get_ptr_mut(&key) {
        Some(count) => {
            // Many CPUs race on the same cell; atomic add, never a
            // separate read and write.
            let count = unsafe { &*(count as *const AtomicU64) };
            count.fetch_add(1, Ordering::Relaxed);
        }
        None => {
            // First observation of this (task, bucket). Full map
            // drops the sample.
            let _ = LATENCY_HIST.insert(&key, &1, 0);
        }
    }

    Ok(0)
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
