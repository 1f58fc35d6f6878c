//! Userspace view of the kernel latency histogram.
//!
//! The kernel side owns all writes; this module only copies the map
//! out, diffs successive copies for export, and renders a per-task
//! log2 distribution table.

use std::collections::BTreeMap;

use aya::maps::{HashMap, MapData};
use wakelat_common::{BUCKET_COUNT, HistKey, MAX_BUCKET};

const BAR_WIDTH: u64 = 40;

/// Point-in-time copy of the kernel histogram map. Counts are
/// cumulative for the tracing session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistogramSnapshot {
    tasks: BTreeMap<u32, [u64; BUCKET_COUNT]>,
}

impl HistogramSnapshot {
    pub fn from_cells(cells: impl IntoIterator<Item = (HistKey, u64)>) -> Self {
        let mut tasks: BTreeMap<u32, [u64; BUCKET_COUNT]> = BTreeMap::new();
        for (key, count) in cells {
            let buckets = tasks.entry(key.task_id).or_insert([0; BUCKET_COUNT]);
            // An out-of-range bucket can only come from a foreign map;
            // skip it rather than panic.
            if let Some(slot) = buckets.get_mut(key.bucket as usize) {
                *slot = count;
            }
        }
        Self { tasks }
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn total_events(&self) -> u64 {
        self.tasks.values().flatten().sum()
    }

    /// Cells that grew since `prev`, as (task, bucket, growth).
    ///
    /// Kernel counters only increase within a session, so the
    /// subtraction saturates instead of trusting that invariant
    /// against a snapshot from a different session.
    pub fn delta_since(&self, prev: &Self) -> Vec<(u32, u32, u64)> {
        let mut out = Vec::new();
        for (task_id, buckets) in &self.tasks {
            let before = prev.tasks.get(task_id);
            for (bucket, count) in buckets.iter().enumerate() {
                let old = before.map_or(0, |b| b[bucket]);
                let grown = count.saturating_sub(old);
                if grown > 0 {
                    out.push((*task_id, bucket as u32, grown));
                }
            }
        }
        out
    }

    /// Render up to `max_tasks` tasks (busiest first) as runqlat-style
    /// distribution tables.
    pub fn render<F>(&self, comm_of: F, max_tasks: usize) -> String
    where
        F: Fn(u32) -> Option<String>,
    {
        let mut ordered: Vec<(u32, &[u64; BUCKET_COUNT], u64)> = self
            .tasks
            .iter()
            .map(|(id, buckets)| (*id, buckets, buckets.iter().sum()))
            .collect();
        ordered.sort_by(|a, b| b.2.cmp(&a.2).then(a.0.cmp(&b.0)));
        ordered.truncate(max_tasks);

        let mut out = String::new();
        for (task_id, buckets, total) in ordered {
            let comm = comm_of(task_id).unwrap_or_else(|| String::from("<exited>"));
            out.push_str(&format!("task {task_id} ({comm}): {total} samples\n"));
            out.push_str(&render_buckets(buckets));
            out.push('\n');
        }
        out
    }
}

fn render_buckets(buckets: &[u64; BUCKET_COUNT]) -> String {
    let first = buckets.iter().position(|&c| c > 0);
    let last = buckets.iter().rposition(|&c| c > 0);
    let (Some(first), Some(last)) = (first, last) else {
        return String::new();
    };
    let max = buckets.iter().copied().max().unwrap_or(1).max(1);

    let mut out = String::from("              nsecs       : count distribution\n");
    for bucket in first..=last {
        let count = buckets[bucket];
        let (low, high) = bucket_bounds(bucket as u32);
        let bar = "*".repeat((count * BAR_WIDTH / max) as usize);
        out.push_str(&format!(
            "{low:>12} -> {high:<12} : {count:<5} |{bar:<width$}|\n",
            width = BAR_WIDTH as usize
        ));
    }
    out
}

/// Inclusive nanosecond range covered by a bucket. Bucket 0 also
/// absorbs zero-latency (clock-anomaly) samples.
pub fn bucket_bounds(bucket: u32) -> (u64, u64) {
    let low = if bucket == 0 { 0 } else { 1u64 << bucket };
    let high = if bucket >= MAX_BUCKET {
        u64::MAX
    } else {
        (1u64 << (bucket + 1)) - 1
    };
    (low, high)
}

/// Copy the kernel map into a snapshot. The kernel keeps mutating the
/// map while we iterate; entries that fail mid-iteration are skipped,
/// a partial view is acceptable for a statistical counter.
pub fn snapshot(map: &HashMap<MapData, HistKey, u64>) -> HistogramSnapshot {
    HistogramSnapshot::from_cells(map.iter().filter_map(Result::ok))
}

/// Best-effort task name lookup; the task may already be gone.
pub fn resolve_comm(task_id: u32) -> Option<String> {
    let process = procfs::process::Process::new(task_id as i32).ok()?;
    process.stat().ok().map(|stat| stat.comm)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(task_id: u32, bucket: u32) -> HistKey {
        HistKey { task_id, bucket }
    }

    #[test]
    fn collects_cells_per_task() {
        let snap = HistogramSnapshot::from_cells([
            (key(1, 24), 3),
            (key(1, 30), 1),
            (key(2, 24), 7),
        ]);
        assert_eq!(snap.total_events(), 11);
        assert!(!snap.is_empty());
    }

    #[test]
    fn empty_snapshot() {
        let snap = HistogramSnapshot::default();
        assert!(snap.is_empty());
        assert_eq!(snap.total_events(), 0);
        assert_eq!(snap.render(|_| None, 10), "");
    }

    #[test]
    fn out_of_range_bucket_is_skipped() {
        let snap = HistogramSnapshot::from_cells([(key(1, 64), 5), (key(1, 63), 1)]);
        assert_eq!(snap.total_events(), 1);
    }

    #[test]
    fn delta_reports_only_growth() {
        let before = HistogramSnapshot::from_cells([(key(1, 24), 3), (key(2, 25), 2)]);
        let after = HistogramSnapshot::from_cells([
            (key(1, 24), 5),
            (key(2, 25), 2),
            (key(3, 26), 1),
        ]);
        let delta = after.delta_since(&before);
        assert_eq!(delta, vec![(1, 24, 2), (3, 26, 1)]);
    }

    #[test]
    fn delta_of_identical_snapshots_is_empty() {
        let snap = HistogramSnapshot::from_cells([(key(1, 24), 3)]);
        assert!(snap.delta_since(&snap.clone()).is_empty());
    }

    #[test]
    fn delta_saturates_against_foreign_snapshot() {
        let before = HistogramSnapshot::from_cells([(key(1, 24), 10)]);
        let after = HistogramSnapshot::from_cells([(key(1, 24), 4)]);
        assert!(after.delta_since(&before).is_empty());
    }

    #[test]
    fn bucket_bounds_edges() {
        assert_eq!(bucket_bounds(0), (0, 1));
        assert_eq!(bucket_bounds(1), (2, 3));
        assert_eq!(bucket_bounds(24), (16_777_216, 33_554_431));
        assert_eq!(bucket_bounds(63), (1u64 << 63, u64::MAX));
    }

    #[test]
    fn render_names_tasks_and_counts() {
        let snap = HistogramSnapshot::from_cells([(key(42, 24), 3)]);
        let rendered = snap.render(
            |id| (id == 42).then(|| String::from("nginx")),
            10,
        );
        assert!(rendered.contains("task 42 (nginx): 3 samples"));
        assert!(rendered.contains("16777216"));
    }

    #[test]
    fn render_caps_at_busiest_tasks() {
        let snap = HistogramSnapshot::from_cells([
            (key(1, 24), 1),
            (key(2, 24), 9),
            (key(3, 24), 5),
        ]);
        let rendered = snap.render(|_| None, 2);
        assert!(rendered.contains("task 2"));
        assert!(rendered.contains("task 3"));
        assert!(!rendered.contains("task 1"));
    }
}
