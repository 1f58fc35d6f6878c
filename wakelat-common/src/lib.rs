//! Types and pure functions shared between the BPF engine and userspace.
//!
//! Everything here must stay `no_std` and allocation-free: the BPF side
//! links this crate into programs that run in non-sleeping kernel
//! contexts. Userspace enables the `user` feature to get an [`aya::Pod`]
//! impl for map access.

#![no_std]

/// Number of log2 latency buckets.
pub const BUCKET_COUNT: usize = 64;

/// Highest valid bucket index.
pub const MAX_BUCKET: u32 = 63;

/// Latencies below this are scheduling jitter, not actionable delay;
/// they are dropped before they reach the histogram. 20ms.
pub const NOISE_THRESHOLD_NS: u64 = 20_000_000;

/// Capacity of the wake-timestamp map: one entry per task that is
/// currently woken but not yet dispatched. Inserts beyond this are
/// dropped rather than growing the map.
pub const MAX_TRACKED_TASKS: u32 = 10_240;

/// Capacity of the histogram map, in (task, bucket) cells.
pub const MAX_HIST_ENTRIES: u32 = 102_400;

/// Key of one histogram cell: a task and a log2 latency bucket.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HistKey {
    pub task_id: u32,
    pub bucket: u32,
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for HistKey {}

/// `floor(log2(delta))` with `bucket_of(0) == 0`, clamped to
/// [`MAX_BUCKET`].
///
/// Shift-based so it lowers to plain BPF arithmetic the verifier
/// accepts; no intrinsics, no loops.
#[inline(always)]
pub fn bucket_of(mut delta: u64) -> u32 {
    if delta == 0 {
        return 0;
    }
    let mut r = 0u32;
    if delta >> 32 != 0 {
        delta >>= 32;
        r += 32;
    }
    if delta >> 16 != 0 {
        delta >>= 16;
        r += 16;
    }
    if delta >> 8 != 0 {
        delta >>= 8;
        r += 8;
    }
    if delta >> 4 != 0 {
        delta >>= 4;
        r += 4;
    }
    if delta >> 2 != 0 {
        delta >>= 2;
        r += 2;
    }
    if delta >> 1 != 0 {
        r += 1;
    }
    if r > MAX_BUCKET { MAX_BUCKET } else { r }
}

/// Noise filter and bucketing in one step: `None` when the latency is
/// below [`NOISE_THRESHOLD_NS`], otherwise the histogram bucket.
#[inline(always)]
pub fn classify_latency(delta: u64) -> Option<u32> {
    if delta < NOISE_THRESHOLD_NS {
        return None;
    }
    Some(bucket_of(delta))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_and_one_share_bucket_zero() {
        assert_eq!(bucket_of(0), 0);
        assert_eq!(bucket_of(1), 0);
    }

    #[test]
    fn bucket_is_floor_log2() {
        assert_eq!(bucket_of(2), 1);
        assert_eq!(bucket_of(3), 1);
        assert_eq!(bucket_of(4), 2);
        assert_eq!(bucket_of(1023), 9);
        // 2^29 <= 10^9 < 2^30
        assert_eq!(bucket_of(1_000_000_000), 29);
    }

    #[test]
    fn power_of_two_edges() {
        for b in 0..=MAX_BUCKET {
            let v = 1u64 << b;
            assert_eq!(bucket_of(v), b);
            if v > 1 {
                assert_eq!(bucket_of(v - 1), b - 1);
            }
        }
    }

    #[test]
    fn huge_deltas_clamp_to_top_bucket() {
        assert_eq!(bucket_of(1u64 << 63), 63);
        assert_eq!(bucket_of(u64::MAX), 63);
    }

    #[test]
    fn classify_filters_noise() {
        assert_eq!(classify_latency(0), None);
        assert_eq!(classify_latency(1), None);
        assert_eq!(classify_latency(NOISE_THRESHOLD_NS - 1), None);
    }

    #[test]
    fn classify_buckets_signal() {
        // 2^24 = 16_777_216 <= 20ms < 2^25
        assert_eq!(classify_latency(NOISE_THRESHOLD_NS), Some(24));
        assert_eq!(classify_latency(1_000_000_000), Some(29));
        assert_eq!(classify_latency(u64::MAX), Some(63));
    }

    #[test]
    fn hist_key_layout_matches_kernel_map() {
        assert_eq!(core::mem::size_of::<HistKey>(), 8);
        assert_eq!(core::mem::align_of::<HistKey>(), 4);
    }
}
