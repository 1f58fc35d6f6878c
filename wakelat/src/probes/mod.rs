use std::path::Path;

use anyhow::Result;
use aya::Ebpf;

pub mod wake_to_run;

pub trait Probe {
    fn attach(&self, bpf: &mut Ebpf) -> Result<()>;
}

pub(crate) fn tracepoint_exists(category: &str, name: &str) -> bool {
    const TRACEFS_MOUNT_POINTS: [&str; 2] = ["/sys/kernel/tracing", "/sys/kernel/debug/tracing"];

    TRACEFS_MOUNT_POINTS.iter().any(|base| {
        Path::new(base)
            .join("events")
            .join(category)
            .join(name)
            .exists()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tracepoint_does_not_exist() {
        assert!(!tracepoint_exists("sched", "definitely_not_a_tracepoint"));
    }
}
