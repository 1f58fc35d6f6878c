use anyhow::Result;
use aya::include_bytes_aligned;
use clap::Parser;
use wakelat::settings::Settings;
use wakelat::{WakeLatEngine, telemetry};

#[derive(Debug, Parser)]
#[command(
    name = "wakelat",
    about = "Per-task wake-to-run scheduling latency histograms"
)]
struct Opt {
    /// Verbose output
    #[clap(short, long)]
    verbose: bool,

    /// Seconds between histogram readouts (overrides
    /// WAKELAT__READOUT__INTERVAL_SECS)
    #[clap(short, long)]
    interval: Option<u64>,

    /// Collect for one interval, print the histogram, and exit
    #[clap(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if opt.verbose { "info" } else { "warn" }),
    )
    .init();

    let mut settings = Settings::new()?;
    if let Some(secs) = opt.interval {
        settings.readout.interval_secs = Some(secs);
    }

    telemetry::init_metrics()?;

    let engine = WakeLatEngine::new(
        settings,
        include_bytes_aligned!(concat!(env!("OUT_DIR"), "/wakelat")),
    )?;

    engine.run(opt.once).await
}
