use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build and run wakelat")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the complete binary (eBPF + userspace)
    Build {
        /// Build in release mode
        #[arg(long)]
        release: bool,

        /// Target architecture for cross-compilation (e.g., x86_64-unknown-linux-gnu)
        #[arg(long)]
        target: Option<String>,
    },

    /// Build and run under sudo (tracepoint attachment needs CAP_BPF/CAP_PERFMON)
    Run {
        /// Build in release mode
        #[arg(long)]
        release: bool,

        /// Arguments passed through to wakelat
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { release, target } => {
            build(release, target.as_deref())?;
        }
        Commands::Run { release, args } => {
            run(release, &args)?;
        }
    }

    Ok(())
}

fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

fn build(release: bool, target: Option<&str>) -> Result<PathBuf> {
    let root = project_root();

    let is_cross_compile =
        target.map(|t| t.contains("linux")).unwrap_or(false) && !cfg!(target_os = "linux");

    let build_cmd = if is_cross_compile {
        if which::which("cross").is_ok() {
            println!("Using 'cross' for cross-compilation");
            "cross"
        } else {
            bail!(
                "Cross-compilation to Linux requires 'cross' tool.\n\
                 Install with: cargo install cross\n\
                 Also requires Docker to be running."
            );
        }
    } else {
        "cargo"
    };

    let mut cmd = Command::new(build_cmd);
    cmd.current_dir(&root);
    cmd.arg("build");

    if release {
        cmd.arg("--release");
    }

    if let Some(t) = target {
        cmd.arg("--target").arg(t);
    }

    cmd.arg("-p").arg("wakelat");

    let status = cmd.status().context("Failed to run cargo build")?;
    if !status.success() {
        bail!("Build failed");
    }

    let profile = if release { "release" } else { "debug" };
    let binary_path = if let Some(t) = target {
        root.join("target").join(t).join(profile).join("wakelat")
    } else {
        root.join("target").join(profile).join("wakelat")
    };

    println!("Build complete: {}", binary_path.display());

    Ok(binary_path)
}

fn run(release: bool, args: &[String]) -> Result<()> {
    let binary_path = build(release, None)?;

    // -E keeps RUST_LOG / WAKELAT__* / OTEL_* in the privileged environment.
    let status = Command::new("sudo")
        .arg("-E")
        .arg(&binary_path)
        .args(args)
        .status()
        .context("Failed to run wakelat under sudo")?;

    if !status.success() {
        bail!("wakelat exited with {}", status);
    }

    Ok(())
}
