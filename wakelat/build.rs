use std::{env, path::PathBuf, process::Command};

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());

    println!("cargo:rerun-if-changed=../wakelat-ebpf/src");
    println!("cargo:rerun-if-changed=../wakelat-common/src");

    let arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap();

    let bpf_target = match arch.as_str() {
        "x86_64" | "x86" | "aarch64" | "arm" | "riscv64" => "bpfel-unknown-none",
        "mips" | "mips64" | "powerpc" | "powerpc64" | "s390x" => "bpfeb-unknown-none",
        _ => {
            eprintln!(
                "Warning: Unknown architecture '{}', defaulting to bpfel-unknown-none",
                arch
            );
            "bpfel-unknown-none"
        }
    };

    let ebpf_dir = PathBuf::from("../wakelat-ebpf");

    // Separate target directory so the inner cargo doesn't fight the
    // outer one for the target directory lock.
    let ebpf_target_dir = out_dir.join("ebpf-target");

    // Use the rustup shim rather than $CARGO: $CARGO points at the active
    // toolchain's cargo binary directly, which ignores RUSTUP_TOOLCHAIN.
    let status = Command::new("cargo")
        .current_dir(&ebpf_dir)
        .env_remove("RUSTC")
        .env("RUSTUP_TOOLCHAIN", "nightly")
        .env("CARGO_TARGET_DIR", &ebpf_target_dir)
        .args([
            "build",
            "--release",
            &format!("--target={}", bpf_target),
            "-Z",
            "build-std=core",
        ])
        .stdout(std::process::Stdio::inherit())
        .stderr(std::process::Stdio::inherit())
        .status()
        .expect("Failed to execute cargo command");

    if !status.success() {
        panic!("Failed to build eBPF program");
    }

    let ebpf_binary = ebpf_target_dir.join(format!("{}/release/wakelat", bpf_target));

    let out_file = out_dir.join("wakelat");
    std::fs::copy(&ebpf_binary, &out_file).expect("Failed to copy eBPF object file");
}
