//! Build helpers for the kernel-side probes
//!
//! `cargo xtask build-ebpf` must run before building `dlmon`, which embeds
//! the probe object at compile time. `cargo xtask run` does both and starts
//! the monitor under `sudo`.

use anyhow::{Context, Result};
use clap::Parser;
use std::process::Command;

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Parser)]
enum Cmd {
    /// Build dlmon-ebpf for the BPF target
    BuildEbpf {
        #[arg(long, default_value = "bpfel-unknown-none")]
        target: String,
    },
    /// Build probes and monitor, then run the monitor as root
    Run {
        #[arg(long, default_value = "bpfel-unknown-none")]
        target: String,
        /// Arguments passed through to dlmon
        #[arg(last = true)]
        args: Vec<String>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Cmd::BuildEbpf { target } => build_ebpf(&target)?,
        Cmd::Run { target, args } => {
            build_ebpf(&target)?;
            run(&args)?;
        }
    }

    Ok(())
}

fn check(status: std::process::ExitStatus, what: &str) -> Result<()> {
    if !status.success() {
        anyhow::bail!("{what} failed with {status}");
    }
    Ok(())
}

fn build_ebpf(target: &str) -> Result<()> {
    // Release only: debug builds pull in formatting code the BPF linker rejects
    let status = Command::new("cargo")
        .args(["+nightly", "build", "--package", "dlmon-ebpf", "--target", target])
        .args(["-Z", "build-std=core", "--release"])
        .status()
        .context("Failed to start cargo for dlmon-ebpf")?;
    check(status, "Building dlmon-ebpf")?;

    eprintln!("✓ dlmon-ebpf built for {target}");
    Ok(())
}

fn run(args: &[String]) -> Result<()> {
    let status = Command::new("cargo")
        .args(["build", "--release", "--package", "dlmon"])
        .status()
        .context("Failed to start cargo for dlmon")?;
    check(status, "Building dlmon")?;

    let status = Command::new("sudo")
        .arg("-E")
        .arg("target/release/dlmon")
        .args(args)
        .status()
        .context("Failed to start sudo")?;
    check(status, "dlmon")
}
