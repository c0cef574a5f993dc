//! # dlmon - Main Entry Point
//!
//! Loads the probes, then renders every dynamic-linking call to stdout until
//! SIGINT or SIGTERM. Diagnostics go to stderr.

use anyhow::Result;
use clap::Parser;
use log::info;
use std::io::{self, Write};
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};

use dlmon::cli::Args;
use dlmon::domain::MonitorError;
use dlmon::monitor::{
    attach_dl_probes, configure_filter, init_ebpf_logger, load_ebpf_program, own_comm,
    write_block, ClockReconciler, EventProcessor, LinkEvent, LossTracker, PathResolver,
    RingReader, SystemClock, POLL_TIMEOUT,
};
use dlmon::preflight::run_preflight_checks;
use dlmon::summary::StreamSummary;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;

fn main() {
    env_logger::init();
    let args = Args::parse();

    std::process::exit(match run(&args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_code_for(&e)
        }
    });
}

/// A failed poll exits with its errno; every other failure with 1
fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<MonitorError>().and_then(MonitorError::poll_exit_code).unwrap_or(EXIT_ERROR)
}

/// Write completed events to `out`, teeing them into the summary
fn emit<W: Write>(
    out: &mut W,
    events: &mut Vec<LinkEvent>,
    summary: Option<&mut StreamSummary>,
) -> io::Result<()> {
    let mut rendered = Vec::new();
    for event in events.drain(..) {
        write_block(&mut rendered, &event)?;
    }
    if rendered.is_empty() {
        return Ok(());
    }

    out.write_all(&rendered)?;
    out.flush()?;
    if let Some(summary) = summary {
        summary.feed(&rendered);
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn run(args: &Args) -> Result<()> {
    let quiet = args.quiet;

    // Run pre-flight checks before anything else
    run_preflight_checks()?;

    if !quiet {
        eprintln!("dlmon v{}", env!("CARGO_PKG_VERSION"));
        eprintln!("target: {}", args.target().unwrap_or("all processes"));
        eprintln!("library: {}", args.libc);
    }

    // ── Load eBPF, configure the filter, then attach ────────────────────
    let mut bpf = load_ebpf_program()?;
    init_ebpf_logger(&mut bpf);

    configure_filter(&mut bpf, args.target(), &own_comm()?)?;
    attach_dl_probes(&mut bpf, &args.libc)?;

    let mut reader = RingReader::new(&mut bpf)?;
    let mut losses = LossTracker::new(&mut bpf)?;

    let mut processor = EventProcessor::new(
        ClockReconciler::new(SystemClock, args.clock_mode()),
        PathResolver::new(!args.no_resolve),
    );
    let mut summary = args.summary.then(StreamSummary::new);

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    if !quiet {
        eprintln!("monitoring, Ctrl+C to stop");
    }

    let mut stdout = io::stdout().lock();
    let mut completed = Vec::new();
    let mut poll_error = None;
    let exit_reason;

    // Main event processing loop
    loop {
        tokio::select! {
            _ = sigint.recv() => {
                exit_reason = "interrupted";
                break;
            }
            _ = sigterm.recv() => {
                exit_reason = "terminated";
                break;
            }
            polled = reader.poll(POLL_TIMEOUT, |record| processor.process_record(record, &mut completed)) => {
                if let Err(e) = polled {
                    exit_reason = "poll failed";
                    poll_error = Some(e);
                    break;
                }
            }
        }

        emit(&mut stdout, &mut completed, summary.as_mut())?;
        losses.report();
    }

    // Drain what is already buffered, then give up on unanswered enters
    if poll_error.is_none() {
        if let Err(e) = reader
            .poll(Duration::ZERO, |record| processor.process_record(record, &mut completed))
            .await
        {
            poll_error = Some(e);
        }
    }
    completed.extend(processor.flush_pending());
    emit(&mut stdout, &mut completed, summary.as_mut())?;
    losses.report();

    // Detaches every probe
    drop(bpf);
    info!("probes detached");

    if !quiet {
        let stats = processor.stats;
        eprintln!(
            "\n{exit_reason}: {} records, {} events ({} orphan returns, {} unanswered), {} lost, {} malformed",
            stats.records,
            stats.emitted,
            stats.orphan_returns,
            stats.unanswered_enters,
            losses.reported(),
            reader.malformed(),
        );
    }

    if let Some(summary) = summary.as_mut() {
        eprintln!("summary: {}", summary.finish());
    }

    match poll_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
