use anyhow::bail;
use clap::Parser;
use estop::{SharedContext, Timing};
use estop_sim::sim::DEFAULT_POLL_COST;
use estop_sim::{EventKind, Outcome, SimBoard, SimClock, Simulation};
use estop_time::Instant;
use log::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
/// Run the emergency-preemption core against a simulated board and print its log
struct Cli {
    /// Simulated time to run, in milliseconds
    #[arg(long, default_value_t = 15_000)]
    duration_ms: u64,

    /// Assert the emergency trigger at this time
    #[arg(long)]
    trigger_at_ms: Option<u64>,

    /// Return the trigger to rest at this time
    ///
    /// Requires `--trigger-at-ms`. Without it the trigger stays asserted.
    #[arg(long)]
    release_at_ms: Option<u64>,

    /// Report an allocation failure at this time, may be repeated
    #[arg(long)]
    alloc_failure_at_ms: Vec<u64>,

    /// Report resource exhaustion (fatal) at this time
    #[arg(long)]
    exhaust_at_ms: Option<u64>,

    /// Free memory at startup, in bytes
    #[arg(long, default_value_t = 32_768)]
    free_memory: u32,

    /// Bytes of free memory lost per status report period
    #[arg(long, default_value_t = 0)]
    leak_per_report: u32,

    /// Idle cycles each task poll takes away from the idle hook
    #[arg(long, default_value_t = DEFAULT_POLL_COST)]
    poll_cost: u32,

    /// Enable more verbose output, repeat up to `-vv` for even more
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();

    match (cli.trigger_at_ms, cli.release_at_ms) {
        (None, Some(_)) => bail!("`--release-at-ms` needs `--trigger-at-ms`"),
        (Some(trigger), Some(release)) if release <= trigger => {
            bail!("the trigger must be released after it was asserted ({release} <= {trigger})")
        }
        _ => {}
    }
    if cli.duration_ms == 0 {
        bail!("`--duration-ms` must be positive");
    }

    let timing = Timing::DEFAULT;
    let ctx = SharedContext::new();
    let clock = SimClock::new();
    let board = SimBoard::new(&clock, cli.free_memory);

    if let Some(at) = cli.trigger_at_ms {
        board.schedule_trigger(Instant::from_ticks(at), true);
    }
    if let Some(at) = cli.release_at_ms {
        board.schedule_trigger(Instant::from_ticks(at), false);
    }
    if cli.leak_per_report > 0 {
        let report_period = timing.monitor_interval * timing.report_every;
        board.set_leak(cli.leak_per_report, report_period);
    }

    let mut sim = Simulation::new(&ctx, &clock, &board, timing);
    sim.set_poll_cost(cli.poll_cost);
    for &at in &cli.alloc_failure_at_ms {
        sim.schedule_allocation_failure(Instant::from_ticks(at));
    }
    if let Some(at) = cli.exhaust_at_ms {
        sim.schedule_resource_exhaustion(Instant::from_ticks(at));
    }

    let outcome = sim.run_until(Instant::from_ticks(cli.duration_ms));

    for event in board.events() {
        let at = event.at.ticks();
        match event.kind {
            EventKind::Log(line) => info!("{at:>7} ms  {line}"),
            EventKind::Actuator(on) => {
                debug!("{at:>7} ms  actuator {}", if on { "ON" } else { "OFF" })
            }
            EventKind::InterruptsMasked => warn!("{at:>7} ms  interrupts masked"),
        }
    }

    for (at, active) in sim.emergency_trace() {
        debug!("{:>7} ms  emergency active: {active}", at.ticks());
    }

    info!(
        "errors: {}, emergency active: {}, cpu usage: {}%",
        ctx.error_count(),
        ctx.emergency_active(),
        ctx.cpu_usage_percent()
    );

    if let Outcome::Halted(at) = outcome {
        warn!(
            "halted at {} ms, actuator left {}",
            at.ticks(),
            if board.actuator() { "ON" } else { "OFF" }
        );
    }

    Ok(())
}
