//! Master batch daemon.
//!
//! Ticks the scheduler: dispatch pending jobs to hosts with free slots,
//! then run the priority preemption elector for every preemptive queue
//! and commit its victim list through the host-notifier boundary.

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use batch_core::{Host, Queue};
use batch_master::{commit_preemption_signals, dispatch_tick, elect_preempt, MasterState, NoopNotifier, SchedulerConfig};

#[derive(Parser)]
#[command(name = "mbatchd")]
#[command(about = "Cluster-wide batch job scheduler")]
struct Cli {
    /// Scheduling tick interval in milliseconds.
    #[arg(long, env = "MBD_TICK_MS", default_value_t = 1000)]
    tick_ms: u64,

    /// Maximum number of victims the preemption elector may collect per tick.
    #[arg(long, env = "MBD_MAX_PREEMPT_JOBS", default_value_t = 1)]
    max_preempt_jobs: u32,

    /// Comma-separated resource names eligible for resource-driven
    /// preemption. Empty means slot-driven preemption only.
    #[arg(long, env = "MBD_PREEMPTABLE_RESOURCES", value_delimiter = ',')]
    preemptable_resources: Vec<String>,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "mbatchd=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    tracing::info!(tick_ms = cli.tick_ms, "starting mbatchd");

    let config = SchedulerConfig { max_preempt_jobs: cli.max_preempt_jobs, preemptable_resources: cli.preemptable_resources };
    let mut state = MasterState::new(config);

    // Inventory normally arrives via cluster configuration; this port
    // takes the minimal bootstrap the scheduler needs to run its loop.
    state.add_queue(Queue::new("normal", 10));
    let mut high = Queue::new("high", 50);
    high.preemptable = vec!["normal".to_string()];
    state.add_queue(high);
    state.add_host(Host::new("localhost", num_cpus_fallback()));

    let notifier = NoopNotifier;
    let mut ticker = tokio::time::interval(Duration::from_millis(cli.tick_ms));

    loop {
        ticker.tick().await;
        dispatch_tick(&mut state);

        let preemptive_queues: Vec<String> =
            state.queues.values().filter(|q| q.is_preemptive()).map(|q| q.name.clone()).collect();
        for queue_name in preemptive_queues {
            let victims = elect_preempt(&mut state, &queue_name);
            if !victims.is_empty() {
                commit_preemption_signals(&mut state, &notifier, &victims).await;
            }
        }
    }
}

fn num_cpus_fallback() -> u32 {
    std::thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(1)
}
