//! Host batch daemon.
//!
//! Supervises the master daemon as a child process, reaps dispatched job
//! children, gates jobs against their run windows, and accepts usage
//! reports relayed by the launcher over the wire protocol.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use batch_proto::{read_frame, write_frame, BlaunchRusageMsg, Opcode, StatusCode};
use batch_sbd::{reap, NixAffinity, SbdConfig, SbdState};

#[derive(Parser)]
#[command(name = "sbatchd")]
#[command(about = "Per-host batch daemon")]
struct Cli {
    /// Scheduling tick interval in milliseconds.
    #[arg(long, env = "SBD_TICK_MS", default_value_t = 1000)]
    tick_ms: u64,

    /// Delay in milliseconds before a reaped job's completion is reported,
    /// throttling the finish-report fanout.
    #[arg(long, env = "LSB_SBD_FINISH_SLEEP", default_value_t = 0)]
    finish_sleep_ms: u64,

    /// Deliver a warning signal when a job's run window is about to close.
    #[arg(long, env = "SBD_WINDOW_SIG", default_value_t = true)]
    window_sig: bool,

    /// Number of cores to make available for binding; defaults to the
    /// host's detected parallelism.
    #[arg(long, env = "SBD_NUM_CORES")]
    num_cores: Option<u32>,

    /// Master daemon binary to supervise.
    #[arg(long, env = "SBD_MASTER_CMD", default_value = "mbatchd")]
    master_cmd: String,

    /// Address to accept launcher rusage reports on.
    #[arg(long, env = "SBD_LISTEN", default_value = "127.0.0.1:6882")]
    listen: String,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "sbatchd=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let num_cores = cli.num_cores.unwrap_or_else(num_cpus_fallback);
    tracing::info!(num_cores, master_cmd = %cli.master_cmd, "starting sbatchd");

    let (tx, rx) = reap::new_channel();
    let config = SbdConfig {
        finish_sleep: Duration::from_millis(cli.finish_sleep_ms),
        window_sig_enabled: cli.window_sig,
    };
    let state = Arc::new(Mutex::new(SbdState::new(num_cores, Arc::new(NixAffinity), rx, config)));

    spawn_master(&state, &cli.master_cmd, tx.clone()).await;

    let listener = match TcpListener::bind(&cli.listen).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, addr = %cli.listen, "failed to bind launcher listener");
            return;
        }
    };
    tokio::spawn(accept_loop(listener, state.clone()));

    let mut ticker = tokio::time::interval(Duration::from_millis(cli.tick_ms));
    loop {
        ticker.tick().await;
        let mut guard = state.lock().await;
        let now = chrono::Utc::now();
        let to_signal = guard.tick(now);
        for job_id in to_signal {
            if let Some(card) = guard.job_cards.get(&job_id) {
                if let Some(pid) = card.job_pid {
                    tracing::warn!(job = %job_id, pid, "run window closing, signaling job");
                    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGUSR2) {
                        tracing::warn!(job = %job_id, pid, error = %e, "failed to signal job on window close");
                    }
                }
            }
        }

        if guard.master_liveness.should_restart && guard.master_liveness.master_pid.is_none() {
            drop(guard);
            spawn_master(&state, &cli.master_cmd, tx.clone()).await;
        }
    }
}

async fn spawn_master(state: &Arc<Mutex<SbdState>>, master_cmd: &str, tx: crossbeam_channel::Sender<reap::CompletionRecord>) {
    match tokio::process::Command::new(master_cmd).kill_on_drop(false).spawn() {
        Ok(child) => {
            let pid = child.id().unwrap_or(0);
            tracing::info!(pid, "master daemon spawned");
            let mut guard = state.lock().await;
            guard.master_liveness.spawned(pid);
            drop(guard);
            reap::spawn_watcher(child, tx);
        }
        Err(e) => {
            tracing::error!(error = %e, master_cmd, "failed to spawn master daemon");
        }
    }
}

/// Accept launcher connections reporting `BLAUNCH_RUSAGE` frames and fold
/// the usage into the matching job card.
async fn accept_loop(listener: TcpListener, state: Arc<Mutex<SbdState>>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "failed to accept launcher connection");
                continue;
            }
        };
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_rusage_report(stream, &state).await {
                tracing::warn!(peer = %peer, error = %e, "launcher rusage report failed");
            }
        });
    }
}

async fn handle_rusage_report(mut stream: tokio::net::TcpStream, state: &Arc<Mutex<SbdState>>) -> Result<(), batch_proto::ProtoError> {
    let (opcode, msg): (Opcode, BlaunchRusageMsg) = read_frame(&mut stream).await?;
    if opcode != Opcode::BLAUNCH_RUSAGE {
        write_frame(&mut stream, StatusCode(1).0, &()).await?;
        return Ok(());
    }

    let job_id = batch_core::JobId::new(msg.job_id as u32, None);
    let mut guard = state.lock().await;
    let found = if let Some(card) = guard.job_cards.get_mut(&job_id) {
        card.usage.merge(&msg.usage);
        true
    } else {
        false
    };
    drop(guard);

    if !found {
        tracing::warn!(job = %job_id, "rusage report for unknown job card");
    }
    write_frame(&mut stream, StatusCode::OK.0, &()).await?;
    Ok(())
}

fn num_cpus_fallback() -> u32 {
    std::thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(1)
}
