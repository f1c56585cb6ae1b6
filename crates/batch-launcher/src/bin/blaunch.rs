//! Parallel job launcher.
//!
//! Fans a command out to a list of hosts and reports aggregated resource
//! usage back to the local host daemon until every remote task exits.

use std::io::BufRead;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpStream;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use batch_launcher::{run_and_collect, LocalRemoteExec, DEFAULT_SLEEP_SECS};
use batch_proto::{write_frame, BlaunchRusageMsg, Opcode};

#[derive(Parser)]
#[command(name = "blaunch")]
#[command(about = "Run a command on a set of hosts and aggregate its resource usage")]
struct Cli {
    /// Extra diagnostic logging.
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Close stdin before running the command.
    #[arg(short = 'n')]
    no_stdin: bool,

    /// Space-separated host list. Mutually exclusive with `-u`.
    #[arg(short = 'z')]
    hosts: Option<String>,

    /// File with one host per line. Mutually exclusive with `-z`.
    #[arg(short = 'u')]
    hostfile: Option<String>,

    /// Seconds between usage-report rounds. Overrides `LSB_BLAUNCH_SLEEPTIME`.
    #[arg(short = 't')]
    sleep_secs: Option<u64>,

    /// Local host daemon address to send usage reports to.
    #[arg(long, env = "SBD_LISTEN", default_value = "127.0.0.1:6882")]
    sbd_addr: String,

    /// Single host (if neither `-z` nor `-u` was given) followed by the
    /// command and its arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    rest: Vec<String>,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let default_filter = if cli.verbose > 0 { "blaunch=debug" } else { "blaunch=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.hosts.is_some() && cli.hostfile.is_some() {
        tracing::error!("blaunch: -u and -z are mutually exclusive");
        std::process::exit(-1);
    }

    let Ok(job_id) = std::env::var("LSB_JOBID").map_err(|_| ()).and_then(|v| v.parse::<i32>().map_err(|_| ())) else {
        tracing::error!("blaunch: cannot run without jobid");
        std::process::exit(-1);
    };

    if cli.no_stdin {
        let _ = nix::unistd::close(0);
        if let Ok(devnull) = std::fs::File::open("/dev/null") {
            use std::os::unix::io::AsRawFd;
            let _ = nix::unistd::dup2(devnull.as_raw_fd(), 0);
        }
    }

    let mut rest = cli.rest;
    let (host_list, command) = if let Some(hosts) = &cli.hosts {
        (hosts.split_whitespace().map(str::to_string).collect::<Vec<_>>(), rest)
    } else if let Some(path) = &cli.hostfile {
        let hosts = match std::fs::File::open(path) {
            Ok(f) => std::io::BufReader::new(f).lines().map_while(Result::ok).collect::<Vec<_>>(),
            Err(e) => {
                tracing::error!(path, error = %e, "blaunch: cannot open host file");
                std::process::exit(1);
            }
        };
        (hosts, rest)
    } else if !rest.is_empty() {
        let command = rest.split_off(1);
        (rest, command)
    } else {
        (Vec::new(), Vec::new())
    };

    if host_list.is_empty() || command.is_empty() {
        tracing::error!("blaunch: no host(s) or no command to run");
        std::process::exit(-1);
    }

    tracing::info!(hosts = ?host_list, "host list");
    tracing::info!(command = ?command, "user command");

    // `-t` sets LSB_BLAUNCH_SLEEPTIME for the run, mirroring the original
    // blaunch's setenv(); the launch loop itself only ever reads the
    // env var, falling back to the default when neither is set.
    if let Some(t) = cli.sleep_secs {
        std::env::set_var("LSB_BLAUNCH_SLEEPTIME", t.to_string());
    }
    let sleep_secs = std::env::var("LSB_BLAUNCH_SLEEPTIME").ok().and_then(|v| v.parse::<u64>().ok()).unwrap_or(DEFAULT_SLEEP_SECS);
    let sleep = Duration::from_secs(sleep_secs);
    let exec = LocalRemoteExec::default();
    let sbd_addr = cli.sbd_addr.clone();

    let outcome = run_and_collect(&exec, &host_list, &command, sleep, |usage| {
        let sbd_addr = sbd_addr.clone();
        async move {
            let msg = BlaunchRusageMsg { job_id, usage };
            match TcpStream::connect(&sbd_addr).await {
                Ok(mut stream) => {
                    if let Err(e) = write_frame(&mut stream, Opcode::BLAUNCH_RUSAGE, &msg).await {
                        tracing::warn!(error = %e, "failed to send rusage report to host daemon");
                    }
                }
                Err(e) => {
                    tracing::warn!(addr = %sbd_addr, error = %e, "failed to reach host daemon for rusage report");
                }
            }
        }
    })
    .await;

    if outcome.tasks_failed > 0 {
        std::process::exit(-1);
    }
}
