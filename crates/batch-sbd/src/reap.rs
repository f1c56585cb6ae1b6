//! Child-process reaping.
//!
//! Grounded on the original `child_handler`: a SIGCHLD-equivalent handler
//! that drains all finished children without blocking. Ported as one
//! watcher task per spawned child, each pushing a `CompletionRecord` onto
//! a bounded lock-free channel the main loop drains with `try_recv` — the
//! watcher tasks never touch job-card structure directly, only the main
//! loop may add or remove cards.

use std::os::unix::process::ExitStatusExt;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender};
use tracing::{info, warn};

use crate::daemon::SbdState;

#[derive(Debug, Clone)]
pub struct CompletionRecord {
    pub pid: u32,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
}

/// Exit code the master uses to request an unconditional restart rather
/// than the streak-based restart policy.
pub const MASTER_RECONFIG: i32 = 2;

/// Restart-storm damper: once the master has exited with the same code
/// this many times in a row, the daemon stops restarting it.
pub const MAX_SAME_EXIT_STREAK: u32 = 150;

pub fn new_channel() -> (Sender<CompletionRecord>, Receiver<CompletionRecord>) {
    crossbeam_channel::bounded(256)
}

/// Spawn a watcher that awaits `child`'s exit and reports it. Runs
/// concurrently with the daemon's main loop by construction.
pub fn spawn_watcher(mut child: tokio::process::Child, tx: Sender<CompletionRecord>) {
    let pid = child.id().unwrap_or(0);
    tokio::spawn(async move {
        let status = child.wait().await;
        let (exit_code, signal) = match status {
            Ok(s) => (s.code(), s.signal()),
            Err(_) => (None, None),
        };
        let _ = tx.send(CompletionRecord { pid, exit_code, signal });
    });
}

/// Drain every completion record currently queued without blocking.
pub fn drain_completions(state: &mut SbdState, finish_sleep: Duration) {
    while let Ok(rec) = state.completions_rx.try_recv() {
        handle_completion(state, rec, finish_sleep);
    }
}

fn handle_completion(state: &mut SbdState, rec: CompletionRecord, finish_sleep: Duration) {
    if Some(rec.pid) == state.master_liveness.master_pid {
        state.master_liveness.record_exit(rec.exit_code, rec.signal);
        return;
    }

    // A post-job helper's pid is tracked separately as `exit_pid`, so a
    // reap not matching the job's own pid may still match that.
    let job_id = state
        .job_cards
        .values()
        .find(|c| c.job_pid == Some(rec.pid))
        .or_else(|| state.job_cards.values().find(|c| c.exit_pid == Some(rec.pid)))
        .map(|c| c.job_id);

    let Some(job_id) = job_id else {
        warn!(pid = rec.pid, "reaped pid with no matching job card");
        return;
    };
    let card = state.job_cards.get_mut(&job_id).unwrap();

    card.collected_child = true;
    card.exit_pid = None;
    card.not_reported = true;
    if let Some(code) = rec.exit_code {
        info!(job = %card.job_id, pid = rec.pid, code, "child exited");
    } else if let Some(sig) = rec.signal {
        info!(job = %card.job_id, pid = rec.pid, signal = sig, "child killed by signal");
    }

    if finish_sleep.is_zero() {
        card.need_checkfinish = true;
    } else {
        card.finish_ready_at = Some(Utc::now() + chrono::Duration::from_std(finish_sleep).unwrap());
    }
}

/// Promote job cards whose `LSB_SBD_FINISH_SLEEP` throttle has elapsed.
pub fn advance_finish_throttle(state: &mut SbdState) {
    let now = Utc::now();
    for card in state.job_cards.values_mut() {
        if let Some(ready_at) = card.finish_ready_at {
            if now >= ready_at {
                card.need_checkfinish = true;
                card.finish_ready_at = None;
            }
        }
    }
}
