use tracing::{error, info, warn};

use crate::reap::{MASTER_RECONFIG, MAX_SAME_EXIT_STREAK};

/// Tracks the supervised master daemon's pid and the restart policy
/// driven by consecutive same-code exits.
#[derive(Debug, Default)]
pub struct MasterLiveness {
    pub master_pid: Option<u32>,
    last_code: Option<i32>,
    same_code_streak: u32,
    pub should_restart: bool,
}

impl MasterLiveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawned(&mut self, pid: u32) {
        self.master_pid = Some(pid);
        self.should_restart = false;
    }

    pub fn record_exit(&mut self, exit_code: Option<i32>, signal: Option<i32>) {
        self.master_pid = None;

        if let Some(sig) = signal {
            warn!(signal = sig, "master daemon terminated by signal");
            self.same_code_streak = 0;
            self.last_code = None;
            self.should_restart = true;
            return;
        }

        match exit_code {
            Some(code) if code == MASTER_RECONFIG => {
                info!("master daemon exited for reconfiguration, restarting unconditionally");
                self.same_code_streak = 0;
                self.last_code = None;
                self.should_restart = true;
            }
            Some(code) => {
                if self.last_code == Some(code) {
                    self.same_code_streak += 1;
                } else {
                    self.last_code = Some(code);
                    self.same_code_streak = 1;
                }
                if self.same_code_streak >= MAX_SAME_EXIT_STREAK {
                    error!(code, streak = self.same_code_streak, "master exited the same way too many times, giving up");
                    self.should_restart = false;
                } else {
                    warn!(code, streak = self.same_code_streak, "master daemon exited, restarting");
                    self.should_restart = true;
                }
            }
            None => {
                warn!("master daemon exited with no status, restarting");
                self.should_restart = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconfig_exit_always_restarts_and_resets_streak() {
        let mut live = MasterLiveness::new();
        live.spawned(100);
        live.record_exit(Some(7), None);
        live.record_exit(Some(7), None);
        live.record_exit(Some(MASTER_RECONFIG), None);
        assert!(live.should_restart);
        assert_eq!(live.same_code_streak, 0);
    }

    #[test]
    fn repeated_same_code_exit_eventually_stops_restarting() {
        let mut live = MasterLiveness::new();
        for _ in 0..MAX_SAME_EXIT_STREAK {
            live.record_exit(Some(9), None);
        }
        assert!(!live.should_restart);
    }

    #[test]
    fn signal_termination_always_restarts() {
        let mut live = MasterLiveness::new();
        live.record_exit(None, Some(11));
        assert!(live.should_restart);
    }
}
