use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::Receiver;

use batch_core::JobId;

use crate::cores::{Affinity, CoreTable, QueueShareTable};
use crate::jobcard::JobCard;
use crate::liveness::MasterLiveness;
use crate::reap::{self, CompletionRecord};
use crate::window;

pub struct SbdConfig {
    pub finish_sleep: std::time::Duration,
    pub window_sig_enabled: bool,
}

impl Default for SbdConfig {
    fn default() -> Self {
        SbdConfig { finish_sleep: std::time::Duration::from_millis(0), window_sig_enabled: true }
    }
}

/// A host daemon's whole in-memory state, passed by reference into every
/// operation rather than kept behind process-wide statics.
pub struct SbdState {
    pub job_cards: HashMap<JobId, JobCard>,
    pub core_table: CoreTable,
    pub queue_shares: QueueShareTable,
    pub master_liveness: MasterLiveness,
    pub completions_rx: Receiver<CompletionRecord>,
    pub config: SbdConfig,
}

impl SbdState {
    pub fn new(num_cores: u32, affinity: Arc<dyn Affinity>, completions_rx: Receiver<CompletionRecord>, config: SbdConfig) -> Self {
        SbdState {
            job_cards: HashMap::new(),
            core_table: CoreTable::new(num_cores, affinity),
            queue_shares: QueueShareTable::new(),
            master_liveness: MasterLiveness::new(),
            completions_rx,
            config,
        }
    }

    pub fn add_job_card(&mut self, card: JobCard) {
        self.job_cards.insert(card.job_id, card);
    }

    pub fn remove_job_card(&mut self, job_id: JobId) -> Option<JobCard> {
        self.job_cards.remove(&job_id)
    }

    /// One iteration of the daemon's event loop: drain reaped children,
    /// advance the finish-report throttle, and re-evaluate every job
    /// card's run window. Structural job-card add/remove stays the
    /// exclusive right of callers outside this function (e.g. dispatch
    /// handling and finish reporting), never the reap path.
    pub fn tick(&mut self, now: chrono::DateTime<chrono::Utc>) -> Vec<JobId> {
        let finish_sleep = self.config.finish_sleep;
        reap::drain_completions(self, finish_sleep);
        reap::advance_finish_throttle(self);

        let window_sig_enabled = self.config.window_sig_enabled;
        let mut to_signal = Vec::new();
        for (id, card) in self.job_cards.iter_mut() {
            let outcome = window::window_ok(card, now, window_sig_enabled);
            if outcome.should_signal {
                to_signal.push(*id);
            }
        }
        to_signal
    }
}
