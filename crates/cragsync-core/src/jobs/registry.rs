//! Active-job registry: the single source of truth for single-flight.
//!
//! A pin has at most one live (Queued or Running) job. Registration is an
//! atomic check-and-insert under one lock. Finished outcomes move to a
//! retained set where they stay queryable until observed plus a grace
//! period.

use super::{JobId, JobOutcome, JobSnapshot};
use crate::cancel::CancellationToken;
use crate::error::{Result, SyncError};
use crate::node::Pin;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Everything a freshly registered job needs to run.
#[derive(Debug)]
pub struct Registration {
    pub id: JobId,
    pub pin: Pin,
    pub cancel: CancellationToken,
    pub tx: watch::Sender<JobSnapshot>,
}

#[derive(Debug)]
struct LiveJob {
    id: JobId,
    cancel: CancellationToken,
    rx: watch::Receiver<JobSnapshot>,
}

#[derive(Debug)]
struct Finished {
    outcome: Arc<JobOutcome>,
    finished_at: Instant,
    observed_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct RegistryState {
    live: HashMap<Pin, LiveJob>,
    finished: HashMap<Pin, Finished>,
}

#[derive(Debug)]
pub struct JobRegistry {
    state: Mutex<RegistryState>,
    grace: Duration,
    max_retained: usize,
}

impl JobRegistry {
    pub fn new(grace: Duration, max_retained: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            grace,
            max_retained: max_retained.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim `pin` for a new job, failing if one is already live.
    pub fn register(&self, pin: &Pin) -> Result<Registration> {
        let mut state = self.lock();
        self.prune(&mut state);

        if state.live.contains_key(pin) {
            return Err(SyncError::AlreadyDownloading {
                pin: pin.to_string(),
            });
        }

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(JobSnapshot::queued(id, pin.clone()));
        state.live.insert(
            pin.clone(),
            LiveJob {
                id,
                cancel: cancel.clone(),
                rx,
            },
        );
        // A new job supersedes the previous outcome for this pin.
        state.finished.remove(pin);
        debug!("Registered job {} for {}", id, pin);

        Ok(Registration {
            id,
            pin: pin.clone(),
            cancel,
            tx,
        })
    }

    pub fn is_live(&self, pin: &Pin) -> bool {
        self.lock().live.contains_key(pin)
    }

    pub fn live_pins(&self) -> Vec<Pin> {
        self.lock().live.keys().cloned().collect()
    }

    pub fn live_count(&self) -> usize {
        self.lock().live.len()
    }

    /// Move a job from the live set to the retained outcomes.
    pub fn finish(&self, outcome: Arc<JobOutcome>) {
        let mut state = self.lock();
        let pin = outcome.pin.clone();
        if state.live.get(&pin).is_some_and(|job| job.id == outcome.id) {
            state.live.remove(&pin);
        }
        state.finished.insert(
            pin,
            Finished {
                outcome,
                finished_at: Instant::now(),
                observed_at: None,
            },
        );
        self.prune(&mut state);
    }

    /// Start the grace period of a retained outcome.
    pub fn mark_observed(&self, pin: &Pin, id: JobId) {
        let mut state = self.lock();
        if let Some(finished) = state.finished.get_mut(pin) {
            if finished.outcome.id == id && finished.observed_at.is_none() {
                finished.observed_at = Some(Instant::now());
            }
        }
    }

    /// Live snapshot or retained outcome for `pin`. Counts as an observation.
    pub fn snapshot(&self, pin: &Pin) -> Option<JobSnapshot> {
        let mut state = self.lock();
        self.prune(&mut state);
        if let Some(job) = state.live.get(pin) {
            return Some(job.rx.borrow().clone());
        }
        let finished = state.finished.get_mut(pin)?;
        finished.observed_at.get_or_insert_with(Instant::now);
        Some(JobSnapshot::finished(finished.outcome.clone()))
    }

    pub fn live_snapshots(&self) -> Vec<JobSnapshot> {
        let state = self.lock();
        let mut snapshots: Vec<_> = state.live.values().map(|job| job.rx.borrow().clone()).collect();
        snapshots.sort_by(|a, b| a.pin.cmp(&b.pin));
        snapshots
    }

    /// Cancel the live job for `pin`. Returns whether one existed.
    pub fn cancel(&self, pin: &Pin) -> bool {
        match self.lock().live.get(pin) {
            Some(job) => {
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for job in self.lock().live.values() {
            job.cancel.cancel();
        }
    }

    fn prune(&self, state: &mut RegistryState) {
        let now = Instant::now();
        let grace = self.grace;
        state.finished.retain(|_, finished| match finished.observed_at {
            Some(observed) => now.duration_since(observed) < grace,
            None => true,
        });

        while state.finished.len() > self.max_retained {
            let oldest = state
                .finished
                .iter()
                .min_by_key(|(_, f)| f.finished_at)
                .map(|(pin, _)| pin.clone());
            match oldest {
                Some(pin) => {
                    state.finished.remove(&pin);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn pin(s: &str) -> Pin {
        s.parse().unwrap()
    }

    fn outcome(reg: &Registration) -> Arc<JobOutcome> {
        Arc::new(JobOutcome {
            id: reg.id,
            pin: reg.pin.clone(),
            result: Ok(()),
            nodes: Vec::new(),
            bytes_done: 0,
        })
    }

    #[test]
    fn test_single_flight() {
        let registry = JobRegistry::new(Duration::from_secs(60), 16);
        let zone = pin("Zone/Z1");
        let _first = registry.register(&zone).unwrap();
        let err = registry.register(&zone).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyDownloading);
        assert!(registry.register(&pin("Zone/Z2")).is_ok());
    }

    #[test]
    fn test_finish_frees_pin_and_retains_outcome() {
        let registry = JobRegistry::new(Duration::from_secs(60), 16);
        let zone = pin("Zone/Z1");
        let reg = registry.register(&zone).unwrap();
        registry.finish(outcome(&reg));

        assert!(!registry.is_live(&zone));
        let snapshot = registry.snapshot(&zone).unwrap();
        assert!(snapshot.state.is_terminal());
        assert!(registry.register(&zone).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcome_expires_after_observation_and_grace() {
        let registry = JobRegistry::new(Duration::from_secs(5), 16);
        let zone = pin("Zone/Z1");
        let reg = registry.register(&zone).unwrap();
        registry.finish(outcome(&reg));

        // Unobserved outcomes are kept regardless of age.
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(registry.snapshot(&zone).is_some());

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(registry.snapshot(&zone).is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(registry.snapshot(&zone).is_none());
    }

    #[test]
    fn test_retained_outcomes_are_capped() {
        let registry = JobRegistry::new(Duration::from_secs(60), 2);
        for id in ["S1", "S2", "S3"] {
            let reg = registry.register(&pin(&format!("Sector/{}", id))).unwrap();
            registry.finish(outcome(&reg));
        }
        let retained = ["S1", "S2", "S3"]
            .iter()
            .filter(|id| registry.snapshot(&pin(&format!("Sector/{}", id))).is_some())
            .count();
        assert_eq!(retained, 2);
    }

    #[test]
    fn test_cancel_live_job() {
        let registry = JobRegistry::new(Duration::from_secs(60), 16);
        let zone = pin("Zone/Z1");
        let reg = registry.register(&zone).unwrap();
        assert!(registry.cancel(&zone));
        assert!(reg.cancel.is_cancelled());
        assert!(!registry.cancel(&pin("Zone/Z2")));
    }
}
