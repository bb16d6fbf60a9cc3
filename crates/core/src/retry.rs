//! Retry queue for moves blocked by another process holding the file.
//!
//! Two phases: a short run of quick attempts at fixed increasing delays, then
//! indefinite patient attempts at a long interval. Only contention reschedules;
//! any other failure abandons the entry.

use crate::config::RetryConfig;
use crate::mover::{MoveError, MoveOutcome, MoveRequest};
use std::path::PathBuf;
use tokio::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Quick,
    Patient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub quick: Vec<Duration>,
    pub patient: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            quick: cfg
                .quick_delays_secs
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
            patient: Duration::from_secs(cfg.patient_interval_secs),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, given how many attempts have failed so far
    /// (the original move counts as the first).
    pub fn delay(&self, failures: u32) -> Duration {
        let idx = failures.saturating_sub(1) as usize;
        self.quick.get(idx).copied().unwrap_or(self.patient)
    }

    pub fn phase(&self, failures: u32) -> Phase {
        if (failures as usize) <= self.quick.len() {
            Phase::Quick
        } else {
            Phase::Patient
        }
    }
}

#[derive(Debug, Clone)]
pub struct PendingMove<T> {
    pub id: u64,
    pub request: MoveRequest,
    /// What to record once the move lands.
    pub intent: T,
    /// Failed attempts so far, including the original move.
    pub failures: u32,
    pub next_attempt: Instant,
}

#[derive(Debug)]
pub enum RetryResult<T> {
    Completed {
        pending: PendingMove<T>,
        outcome: MoveOutcome,
    },
    Rescheduled {
        source: PathBuf,
        failures: u32,
        phase: Phase,
        next_attempt: Instant,
    },
    Abandoned {
        pending: PendingMove<T>,
        error: MoveError,
    },
}

#[derive(Debug)]
pub struct RetryQueue<T> {
    policy: RetryPolicy,
    entries: Vec<PendingMove<T>>,
    next_id: u64,
}

impl<T> RetryQueue<T> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            entries: Vec::new(),
            next_id: 1,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Queue a move whose first attempt hit contention. A later request for the same
    /// source replaces the earlier one.
    pub fn enqueue(&mut self, request: MoveRequest, intent: T, now: Instant) -> u64 {
        self.entries.retain(|p| p.request.source != request.source);
        let id = self.next_id;
        self.next_id += 1;
        let next_attempt = now + self.policy.delay(1);
        info!(
            source = %request.source.display(),
            retry_in = ?self.policy.delay(1),
            "file busy, waiting"
        );
        self.entries.push(PendingMove {
            id,
            request,
            intent,
            failures: 1,
            next_attempt,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn list(&self) -> &[PendingMove<T>] {
        &self.entries
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.entries.iter().map(|p| p.next_attempt).min()
    }

    pub fn cancel(&mut self, id: u64) -> Option<PendingMove<T>> {
        let idx = self.entries.iter().position(|p| p.id == id)?;
        Some(self.entries.remove(idx))
    }

    /// Attempt every due entry once with `attempt`.
    pub fn process_due<F>(&mut self, now: Instant, mut attempt: F) -> Vec<RetryResult<T>>
    where
        F: FnMut(&MoveRequest) -> Result<MoveOutcome, MoveError>,
    {
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|p| p.next_attempt <= now);
        self.entries = waiting;

        let mut results = Vec::with_capacity(due.len());
        for mut pending in due {
            match attempt(&pending.request) {
                Ok(outcome) => results.push(RetryResult::Completed { pending, outcome }),
                Err(e) if e.is_contention() => {
                    pending.failures += 1;
                    pending.next_attempt = now + self.policy.delay(pending.failures);
                    let phase = self.policy.phase(pending.failures);
                    results.push(RetryResult::Rescheduled {
                        source: pending.request.source.clone(),
                        failures: pending.failures,
                        phase,
                        next_attempt: pending.next_attempt,
                    });
                    self.entries.push(pending);
                }
                Err(error) => {
                    warn!(
                        source = %pending.request.source.display(),
                        error = %error,
                        "giving up on move"
                    );
                    results.push(RetryResult::Abandoned { pending, error });
                }
            }
        }
        results
    }
}
