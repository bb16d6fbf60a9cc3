//! Temporal grouping of arrivals into batch or single presentations.

use crate::config::BatchConfig;
use crate::models::FileEvent;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presentation {
    Batch(Vec<FileEvent>),
    Singles(Vec<FileEvent>),
}

impl Presentation {
    pub fn files(&self) -> &[FileEvent] {
        match self {
            Presentation::Batch(f) | Presentation::Singles(f) => f,
        }
    }
}

/// Whether a flushed buffer forms one batch. Arrival order is by timestamp.
pub fn is_batch(events: &[FileEvent], cfg: &BatchConfig) -> bool {
    if events.len() < 2 {
        return false;
    }
    let mut stamps: Vec<i64> = events.iter().map(|e| e.arrived_at).collect();
    stamps.sort_unstable();

    let rapid = cfg.rapid_window_ms as i64;
    let every_gap_rapid = stamps.windows(2).all(|w| w[1] - w[0] <= rapid);
    if every_gap_rapid {
        return true;
    }

    let span = stamps[stamps.len() - 1] - stamps[0];
    events.len() >= cfg.min_batch_size && span <= cfg.debounce_ms as i64
}

pub fn group(mut events: Vec<FileEvent>, cfg: &BatchConfig) -> Presentation {
    events.sort_by_key(|e| e.arrived_at);
    if is_batch(&events, cfg) {
        Presentation::Batch(events)
    } else {
        Presentation::Singles(events)
    }
}

/// Buffers arrivals behind a debounce timer that restarts on each arrival.
#[derive(Debug)]
pub struct BatchCoordinator {
    cfg: BatchConfig,
    buffer: Vec<FileEvent>,
    deadline: Option<Instant>,
}

impl BatchCoordinator {
    pub fn new(cfg: BatchConfig) -> Self {
        Self {
            cfg,
            buffer: Vec::new(),
            deadline: None,
        }
    }

    pub fn ingest(&mut self, event: FileEvent, now: Instant) {
        if self.buffer.iter().any(|e| e.path == event.path) {
            // Same file reported twice by the watcher.
            self.deadline = Some(now + self.cfg.debounce());
            return;
        }
        self.buffer.push(event);
        self.deadline = Some(now + self.cfg.debounce());
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Files waiting for the timer.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Flush if the timer has fired.
    pub fn poll(&mut self, now: Instant) -> Option<Presentation> {
        match self.deadline {
            Some(d) if now >= d => self.flush(),
            _ => None,
        }
    }

    pub fn flush(&mut self) -> Option<Presentation> {
        self.deadline = None;
        if self.buffer.is_empty() {
            return None;
        }
        let events = std::mem::take(&mut self.buffer);
        Some(group(events, &self.cfg))
    }
}
