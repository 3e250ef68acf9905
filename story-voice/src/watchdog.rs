// Story Voice - Chunk deadline watchdog
// Collaborator calls are synchronous and cannot be preempted, so a chunk's
// elapsed time is checked after it returns and late results are discarded.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutEvent {
    pub elapsed: Duration,
    pub limit: Duration,
}

/// Simple timeout tracker that fires once per start() call.
#[derive(Debug)]
pub struct TimeoutTracker {
    limit: Duration,
    started_at: Option<Instant>,
    fired: bool,
}

impl TimeoutTracker {
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            started_at: None,
            fired: false,
        }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn start(&mut self, now: Instant) {
        self.started_at = Some(now);
        self.fired = false;
    }

    pub fn stop(&mut self) {
        self.started_at = None;
        self.fired = false;
    }

    pub fn check(&mut self, now: Instant) -> Option<TimeoutEvent> {
        let started_at = self.started_at?;
        if self.fired {
            return None;
        }
        let elapsed = now.duration_since(started_at);
        if elapsed > self.limit {
            self.fired = true;
            return Some(TimeoutEvent {
                elapsed,
                limit: self.limit,
            });
        }
        None
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }
}

/// Optional per-chunk deadline. Without a limit it never fires.
#[derive(Debug)]
pub struct ChunkDeadline {
    tracker: Option<TimeoutTracker>,
}

impl ChunkDeadline {
    pub fn new(limit: Option<Duration>) -> Self {
        Self {
            tracker: limit.map(TimeoutTracker::new),
        }
    }

    pub fn begin(&mut self) {
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.start(Instant::now());
        }
    }

    /// Finish the current chunk, reporting whether it overran.
    pub fn finish(&mut self) -> Option<TimeoutEvent> {
        self.finish_at(Instant::now())
    }

    fn finish_at(&mut self, now: Instant) -> Option<TimeoutEvent> {
        let tracker = self.tracker.as_mut()?;
        let event = tracker.check(now);
        tracker.stop();
        event
    }
}
