use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of [`ReplayStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayStatsSnapshot {
    pub commands_executed: u64,
    pub state_flushes: u64,
    pub draws: u64,
    pub dispatches: u64,
    pub barriers_executed: u64,
    /// Barriers skipped as redundant: repeats, and those opening or closing
    /// a list.
    pub barriers_coalesced: u64,
    pub throwaway_sets: u64,
    pub generated_sequences: u64,
}

/// Replay counters.
///
/// Updated from the replay thread with relaxed ordering; any thread may take
/// a snapshot.
#[derive(Debug, Default)]
pub struct ReplayStats {
    commands_executed: AtomicU64,
    state_flushes: AtomicU64,
    draws: AtomicU64,
    dispatches: AtomicU64,
    barriers_executed: AtomicU64,
    barriers_coalesced: AtomicU64,
    throwaway_sets: AtomicU64,
    generated_sequences: AtomicU64,
}

impl ReplayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_commands_executed(&self) {
        self.commands_executed.fetch_add(1, Ordering::Relaxed);
    }

    /// An emit pass that resolved at least one dirty state group.
    pub fn inc_state_flushes(&self) {
        self.state_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_draws(&self) {
        self.draws.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dispatches(&self) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_barriers_executed(&self) {
        self.barriers_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_barriers_coalesced(&self) {
        self.barriers_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_throwaway_sets(&self) {
        self.throwaway_sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_generated_sequences(&self, n: u64) {
        self.generated_sequences.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ReplayStatsSnapshot {
        ReplayStatsSnapshot {
            commands_executed: self.commands_executed.load(Ordering::Relaxed),
            state_flushes: self.state_flushes.load(Ordering::Relaxed),
            draws: self.draws.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            barriers_executed: self.barriers_executed.load(Ordering::Relaxed),
            barriers_coalesced: self.barriers_coalesced.load(Ordering::Relaxed),
            throwaway_sets: self.throwaway_sets.load(Ordering::Relaxed),
            generated_sequences: self.generated_sequences.load(Ordering::Relaxed),
        }
    }
}
