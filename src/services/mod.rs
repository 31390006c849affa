//! Background services for the watcher

pub mod backfill;
pub mod round_watcher;

pub use backfill::{backfill_rounds, BackfillReport};
pub use round_watcher::{finalize_round, EpochSet, PendingRounds, RoundWatcher, TickReport, WatcherState};
