//! Prediction Round Watcher Library
//!
//! Follows the round lifecycle of an on-chain up/down price prediction market
//! and records, for every round:
//!
//! 1. **Final outcome**: lock/close prices, pool sizes, winner and payout
//!    multiple, written once the epoch counter has moved past the round.
//! 2. **Pre-lock snapshots**: pool state and implied multiples at roughly
//!    20, 8 and 4 seconds before lock.
//!
//! Everything lands in SQLite for offline analysis.

pub mod chain;
pub mod clock;
pub mod config;
pub mod db;
pub mod odds;
pub mod services;
pub mod types;

pub use chain::{PredictionContract, RoundSource};
pub use clock::{Clock, SystemClock};
pub use config::{Config, WatcherConfig};
pub use db::{Database, RoundStore};
pub use odds::{calculate_implied_multiples, ImpliedMultiples};
pub use services::RoundWatcher;
pub use types::{RoundData, Snapshot, SnapshotType, Winner};
