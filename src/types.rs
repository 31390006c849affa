//! Core types for rounds, outcomes and pool snapshots

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pool amounts in wei. 256-bit to match the contract's storage without loss.
pub type Wei = U256;

/// Round data exactly as read from the prediction contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundData {
    pub epoch: u64,
    pub start_timestamp: i64,
    pub lock_timestamp: i64,
    pub close_timestamp: i64,
    /// Oracle prices are fixed-point and may be signed
    pub lock_price: i128,
    pub close_price: i128,
    pub total_amount: Wei,
    pub bull_amount: Wei,
    pub bear_amount: Wei,
    pub reward_base_cal_amount: Wei,
    pub reward_amount: Wei,
    pub oracle_called: bool,
}

impl RoundData {
    /// Derive the winning side. Unknown until the oracle has been called.
    pub fn winner(&self) -> Winner {
        if !self.oracle_called {
            return Winner::Unknown;
        }
        match self.close_price.cmp(&self.lock_price) {
            std::cmp::Ordering::Greater => Winner::Up,
            std::cmp::Ordering::Less => Winner::Down,
            std::cmp::Ordering::Equal => Winner::Draw,
        }
    }

    /// Payout multiple for the winning side (reward pool / winning stake).
    ///
    /// `None` for draws, unresolved rounds, and rounds where nobody backed
    /// the winning side.
    pub fn winner_multiple(&self) -> Option<f64> {
        let winning_pool = match self.winner() {
            Winner::Up => self.bull_amount,
            Winner::Down => self.bear_amount,
            Winner::Draw | Winner::Unknown => return None,
        };

        if winning_pool.is_zero() || self.reward_base_cal_amount.is_zero() {
            return None;
        }

        Some(wei_to_f64(self.reward_amount) / wei_to_f64(self.reward_base_cal_amount))
    }

    /// Seconds remaining until this round locks (negative once locked)
    pub fn seconds_until_lock(&self, now: i64) -> i64 {
        self.lock_timestamp - now
    }
}

/// Round outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Winner {
    Up,
    Down,
    Draw,
    Unknown,
}

impl Winner {
    pub fn as_str(&self) -> &'static str {
        match self {
            Winner::Up => "UP",
            Winner::Down => "DOWN",
            Winner::Draw => "DRAW",
            Winner::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Winner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Winner {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UP" => Ok(Winner::Up),
            "DOWN" => Ok(Winner::Down),
            "DRAW" => Ok(Winner::Draw),
            "UNKNOWN" => Ok(Winner::Unknown),
            other => anyhow::bail!("Unknown winner value: {}", other),
        }
    }
}

/// Countdown window relative to lock: `lower < seconds_until_lock <= upper`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotWindow {
    pub lower_exclusive: i64,
    pub upper_inclusive: i64,
}

impl SnapshotWindow {
    pub fn contains(&self, seconds_until_lock: i64) -> bool {
        seconds_until_lock > self.lower_exclusive && seconds_until_lock <= self.upper_inclusive
    }

    pub fn width_secs(&self) -> i64 {
        self.upper_inclusive - self.lower_exclusive
    }
}

/// Lead time before lock at which a pool snapshot is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SnapshotType {
    /// Only present in legacy data, never captured by the watcher
    TMinus25s,
    TMinus20s,
    TMinus8s,
    TMinus4s,
}

impl SnapshotType {
    /// Types the live watcher captures, furthest from lock first
    pub const ACTIVE: [SnapshotType; 3] = [
        SnapshotType::TMinus20s,
        SnapshotType::TMinus8s,
        SnapshotType::TMinus4s,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotType::TMinus25s => "T_MINUS_25S",
            SnapshotType::TMinus20s => "T_MINUS_20S",
            SnapshotType::TMinus8s => "T_MINUS_8S",
            SnapshotType::TMinus4s => "T_MINUS_4S",
        }
    }

    /// Capture window for this type. Legacy types have none.
    pub fn window(&self) -> Option<SnapshotWindow> {
        let (lower_exclusive, upper_inclusive) = match self {
            SnapshotType::TMinus20s => (17, 22),
            SnapshotType::TMinus8s => (6, 10),
            SnapshotType::TMinus4s => (2, 6),
            SnapshotType::TMinus25s => return None,
        };
        Some(SnapshotWindow {
            lower_exclusive,
            upper_inclusive,
        })
    }

    /// Width of the narrowest active window in seconds
    pub fn narrowest_window_secs() -> i64 {
        Self::ACTIVE
            .iter()
            .filter_map(|t| t.window())
            .map(|w| w.width_secs())
            .min()
            .unwrap_or(0)
    }
}

impl fmt::Display for SnapshotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SnapshotType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "T_MINUS_25S" => Ok(SnapshotType::TMinus25s),
            "T_MINUS_20S" => Ok(SnapshotType::TMinus20s),
            "T_MINUS_8S" => Ok(SnapshotType::TMinus8s),
            "T_MINUS_4S" => Ok(SnapshotType::TMinus4s),
            other => anyhow::bail!("Unknown snapshot type: {}", other),
        }
    }
}

/// Point-in-time pool state for one round
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub epoch: u64,
    pub snapshot_type: SnapshotType,
    pub taken_at: i64,
    pub total_amount: Wei,
    pub bull_amount: Wei,
    pub bear_amount: Wei,
    pub implied_up_multiple: Option<f64>,
    pub implied_down_multiple: Option<f64>,
}

/// Round row as persisted, with derived outcome fields
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRound {
    pub round: RoundData,
    pub winner: Winner,
    pub winner_multiple: Option<f64>,
    pub inserted_at: String,
    pub updated_at: String,
}

/// Row counts for the stats command
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub rounds: i64,
    pub resolved_rounds: i64,
    pub snapshots: i64,
    pub snapshots_by_type: Vec<(String, i64)>,
    pub latest_epoch: Option<u64>,
}

/// Lossy conversion used only where ratios are computed
pub fn wei_to_f64(value: Wei) -> f64 {
    match u128::try_from(value) {
        Ok(v) => v as f64,
        Err(_) => value.to_string().parse().unwrap_or(f64::MAX),
    }
}

/// Whole-token amount in wei (18 decimals) for display and tests
pub fn ether(amount: u64) -> Wei {
    U256::from(amount) * U256::from(10u64).pow(U256::from(18u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved_round(lock_price: i128, close_price: i128) -> RoundData {
        RoundData {
            epoch: 100,
            start_timestamp: 1_700_000_000,
            lock_timestamp: 1_700_000_300,
            close_timestamp: 1_700_000_600,
            lock_price,
            close_price,
            total_amount: ether(10),
            bull_amount: ether(6),
            bear_amount: ether(4),
            reward_base_cal_amount: ether(6),
            reward_amount: U256::from(97u64) * U256::from(10u64).pow(U256::from(17u64)),
            oracle_called: true,
        }
    }

    #[test]
    fn test_winner_up_with_multiple() {
        let round = resolved_round(30_000_00000000, 30_100_00000000);
        assert_eq!(round.winner(), Winner::Up);
        let multiple = round.winner_multiple().unwrap();
        assert!((multiple - 1.6167).abs() < 0.001);
    }

    #[test]
    fn test_winner_down_and_draw() {
        let mut round = resolved_round(30_100_00000000, 30_000_00000000);
        round.reward_base_cal_amount = ether(4);
        assert_eq!(round.winner(), Winner::Down);
        assert!(round.winner_multiple().is_some());

        let draw = resolved_round(30_000_00000000, 30_000_00000000);
        assert_eq!(draw.winner(), Winner::Draw);
        assert_eq!(draw.winner_multiple(), None);
    }

    #[test]
    fn test_unresolved_round_is_unknown() {
        let mut round = resolved_round(1, 2);
        round.oracle_called = false;
        assert_eq!(round.winner(), Winner::Unknown);
        assert_eq!(round.winner_multiple(), None);

        round.close_price = 0;
        assert_eq!(round.winner(), Winner::Unknown);
    }

    #[test]
    fn test_empty_winning_pool_has_no_multiple() {
        let mut round = resolved_round(1, 2);
        round.bull_amount = U256::ZERO;
        round.total_amount = ether(4);
        assert_eq!(round.winner(), Winner::Up);
        assert_eq!(round.winner_multiple(), None);
    }

    #[test]
    fn test_negative_prices_compare_by_order() {
        let round = resolved_round(-5, -3);
        assert_eq!(round.winner(), Winner::Up);
    }

    #[test]
    fn test_windows_do_not_overlap() {
        for secs in -5..30 {
            let hits = SnapshotType::ACTIVE
                .iter()
                .filter(|t| t.window().map(|w| w.contains(secs)).unwrap_or(false))
                .count();
            assert!(hits <= 1, "{} seconds matched {} windows", secs, hits);
        }
    }

    #[test]
    fn test_window_boundaries() {
        let w = SnapshotType::TMinus20s.window().unwrap();
        assert!(!w.contains(17));
        assert!(w.contains(18));
        assert!(w.contains(22));
        assert!(!w.contains(23));
        assert_eq!(SnapshotType::TMinus25s.window(), None);
        assert_eq!(SnapshotType::narrowest_window_secs(), 4);
    }

    #[test]
    fn test_snapshot_type_parse() {
        for t in [
            SnapshotType::TMinus25s,
            SnapshotType::TMinus20s,
            SnapshotType::TMinus8s,
            SnapshotType::TMinus4s,
        ] {
            assert_eq!(t.as_str().parse::<SnapshotType>().unwrap(), t);
        }
        assert!("T_MINUS_1S".parse::<SnapshotType>().is_err());
    }
}
