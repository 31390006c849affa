//! Round Watcher Service
//!
//! Polls the prediction contract, finalizes rounds as the epoch counter moves
//! past them, and captures pool snapshots inside the countdown windows before
//! each round locks.
//!
//! All bookkeeping lives in [`WatcherState`]. The in-memory attempt sets only
//! save store round-trips; `has_snapshot` on the store is what decides whether
//! a snapshot already exists.

use crate::chain::RoundSource;
use crate::clock::Clock;
use crate::config::WatcherConfig;
use crate::db::RoundStore;
use crate::odds::calculate_implied_multiples;
use crate::types::{RoundData, Snapshot, SnapshotType};
use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Bounded set of epochs. Evicts the lowest epochs once over the limit.
#[derive(Debug, Clone)]
pub struct EpochSet {
    epochs: BTreeSet<u64>,
    limit: usize,
}

impl EpochSet {
    pub fn new(limit: usize) -> Self {
        Self {
            epochs: BTreeSet::new(),
            limit,
        }
    }

    pub fn contains(&self, epoch: u64) -> bool {
        self.epochs.contains(&epoch)
    }

    pub fn insert(&mut self, epoch: u64) -> bool {
        self.epochs.insert(epoch)
    }

    pub fn remove(&mut self, epoch: u64) -> bool {
        self.epochs.remove(&epoch)
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    /// Epochs in ascending order
    pub fn to_vec(&self) -> Vec<u64> {
        self.epochs.iter().copied().collect()
    }

    /// Drop the oldest epochs until within the limit. Returns how many were evicted.
    pub fn prune(&mut self) -> usize {
        let mut evicted = 0;
        while self.epochs.len() > self.limit {
            self.epochs.pop_first();
            evicted += 1;
        }
        evicted
    }

}

/// Closed rounds awaiting a stored outcome, keyed by epoch. Each entry remembers
/// the current epoch at the time it was queued.
#[derive(Debug, Clone)]
pub struct PendingRounds {
    queued_at: BTreeMap<u64, u64>,
    limit: usize,
}

impl PendingRounds {
    pub fn new(limit: usize) -> Self {
        Self {
            queued_at: BTreeMap::new(),
            limit,
        }
    }

    /// Queue `epoch`. A round already queued keeps its original queue epoch.
    pub fn insert(&mut self, epoch: u64, current: u64) {
        self.queued_at.entry(epoch).or_insert(current);
    }

    pub fn contains(&self, epoch: u64) -> bool {
        self.queued_at.contains_key(&epoch)
    }

    pub fn remove(&mut self, epoch: u64) -> bool {
        self.queued_at.remove(&epoch).is_some()
    }

    pub fn len(&self) -> usize {
        self.queued_at.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued_at.is_empty()
    }

    /// Epochs in ascending order
    pub fn epochs(&self) -> Vec<u64> {
        self.queued_at.keys().copied().collect()
    }

    /// Remove rounds queued at least `max_lag` epochs before `current`,
    /// returning them. Rounds queued at `current` are never expired.
    pub fn expire(&mut self, current: u64, max_lag: u64) -> Vec<u64> {
        let expired: Vec<u64> = self
            .queued_at
            .iter()
            .filter(|(_, queued)| current.saturating_sub(**queued) >= max_lag.max(1))
            .map(|(epoch, _)| *epoch)
            .collect();
        for epoch in &expired {
            self.queued_at.remove(epoch);
        }
        expired
    }

    /// Drop the oldest rounds until within the limit. Returns how many were evicted.
    pub fn prune(&mut self) -> usize {
        let mut evicted = 0;
        while self.queued_at.len() > self.limit {
            self.queued_at.pop_first();
            evicted += 1;
        }
        evicted
    }
}

/// Everything the watcher remembers between iterations
#[derive(Debug, Clone)]
pub struct WatcherState {
    /// Epoch that was current at the previous successful poll
    pub last_seen_epoch: Option<u64>,
    /// Epochs already attempted, per snapshot type
    pub attempts: HashMap<SnapshotType, EpochSet>,
    /// Closed epochs whose final data is not yet stored with a known outcome
    pub pending_finalization: PendingRounds,
}

impl WatcherState {
    pub fn new(cache_limit: usize) -> Self {
        let attempts = SnapshotType::ACTIVE
            .iter()
            .map(|t| (*t, EpochSet::new(cache_limit)))
            .collect();

        Self {
            last_seen_epoch: None,
            attempts,
            pending_finalization: PendingRounds::new(cache_limit),
        }
    }

    pub fn was_attempted(&self, epoch: u64, snapshot_type: SnapshotType) -> bool {
        self.attempts
            .get(&snapshot_type)
            .map(|set| set.contains(epoch))
            .unwrap_or(false)
    }

    fn mark_attempted(&mut self, epoch: u64, snapshot_type: SnapshotType, cache_limit: usize) {
        self.attempts
            .entry(snapshot_type)
            .or_insert_with(|| EpochSet::new(cache_limit))
            .insert(epoch);
    }

    fn prune(&mut self) {
        for (snapshot_type, set) in self.attempts.iter_mut() {
            let evicted = set.prune();
            if evicted > 0 {
                debug!("Evicted {} old epochs from {} attempt set", evicted, snapshot_type);
            }
        }
        let evicted = self.pending_finalization.prune();
        if evicted > 0 {
            warn!("Dropped {} rounds from the finalization queue (queue full)", evicted);
        }
    }
}

/// What a single iteration did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub current_epoch: u64,
    /// Rounds stored with a known outcome this tick
    pub finalized: Vec<u64>,
    /// Rounds stored but still awaiting the oracle
    pub awaiting_oracle: Vec<u64>,
    /// Snapshots written for the current epoch
    pub captured: Vec<SnapshotType>,
}

impl TickReport {
    fn new(current_epoch: u64) -> Self {
        Self {
            current_epoch,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.finalized.is_empty() && self.awaiting_oracle.is_empty() && self.captured.is_empty()
    }
}

/// Fetch a round and upsert it. Returns the round and whether the stored row changed.
pub async fn finalize_round(
    source: &dyn RoundSource,
    store: &dyn RoundStore,
    epoch: u64,
) -> Result<(RoundData, bool)> {
    let round = source
        .get_round(epoch)
        .await
        .with_context(|| format!("Failed to fetch round {}", epoch))?;

    if round.epoch != epoch {
        anyhow::bail!("Contract returned round {} for epoch {}", round.epoch, epoch);
    }

    let changed = store.upsert_round(&round).await?;
    Ok((round, changed))
}

/// Live round watcher
pub struct RoundWatcher {
    source: Arc<dyn RoundSource>,
    store: Arc<dyn RoundStore>,
    clock: Arc<dyn Clock>,
    config: WatcherConfig,
    state: WatcherState,
}

impl RoundWatcher {
    pub fn new(
        source: Arc<dyn RoundSource>,
        store: Arc<dyn RoundStore>,
        clock: Arc<dyn Clock>,
        config: WatcherConfig,
    ) -> Self {
        let state = WatcherState::new(config.attempt_cache_limit);
        Self {
            source,
            store,
            clock,
            config,
            state,
        }
    }

    pub fn state(&self) -> &WatcherState {
        &self.state
    }

    /// Run forever. A failed iteration is logged and followed by the longer backoff.
    pub async fn run(mut self) {
        info!(
            "Round watcher started (poll: {:?}, backoff: {:?}, cache: {})",
            self.config.poll_interval, self.config.error_backoff, self.config.attempt_cache_limit
        );

        loop {
            let delay = match self.tick().await {
                Ok(report) => {
                    if !report.is_empty() {
                        debug!("Tick at epoch {}: {:?}", report.current_epoch, report);
                    }
                    self.config.poll_interval
                }
                Err(e) => {
                    error!("Watcher iteration failed: {:#}", e);
                    self.config.error_backoff
                }
            };

            tokio::time::sleep(delay).await;
        }
    }

    /// One poll: finalize closed rounds, then check the current round's snapshot windows
    pub async fn tick(&mut self) -> Result<TickReport> {
        let current = self
            .source
            .current_epoch()
            .await
            .context("Failed to read current epoch")?;
        let mut report = TickReport::new(current);

        match self.state.last_seen_epoch {
            None => {
                info!("Watching from epoch {}", current);
                self.state.last_seen_epoch = Some(current);
            }
            Some(last) if current > last => {
                self.enqueue_closed(last, current);
                self.finalize_pending(current, &mut report).await;
                self.state.last_seen_epoch = Some(current);
            }
            Some(last) if current < last => {
                warn!("Current epoch {} is behind last seen epoch {}, ignoring", current, last);
            }
            Some(_) => {}
        }

        self.capture_snapshots(current, &mut report).await?;
        self.state.prune();

        Ok(report)
    }

    /// Queue every epoch in `[last, current)` for finalization
    fn enqueue_closed(&mut self, last: u64, current: u64) {
        let limit = self.config.attempt_cache_limit as u64;
        let start = last.max(current.saturating_sub(limit));

        if current - last > 1 {
            warn!(
                "Epoch advanced {} -> {}, catching up {} rounds",
                last,
                current,
                current - start
            );
        }
        if start > last {
            warn!("Rounds {}..{} are beyond the catch-up limit and will not be finalized", last, start);
        }

        for epoch in start..current {
            self.state.pending_finalization.insert(epoch, current);
        }
    }

    async fn finalize_pending(&mut self, current: u64, report: &mut TickReport) {
        let max_lag = self.config.max_finalize_lag_epochs;
        for epoch in self.state.pending_finalization.expire(current, max_lag) {
            warn!("Giving up on round {}: outcome still unknown after {} epochs", epoch, max_lag);
        }

        for epoch in self.state.pending_finalization.epochs() {
            match finalize_round(self.source.as_ref(), self.store.as_ref(), epoch).await {
                Ok((round, changed)) if round.oracle_called => {
                    self.state.pending_finalization.remove(epoch);
                    info!(
                        "Round {} finalized: {} (multiple: {})",
                        epoch,
                        round.winner(),
                        round
                            .winner_multiple()
                            .map(|m| format!("{:.4}", m))
                            .unwrap_or_else(|| "-".to_string())
                    );
                    if !changed {
                        debug!("Round {} already stored with identical data", epoch);
                    }
                    report.finalized.push(epoch);
                }
                Ok(_) => {
                    debug!("Round {} stored, awaiting oracle", epoch);
                    report.awaiting_oracle.push(epoch);
                }
                Err(e) => {
                    warn!("Failed to finalize round {}: {:#}", epoch, e);
                }
            }
        }
    }

    async fn capture_snapshots(&mut self, current: u64, report: &mut TickReport) -> Result<()> {
        let round = self
            .source
            .get_round(current)
            .await
            .with_context(|| format!("Failed to fetch current round {}", current))?;

        if round.epoch != current {
            warn!("Contract returned round {} for current epoch {}, skipping snapshots", round.epoch, current);
            return Ok(());
        }

        let now = self.clock.now();
        let until_lock = round.seconds_until_lock(now);

        for snapshot_type in SnapshotType::ACTIVE {
            let in_window = snapshot_type
                .window()
                .map(|w| w.contains(until_lock))
                .unwrap_or(false);
            if !in_window || self.state.was_attempted(current, snapshot_type) {
                continue;
            }

            if self.store.has_snapshot(current, snapshot_type).await? {
                debug!("{} snapshot for round {} already stored", snapshot_type, current);
                self.state
                    .mark_attempted(current, snapshot_type, self.config.attempt_cache_limit);
                continue;
            }

            let odds = calculate_implied_multiples(round.total_amount, round.bull_amount, round.bear_amount);
            let snapshot = Snapshot {
                epoch: current,
                snapshot_type,
                taken_at: now,
                total_amount: round.total_amount,
                bull_amount: round.bull_amount,
                bear_amount: round.bear_amount,
                implied_up_multiple: odds.up,
                implied_down_multiple: odds.down,
            };

            self.store.upsert_snapshot(&snapshot).await?;
            self.state
                .mark_attempted(current, snapshot_type, self.config.attempt_cache_limit);

            info!(
                "Captured {} snapshot for round {} ({}s to lock): up={} down={}",
                snapshot_type,
                current,
                until_lock,
                format_multiple(odds.up),
                format_multiple(odds.down)
            );
            report.captured.push(snapshot_type);
        }

        Ok(())
    }
}

fn format_multiple(multiple: Option<f64>) -> String {
    multiple
        .map(|m| format!("{:.3}x", m))
        .unwrap_or_else(|| "-".to_string())
}
