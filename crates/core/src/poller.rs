//! Periodic dashboard refresh.
//!
//! ## Architecture
//!
//! The poller is a single spawned task driven by the wallet session:
//!
//! - While the session is not ready (no account, or the wrong network) the
//!   poller is [`PollerState::Idle`] and issues no reads.
//! - Once ready it arms an interval and, on every tick, reads the stream
//!   count, the records of the account's streams and the contract's
//!   available figures, recomputes every view and publishes a
//!   [`DashboardSnapshot`].
//!
//! A refresh runs to completion before the next tick is taken; ticks that
//! fall due meanwhile are skipped, so reads never overlap. A session change
//! abandons any refresh in progress and re-evaluates the state. Dropping the
//! [`PollerHandle`] (or calling [`PollerHandle::stop`]) ends the task.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::address::Address;
use crate::chain::{ChainError, StreamContract};
use crate::config::ClientConfig;
use crate::session::{Session, SessionStatus};
use crate::stream::{DashboardSnapshot, Stream, StreamId};
use crate::time_source::TimeSource;

/// Per-stream reads in flight at once during one refresh.
pub const MAX_CONCURRENT_READS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling { account: Address },
}

/// Records carried between refreshes for one account.
///
/// Employer and employee never change once a stream exists, so a stream
/// found not to involve the account is never read again. Last good records
/// stand in for streams whose read fails.
#[derive(Debug, Default)]
pub struct RefreshCache {
    records: HashMap<StreamId, Stream>,
    unrelated: HashSet<StreamId>,
}

impl RefreshCache {
    pub fn clear(&mut self) {
        self.records.clear();
        self.unrelated.clear();
    }
}

pub struct Poller<C: StreamContract, T: TimeSource> {
    contract: Arc<C>,
    clock: T,
    interval: Duration,
    expected_chain_id: u64,
}

impl<C: StreamContract, T: TimeSource> Poller<C, T> {
    pub fn new(contract: Arc<C>, clock: T, config: &ClientConfig) -> Self {
        Self {
            contract,
            clock,
            interval: config.poll_interval,
            expected_chain_id: config.chain_id,
        }
    }

    /// One full read-then-recompute pass for `account`.
    ///
    /// Fails only if the stream count cannot be read. Failed per-stream reads
    /// fall back to the cached record, or drop the stream from this snapshot
    /// if it has never been read.
    pub async fn refresh(
        &self,
        account: Address,
        cache: &mut RefreshCache,
    ) -> Result<DashboardSnapshot, ChainError> {
        let count = self.contract.next_stream_id().await?;

        let candidates: Vec<StreamId> = (0..count)
            .filter(|id| !cache.unrelated.contains(id))
            .collect();
        let reads = candidates.into_iter().map(|id| {
            let contract = &self.contract;
            async move {
                let record = contract.stream(id).await;
                let involves = match &record {
                    Ok(stream) => stream.involves(&account),
                    Err(_) => true,
                };
                let available = if involves {
                    Some(contract.available(id).await)
                } else {
                    None
                };
                (id, record, available)
            }
        });
        let results: Vec<_> = futures::stream::iter(reads)
            .buffer_unordered(MAX_CONCURRENT_READS)
            .collect()
            .await;

        let now = self.clock.now_secs();
        let mut views = Vec::with_capacity(results.len());
        for (id, record, available) in results {
            let stream = match record {
                Ok(stream) => {
                    if !stream.involves(&account) {
                        cache.unrelated.insert(id);
                        cache.records.remove(&id);
                        continue;
                    }
                    cache.records.insert(id, stream.clone());
                    stream
                }
                Err(e) => match cache.records.get(&id) {
                    Some(stale) => {
                        tracing::warn!(stream_id = id, error = %e, "stream read failed, using last good record");
                        stale.clone()
                    }
                    None => {
                        tracing::warn!(stream_id = id, error = %e, "stream read failed");
                        continue;
                    }
                },
            };

            let chain_available = match available {
                Some(Ok(amount)) => Some(amount),
                Some(Err(e)) => {
                    tracing::debug!(stream_id = id, error = %e, "available read failed");
                    None
                }
                None => None,
            };

            match stream.view(now, chain_available) {
                Ok(view) => views.push(view),
                Err(e) => {
                    tracing::warn!(stream_id = id, error = %e, "skipping stream with invalid parameters");
                }
            }
        }

        let snapshot = DashboardSnapshot::new(account, now, views);
        tracing::debug!(
            %account,
            streams = snapshot.streams.len(),
            taken_at = snapshot.taken_at,
            "dashboard refreshed"
        );
        Ok(snapshot)
    }

    /// Start polling in the background, driven by `session`.
    pub fn spawn(self, session: watch::Receiver<Session>) -> PollerHandle {
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let (state_tx, state_rx) = watch::channel(PollerState::Idle);
        let task = tokio::spawn(self.run(session, snapshot_tx, state_tx));
        PollerHandle {
            snapshots: snapshot_rx,
            state: state_rx,
            task: Some(task),
        }
    }

    async fn run(
        self,
        mut session: watch::Receiver<Session>,
        snapshot_tx: watch::Sender<Option<DashboardSnapshot>>,
        state_tx: watch::Sender<PollerState>,
    ) {
        let mut cache = RefreshCache::default();

        'session: loop {
            let status = session.borrow_and_update().status(self.expected_chain_id);
            let SessionStatus::Ready { account } = status else {
                if *state_tx.borrow() != PollerState::Idle {
                    tracing::info!(?status, "poller idle");
                }
                state_tx.send_replace(PollerState::Idle);
                snapshot_tx.send_replace(None);
                cache.clear();
                if session.changed().await.is_err() {
                    return;
                }
                continue 'session;
            };

            if *state_tx.borrow() != (PollerState::Polling { account }) {
                cache.clear();
                snapshot_tx.send_replace(None);
                tracing::info!(
                    %account,
                    interval_ms = self.interval.as_millis() as u64,
                    "poller started"
                );
            }
            state_tx.send_replace(PollerState::Polling { account });

            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    changed = session.changed() => {
                        if changed.is_err() {
                            break 'session;
                        }
                        continue 'session;
                    }
                    _ = interval.tick() => {}
                }

                tokio::select! {
                    changed = session.changed() => {
                        if changed.is_err() {
                            break 'session;
                        }
                        continue 'session;
                    }
                    result = self.refresh(account, &mut cache) => match result {
                        Ok(snapshot) => {
                            snapshot_tx.send_replace(Some(snapshot));
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "dashboard refresh failed, keeping last snapshot");
                        }
                    }
                }
            }
        }

        state_tx.send_replace(PollerState::Idle);
        tracing::info!("poller stopped: session closed");
    }
}

/// Handle to a running poller. Dropping it stops the task.
pub struct PollerHandle {
    snapshots: watch::Receiver<Option<DashboardSnapshot>>,
    state: watch::Receiver<PollerState>,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Receiver of every published snapshot; `None` while idle.
    pub fn subscribe(&self) -> watch::Receiver<Option<DashboardSnapshot>> {
        self.snapshots.clone()
    }

    pub fn latest(&self) -> Option<DashboardSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<PollerState> {
        self.state.clone()
    }

    /// Stop polling and wait until the task has ended. A refresh in progress
    /// is abandoned.
    pub async fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            tracing::info!("poller stopped");
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
