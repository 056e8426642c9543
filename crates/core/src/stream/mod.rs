//! Stream records as reported by the contract, and the views derived from them.

pub mod accrual;
pub mod aggregate;
pub mod export;

use serde::{Deserialize, Serialize};

use crate::address::Address;

pub use accrual::{AccrualError, Rates};
pub use aggregate::{DashboardTotals, Partition, StatusFilter, StreamFilter};

/// Sequential identifier assigned by the contract. Valid ids are
/// `0..nextStreamId`.
pub type StreamId = u64;

/// One salary stream, exactly as stored by the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    pub id: StreamId,
    pub employer: Address,
    pub employee: Address,
    /// Total payout in wei.
    pub total_amount: u128,
    /// Unix seconds.
    pub start_time: u64,
    /// Seconds.
    pub duration: u64,
    pub withdrawn_amount: u128,
    pub is_active: bool,
}

impl Stream {
    pub fn involves(&self, account: &Address) -> bool {
        self.employer == *account || self.employee == *account
    }

    /// Vested amount at `now` from the stream's own parameters.
    pub fn earned_at(&self, now: u64) -> Result<u128, AccrualError> {
        accrual::earned(self.total_amount, self.start_time, self.duration, now)
    }

    pub fn rates(&self) -> Result<Rates, AccrualError> {
        Rates::of(self.total_amount, self.duration)
    }

    /// Derive the live view of this stream at `now`.
    ///
    /// Active streams are computed locally. A cancelled stream is never
    /// extrapolated: its available amount is whatever the contract last
    /// reported (`chain_available`), or zero when unknown.
    pub fn view(&self, now: u64, chain_available: Option<u128>) -> Result<StreamView, AccrualError> {
        let progress_bps = accrual::progress_bps(self.start_time, self.duration, now)?;
        let rates = self.rates()?;
        let (earned, available) = if self.is_active {
            let earned = self.earned_at(now)?;
            (earned, earned.saturating_sub(self.withdrawn_amount))
        } else {
            let remaining = self.total_amount.saturating_sub(self.withdrawn_amount);
            let available = chain_available.unwrap_or(0).min(remaining);
            (self.withdrawn_amount.saturating_add(available), available)
        };

        Ok(StreamView {
            stream: self.clone(),
            earned,
            available,
            progress_bps,
            rates,
        })
    }
}

/// A [`Stream`] plus the figures derived from it at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamView {
    #[serde(flatten)]
    pub stream: Stream,
    pub earned: u128,
    pub available: u128,
    /// Elapsed share of the duration in basis points.
    pub progress_bps: u16,
    pub rates: Rates,
}

impl StreamView {
    pub fn id(&self) -> StreamId {
        self.stream.id
    }

    pub fn is_active(&self) -> bool {
        self.stream.is_active
    }
}

/// Dashboard state derived from one successful refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardSnapshot {
    pub account: Address,
    /// Unix seconds the views were computed at.
    pub taken_at: u64,
    /// Streams where the account is employer or employee, ordered by id.
    pub streams: Vec<StreamView>,
    pub totals: DashboardTotals,
}

impl DashboardSnapshot {
    pub fn new(account: Address, taken_at: u64, mut streams: Vec<StreamView>) -> Self {
        streams.retain(|v| v.stream.involves(&account));
        streams.sort_by_key(StreamView::id);
        let totals = DashboardTotals::compute(&streams, &account);
        Self {
            account,
            taken_at,
            streams,
            totals,
        }
    }

    /// The snapshot's streams split by the account's role in them.
    pub fn by_role(&self) -> Partition<'_> {
        aggregate::partition(&self.streams, &self.account)
    }

    pub fn employer_streams(&self) -> impl Iterator<Item = &StreamView> {
        self.by_role().employer.into_iter()
    }

    pub fn employee_streams(&self) -> impl Iterator<Item = &StreamView> {
        self.by_role().employee.into_iter()
    }

    pub fn get(&self, id: StreamId) -> Option<&StreamView> {
        self.streams.iter().find(|v| v.id() == id)
    }
}
