//! Dashboard totals and stream filtering.
//!
//! Everything here is recomputed from the current stream set; nothing is
//! carried between refreshes.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::StreamView;
use crate::address::Address;

/// The account's streams split by role. One stream lands in both halves
/// when the account is its own employee.
#[derive(Debug, Default)]
pub struct Partition<'a> {
    pub employer: Vec<&'a StreamView>,
    pub employee: Vec<&'a StreamView>,
}

impl<'a> Partition<'a> {
    /// Every stream in either half, a self-stream only once.
    pub fn involved(&self) -> impl Iterator<Item = &'a StreamView> + '_ {
        let employee_only = self
            .employee
            .iter()
            .copied()
            .filter(|v| v.stream.employer != v.stream.employee);
        self.employer.iter().copied().chain(employee_only)
    }
}

pub fn partition<'a>(views: &'a [StreamView], account: &Address) -> Partition<'a> {
    let mut out = Partition::default();
    for view in views {
        if view.stream.employer == *account {
            out.employer.push(view);
        }
        if view.stream.employee == *account {
            out.employee.push(view);
        }
    }
    out
}

/// Headline figures for one account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DashboardTotals {
    /// Streams the account created as employer.
    pub streams_created: usize,
    /// Active streams the account is part of in either role.
    pub active_streams: usize,
    /// Sum of `total_amount` over the account's streams.
    pub total_amount: u128,
    /// Sum of `withdrawn_amount` over the account's streams.
    pub total_withdrawn: u128,
    /// Sum of `available` over streams paying the account.
    pub employee_available: u128,
}

impl DashboardTotals {
    pub fn compute(views: &[StreamView], account: &Address) -> Self {
        let parts = partition(views, account);
        let mut totals = Self {
            streams_created: parts.employer.len(),
            employee_available: parts
                .employee
                .iter()
                .fold(0u128, |sum, v| sum.saturating_add(v.available)),
            ..Self::default()
        };
        for view in parts.involved() {
            let stream = &view.stream;
            if stream.is_active {
                totals.active_streams += 1;
            }
            totals.total_amount = totals.total_amount.saturating_add(stream.total_amount);
            totals.total_withdrawn = totals.total_withdrawn.saturating_add(stream.withdrawn_amount);
        }
        totals
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusFilter {
    #[default]
    All,
    Active,
    Cancelled,
}

impl StatusFilter {
    fn accepts(self, view: &StreamView) -> bool {
        match self {
            Self::All => true,
            Self::Active => view.is_active(),
            Self::Cancelled => !view.is_active(),
        }
    }
}

impl FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "active" => Ok(Self::Active),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(format!("unknown status filter: {other}")),
        }
    }
}

impl fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::All => "all",
            Self::Active => "active",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Search over a stream list by status and a free-text term.
///
/// The term matches as a case-insensitive substring of the stream id, the
/// employee address, or the employer address.
#[derive(Debug, Clone, Default)]
pub struct StreamFilter {
    pub status: StatusFilter,
    pub term: String,
}

impl StreamFilter {
    pub fn new(status: StatusFilter, term: impl Into<String>) -> Self {
        Self {
            status,
            term: term.into(),
        }
    }

    pub fn matches(&self, view: &StreamView) -> bool {
        if !self.status.accepts(view) {
            return false;
        }
        let term = self.term.trim().to_ascii_lowercase();
        if term.is_empty() {
            return true;
        }
        view.id().to_string().contains(&term)
            || view.stream.employee.to_lower_hex().contains(&term)
            || view.stream.employer.to_lower_hex().contains(&term)
    }

    pub fn apply<'a>(&self, views: &'a [StreamView]) -> Vec<&'a StreamView> {
        views.iter().filter(|v| self.matches(v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::tests::{make_stream, T};
    use rstest::rstest;

    fn view_with(id: u64, employer: u8, employee: u8, available: u128, active: bool) -> StreamView {
        let mut stream = make_stream(id, employer, employee);
        stream.is_active = active;
        let mut view = stream.view(T, None).unwrap();
        view.available = available;
        view
    }

    #[test]
    fn test_employee_available_sums() {
        let me = Address::repeat_byte(9);
        let views = vec![
            view_with(0, 1, 9, 250, true),
            view_with(1, 2, 9, 400, true),
            view_with(2, 9, 3, 1_000, true),
        ];
        let totals = DashboardTotals::compute(&views, &me);
        assert_eq!(totals.employee_available, 650);
        assert_eq!(totals.streams_created, 1);
        assert_eq!(totals.active_streams, 3);
        assert_eq!(totals.total_amount, 3_000);
    }

    #[test]
    fn test_totals_ignore_unrelated_and_count_inactive() {
        let me = Address::repeat_byte(9);
        let mut cancelled = view_with(1, 9, 4, 0, false);
        cancelled.stream.withdrawn_amount = 300;
        let views = vec![view_with(0, 1, 2, 500, true), cancelled];
        let totals = DashboardTotals::compute(&views, &me);
        assert_eq!(
            totals,
            DashboardTotals {
                streams_created: 1,
                active_streams: 0,
                total_amount: 1_000,
                total_withdrawn: 300,
                employee_available: 0,
            }
        );
    }

    #[test]
    fn test_totals_are_idempotent() {
        let me = Address::repeat_byte(9);
        let views = vec![view_with(0, 1, 9, 10, true), view_with(1, 9, 9, 20, true)];
        let first = DashboardTotals::compute(&views, &me);
        let second = DashboardTotals::compute(&views, &me);
        assert_eq!(first, second);
        // Self-stream counts once as created and once toward earnings.
        assert_eq!(first.streams_created, 1);
        assert_eq!(first.employee_available, 30);
        assert_eq!(first.total_amount, 2_000);
    }

    #[test]
    fn test_partition_self_stream_in_both() {
        let me = Address::repeat_byte(9);
        let views = vec![view_with(0, 9, 9, 0, true), view_with(1, 9, 2, 0, true)];
        let parts = partition(&views, &me);
        assert_eq!(parts.employer.len(), 2);
        assert_eq!(parts.employee.len(), 1);
        let ids: Vec<_> = parts.involved().map(StreamView::id).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[rstest]
    #[case(StatusFilter::All, "", 3)]
    #[case(StatusFilter::Active, "", 2)]
    #[case(StatusFilter::Cancelled, "", 1)]
    #[case(StatusFilter::All, "12", 1)]
    #[case(StatusFilter::All, "0x0303", 1)]
    #[case(StatusFilter::All, "0X0101", 3)]
    #[case(StatusFilter::Cancelled, "0202", 0)]
    fn test_filter(#[case] status: StatusFilter, #[case] term: &str, #[case] expected: usize) {
        let views = vec![
            view_with(3, 1, 2, 0, true),
            view_with(12, 1, 2, 0, true),
            view_with(7, 1, 3, 0, false),
        ];
        let filter = StreamFilter::new(status, term);
        assert_eq!(filter.apply(&views).len(), expected);
    }

    #[test]
    fn test_status_filter_parse() {
        assert_eq!("Active".parse::<StatusFilter>().unwrap(), StatusFilter::Active);
        assert_eq!("canceled".parse::<StatusFilter>().unwrap(), StatusFilter::Cancelled);
        assert!("paused".parse::<StatusFilter>().is_err());
    }
}
