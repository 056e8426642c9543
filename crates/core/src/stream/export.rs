//! CSV and plain-text export of a stream list.

use std::fmt::Write as _;

use super::StreamView;
use crate::address::Address;
use crate::units;

const SECS_PER_DAY: f64 = 86_400.0;
const AMOUNT_PLACES: u32 = 4;

/// Which side of the streams the export is for; decides the counterparty
/// column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Perspective {
    /// Rows show the employee being paid.
    Employer,
    /// Rows show the employer paying.
    Employee,
}

impl Perspective {
    fn counterparty_label(self) -> &'static str {
        match self {
            Self::Employer => "Employee",
            Self::Employee => "Employer",
        }
    }

    fn counterparty(self, view: &StreamView) -> Address {
        match self {
            Self::Employer => view.stream.employee,
            Self::Employee => view.stream.employer,
        }
    }
}

fn status_label(view: &StreamView) -> &'static str {
    if view.is_active() {
        "Active"
    } else {
        "Cancelled"
    }
}

fn duration_days(view: &StreamView) -> String {
    format!("{:.1}", view.stream.duration as f64 / SECS_PER_DAY)
}

/// Render streams as CSV. Rows are newline-separated with no trailing
/// newline.
pub fn to_csv(views: &[StreamView], perspective: Perspective) -> String {
    let mut out = format!(
        "ID,{},Total Amount,Duration (Days),Withdrawn,Available,Status",
        perspective.counterparty_label()
    );
    for view in views {
        // Writing into a String cannot fail.
        let _ = write!(
            out,
            "\n{},{},{},{},{},{},{}",
            view.id(),
            perspective.counterparty(view),
            units::format_fixed(view.stream.total_amount, AMOUNT_PLACES),
            duration_days(view),
            units::format_fixed(view.stream.withdrawn_amount, AMOUNT_PLACES),
            units::format_fixed(view.available, AMOUNT_PLACES),
            status_label(view),
        );
    }
    out
}

/// One line per stream: `Stream #<id> - <counterparty> - <total> CELO - <status>`.
pub fn to_plain_text(views: &[StreamView], perspective: Perspective) -> String {
    views
        .iter()
        .map(|view| {
            format!(
                "Stream #{} - {} - {} CELO - {}",
                view.id(),
                perspective.counterparty(view),
                units::format_fixed(view.stream.total_amount, AMOUNT_PLACES),
                status_label(view),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::tests::{make_stream, T};
    use crate::units::WEI_PER_UNIT;

    fn sample() -> Vec<StreamView> {
        let mut a = make_stream(0, 0x11, 0x22);
        a.total_amount = 3 * WEI_PER_UNIT / 2;
        a.duration = 30 * 86_400;
        a.withdrawn_amount = WEI_PER_UNIT / 4;

        let mut b = make_stream(1, 0x11, 0x33);
        b.total_amount = WEI_PER_UNIT;
        b.duration = 129_600;
        b.is_active = false;

        vec![
            a.view(T + 864_000, None).unwrap(),
            b.view(T + 864_000, Some(0)).unwrap(),
        ]
    }

    #[test]
    fn test_csv_employer_perspective() {
        let csv = to_csv(&sample(), Perspective::Employer);
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(
            lines[0],
            "ID,Employee,Total Amount,Duration (Days),Withdrawn,Available,Status"
        );
        assert_eq!(
            lines[1],
            format!(
                "0,{},1.5000,30.0,0.2500,0.2500,Active",
                Address::repeat_byte(0x22)
            )
        );
        assert_eq!(
            lines[2],
            format!(
                "1,{},1.0000,1.5,0.0000,0.0000,Cancelled",
                Address::repeat_byte(0x33)
            )
        );
        assert!(!csv.ends_with('\n'));
    }

    #[test]
    fn test_csv_employee_perspective_uses_employer_column() {
        let csv = to_csv(&sample(), Perspective::Employee);
        assert!(csv.starts_with("ID,Employer,"));
        assert!(csv.contains(&Address::repeat_byte(0x11).to_string()));
    }

    #[test]
    fn test_csv_empty_list_is_header_only() {
        let csv = to_csv(&[], Perspective::Employer);
        assert_eq!(csv.lines().count(), 1);
    }

    #[test]
    fn test_plain_text() {
        let text = to_plain_text(&sample(), Perspective::Employer);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[1],
            format!(
                "Stream #1 - {} - 1.0000 CELO - Cancelled",
                Address::repeat_byte(0x33)
            )
        );
    }
}
