//! Conversion between on-chain integer amounts and decimal strings.
//!
//! CELO uses 18 decimals: one CELO is `10^18` wei.

/// Fixed decimal count of the chain's native currency.
pub const DECIMALS: u32 = 18;

/// `10^DECIMALS`.
pub const WEI_PER_UNIT: u128 = 10u128.pow(DECIMALS);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnitsError {
    #[error("amount is empty")]
    Empty,
    #[error("amount must not be negative")]
    Negative,
    #[error("invalid amount: {0:?}")]
    Malformed(String),
    #[error("amount has more than {} decimal places", DECIMALS)]
    TooManyDecimals,
    #[error("amount is too large")]
    Overflow,
}

/// Parse a human-readable decimal amount (`"1.5"`) into wei.
pub fn parse_units(input: &str) -> Result<u128, UnitsError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(UnitsError::Empty);
    }
    if s.starts_with('-') {
        return Err(UnitsError::Negative);
    }

    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(UnitsError::Malformed(s.to_string()));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(UnitsError::Malformed(s.to_string()));
    }
    if frac.len() > DECIMALS as usize {
        return Err(UnitsError::TooManyDecimals);
    }

    let whole_value: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| UnitsError::Overflow)?
    };
    let frac_value: u128 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{frac:0<width$}", width = DECIMALS as usize);
        padded
            .parse()
            .map_err(|_| UnitsError::Malformed(s.to_string()))?
    };

    whole_value
        .checked_mul(WEI_PER_UNIT)
        .and_then(|w| w.checked_add(frac_value))
        .ok_or(UnitsError::Overflow)
}

/// Render wei as a decimal string with trailing zeros trimmed (`"1.5"`, `"0"`).
pub fn format_units(amount: u128) -> String {
    let whole = amount / WEI_PER_UNIT;
    let frac = amount % WEI_PER_UNIT;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{frac:0width$}", width = DECIMALS as usize);
    format!("{whole}.{}", frac.trim_end_matches('0'))
}

/// Render wei with exactly `places` decimals, rounding half up.
///
/// `places` above [`DECIMALS`] is clamped.
pub fn format_fixed(amount: u128, places: u32) -> String {
    let places = places.min(DECIMALS);
    let scale = 10u128.pow(DECIMALS - places);

    let mut scaled = amount / scale;
    let remainder = amount % scale;
    if scale > 1 && remainder >= scale - remainder {
        scaled += 1;
    }

    if places == 0 {
        return scaled.to_string();
    }
    let unit = 10u128.pow(places);
    format!(
        "{}.{:0width$}",
        scaled / unit,
        scaled % unit,
        width = places as usize
    )
}
