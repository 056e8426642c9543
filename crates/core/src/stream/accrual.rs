//! Linear vesting math.
//!
//! A stream vests `total` linearly over `duration` seconds starting at
//! `start`:
//!
//! ```text
//! elapsed   = clamp(now - start, 0, duration)
//! earned    = floor(total * elapsed / duration)
//! available = max(0, earned - withdrawn)
//! ```
//!
//! Rounding is floor division, matching the contract. Every function here is
//! pure.

use serde::Serialize;

/// Basis points in one whole (100%).
pub const BPS_SCALE: u16 = 10_000;

const SECS_PER_HOUR: u64 = 3_600;
const SECS_PER_DAY: u64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AccrualError {
    #[error("stream duration must be greater than zero")]
    ZeroDuration,
}

/// `floor(a * b / d)` without intermediate overflow when `b <= d`.
///
/// Splits `a` into `q * d + r`, so `a * b / d == q * b + floor(r * b / d)`
/// and `r * b < d * b <= 2^128`. For `b > d` the first term saturates.
fn mul_div_floor(a: u128, b: u64, d: u64) -> u128 {
    debug_assert!(d > 0);
    let d = u128::from(d);
    let b = u128::from(b);
    let q = a / d;
    let r = a % d;
    q.saturating_mul(b).saturating_add(r * b / d)
}

fn clamped_elapsed(start: u64, duration: u64, now: u64) -> u64 {
    now.saturating_sub(start).min(duration)
}

/// Amount vested at `now`.
pub fn earned(total: u128, start: u64, duration: u64, now: u64) -> Result<u128, AccrualError> {
    if duration == 0 {
        return Err(AccrualError::ZeroDuration);
    }
    let elapsed = clamped_elapsed(start, duration, now);
    Ok(mul_div_floor(total, elapsed, duration))
}

/// Amount vested at `now` and not yet withdrawn.
pub fn available(
    total: u128,
    start: u64,
    duration: u64,
    withdrawn: u128,
    now: u64,
) -> Result<u128, AccrualError> {
    Ok(earned(total, start, duration, now)?.saturating_sub(withdrawn))
}

/// Elapsed fraction of the stream in basis points, `0..=10_000`.
pub fn progress_bps(start: u64, duration: u64, now: u64) -> Result<u16, AccrualError> {
    if duration == 0 {
        return Err(AccrualError::ZeroDuration);
    }
    let elapsed = clamped_elapsed(start, duration, now);
    // elapsed <= duration, so the quotient is at most BPS_SCALE.
    Ok(mul_div_floor(u128::from(BPS_SCALE), elapsed, duration) as u16)
}

/// Payout rates of a stream, floored to whole wei.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rates {
    pub per_second: u128,
    pub per_hour: u128,
    pub per_day: u128,
}

impl Rates {
    pub fn of(total: u128, duration: u64) -> Result<Self, AccrualError> {
        if duration == 0 {
            return Err(AccrualError::ZeroDuration);
        }
        Ok(Self {
            per_second: mul_div_floor(total, 1, duration),
            per_hour: mul_div_floor(total, SECS_PER_HOUR, duration),
            per_day: mul_div_floor(total, SECS_PER_DAY, duration),
        })
    }
}
