//! Decimal amount helpers
//!
//! Base-unit conversion for on-chain amounts and the fractional powers used
//! when compounding rates across cycle lengths.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, MathematicalOps, RoundingStrategy};

/// Native asset decimals (wei per ETH)
pub const NATIVE_DECIMALS: u8 = 18;

/// Convert a UI amount to raw base units
///
/// Rejects negative amounts and amounts that round to zero.
pub fn to_raw_amount(ui_amount: Decimal, decimals: u8) -> anyhow::Result<u128> {
    if ui_amount < Decimal::ZERO {
        return Err(anyhow::anyhow!("Amount cannot be negative: {}", ui_amount));
    }

    let multiplier = Decimal::from_i128_with_scale(10i128.pow(decimals as u32), 0);
    let raw = ui_amount
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow::anyhow!("Amount {} with {} decimals overflows", ui_amount, decimals))?
        .trunc();

    let raw = raw
        .to_u128()
        .ok_or_else(|| anyhow::anyhow!("Amount {} does not fit in u128", ui_amount))?;

    if raw == 0 && ui_amount > Decimal::ZERO {
        return Err(anyhow::anyhow!(
            "Amount {} too small for {} decimals (rounds to 0)",
            ui_amount,
            decimals
        ));
    }

    Ok(raw)
}

/// Convert raw base units back to a UI amount
pub fn from_raw_amount(raw_amount: u128, decimals: u8) -> Decimal {
    let raw = Decimal::from_u128(raw_amount).unwrap_or(Decimal::MAX);
    let divisor = Decimal::from_i128_with_scale(10i128.pow(decimals as u32), 0);
    raw / divisor
}

/// Wei per gas unit to native units per gas unit
pub fn wei_to_native(wei: u128) -> Decimal {
    from_raw_amount(wei, NATIVE_DECIMALS)
}

/// Wei to gwei for display and ceiling checks
pub fn wei_to_gwei(wei: u128) -> Decimal {
    from_raw_amount(wei, 9)
}

/// `base ^ exponent` for a positive base, `None` on overflow or a non-positive base
pub fn pow_frac(base: Decimal, exponent: Decimal) -> Option<Decimal> {
    if base <= Decimal::ZERO {
        return None;
    }
    if exponent.is_zero() {
        return Some(Decimal::ONE);
    }
    if base == Decimal::ONE {
        return Some(Decimal::ONE);
    }
    base.checked_powd(exponent)
}

/// Rescale a rate compounded over one period to `factor` periods
///
/// `(1 + rate)^factor - 1`; a total loss stays a total loss.
pub fn compound_rate(rate: Decimal, factor: Decimal) -> Decimal {
    if factor == Decimal::ONE {
        return rate;
    }
    match pow_frac(Decimal::ONE + rate, factor) {
        Some(grown) => grown - Decimal::ONE,
        None => -Decimal::ONE,
    }
}

/// Round to a fixed number of places, half away from zero
pub fn quantize(value: Decimal, places: u32) -> Decimal {
    value.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero)
}

/// Lossy bridge for statistics computed in floating point
pub fn decimal_from_f64(value: f64) -> Decimal {
    if !value.is_finite() {
        return Decimal::ZERO;
    }
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_to_raw_amount_native() {
        let raw = to_raw_amount(Decimal::from_str("0.0005").unwrap(), NATIVE_DECIMALS).unwrap();
        assert_eq!(raw, 500_000_000_000_000);
    }

    #[test]
    fn test_to_raw_amount_rejects_negative() {
        assert!(to_raw_amount(Decimal::from(-1), 6).is_err());
    }

    #[test]
    fn test_to_raw_amount_rejects_dust() {
        assert!(to_raw_amount(Decimal::from_str("0.0000001").unwrap(), 6).is_err());
    }

    #[test]
    fn test_wei_to_gwei() {
        assert_eq!(wei_to_gwei(2_500_000_000), Decimal::from_str("2.5").unwrap());
    }

    #[test]
    fn test_compound_rate_identity_factor() {
        let r = Decimal::from_str("0.01").unwrap();
        assert_eq!(compound_rate(r, Decimal::ONE), r);
    }

    #[test]
    fn test_pow_frac_rejects_non_positive_base() {
        assert!(pow_frac(Decimal::ZERO, Decimal::from(2)).is_none());
        assert!(pow_frac(Decimal::from(-1), Decimal::from(2)).is_none());
    }

    #[test]
    fn test_quantize_half_away_from_zero() {
        let v = Decimal::from_str("1.005").unwrap();
        assert_eq!(quantize(v, 2), Decimal::from_str("1.01").unwrap());
    }
}
