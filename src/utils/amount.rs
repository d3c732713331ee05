//! Fixed-point amount handling.
//!
//! The ledger stores every RTC amount as an integer count of micro-RTC
//! (`10^-6`). On-chain amounts are raw integers scaled by the token's own
//! decimal count. Floating point only appears at the JSON boundary.

use thiserror::Error;

pub const LEDGER_DECIMALS: u32 = 6;
pub const MICROS_PER_RTC: i64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount must be a finite number")]
    NotFinite,

    #[error("amount must not be negative")]
    Negative,

    #[error("amount is out of range")]
    Overflow,

    #[error("amount has more precision than {0} decimals allow")]
    Precision(u32),

    #[error("token decimals {0} are not supported")]
    Decimals(u32),
}

fn pow10(exp: u32) -> Result<u128, AmountError> {
    10u128.checked_pow(exp).ok_or(AmountError::Decimals(exp))
}

/// Converts a user-supplied decimal RTC amount into micro-RTC, rounding to
/// the nearest micro.
pub fn decimal_to_micros(value: f64) -> Result<i64, AmountError> {
    if !value.is_finite() {
        return Err(AmountError::NotFinite);
    }
    if value < 0.0 {
        return Err(AmountError::Negative);
    }
    let scaled = (value * MICROS_PER_RTC as f64).round();
    if scaled >= i64::MAX as f64 {
        return Err(AmountError::Overflow);
    }
    Ok(scaled as i64)
}

pub fn micros_to_decimal(micros: i64) -> f64 {
    micros as f64 / MICROS_PER_RTC as f64
}

/// Converts a raw on-chain amount into micro-RTC. Dust below one micro is
/// truncated.
pub fn raw_to_micros(raw: u128, decimals: u32) -> Result<i64, AmountError> {
    let micros = if decimals >= LEDGER_DECIMALS {
        raw / pow10(decimals - LEDGER_DECIMALS)?
    } else {
        raw.checked_mul(pow10(LEDGER_DECIMALS - decimals)?)
            .ok_or(AmountError::Overflow)?
    };
    i64::try_from(micros).map_err(|_| AmountError::Overflow)
}

/// Converts micro-RTC into the raw on-chain amount of a token with
/// `decimals` places. Refuses amounts the token cannot represent exactly.
pub fn micros_to_raw(micros: i64, decimals: u32) -> Result<u128, AmountError> {
    let micros = u128::try_from(micros).map_err(|_| AmountError::Negative)?;
    if decimals >= LEDGER_DECIMALS {
        micros
            .checked_mul(pow10(decimals - LEDGER_DECIMALS)?)
            .ok_or(AmountError::Overflow)
    } else {
        let divisor = pow10(LEDGER_DECIMALS - decimals)?;
        if micros % divisor != 0 {
            return Err(AmountError::Precision(decimals));
        }
        Ok(micros / divisor)
    }
}

pub fn raw_to_decimal(raw: u128, decimals: u32) -> f64 {
    raw as f64 / 10f64.powi(decimals as i32)
}

/// Serializes `u128` raw amounts as decimal strings so JSON clients never
/// lose precision.
pub mod u128_string {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<u128>().map_err(D::Error::custom)
    }
}
