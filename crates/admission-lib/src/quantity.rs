//! Resource quantities
//!
//! This module provides:
//! - Exact parsing of orchestrator quantity strings (`500m`, `256Mi`, `1e3`)
//! - Canonical formatting that keeps the suffix family of the parsed input
//! - Granularity checks used by the validator and the recommendation processor
//!
//! Values are held in nano-units so that sub-milli CPU amounts stay visible
//! to validation instead of being rounded away at parse time.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Sub};
use std::str::FromStr;
use thiserror::Error;

const NANOS_PER_MILLI: i128 = 1_000_000;
const NANOS_PER_UNIT: i128 = 1_000_000_000;

/// Decimal suffixes by power of ten, largest first
const DECIMAL_SUFFIXES: &[(i32, &str)] = &[
    (18, "E"),
    (15, "P"),
    (12, "T"),
    (9, "G"),
    (6, "M"),
    (3, "k"),
    (0, ""),
    (-3, "m"),
    (-6, "u"),
    (-9, "n"),
];

/// Binary suffixes by power of two, largest first
const BINARY_SUFFIXES: &[(u32, &str)] = &[
    (60, "Ei"),
    (50, "Pi"),
    (40, "Ti"),
    (30, "Gi"),
    (20, "Mi"),
    (10, "Ki"),
];

/// Suffix family a quantity was written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QuantityFormat {
    #[default]
    DecimalSI,
    BinarySI,
    DecimalExponent,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuantityError {
    #[error("quantity is empty")]
    Empty,

    #[error("invalid quantity {input:?}: {reason}")]
    Invalid { input: String, reason: &'static str },

    #[error("quantity {0:?} is out of range")]
    OutOfRange(String),
}

impl QuantityError {
    fn invalid(input: &str, reason: &'static str) -> Self {
        Self::Invalid {
            input: input.to_string(),
            reason,
        }
    }
}

/// An exact resource amount
///
/// Equality, ordering and hashing look at the numeric value only; the format
/// tag decides how the value is written back out.
#[derive(Debug, Clone, Copy, Default)]
pub struct Quantity {
    nanos: i128,
    format: QuantityFormat,
}

impl Quantity {
    /// Zero in decimal notation
    pub const ZERO: Quantity = Quantity {
        nanos: 0,
        format: QuantityFormat::DecimalSI,
    };

    pub fn from_milli(milli: i128, format: QuantityFormat) -> Self {
        Self {
            nanos: milli.saturating_mul(NANOS_PER_MILLI),
            format,
        }
    }

    pub fn from_units(units: i128, format: QuantityFormat) -> Self {
        Self {
            nanos: units.saturating_mul(NANOS_PER_UNIT),
            format,
        }
    }

    pub fn format(&self) -> QuantityFormat {
        self.format
    }

    pub fn with_format(self, format: QuantityFormat) -> Self {
        Self { format, ..self }
    }

    pub fn is_zero(&self) -> bool {
        self.nanos == 0
    }

    pub fn is_negative(&self) -> bool {
        self.nanos < 0
    }

    /// Value in milli-units, rounded away from zero
    pub fn milli_value(&self) -> i128 {
        div_away_from_zero(self.nanos, NANOS_PER_MILLI)
    }

    /// Value in whole units, rounded away from zero
    pub fn value(&self) -> i128 {
        div_away_from_zero(self.nanos, NANOS_PER_UNIT)
    }

    pub fn is_whole_milli(&self) -> bool {
        self.nanos % NANOS_PER_MILLI == 0
    }

    pub fn is_whole_unit(&self) -> bool {
        self.nanos % NANOS_PER_UNIT == 0
    }

    /// Multiply by a non-negative factor, rounding up to a whole milli-unit
    pub fn scale_by(self, factor: f64) -> Self {
        let scaled = (self.milli_value() as f64 * factor).ceil();
        let milli = if scaled >= i128::MAX as f64 {
            i128::MAX / NANOS_PER_MILLI
        } else {
            scaled as i128
        };
        Self::from_milli(milli, self.format)
    }
}

fn div_away_from_zero(value: i128, divisor: i128) -> i128 {
    let quotient = value / divisor;
    if value % divisor == 0 {
        quotient
    } else if value > 0 {
        quotient + 1
    } else {
        quotient - 1
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.nanos == other.nanos
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.nanos.cmp(&other.nanos)
    }
}

impl Hash for Quantity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.nanos.hash(state);
    }
}

impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Quantity) -> Quantity {
        Quantity {
            nanos: self.nanos.saturating_add(rhs.nanos),
            format: self.format,
        }
    }
}

impl Sub for Quantity {
    type Output = Quantity;

    fn sub(self, rhs: Quantity) -> Quantity {
        Quantity {
            nanos: self.nanos.saturating_sub(rhs.nanos),
            format: self.format,
        }
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let s = input.trim();
        if s.is_empty() {
            return Err(QuantityError::Empty);
        }

        let (negative, unsigned) = match s.as_bytes()[0] {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };

        let number_end = unsigned
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(number_end);

        let (whole, fraction) = match number.split_once('.') {
            Some((w, f)) => (w, f),
            None => (number, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(QuantityError::invalid(input, "missing digits"));
        }
        if fraction.contains('.') {
            return Err(QuantityError::invalid(input, "more than one decimal point"));
        }

        let (pow10, pow2, format) = parse_suffix(suffix).ok_or_else(|| {
            QuantityError::invalid(input, "unknown suffix")
        })?;

        let digits = format!("{}{}", whole, fraction);
        let digits = digits.trim_start_matches('0');
        if digits.len() > 38 {
            return Err(QuantityError::OutOfRange(input.to_string()));
        }
        let mantissa: i128 = if digits.is_empty() {
            0
        } else {
            digits
                .parse()
                .map_err(|_| QuantityError::OutOfRange(input.to_string()))?
        };

        if mantissa == 0 {
            return Ok(Quantity { nanos: 0, format });
        }

        let out_of_range = || QuantityError::OutOfRange(input.to_string());
        let mut nanos = mantissa
            .checked_mul(2i128.checked_pow(pow2).ok_or_else(out_of_range)?)
            .ok_or_else(out_of_range)?;

        let exponent = pow10 + 9 - fraction.len() as i32;
        if exponent >= 0 {
            let factor = 10i128
                .checked_pow(exponent as u32)
                .ok_or_else(out_of_range)?;
            nanos = nanos.checked_mul(factor).ok_or_else(out_of_range)?;
        } else {
            // Anything finer than a nano-unit rounds up.
            nanos = match 10i128.checked_pow(exponent.unsigned_abs()) {
                Some(divisor) => div_away_from_zero(nanos, divisor),
                None => i128::from(nanos != 0),
            };
        }

        Ok(Quantity {
            nanos: if negative { -nanos } else { nanos },
            format,
        })
    }
}

/// Returns (power of ten, power of two, format) for a suffix
fn parse_suffix(suffix: &str) -> Option<(i32, u32, QuantityFormat)> {
    if let Some(&(pow2, _)) = BINARY_SUFFIXES.iter().find(|(_, s)| *s == suffix) {
        return Some((0, pow2, QuantityFormat::BinarySI));
    }
    if let Some(&(pow10, _)) = DECIMAL_SUFFIXES.iter().find(|(_, s)| *s == suffix) {
        return Some((pow10, 0, QuantityFormat::DecimalSI));
    }
    let exponent = suffix
        .strip_prefix('e')
        .or_else(|| suffix.strip_prefix('E'))?;
    let exponent = exponent.strip_prefix('+').unwrap_or(exponent);
    if exponent.is_empty() {
        return None;
    }
    let pow10: i32 = exponent.parse().ok()?;
    Some((pow10, 0, QuantityFormat::DecimalExponent))
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nanos == 0 {
            return f.write_str("0");
        }
        let sign = if self.nanos < 0 { "-" } else { "" };
        let magnitude = self.nanos.unsigned_abs();

        if self.format == QuantityFormat::BinarySI && magnitude % NANOS_PER_UNIT as u128 == 0 {
            let units = magnitude / NANOS_PER_UNIT as u128;
            for &(pow2, suffix) in BINARY_SUFFIXES {
                let base = 1u128 << pow2;
                if units % base == 0 {
                    return write!(f, "{}{}{}", sign, units / base, suffix);
                }
            }
        }

        for &(pow10, suffix) in DECIMAL_SUFFIXES {
            let base = 10u128.pow((pow10 + 9) as u32);
            if magnitude % base != 0 {
                continue;
            }
            let mantissa = magnitude / base;
            return match self.format {
                QuantityFormat::DecimalExponent if pow10 != 0 => {
                    write!(f, "{}{}e{}", sign, mantissa, pow10)
                }
                QuantityFormat::DecimalExponent => write!(f, "{}{}", sign, mantissa),
                _ => write!(f, "{}{}{}", sign, mantissa, suffix),
            };
        }

        // Nano is the finest unit, so the loop always returns.
        write!(f, "{}{}n", sign, magnitude)
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct QuantityVisitor;

        impl<'de> de::Visitor<'de> for QuantityVisitor {
            type Value = Quantity;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a quantity string or number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Quantity, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Quantity, E> {
                Ok(Quantity::from_units(v.into(), QuantityFormat::DecimalSI))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Quantity, E> {
                Ok(Quantity::from_units(v.into(), QuantityFormat::DecimalSI))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Quantity, E> {
                v.to_string().parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(QuantityVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_decimal_suffixes() {
        assert_eq!(q("500m").milli_value(), 500);
        assert_eq!(q("2").milli_value(), 2000);
        assert_eq!(q("1.5").milli_value(), 1500);
        assert_eq!(q("1k").value(), 1000);
        assert_eq!(q("3M").value(), 3_000_000);
        assert_eq!(q("+7").value(), 7);
        assert_eq!(q("-250m").milli_value(), -250);
    }

    #[test]
    fn test_parse_binary_suffixes() {
        assert_eq!(q("256Mi").value(), 256 * 1024 * 1024);
        assert_eq!(q("1Ki").value(), 1024);
        assert_eq!(q("1Ei").value(), 1 << 60);
        assert_eq!(q("1Gi").format(), QuantityFormat::BinarySI);
    }

    #[test]
    fn test_parse_exponent() {
        let parsed = q("1e3");
        assert_eq!(parsed.value(), 1000);
        assert_eq!(parsed.format(), QuantityFormat::DecimalExponent);
        assert_eq!(q("5E-3").milli_value(), 5);
    }

    #[test]
    fn test_zero_with_large_exponent() {
        assert!(q("0e100").is_zero());
        assert!(q("0.000E+400").is_zero());
        assert_eq!(q("0e100").to_string(), "0");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!("".parse::<Quantity>(), Err(QuantityError::Empty));
        assert!("abc".parse::<Quantity>().is_err());
        assert!("1.2.3".parse::<Quantity>().is_err());
        assert!("12Qi".parse::<Quantity>().is_err());
        assert!("1e".parse::<Quantity>().is_err());
        assert!(matches!(
            "1e40".parse::<Quantity>(),
            Err(QuantityError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_sub_nano_rounds_up() {
        let tiny = q("0.1n");
        assert!(!tiny.is_zero());
        assert_eq!(tiny.to_string(), "1n");
    }

    #[test]
    fn test_canonical_formatting() {
        assert_eq!(q("500m").to_string(), "500m");
        assert_eq!(q("1000m").to_string(), "1");
        assert_eq!(q("1500m").to_string(), "1500m");
        assert_eq!(q("1000").to_string(), "1k");
        assert_eq!(q("256Mi").to_string(), "256Mi");
        assert_eq!(q("1024Mi").to_string(), "1Gi");
        assert_eq!(q("1536").to_string(), "1536");
        assert_eq!(q("187500u").to_string(), "187500u");
        assert_eq!(q("0").to_string(), "0");
    }

    #[test]
    fn test_binary_falls_back_to_decimal() {
        let half_ki = Quantity::from_units(512, QuantityFormat::BinarySI);
        assert_eq!(half_ki.to_string(), "512");
        let fractional = Quantity::from_milli(1500, QuantityFormat::BinarySI);
        assert_eq!(fractional.to_string(), "1500m");
    }

    #[test]
    fn test_equality_ignores_format() {
        assert_eq!(q("1"), q("1000m"));
        assert_eq!(q("1Ki"), q("1024"));
        assert!(q("1Gi") > q("1G"));
    }

    #[test]
    fn test_granularity() {
        assert!(!q("187500u").is_whole_milli());
        assert!(q("250m").is_whole_milli());
        assert!(!q("100m").is_whole_unit());
        assert!(q("100Mi").is_whole_unit());
    }

    #[test]
    fn test_scale_and_arithmetic() {
        assert_eq!(q("100m").scale_by(2.0), q("200m"));
        assert_eq!(q("100m").scale_by(1.5), q("150m"));
        assert_eq!(q("500m") + q("200m"), q("700m"));
        assert_eq!(q("150m") - q("1m"), q("149m"));
    }

    #[test]
    fn test_serde_string_and_number() {
        let from_str: Quantity = serde_json::from_str("\"256Mi\"").unwrap();
        assert_eq!(from_str, q("256Mi"));
        let from_int: Quantity = serde_json::from_str("2").unwrap();
        assert_eq!(from_int, q("2"));
        let from_float: Quantity = serde_json::from_str("0.5").unwrap();
        assert_eq!(from_float, q("500m"));
        assert_eq!(serde_json::to_string(&q("256Mi")).unwrap(), "\"256Mi\"");
    }
}
