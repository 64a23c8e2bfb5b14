//! Kubernetes resource quantities
//!
//! Quantities are held as exact signed milli-unit integers so capping never
//! loses precision to floating point. Parsing follows the apimachinery
//! grammar: decimal SI suffixes, binary suffixes and decimal exponents.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary suffixes and their power of 1024
const BINARY_SUFFIXES: &[(&str, u32)] = &[
    ("Ki", 1),
    ("Mi", 2),
    ("Gi", 3),
    ("Ti", 4),
    ("Pi", 5),
    ("Ei", 6),
];

/// Decimal SI suffixes and their power of 10
const DECIMAL_SUFFIXES: &[(&str, i32)] = &[
    ("n", -9),
    ("u", -6),
    ("m", -3),
    ("", 0),
    ("k", 3),
    ("M", 6),
    ("G", 9),
    ("T", 12),
    ("P", 15),
    ("E", 18),
];

/// Longest significant mantissa accepted before the value cannot be represented
const MAX_DIGITS: usize = 30;

/// Errors raised while reading a quantity string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuantityError {
    #[error("quantity is empty")]
    Empty,

    #[error("invalid quantity '{0}'")]
    Invalid(String),

    #[error("quantity '{0}' is out of range")]
    OutOfRange(String),
}

/// An exact resource amount in milli-units (1 CPU core = 1000, 1 byte = 1000)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "Quantity", into = "Quantity")]
pub struct ResourceAmount(i64);

impl ResourceAmount {
    pub const ZERO: Self = Self(0);

    pub const fn from_milli(milli: i64) -> Self {
        Self(milli)
    }

    pub fn from_units(units: i64) -> Self {
        Self(units.saturating_mul(1000))
    }

    pub const fn as_milli(self) -> i64 {
        self.0
    }

    /// Parse a quantity string such as `250m`, `1.5`, `512Mi` or `1e3`.
    ///
    /// Values finer than one milli-unit are rounded up, as the API server does.
    pub fn parse(input: &str) -> Result<Self, QuantityError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(QuantityError::Empty);
        }
        let invalid = || QuantityError::Invalid(input.to_string());
        let out_of_range = || QuantityError::OutOfRange(input.to_string());

        let (negative, rest) = match s.as_bytes()[0] {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };

        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, suffix) = rest.split_at(number_len);
        let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
        if (int_part.is_empty() && frac_part.is_empty()) || frac_part.contains('.') {
            return Err(invalid());
        }

        let (binary_power, decimal_exponent) = parse_suffix(suffix).ok_or_else(invalid)?;

        let digits = format!("{int_part}{frac_part}");
        let digits = digits.trim_start_matches('0');
        if digits.is_empty() {
            return Ok(Self::ZERO);
        }
        if digits.len() > MAX_DIGITS {
            return Err(out_of_range());
        }
        let mantissa: i128 = digits.parse().map_err(|_| invalid())?;

        let binary_factor = 1024i128.checked_pow(binary_power).ok_or_else(out_of_range)?;
        let mut value = mantissa.checked_mul(binary_factor).ok_or_else(out_of_range)?;

        // milli-units add three decimal places
        let exponent = i64::from(decimal_exponent) - frac_part.len() as i64 + 3;
        if exponent >= 0 {
            let factor = u32::try_from(exponent)
                .ok()
                .and_then(|e| 10i128.checked_pow(e))
                .ok_or_else(out_of_range)?;
            value = value.checked_mul(factor).ok_or_else(out_of_range)?;
        } else {
            value = match u32::try_from(exponent.unsigned_abs())
                .ok()
                .and_then(|e| 10i128.checked_pow(e))
            {
                Some(divisor) => ceil_div(value, divisor),
                // smaller than one milli-unit
                None => 1,
            };
        }

        if negative {
            value = -value;
        }
        i64::try_from(value).map(Self).map_err(|_| out_of_range())
    }

    /// Read a Kubernetes `Quantity`
    pub fn from_quantity(quantity: &Quantity) -> Result<Self, QuantityError> {
        Self::parse(&quantity.0)
    }

    /// Render as a `Quantity`, using binary suffixes for byte-sized resources
    pub fn to_quantity(self, resource: &str) -> Quantity {
        Quantity(self.format_for(resource))
    }

    /// Canonical string form for the given resource name
    pub fn format_for(self, resource: &str) -> String {
        if self.0 % 1000 != 0 {
            return format!("{}m", self.0);
        }
        let units = self.0 / 1000;
        if units != 0 && is_binary_resource(resource) {
            for (suffix, power) in BINARY_SUFFIXES.iter().rev() {
                let factor = 1024i64.pow(*power);
                if units % factor == 0 {
                    return format!("{}{}", units / factor, suffix);
                }
            }
        }
        units.to_string()
    }

    /// `self * numerator / denominator`, rounded up.
    ///
    /// Returns `None` when the denominator is not positive.
    pub fn scale(self, numerator: Self, denominator: Self) -> Option<Self> {
        if denominator.0 <= 0 {
            return None;
        }
        let product = i128::from(self.0) * i128::from(numerator.0);
        let divisor = i128::from(denominator.0);
        let scaled = if product >= 0 {
            ceil_div(product, divisor)
        } else {
            product / divisor
        };
        Some(Self(
            scaled.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64,
        ))
    }

    /// Round up to a whole unit
    pub fn ceil_to_unit(self) -> Self {
        match self.0.rem_euclid(1000) {
            0 => self,
            rem => Self(self.0.saturating_add(1000 - rem)),
        }
    }

    /// Round down to a whole unit
    pub fn floor_to_unit(self) -> Self {
        Self(self.0 - self.0.rem_euclid(1000))
    }
}

impl fmt::Display for ResourceAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_for(""))
    }
}

impl TryFrom<Quantity> for ResourceAmount {
    type Error = QuantityError;

    fn try_from(quantity: Quantity) -> Result<Self, Self::Error> {
        Self::parse(&quantity.0)
    }
}

impl From<ResourceAmount> for Quantity {
    fn from(amount: ResourceAmount) -> Self {
        Quantity(amount.to_string())
    }
}

/// Resources measured in bytes are printed with binary suffixes
pub fn is_binary_resource(resource: &str) -> bool {
    resource == "memory" || resource == "ephemeral-storage" || resource.starts_with("hugepages-")
}

fn parse_suffix(suffix: &str) -> Option<(u32, i32)> {
    if let Some((_, power)) = BINARY_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
        return Some((*power, 0));
    }
    if let Some((_, exponent)) = DECIMAL_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
        return Some((0, *exponent));
    }
    let exponent = suffix
        .strip_prefix('e')
        .or_else(|| suffix.strip_prefix('E'))?;
    exponent.parse::<i32>().ok().map(|e| (0, e))
}

fn ceil_div(value: i128, divisor: i128) -> i128 {
    (value + divisor - 1) / divisor
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: i64 = 1024 * 1024;

    #[test]
    fn test_parse_cpu_forms() {
        assert_eq!(ResourceAmount::parse("100m").unwrap().as_milli(), 100);
        assert_eq!(ResourceAmount::parse("2").unwrap().as_milli(), 2000);
        assert_eq!(ResourceAmount::parse("1.5").unwrap().as_milli(), 1500);
        assert_eq!(ResourceAmount::parse("0.25").unwrap().as_milli(), 250);
        assert_eq!(ResourceAmount::parse("+3").unwrap().as_milli(), 3000);
    }

    #[test]
    fn test_parse_memory_forms() {
        assert_eq!(
            ResourceAmount::parse("128Mi").unwrap().as_milli(),
            128 * MIB * 1000
        );
        assert_eq!(
            ResourceAmount::parse("1G").unwrap().as_milli(),
            1_000_000_000 * 1000
        );
        assert_eq!(ResourceAmount::parse("1e3").unwrap().as_milli(), 1_000_000);
        assert_eq!(ResourceAmount::parse("1.5Ki").unwrap().as_milli(), 1536 * 1000);
    }

    #[test]
    fn test_parse_rounds_sub_milli_up() {
        assert_eq!(ResourceAmount::parse("0.1m").unwrap().as_milli(), 1);
        assert_eq!(ResourceAmount::parse("1n").unwrap().as_milli(), 1);
        assert_eq!(ResourceAmount::parse("0").unwrap(), ResourceAmount::ZERO);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(ResourceAmount::parse(""), Err(QuantityError::Empty));
        assert!(matches!(
            ResourceAmount::parse("abc"),
            Err(QuantityError::Invalid(_))
        ));
        assert!(matches!(
            ResourceAmount::parse("1.2.3"),
            Err(QuantityError::Invalid(_))
        ));
        assert!(matches!(
            ResourceAmount::parse("10Xi"),
            Err(QuantityError::Invalid(_))
        ));
    }

    #[test]
    fn test_parse_out_of_range() {
        // 1 exa-unit does not fit in milli-units
        assert!(matches!(
            ResourceAmount::parse("1E"),
            Err(QuantityError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_format_uses_binary_suffix_for_memory() {
        let one_gib = ResourceAmount::from_units(1024 * MIB);
        assert_eq!(one_gib.format_for("memory"), "1Gi");
        assert_eq!(one_gib.format_for("cpu"), "1073741824");
        assert_eq!(ResourceAmount::from_units(1000).format_for("memory"), "1000");
    }

    #[test]
    fn test_format_cpu() {
        assert_eq!(ResourceAmount::from_milli(1500).format_for("cpu"), "1500m");
        assert_eq!(ResourceAmount::from_milli(2000).format_for("cpu"), "2");
        assert_eq!(ResourceAmount::ZERO.format_for("memory"), "0");
    }

    #[test]
    fn test_scale_rounds_up() {
        let limit = ResourceAmount::from_milli(1000);
        let scaled = limit
            .scale(ResourceAmount::from_milli(200), ResourceAmount::from_milli(300))
            .unwrap();
        assert_eq!(scaled.as_milli(), 667);
        assert!(limit.scale(limit, ResourceAmount::ZERO).is_none());
    }

    #[test]
    fn test_round_to_unit() {
        assert_eq!(ResourceAmount::from_milli(1001).ceil_to_unit().as_milli(), 2000);
        assert_eq!(ResourceAmount::from_milli(2000).ceil_to_unit().as_milli(), 2000);
        assert_eq!(ResourceAmount::from_milli(1999).floor_to_unit().as_milli(), 1000);
        assert_eq!(ResourceAmount::from_milli(-500).floor_to_unit().as_milli(), -1000);
    }

    #[test]
    fn test_quantity_conversion() {
        let amount = ResourceAmount::try_from(Quantity("500m".to_string())).unwrap();
        assert_eq!(Quantity::from(amount).0, "500m");
    }
}
