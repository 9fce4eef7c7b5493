//! Kubernetes-style resource quantities.
//!
//! The cluster API expresses CPU and memory as suffixed decimal strings
//! ("4Gi", "3G", "250m"). We only need the small slice of the upstream
//! semantics the CLI relies on: parsing, milli-unit access, truncating
//! scaled values and canonical rendering.

use std::fmt::Display;
use std::str::FromStr;

use crate::errors::{HarvesterError, Result};

/// Suffix family used when rendering a quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Powers of two: Ki, Mi, Gi, ...
    BinarySi,
    /// Powers of ten: k, M, G, ...
    DecimalSi,
}

/// A fixed-point resource quantity held in milli-units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quantity {
    milli: i64,
    format: Format,
}

const BINARY_SUFFIXES: &[(i64, &str)] = &[
    (1 << 60, "Ei"),
    (1 << 50, "Pi"),
    (1 << 40, "Ti"),
    (1 << 30, "Gi"),
    (1 << 20, "Mi"),
    (1 << 10, "Ki"),
];

const DECIMAL_SUFFIXES: &[(i64, &str)] = &[
    (1_000_000_000_000_000_000, "E"),
    (1_000_000_000_000_000, "P"),
    (1_000_000_000_000, "T"),
    (1_000_000_000, "G"),
    (1_000_000, "M"),
    (1_000, "k"),
];

impl Quantity {
    /// Decimal scale of 10^9, mirroring the upstream `resource.Giga`.
    pub const GIGA: u32 = 9;
    /// Decimal scale of 10^6, mirroring the upstream `resource.Mega`.
    pub const MEGA: u32 = 6;

    /// Quantity from whole units.
    pub fn new(value: i64, format: Format) -> Self {
        Self {
            milli: value * 1000,
            format,
        }
    }

    /// Quantity from milli-units (1/1000 of a unit).
    pub fn new_milli(milli: i64, format: Format) -> Self {
        Self { milli, format }
    }

    /// The value in milli-units.
    pub fn milli_value(&self) -> i64 {
        self.milli
    }

    /// The value in whole units, rounding up like the upstream `Value()`.
    pub fn value(&self) -> i64 {
        if self.milli % 1000 == 0 {
            self.milli / 1000
        } else {
            self.milli / 1000 + 1
        }
    }

    /// The value scaled down by 10^`pow10`, truncating toward zero.
    pub fn scaled_value(&self, pow10: u32) -> i64 {
        (self.milli / 1000) / 10i64.pow(pow10)
    }

    /// Parse a quantity string such as "4Gi", "3G", "250m" or "2".
    pub fn parse(s: &str) -> Result<Quantity> {
        let s = s.trim();
        if s.is_empty() {
            return Err(HarvesterError::parse("empty quantity string"));
        }

        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(s.len());
        let (number, suffix) = s.split_at(split);
        if number.is_empty() {
            return Err(HarvesterError::parse(format!("invalid quantity: {s}")));
        }

        if suffix == "m" {
            let milli: i64 = number
                .parse()
                .map_err(|_| HarvesterError::parse(format!("invalid quantity: {s}")))?;
            return Ok(Quantity::new_milli(milli, Format::DecimalSi));
        }

        let (multiplier, format): (i128, Format) = match suffix {
            "" => (1, Format::DecimalSi),
            "Ki" => (1 << 10, Format::BinarySi),
            "Mi" => (1 << 20, Format::BinarySi),
            "Gi" => (1 << 30, Format::BinarySi),
            "Ti" => (1 << 40, Format::BinarySi),
            "Pi" => (1 << 50, Format::BinarySi),
            "Ei" => (1 << 60, Format::BinarySi),
            "k" => (1_000, Format::DecimalSi),
            "M" => (1_000_000, Format::DecimalSi),
            "G" => (1_000_000_000, Format::DecimalSi),
            "T" => (1_000_000_000_000, Format::DecimalSi),
            "P" => (1_000_000_000_000_000, Format::DecimalSi),
            "E" => (1_000_000_000_000_000_000, Format::DecimalSi),
            other => {
                return Err(HarvesterError::parse(format!(
                    "unknown quantity suffix {other:?} in {s:?}"
                )))
            }
        };

        let (int_part, frac_part) = match number.split_once('.') {
            Some((i, f)) => (i, f),
            None => (number, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(HarvesterError::parse(format!("invalid quantity: {s}")));
        }

        let int: i128 = if int_part.is_empty() {
            0
        } else {
            int_part
                .parse()
                .map_err(|_| HarvesterError::parse(format!("invalid quantity: {s}")))?
        };

        let mut milli: i128 = int * multiplier * 1000;
        if !frac_part.is_empty() {
            if frac_part.chars().any(|c| !c.is_ascii_digit()) || frac_part.len() > 9 {
                return Err(HarvesterError::parse(format!("invalid quantity: {s}")));
            }
            let frac: i128 = frac_part
                .parse()
                .map_err(|_| HarvesterError::parse(format!("invalid quantity: {s}")))?;
            milli += frac * multiplier * 1000 / 10i128.pow(frac_part.len() as u32);
        }

        let milli = i64::try_from(milli)
            .map_err(|_| HarvesterError::parse(format!("quantity out of range: {s}")))?;
        Ok(Quantity::new_milli(milli, format))
    }
}

impl FromStr for Quantity {
    type Err = HarvesterError;

    fn from_str(s: &str) -> Result<Self> {
        Quantity::parse(s)
    }
}

impl Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.milli % 1000 != 0 {
            return write!(f, "{}m", self.milli);
        }
        let value = self.milli / 1000;
        let suffixes = match self.format {
            Format::BinarySi => BINARY_SUFFIXES,
            Format::DecimalSi => DECIMAL_SUFFIXES,
        };
        for (multiplier, suffix) in suffixes {
            if value != 0 && value % multiplier == 0 {
                return write!(f, "{}{}", value / multiplier, suffix);
            }
        }
        write!(f, "{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_binary_suffixes() {
        assert_eq!(Quantity::parse("4Gi").unwrap().value(), 4 * (1 << 30));
        assert_eq!(Quantity::parse("1Ki").unwrap().value(), 1024);
        assert_eq!(Quantity::parse("10Mi").unwrap().value(), 10 * (1 << 20));
    }

    #[test]
    fn test_parse_decimal_suffixes() {
        assert_eq!(Quantity::parse("3G").unwrap().value(), 3_000_000_000);
        assert_eq!(Quantity::parse("2k").unwrap().value(), 2000);
        assert_eq!(Quantity::parse("7").unwrap().value(), 7);
    }

    #[test]
    fn test_parse_milli_and_fraction() {
        assert_eq!(Quantity::parse("250m").unwrap().milli_value(), 250);
        assert_eq!(
            Quantity::parse("1.5Gi").unwrap().value(),
            (1 << 30) + (1 << 29)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Quantity::parse("").is_err());
        assert!(Quantity::parse("Gi").is_err());
        assert!(Quantity::parse("4Xi").is_err());
        assert!(Quantity::parse("4 Gi").is_err());
        assert!(Quantity::parse("..5").is_err());
    }

    #[test]
    fn test_display_canonical() {
        assert_eq!(Quantity::parse("4Gi").unwrap().to_string(), "4Gi");
        assert_eq!(Quantity::parse("3G").unwrap().to_string(), "3G");
        assert_eq!(Quantity::parse("250m").unwrap().to_string(), "250m");
        assert_eq!(
            Quantity::new(4, Format::DecimalSi).to_string(),
            "4",
            "small counts render without a suffix"
        );
    }

    #[test]
    fn test_display_non_round_binary_value() {
        // 4Gi reduced by an over-commit ratio is no longer a whole Gi count
        let q = Quantity::new(2863311530, Format::BinarySi);
        assert_eq!(q.to_string(), "2863311530");
    }

    #[test]
    fn test_scaled_value_truncates() {
        let q = Quantity::new(2_863_311_530, Format::BinarySi);
        assert_eq!(q.scaled_value(Quantity::GIGA), 2);
        let q = Quantity::new(2_000_000_000, Format::DecimalSi);
        assert_eq!(q.scaled_value(Quantity::GIGA), 2);
        assert_eq!(q.scaled_value(Quantity::MEGA), 2000);
    }
}
