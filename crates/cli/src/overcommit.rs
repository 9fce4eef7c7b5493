//! Over-commit request computation.
//!
//! Harvester publishes an `overcommit-config` setting whose default value is
//! a JSON map of resource kind to an integer percentage, e.g.
//! `{"cpu":1600,"memory":150,"disk":200}`. The scheduler-visible *request*
//! is the literal *limit* scaled down by that percentage; the limit itself
//! always stays at the literal user-requested amount.

use std::collections::HashMap;

use crate::errors::{HarvesterError, Result};
use crate::quantity::{Format, Quantity};

/// Name of the Harvester setting holding the ratio table.
pub const OVERCOMMIT_SETTING_NAME: &str = "overcommit-config";

/// Resource kind to percentage, as stored in the setting.
pub type OverCommitSettings = HashMap<String, i64>;

/// Parse the JSON body of the `overcommit-config` setting.
pub fn parse_settings(raw: &str) -> Result<OverCommitSettings> {
    serde_json::from_str(raw).map_err(|e| {
        HarvesterError::parse(format!(
            "unmarshalling setting value {OVERCOMMIT_SETTING_NAME}: {e}"
        ))
    })
}

/// A missing ratio behaves as 100%, i.e. request == limit.
fn ratio(settings: &OverCommitSettings, key: &str) -> i64 {
    settings.get(key).copied().unwrap_or(100)
}

/// CPU request for a literal core count.
///
/// `request_milli = cores * 1000 * 100 / ratio`; with the stock ratio of
/// 1600% a 4-core VM reserves 250m. Ratios below 100 are an undefined input
/// domain upstream and are passed through unvalidated.
pub fn compute_cpu_request(settings: &OverCommitSettings, cpu_cores: i64) -> Quantity {
    let milli = cpu_cores * 1000 * 100 / ratio(settings, "cpu");
    Quantity::new_milli(milli, Format::DecimalSi)
}

/// Memory request for a literal limit quantity string such as "4Gi".
pub fn compute_memory_request(settings: &OverCommitSettings, memory_limit: &str) -> Result<Quantity> {
    let limit = Quantity::parse(memory_limit)?;
    let bytes = i128::from(limit.value()) * 100 / i128::from(ratio(settings, "memory"));
    let bytes = i64::try_from(bytes).map_err(|_| {
        HarvesterError::parse(format!("memory quantity out of range: {memory_limit}"))
    })?;
    Ok(Quantity::new(bytes, Format::BinarySi))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stock_settings() -> OverCommitSettings {
        parse_settings(r#"{"cpu":1600,"memory":150,"disk":200}"#).unwrap()
    }

    #[test]
    fn test_cpu_over_commitment() {
        let result = compute_cpu_request(&stock_settings(), 4);
        assert_eq!(result.milli_value(), 250);
        assert_eq!(result.to_string(), "250m");
    }

    #[test]
    fn test_memory_over_commitment() {
        let result = compute_memory_request(&stock_settings(), "3G").unwrap();
        assert_eq!(result.scaled_value(Quantity::GIGA), 2);

        let result = compute_memory_request(&stock_settings(), "4Gi").unwrap();
        assert_eq!(result.scaled_value(Quantity::GIGA), 2);
    }

    #[test]
    fn test_ratio_of_100_keeps_request_at_limit() {
        let settings = parse_settings(r#"{"cpu":100,"memory":100}"#).unwrap();
        assert_eq!(compute_cpu_request(&settings, 4).to_string(), "4");
        assert_eq!(
            compute_memory_request(&settings, "4Gi").unwrap().value(),
            4 * (1 << 30)
        );
    }

    #[test]
    fn test_missing_key_defaults_to_100() {
        let settings = OverCommitSettings::new();
        assert_eq!(compute_cpu_request(&settings, 2).milli_value(), 2000);
    }

    #[test]
    fn test_bad_memory_limit_is_a_parse_error() {
        let err = compute_memory_request(&stock_settings(), "lots").unwrap_err();
        assert!(matches!(err, crate::errors::HarvesterError::Parse(_)));
    }

    #[test]
    fn test_bad_settings_json_is_a_parse_error() {
        assert!(parse_settings("not-json").is_err());
    }
}
