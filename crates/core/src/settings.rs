//! Clinic tunables stored as flat string settings.
//!
//! Values are kept as strings in the store so operators can edit them by hand. They are parsed
//! into [`ClinicSettings`] at the point of use; a value that fails to parse is logged and the
//! default is used instead.

use crate::constants::{
    DEFAULT_FOLLOW_UP_MONTHS, DEFAULT_INSURANCE_INTERVAL_DAYS, MAX_FOLLOW_UP_MONTHS,
    MAX_SETTING_DAYS, SETTING_ATTENTION_DAYS, SETTING_FOLLOW_UP_MONTHS,
    SETTING_INSURANCE_INTERVAL_DAYS, SETTING_URGENT_DAYS, SETTING_WARNING_DAYS,
};
use crate::schedule::OverdueThresholds;
use crate::{ClinicError, ClinicResult};
use std::collections::BTreeMap;
use std::str::FromStr;

pub type SettingsMap = BTreeMap<String, String>;

/// Raw lookup with fallback.
pub fn get_setting<'a>(map: &'a SettingsMap, key: &str, default: &'a str) -> &'a str {
    map.get(key).map(String::as_str).unwrap_or(default)
}

fn parsed_or<T>(map: &SettingsMap, key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match map.get(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("ignoring unparsable setting {}={:?}; using default", key, raw);
                default
            }
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClinicSettings {
    pub follow_up_months: u32,
    pub thresholds: OverdueThresholds,
    pub insurance_interval_days: i64,
}

impl Default for ClinicSettings {
    fn default() -> Self {
        Self {
            follow_up_months: DEFAULT_FOLLOW_UP_MONTHS,
            thresholds: OverdueThresholds::default(),
            insurance_interval_days: DEFAULT_INSURANCE_INTERVAL_DAYS,
        }
    }
}

impl ClinicSettings {
    pub fn from_map(map: &SettingsMap) -> Self {
        let defaults = Self::default();
        Self {
            follow_up_months: parsed_or(map, SETTING_FOLLOW_UP_MONTHS, defaults.follow_up_months),
            thresholds: OverdueThresholds {
                urgent: parsed_or(map, SETTING_URGENT_DAYS, defaults.thresholds.urgent),
                warning: parsed_or(map, SETTING_WARNING_DAYS, defaults.thresholds.warning),
                attention: parsed_or(map, SETTING_ATTENTION_DAYS, defaults.thresholds.attention),
            },
            insurance_interval_days: parsed_or(
                map,
                SETTING_INSURANCE_INTERVAL_DAYS,
                defaults.insurance_interval_days,
            ),
        }
    }
}

/// Largest value accepted for a known numeric key, `None` for free-text keys, which are
/// still stored.
fn setting_upper_bound(key: &str) -> Option<u32> {
    match key {
        SETTING_FOLLOW_UP_MONTHS => Some(MAX_FOLLOW_UP_MONTHS),
        SETTING_URGENT_DAYS
        | SETTING_WARNING_DAYS
        | SETTING_ATTENTION_DAYS
        | SETTING_INSURANCE_INTERVAL_DAYS => Some(MAX_SETTING_DAYS),
        _ => None,
    }
}

/// Checks a value before it is written. Known numeric keys must parse as whole numbers
/// between zero and the key's upper bound; other keys only need a non-empty key name.
pub fn validate_setting(key: &str, value: &str) -> ClinicResult<()> {
    if key.trim().is_empty() {
        return Err(ClinicError::InvalidInput("setting key cannot be empty".into()));
    }
    let Some(max) = setting_upper_bound(key) else {
        return Ok(());
    };
    match value.trim().parse::<u32>() {
        Ok(n) if n <= max => Ok(()),
        Ok(n) => Err(ClinicError::InvalidInput(format!(
            "setting {key} must be at most {max}, got {n}"
        ))),
        Err(_) => Err(ClinicError::InvalidInput(format!(
            "setting {key} expects a non-negative whole number, got '{value}'"
        ))),
    }
}
