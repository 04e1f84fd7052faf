//! Statutory re-measurement interval check.
//!
//! Insurance covers a DXA measurement only when enough days have passed since the previous
//! one. The check is a pure function of the last measurement date; callers fetch that date
//! fresh from the store on every request.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EligibilityReason {
    FirstMeasurement,
    IntervalElapsed { days_since: i64 },
    TooSoon { days_since: i64, remaining_days: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    pub eligible: bool,
    pub reason: EligibilityReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_measurement: Option<NaiveDate>,
    pub message: String,
}

impl fmt::Display for EligibilityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EligibilityReason::FirstMeasurement => {
                f.write_str("first measurement, covered by insurance")
            }
            EligibilityReason::IntervalElapsed { days_since } => {
                write!(f, "covered by insurance ({days_since} days since last measurement)")
            }
            EligibilityReason::TooSoon { remaining_days, .. } => {
                write!(f, "covered by insurance in {remaining_days} more days")
            }
        }
    }
}

/// Decides eligibility for a measurement on `candidate`.
///
/// A candidate date before the last measurement yields a negative `days_since` and is treated
/// like any other short interval.
pub fn evaluate_eligibility(
    last_measurement: Option<NaiveDate>,
    candidate: NaiveDate,
    min_interval_days: i64,
) -> Eligibility {
    let reason = match last_measurement {
        None => EligibilityReason::FirstMeasurement,
        Some(last) => {
            let days_since = (candidate - last).num_days();
            if days_since >= min_interval_days {
                EligibilityReason::IntervalElapsed { days_since }
            } else {
                EligibilityReason::TooSoon {
                    days_since,
                    remaining_days: min_interval_days - days_since,
                }
            }
        }
    };

    Eligibility {
        eligible: !matches!(reason, EligibilityReason::TooSoon { .. }),
        reason,
        last_measurement,
        message: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn no_history_is_first_measurement() {
        let result = evaluate_eligibility(None, date(2025, 1, 10), 120);
        assert!(result.eligible);
        assert_eq!(result.reason, EligibilityReason::FirstMeasurement);
    }

    #[test]
    fn ninety_days_is_thirty_short() {
        let last = date(2025, 1, 1);
        let result = evaluate_eligibility(Some(last), last + chrono::Duration::days(90), 120);
        assert!(!result.eligible);
        assert_eq!(
            result.reason,
            EligibilityReason::TooSoon {
                days_since: 90,
                remaining_days: 30
            }
        );
        assert_eq!(result.message, "covered by insurance in 30 more days");
    }

    #[test]
    fn exactly_the_interval_is_eligible() {
        let last = date(2025, 1, 1);
        let result = evaluate_eligibility(Some(last), last + chrono::Duration::days(120), 120);
        assert!(result.eligible);
        assert_eq!(
            result.reason,
            EligibilityReason::IntervalElapsed { days_since: 120 }
        );
    }

    #[test]
    fn candidate_before_last_is_ineligible() {
        let result = evaluate_eligibility(Some(date(2025, 3, 1)), date(2025, 2, 27), 120);
        assert!(!result.eligible);
        assert_eq!(
            result.reason,
            EligibilityReason::TooSoon {
                days_since: -2,
                remaining_days: 122
            }
        );
    }
}
