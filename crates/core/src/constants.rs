//! Constants used throughout the DXA core crate.
//!
//! Path and filename constants for the on-disk layout, plus the system setting keys and their
//! defaults.

/// Default directory for clinic data when no explicit directory is configured.
pub const DEFAULT_DATA_DIR: &str = "clinic_data";

/// Directory name for sharded patient folders.
pub const PATIENTS_DIR_NAME: &str = "patients";

/// Directory name, under the data directory, searched for reference tables.
pub const REFERENCE_DIR_NAME: &str = "reference";

pub const PATIENT_FILENAME: &str = "patient.yaml";
pub const MEASUREMENTS_FILENAME: &str = "measurements.yaml";
pub const FOLLOW_UP_FILENAME: &str = "follow_up.yaml";
pub const SETTINGS_FILENAME: &str = "settings.yaml";

/// Per-age-band reference table (first loading tier).
pub const REFERENCE_TABLE_FILENAME: &str = "reference_values.yaml";

/// Single-age reference table kept from older installations (second loading tier).
pub const LEGACY_REFERENCE_TABLE_FILENAME: &str = "reference_values_legacy.yaml";

// System setting keys.
pub const SETTING_FOLLOW_UP_MONTHS: &str = "default_follow_up_months";
pub const SETTING_URGENT_DAYS: &str = "urgent_overdue_days";
pub const SETTING_WARNING_DAYS: &str = "warning_overdue_days";
pub const SETTING_ATTENTION_DAYS: &str = "attention_overdue_days";
pub const SETTING_INSURANCE_INTERVAL_DAYS: &str = "insurance_interval_days";

pub const DEFAULT_FOLLOW_UP_MONTHS: u32 = 6;
pub const DEFAULT_URGENT_DAYS: i64 = 14;
pub const DEFAULT_WARNING_DAYS: i64 = 7;
pub const DEFAULT_ATTENTION_DAYS: i64 = 3;
pub const DEFAULT_INSURANCE_INTERVAL_DAYS: i64 = 120;

/// Upper bound accepted for `default_follow_up_months`.
pub const MAX_FOLLOW_UP_MONTHS: u32 = 120;
/// Upper bound accepted for the day-count settings.
pub const MAX_SETTING_DAYS: u32 = 3650;

/// Months are approximated as this many days when rolling a follow-up forward.
pub const DAYS_PER_MONTH: u64 = 30;

/// A measurement closes pending follow-ups scheduled within this many days either side.
pub const COMPLETION_WINDOW_DAYS: i64 = 3;
