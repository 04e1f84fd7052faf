//! Follow-up schedule entries and the pure scheduling rules.
//!
//! An entry moves `pending -> completed` exactly once and is never deleted. Overdue status is
//! not stored authoritatively: it is recomputed from the scheduled date at query time, and the
//! stored `days_overdue` only records the value at the moment the entry was last touched.
//!
//! Store access and locking live in [`crate::clinic`]; everything here is a plain function of
//! its inputs.

use crate::constants::{
    COMPLETION_WINDOW_DAYS, DAYS_PER_MONTH, DEFAULT_ATTENTION_DAYS, DEFAULT_URGENT_DAYS,
    DEFAULT_WARNING_DAYS,
};
use crate::calculator::round1;
use crate::patient::{PatientId, PatientRecord};
use crate::{ClinicError, ClinicResult};
use chrono::{DateTime, Datelike, Days, Months, NaiveDate, Utc};
use dxa_types::RecordId;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

pub type ScheduleId = RecordId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactMethod {
    Phone,
    Letter,
    Email,
    InPerson,
}

impl ContactMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactMethod::Phone => "phone",
            ContactMethod::Letter => "letter",
            ContactMethod::Email => "email",
            ContactMethod::InPerson => "in_person",
        }
    }
}

impl fmt::Display for ContactMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContactMethod {
    type Err = ClinicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "phone" | "tel" => Ok(ContactMethod::Phone),
            "letter" | "mail" | "post" => Ok(ContactMethod::Letter),
            "email" => Ok(ContactMethod::Email),
            "in_person" => Ok(ContactMethod::InPerson),
            _ => Err(ClinicError::InvalidInput(format!(
                "unknown contact method: '{s}'"
            ))),
        }
    }
}

/// Outreach made to a patient about a pending follow-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub date: NaiveDate,
    pub method: ContactMethod,
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpEntry {
    pub id: ScheduleId,
    pub patient_id: PatientId,
    pub scheduled_date: NaiveDate,
    pub status: ScheduleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_date: Option<NaiveDate>,
    #[serde(default)]
    pub days_overdue: i64,
    pub contact_needed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<ContactRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FollowUpEntry {
    pub fn pending(patient_id: PatientId, scheduled_date: NaiveDate) -> Self {
        Self {
            id: ScheduleId::new(),
            patient_id,
            scheduled_date,
            status: ScheduleStatus::Pending,
            completed_date: None,
            days_overdue: 0,
            contact_needed: true,
            contact: None,
            notes: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ScheduleStatus::Pending
    }

    /// Days past the scheduled date on `today`, for pending entries that are overdue.
    pub fn days_overdue_on(&self, today: NaiveDate) -> Option<i64> {
        if self.is_pending() && self.scheduled_date < today {
            Some((today - self.scheduled_date).num_days())
        } else {
            None
        }
    }

    /// Whether a measurement on `date` satisfies this entry.
    pub fn matches_measurement(&self, date: NaiveDate) -> bool {
        self.is_pending()
            && (self.scheduled_date - date).num_days().abs() <= COMPLETION_WINDOW_DAYS
    }

    /// Moves the entry to `completed`.
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::ScheduleAlreadyCompleted`] if the entry is already terminal.
    pub fn complete(&mut self, completed_date: NaiveDate) -> ClinicResult<()> {
        if !self.is_pending() {
            return Err(ClinicError::ScheduleAlreadyCompleted(self.id.to_string()));
        }
        self.status = ScheduleStatus::Completed;
        self.completed_date = Some(completed_date);
        self.days_overdue = 0;
        self.contact_needed = false;
        Ok(())
    }

    /// Attaches a contact record. Status and overdue bucketing are unchanged.
    pub fn record_contact(&mut self, contact: ContactRecord) -> ClinicResult<()> {
        if !self.is_pending() {
            return Err(ClinicError::ScheduleAlreadyCompleted(self.id.to_string()));
        }
        self.contact_needed = false;
        self.contact = Some(contact);
        Ok(())
    }
}

/// `measurement_date + months * 30 days`.
///
/// # Errors
///
/// Returns [`ClinicError::InvalidInput`] if the result falls outside the calendar range.
pub fn next_follow_up_date(measurement_date: NaiveDate, months: u32) -> ClinicResult<NaiveDate> {
    measurement_date
        .checked_add_days(Days::new(u64::from(months) * DAYS_PER_MONTH))
        .ok_or_else(|| {
            ClinicError::InvalidInput(format!(
                "follow-up interval of {months} months from {measurement_date} is out of range"
            ))
        })
}

/// Completes every pending entry matched by a measurement on `measurement_date`.
///
/// Returns the number of entries changed.
pub fn complete_matching(entries: &mut [FollowUpEntry], measurement_date: NaiveDate) -> usize {
    let mut changed = 0;
    for entry in entries
        .iter_mut()
        .filter(|e| e.matches_measurement(measurement_date))
    {
        if entry.complete(measurement_date).is_ok() {
            changed += 1;
        }
    }
    changed
}

// ============================================================================
// OVERDUE CLASSIFICATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverdueTier {
    Attention,
    Warning,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverdueThresholds {
    pub urgent: i64,
    pub warning: i64,
    pub attention: i64,
}

impl Default for OverdueThresholds {
    fn default() -> Self {
        Self {
            urgent: DEFAULT_URGENT_DAYS,
            warning: DEFAULT_WARNING_DAYS,
            attention: DEFAULT_ATTENTION_DAYS,
        }
    }
}

impl OverdueThresholds {
    /// `None` below the attention threshold.
    pub fn classify(&self, days_overdue: i64) -> Option<OverdueTier> {
        if days_overdue >= self.urgent {
            Some(OverdueTier::Urgent)
        } else if days_overdue >= self.warning {
            Some(OverdueTier::Warning)
        } else if days_overdue >= self.attention {
            Some(OverdueTier::Attention)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverdueEntry {
    pub schedule_id: ScheduleId,
    pub patient: PatientRecord,
    pub scheduled_date: NaiveDate,
    pub days_overdue: i64,
    pub tier: OverdueTier,
    pub contacted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_contact: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OverdueReport {
    pub urgent: Vec<OverdueEntry>,
    pub warning: Vec<OverdueEntry>,
    pub attention: Vec<OverdueEntry>,
    /// Every surfaced entry, most overdue first.
    pub all: Vec<OverdueEntry>,
}

impl OverdueReport {
    pub fn build<'a, I>(rows: I, today: NaiveDate, thresholds: &OverdueThresholds) -> Self
    where
        I: IntoIterator<Item = (&'a FollowUpEntry, &'a PatientRecord)>,
    {
        let mut all: Vec<OverdueEntry> = rows
            .into_iter()
            .filter_map(|(entry, patient)| {
                let days_overdue = entry.days_overdue_on(today)?;
                let tier = thresholds.classify(days_overdue)?;
                Some(OverdueEntry {
                    schedule_id: entry.id,
                    patient: patient.clone(),
                    scheduled_date: entry.scheduled_date,
                    days_overdue,
                    tier,
                    contacted: entry.contact.is_some(),
                    last_contact: entry.contact.as_ref().map(|c| c.date),
                })
            })
            .collect();

        all.sort_by(|a, b| {
            b.days_overdue
                .cmp(&a.days_overdue)
                .then_with(|| a.patient.patient_code.cmp(&b.patient.patient_code))
        });

        let pick = |tier: OverdueTier| -> Vec<OverdueEntry> {
            all.iter().filter(|e| e.tier == tier).cloned().collect()
        };

        Self {
            urgent: pick(OverdueTier::Urgent),
            warning: pick(OverdueTier::Warning),
            attention: pick(OverdueTier::Attention),
            all,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}

// ============================================================================
// CALENDAR VIEWS
// ============================================================================

/// First and last day of a calendar month.
pub fn month_bounds(year: i32, month: u32) -> ClinicResult<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| ClinicError::InvalidInput(format!("invalid month: {year}-{month}")))?;
    let last = first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .ok_or_else(|| ClinicError::InvalidInput(format!("invalid month: {year}-{month}")))?;
    Ok((first, last))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledVisit {
    pub entry: FollowUpEntry,
    pub patient: PatientRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContinuationStats {
    pub year: i32,
    pub total_scheduled: usize,
    pub completed: usize,
    pub overdue: usize,
    /// Completed as a percentage of scheduled, one decimal place.
    pub continuation_rate: f64,
}

impl ContinuationStats {
    /// Counts entries scheduled within `year`.
    pub fn compute<'a, I>(entries: I, year: i32, today: NaiveDate) -> Self
    where
        I: IntoIterator<Item = &'a FollowUpEntry>,
    {
        let mut stats = Self {
            year,
            total_scheduled: 0,
            completed: 0,
            overdue: 0,
            continuation_rate: 0.0,
        };

        for entry in entries
            .into_iter()
            .filter(|e| e.scheduled_date.year() == year)
        {
            stats.total_scheduled += 1;
            match entry.status {
                ScheduleStatus::Completed => stats.completed += 1,
                ScheduleStatus::Pending if entry.scheduled_date < today => stats.overdue += 1,
                ScheduleStatus::Pending => {}
            }
        }

        if stats.total_scheduled > 0 {
            stats.continuation_rate =
                round1(stats.completed as f64 / stats.total_scheduled as f64 * 100.0);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use dxa_types::{Gender, NonEmptyText, PatientCode};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn patient(code: &str) -> PatientRecord {
        PatientRecord {
            id: PatientId::new(),
            patient_code: PatientCode::new(code).unwrap(),
            name: NonEmptyText::new("Tanaka Hanako").unwrap(),
            name_kana: None,
            gender: Gender::Female,
            birth_date: date(1950, 3, 1),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_roll_forward_uses_thirty_day_months() {
        assert_eq!(next_follow_up_date(date(2025, 1, 10), 6).unwrap(), date(2025, 7, 9));
        assert_eq!(next_follow_up_date(date(2025, 1, 10), 0).unwrap(), date(2025, 1, 10));
    }

    #[test]
    fn test_roll_forward_past_calendar_range_is_an_error() {
        let err = next_follow_up_date(date(2025, 1, 10), u32::MAX).expect_err("out of range");
        assert!(matches!(err, ClinicError::InvalidInput(_)));
    }

    #[test]
    fn test_completion_window_is_three_days_inclusive() {
        let p = PatientId::new();
        let mut entries = vec![
            FollowUpEntry::pending(p, date(2025, 7, 6)),
            FollowUpEntry::pending(p, date(2025, 7, 12)),
            FollowUpEntry::pending(p, date(2025, 7, 13)),
            FollowUpEntry::pending(p, date(2025, 7, 5)),
        ];

        let changed = complete_matching(&mut entries, date(2025, 7, 9));

        assert_eq!(changed, 2);
        assert_eq!(entries[0].status, ScheduleStatus::Completed);
        assert_eq!(entries[0].completed_date, Some(date(2025, 7, 9)));
        assert_eq!(entries[1].status, ScheduleStatus::Completed);
        assert!(entries[2].is_pending());
        assert!(entries[3].is_pending());
    }

    #[test]
    fn test_completed_entry_is_terminal() {
        let mut entry = FollowUpEntry::pending(PatientId::new(), date(2025, 7, 9));
        entry.days_overdue = 5;
        entry.complete(date(2025, 7, 14)).expect("pending entry completes");
        assert_eq!(entry.days_overdue, 0);

        assert!(matches!(
            entry.complete(date(2025, 7, 15)),
            Err(ClinicError::ScheduleAlreadyCompleted(_))
        ));
        assert!(!entry.matches_measurement(date(2025, 7, 9)));
        assert!(entry.record_contact(ContactRecord {
            date: date(2025, 7, 15),
            method: ContactMethod::Phone,
            outcome: "no answer".into(),
            notes: None,
        })
        .is_err());
    }

    #[test]
    fn test_overdue_tiers() {
        let t = OverdueThresholds::default();
        assert_eq!(t.classify(15), Some(OverdueTier::Urgent));
        assert_eq!(t.classify(14), Some(OverdueTier::Urgent));
        assert_eq!(t.classify(7), Some(OverdueTier::Warning));
        assert_eq!(t.classify(3), Some(OverdueTier::Attention));
        assert_eq!(t.classify(2), None);
    }

    #[test]
    fn test_overdue_report_buckets_and_orders() {
        let today = date(2025, 8, 1);
        let patients = [patient("A1"), patient("B2"), patient("C3"), patient("D4")];
        let mut entries = vec![
            FollowUpEntry::pending(patients[0].id, today - Duration::days(3)),
            FollowUpEntry::pending(patients[1].id, today - Duration::days(15)),
            FollowUpEntry::pending(patients[2].id, today - Duration::days(7)),
            FollowUpEntry::pending(patients[3].id, today - Duration::days(2)),
        ];
        entries[1]
            .record_contact(ContactRecord {
                date: today,
                method: ContactMethod::Phone,
                outcome: "will book".into(),
                notes: None,
            })
            .unwrap();

        let report = OverdueReport::build(
            entries.iter().zip(patients.iter()),
            today,
            &OverdueThresholds::default(),
        );

        assert_eq!(report.urgent.len(), 1);
        assert_eq!(report.urgent[0].patient.patient_code, "B2");
        assert!(report.urgent[0].contacted);
        assert_eq!(report.warning[0].patient.patient_code, "C3");
        assert_eq!(report.attention[0].patient.patient_code, "A1");
        assert!(!report.attention[0].contacted);

        let days: Vec<i64> = report.all.iter().map(|e| e.days_overdue).collect();
        assert_eq!(days, vec![15, 7, 3]);
    }

    #[test]
    fn test_future_and_completed_entries_are_not_overdue() {
        let today = date(2025, 8, 1);
        let mut done = FollowUpEntry::pending(PatientId::new(), date(2025, 6, 1));
        done.complete(date(2025, 6, 2)).unwrap();
        let future = FollowUpEntry::pending(PatientId::new(), date(2025, 9, 1));
        let due_today = FollowUpEntry::pending(PatientId::new(), today);

        assert_eq!(done.days_overdue_on(today), None);
        assert_eq!(future.days_overdue_on(today), None);
        assert_eq!(due_today.days_overdue_on(today), None);
    }

    #[test]
    fn test_month_bounds() {
        assert_eq!(
            month_bounds(2024, 2).unwrap(),
            (date(2024, 2, 1), date(2024, 2, 29))
        );
        assert_eq!(
            month_bounds(2025, 12).unwrap(),
            (date(2025, 12, 1), date(2025, 12, 31))
        );
        assert!(month_bounds(2025, 13).is_err());
    }

    #[test]
    fn test_continuation_stats() {
        let p = PatientId::new();
        let today = date(2025, 6, 30);
        let mut entries = vec![
            FollowUpEntry::pending(p, date(2025, 1, 10)),
            FollowUpEntry::pending(p, date(2025, 3, 10)),
            FollowUpEntry::pending(p, date(2025, 5, 10)),
            FollowUpEntry::pending(p, date(2025, 9, 10)),
            FollowUpEntry::pending(p, date(2024, 12, 31)),
        ];
        entries[0].complete(date(2025, 1, 11)).unwrap();
        entries[1].complete(date(2025, 3, 9)).unwrap();

        let stats = ContinuationStats::compute(&entries, 2025, today);

        assert_eq!(stats.total_scheduled, 4);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.overdue, 1);
        assert_eq!(stats.continuation_rate, 50.0);

        let empty = ContinuationStats::compute(&entries, 2030, today);
        assert_eq!(empty.total_scheduled, 0);
        assert_eq!(empty.continuation_rate, 0.0);
    }

    #[test]
    fn test_contact_method_labels() {
        assert_eq!("Phone".parse::<ContactMethod>().unwrap(), ContactMethod::Phone);
        assert_eq!("in-person".parse::<ContactMethod>().unwrap(), ContactMethod::InPerson);
        assert!("pigeon".parse::<ContactMethod>().is_err());
    }
}
