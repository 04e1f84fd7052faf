//! Patient records as consumed by the core.
//!
//! Full patient administration lives outside this crate; the core needs identity, the clinic
//! patient code (for matching imported rows), gender (for reference lookup) and birth date.

use crate::ClinicResult;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use dxa_types::{Gender, NonEmptyText, PatientCode, RecordId};
use serde::{Deserialize, Serialize};

pub type PatientId = RecordId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub id: PatientId,
    pub patient_code: PatientCode,
    pub name: NonEmptyText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_kana: Option<String>,
    pub gender: Gender,
    pub birth_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl PatientRecord {
    /// Whole years of age on `on`.
    pub fn age_on(&self, on: NaiveDate) -> i32 {
        let mut age = on.year() - self.birth_date.year();
        if (on.month(), on.day()) < (self.birth_date.month(), self.birth_date.day()) {
            age -= 1;
        }
        age
    }
}

/// Registration input.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPatient {
    pub patient_code: String,
    pub name: NonEmptyText,
    #[serde(default)]
    pub name_kana: Option<String>,
    pub gender: Gender,
    pub birth_date: NaiveDate,
}

impl NewPatient {
    /// Validates the input and allocates a new identifier.
    pub fn into_record(self) -> ClinicResult<PatientRecord> {
        Ok(PatientRecord {
            id: PatientId::new(),
            patient_code: PatientCode::new(&self.patient_code)?,
            name: self.name,
            name_kana: self
                .name_kana
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            gender: self.gender,
            birth_date: self.birth_date,
            created_at: Utc::now(),
        })
    }
}
