//! Import of measurements recorded at other clinics.
//!
//! Rows arrive already normalised (patient code, date, femur BMD, lumbar BMD). Each accepted
//! row is saved through [`ClinicService::add_measurement_if_new_date`], so imported history
//! rolls the follow-up schedule forward exactly like a local scan.
//!
//! A row is skipped, and reported, when its patient code is unknown, when neither BMD is
//! positive, or when the patient already has a measurement on that date. Rows are applied in
//! order, so a duplicate within the same batch is caught too.

use crate::calculator::is_present;
use crate::clinic::ClinicService;
use crate::measurement::{MeasurementId, NewMeasurement};
use crate::repositories::ClinicStore;
use crate::{ClinicError, ClinicResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportRow {
    pub patient_code: String,
    pub measurement_date: NaiveDate,
    #[serde(default)]
    pub femur_bmd: f64,
    #[serde(default)]
    pub lumbar_bmd: f64,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    UnknownPatient,
    NoReading,
    Duplicate,
    Rejected(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnknownPatient => f.write_str("unknown patient code"),
            SkipReason::NoReading => f.write_str("no positive BMD reading"),
            SkipReason::Duplicate => f.write_str("measurement already recorded for this date"),
            SkipReason::Rejected(message) => write!(f, "rejected: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedRow {
    /// Zero-based position in the input.
    pub row: usize,
    pub patient_code: String,
    pub measurement_id: MeasurementId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRow {
    pub row: usize,
    pub patient_code: String,
    pub measurement_date: NaiveDate,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImportSummary {
    pub imported: Vec<ImportedRow>,
    pub skipped: Vec<SkippedRow>,
}

/// Parses a YAML sequence of import rows.
pub fn parse_import_rows(yaml_text: &str, label: &str) -> ClinicResult<Vec<ImportRow>> {
    crate::yaml::parse(yaml_text, label)
}

impl<S: ClinicStore> ClinicService<S> {
    /// Imports rows in order.
    ///
    /// # Errors
    ///
    /// Store failures abort the import and are returned; rows already imported stay saved.
    pub fn import_measurements(&self, rows: &[ImportRow]) -> ClinicResult<ImportSummary> {
        let mut summary = ImportSummary::default();

        for (index, row) in rows.iter().enumerate() {
            match self.import_row(row)? {
                Ok(measurement_id) => summary.imported.push(ImportedRow {
                    row: index,
                    patient_code: row.patient_code.clone(),
                    measurement_id,
                }),
                Err(reason) => {
                    tracing::warn!(
                        row = index,
                        code = %row.patient_code,
                        date = %row.measurement_date,
                        "skipping import row: {}",
                        reason
                    );
                    summary.skipped.push(SkippedRow {
                        row: index,
                        patient_code: row.patient_code.clone(),
                        measurement_date: row.measurement_date,
                        reason,
                    });
                }
            }
        }

        tracing::info!(
            imported = summary.imported.len(),
            skipped = summary.skipped.len(),
            "import finished"
        );
        Ok(summary)
    }

    fn import_row(&self, row: &ImportRow) -> ClinicResult<Result<MeasurementId, SkipReason>> {
        let Some(patient) = self.find_patient_by_code(&row.patient_code)? else {
            return Ok(Err(SkipReason::UnknownPatient));
        };

        if !is_present(row.femur_bmd) && !is_present(row.lumbar_bmd) {
            return Ok(Err(SkipReason::NoReading));
        }

        let mut measurement = NewMeasurement::new(patient.id, row.measurement_date)
            .with_femur(row.femur_bmd)
            .with_lumbar(row.lumbar_bmd);
        if let Some(notes) = &row.notes {
            measurement = measurement.with_notes(notes.clone());
        }

        match self.add_measurement_if_new_date(measurement) {
            Ok(Some(id)) => Ok(Ok(id)),
            Ok(None) => Ok(Err(SkipReason::Duplicate)),
            Err(ClinicError::InvalidInput(message)) => Ok(Err(SkipReason::Rejected(message))),
            Err(e) => Err(e),
        }
    }
}
