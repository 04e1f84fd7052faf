//! Measurement records.
//!
//! A [`NewMeasurement`] carries raw readings. [`NewMeasurement::into_record`] runs them through
//! the [`DiagnosticCalculator`] to produce an immutable [`MeasurementRecord`] ready to persist.

use crate::calculator::{is_present, DiagnosticCalculator, Diagnosis, SiteMetrics};
use crate::patient::PatientId;
use crate::reference::Site;
use crate::vertebral::{Vertebra, VertebraMetrics};
use crate::{ClinicError, ClinicResult};
use chrono::{DateTime, NaiveDate, Utc};
use dxa_types::{Gender, RecordId};
use serde::{Deserialize, Serialize};

pub type MeasurementId = RecordId;

/// Where the lumbar figures of a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LumbarSource {
    Direct,
    VertebralAverage,
}

/// Lumbar input for a new measurement.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum LumbarReading {
    #[default]
    NotMeasured,
    Direct(f64),
    Vertebrae(Vec<(Vertebra, f64)>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub id: MeasurementId,
    pub patient_id: PatientId,
    pub measurement_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub femur: Option<SiteMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lumbar: Option<SiteMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lumbar_source: Option<LumbarSource>,
    /// Populated only when `lumbar_source` is `VertebralAverage`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vertebrae: Vec<VertebraMetrics>,
    pub overall_diagnosis: Diagnosis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMeasurement {
    pub patient_id: PatientId,
    pub measurement_date: NaiveDate,
    /// Femoral-neck BMD; `0.0` or below means not measured.
    pub femur_bmd: f64,
    pub lumbar: LumbarReading,
    pub notes: Option<String>,
}

impl NewMeasurement {
    pub fn new(patient_id: PatientId, measurement_date: NaiveDate) -> Self {
        Self {
            patient_id,
            measurement_date,
            femur_bmd: 0.0,
            lumbar: LumbarReading::NotMeasured,
            notes: None,
        }
    }

    pub fn with_femur(mut self, bmd: f64) -> Self {
        self.femur_bmd = bmd;
        self
    }

    pub fn with_lumbar(mut self, bmd: f64) -> Self {
        self.lumbar = LumbarReading::Direct(bmd);
        self
    }

    pub fn with_vertebrae(mut self, readings: Vec<(Vertebra, f64)>) -> Self {
        self.lumbar = LumbarReading::Vertebrae(readings);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        let notes = notes.into();
        self.notes = (!notes.trim().is_empty()).then_some(notes);
        self
    }

    /// Scores the readings and allocates a record identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::InvalidInput`] when no site carries a positive reading or a
    /// vertebra is listed twice.
    pub fn into_record(
        self,
        calculator: &DiagnosticCalculator,
        gender: Gender,
    ) -> ClinicResult<MeasurementRecord> {
        let femur = calculator.calculate_site(self.femur_bmd, Site::FemurNeck, gender);

        let (lumbar, lumbar_source, vertebrae) = match &self.lumbar {
            LumbarReading::NotMeasured => (None, None, Vec::new()),
            LumbarReading::Direct(bmd) => {
                let metrics = calculator.calculate_site(*bmd, Site::Lumbar, gender);
                let source = metrics.map(|_| LumbarSource::Direct);
                (metrics, source, Vec::new())
            }
            LumbarReading::Vertebrae(readings) => {
                match calculator.calculate_vertebral_metrics(readings, gender)? {
                    Some(result) => (
                        Some(SiteMetrics::from(result.average)),
                        Some(LumbarSource::VertebralAverage),
                        result.vertebrae,
                    ),
                    None => (None, None, Vec::new()),
                }
            }
        };

        if femur.is_none() && lumbar.is_none() {
            return Err(ClinicError::InvalidInput(format!(
                "measurement on {} has no positive BMD reading",
                self.measurement_date
            )));
        }

        let overall_diagnosis =
            Diagnosis::worst(femur.iter().chain(lumbar.iter()).map(|m| m.diagnosis));

        Ok(MeasurementRecord {
            id: MeasurementId::new(),
            patient_id: self.patient_id,
            measurement_date: self.measurement_date,
            femur,
            lumbar,
            lumbar_source,
            vertebrae,
            overall_diagnosis,
            notes: self.notes,
            created_at: Utc::now(),
        })
    }

    /// True when at least one site has a reading above zero.
    pub fn has_reading(&self) -> bool {
        is_present(self.femur_bmd)
            || match &self.lumbar {
                LumbarReading::NotMeasured => false,
                LumbarReading::Direct(bmd) => is_present(*bmd),
                LumbarReading::Vertebrae(readings) => {
                    readings.iter().any(|(_, bmd)| is_present(*bmd))
                }
            }
    }
}
