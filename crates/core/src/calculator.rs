//! YAM percentage, T-score and diagnosis category from raw BMD readings.
//!
//! The calculator owns a shared, read-only [`ReferenceTable`] and is otherwise stateless, so a
//! single instance can be used from any number of threads.
//!
//! Missing reference data is never an error here: lookups that cannot be resolved return
//! `None`, and a `None` YAM classifies as [`Diagnosis::Unmeasurable`].

use crate::reference::{ReferenceTable, Site};
use dxa_types::Gender;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// YAM below this is osteoporosis.
pub const OSTEOPOROSIS_YAM: f64 = 70.0;
/// YAM below this (and at least [`OSTEOPOROSIS_YAM`]) is low bone mass.
pub const LOW_BONE_MASS_YAM: f64 = 80.0;

/// Diagnosis category derived from a YAM percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Diagnosis {
    Normal,
    LowBoneMass,
    Osteoporosis,
    Unmeasurable,
}

impl Diagnosis {
    /// Classifies a YAM percentage. Lower bounds are inclusive: exactly 70.0 is low bone mass
    /// and exactly 80.0 is normal.
    pub fn from_yam(yam: Option<f64>) -> Self {
        match yam {
            None => Diagnosis::Unmeasurable,
            Some(v) if v < OSTEOPOROSIS_YAM => Diagnosis::Osteoporosis,
            Some(v) if v < LOW_BONE_MASS_YAM => Diagnosis::LowBoneMass,
            Some(_) => Diagnosis::Normal,
        }
    }

    /// Severity rank used to pick the worst of several diagnoses. `Unmeasurable` ranks below
    /// every measured category.
    pub fn severity(&self) -> u8 {
        match self {
            Diagnosis::Unmeasurable => 0,
            Diagnosis::Normal => 1,
            Diagnosis::LowBoneMass => 2,
            Diagnosis::Osteoporosis => 3,
        }
    }

    /// Worst diagnosis in `diagnoses`, or `Unmeasurable` when there is nothing measured.
    pub fn worst<I>(diagnoses: I) -> Self
    where
        I: IntoIterator<Item = Diagnosis>,
    {
        diagnoses
            .into_iter()
            .max_by_key(Diagnosis::severity)
            .unwrap_or(Diagnosis::Unmeasurable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Diagnosis::Normal => "normal",
            Diagnosis::LowBoneMass => "low_bone_mass",
            Diagnosis::Osteoporosis => "osteoporosis",
            Diagnosis::Unmeasurable => "unmeasurable",
        }
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metrics for one site reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SiteMetrics {
    pub bmd: f64,
    pub yam: Option<f64>,
    pub tscore: Option<f64>,
    pub diagnosis: Diagnosis,
}

/// Femur and lumbar metrics plus the overall diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsBundle {
    pub femur: Option<SiteMetrics>,
    pub lumbar: Option<SiteMetrics>,
    pub overall_diagnosis: Diagnosis,
}

impl MetricsBundle {
    /// Combines independently computed site metrics. The overall diagnosis is the worst of
    /// the present sites.
    pub fn from_sites(femur: Option<SiteMetrics>, lumbar: Option<SiteMetrics>) -> Self {
        let overall_diagnosis = Diagnosis::worst(
            femur
                .iter()
                .chain(lumbar.iter())
                .map(|metrics| metrics.diagnosis),
        );
        Self {
            femur,
            lumbar,
            overall_diagnosis,
        }
    }
}

/// Rounds to one decimal place.
pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// A reading counts as present only when it is a positive number.
pub(crate) fn is_present(bmd: f64) -> bool {
    bmd.is_finite() && bmd > 0.0
}

#[derive(Debug, Clone)]
pub struct DiagnosticCalculator {
    reference: Arc<ReferenceTable>,
}

impl DiagnosticCalculator {
    pub fn new(reference: Arc<ReferenceTable>) -> Self {
        Self { reference }
    }

    pub fn reference(&self) -> &ReferenceTable {
        &self.reference
    }

    /// `bmd / mean * 100`, rounded to one decimal place.
    ///
    /// Returns `None` when the site has no reference for this gender.
    pub fn calculate_yam(&self, bmd: f64, site: Site, gender: Gender) -> Option<f64> {
        let entry = self
            .reference
            .get_reference(site, gender, site.age_band())?;
        if entry.mean() <= 0.0 {
            return None;
        }
        Some(round1(bmd / entry.mean() * 100.0))
    }

    /// `(bmd - mean) / sd`, rounded to one decimal place, using the same age band as
    /// [`calculate_yam`](Self::calculate_yam).
    pub fn calculate_tscore(&self, bmd: f64, site: Site, gender: Gender) -> Option<f64> {
        let entry = self
            .reference
            .get_reference(site, gender, site.age_band())?;
        if entry.sd() <= 0.0 {
            return None;
        }
        Some(round1((bmd - entry.mean()) / entry.sd()))
    }

    pub fn get_diagnosis(&self, yam: Option<f64>) -> Diagnosis {
        Diagnosis::from_yam(yam)
    }

    /// All metrics for one reading, or `None` when the reading is not present (≤ 0).
    pub fn calculate_site(&self, bmd: f64, site: Site, gender: Gender) -> Option<SiteMetrics> {
        if !is_present(bmd) {
            return None;
        }
        let yam = self.calculate_yam(bmd, site, gender);
        Some(SiteMetrics {
            bmd,
            yam,
            tscore: self.calculate_tscore(bmd, site, gender),
            diagnosis: Diagnosis::from_yam(yam),
        })
    }

    /// Femoral-neck and lumbar metrics. Either reading may be absent (≤ 0).
    pub fn calculate_all_metrics(&self, femur_bmd: f64, lumbar_bmd: f64, gender: Gender) -> MetricsBundle {
        MetricsBundle::from_sites(
            self.calculate_site(femur_bmd, Site::FemurNeck, gender),
            self.calculate_site(lumbar_bmd, Site::Lumbar, gender),
        )
    }
}
