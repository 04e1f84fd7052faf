//! Per-vertebra lumbar analysis.
//!
//! Each present vertebra (L1–L4, BMD > 0) is scored against the lumbar reference. The
//! composite lumbar result is re-derived from the **mean BMD** rather than by averaging the
//! per-vertebra YAM or T-score values, so it matches what a single lumbar reading of that BMD
//! would produce.
//!
//! With two or more vertebrae an [`InterVertebralAnalysis`] describes the spread between them
//! and flags vertebrae at risk.

use crate::calculator::{
    is_present, DiagnosticCalculator, Diagnosis, SiteMetrics, LOW_BONE_MASS_YAM, OSTEOPOROSIS_YAM,
};
use crate::reference::Site;
use crate::{ClinicError, ClinicResult};
use dxa_types::Gender;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::{fmt, str::FromStr};

/// YAM spread between vertebrae above which an attention note is raised.
pub const YAM_RANGE_ATTENTION: f64 = 15.0;
/// BMD spread (g/cm²) between vertebrae above which an attention note is raised.
pub const BMD_RANGE_ATTENTION: f64 = 0.1;
/// Relative BMD change (%) beyond which a vertebra is trending rather than stable.
pub const TREND_THRESHOLD_PERCENT: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Vertebra {
    L1,
    L2,
    L3,
    L4,
}

impl Vertebra {
    pub const ALL: [Vertebra; 4] = [Vertebra::L1, Vertebra::L2, Vertebra::L3, Vertebra::L4];

    pub fn as_str(&self) -> &'static str {
        match self {
            Vertebra::L1 => "L1",
            Vertebra::L2 => "L2",
            Vertebra::L3 => "L3",
            Vertebra::L4 => "L4",
        }
    }
}

impl fmt::Display for Vertebra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vertebra {
    type Err = crate::ClinicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = s.trim().to_ascii_uppercase();
        Vertebra::ALL
            .into_iter()
            .find(|v| v.as_str() == label)
            .ok_or_else(|| crate::ClinicError::InvalidInput(format!("unknown vertebra: '{s}'")))
    }
}

/// Metrics for one vertebra.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VertebraMetrics {
    pub vertebra: Vertebra,
    pub bmd: f64,
    pub yam: Option<f64>,
    pub tscore: Option<f64>,
    pub diagnosis: Diagnosis,
}

/// Composite lumbar metrics derived from the mean BMD.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AverageMetrics {
    pub bmd: f64,
    pub yam: Option<f64>,
    pub tscore: Option<f64>,
    pub diagnosis: Diagnosis,
}

impl From<AverageMetrics> for SiteMetrics {
    fn from(avg: AverageMetrics) -> Self {
        SiteMetrics {
            bmd: avg.bmd,
            yam: avg.yam,
            tscore: avg.tscore,
            diagnosis: avg.diagnosis,
        }
    }
}

/// Min/max/range/mean of one metric across vertebrae.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Spread {
    pub min: f64,
    pub max: f64,
    pub range: f64,
    pub average: f64,
    /// First vertebra holding the minimum.
    pub lowest: Vertebra,
    /// First vertebra holding the maximum.
    pub highest: Vertebra,
}

impl Spread {
    /// `None` for an empty input. Ties resolve to the first vertebra in input order.
    fn of(values: &[(Vertebra, f64)]) -> Option<Self> {
        let (&(first_v, first), rest) = values.split_first()?;
        let mut lowest = (first_v, first);
        let mut highest = (first_v, first);
        let mut sum = first;

        for &(v, value) in rest {
            if value < lowest.1 {
                lowest = (v, value);
            }
            if value > highest.1 {
                highest = (v, value);
            }
            sum += value;
        }

        Some(Self {
            min: lowest.1,
            max: highest.1,
            range: highest.1 - lowest.1,
            average: sum / values.len() as f64,
            lowest: lowest.0,
            highest: highest.0,
        })
    }
}

/// A vertebra flagged by the risk assessment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VertebraRisk {
    pub vertebra: Vertebra,
    pub yam: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttentionPoint {
    WideYamSpread { range: f64 },
    WideBmdSpread { range: f64 },
    WeakestVertebra { vertebra: Vertebra, yam: f64 },
}

impl fmt::Display for AttentionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttentionPoint::WideYamSpread { range } => {
                write!(f, "large YAM difference between vertebrae ({range:.1}%)")
            }
            AttentionPoint::WideBmdSpread { range } => {
                write!(f, "large BMD difference between vertebrae ({range:.3} g/cm²)")
            }
            AttentionPoint::WeakestVertebra { vertebra, yam } => {
                write!(f, "{vertebra} is the weakest vertebra (YAM: {yam:.1}%)")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// YAM below 70.
    pub high_risk: Vec<VertebraRisk>,
    /// YAM in [70, 80).
    pub moderate_risk: Vec<VertebraRisk>,
    pub attention_points: Vec<AttentionPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterVertebralAnalysis {
    pub bmd: Spread,
    /// Over vertebrae that have a YAM.
    pub yam: Option<Spread>,
    /// Over vertebrae that have a T-score.
    pub tscore: Option<Spread>,
    pub risk: RiskAssessment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertebralResult {
    /// In input order.
    pub vertebrae: Vec<VertebraMetrics>,
    pub average: AverageMetrics,
    /// Present only when two or more vertebrae were measured.
    pub analysis: Option<InterVertebralAnalysis>,
}

impl DiagnosticCalculator {
    /// Scores each present vertebra and derives the composite lumbar result.
    ///
    /// Returns `Ok(None)` when no vertebra has a positive BMD.
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::InvalidInput`] when a vertebra label appears more than once.
    pub fn calculate_vertebral_metrics(
        &self,
        readings: &[(Vertebra, f64)],
        gender: Gender,
    ) -> ClinicResult<Option<VertebralResult>> {
        let mut seen = BTreeSet::new();
        if let Some((repeated, _)) = readings.iter().find(|(v, _)| !seen.insert(*v)) {
            return Err(ClinicError::InvalidInput(format!(
                "vertebra {repeated} given more than once"
            )));
        }

        let vertebrae: Vec<VertebraMetrics> = readings
            .iter()
            .filter(|(_, bmd)| is_present(*bmd))
            .map(|&(vertebra, bmd)| {
                let yam = self.calculate_yam(bmd, Site::Lumbar, gender);
                VertebraMetrics {
                    vertebra,
                    bmd,
                    yam,
                    tscore: self.calculate_tscore(bmd, Site::Lumbar, gender),
                    diagnosis: Diagnosis::from_yam(yam),
                }
            })
            .collect();

        if vertebrae.is_empty() {
            return Ok(None);
        }

        let mean_bmd = vertebrae.iter().map(|v| v.bmd).sum::<f64>() / vertebrae.len() as f64;
        let average_yam = self.calculate_yam(mean_bmd, Site::Lumbar, gender);
        let average = AverageMetrics {
            bmd: mean_bmd,
            yam: average_yam,
            tscore: self.calculate_tscore(mean_bmd, Site::Lumbar, gender),
            diagnosis: Diagnosis::from_yam(average_yam),
        };

        let analysis = analyze_differences(&vertebrae);

        Ok(Some(VertebralResult {
            vertebrae,
            average,
            analysis,
        }))
    }
}

fn analyze_differences(vertebrae: &[VertebraMetrics]) -> Option<InterVertebralAnalysis> {
    if vertebrae.len() < 2 {
        return None;
    }

    let bmd_values: Vec<(Vertebra, f64)> = vertebrae.iter().map(|v| (v.vertebra, v.bmd)).collect();
    let yam_values: Vec<(Vertebra, f64)> = vertebrae
        .iter()
        .filter_map(|v| v.yam.map(|yam| (v.vertebra, yam)))
        .collect();
    let tscore_values: Vec<(Vertebra, f64)> = vertebrae
        .iter()
        .filter_map(|v| v.tscore.map(|t| (v.vertebra, t)))
        .collect();

    let bmd = Spread::of(&bmd_values)?;
    let yam = Spread::of(&yam_values);
    let tscore = Spread::of(&tscore_values);
    let risk = assess_risk(&yam_values, &bmd, yam.as_ref());

    Some(InterVertebralAnalysis {
        bmd,
        yam,
        tscore,
        risk,
    })
}

fn assess_risk(yam_values: &[(Vertebra, f64)], bmd: &Spread, yam: Option<&Spread>) -> RiskAssessment {
    let mut risk = RiskAssessment::default();

    for &(vertebra, value) in yam_values {
        if value < OSTEOPOROSIS_YAM {
            risk.high_risk.push(VertebraRisk { vertebra, yam: value });
        } else if value < LOW_BONE_MASS_YAM {
            risk.moderate_risk.push(VertebraRisk { vertebra, yam: value });
        }
    }

    if let Some(yam) = yam {
        if yam.range > YAM_RANGE_ATTENTION {
            risk.attention_points
                .push(AttentionPoint::WideYamSpread { range: yam.range });
        }
    }

    if bmd.range > BMD_RANGE_ATTENTION {
        risk.attention_points
            .push(AttentionPoint::WideBmdSpread { range: bmd.range });
    }

    if let Some(yam) = yam {
        risk.attention_points.push(AttentionPoint::WeakestVertebra {
            vertebra: yam.lowest,
            yam: yam.min,
        });
    }

    risk
}

// ============================================================================
// PROGRESSION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Worsening,
}

impl Trend {
    /// Classifies the relative BMD change. A non-positive previous value is treated as no
    /// change.
    pub fn between(current_bmd: f64, previous_bmd: f64) -> Self {
        let change_percent = if previous_bmd > 0.0 {
            (current_bmd - previous_bmd) / previous_bmd * 100.0
        } else {
            0.0
        };

        if change_percent > TREND_THRESHOLD_PERCENT {
            Trend::Improving
        } else if change_percent < -TREND_THRESHOLD_PERCENT {
            Trend::Worsening
        } else {
            Trend::Stable
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VertebraProgression {
    pub vertebra: Vertebra,
    pub previous_bmd: f64,
    pub current_bmd: f64,
    pub bmd_change: f64,
    pub yam_change: Option<f64>,
    pub tscore_change: Option<f64>,
    pub trend: Trend,
}

/// Compares two sets of per-vertebra rows, in L1–L4 order. Vertebrae missing from either
/// side are skipped.
pub fn vertebral_progression(
    current: &[VertebraMetrics],
    previous: &[VertebraMetrics],
) -> Vec<VertebraProgression> {
    let find = |rows: &[VertebraMetrics], v: Vertebra| rows.iter().find(|r| r.vertebra == v).copied();

    Vertebra::ALL
        .into_iter()
        .filter_map(|v| {
            let now = find(current, v)?;
            let before = find(previous, v)?;
            Some(VertebraProgression {
                vertebra: v,
                previous_bmd: before.bmd,
                current_bmd: now.bmd,
                bmd_change: now.bmd - before.bmd,
                yam_change: now.yam.zip(before.yam).map(|(a, b)| a - b),
                tscore_change: now.tscore.zip(before.tscore).map(|(a, b)| a - b),
                trend: Trend::between(now.bmd, before.bmd),
            })
        })
        .collect()
}
