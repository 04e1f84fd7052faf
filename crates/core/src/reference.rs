//! Normative reference values for YAM and T-score calculation.
//!
//! A [`ReferenceTable`] maps (site, gender, age band) to a mean/SD pair. It is built once at
//! startup and then shared read-only (usually behind an `Arc`) with the calculator.
//!
//! ## Loading tiers
//!
//! Loading walks an ordered chain of [`ReferenceLoader`]s and keeps the first table that loads
//! cleanly:
//!
//! 1. [`FullTableLoader`]: `reference_values.yaml`, one row per site with separate young and
//!    adult values for each gender.
//! 2. [`LegacyTableLoader`]: `reference_values_legacy.yaml`, one mean/SD pair per gender,
//!    duplicated into both age bands.
//! 3. [`BuiltInLoader`]: compiled-in defaults for `femur_neck` and `lumbar`.
//!
//! A failing tier is logged and skipped. The built-in tier cannot fail, so loading always
//! produces a populated table.

use crate::config::CoreConfig;
use crate::constants::{LEGACY_REFERENCE_TABLE_FILENAME, REFERENCE_TABLE_FILENAME};
use crate::{yaml, ClinicError, ClinicResult};
use dxa_types::Gender;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::{fmt, fs, str::FromStr};

/// Reference population window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeBand {
    /// Ages 20–29.
    Young,
    /// Ages 20–44.
    Adult,
}

/// Anatomical measurement site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Site {
    FemurNeck,
    TotalHip,
    Lumbar,
    Forearm,
}

/// Age band used for each site. Sites not listed use [`AgeBand::Adult`].
const SITE_AGE_BANDS: &[(Site, AgeBand)] = &[(Site::FemurNeck, AgeBand::Young)];

impl Site {
    pub const ALL: [Site; 4] = [Site::FemurNeck, Site::TotalHip, Site::Lumbar, Site::Forearm];

    pub fn key(&self) -> &'static str {
        match self {
            Site::FemurNeck => "femur_neck",
            Site::TotalHip => "total_hip",
            Site::Lumbar => "lumbar",
            Site::Forearm => "forearm",
        }
    }

    /// The reference population this site is compared against.
    pub fn age_band(&self) -> AgeBand {
        SITE_AGE_BANDS
            .iter()
            .find(|(site, _)| site == self)
            .map(|(_, band)| *band)
            .unwrap_or(AgeBand::Adult)
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Site {
    type Err = ClinicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim();
        Site::ALL
            .into_iter()
            .find(|site| site.key() == key)
            .ok_or_else(|| ClinicError::InvalidInput(format!("unknown site: '{key}'")))
    }
}

/// A mean/SD pair. Both are finite and strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReferenceEntry {
    mean: f64,
    sd: f64,
}

impl ReferenceEntry {
    /// # Errors
    ///
    /// Returns [`ClinicError::InvalidReference`] unless both values are finite and positive.
    pub fn new(mean: f64, sd: f64) -> ClinicResult<Self> {
        if !(mean.is_finite() && mean > 0.0) {
            return Err(ClinicError::InvalidReference(format!(
                "mean must be positive, got {mean}"
            )));
        }
        if !(sd.is_finite() && sd > 0.0) {
            return Err(ClinicError::InvalidReference(format!(
                "standard deviation must be positive, got {sd}"
            )));
        }
        Ok(Self { mean, sd })
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn sd(&self) -> f64 {
        self.sd
    }
}

/// Which tier produced a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceSource {
    FullTable,
    LegacyTable,
    BuiltIn,
    /// Assembled in code, e.g. by tests.
    Custom,
}

impl fmt::Display for ReferenceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReferenceSource::FullTable => "full reference table",
            ReferenceSource::LegacyTable => "legacy reference table",
            ReferenceSource::BuiltIn => "built-in reference values",
            ReferenceSource::Custom => "custom reference values",
        })
    }
}

/// Immutable lookup of reference values.
#[derive(Debug, Clone)]
pub struct ReferenceTable {
    source: ReferenceSource,
    entries: HashMap<(Site, Gender, AgeBand), ReferenceEntry>,
}

impl ReferenceTable {
    pub fn new(source: ReferenceSource) -> Self {
        Self {
            source,
            entries: HashMap::new(),
        }
    }

    /// Adds or replaces one entry. Used while assembling a table; tables are not mutated once
    /// handed to a calculator.
    pub fn with_entry(
        mut self,
        site: Site,
        gender: Gender,
        band: AgeBand,
        entry: ReferenceEntry,
    ) -> Self {
        self.entries.insert((site, gender, band), entry);
        self
    }

    /// Inserts the same entry into both age bands.
    pub fn with_single_band_entry(self, site: Site, gender: Gender, entry: ReferenceEntry) -> Self {
        self.with_entry(site, gender, AgeBand::Young, entry)
            .with_entry(site, gender, AgeBand::Adult, entry)
    }

    pub fn get_reference(&self, site: Site, gender: Gender, band: AgeBand) -> Option<ReferenceEntry> {
        self.entries.get(&(site, gender, band)).copied()
    }

    pub fn contains_site(&self, site: Site) -> bool {
        self.entries.keys().any(|(s, _, _)| *s == site)
    }

    pub fn sites(&self) -> Vec<Site> {
        let mut sites: Vec<Site> = Site::ALL
            .into_iter()
            .filter(|site| self.contains_site(*site))
            .collect();
        sites.sort();
        sites
    }

    pub fn source(&self) -> ReferenceSource {
        self.source
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One tier in the loading chain.
pub trait ReferenceLoader {
    fn source(&self) -> ReferenceSource;

    fn load(&self) -> ClinicResult<ReferenceTable>;
}

/// Loads the per-age-band table.
#[derive(Debug, Clone)]
pub struct FullTableLoader {
    path: PathBuf,
}

impl FullTableLoader {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FullRowWire {
    site: String,
    female_mean_young: f64,
    female_sd_young: f64,
    female_mean_adult: f64,
    female_sd_adult: f64,
    male_mean_young: f64,
    male_sd_young: f64,
    male_mean_adult: f64,
    male_sd_adult: f64,
}

impl ReferenceLoader for FullTableLoader {
    fn source(&self) -> ReferenceSource {
        ReferenceSource::FullTable
    }

    fn load(&self) -> ClinicResult<ReferenceTable> {
        let rows: Vec<FullRowWire> = read_rows(&self.path)?;
        let mut table = ReferenceTable::new(self.source());

        for row in rows {
            let Some(site) = known_site(&row.site) else {
                continue;
            };
            table = table
                .with_entry(
                    site,
                    Gender::Female,
                    AgeBand::Young,
                    ReferenceEntry::new(row.female_mean_young, row.female_sd_young)?,
                )
                .with_entry(
                    site,
                    Gender::Female,
                    AgeBand::Adult,
                    ReferenceEntry::new(row.female_mean_adult, row.female_sd_adult)?,
                )
                .with_entry(
                    site,
                    Gender::Male,
                    AgeBand::Young,
                    ReferenceEntry::new(row.male_mean_young, row.male_sd_young)?,
                )
                .with_entry(
                    site,
                    Gender::Male,
                    AgeBand::Adult,
                    ReferenceEntry::new(row.male_mean_adult, row.male_sd_adult)?,
                );
        }

        non_empty(table, &self.path)
    }
}

/// Loads the older single-age table and copies each pair into both age bands.
#[derive(Debug, Clone)]
pub struct LegacyTableLoader {
    path: PathBuf,
}

impl LegacyTableLoader {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LegacyRowWire {
    site: String,
    female_mean: f64,
    female_sd: f64,
    male_mean: f64,
    male_sd: f64,
}

impl ReferenceLoader for LegacyTableLoader {
    fn source(&self) -> ReferenceSource {
        ReferenceSource::LegacyTable
    }

    fn load(&self) -> ClinicResult<ReferenceTable> {
        let rows: Vec<LegacyRowWire> = read_rows(&self.path)?;
        let mut table = ReferenceTable::new(self.source());

        for row in rows {
            let Some(site) = known_site(&row.site) else {
                continue;
            };
            table = table
                .with_single_band_entry(
                    site,
                    Gender::Female,
                    ReferenceEntry::new(row.female_mean, row.female_sd)?,
                )
                .with_single_band_entry(
                    site,
                    Gender::Male,
                    ReferenceEntry::new(row.male_mean, row.male_sd)?,
                );
        }

        non_empty(table, &self.path)
    }
}

/// Compiled-in defaults. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltInLoader;

impl ReferenceLoader for BuiltInLoader {
    fn source(&self) -> ReferenceSource {
        ReferenceSource::BuiltIn
    }

    fn load(&self) -> ClinicResult<ReferenceTable> {
        Ok(built_in_table())
    }
}

/// Default reference values. Femoral neck has only a young-adult reference, so both bands
/// carry the same pair.
pub fn built_in_table() -> ReferenceTable {
    const ROWS: &[(Site, Gender, AgeBand, f64, f64)] = &[
        (Site::FemurNeck, Gender::Female, AgeBand::Young, 0.864, 0.12),
        (Site::FemurNeck, Gender::Female, AgeBand::Adult, 0.864, 0.12),
        (Site::FemurNeck, Gender::Male, AgeBand::Young, 1.028, 0.146),
        (Site::FemurNeck, Gender::Male, AgeBand::Adult, 1.028, 0.146),
        (Site::Lumbar, Gender::Female, AgeBand::Young, 1.120, 0.134),
        (Site::Lumbar, Gender::Female, AgeBand::Adult, 1.056, 0.134),
        (Site::Lumbar, Gender::Male, AgeBand::Young, 1.200, 0.155),
        (Site::Lumbar, Gender::Male, AgeBand::Adult, 1.140, 0.155),
    ];

    ROWS.iter().fold(
        ReferenceTable::new(ReferenceSource::BuiltIn),
        |table, &(site, gender, band, mean, sd)| {
            table.with_entry(site, gender, band, ReferenceEntry { mean, sd })
        },
    )
}

/// Returns the first table that loads, falling back to [`built_in_table`] when every loader
/// fails.
pub fn load_first_available(loaders: &[&dyn ReferenceLoader]) -> ReferenceTable {
    for loader in loaders {
        match loader.load() {
            Ok(table) => {
                tracing::info!(
                    "loaded {} ({} sites)",
                    table.source(),
                    table.sites().len()
                );
                return table;
            }
            Err(e) => {
                tracing::warn!("{} unavailable, trying next source: {}", loader.source(), e);
            }
        }
    }

    tracing::warn!("no reference source loaded; using built-in reference values");
    built_in_table()
}

/// Loads the standard three-tier chain from the configured reference directory.
pub fn load_reference_table(cfg: &CoreConfig) -> ReferenceTable {
    let full = FullTableLoader::new(cfg.reference_dir().join(REFERENCE_TABLE_FILENAME));
    let legacy = LegacyTableLoader::new(cfg.reference_dir().join(LEGACY_REFERENCE_TABLE_FILENAME));
    load_first_available(&[&full, &legacy, &BuiltInLoader])
}

fn read_rows<T: serde::de::DeserializeOwned>(path: &std::path::Path) -> ClinicResult<Vec<T>> {
    let text = fs::read_to_string(path).map_err(|source| ClinicError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    yaml::parse(&text, &path.display().to_string())
}

fn known_site(key: &str) -> Option<Site> {
    match key.parse::<Site>() {
        Ok(site) => Some(site),
        Err(_) => {
            tracing::warn!("skipping reference row for unsupported site '{}'", key);
            None
        }
    }
}

fn non_empty(table: ReferenceTable, path: &std::path::Path) -> ClinicResult<ReferenceTable> {
    if table.is_empty() {
        return Err(ClinicError::InvalidReference(format!(
            "{} contains no usable rows",
            path.display()
        )));
    }
    Ok(table)
}
