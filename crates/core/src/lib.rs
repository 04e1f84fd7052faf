//! # DXA Core
//!
//! Core business logic for the DXA bone-density clinic.
//!
//! This crate contains the diagnostic engine and the follow-up bookkeeping:
//! - Reference value tables with tiered loading
//! - YAM %, T-score and diagnosis per site, plus per-vertebra lumbar analysis
//! - Measurement records and their follow-up schedule
//! - Insurance re-measurement interval checks
//! - Sharded YAML file storage under the configured data directory
//!
//! **No API concerns**: HTTP servers and command-line handling belong in `dxa-run` and
//! `dxa-cli`.

pub mod calculator;
pub mod clinic;
pub mod config;
pub mod constants;
pub mod eligibility;
pub mod error;
pub mod import;
pub mod measurement;
pub mod patient;
pub mod reference;
pub mod repositories;
pub mod schedule;
pub mod settings;
pub mod vertebral;

mod yaml;

pub use calculator::{DiagnosticCalculator, Diagnosis, MetricsBundle, SiteMetrics};
pub use clinic::ClinicService;
pub use config::CoreConfig;
pub use eligibility::{Eligibility, EligibilityReason};
pub use error::{ClinicError, ClinicResult};
pub use import::{ImportRow, ImportSummary, SkipReason};
pub use measurement::{LumbarReading, LumbarSource, MeasurementId, MeasurementRecord, NewMeasurement};
pub use patient::{NewPatient, PatientId, PatientRecord};
pub use reference::{load_reference_table, ReferenceTable, Site};
pub use repositories::{ClinicStore, FileStore};
pub use schedule::{
    ContactMethod, ContactRecord, ContinuationStats, FollowUpEntry, OverdueReport, OverdueTier,
    ScheduleId, ScheduleStatus,
};
pub use vertebral::{Vertebra, VertebralResult};

pub use dxa_types::{Gender, NonEmptyText, PatientCode, RecordId};
