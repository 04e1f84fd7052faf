//! YAML file store.
//!
//! ## Storage Layout
//!
//! ```text
//! <data_dir>/
//!   settings.yaml
//!   patients/
//!     <s1>/
//!       <s2>/
//!         <patient-id>/
//!           patient.yaml
//!           measurements.yaml   # sequence, oldest first on disk
//!           follow_up.yaml      # sequence, creation order
//! ```
//!
//! where `s1` and `s2` are the first four hex characters of the patient identifier. Every
//! document is replaced through a temp file and rename.

use crate::config::CoreConfig;
use crate::constants::{FOLLOW_UP_FILENAME, MEASUREMENTS_FILENAME, PATIENT_FILENAME};
use crate::measurement::MeasurementRecord;
use crate::patient::{PatientId, PatientRecord};
use crate::repositories::ClinicStore;
use crate::schedule::FollowUpEntry;
use crate::settings::SettingsMap;
use crate::yaml::{read_optional, write_atomic};
use crate::{ClinicError, ClinicResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct FileStore {
    cfg: Arc<CoreConfig>,
}

impl FileStore {
    pub fn new(cfg: Arc<CoreConfig>) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.cfg
    }

    fn patient_dir(&self, id: PatientId) -> PathBuf {
        id.sharded_dir(&self.cfg.patients_dir())
    }

    fn patient_file(&self, id: PatientId) -> PathBuf {
        self.patient_dir(id).join(PATIENT_FILENAME)
    }

    fn measurements_file(&self, id: PatientId) -> PathBuf {
        self.patient_dir(id).join(MEASUREMENTS_FILENAME)
    }

    fn follow_up_file(&self, id: PatientId) -> PathBuf {
        self.patient_dir(id).join(FOLLOW_UP_FILENAME)
    }

    fn require_patient(&self, id: PatientId) -> ClinicResult<()> {
        if self.patient_file(id).is_file() {
            Ok(())
        } else {
            Err(ClinicError::PatientNotFound(id.to_string()))
        }
    }

    /// Every `patient.yaml` path under the sharded tree.
    fn patient_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for s1 in subdirs(&self.cfg.patients_dir()) {
            for s2 in subdirs(&s1) {
                for id_dir in subdirs(&s2) {
                    let path = id_dir.join(PATIENT_FILENAME);
                    if path.is_file() {
                        files.push(path);
                    }
                }
            }
        }
        files
    }
}

fn subdirs(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect()
}

impl ClinicStore for FileStore {
    fn insert_patient(&self, patient: &PatientRecord) -> ClinicResult<()> {
        if self.find_patient_by_code(patient.patient_code.as_str())?.is_some() {
            return Err(ClinicError::DuplicatePatientCode(
                patient.patient_code.to_string(),
            ));
        }
        write_atomic(&self.patient_file(patient.id), patient)
    }

    fn get_patient(&self, id: PatientId) -> ClinicResult<Option<PatientRecord>> {
        read_optional(&self.patient_file(id))
    }

    fn list_patients(&self) -> ClinicResult<Vec<PatientRecord>> {
        let mut patients = Vec::new();
        for path in self.patient_files() {
            match read_optional::<PatientRecord>(&path) {
                Ok(Some(patient)) => patients.push(patient),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("skipping unreadable patient file {}: {}", path.display(), e);
                }
            }
        }
        patients.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.patient_code.cmp(&b.patient_code))
        });
        Ok(patients)
    }

    fn append_measurement(&self, record: &MeasurementRecord) -> ClinicResult<()> {
        self.require_patient(record.patient_id)?;
        let path = self.measurements_file(record.patient_id);
        let mut records: Vec<MeasurementRecord> = read_optional(&path)?.unwrap_or_default();
        records.push(record.clone());
        records.sort_by_key(|r| r.measurement_date);
        write_atomic(&path, &records)
    }

    fn measurements_for(&self, patient: PatientId) -> ClinicResult<Vec<MeasurementRecord>> {
        let mut records: Vec<MeasurementRecord> =
            read_optional(&self.measurements_file(patient))?.unwrap_or_default();
        records.sort_by(|a, b| {
            b.measurement_date
                .cmp(&a.measurement_date)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(records)
    }

    fn follow_ups_for(&self, patient: PatientId) -> ClinicResult<Vec<FollowUpEntry>> {
        Ok(read_optional(&self.follow_up_file(patient))?.unwrap_or_default())
    }

    fn save_follow_ups(&self, patient: PatientId, entries: &[FollowUpEntry]) -> ClinicResult<()> {
        self.require_patient(patient)?;
        write_atomic(&self.follow_up_file(patient), &entries)
    }

    fn settings(&self) -> ClinicResult<SettingsMap> {
        Ok(read_optional(&self.cfg.settings_file())?.unwrap_or_default())
    }

    fn put_setting(&self, key: &str, value: &str) -> ClinicResult<()> {
        let mut settings = self.settings()?;
        settings.insert(key.to_string(), value.to_string());
        write_atomic(&self.cfg.settings_file(), &settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator::{Diagnosis, SiteMetrics};
    use crate::measurement::MeasurementId;
    use chrono::{NaiveDate, Utc};
    use dxa_types::{Gender, NonEmptyText, PatientCode};
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> FileStore {
        let cfg = CoreConfig::new(temp.path().to_path_buf(), None).expect("valid config");
        FileStore::new(Arc::new(cfg))
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn patient(code: &str) -> PatientRecord {
        PatientRecord {
            id: PatientId::new(),
            patient_code: PatientCode::new(code).unwrap(),
            name: NonEmptyText::new("Suzuki Michiko").unwrap(),
            name_kana: Some("スズキ ミチコ".into()),
            gender: Gender::Female,
            birth_date: date(1948, 11, 2),
            created_at: Utc::now(),
        }
    }

    fn measurement(patient_id: PatientId, on: NaiveDate) -> MeasurementRecord {
        let femur = SiteMetrics {
            bmd: 0.7,
            yam: Some(81.0),
            tscore: Some(-1.4),
            diagnosis: Diagnosis::Normal,
        };
        MeasurementRecord {
            id: MeasurementId::new(),
            patient_id,
            measurement_date: on,
            femur: Some(femur),
            lumbar: None,
            lumbar_source: None,
            vertebrae: Vec::new(),
            overall_diagnosis: Diagnosis::Normal,
            notes: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_patient_round_trips_through_sharded_dir() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = store(&temp_dir);
        let p = patient("P-001");

        store.insert_patient(&p).expect("insert should succeed");

        let id = p.id.to_string();
        let expected = temp_dir
            .path()
            .join("patients")
            .join(&id[0..2])
            .join(&id[2..4])
            .join(&id)
            .join(PATIENT_FILENAME);
        assert!(expected.is_file());

        let loaded = store.get_patient(p.id).unwrap().expect("patient exists");
        assert_eq!(loaded, p);
        assert_eq!(
            store.find_patient_by_code("P-001").unwrap().map(|x| x.id),
            Some(p.id)
        );
        assert!(store.find_patient_by_code("P-999").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_patient_code_is_rejected() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = store(&temp_dir);
        store.insert_patient(&patient("P-001")).unwrap();

        let err = store
            .insert_patient(&patient("P-001"))
            .expect_err("duplicate code");
        assert!(matches!(err, ClinicError::DuplicatePatientCode(_)));
        assert_eq!(store.list_patients().unwrap().len(), 1);
    }

    #[test]
    fn test_list_patients_skips_unreadable_files() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = store(&temp_dir);
        store.insert_patient(&patient("P-001")).unwrap();

        let broken = temp_dir.path().join("patients/ab/cd/abcd0000000000000000000000000000");
        fs::create_dir_all(&broken).unwrap();
        fs::write(broken.join(PATIENT_FILENAME), "name: [unterminated").unwrap();

        let patients = store.list_patients().unwrap();
        assert_eq!(patients.len(), 1);
        assert_eq!(patients[0].patient_code, "P-001");
    }

    #[test]
    fn test_measurements_are_returned_newest_first() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = store(&temp_dir);
        let p = patient("P-001");
        store.insert_patient(&p).unwrap();

        for on in [date(2024, 7, 1), date(2025, 1, 10), date(2024, 1, 5)] {
            store.append_measurement(&measurement(p.id, on)).unwrap();
        }

        let dates: Vec<NaiveDate> = store
            .measurements_for(p.id)
            .unwrap()
            .into_iter()
            .map(|m| m.measurement_date)
            .collect();
        assert_eq!(dates, vec![date(2025, 1, 10), date(2024, 7, 1), date(2024, 1, 5)]);
    }

    #[test]
    fn test_measurement_for_unknown_patient_fails() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = store(&temp_dir);
        let err = store
            .append_measurement(&measurement(PatientId::new(), date(2025, 1, 1)))
            .expect_err("no such patient");
        assert!(matches!(err, ClinicError::PatientNotFound(_)));
    }

    #[test]
    fn test_follow_ups_replace_and_aggregate() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = store(&temp_dir);
        let a = patient("A");
        let b = patient("B");
        store.insert_patient(&a).unwrap();
        store.insert_patient(&b).unwrap();

        assert!(store.follow_ups_for(a.id).unwrap().is_empty());

        store
            .save_follow_ups(a.id, &[FollowUpEntry::pending(a.id, date(2025, 7, 9))])
            .unwrap();
        store
            .save_follow_ups(
                b.id,
                &[
                    FollowUpEntry::pending(b.id, date(2025, 8, 1)),
                    FollowUpEntry::pending(b.id, date(2026, 2, 1)),
                ],
            )
            .unwrap();

        assert_eq!(store.follow_ups_for(b.id).unwrap().len(), 2);
        assert_eq!(store.all_follow_ups().unwrap().len(), 3);
    }

    #[test]
    fn test_settings_round_trip() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = store(&temp_dir);
        assert!(store.settings().unwrap().is_empty());

        store.put_setting("default_follow_up_months", "12").unwrap();
        store.put_setting("default_follow_up_months", "3").unwrap();

        let settings = store.settings().unwrap();
        assert_eq!(settings.get("default_follow_up_months").map(String::as_str), Some("3"));
        assert!(temp_dir.path().join("settings.yaml").is_file());
        assert!(!temp_dir.path().join("settings.yaml.tmp").exists());
    }
}
