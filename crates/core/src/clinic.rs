//! Clinic service: the operations exposed by the core.
//!
//! [`ClinicService`] ties the calculator to a [`ClinicStore`]. Every read-modify-write on a
//! patient's follow-up list happens under that patient's lock, so two saves for the same
//! patient cannot create duplicate entries or complete the same entry twice.
//!
//! Nothing here caches store contents. Each call re-reads what it needs.

use crate::calculator::{DiagnosticCalculator, MetricsBundle};
use crate::eligibility::{evaluate_eligibility, Eligibility};
use crate::measurement::{MeasurementId, MeasurementRecord, NewMeasurement};
use crate::patient::{NewPatient, PatientId, PatientRecord};
use crate::repositories::ClinicStore;
use crate::schedule::{
    complete_matching, month_bounds, next_follow_up_date, ContactRecord, ContinuationStats,
    FollowUpEntry, OverdueReport, ScheduleId, ScheduledVisit,
};
use crate::settings::{get_setting, validate_setting, ClinicSettings};
use crate::vertebral::{vertebral_progression, Vertebra, VertebraProgression, VertebralResult};
use crate::{ClinicError, ClinicResult};
use chrono::NaiveDate;
use dxa_types::Gender;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

type PatientLocks = Mutex<HashMap<PatientId, Arc<Mutex<()>>>>;

pub struct ClinicService<S> {
    store: S,
    calculator: Arc<DiagnosticCalculator>,
    locks: PatientLocks,
}

/// Ignores poisoning: the guarded value is `()`, so a panicked holder leaves nothing torn.
fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<S: ClinicStore> ClinicService<S> {
    pub fn new(store: S, calculator: Arc<DiagnosticCalculator>) -> Self {
        Self {
            store,
            calculator,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn calculator(&self) -> &DiagnosticCalculator {
        &self.calculator
    }

    fn patient_lock(&self, patient: PatientId) -> Arc<Mutex<()>> {
        lock_unpoisoned(&self.locks)
            .entry(patient)
            .or_default()
            .clone()
    }

    // ------------------------------------------------------------------
    // Calculations
    // ------------------------------------------------------------------

    pub fn calculate_all_metrics(&self, femur_bmd: f64, lumbar_bmd: f64, gender: Gender) -> MetricsBundle {
        self.calculator
            .calculate_all_metrics(femur_bmd, lumbar_bmd, gender)
    }

    pub fn calculate_vertebral_metrics(
        &self,
        readings: &[(Vertebra, f64)],
        gender: Gender,
    ) -> ClinicResult<Option<VertebralResult>> {
        self.calculator.calculate_vertebral_metrics(readings, gender)
    }

    // ------------------------------------------------------------------
    // Patients
    // ------------------------------------------------------------------

    pub fn register_patient(&self, new_patient: NewPatient) -> ClinicResult<PatientRecord> {
        let record = new_patient.into_record()?;
        self.store.insert_patient(&record)?;
        tracing::info!(patient_id = %record.id, code = %record.patient_code, "registered patient");
        Ok(record)
    }

    pub fn get_patient(&self, id: PatientId) -> ClinicResult<PatientRecord> {
        self.store
            .get_patient(id)?
            .ok_or_else(|| ClinicError::PatientNotFound(id.to_string()))
    }

    pub fn list_patients(&self) -> ClinicResult<Vec<PatientRecord>> {
        self.store.list_patients()
    }

    pub fn find_patient_by_code(&self, code: &str) -> ClinicResult<Option<PatientRecord>> {
        self.store.find_patient_by_code(code.trim())
    }

    // ------------------------------------------------------------------
    // Measurements
    // ------------------------------------------------------------------

    /// Scores and saves a measurement, then updates the patient's follow-up schedule.
    ///
    /// Pending entries within the completion window of the measurement date are completed,
    /// and a new pending entry is created `default_follow_up_months` later. Settings and the
    /// current schedule are read, and the new schedule computed, before anything is written,
    /// so a failed read leaves the store untouched.
    ///
    /// # Errors
    ///
    /// - [`ClinicError::PatientNotFound`] for an unknown patient
    /// - [`ClinicError::InvalidInput`] when no site carries a positive reading, or the next
    ///   follow-up date is out of range
    /// - any store error; if the schedule write fails the measurement is already saved
    pub fn add_measurement(&self, measurement: NewMeasurement) -> ClinicResult<MeasurementId> {
        let lock = self.patient_lock(measurement.patient_id);
        let _guard = lock_unpoisoned(&lock);
        self.save_measurement_locked(measurement)
    }

    /// Saves the measurement unless the patient already has one on the same date.
    ///
    /// The date check and the save run under the same patient lock. Returns `Ok(None)` for a
    /// same-date duplicate.
    pub fn add_measurement_if_new_date(
        &self,
        measurement: NewMeasurement,
    ) -> ClinicResult<Option<MeasurementId>> {
        let lock = self.patient_lock(measurement.patient_id);
        let _guard = lock_unpoisoned(&lock);

        let duplicate = self
            .store
            .measurements_for(measurement.patient_id)?
            .iter()
            .any(|m| m.measurement_date == measurement.measurement_date);
        if duplicate {
            return Ok(None);
        }
        self.save_measurement_locked(measurement).map(Some)
    }

    /// Caller holds the patient lock.
    fn save_measurement_locked(&self, measurement: NewMeasurement) -> ClinicResult<MeasurementId> {
        let patient_id = measurement.patient_id;
        let patient = self.get_patient(patient_id)?;
        let record = measurement.into_record(&self.calculator, patient.gender)?;

        let settings = self.settings()?;
        let mut entries = self.store.follow_ups_for(patient_id)?;
        let next_date = next_follow_up_date(record.measurement_date, settings.follow_up_months)?;
        let completed = complete_matching(&mut entries, record.measurement_date);
        entries.push(FollowUpEntry::pending(patient_id, next_date));

        self.store.append_measurement(&record)?;

        if let Err(e) = self.store.save_follow_ups(patient_id, &entries) {
            tracing::error!(
                patient_id = %patient_id,
                measurement_id = %record.id,
                "measurement saved but follow-up schedule update failed: {}",
                e
            );
            return Err(e);
        }

        tracing::info!(
            patient_id = %patient_id,
            measurement_id = %record.id,
            diagnosis = %record.overall_diagnosis,
            completed,
            next_follow_up = %next_date,
            "saved measurement"
        );
        Ok(record.id)
    }

    /// Measurement history, newest first.
    pub fn measurement_history(&self, patient: PatientId) -> ClinicResult<Vec<MeasurementRecord>> {
        self.get_patient(patient)?;
        self.store.measurements_for(patient)
    }

    pub fn last_measurement(&self, patient: PatientId) -> ClinicResult<Option<MeasurementRecord>> {
        Ok(self.store.measurements_for(patient)?.into_iter().next())
    }

    /// Latest measurement strictly before `date`.
    pub fn previous_measurement(
        &self,
        patient: PatientId,
        date: NaiveDate,
    ) -> ClinicResult<Option<MeasurementRecord>> {
        Ok(self
            .store
            .measurements_for(patient)?
            .into_iter()
            .find(|m| m.measurement_date < date))
    }

    /// Per-vertebra change between the two most recent measurements that carry vertebra rows.
    ///
    /// Returns `None` when fewer than two such measurements exist.
    pub fn vertebral_progression(
        &self,
        patient: PatientId,
    ) -> ClinicResult<Option<Vec<VertebraProgression>>> {
        let history = self.measurement_history(patient)?;
        let mut with_vertebrae = history.iter().filter(|m| !m.vertebrae.is_empty());
        match (with_vertebrae.next(), with_vertebrae.next()) {
            (Some(current), Some(previous)) => Ok(Some(vertebral_progression(
                &current.vertebrae,
                &previous.vertebrae,
            ))),
            _ => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Follow-up schedule
    // ------------------------------------------------------------------

    pub fn follow_ups(&self, patient: PatientId) -> ClinicResult<Vec<FollowUpEntry>> {
        self.store.follow_ups_for(patient)
    }

    fn patients_with_follow_ups(&self) -> ClinicResult<Vec<(PatientRecord, Vec<FollowUpEntry>)>> {
        self.store
            .list_patients()?
            .into_iter()
            .map(|p| {
                let entries = self.store.follow_ups_for(p.id)?;
                Ok((p, entries))
            })
            .collect()
    }

    /// Pending entries overdue on `today`, bucketed by the configured thresholds.
    pub fn get_overdue_patients(&self, today: NaiveDate) -> ClinicResult<OverdueReport> {
        let thresholds = self.settings()?.thresholds;
        let rows = self.patients_with_follow_ups()?;
        Ok(OverdueReport::build(
            rows.iter()
                .flat_map(|(p, entries)| entries.iter().map(move |e| (e, p))),
            today,
            &thresholds,
        ))
    }

    fn owner_of(&self, schedule_id: ScheduleId) -> ClinicResult<PatientId> {
        self.store
            .all_follow_ups()?
            .into_iter()
            .find(|e| e.id == schedule_id)
            .map(|e| e.patient_id)
            .ok_or_else(|| ClinicError::ScheduleNotFound(schedule_id.to_string()))
    }

    /// Loads the owning patient's entries under their lock, applies `change` to the target
    /// entry and saves the list.
    fn update_entry<F>(&self, schedule_id: ScheduleId, change: F) -> ClinicResult<FollowUpEntry>
    where
        F: FnOnce(&mut FollowUpEntry) -> ClinicResult<()>,
    {
        let patient_id = self.owner_of(schedule_id)?;
        let lock = self.patient_lock(patient_id);
        let _guard = lock_unpoisoned(&lock);

        let mut entries = self.store.follow_ups_for(patient_id)?;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == schedule_id)
            .ok_or_else(|| ClinicError::ScheduleNotFound(schedule_id.to_string()))?;
        change(entry)?;
        let updated = entry.clone();

        self.store.save_follow_ups(patient_id, &entries)?;
        Ok(updated)
    }

    /// Operator override: completes a pending entry as of `today`.
    pub fn complete_follow_up(
        &self,
        schedule_id: ScheduleId,
        today: NaiveDate,
    ) -> ClinicResult<FollowUpEntry> {
        let entry = self.update_entry(schedule_id, |e| e.complete(today))?;
        tracing::info!(schedule_id = %schedule_id, "follow-up completed manually");
        Ok(entry)
    }

    pub fn record_contact(
        &self,
        schedule_id: ScheduleId,
        contact: ContactRecord,
    ) -> ClinicResult<FollowUpEntry> {
        let method = contact.method;
        let entry = self.update_entry(schedule_id, |e| e.record_contact(contact))?;
        tracing::info!(schedule_id = %schedule_id, method = %method, "recorded patient contact");
        Ok(entry)
    }

    /// Every entry scheduled in the given calendar month, earliest first.
    pub fn monthly_schedule(&self, year: i32, month: u32) -> ClinicResult<Vec<ScheduledVisit>> {
        let (first, last) = month_bounds(year, month)?;
        let mut visits: Vec<ScheduledVisit> = self
            .patients_with_follow_ups()?
            .into_iter()
            .flat_map(|(patient, entries)| {
                entries
                    .into_iter()
                    .filter(|e| (first..=last).contains(&e.scheduled_date))
                    .map(move |entry| ScheduledVisit {
                        entry,
                        patient: patient.clone(),
                    })
            })
            .collect();
        visits.sort_by_key(|v| v.entry.scheduled_date);
        Ok(visits)
    }

    pub fn continuation_stats(&self, year: i32, today: NaiveDate) -> ClinicResult<ContinuationStats> {
        let entries = self.store.all_follow_ups()?;
        Ok(ContinuationStats::compute(&entries, year, today))
    }

    // ------------------------------------------------------------------
    // Eligibility
    // ------------------------------------------------------------------

    pub fn check_insurance_eligibility(
        &self,
        patient: PatientId,
        candidate: NaiveDate,
    ) -> ClinicResult<Eligibility> {
        self.get_patient(patient)?;
        let last = self
            .last_measurement(patient)?
            .map(|m| m.measurement_date);
        let interval = self.settings()?.insurance_interval_days;
        Ok(evaluate_eligibility(last, candidate, interval))
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    pub fn get_system_setting(&self, key: &str, default: &str) -> ClinicResult<String> {
        let map = self.store.settings()?;
        Ok(get_setting(&map, key, default).to_string())
    }

    pub fn update_system_setting(&self, key: &str, value: &str) -> ClinicResult<()> {
        let key = key.trim();
        let value = value.trim();
        validate_setting(key, value)?;
        self.store.put_setting(key, value)?;
        tracing::info!(key, value, "updated system setting");
        Ok(())
    }

    pub fn settings(&self) -> ClinicResult<ClinicSettings> {
        Ok(ClinicSettings::from_map(&self.store.settings()?))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::constants::SETTING_FOLLOW_UP_MONTHS;
    use crate::eligibility::EligibilityReason;
    use crate::reference::built_in_table;
    use crate::repositories::FileStore;
    use crate::schedule::{ContactMethod, ScheduleStatus};
    use crate::settings::SettingsMap;
    use chrono::Duration;
    use dxa_types::NonEmptyText;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    pub(crate) fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    pub(crate) fn service(temp: &TempDir) -> ClinicService<FileStore> {
        let cfg = CoreConfig::new(temp.path().to_path_buf(), None).expect("valid config");
        ClinicService::new(
            FileStore::new(Arc::new(cfg)),
            Arc::new(DiagnosticCalculator::new(Arc::new(built_in_table()))),
        )
    }

    pub(crate) fn register<S: ClinicStore>(svc: &ClinicService<S>, code: &str) -> PatientRecord {
        svc.register_patient(NewPatient {
            patient_code: code.into(),
            name: NonEmptyText::new("Ito Fumiko").unwrap(),
            name_kana: None,
            gender: Gender::Female,
            birth_date: date(1952, 4, 18),
        })
        .expect("registration should succeed")
    }

    #[test]
    fn test_add_measurement_rolls_schedule_forward() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let svc = service(&temp_dir);
        let p = register(&svc, "P-001");

        let id = svc
            .add_measurement(NewMeasurement::new(p.id, date(2025, 1, 10)).with_femur(0.7))
            .expect("save should succeed");

        let history = svc.measurement_history(p.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, id);

        let entries = svc.follow_ups(p.id).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].scheduled_date, date(2025, 7, 9));
        assert!(entries[0].is_pending());
        assert!(entries[0].contact_needed);
    }

    #[test]
    fn test_follow_up_measurement_completes_pending_entry() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let svc = service(&temp_dir);
        let p = register(&svc, "P-001");

        svc.add_measurement(NewMeasurement::new(p.id, date(2025, 1, 10)).with_femur(0.7))
            .unwrap();
        // Two days after the scheduled 2025-07-09.
        svc.add_measurement(NewMeasurement::new(p.id, date(2025, 7, 11)).with_lumbar(0.95))
            .unwrap();

        let entries = svc.follow_ups(p.id).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status, ScheduleStatus::Completed);
        assert_eq!(entries[0].completed_date, Some(date(2025, 7, 11)));
        assert_eq!(entries[1].scheduled_date, date(2026, 1, 7));
        assert!(entries[1].is_pending());
    }

    #[test]
    fn test_measurement_outside_window_leaves_entry_pending() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let svc = service(&temp_dir);
        let p = register(&svc, "P-001");

        svc.add_measurement(NewMeasurement::new(p.id, date(2025, 1, 10)).with_femur(0.7))
            .unwrap();
        svc.add_measurement(NewMeasurement::new(p.id, date(2025, 7, 13)).with_femur(0.7))
            .unwrap();

        let entries = svc.follow_ups(p.id).unwrap();
        assert!(entries[0].is_pending(), "four days late is outside the window");
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_follow_up_months_setting_is_respected() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let svc = service(&temp_dir);
        let p = register(&svc, "P-001");
        svc.update_system_setting(SETTING_FOLLOW_UP_MONTHS, "12")
            .unwrap();

        svc.add_measurement(NewMeasurement::new(p.id, date(2025, 1, 10)).with_femur(0.7))
            .unwrap();

        assert_eq!(
            svc.follow_ups(p.id).unwrap()[0].scheduled_date,
            date(2025, 1, 10) + Duration::days(360)
        );
    }

    #[test]
    fn test_measurement_for_unknown_patient_is_rejected() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let svc = service(&temp_dir);
        let err = svc
            .add_measurement(NewMeasurement::new(PatientId::new(), date(2025, 1, 10)).with_femur(0.7))
            .expect_err("unknown patient");
        assert!(matches!(err, ClinicError::PatientNotFound(_)));
    }

    /// Store whose measurement writes can be made to fail.
    struct FailingStore {
        inner: FileStore,
        fail_measurements: AtomicBool,
    }

    impl ClinicStore for FailingStore {
        fn insert_patient(&self, patient: &PatientRecord) -> ClinicResult<()> {
            self.inner.insert_patient(patient)
        }
        fn get_patient(&self, id: PatientId) -> ClinicResult<Option<PatientRecord>> {
            self.inner.get_patient(id)
        }
        fn list_patients(&self) -> ClinicResult<Vec<PatientRecord>> {
            self.inner.list_patients()
        }
        fn append_measurement(&self, record: &MeasurementRecord) -> ClinicResult<()> {
            if self.fail_measurements.load(Ordering::SeqCst) {
                return Err(ClinicError::FileWrite {
                    path: "measurements.yaml".into(),
                    source: std::io::Error::other("disk full"),
                });
            }
            self.inner.append_measurement(record)
        }
        fn measurements_for(&self, patient: PatientId) -> ClinicResult<Vec<MeasurementRecord>> {
            self.inner.measurements_for(patient)
        }
        fn follow_ups_for(&self, patient: PatientId) -> ClinicResult<Vec<FollowUpEntry>> {
            self.inner.follow_ups_for(patient)
        }
        fn save_follow_ups(&self, patient: PatientId, entries: &[FollowUpEntry]) -> ClinicResult<()> {
            self.inner.save_follow_ups(patient, entries)
        }
        fn settings(&self) -> ClinicResult<SettingsMap> {
            self.inner.settings()
        }
        fn put_setting(&self, key: &str, value: &str) -> ClinicResult<()> {
            self.inner.put_setting(key, value)
        }
    }

    #[test]
    fn test_failed_save_makes_no_schedule_changes() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let cfg = CoreConfig::new(temp_dir.path().to_path_buf(), None).unwrap();
        let svc = ClinicService::new(
            FailingStore {
                inner: FileStore::new(Arc::new(cfg)),
                fail_measurements: AtomicBool::new(false),
            },
            Arc::new(DiagnosticCalculator::new(Arc::new(built_in_table()))),
        );
        let p = register(&svc, "P-001");
        svc.add_measurement(NewMeasurement::new(p.id, date(2025, 1, 10)).with_femur(0.7))
            .unwrap();
        let before = svc.follow_ups(p.id).unwrap();

        svc.store().fail_measurements.store(true, Ordering::SeqCst);
        let err = svc
            .add_measurement(NewMeasurement::new(p.id, date(2025, 7, 9)).with_femur(0.7))
            .expect_err("store refuses the write");
        assert!(matches!(err, ClinicError::FileWrite { .. }));

        assert_eq!(svc.follow_ups(p.id).unwrap(), before);
        assert_eq!(svc.measurement_history(p.id).unwrap().len(), 1);
    }

    #[test]
    fn test_unreadable_settings_leave_measurement_unsaved() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let svc = service(&temp_dir);
        let p = register(&svc, "P-001");
        std::fs::write(temp_dir.path().join("settings.yaml"), "[not, a, map")
            .expect("write settings");

        svc.add_measurement(NewMeasurement::new(p.id, date(2025, 1, 10)).with_femur(0.7))
            .expect_err("settings cannot be read");

        assert!(svc.measurement_history(p.id).unwrap().is_empty());
        assert!(svc.follow_ups(p.id).unwrap().is_empty());

        std::fs::remove_file(temp_dir.path().join("settings.yaml")).expect("remove settings");
        svc.add_measurement(NewMeasurement::new(p.id, date(2025, 1, 10)).with_femur(0.7))
            .expect("retry should succeed");
        assert_eq!(svc.measurement_history(p.id).unwrap().len(), 1);
        assert_eq!(svc.follow_ups(p.id).unwrap().len(), 1);
    }

    #[test]
    fn test_out_of_range_follow_up_months_is_rejected_before_saving() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let svc = service(&temp_dir);
        let p = register(&svc, "P-001");

        let err = svc
            .update_system_setting(SETTING_FOLLOW_UP_MONTHS, "4000000")
            .expect_err("too many months");
        assert!(matches!(err, ClinicError::InvalidInput(_)));

        // A hand-edited settings file bypasses validation.
        svc.store()
            .put_setting(SETTING_FOLLOW_UP_MONTHS, &u32::MAX.to_string())
            .unwrap();
        let err = svc
            .add_measurement(NewMeasurement::new(p.id, date(2025, 1, 10)).with_femur(0.7))
            .expect_err("next follow-up date is out of range");
        assert!(matches!(err, ClinicError::InvalidInput(_)));

        assert!(svc.measurement_history(p.id).unwrap().is_empty());
        assert!(svc.follow_ups(p.id).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_saves_for_one_patient_do_not_lose_entries() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let svc = service(&temp_dir);
        let p = register(&svc, "P-001");

        std::thread::scope(|scope| {
            for offset in 0..4 {
                let svc = &svc;
                scope.spawn(move || {
                    svc.add_measurement(
                        NewMeasurement::new(p.id, date(2025, 1, 1) + Duration::days(offset * 30))
                            .with_femur(0.7),
                    )
                    .expect("save should succeed");
                });
            }
        });

        assert_eq!(svc.measurement_history(p.id).unwrap().len(), 4);
        assert_eq!(svc.follow_ups(p.id).unwrap().len(), 4);
    }

    #[test]
    fn test_overdue_report_reads_thresholds_from_settings() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let svc = service(&temp_dir);
        let p = register(&svc, "P-001");
        svc.add_measurement(NewMeasurement::new(p.id, date(2025, 1, 10)).with_femur(0.7))
            .unwrap();

        // Scheduled 2025-07-09; ten days later.
        let today = date(2025, 7, 19);
        let report = svc.get_overdue_patients(today).unwrap();
        assert_eq!(report.warning.len(), 1);
        assert_eq!(report.warning[0].patient.id, p.id);
        assert_eq!(report.warning[0].days_overdue, 10);

        svc.update_system_setting("urgent_overdue_days", "10").unwrap();
        let report = svc.get_overdue_patients(today).unwrap();
        assert_eq!(report.urgent.len(), 1);
        assert!(report.warning.is_empty());
    }

    #[test]
    fn test_manual_completion_and_contact() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let svc = service(&temp_dir);
        let a = register(&svc, "A");
        let b = register(&svc, "B");
        svc.add_measurement(NewMeasurement::new(a.id, date(2025, 1, 10)).with_femur(0.7))
            .unwrap();
        svc.add_measurement(NewMeasurement::new(b.id, date(2025, 1, 10)).with_femur(0.7))
            .unwrap();
        let a_entry = svc.follow_ups(a.id).unwrap()[0].id;
        let b_entry = svc.follow_ups(b.id).unwrap()[0].id;

        let contacted = svc
            .record_contact(
                a_entry,
                ContactRecord {
                    date: date(2025, 7, 20),
                    method: ContactMethod::Phone,
                    outcome: "will call back".into(),
                    notes: Some("prefers mornings".into()),
                },
            )
            .unwrap();
        assert!(contacted.is_pending());
        assert!(!contacted.contact_needed);

        let report = svc.get_overdue_patients(date(2025, 7, 25)).unwrap();
        assert_eq!(report.urgent.len(), 2);
        let a_row = report.all.iter().find(|r| r.schedule_id == a_entry).unwrap();
        assert!(a_row.contacted);

        let done = svc.complete_follow_up(b_entry, date(2025, 7, 26)).unwrap();
        assert_eq!(done.completed_date, Some(date(2025, 7, 26)));
        assert!(matches!(
            svc.complete_follow_up(b_entry, date(2025, 7, 27)),
            Err(ClinicError::ScheduleAlreadyCompleted(_))
        ));
        assert!(matches!(
            svc.complete_follow_up(ScheduleId::new(), date(2025, 7, 27)),
            Err(ClinicError::ScheduleNotFound(_))
        ));
    }

    #[test]
    fn test_eligibility_reads_latest_measurement() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let svc = service(&temp_dir);
        let p = register(&svc, "P-001");

        let first = svc.check_insurance_eligibility(p.id, date(2025, 1, 1)).unwrap();
        assert_eq!(first.reason, EligibilityReason::FirstMeasurement);

        svc.add_measurement(NewMeasurement::new(p.id, date(2025, 1, 1)).with_femur(0.7))
            .unwrap();
        let soon = svc.check_insurance_eligibility(p.id, date(2025, 4, 1)).unwrap();
        assert!(!soon.eligible);
        assert_eq!(
            soon.reason,
            EligibilityReason::TooSoon {
                days_since: 90,
                remaining_days: 30
            }
        );

        svc.update_system_setting("insurance_interval_days", "90").unwrap();
        assert!(svc
            .check_insurance_eligibility(p.id, date(2025, 4, 1))
            .unwrap()
            .eligible);
    }

    #[test]
    fn test_monthly_schedule_and_stats() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let svc = service(&temp_dir);
        let a = register(&svc, "A");
        let b = register(&svc, "B");
        svc.add_measurement(NewMeasurement::new(a.id, date(2025, 1, 20)).with_femur(0.7))
            .unwrap();
        svc.add_measurement(NewMeasurement::new(b.id, date(2025, 1, 5)).with_femur(0.7))
            .unwrap();
        // Completes b's entry scheduled 2025-07-04.
        svc.add_measurement(NewMeasurement::new(b.id, date(2025, 7, 4)).with_femur(0.7))
            .unwrap();

        let july = svc.monthly_schedule(2025, 7).unwrap();
        let dates: Vec<NaiveDate> = july.iter().map(|v| v.entry.scheduled_date).collect();
        assert_eq!(dates, vec![date(2025, 7, 4), date(2025, 7, 19)]);
        assert_eq!(july[0].patient.id, b.id);

        // Entries for 2025: 07-04 completed, 07-19 overdue, 12-31 not yet due.
        let stats = svc.continuation_stats(2025, date(2025, 8, 1)).unwrap();
        assert_eq!(stats.total_scheduled, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.overdue, 1);
        assert_eq!(stats.continuation_rate, 33.3);
    }

    #[test]
    fn test_vertebral_progression_between_latest_two() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let svc = service(&temp_dir);
        let p = register(&svc, "P-001");
        svc.add_measurement(
            NewMeasurement::new(p.id, date(2024, 7, 1))
                .with_vertebrae(vec![(Vertebra::L1, 0.80), (Vertebra::L2, 0.90)]),
        )
        .unwrap();
        assert!(svc.vertebral_progression(p.id).unwrap().is_none());

        svc.add_measurement(NewMeasurement::new(p.id, date(2024, 10, 1)).with_femur(0.7))
            .unwrap();
        svc.add_measurement(
            NewMeasurement::new(p.id, date(2025, 1, 10))
                .with_vertebrae(vec![(Vertebra::L1, 0.84), (Vertebra::L2, 0.85)]),
        )
        .unwrap();

        let progression = svc
            .vertebral_progression(p.id)
            .unwrap()
            .expect("two vertebral measurements");
        assert_eq!(progression.len(), 2);
        assert_eq!(progression[0].vertebra, Vertebra::L1);

        let previous = svc
            .previous_measurement(p.id, date(2025, 1, 10))
            .unwrap()
            .expect("earlier measurement");
        assert_eq!(previous.measurement_date, date(2024, 10, 1));
    }

    #[test]
    fn test_system_setting_defaults_and_validation() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let svc = service(&temp_dir);
        assert_eq!(svc.get_system_setting("clinic_name", "DXA").unwrap(), "DXA");

        svc.update_system_setting("clinic_name", "Sakura Ortho").unwrap();
        assert_eq!(
            svc.get_system_setting("clinic_name", "DXA").unwrap(),
            "Sakura Ortho"
        );
        assert!(svc
            .update_system_setting(SETTING_FOLLOW_UP_MONTHS, "six")
            .is_err());
    }
}
