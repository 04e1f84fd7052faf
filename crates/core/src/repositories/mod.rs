//! Persistence seam for the clinic core.
//!
//! The clinic service talks to storage only through [`ClinicStore`]. The shipped
//! implementation is [`FileStore`](file_store::FileStore), which keeps one sharded directory
//! of YAML documents per patient.
//!
//! Stores do no locking of their own. Read-modify-write sequences for a patient are
//! serialised by the caller.

pub mod file_store;

use crate::measurement::MeasurementRecord;
use crate::patient::{PatientId, PatientRecord};
use crate::schedule::FollowUpEntry;
use crate::settings::SettingsMap;
use crate::ClinicResult;

pub use file_store::FileStore;

pub trait ClinicStore: Send + Sync {
    // Patients

    /// Persists a new patient. Fails if the patient code is already taken.
    fn insert_patient(&self, patient: &PatientRecord) -> ClinicResult<()>;

    fn get_patient(&self, id: PatientId) -> ClinicResult<Option<PatientRecord>>;

    /// All patients, oldest registration first.
    fn list_patients(&self) -> ClinicResult<Vec<PatientRecord>>;

    fn find_patient_by_code(&self, code: &str) -> ClinicResult<Option<PatientRecord>> {
        Ok(self
            .list_patients()?
            .into_iter()
            .find(|p| p.patient_code == code))
    }

    // Measurements

    fn append_measurement(&self, record: &MeasurementRecord) -> ClinicResult<()>;

    /// History for one patient, newest measurement date first.
    fn measurements_for(&self, patient: PatientId) -> ClinicResult<Vec<MeasurementRecord>>;

    // Follow-up schedule

    fn follow_ups_for(&self, patient: PatientId) -> ClinicResult<Vec<FollowUpEntry>>;

    /// Replaces the patient's follow-up list.
    fn save_follow_ups(&self, patient: PatientId, entries: &[FollowUpEntry]) -> ClinicResult<()>;

    fn all_follow_ups(&self) -> ClinicResult<Vec<FollowUpEntry>> {
        let mut all = Vec::new();
        for patient in self.list_patients()? {
            all.extend(self.follow_ups_for(patient.id)?);
        }
        Ok(all)
    }

    // Settings

    fn settings(&self) -> ClinicResult<SettingsMap>;

    fn put_setting(&self, key: &str, value: &str) -> ClinicResult<()>;
}
