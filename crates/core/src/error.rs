use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ClinicError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("failed to create storage directory: {0}")]
    StorageDirCreation(std::io::Error),
    #[error("failed to write {path}: {source}", path = path.display())]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read {path}: {source}", path = path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize YAML: {0}")]
    YamlSerialization(serde_yaml::Error),
    #[error("schema mismatch in {file} at {field}: {message}")]
    YamlDeserialization {
        file: String,
        field: String,
        message: String,
    },

    #[error("patient not found: {0}")]
    PatientNotFound(String),
    #[error("patient code already registered: {0}")]
    DuplicatePatientCode(String),
    #[error("follow-up entry not found: {0}")]
    ScheduleNotFound(String),
    #[error("follow-up entry {0} is already completed")]
    ScheduleAlreadyCompleted(String),
    #[error("reference table rejected: {0}")]
    InvalidReference(String),

    #[error("invalid text: {0}")]
    Text(#[from] dxa_types::TextError),
    #[error("invalid identifier: {0}")]
    Id(#[from] dxa_types::IdError),
    #[error("invalid gender: {0}")]
    Gender(#[from] dxa_types::GenderError),
}

pub type ClinicResult<T> = std::result::Result<T, ClinicError>;
