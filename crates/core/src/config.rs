//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into core services as an
//! `Arc<CoreConfig>`. Core code never reads environment variables itself; binaries read them
//! and hand the raw values to the helpers below.

use crate::constants::{DEFAULT_DATA_DIR, PATIENTS_DIR_NAME, REFERENCE_DIR_NAME, SETTINGS_FILENAME};
use crate::{ClinicError, ClinicResult};
use std::path::{Path, PathBuf};

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    data_dir: PathBuf,
    reference_dir: PathBuf,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// `reference_dir` defaults to `<data_dir>/reference` when not given. The reference
    /// directory is allowed to be missing: loading then falls back to built-in values.
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::InvalidInput`] if `data_dir` exists but is not a directory.
    pub fn new(data_dir: PathBuf, reference_dir: Option<PathBuf>) -> ClinicResult<Self> {
        if data_dir.exists() && !data_dir.is_dir() {
            return Err(ClinicError::InvalidInput(format!(
                "data directory is not a directory: {}",
                data_dir.display()
            )));
        }

        let reference_dir = reference_dir.unwrap_or_else(|| data_dir.join(REFERENCE_DIR_NAME));

        Ok(Self {
            data_dir,
            reference_dir,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn patients_dir(&self) -> PathBuf {
        self.data_dir.join(PATIENTS_DIR_NAME)
    }

    pub fn settings_file(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILENAME)
    }

    pub fn reference_dir(&self) -> &Path {
        &self.reference_dir
    }
}

/// Resolve the data directory from an optional environment value.
///
/// Empty or whitespace values count as unset.
pub fn data_dir_from_env_value(value: Option<String>) -> PathBuf {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

/// Resolve an optional reference directory override from an environment value.
pub fn reference_dir_from_env_value(value: Option<String>) -> Option<PathBuf> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn reference_dir_defaults_under_data_dir() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let cfg = CoreConfig::new(temp_dir.path().to_path_buf(), None).expect("config");
        assert_eq!(cfg.reference_dir(), temp_dir.path().join("reference"));
        assert_eq!(cfg.patients_dir(), temp_dir.path().join("patients"));
    }

    #[test]
    fn rejects_data_dir_that_is_a_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let file = temp_dir.path().join("not-a-dir");
        std::fs::write(&file, "x").expect("write file");

        let err = CoreConfig::new(file, None).expect_err("file path must be rejected");
        assert!(matches!(err, ClinicError::InvalidInput(_)));
    }

    #[test]
    fn blank_env_values_fall_back_to_defaults() {
        assert_eq!(
            data_dir_from_env_value(Some("  ".into())),
            PathBuf::from(DEFAULT_DATA_DIR)
        );
        assert_eq!(data_dir_from_env_value(None), PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(reference_dir_from_env_value(Some(String::new())), None);
        assert_eq!(
            reference_dir_from_env_value(Some("/srv/ref".into())),
            Some(PathBuf::from("/srv/ref"))
        );
    }
}
