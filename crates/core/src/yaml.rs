//! YAML document helpers shared by the reference loaders and the file store.
//!
//! Parsing goes through `serde_path_to_error` so a schema mismatch names the failing field
//! (for example `[2].female_sd_adult`) instead of only the serde message.

use crate::{ClinicError, ClinicResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Parse YAML text into `T`, reporting the path to the failing field.
pub(crate) fn parse<T: DeserializeOwned>(yaml_text: &str, file_label: &str) -> ClinicResult<T> {
    let deserializer = serde_yaml::Deserializer::from_str(yaml_text);
    serde_path_to_error::deserialize::<_, T>(deserializer).map_err(|err| {
        let path = err.path().to_string();
        let field = if path.is_empty() || path == "." {
            "<root>".to_string()
        } else {
            path
        };
        ClinicError::YamlDeserialization {
            file: file_label.to_string(),
            field,
            message: err.into_inner().to_string(),
        }
    })
}

pub(crate) fn render<T: Serialize>(value: &T) -> ClinicResult<String> {
    serde_yaml::to_string(value).map_err(ClinicError::YamlSerialization)
}

/// Read and parse a YAML file; a missing file yields `None`.
pub(crate) fn read_optional<T: DeserializeOwned>(path: &Path) -> ClinicResult<Option<T>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ClinicError::FileRead {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    parse(&text, &path.display().to_string()).map(Some)
}

/// Serialize `value` and replace `path` with it.
///
/// The document is written to a sibling temp file first and renamed over the target so a
/// crash mid-write never leaves a truncated record behind.
pub(crate) fn write_atomic<T: Serialize>(path: &Path, value: &T) -> ClinicResult<()> {
    let text = render(value)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(ClinicError::StorageDirCreation)?;
    }

    let tmp = path.with_extension("yaml.tmp");
    fs::write(&tmp, text).map_err(|source| ClinicError::FileWrite {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| ClinicError::FileWrite {
        path: path.to_path_buf(),
        source,
    })
}
