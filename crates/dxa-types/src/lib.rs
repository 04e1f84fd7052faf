//! Validated primitive types shared across the DXA workspace.
//!
//! - [`NonEmptyText`] and [`PatientCode`] for trimmed, checked text
//! - [`Gender`] translated once at the boundary from clinic labels
//! - [`RecordId`] canonical identifiers with sharded directory derivation

mod gender;
mod id;
mod text;

pub use gender::{Gender, GenderError};
pub use id::{IdError, RecordId};
pub use text::{NonEmptyText, PatientCode, TextError, MAX_PATIENT_CODE_LEN};
